//! Engine Lifecycle Events
//!
//! The engine emits one event per completed operation and a pair of events
//! per failed operation (`error` plus the operation's failure event). Events
//! fan out over a broadcast channel so embedders can observe the engine
//! without coupling to it.

use crate::models::CrudQuery;
use crate::services::error::CrudError;

/// Events emitted by the CRUD engine.
#[derive(Debug, Clone)]
pub enum CrudEvent {
    /// A document was created
    Create { query: CrudQuery },
    /// A document or field was updated
    Update { query: CrudQuery },
    /// A document or field was deleted
    Delete { query: CrudQuery },
    /// An operation failed
    Error { error: CrudError },
    /// A create failed
    CreateFail { query: CrudQuery, error: CrudError },
    /// An update failed
    UpdateFail { query: CrudQuery, error: CrudError },
    /// A delete failed
    DeleteFail { query: CrudQuery, error: CrudError },
}

impl CrudEvent {
    /// String tag of the event kind
    pub fn event_type(&self) -> &'static str {
        match self {
            CrudEvent::Create { .. } => "crud:create",
            CrudEvent::Update { .. } => "crud:update",
            CrudEvent::Delete { .. } => "crud:delete",
            CrudEvent::Error { .. } => "crud:error",
            CrudEvent::CreateFail { .. } => "crud:createFail",
            CrudEvent::UpdateFail { .. } => "crud:updateFail",
            CrudEvent::DeleteFail { .. } => "crud:deleteFail",
        }
    }
}

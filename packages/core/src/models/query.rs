//! CRUD Query Value Object
//!
//! Every engine operation takes a `CrudQuery` describing what to touch: the
//! model, an optional document id and field, the write value, or a view with
//! its routing parameters. The same object crosses the RPC boundary, so wire
//! names follow the client convention (`type`, `viewParams`, `pageSize`, ...).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The operation a query performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudAction {
    Create,
    Read,
    Update,
    Delete,
    Subscribe,
}

impl CrudAction {
    /// Wire representation of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            CrudAction::Create => "create",
            CrudAction::Read => "read",
            CrudAction::Update => "update",
            CrudAction::Delete => "delete",
            CrudAction::Subscribe => "subscribe",
        }
    }

    /// Parse a wire action name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(CrudAction::Create),
            "read" => Some(CrudAction::Read),
            "update" => Some(CrudAction::Update),
            "delete" => Some(CrudAction::Delete),
            "subscribe" => Some(CrudAction::Subscribe),
            _ => None,
        }
    }
}

impl fmt::Display for CrudAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query describing a single CRUD invocation or subscription target.
///
/// # Examples
///
/// ```rust
/// use crudcast_core::models::{CrudAction, CrudQuery};
/// use serde_json::json;
///
/// // Read one document
/// let read = CrudQuery::by_id("Item", "i1").with_action(CrudAction::Read);
///
/// // Update a single field
/// let update = CrudQuery::by_id("Item", "i1")
///     .with_action(CrudAction::Update)
///     .with_field("owner")
///     .with_value(json!("u2"));
/// assert_eq!(update.resource_path().as_deref(), Some("Item/i1"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrudQuery {
    /// Operation to perform
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<CrudAction>,

    /// Model (typed collection) name
    #[serde(rename = "type")]
    pub model: String,

    /// Document id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Single field addressed by the operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Write value (whole document or single-field value)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// View name for collection reads and view subscriptions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,

    /// View routing parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_params: Option<Map<String, Value>>,

    /// Collection read offset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// Collection read page size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,

    /// Whether a collection read should also return the total count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get_count: Option<bool>,

    /// Truncate string field reads to this many characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_to: Option<u64>,

    /// Caller-chosen marker echoed back on the caller's own publications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<String>,
}

impl CrudQuery {
    /// Query addressing a whole model
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Query addressing one document
    pub fn by_id(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Set the action
    pub fn with_action(mut self, action: CrudAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Address a single field
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Set the write value
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Target a view
    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    /// Set view routing parameters
    pub fn with_view_params(mut self, params: Map<String, Value>) -> Self {
        self.view_params = Some(params);
        self
    }

    /// Set the collection read offset
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Set the collection read page size
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Request a total count alongside the page
    pub fn with_count(mut self) -> Self {
        self.get_count = Some(true);
        self
    }

    /// Set the string projection limit
    pub fn with_slice_to(mut self, slice_to: u64) -> Self {
        self.slice_to = Some(slice_to);
        self
    }

    /// Mark publications caused by this query with a publisher id
    pub fn with_publisher_id(mut self, publisher_id: impl Into<String>) -> Self {
        self.publisher_id = Some(publisher_id.into());
        self
    }

    /// Cache key of the addressed document: `"type/id"`
    ///
    /// `None` when the query does not address a single document.
    pub fn resource_path(&self) -> Option<String> {
        self.id.as_ref().map(|id| format!("{}/{}", self.model, id))
    }
}

/// One page of a collection read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPage {
    /// Ids of the documents on this page
    pub data: Vec<String>,

    /// Total count over the whole view, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,

    /// Whether this page is the last one
    pub is_last_page: bool,
}

//! Socket Server Seam
//!
//! The pub/sub socket server is an external collaborator. This module holds
//! everything the engine needs from it:
//!
//! - `Exchange` - publish/subscribe surface of the server
//! - `LocalExchange` - in-process implementation for tests and embedding
//! - Middleware action/decision types consumed by the access filter
//! - `SocketChannel`/`SocketHandle` - one socket's ordered `crud` procedure
//!   stream

pub mod exchange;
pub mod local;
pub mod middleware;
pub mod procedure;

pub use exchange::{ChannelSubscription, Exchange};
pub use local::LocalExchange;
pub use middleware::{
    InvokeAction, MiddlewareDecision, PublishInAction, PublishOutAction, SocketInfo,
    SubscribeAction,
};
pub use procedure::{CrudRequest, SocketChannel, SocketHandle};

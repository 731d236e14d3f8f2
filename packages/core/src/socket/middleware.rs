//! Middleware Actions and Decisions
//!
//! The socket server runs inbound and outbound middleware pipelines and asks
//! the access filter for a decision per action. This module defines the four
//! action shapes the filter consumes (`INVOKE`, `SUBSCRIBE`, `PUBLISH_IN`,
//! `PUBLISH_OUT`) and the decision returned for each.

use crate::services::error::CrudError;
use serde_json::Value;

/// Identity of a connected socket as seen by middleware and access hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketInfo {
    /// Socket server assigned id
    pub id: String,
    /// Opaque authentication token, passed through to access hooks
    pub auth_token: Option<Value>,
}

impl SocketInfo {
    /// A socket without an auth token
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            auth_token: None,
        }
    }

    /// Attach an auth token
    pub fn with_auth_token(mut self, token: Value) -> Self {
        self.auth_token = Some(token);
        self
    }
}

/// An RPC invocation entering the server.
#[derive(Debug, Clone)]
pub struct InvokeAction {
    pub socket: SocketInfo,
    /// Procedure name; the engine only claims `"crud"`
    pub procedure: String,
    /// Raw request payload
    pub data: Value,
}

/// A channel subscription request entering the server.
#[derive(Debug, Clone)]
pub struct SubscribeAction {
    pub socket: SocketInfo,
    pub channel: String,
    /// Optional client data accompanying the subscription
    pub data: Option<Value>,
}

/// A client publication entering the server.
#[derive(Debug, Clone)]
pub struct PublishInAction {
    pub socket: SocketInfo,
    pub channel: String,
    pub payload: Option<Value>,
}

/// A publication about to be delivered to one socket.
#[derive(Debug, Clone)]
pub struct PublishOutAction {
    pub socket: SocketInfo,
    pub channel: String,
    pub payload: Option<Value>,
}

/// The access filter's verdict on one middleware action.
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareDecision {
    /// Let the action through, optionally rewriting its payload
    Allow(Option<Value>),
    /// Reject the action with an error delivered to the client
    Block(CrudError),
    /// Drop the action without notifying anyone (publisher echo)
    Discard,
}

impl MiddlewareDecision {
    /// Whether the action was allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, MiddlewareDecision::Allow(_))
    }

    /// The rewritten payload of an allowed action
    pub fn payload(&self) -> Option<&Value> {
        match self {
            MiddlewareDecision::Allow(payload) => payload.as_ref(),
            _ => None,
        }
    }
}

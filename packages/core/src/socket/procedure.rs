//! Socket Procedure Channel
//!
//! Each connected socket exposes one `crud` invocation procedure. The socket
//! server feeds requests into a [`SocketChannel`]; the engine consumes them
//! strictly in arrival order and answers through the request's reply slot.

use crate::services::error::CrudError;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::middleware::SocketInfo;

/// One pending `crud` invocation from a socket.
#[derive(Debug)]
pub struct CrudRequest {
    /// Raw request payload (`{action, ...query}`)
    pub data: Value,
    reply: Option<oneshot::Sender<Result<Value, CrudError>>>,
}

impl CrudRequest {
    /// Create a request and the receiver its reply arrives on
    pub fn new(data: Value) -> (Self, oneshot::Receiver<Result<Value, CrudError>>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                data,
                reply: Some(sender),
            },
            receiver,
        )
    }

    /// Answer the request with a success result
    pub fn end(mut self, result: Value) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(result));
        }
    }

    /// Answer the request with an error
    pub fn error(mut self, error: CrudError) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(error));
        }
    }
}

/// The engine-side end of one socket's `crud` procedure stream.
#[derive(Debug)]
pub struct SocketChannel {
    /// Identity of the connected socket
    pub info: SocketInfo,
    pub(crate) requests: mpsc::UnboundedReceiver<CrudRequest>,
}

impl SocketChannel {
    /// Create a socket channel and the handle used to drive it
    pub fn new(info: SocketInfo) -> (Self, SocketHandle) {
        let (sender, requests) = mpsc::unbounded_channel();
        (
            Self {
                info: info.clone(),
                requests,
            },
            SocketHandle { info, sender },
        )
    }
}

/// Driver-side handle of a socket's procedure stream.
///
/// The socket server (or a test) pushes requests through this handle; each
/// `invoke` resolves with the engine's reply.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    /// Identity of the connected socket
    pub info: SocketInfo,
    sender: mpsc::UnboundedSender<CrudRequest>,
}

impl SocketHandle {
    /// Send one request and await its reply
    pub async fn invoke(&self, data: Value) -> Result<Value, CrudError> {
        let (request, reply) = CrudRequest::new(data);
        self.sender
            .send(request)
            .map_err(|_| CrudError::invalid_operation("socket is closed"))?;
        reply
            .await
            .map_err(|_| CrudError::invalid_operation("socket request was dropped"))?
    }
}

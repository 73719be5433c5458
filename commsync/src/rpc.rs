//! Calls from the UI into the backend, correlated by `callback_id`.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use commsync_core::{
    wire::{MethodCall, MethodReturn},
    CallbackId, Envelope, Message,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{ProtocolError, RpcError, TransportError};

/// Envelopes waiting for the session's writer task.
pub(crate) type Outbox = mpsc::UnboundedSender<Envelope>;

/// Sends `method_call`s and resolves them when the matching `method_return`
/// arrives.
///
/// There is no timeout: a reply that never comes leaves its entry in the
/// pending table (see [`RpcClient::pending_ids`]) until the session is
/// disposed.
#[derive(Clone)]
pub struct RpcClient {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>,
    outbox: Outbox,
}

impl RpcClient {
    pub(crate) fn new(outbox: Outbox) -> Self {
        RpcClient {
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbox,
        }
    }

    /// Send the call now and return a future for its reply. The call goes
    /// out even if the returned [`Reply`] is never awaited.
    pub fn call(&self, method_name: &str, args: Vec<Value>) -> Reply {
        let id = CallbackId::generate();
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(id.to_string(), sender);

        let message = Message::MethodCall(MethodCall {
            method_name: method_name.to_string(),
            args,
            callback_id: Some(id.clone()),
        });
        let sent = message
            .encode(None)
            .map_err(|e| TransportError::Encode(e.to_string()))
            .and_then(|envelope| {
                self.outbox
                    .send(envelope)
                    .map_err(|_| TransportError::Closed)
            });
        match sent {
            Ok(()) => {
                debug!(callback_id = %id, method_name, "sent method_call");
                Reply {
                    id,
                    receiver: Ok(receiver),
                }
            }
            Err(e) => {
                self.pending.lock().remove(id.as_str());
                Reply {
                    id,
                    receiver: Err(Some(e.into())),
                }
            }
        }
    }

    /// Resolve the pending call named by `reply.callback_id`, consuming it.
    pub fn resolve(&self, reply: MethodReturn) -> Result<(), ProtocolError> {
        let sender = self
            .pending
            .lock()
            .remove(reply.callback_id.as_str())
            .ok_or_else(|| ProtocolError::UnknownCallback(reply.callback_id.to_string()))?;
        if sender.send(reply.value).is_err() {
            debug!(
                callback_id = %reply.callback_id,
                "reply arrived after the caller lost interest"
            );
        }
        Ok(())
    }

    /// Correlation ids of the calls still waiting for a reply.
    pub fn pending_ids(&self) -> Vec<CallbackId> {
        self.pending
            .lock()
            .keys()
            .map(|k| CallbackId::from_string(k.clone()))
            .collect()
    }

    /// Drop every pending call; their replies resolve to
    /// [`RpcError::Abandoned`].
    pub(crate) fn abandon_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let n = pending.len();
        pending.clear();
        n
    }
}

/// The reply to one [`RpcClient::call`].
pub struct Reply {
    id: CallbackId,
    receiver: Result<oneshot::Receiver<Value>, Option<RpcError>>,
}

impl Reply {
    pub fn callback_id(&self) -> &CallbackId {
        &self.id
    }
}

impl Future for Reply {
    type Output = Result<Value, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match &mut this.receiver {
            Ok(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(value)) => Poll::Ready(Ok(value)),
                Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::Abandoned(this.id.to_string()))),
                Poll::Pending => Poll::Pending,
            },
            Err(e) => Poll::Ready(Err(e
                .take()
                .unwrap_or_else(|| RpcError::Abandoned(this.id.to_string())))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sent_call(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> MethodCall {
        let envelope = rx.try_recv().unwrap();
        match Message::decode(&envelope).unwrap() {
            Message::MethodCall(call) => call,
            other => panic!("expected method_call, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_and_resolve() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rpc = RpcClient::new(tx);
        let reply = rpc.call("add", vec![json!(1), json!(2)]);

        let call = sent_call(&mut rx);
        assert_eq!(call.method_name, "add");
        assert_eq!(call.args, vec![json!(1), json!(2)]);
        let id = call.callback_id.unwrap();
        assert_eq!(&id, reply.callback_id());
        assert_eq!(rpc.pending_ids(), vec![id.clone()]);

        rpc.resolve(MethodReturn {
            callback_id: id.clone(),
            value: json!(3),
        })
        .unwrap();
        assert_eq!(reply.await.unwrap(), json!(3));
        assert!(rpc.pending_ids().is_empty());

        // Consumed at most once
        let again = rpc.resolve(MethodReturn {
            callback_id: id,
            value: json!(3),
        });
        assert!(matches!(again, Err(ProtocolError::UnknownCallback(_))));
    }

    #[tokio::test]
    async fn test_out_of_order_replies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rpc = RpcClient::new(tx);
        let r1 = rpc.call("ping", vec![]);
        let r2 = rpc.call("ping", vec![]);
        let c1 = sent_call(&mut rx).callback_id.unwrap();
        let c2 = sent_call(&mut rx).callback_id.unwrap();
        assert_ne!(c1, c2);

        rpc.resolve(MethodReturn {
            callback_id: c2.clone(),
            value: json!("second"),
        })
        .unwrap();
        assert_eq!(r2.await.unwrap(), json!("second"));
        assert_eq!(rpc.pending_ids(), vec![c1.clone()]);

        rpc.resolve(MethodReturn {
            callback_id: c1,
            value: json!("first"),
        })
        .unwrap();
        assert_eq!(r1.await.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn test_abandon() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let rpc = RpcClient::new(tx);
        let reply = rpc.call("never", vec![]);
        assert_eq!(rpc.abandon_all(), 1);
        assert!(matches!(reply.await, Err(RpcError::Abandoned(_))));
    }

    #[tokio::test]
    async fn test_call_on_closed_outbox() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let rpc = RpcClient::new(tx);
        let reply = rpc.call("ping", vec![]);
        assert!(matches!(
            reply.await,
            Err(RpcError::Transport(TransportError::Closed))
        ));
        assert!(rpc.pending_ids().is_empty());
    }
}

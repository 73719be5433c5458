//! The channel collaborator: how envelopes get to and from the backend.
//!
//! A [`Transport`] is opened once by [`crate::Session::connect`]. Reconnects
//! are not handled here.

use std::process::Stdio;

use async_trait::async_trait;
use commsync_core::{
    wire::{envelope_from_json, envelope_to_json},
    DecodeError, Envelope, Message, Metadata,
};
use futures_util::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin},
    sync::mpsc,
};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Inbound buffer between a transport's reader and the session driver.
const INBOUND_CAPACITY: usize = 100;

/// The sending half of an open channel. Messages are delivered in send order.
#[async_trait]
pub trait Outgoing: Send {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;
}

pub struct OpenChannel {
    pub outgoing: Box<dyn Outgoing>,
    /// Inbound envelopes, in delivery order. Closes when the backend goes away.
    pub incoming: mpsc::Receiver<Envelope>,
}

#[async_trait]
pub trait Transport: Send {
    async fn open(self) -> Result<OpenChannel, TransportError>;
}

/// An in-process channel; the other end is held by a [`Backend`].
pub struct MemoryTransport {
    to_backend: mpsc::UnboundedSender<Envelope>,
    from_backend: mpsc::Receiver<Envelope>,
}

/// The backend side of a [`memory_channel`].
pub struct Backend {
    to_session: mpsc::Sender<Envelope>,
    from_session: mpsc::UnboundedReceiver<Envelope>,
}

pub fn memory_channel() -> (MemoryTransport, Backend) {
    let (to_backend, from_session) = mpsc::unbounded_channel();
    let (to_session, from_backend) = mpsc::channel(INBOUND_CAPACITY);
    (
        MemoryTransport {
            to_backend,
            from_backend,
        },
        Backend {
            to_session,
            from_session,
        },
    )
}

struct MemoryOutgoing(mpsc::UnboundedSender<Envelope>);

#[async_trait]
impl Outgoing for MemoryOutgoing {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        self.0
            .send(envelope.clone())
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(self) -> Result<OpenChannel, TransportError> {
        Ok(OpenChannel {
            outgoing: Box::new(MemoryOutgoing(self.to_backend)),
            incoming: self.from_backend,
        })
    }
}

impl Backend {
    pub async fn send_envelope(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.to_session
            .send(envelope)
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn send(
        &self,
        message: &Message,
        metadata: Option<Metadata>,
    ) -> Result<(), TransportError> {
        let envelope = message
            .encode(metadata)
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.send_envelope(envelope).await
    }

    /// The next envelope the session sent, or `None` once it is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.from_session.recv().await
    }

    /// Like [`Backend::recv`], decoding the message.
    pub async fn recv_message(
        &mut self,
    ) -> Option<Result<(Message, Option<Metadata>), DecodeError>> {
        let envelope = self.recv().await?;
        Some(Message::decode(&envelope).map(|message| (message, envelope.metadata)))
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.from_session.try_recv().ok()
    }
}

/// A backend process speaking newline-delimited JSON envelopes on its
/// stdin and stdout. Its stderr is inherited.
pub struct ProcessTransport {
    pub executable: String,
    pub args: Vec<String>,
}

impl ProcessTransport {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        ProcessTransport {
            executable: executable.into(),
            args,
        }
    }
}

struct ProcessOutgoing {
    stdin: ChildStdin,
    // Keeps the process tied to the session; killed when dropped
    _child: Child,
}

#[async_trait]
impl Outgoing for ProcessOutgoing {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let s = envelope_to_json(envelope).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.stdin
            .write_all(s.as_bytes())
            .await
            .map_err(TransportError::Send)?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(TransportError::Send)?;
        self.stdin.flush().await.map_err(TransportError::Send)?;
        Ok(())
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn open(self) -> Result<OpenChannel, TransportError> {
        let mut child = tokio::process::Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(TransportError::Open)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TransportError::Closed);
        };

        let (tx, incoming) = mpsc::channel(INBOUND_CAPACITY);
        let executable = self.executable.clone();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new());
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("error reading from {} stdout: {}", executable, e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match envelope_from_json(&line) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("dropping malformed line from {}: {}", executable, e),
                }
            }
            debug!("{} closed its stdout", executable);
        });

        Ok(OpenChannel {
            outgoing: Box::new(ProcessOutgoing {
                stdin,
                _child: child,
            }),
            incoming,
        })
    }
}

//! The session: one UI-side mirror of the backend state, wired to one
//! channel.
//!
//! [`Session::connect`] opens the channel, asks the backend for a snapshot
//! and spawns two tasks:
//!
//! - the driver, which handles inbound messages and runs queued actions one
//!   at a time. Inbound messages are handled between the polls of the
//!   running action, so a `method_return` can arrive while an action awaits
//!   it.
//! - the writer, which sends outbound envelopes in order.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use commsync_core::{
    wire::{AppCode, SyncPayload},
    CallbackId, Envelope, Message, Metadata, SessionId,
};
use futures_util::future::{BoxFuture, OptionFuture};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, info_span, warn, Instrument as _};

use crate::{
    action::{Action, MethodAction},
    error::{ApplicationError, LoadError, ProtocolError, TransportError},
    loader::{Application, ApplicationReducer, CodeProvider},
    notice::{Notice, Notifier, DEFAULT_CAPACITY, ERROR_AUTO_CLOSE},
    queue::{self, ActionQueue, Completion, Job},
    rpc::{Outbox, Reply, RpcClient},
    sourcemap::Mappings,
    store::{Store, SubscriptionId},
    transport::{Outgoing, Transport},
    translate::{ExceptionTranslator, SourceContext},
};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// The state before the first `sync` arrives.
    pub initial_state: Value,
    /// How long error notices stay up.
    pub notice_auto_close: Duration,
    /// Notices buffered per receiver before the oldest are dropped.
    pub notice_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            initial_state: Value::Null,
            notice_auto_close: ERROR_AUTO_CLOSE,
            notice_capacity: DEFAULT_CAPACITY,
        }
    }
}

type AppLoadedHook = Arc<dyn Fn(&Arc<dyn Application>) + Send + Sync>;

/// State shared by the session handle, the driver and running actions.
pub(crate) struct Shared {
    pub(crate) id: SessionId,
    pub(crate) store: Store,
    pub(crate) rpc: RpcClient,
    pub(crate) translator: ExceptionTranslator,
    pub(crate) notifier: Notifier,
    outbox: Outbox,
    provider: Arc<dyn CodeProvider>,
    app: RwLock<Option<Arc<dyn Application>>>,
    app_loaded: Mutex<Vec<AppLoadedHook>>,
}

impl Shared {
    /// Queue a message for the writer. False if the session is shutting down.
    pub(crate) fn send(&self, message: &Message, metadata: Option<Metadata>) -> bool {
        let envelope = match message.encode(metadata) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("could not encode {} message: {}", message.method(), e);
                return false;
            }
        };
        self.outbox.send(envelope).is_ok()
    }

    /// Translate an application failure, show it to the user and return the
    /// message shown.
    pub(crate) fn report(&self, error: &ApplicationError) -> String {
        let message = self.translator.translate(error);
        self.notifier.error(message.clone());
        message
    }

    fn application(&self) -> Option<Arc<dyn Application>> {
        self.app.read().clone()
    }

    fn method_action(
        &self,
        method_name: &str,
        args: Vec<Value>,
    ) -> Result<MethodAction, ProtocolError> {
        let app = self
            .application()
            .ok_or_else(|| ProtocolError::NoApplication(method_name.to_string()))?;
        let method = app
            .method(method_name)
            .ok_or_else(|| ProtocolError::UnknownMethod(method_name.to_string()))?;
        Ok(MethodAction::new(method, args))
    }

    fn load_application(&self, code: AppCode) -> Result<(), LoadError> {
        let app = self.provider.load(&code.code)?;

        let mappings = if code.sourcemap.trim().is_empty() {
            None
        } else {
            match Mappings::parse(&code.sourcemap) {
                Ok(mappings) => Some(mappings),
                Err(e) => {
                    warn!("ignoring malformed sourcemap: {}", e);
                    None
                }
            }
        };
        self.translator.set_source(SourceContext {
            mappings,
            source: code.py_code,
        });
        self.store
            .set_reducer(Some(Arc::new(ApplicationReducer(app.clone()))));
        *self.app.write() = Some(app.clone());
        info!("application code loaded");

        let hooks: Vec<AppLoadedHook> = self.app_loaded.lock().clone();
        for hook in hooks {
            hook(&app);
        }
        Ok(())
    }

    fn handle_envelope(&self, queue: &ActionQueue, envelope: Envelope) {
        if envelope.is_echo_for(&self.id) {
            debug!(method = envelope.method.as_str(), "ignoring own echo");
            return;
        }
        let r = Message::decode(&envelope)
            .map_err(ProtocolError::from)
            .and_then(|message| self.handle_message(queue, message));
        if let Err(e) = r {
            warn!("dropping inbound {} message: {}", envelope.method, e);
        }
    }

    fn handle_message(&self, queue: &ActionQueue, message: Message) -> Result<(), ProtocolError> {
        match message {
            Message::Sync(SyncPayload { state }) => {
                self.store.replace(state);
            }
            Message::Action(action) => {
                if let Err(e) = self.store.dispatch(&action) {
                    self.report(&e);
                }
            }
            Message::Patch(payload) => {
                self.store
                    .apply_patches(&payload.patches)
                    .map_err(ProtocolError::PatchRejected)?;
            }
            Message::MethodCall(call) => {
                let action = self.method_action(&call.method_name, call.args)?;
                // Nobody waits for it; failures are reported by the queue
                let _ = queue.enqueue(Box::new(action));
            }
            Message::MethodReturn(reply) => {
                self.rpc.resolve(reply)?;
            }
            Message::SetAppCode(code) => {
                if let Err(e) = self.load_application(code) {
                    error!("could not load application code: {}", e);
                    self.notifier.error(format!("Error: {}", e));
                }
            }
            Message::SyncRequest => {
                return Err(ProtocolError::Unexpected(Message::SYNC_REQUEST));
            }
        }
        Ok(())
    }
}

/// A connected UI session.
///
/// Dropping the session disposes it.
pub struct Session {
    shared: Arc<Shared>,
    queue: ActionQueue,
    closed: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Session {
    /// Open the channel and request a full snapshot. Must be called from
    /// within a tokio runtime.
    ///
    /// Only failures to open the channel or to send the initial
    /// `sync_request` are returned; everything after that is logged and
    /// recovered from.
    pub async fn connect(
        transport: impl Transport,
        provider: Arc<dyn CodeProvider>,
        options: SessionOptions,
    ) -> Result<Session, TransportError> {
        let id = SessionId::generate();
        let channel = transport.open().await?;
        let mut outgoing = channel.outgoing;

        let request = Message::SyncRequest
            .encode(None)
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        outgoing.send(&request).await?;

        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            id: id.clone(),
            store: Store::new(options.initial_state),
            rpc: RpcClient::new(outbox.clone()),
            translator: ExceptionTranslator::new(),
            notifier: Notifier::new(options.notice_capacity, options.notice_auto_close),
            outbox,
            provider,
            app: RwLock::new(None),
            app_loaded: Mutex::new(Vec::new()),
        });
        let (queue, jobs) = ActionQueue::new();
        let (closed_tx, closed) = watch::channel(false);

        let span = info_span!("session", session = %id);
        let writer = tokio::spawn(write(outgoing, outbox_rx).instrument(span.clone()));
        let driver = tokio::spawn(
            drive(
                shared.clone(),
                queue.clone(),
                channel.incoming,
                jobs,
                closed_tx,
            )
            .instrument(span),
        );
        info!(session = %id, "session connected");

        Ok(Session {
            shared,
            queue,
            closed,
            tasks: Mutex::new(vec![driver, writer]),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    pub fn get_state(&self) -> Arc<Value> {
        self.shared.store.get_state()
    }

    /// Dispatch an action into the state container directly. A failure of
    /// the application's reducer is shown to the user and returned.
    pub fn dispatch(&self, action: &Value) -> Result<(), ApplicationError> {
        self.shared.store.dispatch(action).map_err(|e| {
            self.shared.report(&e);
            e
        })
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&Arc<Value>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.store.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.store.unsubscribe(id)
    }

    /// Queue a mutating action. It runs after every previously queued one has
    /// been committed.
    pub fn enqueue(&self, action: impl Action + 'static) -> Completion {
        self.queue.enqueue(Box::new(action))
    }

    /// Queue a call of the loaded application's method `method_name`, as a
    /// UI event handler would.
    pub fn invoke(&self, method_name: &str, args: Vec<Value>) -> Result<Completion, ProtocolError> {
        let action = self.shared.method_action(method_name, args)?;
        Ok(self.queue.enqueue(Box::new(action)))
    }

    pub fn remote(&self) -> &RpcClient {
        &self.shared.rpc
    }

    /// Call a backend method outside of any action.
    pub fn remote_call(&self, method_name: &str, args: Vec<Value>) -> Reply {
        self.shared.rpc.call(method_name, args)
    }

    pub fn pending_calls(&self) -> Vec<CallbackId> {
        self.shared.rpc.pending_ids()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notifier.subscribe()
    }

    pub fn application(&self) -> Option<Arc<dyn Application>> {
        self.shared.application()
    }

    /// Register a hook called after each successful `set_app_code`, for
    /// views that need to re-render with the new application.
    pub fn on_app_loaded(&self, hook: impl Fn(&Arc<dyn Application>) + Send + Sync + 'static) {
        self.shared.app_loaded.lock().push(Arc::new(hook));
    }

    /// Wait until the backend has closed the channel (or the session was
    /// disposed).
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // Err means the driver is gone, which is closed as well
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop the session. Queued and running actions are dropped, and pending
    /// remote calls resolve to [`crate::RpcError::Abandoned`]. Calling this
    /// more than once is harmless.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let abandoned = self.shared.rpc.abandon_all();
        info!(session = %self.shared.id, abandoned, "session disposed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn write(mut outgoing: Box<dyn Outgoing>, mut outbox: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = outbox.recv().await {
        if let Err(e) = outgoing.send(&envelope).await {
            error!("could not send {} message: {}", envelope.method, e);
        }
    }
}

async fn drive(
    shared: Arc<Shared>,
    queue: ActionQueue,
    mut incoming: mpsc::Receiver<Envelope>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    closed: watch::Sender<bool>,
) {
    let mut current: Option<BoxFuture<'static, ()>> = None;
    let mut incoming_open = true;
    loop {
        tokio::select! {
            biased;

            envelope = incoming.recv(), if incoming_open => match envelope {
                Some(envelope) => shared.handle_envelope(&queue, envelope),
                None => {
                    debug!("channel closed by the backend");
                    incoming_open = false;
                    closed.send_replace(true);
                }
            },
            _ = OptionFuture::from(current.as_mut()), if current.is_some() => {
                current = None;
            }
            job = jobs.recv(), if current.is_none() => match job {
                Some(job) => current = Some(Box::pin(queue::execute(job, shared.clone()))),
                None => break,
            },
            else => break,
        }
    }
}

//! The serial action queue.
//!
//! Jobs are executed one at a time by the session driver, in submission
//! order. A job owns the session's only [`Draft`] while it runs, including
//! across its awaits, and is committed before the next job starts.

use std::sync::Arc;

use commsync_core::{wire::PatchPayload, Message, Metadata, Patch};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::{action::Action, draft::Draft, session::Shared};

pub(crate) struct Job {
    action: Box<dyn Action>,
    done: oneshot::Sender<Outcome>,
}

/// What became of one queued action.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The patches were applied to the state, and sent unless the action was
    /// local-only or the channel was gone.
    Committed { patches: Vec<Patch>, sent: bool },
    /// The action touched nothing; no patch was produced or sent.
    Unchanged,
    /// The action failed, or its patches no longer applied. Carries the
    /// message that was shown to the user.
    Failed(String),
    /// The session was disposed before the action finished.
    Dropped,
}

/// Resolves once a queued action has been executed.
pub struct Completion(oneshot::Receiver<Outcome>);

impl Completion {
    pub async fn outcome(self) -> Outcome {
        self.0.await.unwrap_or(Outcome::Dropped)
    }
}

#[derive(Clone)]
pub(crate) struct ActionQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl ActionQueue {
    pub(crate) fn new() -> (ActionQueue, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ActionQueue { sender }, receiver)
    }

    pub(crate) fn enqueue(&self, action: Box<dyn Action>) -> Completion {
        let (done, completion) = oneshot::channel();
        // On a disposed session the job is dropped, and so is `done`
        let _ = self.sender.send(Job { action, done });
        Completion(completion)
    }
}

/// Run one job to completion against the current state, and commit it.
pub(crate) async fn execute(job: Job, shared: Arc<Shared>) {
    let Job { action, done } = job;
    let local_only = action.is_local_only();
    let mut draft = Draft::new(shared.store.get_state());

    let outcome = match action.run(&mut draft, &shared.rpc).await {
        Err(e) => Outcome::Failed(shared.report(&e)),
        Ok(()) => {
            let finished = draft.finish();
            if finished.patches.is_empty() {
                Outcome::Unchanged
            } else {
                commit(&shared, finished.patches, local_only)
            }
        }
    };
    let _ = done.send(outcome);
}

fn commit(shared: &Shared, patches: Vec<Patch>, local_only: bool) -> Outcome {
    // The state may have been replaced by the backend while the action was
    // awaiting; the patches are applied to whatever is current now.
    if let Err(e) = shared.store.apply_patches(&patches) {
        error!("patches of a finished action no longer apply: {}", e);
        let message = format!("Error: {}", e);
        shared.notifier.error(message.clone());
        return Outcome::Failed(message);
    }
    if local_only {
        debug!(patches = patches.len(), "committed local-only action");
        return Outcome::Committed {
            patches,
            sent: false,
        };
    }
    let message = Message::Patch(PatchPayload {
        patches: patches.clone(),
    });
    let sent = shared.send(&message, Some(Metadata::origin(&shared.id)));
    Outcome::Committed { patches, sent }
}

//! The state container: the single copy of the synchronized state.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use commsync_core::{apply_patches, Patch, PatchError};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde_json::{json, Value};

use crate::error::ApplicationError;

/// Reserved action type that replaces the whole state with `payload`.
pub const SET_STATE: &str = "SET_STATE";

/// The `reduce(state, action) -> state` capability of an application.
pub trait Reducer: Send + Sync {
    fn reduce(&self, state: &Value, action: &Value) -> Result<Value, ApplicationError>;
}

pub fn set_state_action(payload: Value) -> Value {
    json!({ "type": SET_STATE, "payload": payload })
}

type Listener = Arc<dyn Fn(&Arc<Value>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Holds the canonical state tree and notifies subscribers on every change.
///
/// All changes go through [`Store::dispatch`]: `SET_STATE` replaces the
/// state, any other action is handed to the installed [`Reducer`], and with
/// no reducer installed the state passes through unchanged.
///
/// Changes and their notifications are serialized: subscribers see the
/// snapshots in the order they were committed, whichever thread made them.
/// A listener may itself change the state.
pub struct Store {
    state: Mutex<Arc<Value>>,
    /// Held from a change until its listeners have run.
    changes: ReentrantMutex<()>,
    reducer: RwLock<Option<Arc<dyn Reducer>>>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

impl Store {
    pub fn new(initial: Value) -> Self {
        Store {
            state: Mutex::new(Arc::new(initial)),
            changes: ReentrantMutex::new(()),
            reducer: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    pub fn get_state(&self) -> Arc<Value> {
        self.state.lock().clone()
    }

    pub fn set_reducer(&self, reducer: Option<Arc<dyn Reducer>>) {
        *self.reducer.write() = reducer;
    }

    pub fn dispatch(&self, action: &Value) -> Result<(), ApplicationError> {
        let _change = self.changes.lock();
        let next = {
            let mut state = self.state.lock();
            let next = if action.get("type").and_then(Value::as_str) == Some(SET_STATE) {
                action.get("payload").cloned().unwrap_or(Value::Null)
            } else {
                let reducer = self.reducer.read().clone();
                match reducer {
                    Some(reducer) => reducer.reduce(&state, action)?,
                    None => return Ok(()),
                }
            };
            let next = Arc::new(next);
            *state = next.clone();
            next
        };
        self.notify(&next);
        Ok(())
    }

    /// Replace the whole state (`SET_STATE`).
    pub fn replace(&self, state: Value) {
        let _change = self.changes.lock();
        let next = Arc::new(state);
        *self.state.lock() = next.clone();
        self.notify(&next);
    }

    /// Compute the new snapshot from the current state and `patches`, then
    /// replace. On failure the state is left unchanged.
    pub fn apply_patches(&self, patches: &[Patch]) -> Result<(), PatchError> {
        let _change = self.changes.lock();
        let next = {
            let mut state = self.state.lock();
            let next = Arc::new(apply_patches(&state, patches)?);
            *state = next.clone();
            next
        };
        self.notify(&next);
        Ok(())
    }

    /// Register a listener, called synchronously after every change, in
    /// registration order.
    pub fn subscribe(
        &self,
        listener: impl Fn(&Arc<Value>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    fn notify(&self, state: &Arc<Value>) {
        // Snapshot, so a listener may (un)subscribe without deadlocking
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commsync_core::path;

    struct Counter;
    impl Reducer for Counter {
        fn reduce(&self, state: &Value, action: &Value) -> Result<Value, ApplicationError> {
            match action["type"].as_str() {
                Some("increment") => {
                    Ok(json!({"count": state["count"].as_i64().unwrap_or(0) + 1}))
                }
                Some("fail") => Err(ApplicationError::new("cannot fail politely")),
                _ => Ok(state.clone()),
            }
        }
    }

    #[test]
    fn test_set_state_replaces() {
        let store = Store::new(Value::Null);
        store.dispatch(&set_state_action(json!({"a": 1}))).unwrap();
        assert_eq!(*store.get_state(), json!({"a": 1}));
    }

    #[test]
    fn test_hydration_is_idempotent() {
        let store = Store::new(Value::Null);
        let payload = json!({"docs": [{"id": 1, "text": "hello"}]});
        store.dispatch(&set_state_action(payload.clone())).unwrap();
        let first = store.get_state();
        store.dispatch(&set_state_action(payload.clone())).unwrap();
        assert_eq!(first, store.get_state());
        assert_eq!(*store.get_state(), payload);
    }

    #[test]
    fn test_without_reducer_state_passes_through() {
        let store = Store::new(json!({"count": 0}));
        store.dispatch(&json!({"type": "increment"})).unwrap();
        assert_eq!(*store.get_state(), json!({"count": 0}));
    }

    #[test]
    fn test_reducer() {
        let store = Store::new(json!({"count": 0}));
        store.set_reducer(Some(Arc::new(Counter)));
        store.dispatch(&json!({"type": "increment"})).unwrap();
        store.dispatch(&json!({"type": "increment"})).unwrap();
        assert_eq!(*store.get_state(), json!({"count": 2}));

        let err = store.dispatch(&json!({"type": "fail"})).unwrap_err();
        assert_eq!(err.message, "cannot fail politely");
        assert_eq!(*store.get_state(), json!({"count": 2}));
    }

    #[test]
    fn test_subscribers_in_registration_order() {
        let store = Store::new(Value::Null);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            store.subscribe(move |state| seen.lock().push((name, (**state).clone())));
        }
        store.replace(json!(1));
        assert_eq!(
            *seen.lock(),
            vec![("first", json!(1)), ("second", json!(1)), ("third", json!(1))]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let store = Store::new(Value::Null);
        let calls = Arc::new(AtomicU64::new(0));
        let id = {
            let calls = calls.clone();
            store.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        store.replace(json!(1));
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.replace(json!(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_patch_leaves_state_and_does_not_notify() {
        let store = Store::new(json!({"users": {}}));
        let calls = Arc::new(AtomicU64::new(0));
        {
            let calls = calls.clone();
            store.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        let r = store.apply_patches(&[Patch::replace(path!["users", "7"], json!({"n": 1}))]);
        assert!(r.is_err());
        assert_eq!(*store.get_state(), json!({"users": {}}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_changes_are_notified_in_commit_order() {
        let store = Store::new(json!(0));
        let last_seen = Arc::new(Mutex::new(Value::Null));
        {
            let last_seen = last_seen.clone();
            store.subscribe(move |state| *last_seen.lock() = (**state).clone());
        }
        std::thread::scope(|scope| {
            for thread in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..250 {
                        store.replace(json!(thread * 1000 + i));
                    }
                });
            }
        });
        assert_eq!(*last_seen.lock(), *store.get_state());
    }

    #[test]
    fn test_listener_may_change_the_state() {
        let store = Arc::new(Store::new(json!(0)));
        {
            let weak = Arc::downgrade(&store);
            store.subscribe(move |state| {
                if **state == json!(1) {
                    if let Some(store) = weak.upgrade() {
                        store.replace(json!(2));
                    }
                }
            });
        }
        store.replace(json!(1));
        assert_eq!(*store.get_state(), json!(2));
    }
}

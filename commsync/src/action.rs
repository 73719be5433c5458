//! Mutating actions, and application methods that become actions when
//! invoked.
//!
//! An [`Action`] runs inside the action queue against a [`Draft`]; its
//! changes are committed (and sent to the backend) when it returns `Ok`.
//! Actions may await remote calls through the [`RpcClient`] they are given.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{draft::Draft, error::ApplicationError, rpc::RpcClient};

#[async_trait]
pub trait Action: Send {
    async fn run(
        self: Box<Self>,
        draft: &mut Draft,
        remote: &RpcClient,
    ) -> Result<(), ApplicationError>;

    /// Local-only actions are committed to the local state but never sent
    /// to the backend.
    fn is_local_only(&self) -> bool {
        false
    }
}

/// A named, remotely or locally invocable method of an application.
#[async_trait]
pub trait Method: Send + Sync {
    async fn invoke(
        &self,
        draft: &mut Draft,
        remote: &RpcClient,
        args: Vec<Value>,
    ) -> Result<(), ApplicationError>;

    fn is_local_only(&self) -> bool {
        false
    }
}

/// A synchronous action, from a closure over the draft.
pub struct Produce<F>(F);

pub fn produce<F>(f: F) -> Produce<F>
where
    F: FnOnce(&mut Draft) -> Result<(), ApplicationError> + Send + 'static,
{
    Produce(f)
}

#[async_trait]
impl<F> Action for Produce<F>
where
    F: FnOnce(&mut Draft) -> Result<(), ApplicationError> + Send + 'static,
{
    async fn run(
        self: Box<Self>,
        draft: &mut Draft,
        _remote: &RpcClient,
    ) -> Result<(), ApplicationError> {
        (self.0)(draft)
    }
}

/// A synchronous method, from a closure over the draft and the call's
/// arguments.
pub struct ProduceMethod<F>(F);

pub fn produce_method<F>(f: F) -> ProduceMethod<F>
where
    F: Fn(&mut Draft, Vec<Value>) -> Result<(), ApplicationError> + Send + Sync + 'static,
{
    ProduceMethod(f)
}

#[async_trait]
impl<F> Method for ProduceMethod<F>
where
    F: Fn(&mut Draft, Vec<Value>) -> Result<(), ApplicationError> + Send + Sync + 'static,
{
    async fn invoke(
        &self,
        draft: &mut Draft,
        _remote: &RpcClient,
        args: Vec<Value>,
    ) -> Result<(), ApplicationError> {
        (self.0)(draft, args)
    }
}

/// Marks an [`Action`] or [`Method`] as local-only.
pub struct LocalOnly<T>(pub T);

pub fn local_only<T>(inner: T) -> LocalOnly<T> {
    LocalOnly(inner)
}

#[async_trait]
impl<A: Action + 'static> Action for LocalOnly<A> {
    async fn run(
        self: Box<Self>,
        draft: &mut Draft,
        remote: &RpcClient,
    ) -> Result<(), ApplicationError> {
        Box::new(self.0).run(draft, remote).await
    }

    fn is_local_only(&self) -> bool {
        true
    }
}

#[async_trait]
impl<M: Method> Method for LocalOnly<M> {
    async fn invoke(
        &self,
        draft: &mut Draft,
        remote: &RpcClient,
        args: Vec<Value>,
    ) -> Result<(), ApplicationError> {
        self.0.invoke(draft, remote, args).await
    }

    fn is_local_only(&self) -> bool {
        true
    }
}

/// A method whose whole body runs on the backend: invoking it sends a
/// `method_call` of the same name and waits for the reply.
pub struct RemoteMethod {
    name: String,
}

pub fn remote_method(name: impl Into<String>) -> RemoteMethod {
    RemoteMethod { name: name.into() }
}

#[async_trait]
impl Method for RemoteMethod {
    async fn invoke(
        &self,
        _draft: &mut Draft,
        remote: &RpcClient,
        args: Vec<Value>,
    ) -> Result<(), ApplicationError> {
        remote.call(&self.name, args).await?;
        Ok(())
    }
}

/// One invocation of a [`Method`], queued as an [`Action`].
pub struct MethodAction {
    method: Arc<dyn Method>,
    args: Vec<Value>,
}

impl MethodAction {
    pub fn new(method: Arc<dyn Method>, args: Vec<Value>) -> Self {
        MethodAction { method, args }
    }
}

#[async_trait]
impl Action for MethodAction {
    async fn run(
        self: Box<Self>,
        draft: &mut Draft,
        remote: &RpcClient,
    ) -> Result<(), ApplicationError> {
        let MethodAction { method, args } = *self;
        method.invoke(draft, remote, args).await
    }

    fn is_local_only(&self) -> bool {
        self.method.is_local_only()
    }
}

//! Turning backend-supplied application code into an application object.
//!
//! How code becomes an application is up to the [`CodeProvider`]. The
//! shipped [`Registry`] treats the code as the name of an application that
//! was compiled in and registered ahead of time.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;

use crate::{
    action::Method,
    error::{ApplicationError, LoadError},
    store::Reducer,
};

/// The loaded application: a reducer, plus methods the backend (or the UI)
/// may invoke by name.
pub trait Application: Send + Sync {
    fn reduce(&self, state: &Value, action: &Value) -> Result<Value, ApplicationError>;

    fn method(&self, name: &str) -> Option<Arc<dyn Method>>;
}

pub trait CodeProvider: Send + Sync {
    fn load(&self, code: &str) -> Result<Arc<dyn Application>, LoadError>;
}

/// Installs a loaded application as the store's reducer.
pub(crate) struct ApplicationReducer(pub Arc<dyn Application>);

impl Reducer for ApplicationReducer {
    fn reduce(&self, state: &Value, action: &Value) -> Result<Value, ApplicationError> {
        self.0.reduce(state, action)
    }
}

type Factory = Arc<dyn Fn(&str) -> Result<Arc<dyn Application>, LoadError> + Send + Sync>;

/// A [`CodeProvider`] over compiled-in applications.
///
/// The first non-blank line of the code names the application; the factory
/// receives the whole code, so anything after that line is configuration for
/// the factory to interpret.
#[derive(Default, Clone)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&str) -> Result<Arc<dyn Application>, LoadError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl CodeProvider for Registry {
    fn load(&self, code: &str) -> Result<Arc<dyn Application>, LoadError> {
        let name = code
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| LoadError::Rejected("empty application code".to_string()))?;
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| LoadError::UnknownApplication(name.to_string()))?;
        factory(code)
    }
}

type ReduceFn = dyn Fn(&Value, &Value) -> Result<Value, ApplicationError> + Send + Sync;

/// Assembles an [`Application`] from a reducer closure and named methods.
#[derive(Default)]
pub struct AppBuilder {
    reducer: Option<Box<ReduceFn>>,
    methods: HashMap<String, Arc<dyn Method>>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reducer(
        mut self,
        reduce: impl Fn(&Value, &Value) -> Result<Value, ApplicationError> + Send + Sync + 'static,
    ) -> Self {
        self.reducer = Some(Box::new(reduce));
        self
    }

    pub fn method(mut self, name: impl Into<String>, method: impl Method + 'static) -> Self {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn build(self) -> Arc<dyn Application> {
        Arc::new(BuiltApplication {
            reducer: self.reducer,
            methods: self.methods,
        })
    }
}

struct BuiltApplication {
    reducer: Option<Box<ReduceFn>>,
    methods: HashMap<String, Arc<dyn Method>>,
}

impl Application for BuiltApplication {
    fn reduce(&self, state: &Value, action: &Value) -> Result<Value, ApplicationError> {
        match &self.reducer {
            Some(reduce) => reduce(state, action),
            None => Ok(state.clone()),
        }
    }

    fn method(&self, name: &str) -> Option<Arc<dyn Method>> {
        self.methods.get(name).cloned()
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage function identity, policy, and the process-wide registry.
//!
//! A wrapped function is registered once under a `(module, name)` pair;
//! restored trees refer to it by [`FuncRef`] and resolve the handler back
//! through the registry, in-process or from a subprocess runner running
//! the same binary.

use crate::error::ErrorInfo;
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

/// Boxed future returned by stage handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Async stage body: canonical arguments in, canonical result out.
pub type Handler = Arc<dyn Fn(ArgBag) -> BoxFuture<Result<Value, ErrorInfo>> + Send + Sync>;

type DisplayFn = Arc<dyn Fn(&ArgBag) -> String + Send + Sync>;
type MapFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Serializable reference to a registered function.
///
/// Equality is on `(module, name)` only; `path` is a hint recorded so
/// subprocess runners can locate the defining executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncRef {
    pub module: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl FuncRef {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self { module: module.into(), name: name.into(), path: None }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    /// Look the handler up in the process registry.
    pub fn resolve(&self) -> Option<Arc<StageFn>> {
        resolve(self)
    }
}

impl PartialEq for FuncRef {
    fn eq(&self, other: &Self) -> bool {
        self.module == other.module && self.name == other.name
    }
}

impl Eq for FuncRef {}

impl fmt::Display for FuncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

/// Re-run policy for a completed, matching stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Rerun {
    /// Re-run on every invocation.
    Always,
    /// Never re-run once done.
    #[default]
    Never,
    /// Re-run only if the stage has child stages (cheap-parent heuristic).
    Auto,
}

impl std::str::FromStr for Rerun {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(Rerun::Always),
            "never" => Ok(Rerun::Never),
            "auto" => Ok(Rerun::Auto),
            other => Err(format!("invalid rerun strategy `{other}`")),
        }
    }
}

/// Per-parameter canonicalization override.
#[derive(Clone)]
pub enum ParamRule {
    /// Parameter is excluded from comparison and persistence entirely.
    Exclude,
    /// Apply a user transform before comparison.
    Map(MapFn),
}

impl fmt::Debug for ParamRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamRule::Exclude => write!(f, "Exclude"),
            ParamRule::Map(_) => write!(f, "Map(..)"),
        }
    }
}

/// Positional and named arguments of one stage call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgBag {
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
}

impl ArgBag {
    pub fn new(args: Vec<Value>, kwargs: IndexMap<String, Value>) -> Self {
        Self { args, kwargs }
    }

    pub fn positional(args: Vec<Value>) -> Self {
        Self { args, kwargs: IndexMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Named lookup: keyword first, then positional by declared name.
    pub fn get<'a>(&'a self, params: &[String], key: &str) -> Option<&'a Value> {
        if let Some(v) = self.kwargs.get(key) {
            return Some(v);
        }
        let index = params.iter().position(|p| p == key)?;
        self.args.get(index)
    }

    /// Merge positional arguments under their declared names.
    pub fn merged(&self, params: &[String]) -> IndexMap<String, Value> {
        let mut map = self.kwargs.clone();
        for (i, v) in self.args.iter().enumerate() {
            if let Some(name) = params.get(i) {
                map.insert(name.clone(), v.clone());
            }
        }
        map
    }
}

/// A registered stage function: identity, policy, and async handler.
pub struct StageFn {
    module: String,
    name: String,
    rerun: Option<Rerun>,
    params: Vec<String>,
    argmap: HashMap<String, ParamRule>,
    display: Option<DisplayFn>,
    handler: Handler,
}

impl StageFn {
    pub fn builder(module: impl Into<String>, name: impl Into<String>) -> StageFnBuilder {
        StageFnBuilder {
            module: module.into(),
            name: name.into(),
            rerun: None,
            params: Vec::new(),
            argmap: HashMap::new(),
            display: None,
        }
    }

    pub fn func_ref(&self) -> FuncRef {
        let mut r = FuncRef::new(self.module.clone(), self.name.clone());
        if let Some(dir) = exe_dir() {
            r = r.with_path(dir);
        }
        r
    }

    /// Declared rerun policy, or `default` when unset.
    pub fn rerun(&self, default: Rerun) -> Rerun {
        self.rerun.unwrap_or(default)
    }

    pub fn rule(&self, param: &str) -> Option<&ParamRule> {
        self.argmap.get(param)
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn param_name(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn display_name(&self, bag: &ArgBag) -> Option<String> {
        self.display.as_ref().map(|f| f(bag))
    }

    pub fn invoke(&self, bag: ArgBag) -> BoxFuture<Result<Value, ErrorInfo>> {
        (self.handler)(bag)
    }
}

impl fmt::Debug for StageFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageFn({}:{})", self.module, self.name)
    }
}

/// Builder for [`StageFn`] registration.
pub struct StageFnBuilder {
    module: String,
    name: String,
    rerun: Option<Rerun>,
    params: Vec<String>,
    argmap: HashMap<String, ParamRule>,
    display: Option<DisplayFn>,
}

impl StageFnBuilder {
    pub fn rerun(mut self, rerun: Rerun) -> Self {
        self.rerun = Some(rerun);
        self
    }

    /// Declared positional parameter names, in order.
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Exclude a parameter from comparison and persistence.
    pub fn exclude(mut self, param: impl Into<String>) -> Self {
        self.argmap.insert(param.into(), ParamRule::Exclude);
        self
    }

    /// Transform a parameter before comparison.
    pub fn map_param(
        mut self,
        param: impl Into<String>,
        f: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.argmap.insert(param.into(), ParamRule::Map(Arc::new(f)));
        self
    }

    /// Display-name formatter for `stagekit log`.
    pub fn display(mut self, f: impl Fn(&ArgBag) -> String + Send + Sync + 'static) -> Self {
        self.display = Some(Arc::new(f));
        self
    }

    /// Attach the handler and register under `(module, name)`.
    ///
    /// Re-registering the same pair replaces the previous entry, so
    /// startup registration is idempotent across restarts and tests.
    pub fn register<F, Fut>(self, handler: F) -> Arc<StageFn>
    where
        F: Fn(ArgBag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ErrorInfo>> + Send + 'static,
    {
        let func = Arc::new(StageFn {
            module: self.module,
            name: self.name,
            rerun: self.rerun,
            params: self.params,
            argmap: self.argmap,
            display: self.display,
            handler: Arc::new(move |bag| Box::pin(handler(bag))),
        });
        registry()
            .write()
            .insert((func.module.clone(), func.name.clone()), func.clone());
        func
    }
}

type Registry = RwLock<HashMap<(String, String), Arc<StageFn>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolve a function reference against the registry.
pub fn resolve(r: &FuncRef) -> Option<Arc<StageFn>> {
    registry().read().get(&(r.module.clone(), r.name.clone())).cloned()
}

/// Module names that currently have at least one registration.
pub fn registered_modules() -> Vec<String> {
    let mut modules: Vec<String> =
        registry().read().keys().map(|(module, _)| module.clone()).collect();
    modules.sort();
    modules.dedup();
    modules
}

fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe().ok().and_then(|p| p.parent().map(PathBuf::from))
}

#[cfg(test)]
#[path = "func_tests.rs"]
mod tests;

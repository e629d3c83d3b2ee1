// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage node: one wrapped-function invocation in the call tree.
//!
//! A stage is either *live* (holds a resolvable handler and real
//! arguments) or *flat* (restored from disk; comparable but not
//! executable until a matching live call renews it). The tree holds
//! down-edges as `Arc` handles and parent back-references as `Weak`;
//! persistence writes down-edges only and reconstructs parents on load.

use crate::error::ErrorInfo;
use crate::func::{ArgBag, FuncRef, ParamRule, Rerun, StageFn};
use crate::payload::{PayloadError, PayloadStore};
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Shared handle to a stage node.
pub type StageHandle = Arc<Mutex<StageNode>>;

/// Executable handler or restored reference.
#[derive(Debug, Clone)]
pub enum StageFuncSlot {
    Live(Arc<StageFn>),
    Flat(FuncRef),
}

impl StageFuncSlot {
    pub fn as_live(&self) -> Option<&Arc<StageFn>> {
        match self {
            StageFuncSlot::Live(f) => Some(f),
            StageFuncSlot::Flat(_) => None,
        }
    }

    /// Resolve to a live handler, consulting the registry for flat slots.
    pub fn resolve(&self) -> Option<Arc<StageFn>> {
        match self {
            StageFuncSlot::Live(f) => Some(f.clone()),
            StageFuncSlot::Flat(r) => r.resolve(),
        }
    }
}

/// One wrapped-function invocation node.
#[derive(Debug)]
pub struct StageNode {
    pub func: StageFuncSlot,
    pub bag: ArgBag,
    /// Working-directory fragment contributed by this stage, relative to
    /// its parent.
    pub cwd: Option<String>,
    /// Child stages seen across all executions of this stage.
    pub history: Vec<StageHandle>,
    /// Per-stage context values set from within the body.
    pub data: BTreeMap<String, Value>,
    pub result: Option<Value>,
    pub done: bool,
    pub error: Option<ErrorInfo>,
    /// Incremented on each (re-)execution.
    pub version: u64,
    /// Parent's `version` when this child was last observed.
    pub parent_version: u64,
    /// Policy copied from the wrapped function at call time.
    pub rerun: Rerun,
    pub flat: bool,
    pub parent: Option<Weak<Mutex<StageNode>>>,
}

impl StageNode {
    /// Create a live stage for a new call.
    pub fn new_live(
        func: Arc<StageFn>,
        bag: ArgBag,
        cwd: Option<String>,
        parent_version: u64,
        rerun: Rerun,
    ) -> StageHandle {
        Arc::new(Mutex::new(StageNode {
            func: StageFuncSlot::Live(func),
            bag,
            cwd,
            history: Vec::new(),
            data: BTreeMap::new(),
            result: None,
            done: false,
            error: None,
            version: 0,
            parent_version,
            rerun,
            flat: false,
            parent: None,
        }))
    }

    /// Function reference used for comparison and persistence.
    pub fn flat_func(&self) -> FuncRef {
        match &self.func {
            StageFuncSlot::Live(f) => f.func_ref(),
            StageFuncSlot::Flat(r) => r.clone(),
        }
    }

    /// Canonicalize one argument for comparison or persistence.
    ///
    /// Flat stages return their stored surrogate unchanged. Live stages
    /// route through the function's argmap: excluded parameters become
    /// `Null`, mapped parameters apply the user transform.
    pub fn flat_arg(&self, name: Option<&str>, value: &Value) -> Value {
        if self.flat {
            return value.clone();
        }
        if let (Some(name), StageFuncSlot::Live(func)) = (name, &self.func) {
            match func.rule(name) {
                Some(ParamRule::Exclude) => return Value::Null,
                Some(ParamRule::Map(f)) => return f(value),
                None => {}
            }
        }
        value.clone()
    }

    /// Children belonging to the current execution version.
    pub fn current_children(&self) -> Vec<StageHandle> {
        let version = self.version;
        self.history
            .iter()
            .filter(|child| child.lock().parent_version == version)
            .cloned()
            .collect()
    }

    /// Drop history entries from older parent versions.
    pub fn prune_history(&mut self) {
        let version = self.version;
        self.history.retain(|child| child.lock().parent_version == version);
    }

    /// Human-readable name for the log tree.
    pub fn display_name(&self) -> String {
        match self.func.resolve() {
            Some(func) => func.display_name(&self.bag).unwrap_or_else(|| {
                func.func_ref().to_string()
            }),
            None => self.flat_func().to_string(),
        }
    }

    /// Update this saved stage in place when a matching live call
    /// arrives. Returns true when the calls match (whether or not a
    /// re-run was armed); a flat incoming call never renews.
    pub fn renew(&mut self, other: &StageNode) -> bool {
        if other.flat {
            return false;
        }
        if !stage_eq(self, other) {
            return false;
        }
        let rearm = !self.done
            || other.rerun == Rerun::Always
            || (other.rerun == Rerun::Auto && !self.history.is_empty());
        if rearm {
            self.func = other.func.clone();
            self.bag = other.bag.clone();
            self.rerun = other.rerun;
            self.done = false;
            self.flat = false;
        }
        true
    }

    /// Flatten this stage (and its subtree) into a persistable record,
    /// interning blob payloads through the store.
    pub fn to_record(&self, store: &mut PayloadStore) -> Result<StageRecord, PayloadError> {
        let params: Vec<String> = match &self.func {
            StageFuncSlot::Live(f) => f.params().to_vec(),
            StageFuncSlot::Flat(_) => Vec::new(),
        };
        let mut args = Vec::with_capacity(self.bag.args.len());
        for (i, v) in self.bag.args.iter().enumerate() {
            let name = params.get(i).map(String::as_str);
            args.push(self.flat_arg(name, v).flattened(store)?);
        }
        let mut kwargs = IndexMap::with_capacity(self.bag.kwargs.len());
        for (k, v) in &self.bag.kwargs {
            kwargs.insert(k.clone(), self.flat_arg(Some(k), v).flattened(store)?);
        }
        let mut data = BTreeMap::new();
        for (k, v) in &self.data {
            data.insert(k.clone(), v.flattened(store)?);
        }
        let mut history = Vec::with_capacity(self.history.len());
        for child in &self.history {
            history.push(child.lock().to_record(store)?);
        }
        Ok(StageRecord {
            func: self.flat_func(),
            args,
            kwargs,
            cwd: self.cwd.clone(),
            history,
            data,
            result: match &self.result {
                Some(v) => Some(v.flattened(store)?),
                None => None,
            },
            done: self.done,
            error: self.error.clone(),
            version: self.version,
            parent_version: self.parent_version,
            rerun: self.rerun,
        })
    }
}

/// Canonical stage equality: function references, `cwd` fragments, and
/// canonicalized arguments all match. Parameter names for positional
/// lookup come from the live side; two flat stages compare their stored
/// surrogates directly.
pub fn stage_eq(a: &StageNode, b: &StageNode) -> bool {
    if a.flat_func() != b.flat_func() || a.cwd != b.cwd {
        return false;
    }
    if a.flat && b.flat {
        return a.bag == b.bag;
    }
    if a.bag.args.len() != b.bag.args.len() || a.bag.kwargs.len() != b.bag.kwargs.len() {
        return false;
    }

    let live = if a.flat { b } else { a };
    let params: Vec<String> = match &live.func {
        StageFuncSlot::Live(f) => f.params().to_vec(),
        StageFuncSlot::Flat(_) => Vec::new(),
    };

    for (i, (va, vb)) in a.bag.args.iter().zip(b.bag.args.iter()).enumerate() {
        let name = params.get(i).map(String::as_str);
        if a.flat_arg(name, va) != b.flat_arg(name, vb) {
            return false;
        }
    }
    for (k, va) in &a.bag.kwargs {
        let Some(vb) = b.bag.kwargs.get(k) else {
            return false;
        };
        if a.flat_arg(Some(k), va) != b.flat_arg(Some(k), vb) {
            return false;
        }
    }
    true
}

/// Lock-managed renew across two handles.
pub fn renew(existing: &StageHandle, incoming: &StageHandle) -> bool {
    let incoming = incoming.lock();
    existing.lock().renew(&incoming)
}

/// Persistable form of a stage subtree: down-edges only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub func: FuncRef,
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub history: Vec<StageRecord>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub version: u64,
    pub parent_version: u64,
    #[serde(default)]
    pub rerun: Rerun,
}

impl StageRecord {
    /// Same canonical call identity (function, cwd, arguments)?
    pub fn same_call(&self, other: &StageRecord) -> bool {
        self.func == other.func
            && self.cwd == other.cwd
            && self.args == other.args
            && self.kwargs == other.kwargs
    }

    /// Rebuild a flat stage subtree, reconstructing parent pointers.
    pub fn revive(self, parent: Option<&StageHandle>) -> StageHandle {
        let StageRecord {
            func,
            args,
            kwargs,
            cwd,
            history,
            data,
            result,
            done,
            error,
            version,
            parent_version,
            rerun,
        } = self;
        let handle = Arc::new(Mutex::new(StageNode {
            func: StageFuncSlot::Flat(func),
            bag: ArgBag::new(args, kwargs),
            cwd,
            history: Vec::new(),
            data,
            result,
            done,
            error,
            version,
            parent_version,
            rerun,
            flat: true,
            parent: parent.map(Arc::downgrade),
        }));
        let children: Vec<StageHandle> =
            history.into_iter().map(|record| record.revive(Some(&handle))).collect();
        handle.lock().history = children;
        handle
    }
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;

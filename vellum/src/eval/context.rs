use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::eval::loops::LoopState;
use crate::value::{Enumerator, Object, ObjectRepr, Value};

pub(crate) type Locals = BTreeMap<String, Value>;

/// A captured scope shared between macros declared on the same level.
///
/// Writes into a frame that declared macros are duplicated into the
/// closure so that macros observe later assignments, emulating how
/// scoping works in classic Jinja.
#[derive(Debug, Default)]
pub(crate) struct Closure {
    values: Mutex<Locals>,
}

impl Closure {
    pub fn store(&self, key: &str, value: Value) {
        self.values.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn store_if_missing<F: FnOnce() -> Value>(&self, key: &str, f: F) {
        let mut values = self.values.lock().unwrap();
        if !values.contains_key(key) {
            values.insert(key.to_string(), f());
        }
    }
}

impl Object for Closure {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.values.lock().unwrap().get(name).cloned()
    }

    fn enumerate(&self) -> Enumerator {
        Enumerator::Values(
            self.values
                .lock()
                .unwrap()
                .keys()
                .map(|x| Value::from(x.as_str()))
                .collect(),
        )
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A value that resolves lookups against an ordered list of sources.
#[derive(Debug)]
pub(crate) struct MergeObject {
    sources: Vec<Value>,
}

impl MergeObject {
    pub fn new(sources: Vec<Value>) -> MergeObject {
        MergeObject { sources }
    }
}

impl Object for MergeObject {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.sources.iter().find_map(|x| x.get_attr_fast(name))
    }

    fn enumerate(&self) -> Enumerator {
        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if let Ok(iter) = source.try_iter() {
                seen.extend(iter);
            }
        }
        Enumerator::Values(seen.into_iter().collect())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub(crate) struct Frame {
    pub locals: Locals,
    pub ctx: Value,
    pub current_loop: Option<LoopState>,
    /// Lookups do not continue past a barrier frame; template blocks
    /// that are not `scoped` isolate themselves this way.
    pub barrier: bool,
    pub closure: Option<Arc<Closure>>,
}

impl Default for Frame {
    fn default() -> Frame {
        Frame::new(Value::UNDEFINED)
    }
}

impl Frame {
    pub fn new(ctx: Value) -> Frame {
        Frame {
            locals: Locals::new(),
            ctx,
            current_loop: None,
            barrier: false,
            closure: None,
        }
    }

    pub fn new_barrier(ctx: Value) -> Frame {
        Frame {
            barrier: true,
            ..Frame::new(ctx)
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        m.entry(&"locals", &self.locals);
        if !self.ctx.is_undefined() {
            m.entry(&"ctx", &self.ctx);
        }
        m.finish()
    }
}

/// The layered variable scope of a single render.
pub(crate) struct Context {
    stack: Vec<Frame>,
    outer_stack_depth: usize,
    recursion_limit: usize,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stack.iter()).finish()
    }
}

impl Context {
    pub fn new(recursion_limit: usize) -> Context {
        Context {
            stack: Vec::with_capacity(8),
            outer_stack_depth: 0,
            recursion_limit,
        }
    }

    pub fn new_with_frame(frame: Frame, recursion_limit: usize) -> Context {
        let mut rv = Context::new(recursion_limit);
        rv.stack.push(frame);
        rv
    }

    /// Stores a variable in the innermost frame.
    pub fn store(&mut self, key: &str, value: Value) {
        let top = self.stack.last_mut().unwrap();
        if let Some(ref closure) = top.closure {
            closure.store(key, value.clone());
        }
        top.locals.insert(key.to_string(), value);
    }

    /// Ensures the innermost frame carries a closure and returns it.
    pub fn ensure_closure(&mut self) -> Arc<Closure> {
        let top = self.stack.last_mut().unwrap();
        if top.closure.is_none() {
            top.closure = Some(Arc::new(Closure::default()));
        }
        top.closure.as_ref().unwrap().clone()
    }

    /// Captures the current value of a name into the frame closure.
    pub fn enclose(&mut self, env: &Environment, key: &str) {
        let value = self.load(env, key).unwrap_or(Value::UNDEFINED);
        self.stack
            .last_mut()
            .unwrap()
            .closure
            .as_ref()
            .unwrap()
            .store_if_missing(key, || value);
    }

    /// Looks up a variable.
    pub fn load(&self, env: &Environment, key: &str) -> Option<Value> {
        for frame in self.stack.iter().rev() {
            if let Some(value) = frame.locals.get(key) {
                return Some(value.clone());
            }

            if let Some(ref l) = frame.current_loop {
                if key == "loop" {
                    return Some(Value::from_dyn_object(l.object.clone()));
                }
            }

            if let Some(rv) = frame.ctx.get_attr_fast(key) {
                return Some(rv);
            }

            if frame.barrier {
                break;
            }
        }

        env.get_global(key)
    }

    /// The base context value of the bottom frame.
    pub fn clone_base(&self) -> Value {
        self.stack
            .first()
            .map(|x| x.ctx.clone())
            .unwrap_or_default()
    }

    /// Snapshots the module-level scope (the bottom frame).
    ///
    /// Blocks that are not `scoped` see this instead of the enclosing
    /// frames so that loop variables stay invisible to them.
    pub fn base_snapshot(&self) -> Value {
        match self.stack.first() {
            None => Value::UNDEFINED,
            Some(frame) => {
                let mut sources = Vec::new();
                if !frame.locals.is_empty() {
                    sources.push(Value::from_map(
                        frame
                            .locals
                            .iter()
                            .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                            .collect(),
                    ));
                }
                if !frame.ctx.is_undefined() {
                    sources.push(frame.ctx.clone());
                }
                match sources.len() {
                    0 => Value::UNDEFINED,
                    1 => sources.into_iter().next().unwrap(),
                    _ => Value::from_object(MergeObject::new(sources)),
                }
            }
        }
    }

    /// Snapshots everything visible right now into a single value.
    ///
    /// Used by includes and imports that pass the context along.
    pub fn snapshot_value(&self) -> Value {
        let mut sources = Vec::new();
        for frame in self.stack.iter().rev() {
            if !frame.locals.is_empty() {
                sources.push(Value::from_map(
                    frame
                        .locals
                        .iter()
                        .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                        .collect(),
                ));
            }
            if !frame.ctx.is_undefined() {
                sources.push(frame.ctx.clone());
            }
            if frame.barrier {
                break;
            }
        }
        match sources.len() {
            0 => Value::UNDEFINED,
            1 => sources.into_iter().next().unwrap(),
            _ => Value::from_object(MergeObject::new(sources)),
        }
    }

    /// Pushes a new frame.
    pub fn push_frame(&mut self, frame: Frame) -> Result<(), Error> {
        self.check_depth()?;
        self.stack.push(frame);
        Ok(())
    }

    /// Pops the topmost frame.
    #[track_caller]
    pub fn pop_frame(&mut self) -> Frame {
        self.stack.pop().unwrap()
    }

    /// The locals of the bottom frame (the template exports).
    #[track_caller]
    pub fn exports(&self) -> &Locals {
        &self.stack.first().unwrap().locals
    }

    /// Returns the innermost loop state.
    pub fn current_loop(&mut self) -> Option<&mut LoopState> {
        self.stack
            .iter_mut()
            .rev()
            .find_map(|x| x.current_loop.as_mut())
    }

    /// The real depth of the context.
    pub fn depth(&self) -> usize {
        self.outer_stack_depth + self.stack.len()
    }

    /// Increases the stack depth by an external cost.
    pub fn incr_depth(&mut self, delta: usize) -> Result<(), Error> {
        self.outer_stack_depth += delta;
        self.check_depth()
    }

    fn check_depth(&self) -> Result<(), Error> {
        if self.depth() > self.recursion_limit {
            return Err(Error::from(ErrorKind::RecursionLimit));
        }
        Ok(())
    }
}

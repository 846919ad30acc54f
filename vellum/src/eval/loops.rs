use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::ast;
use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::value::{Enumerator, Object, ObjectRepr, Value, ValueIter};

/// Everything needed to re-enter the body of a recursive loop.
pub(crate) struct RecurseInfo {
    pub target: ast::Expr,
    pub body: Arc<Vec<ast::Stmt>>,
    pub filter_expr: Option<ast::Expr>,
}

impl fmt::Debug for RecurseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurseInfo").finish()
    }
}

/// Per-frame loop bookkeeping.
pub(crate) struct LoopState {
    pub object: Arc<LoopObject>,
}

impl LoopState {
    pub fn new(
        iter: ValueIter,
        depth: usize,
        recurse: Option<Arc<RecurseInfo>>,
    ) -> LoopState {
        LoopState {
            object: Arc::new(LoopObject {
                idx: AtomicUsize::new(!0),
                depth,
                last_changed_value: Mutex::new(None),
                state: Mutex::new(LoopIterState {
                    iter,
                    lookahead: VecDeque::new(),
                    prev: None,
                    current: None,
                    pulled: 0,
                    known_length: None,
                }),
                recurse,
            }),
        }
    }

    /// Pulls the next item and advances the loop bookkeeping.
    pub fn advance(&self) -> Option<Value> {
        self.object.advance()
    }

    /// Whether the loop never produced an item.
    pub fn did_not_iterate(&self) -> bool {
        self.object.idx.load(Ordering::Relaxed) == !0
    }
}

struct LoopIterState {
    iter: ValueIter,
    lookahead: VecDeque<Value>,
    prev: Option<Value>,
    current: Option<Value>,
    /// Items handed out to the loop driver so far.
    pulled: usize,
    known_length: Option<usize>,
}

impl LoopIterState {
    fn pull(&mut self) -> Option<Value> {
        self.lookahead.pop_front().or_else(|| self.iter.next())
    }

    /// Reads one item ahead without consuming it.
    fn peek(&mut self) -> Option<Value> {
        if self.lookahead.is_empty() {
            let item = self.iter.next()?;
            self.lookahead.push_back(item);
        }
        self.lookahead.front().cloned()
    }

    /// Fully materializes the rest of the iterator.
    fn length(&mut self) -> usize {
        if let Some(length) = self.known_length {
            return length;
        }
        while let Some(item) = self.iter.next() {
            self.lookahead.push_back(item);
        }
        let length = self.pulled + self.lookahead.len();
        self.known_length = Some(length);
        length
    }
}

/// The `loop` object available inside for loops.
pub(crate) struct LoopObject {
    idx: AtomicUsize,
    depth: usize,
    last_changed_value: Mutex<Option<Vec<Value>>>,
    state: Mutex<LoopIterState>,
    pub(crate) recurse: Option<Arc<RecurseInfo>>,
}

impl LoopObject {
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    fn advance(&self) -> Option<Value> {
        let mut state = self.state.lock().unwrap();
        let item = state.pull()?;
        state.pulled += 1;
        state.prev = state.current.take();
        state.current = Some(item.clone());
        self.idx.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    fn index0(&self) -> u64 {
        self.idx.load(Ordering::Relaxed) as u64
    }
}

impl fmt::Debug for LoopObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loop")
            .field("index", &(self.index0() + 1))
            .field("depth", &self.depth)
            .finish()
    }
}

impl fmt::Display for LoopObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<loop {}>", self.index0())
    }
}

impl Object for LoopObject {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        let idx = self.index0();
        match name {
            "index0" => Some(Value::from(idx)),
            "index" => Some(Value::from(idx + 1)),
            "first" => Some(Value::from(idx == 0)),
            "depth" => Some(Value::from(self.depth as u64 + 1)),
            "depth0" => Some(Value::from(self.depth as u64)),
            "previtem" => {
                let state = self.state.lock().unwrap();
                Some(state.prev.clone().unwrap_or(Value::UNDEFINED))
            }
            // the remaining attributes are triggers: they read ahead
            // of the current iteration or materialize the iterator
            "nextitem" => {
                let mut state = self.state.lock().unwrap();
                Some(state.peek().unwrap_or(Value::UNDEFINED))
            }
            "last" => {
                let mut state = self.state.lock().unwrap();
                Some(Value::from(state.peek().is_none()))
            }
            "length" => {
                let mut state = self.state.lock().unwrap();
                Some(Value::from(state.length() as u64))
            }
            "revindex" => {
                let mut state = self.state.lock().unwrap();
                let length = state.length() as u64;
                Some(Value::from(length.saturating_sub(idx)))
            }
            "revindex0" => {
                let mut state = self.state.lock().unwrap();
                let length = state.length() as u64;
                Some(Value::from(length.saturating_sub(idx).saturating_sub(1)))
            }
            _ => None,
        }
    }

    fn enumerate(&self) -> Enumerator {
        Enumerator::NonEnumerable
    }

    fn call(&self, _state: &State, _args: &[Value]) -> Result<Value, Error> {
        // recursive invocations are routed through the evaluator; if a
        // loop object escapes into a plain call it was not recursive
        Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot recurse outside of a recursive loop",
        ))
    }

    fn call_method(&self, _state: &State, name: &str, args: &[Value]) -> Result<Value, Error> {
        if name == "changed" {
            let mut last_changed_value = self.last_changed_value.lock().unwrap();
            let value = args.to_owned();
            let changed = last_changed_value.as_ref() != Some(&value);
            if changed {
                *last_changed_value = Some(value);
                Ok(Value::from(true))
            } else {
                Ok(Value::from(false))
            }
        } else if name == "cycle" {
            let idx = self.index0() as usize;
            if args.is_empty() {
                return Err(Error::new(
                    ErrorKind::InvalidArguments,
                    "cycle requires at least one argument",
                ));
            }
            Ok(args[idx % args.len()].clone())
        } else {
            Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("loop object has no method named {name}"),
            ))
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

use std::fmt;
use std::sync::Arc;

use crate::ast;
use crate::error::{Error, ErrorKind};
use crate::eval::State;
use crate::value::{Object, ObjectRepr, Value};

/// One layer of a block in the inheritance chain.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct BlockLayer {
    pub body: Arc<Vec<ast::Stmt>>,
    pub scoped: bool,
    pub required: bool,
}

impl fmt::Debug for BlockLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockLayer")
            .field("scoped", &self.scoped)
            .field("required", &self.required)
            .finish()
    }
}

/// The layers of one block name, innermost (deepest child) first.
#[derive(Debug, Default, Clone)]
pub(crate) struct BlockStack {
    layers: Vec<BlockLayer>,
}

impl BlockStack {
    pub fn new(layer: BlockLayer) -> BlockStack {
        BlockStack {
            layers: vec![layer],
        }
    }

    /// Appends a layer from a template further up the chain.
    pub fn push_outer(&mut self, layer: BlockLayer) {
        self.layers.push(layer);
    }

    pub fn get(&self, offset: usize) -> Option<&BlockLayer> {
        self.layers.get(offset)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }
}

/// A callable reference to a specific layer of a block.
///
/// `super()` produces one of these bound one layer further out; its
/// `super` attribute walks even further.
#[derive(Debug)]
pub(crate) struct BlockRef {
    pub name: String,
    pub offset: usize,
}

impl Object for BlockRef {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        if name == "super" {
            Some(Value::from_object(BlockRef {
                name: self.name.clone(),
                offset: self.offset + 1,
            }))
        } else {
            None
        }
    }

    fn call(&self, _state: &State, _args: &[Value]) -> Result<Value, Error> {
        // block references are rendered by the evaluator which has
        // mutable access to the render state; a reference that leaks
        // into a plain call site cannot be rendered
        Err(Error::new(
            ErrorKind::InvalidOperation,
            "block reference cannot be called here",
        ))
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<block '{}'>", self.name)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// The `self` namespace giving access to the blocks of the template.
#[derive(Debug)]
pub(crate) struct SelfRef;

impl Object for SelfRef {
    fn repr(&self) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        Some(Value::from_object(BlockRef {
            name: name.to_string(),
            offset: 0,
        }))
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<template self>")
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

//! Core graph types shared across IRs.

use std::fmt;

pub type NodeId = usize;

/// Concrete dimensions of a tensor, outermost first.
pub type Shape = Vec<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F64,
    I8,
    I32,
    I64,
    U8,
    Boolean,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I8 => "i8",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "u8",
            ElementType::Boolean => "bool",
        };
        f.write_str(name)
    }
}

pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node<Op> {
    pub id: NodeId,
    pub op: Op,
    pub inputs: Vec<NodeId>,
    pub element_type: ElementType,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Graph<Op> {
    pub nodes: Vec<Node<Op>>,
}

impl<Op> Graph<Op> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn node(&self, id: NodeId) -> &Node<Op> {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a node whose type and shape have already been worked out.
    pub fn push_node(
        &mut self,
        op: Op,
        inputs: Vec<NodeId>,
        element_type: ElementType,
        shape: Shape,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            op,
            inputs,
            element_type,
            shape,
        });
        id
    }
}

impl<Op> Default for Graph<Op> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

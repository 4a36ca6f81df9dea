//! Source-side dataflow graph, as handed over by the host.
//!
//! Nodes carry an op type string, named attributes and a declared output
//! arity. Edges are either data edges, which connect a producer output slot
//! to a consumer input slot, or control edges, which carry no data.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{Error, Result};
use crate::ir::graph::{ElementType, Shape};
use crate::ir::tensor::TensorValue;

pub type NodeIndex = usize;
pub type EdgeIndex = usize;

pub const ARG_OP: &str = "_Arg";
pub const RETVAL_OP: &str = "_Retval";
pub const SOURCE_OP: &str = "_SOURCE";
pub const SINK_OP: &str = "_SINK";

const CONTROL_FLOW_OPS: &[&str] = &[
    "Switch",
    "RefSwitch",
    "Merge",
    "RefMerge",
    "Enter",
    "RefEnter",
    "Exit",
    "RefExit",
    "NextIteration",
    "RefNextIteration",
    "LoopCond",
    "ControlTrigger",
];

/// Host data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Float,
    Double,
    Int8,
    Int32,
    Int64,
    UInt8,
    Bool,
    String,
}

impl DataType {
    pub fn from_name(name: &str) -> Option<Self> {
        let dt = match name {
            "DT_FLOAT" => DataType::Float,
            "DT_DOUBLE" => DataType::Double,
            "DT_INT8" => DataType::Int8,
            "DT_INT32" => DataType::Int32,
            "DT_INT64" => DataType::Int64,
            "DT_UINT8" => DataType::UInt8,
            "DT_BOOL" => DataType::Bool,
            "DT_STRING" => DataType::String,
            _ => return None,
        };
        Some(dt)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Float => "DT_FLOAT",
            DataType::Double => "DT_DOUBLE",
            DataType::Int8 => "DT_INT8",
            DataType::Int32 => "DT_INT32",
            DataType::Int64 => "DT_INT64",
            DataType::UInt8 => "DT_UINT8",
            DataType::Bool => "DT_BOOL",
            DataType::String => "DT_STRING",
        }
    }

    pub fn to_element_type(self) -> Result<ElementType> {
        match self {
            DataType::Float => Ok(ElementType::F32),
            DataType::Double => Ok(ElementType::F64),
            DataType::Int8 => Ok(ElementType::I8),
            DataType::Int32 => Ok(ElementType::I32),
            DataType::Int64 => Ok(ElementType::I64),
            DataType::UInt8 => Ok(ElementType::U8),
            DataType::Bool => Ok(ElementType::Boolean),
            DataType::String => Err(Error::invalid(format!(
                "unsupported data type: {}",
                self.name()
            ))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Convert a host shape into a target shape. Unknown (negative) dimensions are rejected.
pub fn to_target_shape(dims: &[i64]) -> Result<Shape> {
    dims.iter()
        .map(|&d| {
            usize::try_from(d)
                .map_err(|_| Error::invalid(format!("shape {dims:?} has an unknown dimension")))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f32),
    Bool(bool),
    Str(String),
    Type(DataType),
    Shape(Vec<i64>),
    IntList(Vec<i64>),
    Tensor(TensorValue),
}

impl AttrValue {
    fn kind(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Bool(_) => "bool",
            AttrValue::Str(_) => "string",
            AttrValue::Type(_) => "type",
            AttrValue::Shape(_) => "shape",
            AttrValue::IntList(_) => "list(int)",
            AttrValue::Tensor(_) => "tensor",
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f32> for AttrValue {
    fn from(v: f32) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<DataType> for AttrValue {
    fn from(v: DataType) -> Self {
        AttrValue::Type(v)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::IntList(v)
    }
}

impl From<TensorValue> for AttrValue {
    fn from(v: TensorValue) -> Self {
        AttrValue::Tensor(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Data { src_output: usize, dst_input: usize },
    Control,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub src: NodeIndex,
    pub dst: NodeIndex,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn is_control(&self) -> bool {
        matches!(self.kind, EdgeKind::Control)
    }
}

/// Description of a node to insert with [`SourceGraph::add_node`].
#[derive(Debug, Clone)]
pub struct NodeDef {
    pub name: String,
    pub op: String,
    pub attrs: BTreeMap<String, AttrValue>,
    pub num_outputs: usize,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            attrs: BTreeMap::new(),
            num_outputs: 1,
        }
    }

    pub fn attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn outputs(mut self, n: usize) -> Self {
        self.num_outputs = n;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub index: NodeIndex,
    pub name: String,
    pub op: String,
    pub attrs: BTreeMap<String, AttrValue>,
    pub num_outputs: usize,
    num_inputs: usize,
    in_edges: Vec<EdgeIndex>,
    out_edges: Vec<EdgeIndex>,
}

impl Node {
    /// Number of data inputs (control edges excluded).
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn in_edges(&self) -> &[EdgeIndex] {
        &self.in_edges
    }

    pub fn out_edges(&self) -> &[EdgeIndex] {
        &self.out_edges
    }

    pub fn is_source_or_sink(&self) -> bool {
        self.op == SOURCE_OP || self.op == SINK_OP
    }

    pub fn is_control_flow(&self) -> bool {
        CONTROL_FLOW_OPS.contains(&self.op.as_str())
    }

    pub fn is_arg(&self) -> bool {
        self.op == ARG_OP
    }

    pub fn is_retval(&self) -> bool {
        self.op == RETVAL_OP
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    fn require(&self, key: &str) -> Result<&AttrValue> {
        self.attrs.get(key).ok_or_else(|| Error::MissingAttribute {
            node: self.name.clone(),
            attr: key.to_string(),
        })
    }

    fn wrong_kind(&self, key: &str, expected: &str, got: &AttrValue) -> Error {
        Error::invalid(format!(
            "attribute \"{key}\" of \"{}\" is {}, expected {expected}",
            self.name,
            got.kind()
        ))
    }

    pub fn attr_i64(&self, key: &str) -> Result<i64> {
        match self.require(key)? {
            AttrValue::Int(v) => Ok(*v),
            other => Err(self.wrong_kind(key, "int", other)),
        }
    }

    pub fn attr_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.attrs.get(key) {
            None => Ok(default),
            Some(AttrValue::Bool(v)) => Ok(*v),
            Some(other) => Err(self.wrong_kind(key, "bool", other)),
        }
    }

    pub fn attr_str(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            AttrValue::Str(v) => Ok(v),
            other => Err(self.wrong_kind(key, "string", other)),
        }
    }

    pub fn attr_str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        match self.attrs.get(key) {
            None => Ok(default),
            Some(AttrValue::Str(v)) => Ok(v),
            Some(other) => Err(self.wrong_kind(key, "string", other)),
        }
    }

    pub fn attr_type(&self, key: &str) -> Result<DataType> {
        match self.require(key)? {
            AttrValue::Type(v) => Ok(*v),
            other => Err(self.wrong_kind(key, "type", other)),
        }
    }

    pub fn attr_ints(&self, key: &str) -> Result<&[i64]> {
        match self.require(key)? {
            AttrValue::IntList(v) | AttrValue::Shape(v) => Ok(v),
            other => Err(self.wrong_kind(key, "list(int)", other)),
        }
    }

    pub fn attr_tensor(&self, key: &str) -> Result<&TensorValue> {
        match self.require(key)? {
            AttrValue::Tensor(v) => Ok(v),
            other => Err(self.wrong_kind(key, "tensor", other)),
        }
    }
}

/// Immutable-once-built dataflow graph.
#[derive(Debug, Clone, Default)]
pub struct SourceGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    by_name: HashMap<String, NodeIndex>,
}

impl SourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, def: NodeDef) -> Result<NodeIndex> {
        if self.by_name.contains_key(&def.name) {
            return Err(Error::invalid(format!("duplicate node name \"{}\"", def.name)));
        }
        let index = self.nodes.len();
        self.by_name.insert(def.name.clone(), index);
        self.nodes.push(Node {
            index,
            name: def.name,
            op: def.op,
            attrs: def.attrs,
            num_outputs: def.num_outputs,
            num_inputs: 0,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
        });
        Ok(index)
    }

    /// Connect output `src_output` of `src` to input `dst_input` of `dst`.
    pub fn add_edge(
        &mut self,
        src: NodeIndex,
        src_output: usize,
        dst: NodeIndex,
        dst_input: usize,
    ) -> Result<EdgeIndex> {
        self.check_index(src)?;
        self.check_index(dst)?;
        let producer = &self.nodes[src];
        if src_output >= producer.num_outputs {
            return Err(Error::invalid(format!(
                "\"{}\" declares {} output(s), no output {src_output}",
                producer.name, producer.num_outputs
            )));
        }
        if self.input_edge(dst, dst_input).is_some() {
            return Err(Error::invalid(format!(
                "input {dst_input} of \"{}\" is already connected",
                self.nodes[dst].name
            )));
        }
        let id = self.push_edge(Edge {
            src,
            dst,
            kind: EdgeKind::Data {
                src_output,
                dst_input,
            },
        });
        self.nodes[dst].num_inputs += 1;
        Ok(id)
    }

    pub fn add_control_edge(&mut self, src: NodeIndex, dst: NodeIndex) -> Result<EdgeIndex> {
        self.check_index(src)?;
        self.check_index(dst)?;
        Ok(self.push_edge(Edge {
            src,
            dst,
            kind: EdgeKind::Control,
        }))
    }

    fn push_edge(&mut self, edge: Edge) -> EdgeIndex {
        let id = self.edges.len();
        self.nodes[edge.src].out_edges.push(id);
        self.nodes[edge.dst].in_edges.push(id);
        self.edges.push(edge);
        id
    }

    fn check_index(&self, index: NodeIndex) -> Result<()> {
        if index >= self.nodes.len() {
            return Err(Error::invalid(format!("no node with index {index}")));
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index]
    }

    pub fn edge(&self, index: EdgeIndex) -> &Edge {
        &self.edges[index]
    }

    pub fn find(&self, name: &str) -> Option<NodeIndex> {
        self.by_name.get(name).copied()
    }

    /// The data edge feeding input slot `dst_input` of `node`, if any.
    pub fn input_edge(&self, node: NodeIndex, dst_input: usize) -> Option<&Edge> {
        self.nodes[node]
            .in_edges
            .iter()
            .map(|&e| &self.edges[e])
            .find(|e| matches!(e.kind, EdgeKind::Data { dst_input: d, .. } if d == dst_input))
    }

    /// Data edges leaving `node`, in insertion order.
    pub fn data_out_edges(&self, node: NodeIndex) -> impl Iterator<Item = &Edge> + '_ {
        self.nodes[node]
            .out_edges
            .iter()
            .map(|&e| &self.edges[e])
            .filter(|e| !e.is_control())
    }

    /// Topological order of all nodes (reverse postorder of a DFS over data
    /// and control edges). Fails on a cycle.
    pub fn reverse_post_order(&self) -> Result<Vec<NodeIndex>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Open,
            Done,
        }

        let mut mark = vec![Mark::New; self.nodes.len()];
        let mut post = Vec::with_capacity(self.nodes.len());
        // (node, position in its out-edge list)
        let mut stack: Vec<(NodeIndex, usize)> = Vec::new();

        for root in 0..self.nodes.len() {
            if mark[root] != Mark::New {
                continue;
            }
            mark[root] = Mark::Open;
            stack.push((root, 0));

            while let Some((node, pos)) = stack.pop() {
                let out = &self.nodes[node].out_edges;
                if pos == out.len() {
                    mark[node] = Mark::Done;
                    post.push(node);
                    continue;
                }
                stack.push((node, pos + 1));
                let next = self.edges[out[pos]].dst;
                match mark[next] {
                    Mark::New => {
                        mark[next] = Mark::Open;
                        stack.push((next, 0));
                    }
                    Mark::Open => {
                        return Err(Error::invalid(format!(
                            "graph has a cycle through \"{}\"",
                            self.nodes[next].name
                        )));
                    }
                    Mark::Done => {}
                }
            }
        }

        post.reverse();
        Ok(post)
    }
}

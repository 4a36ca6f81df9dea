//! GraphDef-style JSON -> [`SourceGraph`].
//!
//! ```json
//! {"node": [
//!   {"name": "x", "op": "_Arg", "attr": {"T": {"type": "DT_FLOAT"}, "index": {"i": 0}}},
//!   {"name": "y", "op": "Relu", "input": ["x"]},
//!   {"name": "out", "op": "_Retval", "input": ["y"], "attr": {"index": {"i": 0}}}
//! ]}
//! ```
//!
//! Inputs follow TensorFlow's string convention: `name` is output 0 of
//! `name`, `name:k` is output `k`, `^name` is a control dependency.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::ir::source::{AttrValue, DataType, NodeDef, NodeIndex, SourceGraph};
use crate::ir::tensor::{TensorData, TensorValue};

#[derive(Debug, Deserialize)]
struct GraphDefJson {
    #[serde(default)]
    node: Vec<NodeJson>,
}

#[derive(Debug, Deserialize)]
struct NodeJson {
    name: String,
    op: String,
    #[serde(default)]
    input: Vec<String>,
    #[serde(default)]
    attr: BTreeMap<String, AttrJson>,
    num_outputs: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AttrJson {
    I(i64),
    F(f32),
    B(bool),
    S(String),
    Type(String),
    Shape(Vec<i64>),
    List(ListJson),
    Tensor(TensorJson),
}

#[derive(Debug, Deserialize)]
struct ListJson {
    #[serde(default)]
    i: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct TensorJson {
    dtype: String,
    #[serde(default)]
    shape: Vec<usize>,
    #[serde(default)]
    val: Vec<Value>,
}

/// A parsed entry of a node's `input` list.
#[derive(Debug, Clone, PartialEq, Eq)]
enum InputRef<'a> {
    Data { node: &'a str, output: usize },
    Control { node: &'a str },
}

fn parse_input(input: &str) -> Result<InputRef<'_>> {
    let malformed = || Error::invalid(format!("malformed input \"{input}\""));

    if let Some(node) = input.strip_prefix('^') {
        if node.is_empty() {
            return Err(malformed());
        }
        return Ok(InputRef::Control { node });
    }
    let (node, output) = match input.rsplit_once(':') {
        Some((node, output)) => (node, output.parse().map_err(|_| malformed())?),
        None => (input, 0),
    };
    if node.is_empty() {
        return Err(malformed());
    }
    Ok(InputRef::Data { node, output })
}

fn data_type(name: &str) -> Result<DataType> {
    DataType::from_name(name).ok_or_else(|| Error::invalid(format!("unknown data type \"{name}\"")))
}

fn tensor_value(t: &TensorJson) -> Result<TensorValue> {
    let dtype = data_type(&t.dtype)?;
    let count: usize = t.shape.iter().product();
    // A single value fills the whole tensor
    let splat = t.val.len() == 1 && count != 1;
    let vals: Vec<&Value> = if splat {
        std::iter::repeat(&t.val[0]).take(count).collect()
    } else {
        t.val.iter().collect()
    };

    let bad = |v: &Value| Error::invalid(format!("tensor value {v} is not a {dtype}"));
    let ints = || {
        vals.iter()
            .map(|&v| v.as_i64().ok_or_else(|| bad(v)))
            .collect::<Result<Vec<_>>>()
    };
    let floats = || {
        vals.iter()
            .map(|&v| v.as_f64().ok_or_else(|| bad(v)))
            .collect::<Result<Vec<_>>>()
    };

    let data = match dtype {
        DataType::Float => TensorData::F32(floats()?.into_iter().map(|x| x as f32).collect()),
        DataType::Double => TensorData::F64(floats()?),
        DataType::Int8 => TensorData::I8(ints()?.into_iter().map(|x| x as i8).collect()),
        DataType::Int32 => TensorData::I32(ints()?.into_iter().map(|x| x as i32).collect()),
        DataType::Int64 => TensorData::I64(ints()?),
        DataType::UInt8 => TensorData::U8(ints()?.into_iter().map(|x| x as u8).collect()),
        DataType::Bool => TensorData::Bool(
            vals.iter()
                .map(|&v| v.as_bool().ok_or_else(|| bad(v)))
                .collect::<Result<Vec<_>>>()?,
        ),
        DataType::String => return Err(Error::invalid("string tensors are not supported")),
    };
    TensorValue::new(t.shape.clone(), data)
}

fn attr_value(attr: &AttrJson) -> Result<AttrValue> {
    Ok(match attr {
        AttrJson::I(v) => AttrValue::Int(*v),
        AttrJson::F(v) => AttrValue::Float(*v),
        AttrJson::B(v) => AttrValue::Bool(*v),
        AttrJson::S(v) => AttrValue::Str(v.clone()),
        AttrJson::Type(name) => AttrValue::Type(data_type(name)?),
        AttrJson::Shape(dims) => AttrValue::Shape(dims.clone()),
        AttrJson::List(list) => AttrValue::IntList(list.i.clone()),
        AttrJson::Tensor(t) => AttrValue::Tensor(tensor_value(t)?),
    })
}

/// Number of outputs to declare for `node`: explicit `num_outputs`, then
/// `num_split`, then the highest output any consumer reads.
fn output_arity(node: &NodeJson, referenced: Option<usize>) -> usize {
    if let Some(n) = node.num_outputs {
        return n;
    }
    if let Some(AttrJson::I(n)) = node.attr.get("num_split") {
        if let Ok(n) = usize::try_from(*n) {
            return n;
        }
    }
    referenced.map_or(1, |max| max + 1)
}

fn find_input(graph: &SourceGraph, name: &str, consumer: &str) -> Result<NodeIndex> {
    graph
        .find(name)
        .ok_or_else(|| Error::invalid(format!("input \"{name}\" of \"{consumer}\" does not exist")))
}

pub fn from_json(json: &str) -> Result<SourceGraph> {
    let def: GraphDefJson = serde_json::from_str(json)
        .map_err(|err| Error::invalid(format!("malformed graph: {err}")))?;

    // Highest output index read from each producer
    let mut referenced: HashMap<&str, usize> = HashMap::new();
    for node in &def.node {
        for input in &node.input {
            if let InputRef::Data { node, output } = parse_input(input)? {
                let max = referenced.entry(node).or_insert(output);
                *max = (*max).max(output);
            }
        }
    }

    let mut graph = SourceGraph::new();
    for node in &def.node {
        let mut ndef = NodeDef::new(node.name.as_str(), node.op.as_str())
            .outputs(output_arity(node, referenced.get(node.name.as_str()).copied()));
        for (key, attr) in &node.attr {
            ndef = ndef.attr(key, attr_value(attr)?);
        }
        graph.add_node(ndef)?;
    }

    for node in &def.node {
        let dst = graph
            .find(&node.name)
            .ok_or_else(|| Error::invalid(format!("node \"{}\" vanished", node.name)))?;

        let mut slot = 0;
        for input in &node.input {
            match parse_input(input)? {
                InputRef::Data { node: src, output } => {
                    let src = find_input(&graph, src, &node.name)?;
                    graph.add_edge(src, output, dst, slot)?;
                    slot += 1;
                }
                InputRef::Control { node: src } => {
                    let src = find_input(&graph, src, &node.name)?;
                    graph.add_control_edge(src, dst)?;
                }
            }
        }
    }

    log::debug!("loaded graph with {} node(s)", graph.nodes().len());
    Ok(graph)
}

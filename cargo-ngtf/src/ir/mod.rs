pub mod graph;
pub mod ng;
pub mod source;
pub mod tensor;

pub use graph::{ElementType, Graph, Node, NodeId, Shape};
pub use ng::{ConvParams, Function, NgGraph, NgOp, PoolParams};
pub use source::{AttrValue, DataType, Edge, EdgeKind, NodeDef, NodeIndex, SourceGraph};
pub use tensor::{TensorData, TensorValue};

//! Translates host dataflow graphs (GraphDef-style) into target computation functions.
//!
//! ```no_run
//! use ngtf_compiler::{parse, Compiler, DataType, TensorArg};
//!
//! let graph = parse::from_json(&std::fs::read_to_string("graph.json")?)?;
//! let compiler = Compiler::prepare(graph)?;
//! let function = compiler.translate(&[TensorArg::new(DataType::Float, vec![1, 28, 28, 1])])?;
//! println!("{function}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod ir;
pub mod parse;
pub mod translate;

pub use error::{Error, Result};
pub use ir::{DataType, Function, NgOp, SourceGraph};
pub use translate::{Compiler, TensorArg};

//! Constant tensor values: `Const` attributes, static inputs and target constants.

use crate::error::{Error, Result};
use crate::ir::graph::{num_elements, ElementType, Shape};

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I8(Vec<i8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    Bool(Vec<bool>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            TensorData::F32(_) => ElementType::F32,
            TensorData::F64(_) => ElementType::F64,
            TensorData::I8(_) => ElementType::I8,
            TensorData::I32(_) => ElementType::I32,
            TensorData::I64(_) => ElementType::I64,
            TensorData::U8(_) => ElementType::U8,
            TensorData::Bool(_) => ElementType::Boolean,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    pub shape: Shape,
    pub data: TensorData,
}

impl TensorValue {
    /// Pair `data` with `shape`, checking the element count.
    pub fn new(shape: Shape, data: TensorData) -> Result<Self> {
        let expected = num_elements(&shape);
        if data.len() != expected {
            return Err(Error::invalid(format!(
                "tensor of shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn scalar(data: TensorData) -> Result<Self> {
        Self::new(vec![], data)
    }

    pub fn vector_i64(values: Vec<i64>) -> Self {
        Self {
            shape: vec![values.len()],
            data: TensorData::I64(values),
        }
    }

    pub fn vector_i32(values: Vec<i32>) -> Self {
        Self {
            shape: vec![values.len()],
            data: TensorData::I32(values),
        }
    }

    /// A tensor of `shape` with every element set to `value`, cast to `element_type`.
    pub fn filled(element_type: ElementType, shape: Shape, value: f64) -> Self {
        let n = num_elements(&shape);
        let data = match element_type {
            ElementType::F32 => TensorData::F32(vec![value as f32; n]),
            ElementType::F64 => TensorData::F64(vec![value; n]),
            ElementType::I8 => TensorData::I8(vec![value as i8; n]),
            ElementType::I32 => TensorData::I32(vec![value as i32; n]),
            ElementType::I64 => TensorData::I64(vec![value as i64; n]),
            ElementType::U8 => TensorData::U8(vec![value as u8; n]),
            ElementType::Boolean => TensorData::Bool(vec![value != 0.0; n]),
        };
        Self { shape, data }
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    /// Integer contents widened to i64; `None` for float and bool tensors.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match &self.data {
            TensorData::I8(v) => Some(v.iter().map(|&x| x as i64).collect()),
            TensorData::I32(v) => Some(v.iter().map(|&x| x as i64).collect()),
            TensorData::I64(v) => Some(v.clone()),
            TensorData::U8(v) => Some(v.iter().map(|&x| x as i64).collect()),
            TensorData::F32(_) | TensorData::F64(_) | TensorData::Bool(_) => None,
        }
    }
}

/// Translation result type
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure aborts the whole translation; nothing partial is returned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A control-flow op (Switch, Merge, Enter, ...) is present in the graph
    #[error("encountered a control flow op: {name} ({op})")]
    ControlFlowUnsupported { name: String, op: String },

    /// No translator is registered for the node's op type
    #[error("unsupported op: {name} ({op})")]
    UnsupportedOperation { name: String, op: String },

    /// A required node attribute is absent
    #[error("no {attr} defined for \"{node}\"")]
    MissingAttribute { node: String, attr: String },

    /// Malformed node, bad attribute kind, or an index out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No edge at the requested input slot, or the producer has no output there
    #[error("input {index} of \"{node}\" not found: {reason}")]
    InputNotFound {
        node: String,
        index: usize,
        reason: String,
    },

    /// Target node construction rejected its operands
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Lowering rule for a single op rejected the node
    #[error("\"{node}\" ({op}): {message}")]
    Translation {
        node: String,
        op: String,
        message: String,
    },
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Error::ShapeMismatch(msg.into())
    }
}

use thiserror::Error;

/// Errors surfaced synchronously by the StableHLO builder and its shape-inference layer. A
/// failed operation leaves the owning function's statement list unchanged.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum Error {
    /// An operation was attempted on a function after `return` closed it.
    #[error("cannot add operation {op} after returning, in function '{function}'")]
    BuilderClosed { op: String, function: String },

    /// An operand belongs to a function that is neither the target function nor one of its
    /// strict ancestors.
    #[error("operands belong to incompatible functions ({0})")]
    CrossFunctionOperand(String),

    /// Shape inference rejected the operand ranks.
    #[error("rank mismatch: {0}")]
    RankMismatch(String),

    /// Shape inference rejected the operand dimensions.
    #[error("dimensions mismatch: {0}")]
    DimMismatch(String),

    /// Shape inference rejected the operand element types.
    #[error("dtype mismatch: {0}")]
    DTypeMismatch(String),

    /// An axis argument is out of bounds or malformed.
    #[error("invalid axis: {0}")]
    InvalidAxis(String),

    /// A required attribute is missing or has the wrong type or value.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// A shape-arithmetic subgraph could not be resolved statically and the chosen fallback
    /// also failed. Recovered internally by the dynamic-op specialization in most cases.
    #[error("shape subgraph could not be resolved statically: {0}")]
    ExtractionUnresolved(String),
}

impl Error {
    pub fn builder_closed<O: ToString, F: ToString>(op: O, function: F) -> Self {
        Self::BuilderClosed { op: op.to_string(), function: function.to_string() }
    }

    pub fn cross_function_operand<M: Into<String>>(message: M) -> Self {
        Self::CrossFunctionOperand(message.into())
    }

    pub fn rank_mismatch<M: Into<String>>(message: M) -> Self {
        Self::RankMismatch(message.into())
    }

    pub fn dim_mismatch<M: Into<String>>(message: M) -> Self {
        Self::DimMismatch(message.into())
    }

    pub fn dtype_mismatch<M: Into<String>>(message: M) -> Self {
        Self::DTypeMismatch(message.into())
    }

    pub fn invalid_axis<M: Into<String>>(message: M) -> Self {
        Self::InvalidAxis(message.into())
    }

    pub fn invalid_attribute<M: Into<String>>(message: M) -> Self {
        Self::InvalidAttribute(message.into())
    }

    pub fn extraction_unresolved<M: Into<String>>(message: M) -> Self {
        Self::ExtractionUnresolved(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let error = Error::builder_closed("stablehlo.add", "main");
        assert_eq!(
            format!("{error}"),
            "cannot add operation stablehlo.add after returning, in function 'main'"
        );
        let error = Error::invalid_axis("axis 3 out of bounds for rank 2");
        assert_eq!(format!("{error}"), "invalid axis: axis 3 out of bounds for rank 2");
        assert_ne!(Error::rank_mismatch("a"), Error::dim_mismatch("a"));
        assert_eq!(Error::dtype_mismatch("x"), Error::dtype_mismatch("x"));
    }
}

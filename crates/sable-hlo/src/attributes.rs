use crate::builder::FuncId;
use crate::{DType, Literal};

/// A typed attribute value attached to a statement. Attribute maps render with stable keys in
/// lexicographic order; [`Attribute::FunctionRef`] values referring to closures render as inline
/// regions instead of dictionary entries.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Int(i64),
    IntList(Vec<i64>),
    Bool(bool),
    BoolList(Vec<bool>),
    Real(f64),
    /// A bare [`DType`] token (e.g., `f32`).
    DType(DType),
    /// A constant tensor, rendered as `dense<…> : tensor<…>`.
    TensorLiteral(Literal),
    /// Reference to another function of the module: top-level functions render as `@name`
    /// tokens, closures render as inline regions at the call site.
    FunctionRef(FuncId),
    /// A raw, already-formatted MLIR token (e.g., `#stablehlo.dot<…>`).
    MlirToken(String),
}

impl Attribute {
    /// Renders the context-free variants as MLIR attribute tokens. [`Attribute::FunctionRef`]
    /// needs the module's function table and is handled by the emitter.
    pub(crate) fn render(&self) -> Option<String> {
        match self {
            Self::Int(value) => Some(format!("{value} : i64")),
            Self::IntList(values) => Some(render_dense_array("i64", values.iter())),
            Self::Bool(value) => Some(format!("{value}")),
            Self::BoolList(values) => Some(render_dense_array("i1", values.iter())),
            Self::Real(value) => Some(format!("{} : f32", crate::literals::format_float(*value))),
            Self::DType(dtype) => Some(dtype.mlir_token().to_string()),
            Self::TensorLiteral(literal) => Some(format!("{literal}")),
            Self::MlirToken(token) => Some(token.clone()),
            Self::FunctionRef(_) => None,
        }
    }

    /// Integer payload, when this attribute is an [`Attribute::Int`].
    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer-list payload, when this attribute is an [`Attribute::IntList`].
    pub(crate) fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            Self::IntList(values) => Some(values),
            _ => None,
        }
    }
}

/// Renders an MLIR dense-array attribute like `array<i64: 1, 2, 3>` (or `array<i64>` when
/// empty).
fn render_dense_array<T: ToString>(element: &str, values: impl Iterator<Item = T>) -> String {
    let rendered = values.map(|value| value.to_string()).collect::<Vec<_>>();
    if rendered.is_empty() {
        format!("array<{element}>")
    } else {
        format!("array<{element}: {}>", rendered.join(", "))
    }
}

/// Renders a bracketed index list like `[0, 2]`, used inside `#stablehlo.…` tokens.
pub(crate) fn render_index_list(values: &[i64]) -> String {
    format!("[{}]", values.iter().map(|value| value.to_string()).collect::<Vec<_>>().join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(Attribute::Int(3).render().unwrap(), "3 : i64");
        assert_eq!(Attribute::IntList(vec![1, 2]).render().unwrap(), "array<i64: 1, 2>");
        assert_eq!(Attribute::IntList(vec![]).render().unwrap(), "array<i64>");
        assert_eq!(Attribute::Bool(true).render().unwrap(), "true");
        assert_eq!(Attribute::BoolList(vec![false, true]).render().unwrap(), "array<i1: false, true>");
        assert_eq!(Attribute::Real(1.5).render().unwrap(), "1.5 : f32");
        assert_eq!(Attribute::Real(2.0).render().unwrap(), "2.0 : f32");
        assert_eq!(Attribute::DType(DType::F32).render().unwrap(), "f32");
        assert_eq!(
            Attribute::MlirToken("#stablehlo<precision DEFAULT>".to_string()).render().unwrap(),
            "#stablehlo<precision DEFAULT>"
        );
        assert_eq!(Attribute::TensorLiteral(Literal::scalar(1i32)).render().unwrap(), "dense<1> : tensor<i32>");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Attribute::Int(5).as_int(), Some(5));
        assert_eq!(Attribute::Bool(true).as_int(), None);
        assert_eq!(Attribute::IntList(vec![3, 4]).as_int_list(), Some(&[3i64, 4][..]));
        assert_eq!(render_index_list(&[0, 2]), "[0, 2]");
        assert_eq!(render_index_list(&[]), "[]");
    }
}

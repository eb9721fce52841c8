use std::fmt::Display;

use half::{bf16, f16};

use crate::{DType, Error, Shape};

/// Storage for a [`Literal`] payload, normalized per element category.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum LiteralData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Complex(Vec<(f64, f64)>),
}

impl LiteralData {
    fn len(&self) -> usize {
        match self {
            Self::Bool(values) => values.len(),
            Self::Int(values) => values.len(),
            Self::Float(values) => values.len(),
            Self::Complex(values) => values.len(),
        }
    }
}

/// A constant tensor attribute: a [`DType`], explicit dimensions, and a normalized payload.
/// Serializes as a `dense<…>` MLIR attribute with row-major nesting matching the dimensions
/// (scalars elide brackets).
#[derive(Clone, Debug, PartialEq)]
pub struct Literal {
    dtype: DType,
    dimensions: Vec<i64>,
    data: LiteralData,
}

/// Primitive scalar types that can be stored in a [`Literal`] and transferred to device
/// buffers. Maps each Rust type to its [`DType`].
pub trait LiteralElement: Copy {
    const DTYPE: DType;
    fn to_literal_data(values: &[Self]) -> LiteralDataSeed;
}

/// Intermediate payload produced by [`LiteralElement::to_literal_data`].
pub struct LiteralDataSeed(pub(crate) LiteralData);

macro_rules! literal_int_element {
    ($type:ty, $dtype:expr) => {
        impl LiteralElement for $type {
            const DTYPE: DType = $dtype;
            fn to_literal_data(values: &[Self]) -> LiteralDataSeed {
                LiteralDataSeed(LiteralData::Int(values.iter().map(|&value| value as i64).collect()))
            }
        }
    };
}

literal_int_element!(i8, DType::I8);
literal_int_element!(i16, DType::I16);
literal_int_element!(i32, DType::I32);
literal_int_element!(i64, DType::I64);
literal_int_element!(u8, DType::U8);
literal_int_element!(u16, DType::U16);
literal_int_element!(u32, DType::U32);
literal_int_element!(u64, DType::U64);

impl LiteralElement for bool {
    const DTYPE: DType = DType::Bool;
    fn to_literal_data(values: &[Self]) -> LiteralDataSeed {
        LiteralDataSeed(LiteralData::Bool(values.to_vec()))
    }
}

impl LiteralElement for f32 {
    const DTYPE: DType = DType::F32;
    fn to_literal_data(values: &[Self]) -> LiteralDataSeed {
        LiteralDataSeed(LiteralData::Float(values.iter().map(|&value| value as f64).collect()))
    }
}

impl LiteralElement for f64 {
    const DTYPE: DType = DType::F64;
    fn to_literal_data(values: &[Self]) -> LiteralDataSeed {
        LiteralDataSeed(LiteralData::Float(values.to_vec()))
    }
}

impl LiteralElement for f16 {
    const DTYPE: DType = DType::F16;
    fn to_literal_data(values: &[Self]) -> LiteralDataSeed {
        LiteralDataSeed(LiteralData::Float(values.iter().map(|value| value.to_f64()).collect()))
    }
}

impl LiteralElement for bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_literal_data(values: &[Self]) -> LiteralDataSeed {
        LiteralDataSeed(LiteralData::Float(values.iter().map(|value| value.to_f64()).collect()))
    }
}

impl Literal {
    /// Creates a rank-0 [`Literal`] holding a single scalar.
    pub fn scalar<T: LiteralElement>(value: T) -> Self {
        Self { dtype: T::DTYPE, dimensions: Vec::new(), data: T::to_literal_data(&[value]).0 }
    }

    /// Creates a [`Literal`] from a flat slice and explicit dimensions. The element count must
    /// match the product of the dimensions.
    pub fn from_flat<T: LiteralElement, D: Into<Vec<i64>>>(
        values: &[T],
        dimensions: D,
    ) -> Result<Self, Error> {
        let dimensions = dimensions.into();
        let expected: i64 = dimensions.iter().product();
        if expected < 0 || expected as usize != values.len() {
            return Err(Error::invalid_attribute(format!(
                "literal dimensions {dimensions:?} require {expected} elements, got {}",
                values.len()
            )));
        }
        Ok(Self { dtype: T::DTYPE, dimensions, data: T::to_literal_data(values).0 })
    }

    /// Creates an integer [`Literal`] of the provided [`DType`] from untyped values. Used for
    /// shape tensors, which are 1-D integer vectors regardless of the host integer width.
    pub fn from_flat_i64<D: Into<Vec<i64>>>(
        dtype: DType,
        values: &[i64],
        dimensions: D,
    ) -> Result<Self, Error> {
        if !dtype.is_integer() {
            return Err(Error::invalid_attribute(format!(
                "integer literal requires an integer dtype, got {dtype}"
            )));
        }
        let dimensions = dimensions.into();
        let expected: i64 = dimensions.iter().product();
        if expected < 0 || expected as usize != values.len() {
            return Err(Error::invalid_attribute(format!(
                "literal dimensions {dimensions:?} require {expected} elements, got {}",
                values.len()
            )));
        }
        Ok(Self { dtype, dimensions, data: LiteralData::Int(values.to_vec()) })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dimensions(&self) -> &[i64] {
        &self.dimensions
    }

    /// [`Shape`] of this literal.
    pub fn shape(&self) -> Shape {
        Shape::of(self.dtype, self.dimensions.clone())
    }

    /// Extracts the payload as integers when this literal is a scalar or 1-D integer (or
    /// boolean) tensor; used by the constant-folding shape evaluator.
    pub fn extract_integers(&self) -> Option<Vec<i64>> {
        if self.dimensions.len() > 1 {
            return None;
        }
        match &self.data {
            LiteralData::Int(values) => Some(values.clone()),
            LiteralData::Bool(values) => {
                Some(values.iter().map(|&value| value as i64).collect())
            }
            _ => None,
        }
    }

    fn element_count(&self) -> usize {
        self.data.len()
    }

    fn write_element(&self, out: &mut String, index: usize) {
        match &self.data {
            LiteralData::Bool(values) => out.push_str(if values[index] { "true" } else { "false" }),
            LiteralData::Int(values) => out.push_str(&values[index].to_string()),
            LiteralData::Float(values) => out.push_str(&format_float(values[index])),
            LiteralData::Complex(values) => {
                let (re, im) = values[index];
                out.push_str(&format!("({}, {})", format_float(re), format_float(im)));
            }
        }
    }

    fn write_nested(&self, out: &mut String, dims: &[i64], offset: &mut usize) {
        if dims.is_empty() {
            self.write_element(out, *offset);
            *offset += 1;
            return;
        }
        out.push('[');
        for i in 0..dims[0] {
            if i > 0 {
                out.push_str(", ");
            }
            self.write_nested(out, &dims[1..], offset);
        }
        out.push(']');
    }
}

/// Renders a float with a shortest round-tripping decimal form that still parses as an MLIR
/// float literal (integral values gain a trailing `.0`).
pub(crate) fn format_float(value: f64) -> String {
    let formatted = format!("{value}");
    if formatted.contains('.') || formatted.contains('e') || formatted.contains("inf") || formatted.contains("NaN") {
        formatted
    } else {
        format!("{formatted}.0")
    }
}

impl Display for Literal {
    /// Renders this [`Literal`] as `dense<…> : tensor<…>`.
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut payload = String::new();
        if self.dimensions.is_empty() {
            self.write_element(&mut payload, 0);
        } else if self.element_count() == 0 {
            payload.push_str("[]");
        } else {
            let mut offset = 0;
            self.write_nested(&mut payload, &self.dimensions, &mut offset);
        }
        write!(formatter, "dense<{payload}> : {}", self.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_literals() {
        assert_eq!(format!("{}", Literal::scalar(42i32)), "dense<42> : tensor<i32>");
        assert_eq!(format!("{}", Literal::scalar(1.0f32)), "dense<1.0> : tensor<f32>");
        assert_eq!(format!("{}", Literal::scalar(0.1f64)), "dense<0.1> : tensor<f64>");
        assert_eq!(format!("{}", Literal::scalar(true)), "dense<true> : tensor<i1>");
        assert_eq!(format!("{}", Literal::scalar(f16::from_f32(2.0))), "dense<2.0> : tensor<f16>");
    }

    #[test]
    fn test_vector_literals() {
        let literal = Literal::from_flat(&[1i32, 2, 3], [3]).unwrap();
        assert_eq!(format!("{literal}"), "dense<[1, 2, 3]> : tensor<3xi32>");

        let literal = Literal::from_flat(&[1.5f32, -2.0], [2]).unwrap();
        assert_eq!(format!("{literal}"), "dense<[1.5, -2.0]> : tensor<2xf32>");
    }

    #[test]
    fn test_nested_literals() {
        let literal = Literal::from_flat(&[1i64, 2, 3, 4, 5, 6], [2, 3]).unwrap();
        assert_eq!(format!("{literal}"), "dense<[[1, 2, 3], [4, 5, 6]]> : tensor<2x3xi64>");

        let literal = Literal::from_flat(&[0i32, 1, 2, 3], [2, 1, 2]).unwrap();
        assert_eq!(format!("{literal}"), "dense<[[[0, 1]], [[2, 3]]]> : tensor<2x1x2xi32>");
    }

    #[test]
    fn test_dimension_validation() {
        assert!(Literal::from_flat(&[1i32, 2, 3], [2]).is_err());
        assert!(Literal::from_flat_i64(DType::F32, &[1], [1]).is_err());
        assert!(Literal::from_flat_i64(DType::I64, &[1, 2], [3]).is_err());
    }

    #[test]
    fn test_extract_integers() {
        assert_eq!(Literal::scalar(7i32).extract_integers(), Some(vec![7]));
        assert_eq!(
            Literal::from_flat(&[12i64, 64], [2]).unwrap().extract_integers(),
            Some(vec![12, 64])
        );
        assert_eq!(Literal::scalar(true).extract_integers(), Some(vec![1]));
        assert_eq!(Literal::scalar(1.5f32).extract_integers(), None);
        assert_eq!(
            Literal::from_flat(&[1i32, 2, 3, 4], [2, 2]).unwrap().extract_integers(),
            None
        );
    }
}

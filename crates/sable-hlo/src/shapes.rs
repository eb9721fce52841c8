use std::fmt::Display;

use crate::{DType, Quantization};

/// Sentinel dimension extent for symbolic/dynamic dimensions whose size is not known at IR build
/// time. Rendered as `?` in the MLIR type grammar.
pub const DIM_UNKNOWN: i64 = -1;

/// Shape of a value in a StableHLO program: either an array shape (a [`DType`] plus an ordered
/// list of dimensions, each a nonnegative extent or [`DIM_UNKNOWN`]) or a tuple of sub-shapes.
/// Scalars are rank-0 array shapes.
///
/// Array shapes may additionally carry per-dimension upper bounds (used only for
/// bounded-dynamic compilation and emitted as a `#stablehlo.bounds<…>` attribute when
/// [`Shape::encode_bounds`] is set) and optional [`Quantization`] metadata which replaces the
/// element type token on emission.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Shape {
    pub dtype: Option<DType>,
    pub dimensions: Vec<i64>,
    /// Per-dimension upper bounds; empty when no bounds are declared. Entries are only
    /// meaningful for dimensions equal to [`DIM_UNKNOWN`].
    pub dimension_bounds: Vec<i64>,
    pub quantization: Option<Quantization>,
    /// When set, dynamic dimensions emit their declared bounds.
    pub encode_bounds: bool,
    /// Non-empty for tuple shapes; `dtype` and `dimensions` are unused in that case.
    pub tuple_shapes: Vec<Shape>,
}

impl Shape {
    /// Creates a scalar (rank-0) array [`Shape`].
    pub fn scalar(dtype: DType) -> Self {
        Self { dtype: Some(dtype), ..Default::default() }
    }

    /// Creates an array [`Shape`] with the provided dimensions.
    pub fn of<D: Into<Vec<i64>>>(dtype: DType, dimensions: D) -> Self {
        Self { dtype: Some(dtype), dimensions: dimensions.into(), ..Default::default() }
    }

    /// Creates a tuple [`Shape`] from the provided sub-shapes.
    pub fn tuple<S: Into<Vec<Shape>>>(shapes: S) -> Self {
        Self { tuple_shapes: shapes.into(), ..Default::default() }
    }

    pub fn is_tuple(&self) -> bool {
        !self.tuple_shapes.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_scalar(&self) -> bool {
        !self.is_tuple() && self.dimensions.is_empty()
    }

    /// [`DType`] of this array shape. Panics on tuple shapes.
    pub fn dtype(&self) -> DType {
        self.dtype.expect("tuple shapes have no element type")
    }

    /// Returns `true` when any dimension is [`DIM_UNKNOWN`].
    pub fn is_dynamic(&self) -> bool {
        self.dimensions.iter().any(|&dim| dim < 0)
    }

    /// Total number of elements when every dimension is static, [`None`] otherwise.
    pub fn size(&self) -> Option<i64> {
        if self.is_dynamic() { None } else { Some(self.dimensions.iter().product()) }
    }

    /// Product of the statically-known (positive) dimensions, ignoring dynamic ones. This is
    /// the quantity the dynamic-reshape specialization reasons about.
    pub fn known_size(&self) -> i64 {
        self.dimensions.iter().filter(|&&dim| dim > 0).product()
    }

    /// Number of storage bytes for a fully-static shape, accounting for sub-byte packing.
    pub fn byte_len(&self) -> Option<usize> {
        self.size().map(|size| self.dtype().packed_byte_len(size as usize))
    }

    /// Extent of `axis`, supporting negative indexing from the end.
    pub fn dim(&self, axis: i64) -> i64 {
        let rank = self.rank() as i64;
        let axis = if axis < 0 { axis + rank } else { axis };
        self.dimensions[axis as usize]
    }

    /// Returns a copy of this shape with a different [`DType`], keeping dimensions and bounds.
    pub fn with_dtype(&self, dtype: DType) -> Self {
        Self { dtype: Some(dtype), ..self.clone() }
    }

    /// Returns a copy of this shape with different dimensions, dropping any declared bounds.
    pub fn with_dimensions<D: Into<Vec<i64>>>(&self, dimensions: D) -> Self {
        Self { dimensions: dimensions.into(), dimension_bounds: Vec::new(), ..self.clone() }
    }

    /// Returns a copy of this shape carrying the provided [`Quantization`] metadata.
    pub fn with_quantization(&self, quantization: Quantization) -> Self {
        Self { quantization: Some(quantization), ..self.clone() }
    }

    /// Two shapes are *compatible* iff their ranks and dtypes match and, pairwise, at least one
    /// dimension is [`DIM_UNKNOWN`] or the two known extents are equal.
    pub fn compatible(&self, other: &Shape) -> bool {
        if self.is_tuple() || other.is_tuple() {
            return self.tuple_shapes.len() == other.tuple_shapes.len()
                && self.tuple_shapes.iter().zip(&other.tuple_shapes).all(|(a, b)| a.compatible(b));
        }
        self.dtype == other.dtype
            && self.rank() == other.rank()
            && self
                .dimensions
                .iter()
                .zip(&other.dimensions)
                .all(|(&a, &b)| a < 0 || b < 0 || a == b)
    }

    fn has_bounded_dynamism(&self) -> bool {
        self.is_dynamic() && !self.dimension_bounds.is_empty()
    }
}

impl Display for Shape {
    /// Renders this [`Shape`] as an MLIR type token: `tensor<DIMx…xELEM>` (with `?` for dynamic
    /// dimensions and an optional trailing `#stablehlo.bounds<…>` attribute), or `tuple<…>`.
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_tuple() {
            write!(formatter, "tuple<")?;
            for (i, shape) in self.tuple_shapes.iter().enumerate() {
                if i > 0 {
                    write!(formatter, ", ")?;
                }
                write!(formatter, "{shape}")?;
            }
            return write!(formatter, ">");
        }

        write!(formatter, "tensor<")?;
        for &dim in &self.dimensions {
            if dim == DIM_UNKNOWN {
                write!(formatter, "?x")?;
            } else {
                write!(formatter, "{dim}x")?;
            }
        }
        match &self.quantization {
            Some(quantization) => write!(formatter, "{quantization}")?,
            None => write!(formatter, "{}", self.dtype())?,
        }
        if self.encode_bounds && self.has_bounded_dynamism() {
            write!(formatter, ", #stablehlo.bounds<")?;
            for (i, &dim) in self.dimensions.iter().enumerate() {
                if i > 0 {
                    write!(formatter, ", ")?;
                }
                if dim == DIM_UNKNOWN {
                    match self.dimension_bounds.get(i) {
                        Some(&bound) if bound > 0 => write!(formatter, "{bound}")?,
                        _ => write!(formatter, "?")?,
                    }
                } else {
                    // Static dimensions need no bound.
                    write!(formatter, "?")?;
                }
            }
            write!(formatter, ">")?;
        }
        write!(formatter, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emission() {
        assert_eq!(format!("{}", Shape::of(DType::F32, [1, 10])), "tensor<1x10xf32>");
        assert_eq!(format!("{}", Shape::scalar(DType::I32)), "tensor<i32>");
        assert_eq!(format!("{}", Shape::of(DType::F64, [3])), "tensor<3xf64>");
        assert_eq!(
            format!("{}", Shape::of(DType::BF16, [DIM_UNKNOWN, 5])),
            "tensor<?x5xbf16>"
        );
        let shape = Shape::of(DType::F32, [1, 10])
            .with_quantization(Quantization::uniform(DType::I8, DType::F32, 0.1, 0));
        assert_eq!(format!("{shape}"), "tensor<1x10x!quant.uniform<i8:f32, 0.1:0>>");
    }

    #[test]
    fn test_bounds_emission() {
        let mut shape = Shape::of(DType::F32, [DIM_UNKNOWN, 8, DIM_UNKNOWN]);
        shape.dimension_bounds = vec![2048, 0, 4096];
        // Bounds only render when explicitly requested.
        assert_eq!(format!("{shape}"), "tensor<?x8x?xf32>");
        shape.encode_bounds = true;
        assert_eq!(format!("{shape}"), "tensor<?x8x?xf32, #stablehlo.bounds<2048, ?, 4096>>");

        // Fully static shapes never emit bounds, even when requested.
        let mut shape = Shape::of(DType::F32, [4, 4]);
        shape.dimension_bounds = vec![8, 8];
        shape.encode_bounds = true;
        assert_eq!(format!("{shape}"), "tensor<4x4xf32>");
    }

    #[test]
    fn test_tuple_emission() {
        let shape = Shape::tuple(vec![Shape::scalar(DType::F32), Shape::of(DType::I32, [2])]);
        assert_eq!(format!("{shape}"), "tuple<tensor<f32>, tensor<2xi32>>");
        assert!(shape.is_tuple());
    }

    #[test]
    fn test_size_and_compatibility() {
        let static_shape = Shape::of(DType::F32, [2, 3, 4]);
        assert_eq!(static_shape.size(), Some(24));
        assert_eq!(static_shape.known_size(), 24);
        assert_eq!(static_shape.byte_len(), Some(96));
        assert_eq!(static_shape.dim(-1), 4);

        let dynamic_shape = Shape::of(DType::F32, [DIM_UNKNOWN, 3, 4]);
        assert_eq!(dynamic_shape.size(), None);
        assert_eq!(dynamic_shape.known_size(), 12);
        assert!(dynamic_shape.is_dynamic());

        assert!(static_shape.compatible(&dynamic_shape));
        assert!(dynamic_shape.compatible(&static_shape));
        assert!(!static_shape.compatible(&Shape::of(DType::F32, [2, 3, 5])));
        assert!(!static_shape.compatible(&Shape::of(DType::F64, [2, 3, 4])));
        assert!(!static_shape.compatible(&Shape::of(DType::F32, [2, 3])));
    }

    #[test]
    fn test_sub_byte_byte_len() {
        assert_eq!(Shape::of(DType::I2, [8]).byte_len(), Some(2));
        assert_eq!(Shape::of(DType::I4, [3]).byte_len(), Some(2));
        assert_eq!(Shape::scalar(DType::Bool).byte_len(), Some(1));
    }

    /// Minimal parser for plain `tensor<…>` tokens, used to check the emission fixpoint.
    fn parse_shape(token: &str) -> Shape {
        let inner = token.strip_prefix("tensor<").unwrap().strip_suffix('>').unwrap();
        let mut parts = inner.split('x').collect::<Vec<_>>();
        let dtype_token = parts.pop().unwrap();
        let dtype = [
            DType::Bool,
            DType::I2,
            DType::I4,
            DType::I8,
            DType::I16,
            DType::I32,
            DType::I64,
            DType::U2,
            DType::U4,
            DType::U8,
            DType::U16,
            DType::U32,
            DType::U64,
            DType::F16,
            DType::BF16,
            DType::F32,
            DType::F64,
        ]
        .into_iter()
        .find(|dtype| dtype.mlir_token() == dtype_token)
        .unwrap();
        let dimensions = parts
            .into_iter()
            .map(|part| if part == "?" { DIM_UNKNOWN } else { part.parse().unwrap() })
            .collect::<Vec<i64>>();
        Shape::of(dtype, dimensions)
    }

    #[test]
    fn test_emission_fixpoint() {
        // parse(emit(shape)) == shape for shapes expressible in the plain tensor grammar.
        let shapes = [
            Shape::scalar(DType::F32),
            Shape::of(DType::I64, [1]),
            Shape::of(DType::BF16, [2, 3, 4]),
            Shape::of(DType::U4, [16]),
            Shape::of(DType::F64, [DIM_UNKNOWN, 7]),
            Shape::of(DType::Bool, [DIM_UNKNOWN, DIM_UNKNOWN]),
        ];
        for shape in shapes {
            assert_eq!(parse_shape(&format!("{shape}")), shape);
        }
    }
}

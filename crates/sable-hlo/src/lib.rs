//! Typed StableHLO module builder: a language-neutral intermediate-representation constructor
//! with per-operation shape inference, lexically-nested closures used as operation regions,
//! symbolic/bounded dynamic shapes, and a constant-folding pass that specializes dynamic
//! reshape/broadcast operations whenever their shape tensors are statically resolvable.
//!
//! Modules serialize to MLIR text with the StableHLO dialect and are consumed by the PJRT
//! bridge for compilation and execution.

pub mod attributes;
pub mod builder;
pub mod constprop;
pub mod dtypes;
pub mod emit;
pub mod errors;
pub mod literals;
pub mod ops;
pub mod optypes;
pub mod quantization;
pub mod shapeinference;
pub mod shapes;

pub use attributes::Attribute;
pub use builder::{Builder, DynamicShapeOptions, FuncId, Value};
pub use dtypes::{DType, pack_sub_byte, unpack_sub_byte};
pub use errors::Error;
pub use literals::{Literal, LiteralElement};
pub use ops::{ConvolutionBuilder, DotGeneralAlgorithm, DotGeneralBuilder};
pub use optypes::{
    ComparisonDirection, ComparisonType, FftType, OpType, Precision, RngAlgorithm,
};
pub use quantization::Quantization;
pub use shapes::{DIM_UNKNOWN, Shape};

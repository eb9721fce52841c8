use std::fmt::Display;

/// Closed enumeration of the operation set understood by the builder. Each opcode knows its
/// dialect-qualified MLIR name; everything except [`OpType::Call`] lives in the `stablehlo`
/// dialect.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpType {
    // Elementwise binary.
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Power,
    Maximum,
    Minimum,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRightArithmetic,
    ShiftRightLogical,
    Atan2,
    Complex,

    // Elementwise unary.
    Abs,
    Cbrt,
    Ceil,
    Cosine,
    CountLeadingZeros,
    Exponential,
    ExponentialMinusOne,
    Floor,
    Imag,
    IsFinite,
    Log,
    LogPlusOne,
    Logistic,
    Negate,
    Not,
    PopulationCount,
    Real,
    RoundNearestAfz,
    RoundNearestEven,
    Rsqrt,
    Sign,
    Sine,
    Sqrt,
    Tan,
    Tanh,

    // Comparison and selection.
    Compare,
    Select,
    Clamp,

    // Constants and shapes.
    Constant,
    Iota,
    Reshape,
    BroadcastInDim,
    DynamicBroadcastInDim,
    DynamicReshape,
    GetDimensionSize,
    Transpose,
    Reverse,
    Concatenate,
    Slice,
    DynamicSlice,
    DynamicUpdateSlice,
    Pad,

    // Indexed access.
    Gather,
    Scatter,

    // Reductions and windows.
    Reduce,
    ReduceWindow,
    SelectAndScatter,
    Sort,

    // Control flow.
    While,
    If,
    Call,
    Return,

    // Type conversion.
    Convert,
    BitcastConvert,

    // Linear algebra and signal processing.
    DotGeneral,
    Convolution,
    Fft,

    // Randomness.
    RngBitGenerator,

    // Normalization.
    BatchNormInference,
    BatchNormTraining,
    BatchNormGrad,

    // Quantization.
    UniformQuantize,
    UniformDequantize,

    // Tuples.
    Tuple,
    GetTupleElement,
}

impl OpType {
    /// Dialect-qualified MLIR operation name (e.g., `stablehlo.add`, `func.call`).
    pub fn full_name(&self) -> &'static str {
        match self {
            Self::Add => "stablehlo.add",
            Self::Subtract => "stablehlo.subtract",
            Self::Multiply => "stablehlo.multiply",
            Self::Divide => "stablehlo.divide",
            Self::Remainder => "stablehlo.remainder",
            Self::Power => "stablehlo.power",
            Self::Maximum => "stablehlo.maximum",
            Self::Minimum => "stablehlo.minimum",
            Self::And => "stablehlo.and",
            Self::Or => "stablehlo.or",
            Self::Xor => "stablehlo.xor",
            Self::ShiftLeft => "stablehlo.shift_left",
            Self::ShiftRightArithmetic => "stablehlo.shift_right_arithmetic",
            Self::ShiftRightLogical => "stablehlo.shift_right_logical",
            Self::Atan2 => "stablehlo.atan2",
            Self::Complex => "stablehlo.complex",
            Self::Abs => "stablehlo.abs",
            Self::Cbrt => "stablehlo.cbrt",
            Self::Ceil => "stablehlo.ceil",
            Self::Cosine => "stablehlo.cosine",
            Self::CountLeadingZeros => "stablehlo.count_leading_zeros",
            Self::Exponential => "stablehlo.exponential",
            Self::ExponentialMinusOne => "stablehlo.exponential_minus_one",
            Self::Floor => "stablehlo.floor",
            Self::Imag => "stablehlo.imag",
            Self::IsFinite => "stablehlo.is_finite",
            Self::Log => "stablehlo.log",
            Self::LogPlusOne => "stablehlo.log_plus_one",
            Self::Logistic => "stablehlo.logistic",
            Self::Negate => "stablehlo.negate",
            Self::Not => "stablehlo.not",
            Self::PopulationCount => "stablehlo.popcnt",
            Self::Real => "stablehlo.real",
            Self::RoundNearestAfz => "stablehlo.round_nearest_afz",
            Self::RoundNearestEven => "stablehlo.round_nearest_even",
            Self::Rsqrt => "stablehlo.rsqrt",
            Self::Sign => "stablehlo.sign",
            Self::Sine => "stablehlo.sine",
            Self::Sqrt => "stablehlo.sqrt",
            Self::Tan => "stablehlo.tan",
            Self::Tanh => "stablehlo.tanh",
            Self::Compare => "stablehlo.compare",
            Self::Select => "stablehlo.select",
            Self::Clamp => "stablehlo.clamp",
            Self::Constant => "stablehlo.constant",
            Self::Iota => "stablehlo.iota",
            Self::Reshape => "stablehlo.reshape",
            Self::BroadcastInDim => "stablehlo.broadcast_in_dim",
            Self::DynamicBroadcastInDim => "stablehlo.dynamic_broadcast_in_dim",
            Self::DynamicReshape => "stablehlo.dynamic_reshape",
            Self::GetDimensionSize => "stablehlo.get_dimension_size",
            Self::Transpose => "stablehlo.transpose",
            Self::Reverse => "stablehlo.reverse",
            Self::Concatenate => "stablehlo.concatenate",
            Self::Slice => "stablehlo.slice",
            Self::DynamicSlice => "stablehlo.dynamic_slice",
            Self::DynamicUpdateSlice => "stablehlo.dynamic_update_slice",
            Self::Pad => "stablehlo.pad",
            Self::Gather => "stablehlo.gather",
            Self::Scatter => "stablehlo.scatter",
            Self::Reduce => "stablehlo.reduce",
            Self::ReduceWindow => "stablehlo.reduce_window",
            Self::SelectAndScatter => "stablehlo.select_and_scatter",
            Self::Sort => "stablehlo.sort",
            Self::While => "stablehlo.while",
            Self::If => "stablehlo.if",
            Self::Call => "func.call",
            Self::Return => "stablehlo.return",
            Self::Convert => "stablehlo.convert",
            Self::BitcastConvert => "stablehlo.bitcast_convert",
            Self::DotGeneral => "stablehlo.dot_general",
            Self::Convolution => "stablehlo.convolution",
            Self::Fft => "stablehlo.fft",
            Self::RngBitGenerator => "stablehlo.rng_bit_generator",
            Self::BatchNormInference => "stablehlo.batch_norm_inference",
            Self::BatchNormTraining => "stablehlo.batch_norm_training",
            Self::BatchNormGrad => "stablehlo.batch_norm_grad",
            Self::UniformQuantize => "stablehlo.uniform_quantize",
            Self::UniformDequantize => "stablehlo.uniform_dequantize",
            Self::Tuple => "stablehlo.tuple",
            Self::GetTupleElement => "stablehlo.get_tuple_element",
        }
    }
}

impl Display for OpType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.full_name())
    }
}

/// Direction of a [`OpType::Compare`] operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonDirection {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonDirection {
    pub fn mlir_token(&self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Gt => "GT",
            Self::Ge => "GE",
        }
    }

    /// Evaluates the comparison on two integers, as used by the shape evaluator.
    pub(crate) fn evaluate(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// Element interpretation used by a [`OpType::Compare`] operation. Booleans compare as
/// [`ComparisonType::Unsigned`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonType {
    Float,
    TotalOrder,
    Signed,
    Unsigned,
}

impl ComparisonType {
    pub fn mlir_token(&self) -> &'static str {
        match self {
            Self::Float => "FLOAT",
            Self::TotalOrder => "TOTALORDER",
            Self::Signed => "SIGNED",
            Self::Unsigned => "UNSIGNED",
        }
    }
}

/// Precision of a [`OpType::DotGeneral`] or [`OpType::Convolution`] operand.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Precision {
    #[default]
    Default,
    High,
    Highest,
}

impl Precision {
    pub fn mlir_token(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::High => "HIGH",
            Self::Highest => "HIGHEST",
        }
    }
}

/// Kind of FFT computed by [`OpType::Fft`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FftType {
    Forward,
    Inverse,
    ForwardReal,
    InverseReal,
}

impl FftType {
    pub fn mlir_token(&self) -> &'static str {
        match self {
            Self::Forward => "FFT",
            Self::Inverse => "IFFT",
            Self::ForwardReal => "RFFT",
            Self::InverseReal => "IRFFT",
        }
    }
}

/// Algorithm used by [`OpType::RngBitGenerator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RngAlgorithm {
    Default,
    ThreeFry,
    Philox,
}

impl RngAlgorithm {
    pub fn mlir_token(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::ThreeFry => "THREE_FRY",
            Self::Philox => "PHILOX",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(OpType::Add.full_name(), "stablehlo.add");
        assert_eq!(OpType::Call.full_name(), "func.call");
        assert_eq!(OpType::DynamicBroadcastInDim.full_name(), "stablehlo.dynamic_broadcast_in_dim");
        assert_eq!(format!("{}", OpType::While), "stablehlo.while");
    }

    #[test]
    fn test_comparison_evaluation() {
        assert!(ComparisonDirection::Eq.evaluate(3, 3));
        assert!(ComparisonDirection::Ne.evaluate(3, 4));
        assert!(ComparisonDirection::Lt.evaluate(3, 4));
        assert!(ComparisonDirection::Le.evaluate(4, 4));
        assert!(ComparisonDirection::Gt.evaluate(5, 4));
        assert!(ComparisonDirection::Ge.evaluate(4, 4));
        assert!(!ComparisonDirection::Lt.evaluate(4, 4));
        assert_eq!(ComparisonDirection::Ge.mlir_token(), "GE");
        assert_eq!(ComparisonType::Float.mlir_token(), "FLOAT");
    }
}

//! Pure per-opcode shape inference. Every function here maps input [`Shape`]s and attributes to
//! output shapes without touching the IR, accepting any mix of concrete and [`DIM_UNKNOWN`]
//! dimensions and propagating unknowns.

use crate::{DIM_UNKNOWN, DType, Error, FftType, OpType, Shape};

/// Adjusts a possibly-negative axis to `rank`, failing when out of bounds.
pub fn adjust_axis_to_rank(axis: i64, rank: usize) -> Result<usize, Error> {
    let adjusted = if axis < 0 { axis + rank as i64 } else { axis };
    if adjusted < 0 || adjusted >= rank as i64 {
        return Err(Error::invalid_axis(format!("axis {axis} out of bounds for rank {rank}")));
    }
    Ok(adjusted as usize)
}

/// Merges two compatible dimension vectors, preferring the known side of each pair.
fn merge_dimensions(lhs: &Shape, rhs: &Shape) -> Vec<i64> {
    lhs.dimensions
        .iter()
        .zip(&rhs.dimensions)
        .map(|(&a, &b)| if a >= 0 { a } else { b })
        .collect()
}

fn check_same_dtype(op: OpType, lhs: &Shape, rhs: &Shape) -> Result<(), Error> {
    if lhs.dtype != rhs.dtype {
        return Err(Error::dtype_mismatch(format!(
            "{op} requires matching operand dtypes, got {} and {}",
            lhs.dtype(),
            rhs.dtype()
        )));
    }
    Ok(())
}

fn check_compatible(op: OpType, lhs: &Shape, rhs: &Shape) -> Result<(), Error> {
    if lhs.rank() != rhs.rank() {
        return Err(Error::rank_mismatch(format!(
            "{op} requires matching operand ranks, got {} and {}",
            lhs.rank(),
            rhs.rank()
        )));
    }
    for (axis, (&a, &b)) in lhs.dimensions.iter().zip(&rhs.dimensions).enumerate() {
        if a >= 0 && b >= 0 && a != b {
            return Err(Error::dim_mismatch(format!(
                "{op} operand dimensions must be compatible, got {a} and {b} on axis {axis}"
            )));
        }
    }
    Ok(())
}

/// Elementwise binary operation: equal dtypes and ranks, pairwise-compatible dimensions. The
/// output takes the known side of each dimension pair.
pub fn binary_op(op: OpType, lhs: &Shape, rhs: &Shape) -> Result<Shape, Error> {
    check_same_dtype(op, lhs, rhs)?;
    check_compatible(op, lhs, rhs)?;
    let dtype = lhs.dtype();
    match op {
        OpType::And | OpType::Or | OpType::Xor => {
            if !dtype.is_bool() && !dtype.is_integer() {
                return Err(Error::dtype_mismatch(format!(
                    "{op} requires boolean or integer operands, got {dtype}"
                )));
            }
        }
        OpType::ShiftLeft | OpType::ShiftRightArithmetic | OpType::ShiftRightLogical => {
            if !dtype.is_integer() {
                return Err(Error::dtype_mismatch(format!(
                    "{op} requires integer operands, got {dtype}"
                )));
            }
        }
        OpType::Atan2 | OpType::Power => {
            if !dtype.is_float() && !dtype.is_complex() && !(op == OpType::Power && dtype.is_integer()) {
                return Err(Error::dtype_mismatch(format!(
                    "{op} is not defined for {dtype} operands"
                )));
            }
        }
        _ => {
            if dtype.is_bool() {
                return Err(Error::dtype_mismatch(format!("{op} is not defined for boolean operands")));
            }
        }
    }
    Ok(lhs.with_dimensions(merge_dimensions(lhs, rhs)))
}

/// Elementwise unary operation. The output keeps the operand dimensions; the dtype follows the
/// operand except for [`OpType::Abs`] on complex inputs, which yields the underlying float type.
pub fn unary_op(op: OpType, operand: &Shape) -> Result<Shape, Error> {
    let dtype = operand.dtype();
    let output_dtype = match op {
        OpType::Not => {
            if !dtype.is_bool() && !dtype.is_integer() {
                return Err(Error::dtype_mismatch(format!("{op} requires boolean or integer operands, got {dtype}")));
            }
            dtype
        }
        OpType::PopulationCount | OpType::CountLeadingZeros => {
            if !dtype.is_integer() {
                return Err(Error::dtype_mismatch(format!("{op} requires integer operands, got {dtype}")));
            }
            dtype
        }
        OpType::Ceil
        | OpType::Floor
        | OpType::RoundNearestAfz
        | OpType::RoundNearestEven => {
            if !dtype.is_float() {
                return Err(Error::dtype_mismatch(format!("{op} requires float operands, got {dtype}")));
            }
            dtype
        }
        OpType::Cbrt
        | OpType::Cosine
        | OpType::Exponential
        | OpType::ExponentialMinusOne
        | OpType::Log
        | OpType::LogPlusOne
        | OpType::Logistic
        | OpType::Rsqrt
        | OpType::Sine
        | OpType::Sqrt
        | OpType::Tan
        | OpType::Tanh => {
            if !dtype.is_float() && !dtype.is_complex() {
                return Err(Error::dtype_mismatch(format!("{op} requires float or complex operands, got {dtype}")));
            }
            dtype
        }
        OpType::Abs => match dtype {
            DType::C64 => DType::F32,
            DType::C128 => DType::F64,
            _ if dtype.is_signed_integer() || dtype.is_float() => dtype,
            _ => {
                return Err(Error::dtype_mismatch(format!(
                    "{op} requires signed integer, float, or complex operands, got {dtype}"
                )));
            }
        },
        OpType::Negate | OpType::Sign => {
            if dtype.is_bool() {
                return Err(Error::dtype_mismatch(format!("{op} is not defined for boolean operands")));
            }
            dtype
        }
        _ => dtype,
    };
    Ok(operand.with_dtype(output_dtype))
}

/// [`OpType::Compare`]: equal dtypes, compatible dimensions, boolean output.
pub fn compare(lhs: &Shape, rhs: &Shape) -> Result<Shape, Error> {
    check_same_dtype(OpType::Compare, lhs, rhs)?;
    check_compatible(OpType::Compare, lhs, rhs)?;
    Ok(Shape::of(DType::Bool, merge_dimensions(lhs, rhs)))
}

/// [`OpType::Select`]: boolean predicate (scalar or compatible with the branches), branches
/// pairwise compatible. The output follows `on_true`.
pub fn select(pred: &Shape, on_true: &Shape, on_false: &Shape) -> Result<Shape, Error> {
    if !pred.dtype().is_bool() {
        return Err(Error::dtype_mismatch(format!(
            "select predicate must be boolean, got {}",
            pred.dtype()
        )));
    }
    check_same_dtype(OpType::Select, on_true, on_false)?;
    check_compatible(OpType::Select, on_true, on_false)?;
    if !pred.is_scalar() {
        check_compatible(OpType::Select, pred, &on_true.with_dtype(pred.dtype()))?;
    }
    Ok(on_true.with_dimensions(merge_dimensions(on_true, on_false)))
}

/// [`OpType::Clamp`]: `min` and `max` are scalars or shaped like `x`; booleans and complex
/// numbers are rejected.
pub fn clamp(min: &Shape, x: &Shape, max: &Shape) -> Result<Shape, Error> {
    let dtype = x.dtype();
    if dtype.is_bool() || dtype.is_complex() {
        return Err(Error::dtype_mismatch(format!("clamp is not defined for {dtype} operands")));
    }
    for (name, bound) in [("min", min), ("max", max)] {
        check_same_dtype(OpType::Clamp, x, bound)?;
        if !bound.is_scalar() && bound.rank() != x.rank() {
            return Err(Error::rank_mismatch(format!(
                "clamp {name} must be a scalar or have the operand shape, got rank {} vs {}",
                bound.rank(),
                x.rank()
            )));
        }
        if !bound.is_scalar() {
            check_compatible(OpType::Clamp, x, bound)?;
        }
    }
    Ok(x.clone())
}

/// [`OpType::Complex`]: pairs two identically-shaped float tensors into a complex tensor.
pub fn complex(real: &Shape, imag: &Shape) -> Result<Shape, Error> {
    check_same_dtype(OpType::Complex, real, imag)?;
    check_compatible(OpType::Complex, real, imag)?;
    let dtype = match real.dtype() {
        DType::F32 => DType::C64,
        DType::F64 => DType::C128,
        dtype => {
            return Err(Error::dtype_mismatch(format!(
                "complex requires f32 or f64 operands, got {dtype}"
            )));
        }
    };
    Ok(real.with_dtype(dtype))
}

/// [`OpType::Real`] / [`OpType::Imag`]: projects a complex tensor to its float component type.
pub fn real_or_imag(operand: &Shape) -> Result<Shape, Error> {
    let dtype = match operand.dtype() {
        DType::C64 => DType::F32,
        DType::C128 => DType::F64,
        dtype => {
            return Err(Error::dtype_mismatch(format!(
                "real/imag require complex operands, got {dtype}"
            )));
        }
    };
    Ok(operand.with_dtype(dtype))
}

/// [`OpType::IsFinite`]: float input, boolean output of the same shape.
pub fn is_finite(operand: &Shape) -> Result<Shape, Error> {
    if !operand.dtype().is_float() {
        return Err(Error::dtype_mismatch(format!(
            "is_finite requires float operands, got {}",
            operand.dtype()
        )));
    }
    Ok(operand.with_dtype(DType::Bool))
}

/// [`OpType::Iota`]: numeric dtype, axis within bounds.
pub fn iota(shape: &Shape, axis: i64) -> Result<Shape, Error> {
    if shape.dtype().is_bool() {
        return Err(Error::dtype_mismatch("iota is not defined for boolean outputs".to_string()));
    }
    adjust_axis_to_rank(axis, shape.rank())?;
    Ok(shape.clone())
}

/// [`OpType::Concatenate`]: equal dtypes and ranks, non-axis dimensions compatible, the
/// concatenation axis sums (unknown when any input is unknown).
pub fn concatenate(shapes: &[Shape], axis: i64) -> Result<Shape, Error> {
    let first = &shapes[0];
    if first.rank() == 0 {
        return Err(Error::rank_mismatch("concatenate does not accept scalars".to_string()));
    }
    let axis = adjust_axis_to_rank(axis, first.rank())?;
    let mut dimensions = first.dimensions.clone();
    for shape in &shapes[1..] {
        check_same_dtype(OpType::Concatenate, first, shape)?;
        if shape.rank() != first.rank() {
            return Err(Error::rank_mismatch(format!(
                "concatenate requires matching ranks, got {} and {}",
                first.rank(),
                shape.rank()
            )));
        }
        for (i, (&a, &b)) in dimensions.iter().zip(&shape.dimensions).enumerate() {
            if i != axis && a >= 0 && b >= 0 && a != b {
                return Err(Error::dim_mismatch(format!(
                    "concatenate operands must match on non-concatenated axes, got {a} and {b} on axis {i}"
                )));
            }
        }
        dimensions[axis] = if dimensions[axis] < 0 || shape.dimensions[axis] < 0 {
            DIM_UNKNOWN
        } else {
            dimensions[axis] + shape.dimensions[axis]
        };
        for (i, dim) in dimensions.iter_mut().enumerate() {
            if i != axis && *dim < 0 && shape.dimensions[i] >= 0 {
                *dim = shape.dimensions[i];
            }
        }
    }
    Ok(first.with_dimensions(dimensions))
}

/// [`OpType::BroadcastInDim`] validation: `axes_mapping` has one entry per operand axis, each
/// mapping to a distinct in-bounds target axis whose extent matches the operand extent (or the
/// operand extent is 1, or either side is unknown).
pub fn broadcast_in_dim(operand: &Shape, target: &Shape, axes_mapping: &[i64]) -> Result<(), Error> {
    if axes_mapping.len() != operand.rank() {
        return Err(Error::invalid_attribute(format!(
            "broadcast_dimensions must have one entry per operand axis, got {} for rank {}",
            axes_mapping.len(),
            operand.rank()
        )));
    }
    if operand.dtype != target.dtype {
        return Err(Error::dtype_mismatch(format!(
            "broadcast_in_dim requires matching dtypes, got {} and {}",
            operand.dtype(),
            target.dtype()
        )));
    }
    let mut seen = vec![false; target.rank()];
    for (operand_axis, &target_axis) in axes_mapping.iter().enumerate() {
        let target_axis = adjust_axis_to_rank(target_axis, target.rank())?;
        if std::mem::replace(&mut seen[target_axis], true) {
            return Err(Error::invalid_attribute(format!(
                "broadcast_dimensions maps two operand axes to target axis {target_axis}"
            )));
        }
        let operand_dim = operand.dimensions[operand_axis];
        let target_dim = target.dimensions[target_axis];
        if operand_dim >= 0 && target_dim >= 0 && operand_dim != 1 && operand_dim != target_dim {
            return Err(Error::dim_mismatch(format!(
                "cannot broadcast operand axis {operand_axis} of extent {operand_dim} to target extent {target_dim}"
            )));
        }
    }
    Ok(())
}

/// [`OpType::DotGeneral`]: batch axes first, then the lhs non-contracting non-batch axes, then
/// the rhs ones. Contracting and batch dimensions must be pairwise compatible. The output dtype
/// is caller-specified (mixed-precision accumulation).
#[allow(clippy::too_many_arguments)]
pub fn dot_general(
    lhs: &Shape,
    lhs_contracting: &[i64],
    lhs_batch: &[i64],
    rhs: &Shape,
    rhs_contracting: &[i64],
    rhs_batch: &[i64],
    output_dtype: DType,
) -> Result<Shape, Error> {
    check_same_dtype(OpType::DotGeneral, lhs, rhs)?;
    if lhs_contracting.len() != rhs_contracting.len() {
        return Err(Error::invalid_attribute(format!(
            "dot_general requires the same number of contracting axes on both sides, got {} and {}",
            lhs_contracting.len(),
            rhs_contracting.len()
        )));
    }
    if lhs_batch.len() != rhs_batch.len() {
        return Err(Error::invalid_attribute(format!(
            "dot_general requires the same number of batch axes on both sides, got {} and {}",
            lhs_batch.len(),
            rhs_batch.len()
        )));
    }

    let resolve = |shape: &Shape, axes: &[i64]| -> Result<Vec<usize>, Error> {
        axes.iter().map(|&axis| adjust_axis_to_rank(axis, shape.rank())).collect()
    };
    let lhs_contracting = resolve(lhs, lhs_contracting)?;
    let rhs_contracting = resolve(rhs, rhs_contracting)?;
    let lhs_batch = resolve(lhs, lhs_batch)?;
    let rhs_batch = resolve(rhs, rhs_batch)?;

    for (&a, &b) in lhs_contracting.iter().zip(&rhs_contracting) {
        let (da, db) = (lhs.dimensions[a], rhs.dimensions[b]);
        if da >= 0 && db >= 0 && da != db {
            return Err(Error::dim_mismatch(format!(
                "dot_general contracting dimensions must match, got {da} (axis {a}) and {db} (axis {b})"
            )));
        }
    }

    let mut dimensions = Vec::with_capacity(lhs.rank() + rhs.rank());
    for (&a, &b) in lhs_batch.iter().zip(&rhs_batch) {
        let (da, db) = (lhs.dimensions[a], rhs.dimensions[b]);
        if da >= 0 && db >= 0 && da != db {
            return Err(Error::dim_mismatch(format!(
                "dot_general batch dimensions must match, got {da} (axis {a}) and {db} (axis {b})"
            )));
        }
        dimensions.push(if da >= 0 { da } else { db });
    }
    for axis in 0..lhs.rank() {
        if !lhs_batch.contains(&axis) && !lhs_contracting.contains(&axis) {
            dimensions.push(lhs.dimensions[axis]);
        }
    }
    for axis in 0..rhs.rank() {
        if !rhs_batch.contains(&axis) && !rhs_contracting.contains(&axis) {
            dimensions.push(rhs.dimensions[axis]);
        }
    }
    Ok(Shape::of(output_dtype, dimensions))
}

/// [`OpType::Slice`] with strides: `starts`/`limits`/`strides` have one entry per axis, and the
/// output extent on each axis is `ceil((limit - start) / stride)`. Bounds are only checked on
/// static dimensions.
pub fn slice(operand: &Shape, starts: &[i64], limits: &[i64], strides: &[i64]) -> Result<Shape, Error> {
    let rank = operand.rank();
    if starts.len() != rank || limits.len() != rank || strides.len() != rank {
        return Err(Error::invalid_attribute(format!(
            "slice requires starts/limits/strides with one entry per axis, got {}/{}/{} for rank {rank}",
            starts.len(),
            limits.len(),
            strides.len()
        )));
    }
    let mut dimensions = Vec::with_capacity(rank);
    for axis in 0..rank {
        let (start, limit, stride) = (starts[axis], limits[axis], strides[axis]);
        if stride < 1 {
            return Err(Error::invalid_attribute(format!(
                "slice strides must be >= 1, got {stride} on axis {axis}"
            )));
        }
        if start < 0 || limit < start {
            return Err(Error::invalid_attribute(format!(
                "slice requires 0 <= start <= limit, got start={start} limit={limit} on axis {axis}"
            )));
        }
        let dim = operand.dimensions[axis];
        if dim >= 0 && limit > dim {
            return Err(Error::dim_mismatch(format!(
                "slice limit {limit} exceeds dimension {dim} on axis {axis}"
            )));
        }
        dimensions.push((limit - start + stride - 1) / stride);
    }
    Ok(operand.with_dimensions(dimensions))
}

/// [`OpType::DynamicSlice`]: static `slice_sizes` bounded by the operand dimensions.
pub fn dynamic_slice(operand: &Shape, start_count: usize, slice_sizes: &[i64]) -> Result<Shape, Error> {
    let rank = operand.rank();
    if start_count != rank || slice_sizes.len() != rank {
        return Err(Error::invalid_attribute(format!(
            "dynamic_slice requires one start index and one slice size per axis, got {start_count} and {} for rank {rank}",
            slice_sizes.len()
        )));
    }
    for (axis, &size) in slice_sizes.iter().enumerate() {
        let dim = operand.dimensions[axis];
        if size < 0 || (dim >= 0 && size > dim) {
            return Err(Error::dim_mismatch(format!(
                "dynamic_slice size {size} is invalid for dimension {dim} on axis {axis}"
            )));
        }
    }
    Ok(operand.with_dimensions(slice_sizes.to_vec()))
}

/// [`OpType::Pad`]: per-axis `low + dim + max(dim - 1, 0) * interior + high`; interior padding
/// cannot be negative, and the result extent cannot be negative.
pub fn pad(x: &Shape, fill: &Shape, low: &[i64], high: &[i64], interior: &[i64]) -> Result<Shape, Error> {
    check_same_dtype(OpType::Pad, x, fill)?;
    if !fill.is_scalar() {
        return Err(Error::rank_mismatch("pad fill value must be a scalar".to_string()));
    }
    let rank = x.rank();
    if low.len() != rank || high.len() != rank || interior.len() != rank {
        return Err(Error::invalid_attribute(format!(
            "pad requires low/high/interior with one entry per axis, got {}/{}/{} for rank {rank}",
            low.len(),
            high.len(),
            interior.len()
        )));
    }
    let mut dimensions = Vec::with_capacity(rank);
    for axis in 0..rank {
        if interior[axis] < 0 {
            return Err(Error::invalid_attribute(format!(
                "pad interior padding cannot be negative, got {} on axis {axis}",
                interior[axis]
            )));
        }
        let dim = x.dimensions[axis];
        if dim < 0 {
            dimensions.push(DIM_UNKNOWN);
            continue;
        }
        let padded = low[axis] + dim + (dim - 1).max(0) * interior[axis] + high[axis];
        if padded < 0 {
            return Err(Error::dim_mismatch(format!(
                "pad produces a negative extent {padded} on axis {axis}"
            )));
        }
        dimensions.push(padded);
    }
    Ok(x.with_dimensions(dimensions))
}

/// [`OpType::Transpose`]: `permutation` must be a permutation of the operand axes;
/// `output[i] = operand[permutation[i]]`.
pub fn transpose(x: &Shape, permutation: &[i64]) -> Result<Shape, Error> {
    let rank = x.rank();
    if permutation.len() != rank {
        return Err(Error::invalid_attribute(format!(
            "transpose permutation must have one entry per axis, got {} for rank {rank}",
            permutation.len()
        )));
    }
    let mut seen = vec![false; rank];
    let mut dimensions = Vec::with_capacity(rank);
    for &axis in permutation {
        let axis = adjust_axis_to_rank(axis, rank)?;
        if std::mem::replace(&mut seen[axis], true) {
            return Err(Error::invalid_attribute(format!(
                "transpose permutation repeats axis {axis}"
            )));
        }
        dimensions.push(x.dimensions[axis]);
    }
    Ok(x.with_dimensions(dimensions))
}

/// [`OpType::BitcastConvert`]: same-width dtypes keep the dimensions; widening requires the
/// trailing axis to equal the width ratio and removes it; narrowing appends a trailing axis of
/// the inverse ratio.
pub fn bitcast_convert(operand: &Shape, target: DType) -> Result<Shape, Error> {
    let from = operand.dtype().size_in_bytes();
    let to = target.size_in_bytes();
    let mut dimensions = operand.dimensions.clone();
    if to == from {
        // Same width, only the dtype changes.
    } else if to > from {
        let ratio = (to / from) as i64;
        match dimensions.pop() {
            Some(last) if last == ratio => {}
            Some(last) => {
                return Err(Error::dim_mismatch(format!(
                    "bitcast_convert to a wider type requires a trailing axis of extent {ratio}, got {last}"
                )));
            }
            None => {
                return Err(Error::rank_mismatch(
                    "bitcast_convert to a wider type requires a non-scalar operand".to_string(),
                ));
            }
        }
    } else {
        dimensions.push((from / to) as i64);
    }
    let mut shape = operand.with_dimensions(dimensions);
    shape.dtype = Some(target);
    Ok(shape)
}

/// [`OpType::Fft`]: complex transforms keep the dimensions; real transforms adjust the trailing
/// axis (`n -> n / 2 + 1` forward, `n -> fft_length` inverse).
pub fn fft(x: &Shape, fft_type: FftType, fft_length: &[i64]) -> Result<Shape, Error> {
    if fft_length.is_empty() || fft_length.len() > x.rank() {
        return Err(Error::invalid_attribute(format!(
            "fft_length must cover between 1 and rank axes, got {} for rank {}",
            fft_length.len(),
            x.rank()
        )));
    }
    let dtype = x.dtype();
    let mut dimensions = x.dimensions.clone();
    let last = dimensions.len() - 1;
    let output_dtype = match fft_type {
        FftType::Forward | FftType::Inverse => {
            if !dtype.is_complex() {
                return Err(Error::dtype_mismatch(format!("{fft_type:?} FFT requires complex input, got {dtype}")));
            }
            dtype
        }
        FftType::ForwardReal => {
            let output = match dtype {
                DType::F32 => DType::C64,
                DType::F64 => DType::C128,
                _ => {
                    return Err(Error::dtype_mismatch(format!("RFFT requires float input, got {dtype}")));
                }
            };
            dimensions[last] = fft_length[fft_length.len() - 1] / 2 + 1;
            output
        }
        FftType::InverseReal => {
            let output = match dtype {
                DType::C64 => DType::F32,
                DType::C128 => DType::F64,
                _ => {
                    return Err(Error::dtype_mismatch(format!("IRFFT requires complex input, got {dtype}")));
                }
            };
            dimensions[last] = fft_length[fft_length.len() - 1];
            output
        }
    };
    Ok(Shape::of(output_dtype, dimensions))
}

/// [`OpType::Gather`]: derives the output from the startIndices batch dimensions and the
/// non-collapsed, non-batching operand slice sizes. See the StableHLO specification for the
/// full semantics; the hard constraints checked here are:
///
///   - `rank(operand) == len(operand_batching) + len(collapsed) + len(offset_output_axes)`;
///   - `slice_sizes` covers every operand axis;
///   - `slice_sizes[collapsed[i]] == 1` and `slice_sizes[operand_batching[i]] == 1`.
#[allow(clippy::too_many_arguments)]
pub fn gather(
    operand: &Shape,
    start_indices: &Shape,
    index_vector_axis: i64,
    offset_output_axes: &[i64],
    collapsed_slice_axes: &[i64],
    operand_batching_axes: &[i64],
    start_indices_batching_axes: &[i64],
    start_index_map: &[i64],
    slice_sizes: &[i64],
) -> Result<Shape, Error> {
    let operand_rank = operand.rank();
    let indices_rank = start_indices.rank();
    if !start_indices.dtype().is_integer() {
        return Err(Error::dtype_mismatch(format!(
            "gather start indices must be integers, got {}",
            start_indices.dtype()
        )));
    }
    if operand_rank
        != operand_batching_axes.len() + collapsed_slice_axes.len() + offset_output_axes.len()
    {
        return Err(Error::invalid_attribute(format!(
            "gather requires rank(operand) == len(operand_batching) + len(collapsed) + len(offset_axes), got {operand_rank} != {} + {} + {}",
            operand_batching_axes.len(),
            collapsed_slice_axes.len(),
            offset_output_axes.len()
        )));
    }
    if slice_sizes.len() != operand_rank {
        return Err(Error::invalid_attribute(format!(
            "gather slice_sizes must have one entry per operand axis, got {} for rank {operand_rank}",
            slice_sizes.len()
        )));
    }
    if index_vector_axis < 0 || index_vector_axis > indices_rank as i64 {
        return Err(Error::invalid_axis(format!(
            "gather index_vector_axis {index_vector_axis} out of bounds for start indices rank {indices_rank}"
        )));
    }
    for (name, axes) in [("collapsed_slice_axes", collapsed_slice_axes), ("operand_batching_axes", operand_batching_axes)] {
        for &axis in axes {
            let axis = adjust_axis_to_rank(axis, operand_rank)?;
            if slice_sizes[axis] != 1 {
                return Err(Error::invalid_attribute(format!(
                    "gather requires slice_sizes[{axis}] == 1 for {name}, got {}",
                    slice_sizes[axis]
                )));
            }
        }
    }
    if start_indices_batching_axes.len() != operand_batching_axes.len() {
        return Err(Error::invalid_attribute(format!(
            "gather requires matching operand/start-indices batching axes, got {} and {}",
            operand_batching_axes.len(),
            start_indices_batching_axes.len()
        )));
    }
    if index_vector_axis < indices_rank as i64 {
        let index_vector_dim = start_indices.dimensions[index_vector_axis as usize];
        if index_vector_dim >= 0 && start_index_map.len() as i64 != index_vector_dim {
            return Err(Error::invalid_attribute(format!(
                "gather start_index_map must match the index vector extent, got {} for extent {index_vector_dim}",
                start_index_map.len()
            )));
        }
    }

    // Batch dimensions come from startIndices, skipping the index vector axis.
    let mut batch_dimensions = Vec::with_capacity(indices_rank);
    for axis in 0..indices_rank {
        if axis as i64 != index_vector_axis {
            batch_dimensions.push(start_indices.dimensions[axis]);
        }
    }

    // Offset dimensions come from the operand slice sizes, skipping collapsed and batching axes.
    let mut offset_dimensions = Vec::with_capacity(offset_output_axes.len());
    for axis in 0..operand_rank {
        let axis_i64 = axis as i64;
        if !collapsed_slice_axes.contains(&axis_i64) && !operand_batching_axes.contains(&axis_i64) {
            offset_dimensions.push(slice_sizes[axis]);
        }
    }

    let output_rank = batch_dimensions.len() + offset_dimensions.len();
    let mut offset_positions = offset_output_axes.to_vec();
    offset_positions.sort_unstable();
    for &position in &offset_positions {
        if position < 0 || position >= output_rank as i64 {
            return Err(Error::invalid_axis(format!(
                "gather offset output axis {position} out of bounds for output rank {output_rank}"
            )));
        }
    }

    let mut dimensions = vec![0i64; output_rank];
    let mut batch_iter = batch_dimensions.into_iter();
    let mut offset_iter = offset_dimensions.into_iter();
    for (position, dim) in dimensions.iter_mut().enumerate() {
        if offset_positions.binary_search(&(position as i64)).is_ok() {
            *dim = offset_iter.next().unwrap();
        } else {
            *dim = batch_iter.next().ok_or_else(|| {
                Error::invalid_attribute("gather batch dimensions exhausted".to_string())
            })?;
        }
    }
    Ok(operand.with_dimensions(dimensions))
}

/// Checks the arity and element types of a reducer-style closure signature:
/// `2 * N` scalar inputs and `N` scalar outputs.
fn check_reducer_signature(
    op: OpType,
    input_count: usize,
    closure_inputs: &[Shape],
    closure_outputs: &[Shape],
) -> Result<(), Error> {
    if closure_inputs.len() != 2 * input_count {
        return Err(Error::invalid_attribute(format!(
            "{op} reducer must take {} scalar inputs (2 per operand), got {}",
            2 * input_count,
            closure_inputs.len()
        )));
    }
    if closure_outputs.len() != input_count {
        return Err(Error::invalid_attribute(format!(
            "{op} reducer must return {input_count} values, got {}",
            closure_outputs.len()
        )));
    }
    for shape in closure_inputs.iter().chain(closure_outputs) {
        if !shape.is_scalar() {
            return Err(Error::rank_mismatch(format!(
                "{op} reducer arguments and results must be scalars, got {shape}"
            )));
        }
    }
    Ok(())
}

/// [`OpType::Reduce`]: removes the reduced axes; the result dtype follows the reducer outputs.
pub fn reduce(
    inputs: &[Shape],
    init_values: &[Shape],
    reducer_inputs: &[Shape],
    reducer_outputs: &[Shape],
    axes: &[i64],
) -> Result<Vec<Shape>, Error> {
    if inputs.len() != init_values.len() {
        return Err(Error::invalid_attribute(format!(
            "reduce requires one initial value per input, got {} inputs and {} initial values",
            inputs.len(),
            init_values.len()
        )));
    }
    check_reducer_signature(OpType::Reduce, inputs.len(), reducer_inputs, reducer_outputs)?;
    let rank = inputs[0].rank();
    let mut reduced = vec![false; rank];
    for &axis in axes {
        let axis = adjust_axis_to_rank(axis, rank)?;
        if std::mem::replace(&mut reduced[axis], true) {
            return Err(Error::invalid_axis(format!("reduce axis {axis} repeated")));
        }
    }
    inputs
        .iter()
        .zip(reducer_outputs)
        .map(|(input, output)| {
            if input.rank() != rank {
                return Err(Error::rank_mismatch(
                    "reduce inputs must have matching ranks".to_string(),
                ));
            }
            let dimensions = input
                .dimensions
                .iter()
                .enumerate()
                .filter(|(axis, _)| !reduced[*axis])
                .map(|(_, &dim)| dim)
                .collect::<Vec<_>>();
            Ok(Shape::of(output.dtype(), dimensions))
        })
        .collect()
}

/// Windowed output extent used by reduce-window and convolution:
/// `(dilated_input + pad_lo + pad_hi - dilated_window) / stride + 1`, where dilation inflates
/// `n` to `(n - 1) * dilation + 1`. Unknown inputs propagate.
fn windowed_output_dim(
    input: i64,
    window: i64,
    stride: i64,
    base_dilation: i64,
    window_dilation: i64,
    pad_low: i64,
    pad_high: i64,
) -> Result<i64, Error> {
    if input < 0 || window < 0 {
        return Ok(DIM_UNKNOWN);
    }
    let dilated_input = if input == 0 { 0 } else { (input - 1) * base_dilation + 1 };
    let dilated_window = (window - 1) * window_dilation + 1;
    let padded = dilated_input + pad_low + pad_high;
    if padded < dilated_window {
        return Err(Error::dim_mismatch(format!(
            "window of dilated extent {dilated_window} does not fit input of padded extent {padded}"
        )));
    }
    Ok((padded - dilated_window) / stride + 1)
}

/// [`OpType::ReduceWindow`]: element-wise window arithmetic on every axis; the result dtype
/// follows the reducer outputs.
#[allow(clippy::too_many_arguments)]
pub fn reduce_window(
    inputs: &[Shape],
    init_values: &[Shape],
    reducer_inputs: &[Shape],
    reducer_outputs: &[Shape],
    window_dimensions: &[i64],
    strides: &[i64],
    base_dilations: &[i64],
    window_dilations: &[i64],
    paddings: &[(i64, i64)],
) -> Result<Vec<Shape>, Error> {
    if inputs.len() != init_values.len() {
        return Err(Error::invalid_attribute(format!(
            "reduce_window requires one initial value per input, got {} inputs and {} initial values",
            inputs.len(),
            init_values.len()
        )));
    }
    check_reducer_signature(OpType::ReduceWindow, inputs.len(), reducer_inputs, reducer_outputs)?;
    let rank = inputs[0].rank();
    for (name, values) in [
        ("window_dimensions", window_dimensions),
        ("window_strides", strides),
        ("base_dilations", base_dilations),
        ("window_dilations", window_dilations),
    ] {
        if values.len() != rank {
            return Err(Error::invalid_attribute(format!(
                "reduce_window {name} must have one entry per axis, got {} for rank {rank}",
                values.len()
            )));
        }
    }
    if paddings.len() != rank {
        return Err(Error::invalid_attribute(format!(
            "reduce_window padding must have one entry per axis, got {} for rank {rank}",
            paddings.len()
        )));
    }
    inputs
        .iter()
        .zip(reducer_outputs)
        .map(|(input, output)| {
            let dimensions = (0..rank)
                .map(|axis| {
                    windowed_output_dim(
                        input.dimensions[axis],
                        window_dimensions[axis],
                        strides[axis],
                        base_dilations[axis],
                        window_dilations[axis],
                        paddings[axis].0,
                        paddings[axis].1,
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Shape::of(output.dtype(), dimensions))
        })
        .collect()
}

/// [`OpType::Scatter`]: outputs keep the input shapes, with dtypes taken from the update
/// computation's results.
#[allow(clippy::too_many_arguments)]
pub fn scatter(
    inputs: &[Shape],
    scatter_indices: &Shape,
    updates: &[Shape],
    update_window_axes: &[i64],
    inserted_window_axes: &[i64],
    input_batching_axes: &[i64],
    scatter_indices_batching_axes: &[i64],
    indexed_input_axes: &[i64],
    index_vector_axis: i64,
    update_fn_inputs: &[Shape],
    update_fn_outputs: &[Shape],
) -> Result<Vec<Shape>, Error> {
    if inputs.len() != updates.len() {
        return Err(Error::invalid_attribute(format!(
            "scatter requires the same number of inputs and updates, got {} and {}",
            inputs.len(),
            updates.len()
        )));
    }
    if !scatter_indices.dtype().is_integer() {
        return Err(Error::dtype_mismatch(format!(
            "scatter indices must be integers, got {}",
            scatter_indices.dtype()
        )));
    }
    check_reducer_signature(OpType::Scatter, inputs.len(), update_fn_inputs, update_fn_outputs)?;
    let input_rank = inputs[0].rank();
    if input_rank != update_window_axes.len() + inserted_window_axes.len() + input_batching_axes.len()
    {
        return Err(Error::invalid_attribute(format!(
            "scatter requires rank(input) == len(update_window) + len(inserted_window) + len(input_batching), got {input_rank} != {} + {} + {}",
            update_window_axes.len(),
            inserted_window_axes.len(),
            input_batching_axes.len()
        )));
    }
    if scatter_indices_batching_axes.len() != input_batching_axes.len() {
        return Err(Error::invalid_attribute(format!(
            "scatter requires matching input/indices batching axes, got {} and {}",
            input_batching_axes.len(),
            scatter_indices_batching_axes.len()
        )));
    }
    if index_vector_axis < 0 || index_vector_axis > scatter_indices.rank() as i64 {
        return Err(Error::invalid_axis(format!(
            "scatter index_vector_axis {index_vector_axis} out of bounds for indices rank {}",
            scatter_indices.rank()
        )));
    }
    if index_vector_axis < scatter_indices.rank() as i64 {
        let index_vector_dim = scatter_indices.dimensions[index_vector_axis as usize];
        if index_vector_dim >= 0 && indexed_input_axes.len() as i64 != index_vector_dim {
            return Err(Error::invalid_attribute(format!(
                "scatter indexed_input_axes must match the index vector extent, got {} for extent {index_vector_dim}",
                indexed_input_axes.len()
            )));
        }
    }
    inputs
        .iter()
        .zip(update_fn_outputs)
        .map(|(input, output)| Ok(input.with_dtype(output.dtype())))
        .collect()
}

/// [`OpType::SelectAndScatter`]: the result keeps the operand shape. The select closure takes
/// two scalars and returns a scalar boolean; the scatter closure is a binary scalar reducer.
pub fn select_and_scatter(
    operand: &Shape,
    source: &Shape,
    select_inputs: &[Shape],
    select_outputs: &[Shape],
    scatter_inputs: &[Shape],
    scatter_outputs: &[Shape],
) -> Result<Shape, Error> {
    check_same_dtype(OpType::SelectAndScatter, operand, source)?;
    if select_inputs.len() != 2 || select_outputs.len() != 1 {
        return Err(Error::invalid_attribute(format!(
            "select_and_scatter select closure must take 2 scalars and return 1, got {} and {}",
            select_inputs.len(),
            select_outputs.len()
        )));
    }
    if !select_outputs[0].is_scalar() || !select_outputs[0].dtype().is_bool() {
        return Err(Error::dtype_mismatch(
            "select_and_scatter select closure must return a scalar bool".to_string(),
        ));
    }
    check_reducer_signature(OpType::SelectAndScatter, 1, scatter_inputs, scatter_outputs)?;
    Ok(operand.clone())
}

/// [`OpType::Sort`]: per-axis sort; the comparator takes `2 * N` scalars and returns a scalar
/// boolean; the outputs keep the input shapes.
pub fn sort(
    inputs: &[Shape],
    dimension: usize,
    comparator_inputs: &[Shape],
    comparator_outputs: &[Shape],
) -> Result<Vec<Shape>, Error> {
    let first = &inputs[0];
    if dimension >= first.rank() {
        return Err(Error::invalid_axis(format!(
            "sort dimension {dimension} out of bounds for rank {}",
            first.rank()
        )));
    }
    for shape in &inputs[1..] {
        if shape.rank() != first.rank() {
            return Err(Error::rank_mismatch("sort inputs must have matching ranks".to_string()));
        }
        check_compatible(OpType::Sort, first, &shape.with_dtype(first.dtype()))?;
    }
    if comparator_inputs.len() != 2 * inputs.len() {
        return Err(Error::invalid_attribute(format!(
            "sort comparator must take {} scalar inputs (2 per operand), got {}",
            2 * inputs.len(),
            comparator_inputs.len()
        )));
    }
    if comparator_outputs.len() != 1
        || !comparator_outputs[0].is_scalar()
        || !comparator_outputs[0].dtype().is_bool()
    {
        return Err(Error::invalid_attribute(
            "sort comparator must return a single scalar bool".to_string(),
        ));
    }
    Ok(inputs.to_vec())
}

/// [`OpType::While`]: condition and body signatures must match the initial state types; the
/// condition returns a scalar boolean; the loop outputs keep the state shapes.
pub fn while_loop(
    initial_states: &[Shape],
    cond_inputs: &[Shape],
    cond_outputs: &[Shape],
    body_inputs: &[Shape],
    body_outputs: &[Shape],
) -> Result<Vec<Shape>, Error> {
    let count = initial_states.len();
    if cond_inputs.len() != count || body_inputs.len() != count || body_outputs.len() != count {
        return Err(Error::invalid_attribute(format!(
            "while requires condFn and bodyFn signatures matching the {count} state values, got cond inputs {}, body inputs {}, body outputs {}",
            cond_inputs.len(),
            body_inputs.len(),
            body_outputs.len()
        )));
    }
    if cond_outputs.len() != 1 || !cond_outputs[0].is_scalar() || !cond_outputs[0].dtype().is_bool() {
        return Err(Error::dtype_mismatch(
            "while condFn must return a scalar bool".to_string(),
        ));
    }
    for (i, state) in initial_states.iter().enumerate() {
        for (name, shapes) in [("condFn input", cond_inputs), ("bodyFn input", body_inputs), ("bodyFn output", body_outputs)] {
            if !state.compatible(&shapes[i]) {
                return Err(Error::dim_mismatch(format!(
                    "while {name} #{i} must be compatible with the state shape, got {} and {state}",
                    shapes[i]
                )));
            }
        }
    }
    Ok(initial_states.to_vec())
}

/// [`OpType::If`]: both branches take no inputs and return the same number of pairwise
/// compatible values; the predicate is a scalar boolean.
pub fn if_branches(
    pred: &Shape,
    true_inputs: &[Shape],
    true_outputs: &[Shape],
    false_inputs: &[Shape],
    false_outputs: &[Shape],
) -> Result<Vec<Shape>, Error> {
    if !pred.is_scalar() || !pred.dtype().is_bool() {
        return Err(Error::dtype_mismatch("if predicate must be a scalar bool".to_string()));
    }
    if !true_inputs.is_empty() || !false_inputs.is_empty() {
        return Err(Error::invalid_attribute("if branches must take no inputs".to_string()));
    }
    if true_outputs.len() != false_outputs.len() {
        return Err(Error::invalid_attribute(format!(
            "if branches must return the same number of outputs, got {} and {}",
            true_outputs.len(),
            false_outputs.len()
        )));
    }
    for (i, (a, b)) in true_outputs.iter().zip(false_outputs).enumerate() {
        if !a.compatible(b) {
            return Err(Error::dim_mismatch(format!(
                "if branch outputs #{i} must be compatible, got {a} and {b}"
            )));
        }
    }
    Ok(true_outputs.to_vec())
}

/// [`OpType::Convolution`]: standard windowed spatial arithmetic with strides, paddings, input
/// (lhs) and kernel (rhs) dilations, and feature/batch groupings.
#[allow(clippy::too_many_arguments)]
pub fn convolve(
    input: &Shape,
    kernel: &Shape,
    strides: &[i64],
    paddings: &[(i64, i64)],
    input_dilations: &[i64],
    kernel_dilations: &[i64],
    input_batch_axis: usize,
    input_channels_axis: usize,
    input_spatial_axes: &[usize],
    kernel_input_channels_axis: usize,
    kernel_output_channels_axis: usize,
    kernel_spatial_axes: &[usize],
    output_batch_axis: usize,
    output_channels_axis: usize,
    output_spatial_axes: &[usize],
    channel_group_count: i64,
    batch_group_count: i64,
) -> Result<Shape, Error> {
    check_same_dtype(OpType::Convolution, input, kernel)?;
    let rank = input.rank();
    let spatial_rank = rank.saturating_sub(2);
    if kernel.rank() != rank {
        return Err(Error::rank_mismatch(format!(
            "convolution input and kernel must have matching ranks, got {rank} and {}",
            kernel.rank()
        )));
    }
    if input_spatial_axes.len() != spatial_rank
        || kernel_spatial_axes.len() != spatial_rank
        || output_spatial_axes.len() != spatial_rank
    {
        return Err(Error::invalid_attribute(format!(
            "convolution requires {spatial_rank} spatial axes on input, kernel, and output"
        )));
    }
    for (name, values) in [("strides", strides), ("input dilations", input_dilations), ("kernel dilations", kernel_dilations)] {
        if values.len() != spatial_rank {
            return Err(Error::invalid_attribute(format!(
                "convolution {name} must have one entry per spatial axis, got {} for {spatial_rank}",
                values.len()
            )));
        }
    }
    if paddings.len() != spatial_rank {
        return Err(Error::invalid_attribute(format!(
            "convolution paddings must have one entry per spatial axis, got {} for {spatial_rank}",
            paddings.len()
        )));
    }
    if channel_group_count < 1 || batch_group_count < 1 {
        return Err(Error::invalid_attribute(
            "convolution group counts must be >= 1".to_string(),
        ));
    }

    let input_channels = input.dimensions[input_channels_axis];
    let kernel_input_channels = kernel.dimensions[kernel_input_channels_axis];
    if input_channels >= 0
        && kernel_input_channels >= 0
        && input_channels != kernel_input_channels * channel_group_count
    {
        return Err(Error::dim_mismatch(format!(
            "convolution input channels {input_channels} must equal kernel input channels {kernel_input_channels} * feature groups {channel_group_count}"
        )));
    }

    let mut dimensions = vec![0i64; rank];
    let input_batch = input.dimensions[input_batch_axis];
    dimensions[output_batch_axis] = if input_batch < 0 { DIM_UNKNOWN } else { input_batch / batch_group_count };
    dimensions[output_channels_axis] = kernel.dimensions[kernel_output_channels_axis];
    for spatial in 0..spatial_rank {
        dimensions[output_spatial_axes[spatial]] = windowed_output_dim(
            input.dimensions[input_spatial_axes[spatial]],
            kernel.dimensions[kernel_spatial_axes[spatial]],
            strides[spatial],
            input_dilations[spatial],
            kernel_dilations[spatial],
            paddings[spatial].0,
            paddings[spatial].1,
        )?;
    }
    Ok(input.with_dimensions(dimensions))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(dims: &[i64]) -> Shape {
        Shape::of(DType::F32, dims.to_vec())
    }

    #[test]
    fn test_binary_op() {
        let output = binary_op(OpType::Add, &shape(&[2, 3]), &shape(&[2, 3])).unwrap();
        assert_eq!(output.dimensions, vec![2, 3]);
        assert_eq!(output.dtype(), DType::F32);

        // Unknown dimensions take the known side.
        let output =
            binary_op(OpType::Multiply, &shape(&[DIM_UNKNOWN, 3]), &shape(&[2, DIM_UNKNOWN])).unwrap();
        assert_eq!(output.dimensions, vec![2, 3]);

        assert!(matches!(
            binary_op(OpType::Add, &shape(&[2]), &shape(&[3])),
            Err(Error::DimMismatch(_))
        ));
        assert!(matches!(
            binary_op(OpType::Add, &shape(&[2]), &shape(&[2, 1])),
            Err(Error::RankMismatch(_))
        ));
        assert!(matches!(
            binary_op(OpType::Add, &shape(&[2]), &Shape::of(DType::F64, [2])),
            Err(Error::DTypeMismatch(_))
        ));
        assert!(matches!(
            binary_op(OpType::And, &shape(&[2]), &shape(&[2])),
            Err(Error::DTypeMismatch(_))
        ));
        assert!(binary_op(OpType::And, &Shape::of(DType::Bool, [2]), &Shape::of(DType::Bool, [2])).is_ok());
    }

    #[test]
    fn test_unary_op() {
        assert_eq!(unary_op(OpType::Tanh, &shape(&[4])).unwrap().dtype(), DType::F32);
        assert_eq!(
            unary_op(OpType::Abs, &Shape::of(DType::C64, [4])).unwrap().dtype(),
            DType::F32
        );
        assert!(unary_op(OpType::Not, &shape(&[4])).is_err());
        assert!(unary_op(OpType::Floor, &Shape::of(DType::I32, [4])).is_err());
        assert!(unary_op(OpType::PopulationCount, &Shape::of(DType::U8, [4])).is_ok());
    }

    #[test]
    fn test_compare_and_select() {
        let output = compare(&shape(&[2, 3]), &shape(&[2, 3])).unwrap();
        assert_eq!(output.dtype(), DType::Bool);

        let pred = Shape::of(DType::Bool, [DIM_UNKNOWN, DIM_UNKNOWN, DIM_UNKNOWN]);
        let values = shape(&[1, 1, 1]);
        assert_eq!(select(&pred, &values, &values).unwrap().dimensions, vec![1, 1, 1]);

        let scalar_pred = Shape::scalar(DType::Bool);
        assert!(select(&scalar_pred, &values, &values).is_ok());
        assert!(select(&scalar_pred, &values, &shape(&[2, 2, 2])).is_err());
        assert!(select(&Shape::of(DType::Bool, [1, 1]), &values, &values).is_err());
        assert!(select(&Shape::scalar(DType::I32), &values, &values).is_err());
    }

    #[test]
    fn test_clamp() {
        let x = shape(&[3, 4]);
        assert!(clamp(&Shape::scalar(DType::F32), &x, &Shape::scalar(DType::F32)).is_ok());
        assert!(clamp(&x, &x, &x).is_ok());
        assert!(clamp(&shape(&[3]), &x, &x).is_err());
        assert!(clamp(
            &Shape::scalar(DType::Bool),
            &Shape::of(DType::Bool, [1]),
            &Shape::scalar(DType::Bool)
        )
        .is_err());
    }

    #[test]
    fn test_concatenate() {
        let output = concatenate(&[shape(&[2, 3]), shape(&[4, 3])], 0).unwrap();
        assert_eq!(output.dimensions, vec![6, 3]);
        let output = concatenate(&[shape(&[2, 3]), shape(&[2, 5])], -1).unwrap();
        assert_eq!(output.dimensions, vec![2, 8]);
        let output = concatenate(&[shape(&[DIM_UNKNOWN, 3]), shape(&[4, 3])], 0).unwrap();
        assert_eq!(output.dimensions, vec![DIM_UNKNOWN, 3]);
        assert!(concatenate(&[shape(&[2, 3]), shape(&[2, 4])], 0).is_err());
        assert!(concatenate(&[Shape::scalar(DType::F32)], 0).is_err());
    }

    #[test]
    fn test_broadcast_in_dim() {
        assert!(broadcast_in_dim(&shape(&[3]), &shape(&[2, 3]), &[1]).is_ok());
        assert!(broadcast_in_dim(&shape(&[1]), &shape(&[2, 3]), &[1]).is_ok());
        assert!(broadcast_in_dim(&shape(&[DIM_UNKNOWN]), &shape(&[2, 3]), &[1]).is_ok());
        assert!(broadcast_in_dim(&shape(&[4]), &shape(&[2, 3]), &[1]).is_err());
        assert!(broadcast_in_dim(&shape(&[3]), &shape(&[2, 3]), &[0, 1]).is_err());
        assert!(broadcast_in_dim(&shape(&[3, 3]), &shape(&[3, 3]), &[0, 0]).is_err());
    }

    #[test]
    fn test_dot_general() {
        // Plain matrix multiplication: [2, 3] x [3, 4] -> [2, 4].
        let output = dot_general(&shape(&[2, 3]), &[1], &[], &shape(&[3, 4]), &[0], &[], DType::F32).unwrap();
        assert_eq!(output.dimensions, vec![2, 4]);

        // Batched: [8, 2, 3] x [8, 3, 4] -> [8, 2, 4].
        let output =
            dot_general(&shape(&[8, 2, 3]), &[2], &[0], &shape(&[8, 3, 4]), &[1], &[0], DType::F32)
                .unwrap();
        assert_eq!(output.dimensions, vec![8, 2, 4]);

        // Mixed-precision accumulation honors the requested dtype.
        let output = dot_general(
            &Shape::of(DType::BF16, [2, 3]),
            &[1],
            &[],
            &Shape::of(DType::BF16, [3, 4]),
            &[0],
            &[],
            DType::F32,
        )
        .unwrap();
        assert_eq!(output.dtype(), DType::F32);

        assert!(dot_general(&shape(&[2, 3]), &[1], &[], &shape(&[5, 4]), &[0], &[], DType::F32).is_err());
    }

    #[test]
    fn test_slice() {
        let output = slice(&shape(&[5]), &[2], &[4], &[1]).unwrap();
        assert_eq!(output.dimensions, vec![2]);
        let output = slice(&shape(&[5]), &[2], &[5], &[2]).unwrap();
        assert_eq!(output.dimensions, vec![2]);
        assert!(slice(&shape(&[5]), &[2], &[6], &[1]).is_err());
        assert!(slice(&shape(&[5]), &[2], &[4], &[0]).is_err());
        // Dynamic dimensions bypass the bounds check.
        assert!(slice(&shape(&[DIM_UNKNOWN]), &[2], &[6], &[1]).is_ok());
    }

    #[test]
    fn test_pad() {
        let fill = Shape::scalar(DType::F32);
        let output = pad(&shape(&[4]), &fill, &[1], &[2], &[1]).unwrap();
        assert_eq!(output.dimensions, vec![10]); // 1 + 4 + 3*1 + 2
        let output = pad(&shape(&[4]), &fill, &[-1], &[0], &[0]).unwrap();
        assert_eq!(output.dimensions, vec![3]);
        assert!(pad(&shape(&[4]), &fill, &[0], &[0], &[-1]).is_err());
        assert!(pad(&shape(&[4]), &shape(&[1]), &[0], &[0], &[0]).is_err());
    }

    #[test]
    fn test_transpose_and_bitcast() {
        let output = transpose(&shape(&[2, 3, 4]), &[2, 0, 1]).unwrap();
        assert_eq!(output.dimensions, vec![4, 2, 3]);
        assert!(transpose(&shape(&[2, 3]), &[0, 0]).is_err());
        assert!(transpose(&shape(&[2, 3]), &[0]).is_err());

        let output = bitcast_convert(&Shape::of(DType::U32, [1]), DType::U16).unwrap();
        assert_eq!(output.dimensions, vec![1, 2]);
        assert_eq!(output.dtype(), DType::U16);
        let output = bitcast_convert(&Shape::of(DType::U16, [1, 2]), DType::U32).unwrap();
        assert_eq!(output.dimensions, vec![1]);
        assert!(bitcast_convert(&Shape::of(DType::U16, [1, 3]), DType::U32).is_err());
        let output = bitcast_convert(&Shape::of(DType::I32, [4]), DType::F32).unwrap();
        assert_eq!(output.dimensions, vec![4]);
    }

    #[test]
    fn test_gather() {
        // Gathering rows of a [10, 64] table with [12] indices: one collapsed axis, offset axis
        // at output position 1, slice sizes [1, 64] -> [12, 64].
        let output = gather(
            &shape(&[10, 64]),
            &Shape::of(DType::I32, [12, 1]),
            1,
            &[1],
            &[0],
            &[],
            &[],
            &[0],
            &[1, 64],
        )
        .unwrap();
        assert_eq!(output.dimensions, vec![12, 64]);

        // Collapsed axes must have slice size 1.
        assert!(gather(
            &shape(&[10, 64]),
            &Shape::of(DType::I32, [12, 1]),
            1,
            &[1],
            &[0],
            &[],
            &[],
            &[0],
            &[2, 64],
        )
        .is_err());

        // Rank arithmetic must hold.
        assert!(gather(
            &shape(&[10, 64]),
            &Shape::of(DType::I32, [12, 1]),
            1,
            &[1],
            &[],
            &[],
            &[],
            &[0],
            &[1, 64],
        )
        .is_err());
    }

    #[test]
    fn test_reduce() {
        let scalar = Shape::scalar(DType::F32);
        let outputs = reduce(
            &[shape(&[2, 3, 4])],
            &[scalar.clone()],
            &[scalar.clone(), scalar.clone()],
            &[scalar.clone()],
            &[1],
        )
        .unwrap();
        assert_eq!(outputs[0].dimensions, vec![2, 4]);

        // Reducer arity must be 2 * N.
        assert!(reduce(&[shape(&[2, 3])], &[scalar.clone()], &[scalar.clone()], &[scalar.clone()], &[0]).is_err());
        // Repeated axes are rejected.
        assert!(reduce(
            &[shape(&[2, 3])],
            &[scalar.clone()],
            &[scalar.clone(), scalar.clone()],
            &[scalar.clone()],
            &[0, 0],
        )
        .is_err());
    }

    #[test]
    fn test_reduce_window() {
        let scalar = Shape::scalar(DType::F32);
        let outputs = reduce_window(
            &[shape(&[1, 8, 8, 3])],
            &[scalar.clone()],
            &[scalar.clone(), scalar.clone()],
            &[scalar.clone()],
            &[1, 2, 2, 1],
            &[1, 2, 2, 1],
            &[1, 1, 1, 1],
            &[1, 1, 1, 1],
            &[(0, 0); 4],
        )
        .unwrap();
        assert_eq!(outputs[0].dimensions, vec![1, 4, 4, 3]);

        // Padding enters the arithmetic.
        let outputs = reduce_window(
            &[shape(&[5])],
            &[scalar.clone()],
            &[scalar.clone(), scalar.clone()],
            &[scalar.clone()],
            &[3],
            &[1],
            &[1],
            &[1],
            &[(1, 1)],
        )
        .unwrap();
        assert_eq!(outputs[0].dimensions, vec![5]);
    }

    #[test]
    fn test_sort_while_if() {
        let scalar = Shape::scalar(DType::F32);
        let bool_scalar = Shape::scalar(DType::Bool);
        let outputs = sort(
            &[shape(&[4, 8])],
            1,
            &[scalar.clone(), scalar.clone()],
            &[bool_scalar.clone()],
        )
        .unwrap();
        assert_eq!(outputs[0].dimensions, vec![4, 8]);
        assert!(sort(&[shape(&[4])], 0, &[scalar.clone(), scalar.clone()], &[scalar.clone()]).is_err());

        let state = Shape::scalar(DType::I32);
        let outputs = while_loop(
            &[state.clone()],
            &[state.clone()],
            &[bool_scalar.clone()],
            &[state.clone()],
            &[state.clone()],
        )
        .unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(matches!(
            while_loop(&[state.clone()], &[state.clone()], &[state.clone()], &[state.clone()], &[state.clone()]),
            Err(Error::DTypeMismatch(message)) if message.contains("scalar bool")
        ));
        assert!(matches!(
            while_loop(
                &[state.clone()],
                &[state.clone()],
                &[bool_scalar.clone()],
                &[state.clone()],
                &[Shape::of(DType::I32, [2])],
            ),
            Err(Error::DimMismatch(message)) if message.contains("must be compatible")
        ));

        let outputs = if_branches(&bool_scalar, &[], &[state.clone()], &[], &[state.clone()]).unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(matches!(
            if_branches(&state, &[], &[state.clone()], &[], &[state.clone()]),
            Err(Error::DTypeMismatch(message)) if message.contains("scalar bool")
        ));
        assert!(matches!(
            if_branches(&bool_scalar, &[state.clone()], &[state.clone()], &[], &[state.clone()]),
            Err(Error::InvalidAttribute(message)) if message.contains("no inputs")
        ));
        assert!(matches!(
            if_branches(&bool_scalar, &[], &[state.clone()], &[], &[state.clone(), state.clone()]),
            Err(Error::InvalidAttribute(message)) if message.contains("same number of outputs")
        ));
        assert!(matches!(
            if_branches(&bool_scalar, &[], &[state.clone()], &[], &[Shape::of(DType::I32, [3])]),
            Err(Error::DimMismatch(message)) if message.contains("must be compatible")
        ));
    }

    #[test]
    fn test_convolve() {
        // NHWC input [1, 8, 8, 3] with HWIO kernel [3, 3, 3, 16], stride 1, no padding.
        let output = convolve(
            &shape(&[1, 8, 8, 3]),
            &shape(&[3, 3, 3, 16]),
            &[1, 1],
            &[(0, 0), (0, 0)],
            &[1, 1],
            &[1, 1],
            0,
            3,
            &[1, 2],
            2,
            3,
            &[0, 1],
            0,
            3,
            &[1, 2],
            1,
            1,
        )
        .unwrap();
        assert_eq!(output.dimensions, vec![1, 6, 6, 16]);

        // SAME-style padding keeps the spatial extent.
        let output = convolve(
            &shape(&[1, 8, 8, 3]),
            &shape(&[3, 3, 3, 16]),
            &[1, 1],
            &[(1, 1), (1, 1)],
            &[1, 1],
            &[1, 1],
            0,
            3,
            &[1, 2],
            2,
            3,
            &[0, 1],
            0,
            3,
            &[1, 2],
            1,
            1,
        )
        .unwrap();
        assert_eq!(output.dimensions, vec![1, 8, 8, 16]);
    }

    #[test]
    fn test_fft() {
        let output = fft(&Shape::of(DType::C64, [16]), FftType::Forward, &[16]).unwrap();
        assert_eq!(output.dimensions, vec![16]);
        assert_eq!(output.dtype(), DType::C64);

        let output = fft(&Shape::of(DType::F32, [16]), FftType::ForwardReal, &[16]).unwrap();
        assert_eq!(output.dimensions, vec![9]);
        assert_eq!(output.dtype(), DType::C64);

        let output = fft(&Shape::of(DType::C64, [9]), FftType::InverseReal, &[16]).unwrap();
        assert_eq!(output.dimensions, vec![16]);
        assert_eq!(output.dtype(), DType::F32);

        assert!(fft(&Shape::of(DType::F32, [16]), FftType::Forward, &[16]).is_err());
    }

    #[test]
    fn test_adjust_axis() {
        assert_eq!(adjust_axis_to_rank(0, 3).unwrap(), 0);
        assert_eq!(adjust_axis_to_rank(-1, 3).unwrap(), 2);
        assert!(adjust_axis_to_rank(3, 3).is_err());
        assert!(adjust_axis_to_rank(-4, 3).is_err());
    }
}

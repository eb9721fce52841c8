//! Public operation constructors. Every operation validates that its target function is still
//! open and that its operands resolve through the innermost-function rule, runs shape
//! inference, and only then appends a statement; failures leave the IR unchanged.

use std::collections::BTreeMap;

use crate::attributes::render_index_list;
use crate::builder::{Builder, FuncId, Value};
use crate::shapeinference as infer;
use crate::{
    Attribute, ComparisonDirection, ComparisonType, DIM_UNKNOWN, DType, Error, FftType, Literal,
    LiteralElement, OpType, Precision, RngAlgorithm, Shape,
};

impl Builder {
    /// Resolves the function an operation over `operands` appends to and checks it is open.
    fn target_function(&self, op: OpType, operands: &[Value]) -> Result<FuncId, Error> {
        let func = self.innermost_function(operands)?;
        self.check_open(func, op)?;
        Ok(func)
    }

    /// Checks that `closure` is a returned closure whose lexical parent is `func`.
    fn check_closure(&self, op: OpType, func: FuncId, closure: FuncId, role: &str) -> Result<(), Error> {
        if self.parent(closure) != Some(func) {
            return Err(Error::cross_function_operand(format!(
                "{op} {role} is not a closure of function '{}'",
                self.func(func).name
            )));
        }
        if !self.is_returned(closure) {
            return Err(Error::invalid_attribute(format!(
                "{op} {role} closure must return before it is used"
            )));
        }
        Ok(())
    }

    fn shapes_of(&self, values: &[Value]) -> Vec<Shape> {
        values.iter().map(|&value| self.shape(value).clone()).collect()
    }

    fn binary(&mut self, op: OpType, lhs: Value, rhs: Value) -> Result<Value, Error> {
        let func = self.target_function(op, &[lhs, rhs])?;
        let shape = infer::binary_op(op, self.shape(lhs), self.shape(rhs))?;
        Ok(self.add_op(func, op, shape, vec![lhs, rhs], BTreeMap::new()))
    }

    fn unary(&mut self, op: OpType, operand: Value) -> Result<Value, Error> {
        let func = self.target_function(op, &[operand])?;
        let shape = infer::unary_op(op, self.shape(operand))?;
        Ok(self.add_op(func, op, shape, vec![operand], BTreeMap::new()))
    }
}

macro_rules! binary_ops {
    ($(($method:ident, $op:ident)),* $(,)?) => {
        impl Builder {
            $(
                #[doc = concat!("Element-wise `", stringify!($method), "` of two identically-typed tensors.")]
                pub fn $method(&mut self, lhs: Value, rhs: Value) -> Result<Value, Error> {
                    self.binary(OpType::$op, lhs, rhs)
                }
            )*
        }
    };
}

binary_ops!(
    (add, Add),
    (sub, Subtract),
    (mul, Multiply),
    (div, Divide),
    (remainder, Remainder),
    (pow, Power),
    (maximum, Maximum),
    (minimum, Minimum),
    (and, And),
    (or, Or),
    (xor, Xor),
    (shift_left, ShiftLeft),
    (shift_right_arithmetic, ShiftRightArithmetic),
    (shift_right_logical, ShiftRightLogical),
    (atan2, Atan2),
);

macro_rules! unary_ops {
    ($(($method:ident, $op:ident)),* $(,)?) => {
        impl Builder {
            $(
                #[doc = concat!("Element-wise `", stringify!($method), "` of a tensor.")]
                pub fn $method(&mut self, operand: Value) -> Result<Value, Error> {
                    self.unary(OpType::$op, operand)
                }
            )*
        }
    };
}

unary_ops!(
    (abs, Abs),
    (cbrt, Cbrt),
    (ceil, Ceil),
    (cos, Cosine),
    (count_leading_zeros, CountLeadingZeros),
    (exp, Exponential),
    (expm1, ExponentialMinusOne),
    (floor, Floor),
    (log, Log),
    (log1p, LogPlusOne),
    (logistic, Logistic),
    (neg, Negate),
    (not, Not),
    (popcnt, PopulationCount),
    (round_nearest_afz, RoundNearestAfz),
    (round_nearest_even, RoundNearestEven),
    (rsqrt, Rsqrt),
    (sign, Sign),
    (sin, Sine),
    (sqrt, Sqrt),
    (tan, Tan),
    (tanh, Tanh),
);

impl Builder {
    /// Adds a constant statement holding the provided [`Literal`] to `func`.
    pub fn constant(&mut self, func: FuncId, literal: Literal) -> Result<Value, Error> {
        self.check_open(func, OpType::Constant)?;
        let shape = literal.shape();
        let mut attributes = BTreeMap::new();
        attributes.insert("value".to_string(), Attribute::TensorLiteral(literal));
        Ok(self.add_op(func, OpType::Constant, shape, Vec::new(), attributes))
    }

    /// Adds a scalar constant to `func`.
    pub fn constant_scalar<T: LiteralElement>(&mut self, func: FuncId, value: T) -> Result<Value, Error> {
        self.constant(func, Literal::scalar(value))
    }

    /// Adds a constant built from a flat slice and explicit dimensions to `func`.
    pub fn constant_from_flat<T: LiteralElement>(
        &mut self,
        func: FuncId,
        values: &[T],
        dimensions: &[i64],
    ) -> Result<Value, Error> {
        self.constant(func, Literal::from_flat(values, dimensions.to_vec())?)
    }

    /// `iota`: fills the target shape with indices increasing along `axis`.
    pub fn iota(&mut self, func: FuncId, shape: Shape, axis: i64) -> Result<Value, Error> {
        self.check_open(func, OpType::Iota)?;
        let shape = infer::iota(&shape, axis)?;
        let axis = infer::adjust_axis_to_rank(axis, shape.rank())? as i64;
        let mut attributes = BTreeMap::new();
        attributes.insert("iota_dimension".to_string(), Attribute::Int(axis));
        Ok(self.add_op(func, OpType::Iota, shape, Vec::new(), attributes))
    }

    /// Element-wise comparison. Boolean operands compare with
    /// [`ComparisonType::Unsigned`].
    pub fn compare(
        &mut self,
        lhs: Value,
        rhs: Value,
        direction: ComparisonDirection,
        compare_type: ComparisonType,
    ) -> Result<Value, Error> {
        let op = OpType::Compare;
        let func = self.target_function(op, &[lhs, rhs])?;
        let shape = infer::compare(self.shape(lhs), self.shape(rhs))?;
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "comparison_direction".to_string(),
            Attribute::MlirToken(format!("#stablehlo<comparison_direction {}>", direction.mlir_token())),
        );
        attributes.insert(
            "compare_type".to_string(),
            Attribute::MlirToken(format!("#stablehlo<comparison_type {}>", compare_type.mlir_token())),
        );
        Ok(self.add_op(func, op, shape, vec![lhs, rhs], attributes))
    }

    /// Takes element-wise values from `on_true` or `on_false` depending on the boolean `pred`,
    /// which is either a scalar or shaped like the branches.
    pub fn select(&mut self, pred: Value, on_true: Value, on_false: Value) -> Result<Value, Error> {
        let op = OpType::Select;
        let func = self.target_function(op, &[pred, on_true, on_false])?;
        let shape = infer::select(self.shape(pred), self.shape(on_true), self.shape(on_false))?;
        Ok(self.add_op(func, op, shape, vec![pred, on_true, on_false], BTreeMap::new()))
    }

    /// `minimum(maximum(x, min), max)`. `min` and `max` are scalars or shaped like `x`.
    /// Note the StableHLO argument order differs from most ML libraries.
    pub fn clamp(&mut self, min: Value, x: Value, max: Value) -> Result<Value, Error> {
        let op = OpType::Clamp;
        let func = self.target_function(op, &[min, x, max])?;
        let shape = infer::clamp(self.shape(min), self.shape(x), self.shape(max))?;
        Ok(self.add_op(func, op, shape, vec![min, x, max], BTreeMap::new()))
    }

    /// Pairs element-wise real and imaginary parts into a complex tensor.
    pub fn complex(&mut self, real: Value, imag: Value) -> Result<Value, Error> {
        let op = OpType::Complex;
        let func = self.target_function(op, &[real, imag])?;
        let shape = infer::complex(self.shape(real), self.shape(imag))?;
        Ok(self.add_op(func, op, shape, vec![real, imag], BTreeMap::new()))
    }

    /// Real part of a complex tensor.
    pub fn real(&mut self, operand: Value) -> Result<Value, Error> {
        let op = OpType::Real;
        let func = self.target_function(op, &[operand])?;
        let shape = infer::real_or_imag(self.shape(operand))?;
        Ok(self.add_op(func, op, shape, vec![operand], BTreeMap::new()))
    }

    /// Imaginary part of a complex tensor.
    pub fn imag(&mut self, operand: Value) -> Result<Value, Error> {
        let op = OpType::Imag;
        let func = self.target_function(op, &[operand])?;
        let shape = infer::real_or_imag(self.shape(operand))?;
        Ok(self.add_op(func, op, shape, vec![operand], BTreeMap::new()))
    }

    /// Tests element-wise whether the operand is finite (neither infinite nor NaN).
    pub fn is_finite(&mut self, operand: Value) -> Result<Value, Error> {
        let op = OpType::IsFinite;
        let func = self.target_function(op, &[operand])?;
        let shape = infer::is_finite(self.shape(operand))?;
        Ok(self.add_op(func, op, shape, vec![operand], BTreeMap::new()))
    }

    /// Reshapes the operand to the provided dimensions without moving data. The total size must
    /// match when both sides are fully static; dynamic operands bypass the check.
    pub fn reshape(&mut self, operand: Value, dimensions: &[i64]) -> Result<Value, Error> {
        let op = OpType::Reshape;
        let func = self.target_function(op, &[operand])?;
        let operand_shape = self.shape(operand);
        let shape = operand_shape.with_dimensions(dimensions.to_vec());
        if !operand_shape.is_dynamic() && !shape.is_dynamic() && operand_shape.size() != shape.size() {
            return Err(Error::dim_mismatch(format!(
                "reshape requires the total size of the new shape to match, got {operand_shape} and {shape}"
            )));
        }
        Ok(self.add_op(func, op, shape, vec![operand], BTreeMap::new()))
    }

    /// Broadcasts operand dimensions to the target shape. `axes_mapping` has one entry per
    /// operand axis, mapping it to the corresponding target axis.
    pub fn broadcast_in_dim(
        &mut self,
        operand: Value,
        target: Shape,
        axes_mapping: &[i64],
    ) -> Result<Value, Error> {
        let op = OpType::BroadcastInDim;
        let func = self.target_function(op, &[operand])?;
        infer::broadcast_in_dim(self.shape(operand), &target, axes_mapping)?;
        let mut attributes = BTreeMap::new();
        attributes.insert("broadcast_dimensions".to_string(), Attribute::IntList(axes_mapping.to_vec()));
        Ok(self.add_op(func, op, target, vec![operand], attributes))
    }

    /// Concatenates operands along `axis`. Non-concatenated axes must match.
    pub fn concatenate(&mut self, axis: i64, operands: &[Value]) -> Result<Value, Error> {
        let op = OpType::Concatenate;
        if operands.is_empty() {
            return Err(Error::invalid_attribute("concatenate requires at least one operand".to_string()));
        }
        let func = self.target_function(op, operands)?;
        let shapes = self.shapes_of(operands);
        let shape = infer::concatenate(&shapes, axis)?;
        let axis = infer::adjust_axis_to_rank(axis, shapes[0].rank())? as i64;
        let mut attributes = BTreeMap::new();
        attributes.insert("dimension".to_string(), Attribute::Int(axis));
        Ok(self.add_op(func, op, shape, operands.to_vec(), attributes))
    }

    /// Extracts a strided bounding box from the operand. Empty `strides` default to 1.
    pub fn slice(&mut self, x: Value, starts: &[i64], limits: &[i64], strides: &[i64]) -> Result<Value, Error> {
        let op = OpType::Slice;
        let func = self.target_function(op, &[x])?;
        let strides = if strides.is_empty() { vec![1; self.shape(x).rank()] } else { strides.to_vec() };
        let shape = infer::slice(self.shape(x), starts, limits, &strides)?;
        let mut attributes = BTreeMap::new();
        attributes.insert("start_indices".to_string(), Attribute::IntList(starts.to_vec()));
        attributes.insert("limit_indices".to_string(), Attribute::IntList(limits.to_vec()));
        attributes.insert("strides".to_string(), Attribute::IntList(strides));
        Ok(self.add_op(func, op, shape, vec![x], attributes))
    }

    /// Extracts a slice at runtime-computed start positions with static `slice_sizes`.
    /// `start_indices` holds one scalar per operand axis.
    pub fn dynamic_slice(
        &mut self,
        operand: Value,
        start_indices: &[Value],
        slice_sizes: &[i64],
    ) -> Result<Value, Error> {
        let op = OpType::DynamicSlice;
        let mut all = vec![operand];
        all.extend_from_slice(start_indices);
        let func = self.target_function(op, &all)?;
        let shape = infer::dynamic_slice(self.shape(operand), start_indices.len(), slice_sizes)?;
        let mut attributes = BTreeMap::new();
        attributes.insert("slice_sizes".to_string(), Attribute::IntList(slice_sizes.to_vec()));
        Ok(self.add_op(func, op, shape, all, attributes))
    }

    /// Pastes `update` over `operand` at runtime-computed start positions. The result keeps the
    /// operand shape.
    pub fn dynamic_update_slice(
        &mut self,
        operand: Value,
        update: Value,
        start_indices: &[Value],
    ) -> Result<Value, Error> {
        let op = OpType::DynamicUpdateSlice;
        let mut all = vec![operand, update];
        all.extend_from_slice(start_indices);
        let func = self.target_function(op, &all)?;
        if start_indices.len() != self.shape(operand).rank() {
            return Err(Error::invalid_attribute(format!(
                "dynamic_update_slice requires one start index per axis, got {} for rank {}",
                start_indices.len(),
                self.shape(operand).rank()
            )));
        }
        let shape = self.shape(operand).clone();
        Ok(self.add_op(func, op, shape, all, BTreeMap::new()))
    }

    /// Pads `x` with the scalar `fill` value at the start, end, and interior of each axis.
    /// Start and end padding may be negative to trim elements; empty slices default to zero.
    pub fn pad(
        &mut self,
        x: Value,
        fill: Value,
        padding_start: &[i64],
        padding_end: &[i64],
        padding_interior: &[i64],
    ) -> Result<Value, Error> {
        let op = OpType::Pad;
        let func = self.target_function(op, &[x, fill])?;
        let rank = self.shape(x).rank();
        let defaulted = |values: &[i64]| {
            if values.is_empty() { vec![0; rank] } else { values.to_vec() }
        };
        let (start, end, interior) =
            (defaulted(padding_start), defaulted(padding_end), defaulted(padding_interior));
        let shape = infer::pad(self.shape(x), self.shape(fill), &start, &end, &interior)?;
        let mut attributes = BTreeMap::new();
        attributes.insert("edge_padding_low".to_string(), Attribute::IntList(start));
        attributes.insert("edge_padding_high".to_string(), Attribute::IntList(end));
        attributes.insert("interior_padding".to_string(), Attribute::IntList(interior));
        Ok(self.add_op(func, op, shape, vec![x, fill], attributes))
    }

    /// Permutes the axes of `x`: `output[i] = x[permutation[i]]`.
    pub fn transpose(&mut self, x: Value, permutation: &[i64]) -> Result<Value, Error> {
        let op = OpType::Transpose;
        let func = self.target_function(op, &[x])?;
        let rank = self.shape(x).rank();
        let permutation = permutation
            .iter()
            .map(|&axis| infer::adjust_axis_to_rank(axis, rank).map(|axis| axis as i64))
            .collect::<Result<Vec<_>, _>>()?;
        let shape = infer::transpose(self.shape(x), &permutation)?;
        let mut attributes = BTreeMap::new();
        attributes.insert("permutation".to_string(), Attribute::IntList(permutation));
        Ok(self.add_op(func, op, shape, vec![x], attributes))
    }

    /// Reverses the listed axes of `x`.
    pub fn reverse(&mut self, x: Value, axes: &[i64]) -> Result<Value, Error> {
        let op = OpType::Reverse;
        let func = self.target_function(op, &[x])?;
        let rank = self.shape(x).rank();
        let axes = axes
            .iter()
            .map(|&axis| infer::adjust_axis_to_rank(axis, rank).map(|axis| axis as i64))
            .collect::<Result<Vec<_>, _>>()?;
        let shape = self.shape(x).clone();
        let mut attributes = BTreeMap::new();
        attributes.insert("dimensions".to_string(), Attribute::IntList(axes));
        Ok(self.add_op(func, op, shape, vec![x], attributes))
    }

    /// Converts `x` to `dtype` element-wise. Booleans convert to 0/1; complex-to-real keeps the
    /// real part.
    pub fn convert(&mut self, x: Value, dtype: DType) -> Result<Value, Error> {
        let op = OpType::Convert;
        let func = self.target_function(op, &[x])?;
        let shape = self.shape(x).with_dtype(dtype);
        Ok(self.add_op(func, op, shape, vec![x], BTreeMap::new()))
    }

    /// Reinterprets the bits of `x` as `dtype`, adding or trimming a trailing axis when the
    /// element widths differ.
    pub fn bitcast_convert(&mut self, x: Value, dtype: DType) -> Result<Value, Error> {
        let op = OpType::BitcastConvert;
        let func = self.target_function(op, &[x])?;
        let shape = infer::bitcast_convert(self.shape(x), dtype)?;
        Ok(self.add_op(func, op, shape, vec![x], BTreeMap::new()))
    }

    /// General gather. Refer to the StableHLO specification for the full semantics of the axis
    /// arguments; the builder validates the rank arithmetic and the unit slice-size
    /// constraints on collapsed and batching axes.
    #[allow(clippy::too_many_arguments)]
    pub fn gather(
        &mut self,
        operand: Value,
        start_indices: Value,
        index_vector_axis: i64,
        offset_output_axes: &[i64],
        collapsed_slice_axes: &[i64],
        operand_batching_axes: &[i64],
        start_indices_batching_axes: &[i64],
        start_index_map: &[i64],
        slice_sizes: &[i64],
        indices_are_sorted: bool,
    ) -> Result<Value, Error> {
        let op = OpType::Gather;
        let func = self.target_function(op, &[operand, start_indices])?;
        let shape = infer::gather(
            self.shape(operand),
            self.shape(start_indices),
            index_vector_axis,
            offset_output_axes,
            collapsed_slice_axes,
            operand_batching_axes,
            start_indices_batching_axes,
            start_index_map,
            slice_sizes,
        )?;
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "dimension_numbers".to_string(),
            Attribute::MlirToken(format!(
                "#stablehlo.gather<offset_dims = {}, collapsed_slice_dims = {}, operand_batching_dims = {}, start_indices_batching_dims = {}, start_index_map = {}, index_vector_dim = {}>",
                render_index_list(offset_output_axes),
                render_index_list(collapsed_slice_axes),
                render_index_list(operand_batching_axes),
                render_index_list(start_indices_batching_axes),
                render_index_list(start_index_map),
                index_vector_axis
            )),
        );
        attributes.insert("slice_sizes".to_string(), Attribute::IntList(slice_sizes.to_vec()));
        attributes.insert("indices_are_sorted".to_string(), Attribute::Bool(indices_are_sorted));
        Ok(self.add_op(func, op, shape, vec![operand, start_indices], attributes))
    }

    /// Scatters `updates` into `input` at the positions selected by `scatter_indices`,
    /// combining old and new values with the `update_fn` closure. See [`Builder::multi_scatter`]
    /// for the variant operating on several tensors with shared indices.
    #[allow(clippy::too_many_arguments)]
    pub fn scatter(
        &mut self,
        input: Value,
        scatter_indices: Value,
        updates: Value,
        update_window_axes: &[i64],
        inserted_window_axes: &[i64],
        input_batching_axes: &[i64],
        scatter_indices_batching_axes: &[i64],
        indexed_input_axes: &[i64],
        index_vector_axis: i64,
        indices_are_sorted: bool,
        unique_indices: bool,
        update_fn: FuncId,
    ) -> Result<Value, Error> {
        let outputs = self.multi_scatter(
            &[input],
            scatter_indices,
            &[updates],
            update_window_axes,
            inserted_window_axes,
            input_batching_axes,
            scatter_indices_batching_axes,
            indexed_input_axes,
            index_vector_axis,
            indices_are_sorted,
            unique_indices,
            update_fn,
        )?;
        Ok(outputs[0])
    }

    /// Like [`Builder::scatter`] but scatters into N inputs with one set of indices.
    #[allow(clippy::too_many_arguments)]
    pub fn multi_scatter(
        &mut self,
        inputs: &[Value],
        scatter_indices: Value,
        updates: &[Value],
        update_window_axes: &[i64],
        inserted_window_axes: &[i64],
        input_batching_axes: &[i64],
        scatter_indices_batching_axes: &[i64],
        indexed_input_axes: &[i64],
        index_vector_axis: i64,
        indices_are_sorted: bool,
        unique_indices: bool,
        update_fn: FuncId,
    ) -> Result<Vec<Value>, Error> {
        let op = OpType::Scatter;
        if inputs.is_empty() {
            return Err(Error::invalid_attribute("scatter requires at least one input".to_string()));
        }
        let mut all = inputs.to_vec();
        all.push(scatter_indices);
        all.extend_from_slice(updates);
        let func = self.target_function(op, &all)?;
        self.check_closure(op, func, update_fn, "update computation")?;
        let output_shapes = infer::scatter(
            &self.shapes_of(inputs),
            self.shape(scatter_indices),
            &self.shapes_of(updates),
            update_window_axes,
            inserted_window_axes,
            input_batching_axes,
            scatter_indices_batching_axes,
            indexed_input_axes,
            index_vector_axis,
            &self.shapes_of(self.inputs(update_fn)),
            &self.shapes_of(self.results(update_fn)),
        )?;
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "scatter_dimension_numbers".to_string(),
            Attribute::MlirToken(format!(
                "#stablehlo.scatter<update_window_dims = {}, inserted_window_dims = {}, input_batching_dims = {}, scatter_indices_batching_dims = {}, scatter_dims_to_operand_dims = {}, index_vector_dim = {}>",
                render_index_list(update_window_axes),
                render_index_list(inserted_window_axes),
                render_index_list(input_batching_axes),
                render_index_list(scatter_indices_batching_axes),
                render_index_list(indexed_input_axes),
                index_vector_axis
            )),
        );
        attributes.insert("indices_are_sorted".to_string(), Attribute::Bool(indices_are_sorted));
        attributes.insert("unique_indices".to_string(), Attribute::Bool(unique_indices));
        attributes.insert("updateFn".to_string(), Attribute::FunctionRef(update_fn));
        Ok(self.add_multi_op(func, op, output_shapes, all, attributes))
    }

    /// Reduces `x` along `axes`, starting from `initial_value` and combining elements with the
    /// `reduction_fn` closure (a `(lhs, rhs) -> out` scalar function).
    pub fn reduce(
        &mut self,
        x: Value,
        initial_value: Value,
        reduction_fn: FuncId,
        axes: &[i64],
    ) -> Result<Value, Error> {
        let outputs = self.multi_reduce(&[x], &[initial_value], reduction_fn, axes)?;
        Ok(outputs[0])
    }

    /// Like [`Builder::reduce`] for N inputs reduced simultaneously; the closure takes
    /// `(lhs_1, …, lhs_N, rhs_1, …, rhs_N)` scalars and returns N scalars.
    pub fn multi_reduce(
        &mut self,
        inputs: &[Value],
        initial_values: &[Value],
        reduction_fn: FuncId,
        axes: &[i64],
    ) -> Result<Vec<Value>, Error> {
        let op = OpType::Reduce;
        if inputs.is_empty() {
            return Err(Error::invalid_attribute("reduce requires at least one input".to_string()));
        }
        let mut all = inputs.to_vec();
        all.extend_from_slice(initial_values);
        let func = self.target_function(op, &all)?;
        self.check_closure(op, func, reduction_fn, "reduction function")?;
        let rank = self.shape(inputs[0]).rank();
        let axes = axes
            .iter()
            .map(|&axis| infer::adjust_axis_to_rank(axis, rank).map(|axis| axis as i64))
            .collect::<Result<Vec<_>, _>>()?;
        let output_shapes = infer::reduce(
            &self.shapes_of(inputs),
            &self.shapes_of(initial_values),
            &self.shapes_of(self.inputs(reduction_fn)),
            &self.shapes_of(self.results(reduction_fn)),
            &axes,
        )?;
        let mut attributes = BTreeMap::new();
        attributes.insert("dimensions".to_string(), Attribute::IntList(axes));
        attributes.insert("reductionFn".to_string(), Attribute::FunctionRef(reduction_fn));
        Ok(self.add_multi_op(func, op, output_shapes, all, attributes))
    }

    /// Reduces windows around each element of `x`. Empty `strides` default to the window
    /// dimensions, empty dilations to 1, and empty paddings to 0.
    #[allow(clippy::too_many_arguments)]
    pub fn reduce_window(
        &mut self,
        x: Value,
        initial_value: Value,
        reduction_fn: FuncId,
        window_dimensions: &[i64],
        strides: &[i64],
        base_dilations: &[i64],
        window_dilations: &[i64],
        paddings: &[(i64, i64)],
    ) -> Result<Value, Error> {
        let outputs = self.multi_reduce_window(
            &[x],
            &[initial_value],
            reduction_fn,
            window_dimensions,
            strides,
            base_dilations,
            window_dilations,
            paddings,
        )?;
        Ok(outputs[0])
    }

    /// Like [`Builder::reduce_window`] for N inputs reduced simultaneously.
    #[allow(clippy::too_many_arguments)]
    pub fn multi_reduce_window(
        &mut self,
        inputs: &[Value],
        initial_values: &[Value],
        reduction_fn: FuncId,
        window_dimensions: &[i64],
        strides: &[i64],
        base_dilations: &[i64],
        window_dilations: &[i64],
        paddings: &[(i64, i64)],
    ) -> Result<Vec<Value>, Error> {
        let op = OpType::ReduceWindow;
        if inputs.is_empty() {
            return Err(Error::invalid_attribute("reduce_window requires at least one input".to_string()));
        }
        let mut all = inputs.to_vec();
        all.extend_from_slice(initial_values);
        let func = self.target_function(op, &all)?;
        self.check_closure(op, func, reduction_fn, "reduction function")?;
        let rank = self.shape(inputs[0]).rank();
        let ones = |values: &[i64]| if values.is_empty() { vec![1; rank] } else { values.to_vec() };
        let window_dimensions = ones(window_dimensions);
        let base_dilations = ones(base_dilations);
        let window_dilations = ones(window_dilations);
        // The default stride matches the window dimension.
        let strides = if strides.is_empty() { window_dimensions.clone() } else { strides.to_vec() };
        let paddings = if paddings.is_empty() { vec![(0, 0); rank] } else { paddings.to_vec() };
        let output_shapes = infer::reduce_window(
            &self.shapes_of(inputs),
            &self.shapes_of(initial_values),
            &self.shapes_of(self.inputs(reduction_fn)),
            &self.shapes_of(self.results(reduction_fn)),
            &window_dimensions,
            &strides,
            &base_dilations,
            &window_dilations,
            &paddings,
        )?;
        let mut attributes = BTreeMap::new();
        attributes.insert("window_dimensions".to_string(), Attribute::IntList(window_dimensions));
        attributes.insert("window_strides".to_string(), Attribute::IntList(strides));
        attributes.insert("base_dilations".to_string(), Attribute::IntList(base_dilations));
        attributes.insert("window_dilations".to_string(), Attribute::IntList(window_dilations));
        attributes.insert("padding".to_string(), Attribute::TensorLiteral(paddings_literal(&paddings)?));
        attributes.insert("reductionFn".to_string(), Attribute::FunctionRef(reduction_fn));
        Ok(self.add_multi_op(func, op, output_shapes, all, attributes))
    }

    /// Selects one value per window of `input` with `select_fn` and scatters the matching
    /// element of `scatter_source` into the output with `scatter_fn`. The result keeps the
    /// input shape, initialized from `initial_value`.
    #[allow(clippy::too_many_arguments)]
    pub fn select_and_scatter(
        &mut self,
        input: Value,
        scatter_source: Value,
        initial_value: Value,
        select_fn: FuncId,
        scatter_fn: FuncId,
        window_dimensions: &[i64],
        strides: &[i64],
        paddings: &[(i64, i64)],
    ) -> Result<Value, Error> {
        let op = OpType::SelectAndScatter;
        let func = self.target_function(op, &[input, scatter_source, initial_value])?;
        self.check_closure(op, func, select_fn, "select function")?;
        self.check_closure(op, func, scatter_fn, "scatter function")?;
        let rank = self.shape(input).rank();
        let window_dimensions =
            if window_dimensions.is_empty() { vec![1; rank] } else { window_dimensions.to_vec() };
        let strides = if strides.is_empty() { window_dimensions.clone() } else { strides.to_vec() };
        let paddings = if paddings.is_empty() { vec![(0, 0); rank] } else { paddings.to_vec() };
        let shape = infer::select_and_scatter(
            self.shape(input),
            self.shape(scatter_source),
            &self.shapes_of(self.inputs(select_fn)),
            &self.shapes_of(self.results(select_fn)),
            &self.shapes_of(self.inputs(scatter_fn)),
            &self.shapes_of(self.results(scatter_fn)),
        )?;
        let mut attributes = BTreeMap::new();
        attributes.insert("window_dimensions".to_string(), Attribute::IntList(window_dimensions));
        attributes.insert("window_strides".to_string(), Attribute::IntList(strides));
        attributes.insert("padding".to_string(), Attribute::TensorLiteral(paddings_literal(&paddings)?));
        attributes.insert("selectFn".to_string(), Attribute::FunctionRef(select_fn));
        attributes.insert("scatterFn".to_string(), Attribute::FunctionRef(scatter_fn));
        Ok(self.add_op(func, op, shape, vec![input, scatter_source, initial_value], attributes))
    }

    /// Sorts one or more tensors along `dimension` with a comparator closure taking
    /// `(lhs_0, …, lhs_{N-1}, rhs_0, …, rhs_{N-1})` scalars and returning a scalar boolean.
    /// The first tensor drives the comparison; the others are reordered to match.
    pub fn sort(
        &mut self,
        comparator: FuncId,
        dimension: i64,
        is_stable: bool,
        inputs: &[Value],
    ) -> Result<Vec<Value>, Error> {
        let op = OpType::Sort;
        if inputs.is_empty() {
            return Err(Error::invalid_attribute("sort requires at least one input tensor".to_string()));
        }
        let func = self.target_function(op, inputs)?;
        self.check_closure(op, func, comparator, "comparator")?;
        let dimension = infer::adjust_axis_to_rank(dimension, self.shape(inputs[0]).rank())?;
        let output_shapes = infer::sort(
            &self.shapes_of(inputs),
            dimension,
            &self.shapes_of(self.inputs(comparator)),
            &self.shapes_of(self.results(comparator)),
        )?;
        let mut attributes = BTreeMap::new();
        attributes.insert("dimension".to_string(), Attribute::Int(dimension as i64));
        attributes.insert("is_stable".to_string(), Attribute::Bool(is_stable));
        attributes.insert("comparator".to_string(), Attribute::FunctionRef(comparator));
        Ok(self.add_multi_op(func, op, output_shapes, inputs.to_vec(), attributes))
    }

    /// Executes `body_fn` repeatedly while `cond_fn` returns true, threading the state values.
    /// Both closures take the state types; `cond_fn` returns a scalar boolean and `body_fn`
    /// returns the updated state.
    pub fn while_loop(
        &mut self,
        cond_fn: FuncId,
        body_fn: FuncId,
        initial_states: &[Value],
    ) -> Result<Vec<Value>, Error> {
        let op = OpType::While;
        if initial_states.is_empty() {
            return Err(Error::invalid_attribute("while requires at least one initial state value".to_string()));
        }
        let func = self.target_function(op, initial_states)?;
        self.check_closure(op, func, cond_fn, "condFn")?;
        self.check_closure(op, func, body_fn, "bodyFn")?;
        let output_shapes = infer::while_loop(
            &self.shapes_of(initial_states),
            &self.shapes_of(self.inputs(cond_fn)),
            &self.shapes_of(self.results(cond_fn)),
            &self.shapes_of(self.inputs(body_fn)),
            &self.shapes_of(self.results(body_fn)),
        )?;
        // Regions emit in attribute-key order, and "body" sorts before "cond", which is the
        // region order the downstream parser expects.
        let mut attributes = BTreeMap::new();
        attributes.insert("cond".to_string(), Attribute::FunctionRef(cond_fn));
        attributes.insert("body".to_string(), Attribute::FunctionRef(body_fn));
        Ok(self.add_multi_op(func, op, output_shapes, initial_states.to_vec(), attributes))
    }

    /// Evaluates `true_branch` or `false_branch` depending on the scalar boolean `pred`. Both
    /// branches take no inputs and return the same number of pairwise-compatible values.
    pub fn if_then_else(
        &mut self,
        pred: Value,
        true_branch: FuncId,
        false_branch: FuncId,
    ) -> Result<Vec<Value>, Error> {
        let op = OpType::If;
        let func = self.target_function(op, &[pred])?;
        self.check_closure(op, func, true_branch, "true branch")?;
        self.check_closure(op, func, false_branch, "false branch")?;
        let output_shapes = infer::if_branches(
            self.shape(pred),
            &self.shapes_of(self.inputs(true_branch)),
            &self.shapes_of(self.results(true_branch)),
            &self.shapes_of(self.inputs(false_branch)),
            &self.shapes_of(self.results(false_branch)),
        )?;
        let mut attributes = BTreeMap::new();
        attributes.insert("true_branch".to_string(), Attribute::FunctionRef(true_branch));
        attributes.insert("false_branch".to_string(), Attribute::FunctionRef(false_branch));
        Ok(self.add_multi_op(func, op, output_shapes, vec![pred], attributes))
    }

    /// Calls a returned top-level function via `func.call`. Argument shapes must be compatible
    /// with the callee's parameters.
    pub fn call(&mut self, callee: FuncId, args: &[Value]) -> Result<Vec<Value>, Error> {
        let op = OpType::Call;
        if args.is_empty() {
            return Err(Error::invalid_attribute(
                "call requires at least one argument to determine the calling function".to_string(),
            ));
        }
        let func = self.target_function(op, args)?;
        if self.parent(callee).is_some() {
            return Err(Error::cross_function_operand(format!(
                "call target '{}' is a closure; only top-level functions are callable",
                self.func(callee).name
            )));
        }
        if !self.is_returned(callee) {
            return Err(Error::invalid_attribute(format!(
                "call target '{}' must return before it is callable",
                self.func(callee).name
            )));
        }
        let parameter_shapes = self.shapes_of(self.inputs(callee));
        if parameter_shapes.len() != args.len() {
            return Err(Error::invalid_attribute(format!(
                "call target '{}' takes {} arguments, got {}",
                self.func(callee).name,
                parameter_shapes.len(),
                args.len()
            )));
        }
        for (i, (arg, parameter)) in args.iter().zip(&parameter_shapes).enumerate() {
            if !self.shape(*arg).compatible(parameter) {
                return Err(Error::dim_mismatch(format!(
                    "call argument #{i} of shape {} is incompatible with parameter shape {parameter}",
                    self.shape(*arg)
                )));
            }
        }
        let output_shapes = self.shapes_of(self.results(callee));
        let mut attributes = BTreeMap::new();
        attributes.insert("callee".to_string(), Attribute::FunctionRef(callee));
        Ok(self.add_multi_op(func, op, output_shapes, args.to_vec(), attributes))
    }

    /// Rank-2 matrix multiplication, shorthand for a [`Builder::dot_general`] contracting the
    /// lhs columns with the rhs rows.
    pub fn dot(&mut self, lhs: Value, rhs: Value) -> Result<Value, Error> {
        if self.shape(lhs).rank() != 2 || self.shape(rhs).rank() != 2 {
            return Err(Error::rank_mismatch(format!(
                "dot only supports rank-2 tensors, got {} and {}",
                self.shape(lhs).rank(),
                self.shape(rhs).rank()
            )));
        }
        self.dot_general(lhs, &[1], &[], rhs, &[0], &[]).done()
    }

    /// Starts a generalized dot product ("einsum") over batch, crossed, and contracted axes.
    /// Configure precision, output dtype, and algorithm on the returned builder, then call
    /// [`DotGeneralBuilder::done`].
    pub fn dot_general(
        &mut self,
        lhs: Value,
        lhs_contracting_axes: &[i64],
        lhs_batch_axes: &[i64],
        rhs: Value,
        rhs_contracting_axes: &[i64],
        rhs_batch_axes: &[i64],
    ) -> DotGeneralBuilder<'_> {
        let output_dtype = self.shape(lhs).dtype();
        DotGeneralBuilder {
            builder: self,
            lhs,
            lhs_contracting_axes: lhs_contracting_axes.to_vec(),
            lhs_batch_axes: lhs_batch_axes.to_vec(),
            rhs,
            rhs_contracting_axes: rhs_contracting_axes.to_vec(),
            rhs_batch_axes: rhs_batch_axes.to_vec(),
            precision: [Precision::Default; 2],
            output_dtype,
            algorithm: None,
        }
    }

    /// Starts a convolution of `input` with `kernel`. The returned builder defaults to unit
    /// strides and dilations, zero padding, `[b, f, spatial…]` input/output layouts, an
    /// `[o, i, spatial…]` kernel layout, and no grouping.
    pub fn convolution(&mut self, input: Value, kernel: Value) -> ConvolutionBuilder<'_> {
        let rank = self.shape(input).rank();
        let spatial: Vec<i64> = (2..rank as i64).collect();
        ConvolutionBuilder {
            builder: self,
            input,
            kernel,
            strides: Vec::new(),
            paddings: Vec::new(),
            input_dilations: Vec::new(),
            kernel_dilations: Vec::new(),
            input_batch_axis: 0,
            input_channels_axis: 1,
            input_spatial_axes: spatial.clone(),
            kernel_output_channels_axis: 0,
            kernel_input_channels_axis: 1,
            kernel_spatial_axes: spatial.clone(),
            output_batch_axis: 0,
            output_channels_axis: 1,
            output_spatial_axes: spatial,
            channel_group_count: 1,
            batch_group_count: 1,
            precision: [Precision::Default; 2],
        }
    }

    /// Fast Fourier transform in its forward/inverse, complex/real variants. When `fft_length`
    /// is empty a default is derived from the trailing axis.
    pub fn fft(&mut self, x: Value, fft_type: FftType, fft_length: &[i64]) -> Result<Value, Error> {
        let op = OpType::Fft;
        let func = self.target_function(op, &[x])?;
        let fft_length = if fft_length.is_empty() {
            let last = self.shape(x).dim(-1);
            match fft_type {
                FftType::Forward | FftType::Inverse | FftType::ForwardReal => vec![last],
                FftType::InverseReal => vec![(last - 1) * 2],
            }
        } else {
            fft_length.to_vec()
        };
        let shape = infer::fft(self.shape(x), fft_type, &fft_length)?;
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "fft_type".to_string(),
            Attribute::MlirToken(format!("#stablehlo<fft_type {}>", fft_type.mlir_token())),
        );
        attributes.insert("fft_length".to_string(), Attribute::IntList(fft_length));
        Ok(self.add_op(func, op, shape, vec![x], attributes))
    }

    /// Generates `shape` filled with random bits from the provided RNG `state`, returning the
    /// updated state and the generated values.
    pub fn rng_bit_generator(
        &mut self,
        state: Value,
        shape: Shape,
        algorithm: RngAlgorithm,
    ) -> Result<(Value, Value), Error> {
        let op = OpType::RngBitGenerator;
        let func = self.target_function(op, &[state])?;
        let state_shape = self.shape(state).clone();
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "rng_algorithm".to_string(),
            Attribute::MlirToken(format!("#stablehlo<rng_algorithm {}>", algorithm.mlir_token())),
        );
        let outputs = self.add_multi_op(func, op, vec![state_shape, shape], vec![state], attributes);
        Ok((outputs[0], outputs[1]))
    }

    /// Batch normalization for inference.
    pub fn batch_norm_inference(
        &mut self,
        operand: Value,
        scale: Value,
        offset: Value,
        mean: Value,
        variance: Value,
        epsilon: f32,
        feature_axis: i64,
    ) -> Result<Value, Error> {
        let op = OpType::BatchNormInference;
        let func = self.target_function(op, &[operand, scale, offset, mean, variance])?;
        let feature_axis = infer::adjust_axis_to_rank(feature_axis, self.shape(operand).rank())?;
        let shape = self.shape(operand).clone();
        let mut attributes = BTreeMap::new();
        attributes.insert("epsilon".to_string(), Attribute::Real(epsilon as f64));
        attributes.insert("feature_index".to_string(), Attribute::Int(feature_axis as i64));
        Ok(self.add_op(func, op, shape, vec![operand, scale, offset, mean, variance], attributes))
    }

    /// Batch normalization for training: returns the normalized tensor, the batch mean, and
    /// the batch variance.
    pub fn batch_norm_training(
        &mut self,
        operand: Value,
        scale: Value,
        offset: Value,
        epsilon: f32,
        feature_axis: i64,
    ) -> Result<(Value, Value, Value), Error> {
        let op = OpType::BatchNormTraining;
        let func = self.target_function(op, &[operand, scale, offset])?;
        let operand_shape = self.shape(operand).clone();
        let feature_axis = infer::adjust_axis_to_rank(feature_axis, operand_shape.rank())?;
        let feature_shape =
            Shape::of(operand_shape.dtype(), [operand_shape.dimensions[feature_axis]]);
        let mut attributes = BTreeMap::new();
        attributes.insert("epsilon".to_string(), Attribute::Real(epsilon as f64));
        attributes.insert("feature_index".to_string(), Attribute::Int(feature_axis as i64));
        let outputs = self.add_multi_op(
            func,
            op,
            vec![operand_shape, feature_shape.clone(), feature_shape],
            vec![operand, scale, offset],
            attributes,
        );
        Ok((outputs[0], outputs[1], outputs[2]))
    }

    /// Batch normalization gradients with respect to the operand, scale, and offset.
    #[allow(clippy::too_many_arguments)]
    pub fn batch_norm_grad(
        &mut self,
        operand: Value,
        scale: Value,
        mean: Value,
        variance: Value,
        grad_output: Value,
        epsilon: f32,
        feature_axis: i64,
    ) -> Result<(Value, Value, Value), Error> {
        let op = OpType::BatchNormGrad;
        let func = self.target_function(op, &[operand, scale, mean, variance, grad_output])?;
        let operand_shape = self.shape(operand).clone();
        let feature_axis = infer::adjust_axis_to_rank(feature_axis, operand_shape.rank())?;
        let feature_shape =
            Shape::of(operand_shape.dtype(), [operand_shape.dimensions[feature_axis]]);
        let mut attributes = BTreeMap::new();
        attributes.insert("epsilon".to_string(), Attribute::Real(epsilon as f64));
        attributes.insert("feature_index".to_string(), Attribute::Int(feature_axis as i64));
        let outputs = self.add_multi_op(
            func,
            op,
            vec![operand_shape, feature_shape.clone(), feature_shape],
            vec![operand, scale, mean, variance, grad_output],
            attributes,
        );
        Ok((outputs[0], outputs[1], outputs[2]))
    }

    /// Quantizes the operand to the static quantized type carried by `quantized_shape`. The
    /// dimensions of `quantized_shape` are ignored; the output keeps the operand dimensions.
    pub fn uniform_quantize(&mut self, operand: Value, quantized_shape: Shape) -> Result<Value, Error> {
        let op = OpType::UniformQuantize;
        let func = self.target_function(op, &[operand])?;
        let quantization = quantized_shape.quantization.clone().ok_or_else(|| {
            Error::invalid_attribute("uniform_quantize requires quantization metadata".to_string())
        })?;
        quantization.validate()?;
        let mut shape = quantized_shape;
        shape.dimensions = self.shape(operand).dimensions.clone();
        Ok(self.add_op(func, op, shape, vec![operand], BTreeMap::new()))
    }

    /// Dequantizes the operand back to its expressed (float) type.
    pub fn uniform_dequantize(&mut self, operand: Value) -> Result<Value, Error> {
        let op = OpType::UniformDequantize;
        let func = self.target_function(op, &[operand])?;
        let operand_shape = self.shape(operand);
        let quantization = operand_shape.quantization.clone().ok_or_else(|| {
            Error::invalid_attribute(format!(
                "uniform_dequantize operand {operand_shape} carries no quantization metadata"
            ))
        })?;
        let mut shape = operand_shape.with_dtype(quantization.expressed_type);
        shape.quantization = None;
        Ok(self.add_op(func, op, shape, vec![operand], BTreeMap::new()))
    }

    /// Returns a scalar `i32` holding the runtime extent of `dimension` (negative values index
    /// from the end).
    pub fn get_dimension_size(&mut self, operand: Value, dimension: i64) -> Result<Value, Error> {
        let op = OpType::GetDimensionSize;
        let func = self.target_function(op, &[operand])?;
        let dimension = infer::adjust_axis_to_rank(dimension, self.shape(operand).rank())?;
        let mut attributes = BTreeMap::new();
        attributes.insert("dimension".to_string(), Attribute::Int(dimension as i64));
        Ok(self.add_op(func, op, Shape::scalar(DType::I32), vec![operand], attributes))
    }

    /// Packs values into a tuple.
    pub fn tuple(&mut self, operands: &[Value]) -> Result<Value, Error> {
        let op = OpType::Tuple;
        if operands.is_empty() {
            return Err(Error::invalid_attribute("tuple requires at least one operand".to_string()));
        }
        let func = self.target_function(op, operands)?;
        let shape = Shape::tuple(self.shapes_of(operands));
        Ok(self.add_op(func, op, shape, operands.to_vec(), BTreeMap::new()))
    }

    /// Projects element `index` out of a tuple value.
    pub fn get_tuple_element(&mut self, tuple: Value, index: i64) -> Result<Value, Error> {
        let op = OpType::GetTupleElement;
        let func = self.target_function(op, &[tuple])?;
        let tuple_shape = self.shape(tuple);
        if !tuple_shape.is_tuple() {
            return Err(Error::dtype_mismatch(format!(
                "get_tuple_element requires a tuple operand, got {tuple_shape}"
            )));
        }
        let count = tuple_shape.tuple_shapes.len();
        if index < 0 || index >= count as i64 {
            return Err(Error::invalid_axis(format!(
                "tuple element index {index} out of bounds for tuple of {count}"
            )));
        }
        let shape = tuple_shape.tuple_shapes[index as usize].clone();
        let mut attributes = BTreeMap::new();
        attributes.insert("index".to_string(), Attribute::Int(index));
        Ok(self.add_op(func, op, shape, vec![tuple], attributes))
    }
}

/// Serializes reduce-window / convolution paddings as a `[rank, 2]` tensor literal.
fn paddings_literal(paddings: &[(i64, i64)]) -> Result<Literal, Error> {
    let flat: Vec<i64> = paddings.iter().flat_map(|&(low, high)| [low, high]).collect();
    Literal::from_flat_i64(DType::I64, &flat, [paddings.len() as i64, 2])
}

/// Algorithm settings for a [`OpType::DotGeneral`] operation. The default is not to constrain
/// the algorithm at all.
#[derive(Clone, Debug, PartialEq)]
pub struct DotGeneralAlgorithm {
    pub lhs_precision_type: DType,
    pub rhs_precision_type: DType,
    pub accumulation_type: DType,
    pub lhs_component_count: i64,
    pub rhs_component_count: i64,
    pub num_primitive_operations: i64,
    pub allow_imprecise_accumulation: bool,
}

/// In-flight [`OpType::DotGeneral`] configuration. See [`Builder::dot_general`].
pub struct DotGeneralBuilder<'b> {
    builder: &'b mut Builder,
    lhs: Value,
    lhs_contracting_axes: Vec<i64>,
    lhs_batch_axes: Vec<i64>,
    rhs: Value,
    rhs_contracting_axes: Vec<i64>,
    rhs_batch_axes: Vec<i64>,
    precision: [Precision; 2],
    output_dtype: DType,
    algorithm: Option<DotGeneralAlgorithm>,
}

impl DotGeneralBuilder<'_> {
    /// Sets the operand precisions, trading accuracy for speed on accelerator backends.
    pub fn precision(mut self, lhs: Precision, rhs: Precision) -> Self {
        self.precision = [lhs, rhs];
        self
    }

    /// Sets the output dtype; useful to accumulate narrow inputs (e.g., `bf16`) at a higher
    /// precision.
    pub fn output_dtype(mut self, dtype: DType) -> Self {
        self.output_dtype = dtype;
        self
    }

    /// Constrains the dot algorithm.
    pub fn algorithm(mut self, algorithm: DotGeneralAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// Validates the axes and shapes and appends the operation.
    pub fn done(self) -> Result<Value, Error> {
        let op = OpType::DotGeneral;
        let builder = self.builder;
        let func = builder.target_function(op, &[self.lhs, self.rhs])?;
        let shape = infer::dot_general(
            builder.shape(self.lhs),
            &self.lhs_contracting_axes,
            &self.lhs_batch_axes,
            builder.shape(self.rhs),
            &self.rhs_contracting_axes,
            &self.rhs_batch_axes,
            self.output_dtype,
        )?;
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "dot_dimension_numbers".to_string(),
            Attribute::MlirToken(format!(
                "#stablehlo.dot<lhs_batching_dimensions = {}, rhs_batching_dimensions = {}, lhs_contracting_dimensions = {}, rhs_contracting_dimensions = {}>",
                render_index_list(&self.lhs_batch_axes),
                render_index_list(&self.rhs_batch_axes),
                render_index_list(&self.lhs_contracting_axes),
                render_index_list(&self.rhs_contracting_axes)
            )),
        );
        attributes.insert(
            "precision_config".to_string(),
            Attribute::MlirToken(format!(
                "[#stablehlo<precision {}>, #stablehlo<precision {}>]",
                self.precision[0].mlir_token(),
                self.precision[1].mlir_token()
            )),
        );
        if let Some(algorithm) = &self.algorithm {
            attributes.insert(
                "algorithm".to_string(),
                Attribute::MlirToken(format!(
                    "#stablehlo.dot_algorithm<lhs_precision_type = {}, rhs_precision_type = {}, accumulation_type = {}, lhs_component_count = {}, rhs_component_count = {}, num_primitive_operations = {}, allow_imprecise_accumulation = {}>",
                    algorithm.lhs_precision_type,
                    algorithm.rhs_precision_type,
                    algorithm.accumulation_type,
                    algorithm.lhs_component_count,
                    algorithm.rhs_component_count,
                    algorithm.num_primitive_operations,
                    algorithm.allow_imprecise_accumulation
                )),
            );
        }
        Ok(builder.add_op(func, op, shape, vec![self.lhs, self.rhs], attributes))
    }
}

/// In-flight [`OpType::Convolution`] configuration. See [`Builder::convolution`].
pub struct ConvolutionBuilder<'b> {
    builder: &'b mut Builder,
    input: Value,
    kernel: Value,
    strides: Vec<i64>,
    paddings: Vec<(i64, i64)>,
    input_dilations: Vec<i64>,
    kernel_dilations: Vec<i64>,
    input_batch_axis: i64,
    input_channels_axis: i64,
    input_spatial_axes: Vec<i64>,
    kernel_input_channels_axis: i64,
    kernel_output_channels_axis: i64,
    kernel_spatial_axes: Vec<i64>,
    output_batch_axis: i64,
    output_channels_axis: i64,
    output_spatial_axes: Vec<i64>,
    channel_group_count: i64,
    batch_group_count: i64,
    precision: [Precision; 2],
}

impl ConvolutionBuilder<'_> {
    pub fn strides(mut self, strides: &[i64]) -> Self {
        self.strides = strides.to_vec();
        self
    }

    /// Per-spatial-axis `(low, high)` padding.
    pub fn paddings(mut self, paddings: &[(i64, i64)]) -> Self {
        self.paddings = paddings.to_vec();
        self
    }

    pub fn input_dilations(mut self, dilations: &[i64]) -> Self {
        self.input_dilations = dilations.to_vec();
        self
    }

    pub fn kernel_dilations(mut self, dilations: &[i64]) -> Self {
        self.kernel_dilations = dilations.to_vec();
        self
    }

    /// Input layout: batch axis, channels axis, and spatial axes (negative values count from
    /// the end).
    pub fn input_layout(mut self, batch: i64, channels: i64, spatial: &[i64]) -> Self {
        self.input_batch_axis = batch;
        self.input_channels_axis = channels;
        self.input_spatial_axes = spatial.to_vec();
        self
    }

    /// Kernel layout: input-channels axis, output-channels axis, and spatial axes.
    pub fn kernel_layout(mut self, input_channels: i64, output_channels: i64, spatial: &[i64]) -> Self {
        self.kernel_input_channels_axis = input_channels;
        self.kernel_output_channels_axis = output_channels;
        self.kernel_spatial_axes = spatial.to_vec();
        self
    }

    /// Output layout: batch axis, channels axis, and spatial axes.
    pub fn output_layout(mut self, batch: i64, channels: i64, spatial: &[i64]) -> Self {
        self.output_batch_axis = batch;
        self.output_channels_axis = channels;
        self.output_spatial_axes = spatial.to_vec();
        self
    }

    /// Feature-group count (grouped/depthwise convolutions).
    pub fn channel_group_count(mut self, count: i64) -> Self {
        self.channel_group_count = count;
        self
    }

    /// Batch-group count.
    pub fn batch_group_count(mut self, count: i64) -> Self {
        self.batch_group_count = count;
        self
    }

    pub fn precision(mut self, input: Precision, kernel: Precision) -> Self {
        self.precision = [input, kernel];
        self
    }

    /// Validates the configuration and appends the operation.
    pub fn done(self) -> Result<Value, Error> {
        let op = OpType::Convolution;
        let builder = self.builder;
        let func = builder.target_function(op, &[self.input, self.kernel])?;
        let rank = builder.shape(self.input).rank();
        let spatial_rank = rank.saturating_sub(2);

        let ones = |values: &[i64]| if values.is_empty() { vec![1; spatial_rank] } else { values.to_vec() };
        let strides = ones(&self.strides);
        let input_dilations = ones(&self.input_dilations);
        let kernel_dilations = ones(&self.kernel_dilations);
        let paddings =
            if self.paddings.is_empty() { vec![(0, 0); spatial_rank] } else { self.paddings.clone() };

        let axis = |value: i64| infer::adjust_axis_to_rank(value, rank);
        let axes = |values: &[i64]| -> Result<Vec<usize>, Error> {
            values.iter().map(|&value| axis(value)).collect()
        };
        let input_batch_axis = axis(self.input_batch_axis)?;
        let input_channels_axis = axis(self.input_channels_axis)?;
        let input_spatial_axes = axes(&self.input_spatial_axes)?;
        let kernel_input_channels_axis = axis(self.kernel_input_channels_axis)?;
        let kernel_output_channels_axis = axis(self.kernel_output_channels_axis)?;
        let kernel_spatial_axes = axes(&self.kernel_spatial_axes)?;
        let output_batch_axis = axis(self.output_batch_axis)?;
        let output_channels_axis = axis(self.output_channels_axis)?;
        let output_spatial_axes = axes(&self.output_spatial_axes)?;

        let shape = infer::convolve(
            builder.shape(self.input),
            builder.shape(self.kernel),
            &strides,
            &paddings,
            &input_dilations,
            &kernel_dilations,
            input_batch_axis,
            input_channels_axis,
            &input_spatial_axes,
            kernel_input_channels_axis,
            kernel_output_channels_axis,
            &kernel_spatial_axes,
            output_batch_axis,
            output_channels_axis,
            &output_spatial_axes,
            self.channel_group_count,
            self.batch_group_count,
        )?;

        let dimension_numbers = conv_dimension_numbers(
            input_batch_axis,
            input_channels_axis,
            &input_spatial_axes,
            kernel_input_channels_axis,
            kernel_output_channels_axis,
            &kernel_spatial_axes,
            output_batch_axis,
            output_channels_axis,
            &output_spatial_axes,
        );
        let mut attributes = BTreeMap::new();
        attributes.insert("window_strides".to_string(), Attribute::IntList(strides));
        attributes.insert("padding".to_string(), Attribute::TensorLiteral(paddings_literal(&paddings)?));
        attributes.insert("lhs_dilation".to_string(), Attribute::IntList(input_dilations));
        attributes.insert("rhs_dilation".to_string(), Attribute::IntList(kernel_dilations));
        attributes.insert("window_reversal".to_string(), Attribute::BoolList(vec![false; spatial_rank]));
        attributes.insert("dimension_numbers".to_string(), Attribute::MlirToken(dimension_numbers));
        attributes.insert("feature_group_count".to_string(), Attribute::Int(self.channel_group_count));
        attributes.insert("batch_group_count".to_string(), Attribute::Int(self.batch_group_count));
        attributes.insert(
            "precision_config".to_string(),
            Attribute::MlirToken(format!(
                "[#stablehlo<precision {}>, #stablehlo<precision {}>]",
                self.precision[0].mlir_token(),
                self.precision[1].mlir_token()
            )),
        );
        Ok(builder.add_op(func, op, shape, vec![self.input, self.kernel], attributes))
    }
}

/// Renders the `#stablehlo.conv<[…]x[…]->[…]>` dimension-numbers token.
#[allow(clippy::too_many_arguments)]
fn conv_dimension_numbers(
    input_batch_axis: usize,
    input_channels_axis: usize,
    input_spatial_axes: &[usize],
    kernel_input_channels_axis: usize,
    kernel_output_channels_axis: usize,
    kernel_spatial_axes: &[usize],
    output_batch_axis: usize,
    output_channels_axis: usize,
    output_spatial_axes: &[usize],
) -> String {
    let rank = input_spatial_axes.len() + 2;
    let layout = |a: usize, a_label: &str, b: usize, b_label: &str, spatial: &[usize]| {
        let mut labels = vec![String::new(); rank];
        labels[a] = a_label.to_string();
        labels[b] = b_label.to_string();
        for (i, &axis) in spatial.iter().enumerate() {
            labels[axis] = i.to_string();
        }
        labels.join(", ")
    };
    format!(
        "#stablehlo.conv<[{}]x[{}]->[{}]>",
        layout(input_batch_axis, "b", input_channels_axis, "f", input_spatial_axes),
        layout(kernel_input_channels_axis, "i", kernel_output_channels_axis, "o", kernel_spatial_axes),
        layout(output_batch_axis, "b", output_channels_axis, "f", output_spatial_axes)
    )
}

impl Builder {
    /// Broadcasts the operand to a shape carried by a 1-D integer tensor. The builder first
    /// tries to specialize the operation: when the shape tensor folds to concrete extents (or
    /// folds partially with a plausible fill) and the broadcast is valid, a static
    /// `broadcast_in_dim` is emitted instead. Otherwise the dynamic operation is kept with
    /// all-unknown dimensions and positive per-axis bounds derived from the extracted values or
    /// from the operand extents, clamped to the configured range.
    pub fn dynamic_broadcast_in_dim(
        &mut self,
        operand: Value,
        output_dimensions: Value,
        broadcast_dimensions: &[i64],
    ) -> Result<Value, Error> {
        let op = OpType::DynamicBroadcastInDim;
        let func = self.target_function(op, &[operand, output_dimensions])?;
        let dims_shape = self.shape(output_dimensions);
        if dims_shape.rank() != 1 {
            return Err(Error::rank_mismatch(format!(
                "outputDimensions must be a 1-D tensor, got rank {}",
                dims_shape.rank()
            )));
        }
        if !dims_shape.dtype().is_integer() {
            return Err(Error::dtype_mismatch(format!(
                "outputDimensions must be an integer tensor, got {}",
                dims_shape.dtype()
            )));
        }
        let operand_shape = self.shape(operand).clone();
        if broadcast_dimensions.len() != operand_shape.rank() {
            return Err(Error::invalid_attribute(format!(
                "broadcast_dimensions length ({}) must match operand rank ({})",
                broadcast_dimensions.len(),
                operand_shape.rank()
            )));
        }
        let output_rank = {
            let extent = dims_shape.dimensions[0];
            if extent < 0 { operand_shape.rank() } else { extent as usize }
        };
        let options = self.dynamic_shape_options;

        let broadcast_valid = |target: &[i64]| {
            broadcast_dimensions.iter().enumerate().all(|(operand_axis, &output_axis)| {
                if output_axis < 0 || output_axis >= target.len() as i64 {
                    return true;
                }
                let operand_dim = operand_shape.dimensions[operand_axis];
                let target_dim = target[output_axis as usize];
                operand_dim < 0 || operand_dim == 1 || operand_dim == target_dim
            })
        };

        let extracted = self.extract_constant_shape(output_dimensions);
        if let Some(target) = &extracted {
            if target.len() == output_rank && target.iter().all(|&dim| dim > 0) && broadcast_valid(target) {
                let target_shape = operand_shape.with_dimensions(target.clone());
                return self.broadcast_in_dim(operand, target_shape, broadcast_dimensions);
            }
        }

        let partial = self
            .extract_concatenated_shape_partial(output_dimensions)
            .filter(|(_, _, any)| *any)
            .map(|(values, _, _)| values);
        if let Some(partial) = &partial {
            if partial.len() == output_rank {
                let filled: Vec<i64> = partial
                    .iter()
                    .map(|&dim| if dim > 0 { dim } else { options.fill_dim })
                    .collect();
                if broadcast_valid(&filled) {
                    let target_shape = operand_shape.with_dimensions(filled);
                    return self.broadcast_in_dim(operand, target_shape, broadcast_dimensions);
                }
            }
        }

        // Keep the dynamic operation, but give every dimension a positive bound so bounded
        // dynamism survives downstream translation.
        let best = extracted.or(partial);
        let max_operand_extent = operand_shape.dimensions.iter().copied().max().unwrap_or(1).max(1);
        let fallback_bound =
            (max_operand_extent * output_rank.max(1) as i64).clamp(options.min_bound, options.max_bound);
        let bounds: Vec<i64> = (0..output_rank)
            .map(|axis| match best.as_ref().and_then(|values| values.get(axis)) {
                Some(&value) if value > 0 => value,
                _ => fallback_bound,
            })
            .collect();
        let mut shape = operand_shape.with_dimensions(vec![DIM_UNKNOWN; output_rank]);
        shape.dimension_bounds = bounds;
        shape.encode_bounds = true;
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "broadcast_dimensions".to_string(),
            Attribute::IntList(broadcast_dimensions.to_vec()),
        );
        Ok(self.add_op(func, op, shape, vec![operand, output_dimensions], attributes))
    }

    /// Reshapes the operand to a shape carried by a 1-D integer tensor, specializing to a
    /// static `reshape` through the constant-folding shape evaluator:
    ///
    /// 1. a fully-extracted shape whose product matches the operand size is used directly;
    /// 2. a single `-1` slot is inferred from the operand size;
    /// 3. a partial extraction with a single unresolved slot is filled the same way;
    /// 4. failing extraction entirely, a same-rank fully-static operand with no unit
    ///    dimensions passes its dimensions through;
    /// 5. otherwise a deterministic static shape is synthesized (extracted values kept,
    ///    unknowns defaulting to the configured fill, falling back to distributing the operand
    ///    size across the rank when the product disagrees).
    ///
    /// The rewrite is deterministic and never changes the behavior of statically-shaped
    /// values.
    pub fn dynamic_reshape(&mut self, operand: Value, output_shape: Value) -> Result<Value, Error> {
        let op = OpType::DynamicReshape;
        let _func = self.target_function(op, &[operand, output_shape])?;
        let dims_shape = self.shape(output_shape);
        if dims_shape.rank() != 1 {
            return Err(Error::rank_mismatch(format!(
                "outputShape must be a 1-D tensor, got rank {}",
                dims_shape.rank()
            )));
        }
        if !dims_shape.dtype().is_integer() {
            return Err(Error::dtype_mismatch(format!(
                "outputShape must be an integer tensor, got {}",
                dims_shape.dtype()
            )));
        }
        let operand_shape = self.shape(operand).clone();
        let output_rank = {
            let extent = dims_shape.dimensions[0];
            if extent < 0 { operand_shape.rank() } else { extent as usize }
        };
        let operand_size = operand_shape.size();
        let options = self.dynamic_shape_options;

        if let Some(extracted) = self.extract_constant_shape(output_shape) {
            if extracted.len() == output_rank {
                let negative_slots =
                    extracted.iter().filter(|&&dim| dim <= 0).count();
                if negative_slots == 0 {
                    if operand_shape.is_dynamic() {
                        // The operand size is unknown; trust the extracted shape.
                        return self.reshape(operand, &extracted);
                    }
                    if Some(extracted.iter().product::<i64>()) == operand_size {
                        return self.reshape(operand, &extracted);
                    }
                } else if negative_slots == 1 && extracted.iter().all(|&dim| dim != 0) {
                    if let Some(size) = operand_size {
                        let known: i64 =
                            extracted.iter().filter(|&&dim| dim > 0).product();
                        if known > 0 && size % known == 0 {
                            let inferred = size / known;
                            let filled: Vec<i64> = extracted
                                .iter()
                                .map(|&dim| if dim > 0 { dim } else { inferred })
                                .collect();
                            return self.reshape(operand, &filled);
                        }
                    }
                }
                return self.synthesized_reshape(operand, output_rank, Some(extracted.as_slice()), operand_size, options.fill_dim);
            }
            return self.synthesized_reshape(operand, output_rank, Some(extracted.as_slice()), operand_size, options.fill_dim);
        }

        if let Some((partial, _, any)) = self.extract_concatenated_shape_partial(output_shape) {
            if any && partial.len() == output_rank {
                let unresolved = partial.iter().filter(|&&dim| dim <= 0).count();
                if unresolved == 1 {
                    if let Some(size) = operand_size {
                        let known: i64 = partial.iter().filter(|&&dim| dim > 0).product();
                        if known > 0 && size % known == 0 {
                            let inferred = size / known;
                            let filled: Vec<i64> = partial
                                .iter()
                                .map(|&dim| if dim > 0 { dim } else { inferred })
                                .collect();
                            return self.reshape(operand, &filled);
                        }
                    }
                }
                return self.synthesized_reshape(operand, output_rank, Some(partial.as_slice()), operand_size, options.fill_dim);
            }
        }

        // No usable extraction at all.
        if !operand_shape.is_dynamic()
            && output_rank == operand_shape.rank()
            && operand_shape.dimensions.iter().all(|&dim| dim != 1)
        {
            // The reshape cannot change anything without a unit dimension to fold, so pass the
            // operand dimensions through.
            let dimensions = operand_shape.dimensions.clone();
            return self.reshape(operand, &dimensions);
        }
        self.synthesized_reshape(operand, output_rank, None, operand_size, options.fill_dim)
    }

    /// Rule 5 of the dynamic-reshape specialization: honor extracted positive values, default
    /// unknown slots, and fall back to distributing the operand size across the rank when the
    /// product disagrees (leading dimensions 1, trailing dimension absorbs the remainder).
    fn synthesized_reshape(
        &mut self,
        operand: Value,
        output_rank: usize,
        extracted: Option<&[i64]>,
        operand_size: Option<i64>,
        fill_dim: i64,
    ) -> Result<Value, Error> {
        let mut dimensions: Vec<i64> = (0..output_rank)
            .map(|axis| match extracted.and_then(|values| values.get(axis)) {
                Some(&value) if value > 0 => value,
                _ => fill_dim,
            })
            .collect();
        if let Some(size) = operand_size {
            if dimensions.iter().product::<i64>() != size {
                tracing::warn!(
                    target_shape = ?dimensions,
                    operand_size = size,
                    "dynamic_reshape target does not preserve the operand size; distributing"
                );
                dimensions = vec![1; output_rank];
                if output_rank > 0 {
                    dimensions[output_rank - 1] = size;
                }
            }
        }
        self.reshape(operand, &dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Builder;

    fn scalar_f32(b: &mut Builder, func: FuncId) -> Value {
        b.input(func, Shape::scalar(DType::F32)).unwrap()
    }

    #[test]
    fn test_elementwise_construction() {
        let mut b = Builder::new("elementwise");
        let main = b.main();
        let x = scalar_f32(&mut b, main);
        let y = scalar_f32(&mut b, main);
        let sum = b.add(x, y).unwrap();
        let product = b.mul(sum, sum).unwrap();
        let activated = b.tanh(product).unwrap();
        assert_eq!(b.shape(activated), &Shape::scalar(DType::F32));
        assert_eq!(b.func(main).statements.len(), 3);

        // A failed operation leaves the statement list unchanged.
        let boolean = b.input(main, Shape::scalar(DType::Bool)).unwrap();
        assert!(b.add(x, boolean).is_err());
        assert_eq!(b.func(main).statements.len(), 3);
    }

    #[test]
    fn test_closure_capture() {
        let mut b = Builder::new("capture");
        let main = b.main();
        let outer = scalar_f32(&mut b, main);
        let closure = b.closure(main);
        let inner = b.constant_scalar(closure, 1.0f32).unwrap();
        // Referencing an ancestor value from a closure lands the operation in the closure.
        let sum = b.add(outer, inner).unwrap();
        assert_eq!(sum.function(), closure);
    }

    #[test]
    fn test_reduce() {
        let mut b = Builder::new("reduce");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [2, 3, 4])).unwrap();
        let zero = b.constant_scalar(main, 0.0f32).unwrap();

        let reducer = b.closure(main);
        let lhs = scalar_f32(&mut b, reducer);
        let rhs = scalar_f32(&mut b, reducer);
        let sum = b.add(lhs, rhs).unwrap();
        b.ret(reducer, &[sum]).unwrap();

        let reduced = b.reduce(x, zero, reducer, &[1]).unwrap();
        assert_eq!(b.shape(reduced).dimensions, vec![2, 4]);

        // An unreturned reducer is rejected.
        let y = b.input(main, Shape::of(DType::F32, [2])).unwrap();
        let open = b.closure(main);
        assert!(b.reduce(y, zero, open, &[0]).is_err());
    }

    #[test]
    fn test_reduce_window_defaults() {
        let mut b = Builder::new("pooling");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [1, 8, 8, 3])).unwrap();
        let init = b.constant_scalar(main, f32::NEG_INFINITY).unwrap();

        let reducer = b.closure(main);
        let lhs = scalar_f32(&mut b, reducer);
        let rhs = scalar_f32(&mut b, reducer);
        let max = b.maximum(lhs, rhs).unwrap();
        b.ret(reducer, &[max]).unwrap();

        // The default stride equals the window dimensions.
        let pooled = b
            .reduce_window(x, init, reducer, &[1, 2, 2, 1], &[], &[], &[], &[])
            .unwrap();
        assert_eq!(b.shape(pooled).dimensions, vec![1, 4, 4, 3]);
    }

    #[test]
    fn test_sort() {
        let mut b = Builder::new("sorting");
        let main = b.main();
        let values = b.input(main, Shape::of(DType::F32, [4, 16])).unwrap();
        let indices = b.input(main, Shape::of(DType::I32, [4, 16])).unwrap();

        let comparator = b.closure(main);
        let lhs = scalar_f32(&mut b, comparator);
        let rhs = scalar_f32(&mut b, comparator);
        let _lhs_index = b.input(comparator, Shape::scalar(DType::I32)).unwrap();
        let _rhs_index = b.input(comparator, Shape::scalar(DType::I32)).unwrap();
        let greater =
            b.compare(lhs, rhs, ComparisonDirection::Gt, ComparisonType::Float).unwrap();
        b.ret(comparator, &[greater]).unwrap();

        let sorted = b.sort(comparator, -1, true, &[values, indices]).unwrap();
        assert_eq!(sorted.len(), 2);
        assert_eq!(b.shape(sorted[0]).dimensions, vec![4, 16]);
        assert_eq!(b.shape(sorted[1]).dtype(), DType::I32);
    }

    #[test]
    fn test_while_loop_validation() {
        let mut b = Builder::new("looping");
        let main = b.main();
        let counter = b.constant_scalar(main, 0i32).unwrap();

        // Condition returning a non-bool is rejected.
        let bad_cond = b.closure(main);
        let c = b.input(bad_cond, Shape::scalar(DType::I32)).unwrap();
        b.ret(bad_cond, &[c]).unwrap();
        let body = b.closure(main);
        let c = b.input(body, Shape::scalar(DType::I32)).unwrap();
        let one = b.constant_scalar(body, 1i32).unwrap();
        let next = b.add(c, one).unwrap();
        b.ret(body, &[next]).unwrap();
        assert!(matches!(
            b.while_loop(bad_cond, body, &[counter]),
            Err(Error::DTypeMismatch(message)) if message.contains("scalar bool")
        ));

        // A sibling closure of another function is not usable as a region.
        let other = b.new_function("other");
        let foreign = b.closure(other);
        assert!(matches!(
            b.while_loop(foreign, body, &[counter]),
            Err(Error::CrossFunctionOperand(_))
        ));
    }

    #[test]
    fn test_call_validation() {
        let mut b = Builder::new("calls");
        let callee = b.new_function("add_one");
        let arg = b.input(callee, Shape::scalar(DType::F32)).unwrap();
        let one = b.constant_scalar(callee, 1.0f32).unwrap();
        let sum = b.add(arg, one).unwrap();
        b.ret(callee, &[sum]).unwrap();

        let main = b.main();
        let x = b.constant_scalar(main, 41.0f32).unwrap();
        let results = b.call(callee, &[x]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(b.shape(results[0]), &Shape::scalar(DType::F32));

        // Wrong arity and wrong shapes are rejected.
        assert!(b.call(callee, &[x, x]).is_err());
        let wrong = b.constant_scalar(main, 1i32).unwrap();
        assert!(b.call(callee, &[wrong]).is_err());
    }

    #[test]
    fn test_dot_general_builder() {
        let mut b = Builder::new("matmul");
        let main = b.main();
        let lhs = b.input(main, Shape::of(DType::BF16, [2, 3])).unwrap();
        let rhs = b.input(main, Shape::of(DType::BF16, [3, 4])).unwrap();
        let product = b
            .dot_general(lhs, &[1], &[], rhs, &[0], &[])
            .precision(Precision::High, Precision::High)
            .output_dtype(DType::F32)
            .done()
            .unwrap();
        assert_eq!(b.shape(product), &Shape::of(DType::F32, [2, 4]));

        let product = b.dot(lhs, rhs).unwrap();
        assert_eq!(b.shape(product).dtype(), DType::BF16);
    }

    #[test]
    fn test_convolution_builder() {
        let mut b = Builder::new("conv");
        let main = b.main();
        // NHWC input with HWIO kernel.
        let input = b.input(main, Shape::of(DType::F32, [1, 8, 8, 3])).unwrap();
        let kernel = b.input(main, Shape::of(DType::F32, [3, 3, 3, 16])).unwrap();
        let output = b
            .convolution(input, kernel)
            .paddings(&[(1, 1), (1, 1)])
            .input_layout(0, 3, &[1, 2])
            .kernel_layout(2, 3, &[0, 1])
            .output_layout(0, 3, &[1, 2])
            .done()
            .unwrap();
        assert_eq!(b.shape(output).dimensions, vec![1, 8, 8, 16]);
    }

    #[test]
    fn test_dynamic_reshape_folds_to_static() {
        // Shape-arithmetic folding: concatenate(get_dimension_size(x, 0), [64, -1]) feeding a
        // dynamic reshape of a [12, 128] tensor resolves to a static [12, 64, 2] reshape.
        let mut b = Builder::new("folding");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [12, 128])).unwrap();
        let leading = b.get_dimension_size(x, 0).unwrap();
        let leading = b.reshape(leading, &[1]).unwrap();
        let trailing = b
            .constant(main, Literal::from_flat_i64(DType::I32, &[64, -1], [2]).unwrap())
            .unwrap();
        let target = b.concatenate(0, &[leading, trailing]).unwrap();
        let reshaped = b.dynamic_reshape(x, target).unwrap();

        let statement = b.defining_statement(reshaped).unwrap();
        assert_eq!(statement.op, OpType::Reshape);
        assert_eq!(b.shape(reshaped).dimensions, vec![12, 64, 2]);
        assert_eq!(b.shape(reshaped).size(), b.shape(x).size());
    }

    #[test]
    fn test_dynamic_reshape_all_negative_distributes() {
        // An all-negative shape operand with a fully-static input falls back to the
        // distribution rule; the product invariant must hold.
        let mut b = Builder::new("distribute");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [6, 4])).unwrap();
        let target = b
            .constant(main, Literal::from_flat_i64(DType::I32, &[-1, -1, -1], [3]).unwrap())
            .unwrap();
        let reshaped = b.dynamic_reshape(x, target).unwrap();
        let statement = b.defining_statement(reshaped).unwrap();
        assert_eq!(statement.op, OpType::Reshape);
        assert_eq!(b.shape(reshaped).dimensions, vec![1, 1, 24]);
    }

    #[test]
    fn test_dynamic_reshape_pass_through() {
        // With no extraction, matching ranks, a static operand, and no unit dimensions, the
        // operand dimensions pass through unchanged.
        let mut b = Builder::new("pass_through");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [6, 4])).unwrap();
        let target = b.input(main, Shape::of(DType::I32, [2])).unwrap();
        let reshaped = b.dynamic_reshape(x, target).unwrap();
        assert_eq!(b.shape(reshaped).dimensions, vec![6, 4]);
    }

    #[test]
    fn test_dynamic_broadcast_folds_to_static() {
        let mut b = Builder::new("broadcast_fold");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [1, 64])).unwrap();
        let target = b
            .constant(main, Literal::from_flat_i64(DType::I32, &[12, 64], [2]).unwrap())
            .unwrap();
        let broadcast = b.dynamic_broadcast_in_dim(x, target, &[0, 1]).unwrap();
        let statement = b.defining_statement(broadcast).unwrap();
        assert_eq!(statement.op, OpType::BroadcastInDim);
        assert_eq!(b.shape(broadcast).dimensions, vec![12, 64]);
    }

    #[test]
    fn test_dynamic_broadcast_keeps_dynamic_with_bounds() {
        let mut b = Builder::new("broadcast_bounds");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [1, 64])).unwrap();
        // Runtime-computed target shape with no foldable structure.
        let target = b.input(main, Shape::of(DType::I32, [2])).unwrap();
        let broadcast = b.dynamic_broadcast_in_dim(x, target, &[0, 1]).unwrap();
        let statement = b.defining_statement(broadcast).unwrap();
        assert_eq!(statement.op, OpType::DynamicBroadcastInDim);
        let shape = b.shape(broadcast);
        assert_eq!(shape.dimensions, vec![DIM_UNKNOWN, DIM_UNKNOWN]);
        // Bounds are positive and clamped to the configured floor.
        assert_eq!(shape.dimension_bounds, vec![2048, 2048]);
        assert!(shape.encode_bounds);
    }

    #[test]
    fn test_dynamic_broadcast_partial_fill() {
        let mut b = Builder::new("broadcast_partial");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [1, 1])).unwrap();
        let rows = b.get_dimension_size(x, 0).unwrap();
        let rows = b.reshape(rows, &[1]).unwrap();
        let unknown = b.input(main, Shape::of(DType::I32, [1])).unwrap();
        let target = b.concatenate(0, &[rows, unknown]).unwrap();
        let broadcast = b.dynamic_broadcast_in_dim(x, target, &[0, 1]).unwrap();
        // The unresolved slot fills with the configured default and lowers to a static
        // broadcast because the operand dimensions are broadcastable.
        let statement = b.defining_statement(broadcast).unwrap();
        assert_eq!(statement.op, OpType::BroadcastInDim);
        assert_eq!(b.shape(broadcast).dimensions, vec![1, 128]);
    }

    #[test]
    fn test_uniform_quantize_dequantize() {
        let mut b = Builder::new("quantized");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [1, 10])).unwrap();
        let quantized_shape = Shape::scalar(DType::I8)
            .with_quantization(crate::Quantization::uniform(DType::I8, DType::F32, 0.1, 0));
        let quantized = b.uniform_quantize(x, quantized_shape).unwrap();
        assert_eq!(b.shape(quantized).dimensions, vec![1, 10]);
        assert!(b.shape(quantized).quantization.is_some());

        let dequantized = b.uniform_dequantize(quantized).unwrap();
        assert_eq!(b.shape(dequantized).dtype(), DType::F32);
        assert!(b.shape(dequantized).quantization.is_none());

        assert!(b.uniform_dequantize(x).is_err());
    }

    #[test]
    fn test_tuples() {
        let mut b = Builder::new("tuples");
        let main = b.main();
        let x = scalar_f32(&mut b, main);
        let y = b.input(main, Shape::of(DType::I32, [2])).unwrap();
        let packed = b.tuple(&[x, y]).unwrap();
        assert!(b.shape(packed).is_tuple());
        let element = b.get_tuple_element(packed, 1).unwrap();
        assert_eq!(b.shape(element), &Shape::of(DType::I32, [2]));
        assert!(b.get_tuple_element(packed, 2).is_err());
        assert!(b.get_tuple_element(x, 0).is_err());
    }
}

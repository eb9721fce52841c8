//! Constant folding over shape-arithmetic subgraphs. When a dynamic reshape or broadcast is
//! added, the builder partially interprets the statements producing the 1-D shape tensor and
//! specializes the operation to its static form whenever every term resolves.

use crate::builder::{Builder, StatementData, Value};
use crate::{Attribute, DIM_UNKNOWN, OpType};

impl Builder {
    /// Attempts to extract concrete integer dimensions from a shape [`Value`]. Returns the
    /// extracted vector when the producing subgraph is a shape-arithmetic expression over
    /// statically-resolvable terms, and [`None`] when the shape is truly dynamic.
    ///
    /// The walk is pure: it never mutates the IR and never fails — unsupported or unresolvable
    /// subgraphs simply report [`None`].
    pub fn extract_constant_shape(&self, shape_value: Value) -> Option<Vec<i64>> {
        let statement = self.defining_statement(shape_value)?;
        self.extract_from_statement(statement)
    }

    fn extract_from_statement(&self, statement: &StatementData) -> Option<Vec<i64>> {
        match statement.op {
            OpType::Constant => match statement.attributes.get("value") {
                Some(Attribute::TensorLiteral(literal)) => literal.extract_integers(),
                _ => None,
            },
            OpType::Concatenate => self.extract_concatenated(statement),
            // Reshape and Convert pass through to their operand.
            OpType::Reshape | OpType::Convert => {
                self.extract_constant_shape(*statement.inputs.first()?)
            }
            OpType::GetDimensionSize => self.extract_get_dimension_size(statement),
            OpType::Gather => self.extract_gather(statement),
            OpType::Slice => self.extract_slice(statement),
            OpType::BroadcastInDim => self.extract_broadcast(statement),
            OpType::DynamicBroadcastInDim => self.extract_dynamic_broadcast(statement),
            OpType::Multiply => self.extract_multiply(statement),
            OpType::Divide => self.extract_divide(statement),
            OpType::Compare => self.extract_compare(statement),
            OpType::Select => self.extract_select(statement),
            _ => None,
        }
    }

    /// Concatenation of shape tensors along axis 0: every input must extract.
    fn extract_concatenated(&self, statement: &StatementData) -> Option<Vec<i64>> {
        if statement.attributes.get("dimension").and_then(Attribute::as_int).unwrap_or(0) != 0 {
            return None;
        }
        let mut result = Vec::new();
        for &input in &statement.inputs {
            result.extend(self.extract_constant_shape(input)?);
        }
        Some(result)
    }

    /// Like [`Builder::extract_constant_shape`] for a value produced by a `concatenate`, but
    /// reporting partial results: unresolved inputs contribute [`DIM_UNKNOWN`] sentinels, one
    /// per element of the input's static 1-D extent (or a single sentinel when that extent is
    /// unknown). Returns `(vector, all_extracted, any_extracted)`, or [`None`] when the value
    /// is not a concatenation along axis 0.
    pub fn extract_concatenated_shape_partial(
        &self,
        shape_value: Value,
    ) -> Option<(Vec<i64>, bool, bool)> {
        let statement = self.defining_statement(shape_value)?;
        if statement.op != OpType::Concatenate {
            return None;
        }
        if statement.attributes.get("dimension").and_then(Attribute::as_int).unwrap_or(0) != 0 {
            return None;
        }
        let mut result = Vec::new();
        let mut all_extracted = true;
        let mut any_extracted = false;
        for &input in &statement.inputs {
            match self.extract_constant_shape(input) {
                Some(values) => {
                    result.extend(values);
                    any_extracted = true;
                }
                None => {
                    let shape = self.shape(input);
                    let count = if shape.rank() == 1 && shape.dimensions[0] > 0 {
                        shape.dimensions[0] as usize
                    } else {
                        1
                    };
                    result.extend(std::iter::repeat(DIM_UNKNOWN).take(count));
                    all_extracted = false;
                }
            }
        }
        Some((result, all_extracted, any_extracted))
    }

    /// `get_dimension_size` resolves when the queried axis of the operand has a known extent,
    /// even though the operand itself is not constant. Dynamic dimensions never materialize.
    fn extract_get_dimension_size(&self, statement: &StatementData) -> Option<Vec<i64>> {
        let operand = *statement.inputs.first()?;
        let axis = statement.attributes.get("dimension").and_then(Attribute::as_int)?;
        let shape = self.shape(operand);
        if axis < 0 || axis >= shape.rank() as i64 {
            return None;
        }
        let dim = shape.dimensions[axis as usize];
        if dim < 0 { None } else { Some(vec![dim]) }
    }

    /// `gather` of a constant tensor with a constant scalar index. More complex gather
    /// patterns report not-extractable.
    fn extract_gather(&self, statement: &StatementData) -> Option<Vec<i64>> {
        if statement.inputs.len() != 2 {
            return None;
        }
        let operand = self.extract_constant_shape(statement.inputs[0])?;
        let indices = self.extract_constant_shape(statement.inputs[1])?;
        if indices.len() != 1 {
            return None;
        }
        let index = indices[0];
        if index < 0 || index >= operand.len() as i64 {
            return None;
        }
        Some(vec![operand[index as usize]])
    }

    /// `slice` of a 1-D constant with constant start/limit indices.
    fn extract_slice(&self, statement: &StatementData) -> Option<Vec<i64>> {
        let operand = self.extract_constant_shape(*statement.inputs.first()?)?;
        let starts = statement.attributes.get("start_indices").and_then(Attribute::as_int_list)?;
        let limits = statement.attributes.get("limit_indices").and_then(Attribute::as_int_list)?;
        if starts.len() != 1 || limits.len() != 1 {
            return None;
        }
        let (start, limit) = (starts[0], limits[0]);
        if start < 0 || limit > operand.len() as i64 || start >= limit {
            return None;
        }
        Some(operand[start as usize..limit as usize].to_vec())
    }

    /// `broadcast_in_dim` of a scalar constant replicates it to the (1-D, static) output
    /// extent; a constant that is already 1-D passes through.
    fn extract_broadcast(&self, statement: &StatementData) -> Option<Vec<i64>> {
        let values = self.extract_constant_shape(*statement.inputs.first()?)?;
        if values.len() == 1 {
            let output = self.shape(*statement.outputs.first()?);
            if output.rank() != 1 {
                return None;
            }
            let extent = output.dimensions[0];
            if extent < 0 {
                return None;
            }
            return Some(vec![values[0]; extent as usize]);
        }
        if values.len() > 1 {
            return Some(values);
        }
        None
    }

    /// `dynamic_broadcast_in_dim` of a scalar constant: replicated to the extracted target
    /// extent, or to the output's static 1-D extent when the target does not resolve.
    fn extract_dynamic_broadcast(&self, statement: &StatementData) -> Option<Vec<i64>> {
        if statement.inputs.len() != 2 {
            return None;
        }
        let values = self.extract_constant_shape(statement.inputs[0])?;
        if values.len() != 1 {
            return None;
        }
        if let Some(target) = self.extract_constant_shape(statement.inputs[1]) {
            if let Some(&extent) = target.first() {
                if extent > 0 {
                    return Some(vec![values[0]; extent as usize]);
                }
                return None;
            }
        }
        let output = self.shape(*statement.outputs.first()?);
        if output.rank() == 1 && output.dimensions[0] > 0 {
            return Some(vec![values[0]; output.dimensions[0] as usize]);
        }
        None
    }

    /// `multiply` of extracted vectors: scalar x scalar, element-wise, or scalar broadcast.
    fn extract_multiply(&self, statement: &StatementData) -> Option<Vec<i64>> {
        if statement.inputs.len() != 2 {
            return None;
        }
        let lhs = self.extract_constant_shape(statement.inputs[0])?;
        let rhs = self.extract_constant_shape(statement.inputs[1])?;
        elementwise_with_broadcast(&lhs, &rhs, |a, b| Some(a * b))
    }

    /// `divide` of extracted scalars, integer division only, and only when the divisor is
    /// nonzero (division by zero reports not-extractable rather than failing).
    fn extract_divide(&self, statement: &StatementData) -> Option<Vec<i64>> {
        if statement.inputs.len() != 2 {
            return None;
        }
        let lhs = self.extract_constant_shape(statement.inputs[0])?;
        let rhs = self.extract_constant_shape(statement.inputs[1])?;
        if lhs.len() != 1 || rhs.len() != 1 || rhs[0] == 0 {
            return None;
        }
        Some(vec![lhs[0] / rhs[0]])
    }

    /// `compare` of extracted vectors yields 0/1 element-wise, with scalar broadcast.
    fn extract_compare(&self, statement: &StatementData) -> Option<Vec<i64>> {
        if statement.inputs.len() != 2 {
            return None;
        }
        let lhs = self.extract_constant_shape(statement.inputs[0])?;
        let rhs = self.extract_constant_shape(statement.inputs[1])?;
        let direction = match statement.attributes.get("comparison_direction") {
            Some(Attribute::MlirToken(token)) => parse_comparison_direction(token)?,
            _ => return None,
        };
        elementwise_with_broadcast(&lhs, &rhs, |a, b| Some(direction.evaluate(a, b) as i64))
    }

    /// `select`: a scalar condition picks one branch wholesale; a vector condition selects
    /// element-wise, broadcasting scalar branches.
    fn extract_select(&self, statement: &StatementData) -> Option<Vec<i64>> {
        if statement.inputs.len() != 3 {
            return None;
        }
        let condition = self.extract_constant_shape(statement.inputs[0])?;
        let on_true = self.extract_constant_shape(statement.inputs[1]);
        let on_false = self.extract_constant_shape(statement.inputs[2]);

        if condition.len() == 1 {
            return if condition[0] != 0 { on_true } else { on_false };
        }

        let mut on_true = on_true?;
        let mut on_false = on_false?;
        if on_true.len() == 1 {
            on_true = vec![on_true[0]; condition.len()];
        }
        if on_false.len() == 1 {
            on_false = vec![on_false[0]; condition.len()];
        }
        if on_true.len() != condition.len() || on_false.len() != condition.len() {
            return None;
        }
        Some(
            condition
                .iter()
                .enumerate()
                .map(|(i, &cond)| if cond != 0 { on_true[i] } else { on_false[i] })
                .collect(),
        )
    }
}

/// Applies a binary integer function with the broadcast rules shared by the multiply and
/// compare extractors: scalar x scalar, equal lengths, or one scalar side replicated.
fn elementwise_with_broadcast(
    lhs: &[i64],
    rhs: &[i64],
    f: impl Fn(i64, i64) -> Option<i64>,
) -> Option<Vec<i64>> {
    if lhs.len() == rhs.len() {
        lhs.iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect()
    } else if lhs.len() == 1 {
        rhs.iter().map(|&b| f(lhs[0], b)).collect()
    } else if rhs.len() == 1 {
        lhs.iter().map(|&a| f(a, rhs[0])).collect()
    } else {
        None
    }
}

/// Recovers a [`ComparisonDirection`](crate::ComparisonDirection) from its rendered attribute
/// token (e.g., `#stablehlo<comparison_direction EQ>`).
fn parse_comparison_direction(token: &str) -> Option<crate::ComparisonDirection> {
    use crate::ComparisonDirection::*;
    for (name, direction) in
        [("EQ", Eq), ("NE", Ne), ("LT", Lt), ("LE", Le), ("GT", Gt), ("GE", Ge)]
    {
        if token.contains(name) {
            return Some(direction);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use crate::{Builder, ComparisonDirection, ComparisonType, DType, Literal, Shape};

    #[test]
    fn test_constant_and_concatenate() {
        let mut b = Builder::new("constants");
        let main = b.main();
        let c0 = b.constant(main, Literal::from_flat(&[12i64, 64], [2]).unwrap()).unwrap();
        assert_eq!(b.extract_constant_shape(c0), Some(vec![12, 64]));

        let c1 = b.constant(main, Literal::from_flat(&[128i64], [1]).unwrap()).unwrap();
        let concatenated = b.concatenate(0, &[c0, c1]).unwrap();
        assert_eq!(b.extract_constant_shape(concatenated), Some(vec![12, 64, 128]));

        // A float constant is not a shape tensor.
        let f = b.constant(main, Literal::from_flat(&[1.5f32], [1]).unwrap()).unwrap();
        assert_eq!(b.extract_constant_shape(f), None);

        // Parameters were not created by any statement.
        let param = b.input(main, Shape::of(DType::I64, [2])).unwrap();
        assert_eq!(b.extract_constant_shape(param), None);
    }

    #[test]
    fn test_get_dimension_size() {
        let mut b = Builder::new("dimension_sizes");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [12, 512, 64])).unwrap();
        let size = b.get_dimension_size(x, 1).unwrap();
        assert_eq!(b.extract_constant_shape(size), Some(vec![512]));

        // Dynamic dimensions never materialize.
        let y = b.input(main, Shape::of(DType::F32, [crate::DIM_UNKNOWN, 64])).unwrap();
        let size = b.get_dimension_size(y, 0).unwrap();
        assert_eq!(b.extract_constant_shape(size), None);
    }

    #[test]
    fn test_reshape_and_convert_pass_through() {
        let mut b = Builder::new("pass_through");
        let main = b.main();
        let c = b.constant(main, Literal::from_flat(&[3i32, 4], [2]).unwrap()).unwrap();
        let reshaped = b.reshape(c, &[2]).unwrap();
        let converted = b.convert(reshaped, DType::I64).unwrap();
        assert_eq!(b.extract_constant_shape(converted), Some(vec![3, 4]));
    }

    #[test]
    fn test_gather_and_slice() {
        let mut b = Builder::new("gather_slice");
        let main = b.main();
        let table = b.constant(main, Literal::from_flat(&[7i64, 8, 9], [3]).unwrap()).unwrap();
        let index = b.constant(main, Literal::from_flat(&[1i64], [1]).unwrap()).unwrap();
        let gathered = b
            .gather(table, index, 0, &[], &[0], &[], &[], &[0], &[1], false)
            .unwrap();
        assert_eq!(b.extract_constant_shape(gathered), Some(vec![8]));

        // Gather with a non-scalar constant index is not extractable.
        let indices = b.constant(main, Literal::from_flat(&[0i64, 2], [2]).unwrap()).unwrap();
        let gathered = b
            .gather(table, indices, 1, &[], &[0], &[], &[], &[0], &[1], false)
            .unwrap();
        assert_eq!(b.extract_constant_shape(gathered), None);

        let sliced = b.slice(table, &[1], &[3], &[1]).unwrap();
        assert_eq!(b.extract_constant_shape(sliced), Some(vec![8, 9]));
    }

    #[test]
    fn test_multiply_divide() {
        let mut b = Builder::new("arithmetic");
        let main = b.main();
        let lhs = b.constant(main, Literal::from_flat(&[6i64, 8], [2]).unwrap()).unwrap();
        let rhs = b.constant(main, Literal::from_flat(&[2i64], [1]).unwrap()).unwrap();
        let product = b.mul(lhs, lhs).unwrap();
        assert_eq!(b.extract_constant_shape(product), Some(vec![36, 64]));

        let scalar_lhs = b.constant(main, Literal::from_flat(&[12i64], [1]).unwrap()).unwrap();
        let quotient = b.div(scalar_lhs, rhs).unwrap();
        assert_eq!(b.extract_constant_shape(quotient), Some(vec![6]));

        // Division by zero reports not-extractable instead of failing.
        let zero = b.constant(main, Literal::from_flat(&[0i64], [1]).unwrap()).unwrap();
        let quotient = b.div(scalar_lhs, zero).unwrap();
        assert_eq!(b.extract_constant_shape(quotient), None);
    }

    #[test]
    fn test_compare_extraction() {
        let mut b = Builder::new("compare");
        let main = b.main();
        let lhs = b.constant(main, Literal::from_flat(&[1i64, 5], [2]).unwrap()).unwrap();
        let rhs = b.constant(main, Literal::from_flat(&[3i64, 3], [2]).unwrap()).unwrap();
        let compared =
            b.compare(lhs, rhs, ComparisonDirection::Lt, ComparisonType::Signed).unwrap();
        assert_eq!(b.extract_constant_shape(compared), Some(vec![1, 0]));
    }

    #[test]
    fn test_select_extraction() {
        let mut b = Builder::new("select");
        let main = b.main();
        let on_true = b.constant(main, Literal::from_flat(&[10i64, 20], [2]).unwrap()).unwrap();
        let on_false = b.constant(main, Literal::from_flat(&[30i64, 40], [2]).unwrap()).unwrap();

        // A scalar condition selects one branch wholesale.
        let pred = b.constant(main, Literal::scalar(true)).unwrap();
        let selected = b.select(pred, on_true, on_false).unwrap();
        assert_eq!(b.extract_constant_shape(selected), Some(vec![10, 20]));

        // A vector condition selects element-wise.
        let pred = b.constant(main, Literal::from_flat(&[true, false], [2]).unwrap()).unwrap();
        let selected = b.select(pred, on_true, on_false).unwrap();
        assert_eq!(b.extract_constant_shape(selected), Some(vec![10, 40]));
    }

    #[test]
    fn test_partial_concatenate() {
        let mut b = Builder::new("partial");
        let main = b.main();
        let x = b.input(main, Shape::of(DType::F32, [12, 128])).unwrap();
        let known = b.get_dimension_size(x, 0).unwrap();
        let known = b.reshape(known, &[1]).unwrap();
        // A runtime-computed term that cannot be folded.
        let runtime = b.input(main, Shape::of(DType::I32, [2])).unwrap();
        let concatenated = b.concatenate(0, &[known, runtime]).unwrap();

        assert_eq!(b.extract_constant_shape(concatenated), None);
        let (partial, all, any) = b.extract_concatenated_shape_partial(concatenated).unwrap();
        assert_eq!(partial, vec![12, crate::DIM_UNKNOWN, crate::DIM_UNKNOWN]);
        assert!(!all);
        assert!(any);
    }
}

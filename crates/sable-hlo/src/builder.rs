use std::collections::BTreeMap;

use crate::{Attribute, Error, OpType, Shape};

/// Handle to a function owned by a [`Builder`]. The main function is always present; other
/// top-level functions are callable via `func.call` and closures serve as operation regions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub(crate) usize);

/// Handle to an SSA value in a StableHLO program, like `%0` or `%arg0`. A value belongs to
/// exactly one function; operations may reference values from the target function or any strict
/// ancestor (lexical capture).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Value {
    pub(crate) func: FuncId,
    pub(crate) index: usize,
}

impl Value {
    /// The function owning this value.
    pub fn function(&self) -> FuncId {
        self.func
    }
}

pub(crate) struct ValueData {
    /// Unique textual identifier within the owning function, printed as `%name`.
    pub(crate) name: String,
    pub(crate) shape: Shape,
    /// Defining statement index and output index; [`None`] for function parameters.
    pub(crate) def: Option<(usize, usize)>,
}

pub(crate) struct StatementData {
    pub(crate) op: OpType,
    pub(crate) inputs: Vec<Value>,
    pub(crate) outputs: Vec<Value>,
    /// Attribute map with stable keys. [`Attribute::FunctionRef`] entries referring to closures
    /// are emitted as inline regions in key order; everything else renders in the attribute
    /// dictionary.
    pub(crate) attributes: BTreeMap<String, Attribute>,
}

pub(crate) struct FunctionData {
    pub(crate) name: String,
    /// [`None`] for top-level functions; closures point at their lexical parent.
    pub(crate) parent: Option<FuncId>,
    pub(crate) inputs: Vec<Value>,
    pub(crate) values: Vec<ValueData>,
    pub(crate) statements: Vec<StatementData>,
    pub(crate) results: Vec<Value>,
    pub(crate) returned: bool,
    /// Monotonic counter minting `%N` identifiers for statement outputs.
    pub(crate) counter: usize,
}

/// Heuristic constants used when the dynamic-shape specialization pass must synthesize static
/// extents or bounds (see the `dynamic_reshape` / `dynamic_broadcast_in_dim` builder
/// operations). The defaults are tuned for the downstream XLA translator.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DynamicShapeOptions {
    /// Extent substituted for dimensions that cannot be resolved statically.
    pub fill_dim: i64,
    /// Floor for synthesized dynamic-dimension bounds.
    pub min_bound: i64,
    /// Ceiling for synthesized dynamic-dimension bounds.
    pub max_bound: i64,
}

impl Default for DynamicShapeOptions {
    fn default() -> Self {
        Self { fill_dim: 128, min_bound: 2048, max_bound: 65536 }
    }
}

/// Top-level builder for one StableHLO module. Owns the function table and mints value
/// identifiers; all mutation goes through `&mut self`, so a module has a single writer by
/// construction.
pub struct Builder {
    pub(crate) name: String,
    pub(crate) funcs: Vec<FunctionData>,
    pub(crate) dynamic_shape_options: DynamicShapeOptions,
}

/// Replaces any character outside `[0-9A-Za-z_]` with `_` and prefixes a leading digit with
/// `_`, producing a valid value or function identifier.
pub fn convert_to_valid_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            result.push(c);
        } else {
            result.push('_');
        }
    }
    if result.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        result.insert(0, '_');
    }
    result
}

impl Builder {
    /// Creates a new module builder with the provided name and an open `@main` function.
    pub fn new<N: AsRef<str>>(name: N) -> Self {
        let main = FunctionData {
            name: "main".to_string(),
            parent: None,
            inputs: Vec::new(),
            values: Vec::new(),
            statements: Vec::new(),
            results: Vec::new(),
            returned: false,
            counter: 0,
        };
        Self {
            name: convert_to_valid_name(name.as_ref()),
            funcs: vec![main],
            dynamic_shape_options: DynamicShapeOptions::default(),
        }
    }

    /// The module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overrides the [`DynamicShapeOptions`] used by the dynamic-shape specialization pass.
    pub fn with_dynamic_shape_options(mut self, options: DynamicShapeOptions) -> Self {
        self.dynamic_shape_options = options;
        self
    }

    /// The `@main` entry-point function.
    pub fn main(&self) -> FuncId {
        FuncId(0)
    }

    /// Creates a new top-level function, callable from other functions via the `call`
    /// operation. The name is sanitized to a valid identifier.
    pub fn new_function<N: AsRef<str>>(&mut self, name: N) -> FuncId {
        let id = FuncId(self.funcs.len());
        self.funcs.push(FunctionData {
            name: convert_to_valid_name(name.as_ref()),
            parent: None,
            inputs: Vec::new(),
            values: Vec::new(),
            statements: Vec::new(),
            results: Vec::new(),
            returned: false,
            counter: 0,
        });
        id
    }

    /// Creates a closure: a function nested inside `parent`, used as the region of operations
    /// like `reduce`, `sort`, `while`, and `if`. Closures may reference values from any strict
    /// ancestor, and render inline at the operation that consumes them.
    pub fn closure(&mut self, parent: FuncId) -> FuncId {
        let id = FuncId(self.funcs.len());
        self.funcs.push(FunctionData {
            name: format!("closure_{}", id.0),
            parent: Some(parent),
            inputs: Vec::new(),
            values: Vec::new(),
            statements: Vec::new(),
            results: Vec::new(),
            returned: false,
            counter: 0,
        });
        id
    }

    /// Appends an input parameter with the provided [`Shape`] to `func` and returns its value.
    pub fn input(&mut self, func: FuncId, shape: Shape) -> Result<Value, Error> {
        if self.func(func).returned {
            return Err(Error::builder_closed("input", &self.func(func).name));
        }
        let index = self.func(func).values.len();
        let name = format!("arg{}", self.func(func).inputs.len());
        let data = self.func_mut(func);
        data.values.push(ValueData { name, shape, def: None });
        let value = Value { func, index };
        data.inputs.push(value);
        Ok(value)
    }

    /// Closes `func`, recording its return values. Once returned, no further operations can be
    /// added to the function.
    pub fn ret(&mut self, func: FuncId, values: &[Value]) -> Result<(), Error> {
        if self.func(func).returned {
            return Err(Error::builder_closed("return", &self.func(func).name));
        }
        for value in values {
            if value.func != func {
                return Err(Error::cross_function_operand(format!(
                    "return value belongs to function '{}', not to '{}'",
                    self.func(value.func).name,
                    self.func(func).name
                )));
            }
        }
        let data = self.func_mut(func);
        data.results = values.to_vec();
        data.returned = true;
        Ok(())
    }

    /// The [`Shape`] of a value.
    pub fn shape(&self, value: Value) -> &Shape {
        &self.func(value.func).values[value.index].shape
    }

    /// Input parameter values of a function.
    pub fn inputs(&self, func: FuncId) -> &[Value] {
        &self.func(func).inputs
    }

    /// Return values of a function, empty until the function is returned.
    pub fn results(&self, func: FuncId) -> &[Value] {
        &self.func(func).results
    }

    /// Whether the function has been closed by a `return`.
    pub fn is_returned(&self, func: FuncId) -> bool {
        self.func(func).returned
    }

    /// The lexical parent of a closure, [`None`] for top-level functions.
    pub fn parent(&self, func: FuncId) -> Option<FuncId> {
        self.func(func).parent
    }

    /// Sets the quantization metadata on a statement-produced value. Parameter values are
    /// external inputs and cannot have their quantization changed.
    pub fn set_quantization(
        &mut self,
        value: Value,
        quantization: crate::Quantization,
    ) -> Result<(), Error> {
        quantization.validate()?;
        let data = &mut self.funcs[value.func.0].values[value.index];
        if data.def.is_none() {
            return Err(Error::invalid_attribute(format!(
                "cannot change quantization on parameter value %{}",
                data.name
            )));
        }
        data.shape.quantization = Some(quantization);
        Ok(())
    }

    pub(crate) fn func(&self, id: FuncId) -> &FunctionData {
        &self.funcs[id.0]
    }

    pub(crate) fn func_mut(&mut self, id: FuncId) -> &mut FunctionData {
        &mut self.funcs[id.0]
    }

    pub(crate) fn value_name(&self, value: Value) -> &str {
        &self.func(value.func).values[value.index].name
    }

    /// Whether `ancestor` is `func` itself or one of its lexical ancestors.
    pub(crate) fn is_ancestor_or_self(&self, ancestor: FuncId, func: FuncId) -> bool {
        let mut current = Some(func);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.func(id).parent;
        }
        false
    }

    /// Resolves the function an operation should be appended to: the deepest function among the
    /// operands' owners such that every other owner is one of its ancestors. Unrelated owners
    /// (e.g., sibling closures) are rejected.
    pub(crate) fn innermost_function(&self, values: &[Value]) -> Result<FuncId, Error> {
        let mut deepest = values[0].func;
        for value in &values[1..] {
            if self.is_ancestor_or_self(value.func, deepest) {
                continue;
            }
            if self.is_ancestor_or_self(deepest, value.func) {
                deepest = value.func;
            } else {
                return Err(Error::cross_function_operand(format!(
                    "incompatible functions '{}' and '{}': neither is an ancestor of the other",
                    self.func(deepest).name,
                    self.func(value.func).name
                )));
            }
        }
        Ok(deepest)
    }

    pub(crate) fn check_open(&self, func: FuncId, op: OpType) -> Result<(), Error> {
        if self.func(func).returned {
            Err(Error::builder_closed(op, &self.func(func).name))
        } else {
            Ok(())
        }
    }

    fn new_value(&mut self, func: FuncId, shape: Shape) -> Value {
        let data = self.func_mut(func);
        let index = data.values.len();
        let name = data.counter.to_string();
        data.counter += 1;
        data.values.push(ValueData { name, shape, def: None });
        Value { func, index }
    }

    /// Appends a single-output statement to `func` and returns the output value. The caller is
    /// responsible for the open/operand/shape checks.
    pub(crate) fn add_op(
        &mut self,
        func: FuncId,
        op: OpType,
        output_shape: Shape,
        inputs: Vec<Value>,
        attributes: BTreeMap<String, Attribute>,
    ) -> Value {
        self.add_multi_op(func, op, vec![output_shape], inputs, attributes)[0]
    }

    /// Appends a multi-output statement to `func` and returns the output values.
    pub(crate) fn add_multi_op(
        &mut self,
        func: FuncId,
        op: OpType,
        output_shapes: Vec<Shape>,
        inputs: Vec<Value>,
        attributes: BTreeMap<String, Attribute>,
    ) -> Vec<Value> {
        let outputs = output_shapes
            .into_iter()
            .map(|shape| self.new_value(func, shape))
            .collect::<Vec<_>>();
        let statement_index = self.func(func).statements.len();
        for (output_index, output) in outputs.iter().enumerate() {
            self.func_mut(func).values[output.index].def = Some((statement_index, output_index));
        }
        self.func_mut(func).statements.push(StatementData { op, inputs, outputs: outputs.clone(), attributes });
        outputs
    }

    /// The statement that defined `value`, or [`None`] for function parameters. Used by the
    /// constant-folding shape evaluator.
    pub(crate) fn defining_statement(&self, value: Value) -> Option<&StatementData> {
        let (statement_index, _) = self.func(value.func).values[value.index].def?;
        Some(&self.func(value.func).statements[statement_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Literal};

    #[test]
    fn test_convert_to_valid_name() {
        assert_eq!(convert_to_valid_name("my_fn"), "my_fn");
        assert_eq!(convert_to_valid_name("my fn!"), "my_fn_");
        assert_eq!(convert_to_valid_name("3fn"), "_3fn");
        assert_eq!(convert_to_valid_name("a.b/c"), "a_b_c");
    }

    #[test]
    fn test_innermost_function() {
        let mut b = Builder::new("innermost");
        let main = b.main();
        let closure = b.closure(main);
        let double_nested = b.closure(closure);
        let sibling = b.closure(main);

        let val_main = b.constant(main, Literal::scalar(1.0f64)).unwrap();
        let val_closure = b.constant(closure, Literal::scalar(1.0f64)).unwrap();
        let val_double = b.constant(double_nested, Literal::scalar(1.0f64)).unwrap();
        let val_sibling = b.constant(sibling, Literal::scalar(1.0f64)).unwrap();

        assert_eq!(b.innermost_function(&[val_main]).unwrap(), main);
        assert_eq!(b.innermost_function(&[val_main, val_main]).unwrap(), main);
        assert_eq!(b.innermost_function(&[val_main, val_closure]).unwrap(), closure);
        assert_eq!(b.innermost_function(&[val_closure, val_main]).unwrap(), closure);
        assert_eq!(
            b.innermost_function(&[val_main, val_closure, val_double]).unwrap(),
            double_nested
        );
        assert!(matches!(
            b.innermost_function(&[val_closure, val_sibling]),
            Err(Error::CrossFunctionOperand(message)) if message.contains("incompatible functions")
        ));
        assert!(b.innermost_function(&[val_double, val_sibling]).is_err());
    }

    #[test]
    fn test_value_bookkeeping() {
        let mut b = Builder::new("bookkeeping");
        let main = b.main();
        let x = b.input(main, Shape::scalar(DType::F32)).unwrap();
        assert_eq!(b.value_name(x), "arg0");
        assert!(b.func(main).values[x.index].def.is_none());

        let y = b.mul(x, x).unwrap();
        assert_eq!(b.value_name(y), "0");
        // The defining statement holds the output value at the recorded index.
        let (statement_index, output_index) = b.func(main).values[y.index].def.unwrap();
        assert_eq!(b.func(main).statements[statement_index].outputs[output_index], y);
        assert_eq!(b.shape(y), &Shape::scalar(DType::F32));
    }

    #[test]
    fn test_return_closes_function() {
        let mut b = Builder::new("closing");
        let main = b.main();
        let x = b.input(main, Shape::scalar(DType::F32)).unwrap();
        b.ret(main, &[x]).unwrap();
        assert!(b.is_returned(main));
        assert!(matches!(b.mul(x, x), Err(Error::BuilderClosed { .. })));
        assert!(matches!(b.input(main, Shape::scalar(DType::F32)), Err(Error::BuilderClosed { .. })));
        assert!(matches!(b.ret(main, &[x]), Err(Error::BuilderClosed { .. })));
    }

    #[test]
    fn test_return_rejects_foreign_values() {
        let mut b = Builder::new("foreign");
        let main = b.main();
        let other = b.new_function("other");
        let x = b.input(other, Shape::scalar(DType::F32)).unwrap();
        assert!(matches!(b.ret(main, &[x]), Err(Error::CrossFunctionOperand(_))));
    }

    #[test]
    fn test_set_quantization() {
        let mut b = Builder::new("quantize");
        let main = b.main();
        let x = b.input(main, Shape::scalar(DType::F32)).unwrap();
        let quantization = crate::Quantization::uniform(DType::I8, DType::F32, 0.1, 0);
        // Parameter values cannot change quantization.
        assert!(b.set_quantization(x, quantization.clone()).is_err());

        let y = b.mul(x, x).unwrap();
        b.set_quantization(y, quantization.clone()).unwrap();
        assert_eq!(b.shape(y).quantization, Some(quantization));
    }
}

//! End-to-end builder tests: full programs built through the public API and checked against
//! their emitted StableHLO text.

use sable_hlo::{
    Builder, ComparisonDirection, ComparisonType, DType, DynamicShapeOptions, Literal, Shape,
};

#[test]
fn test_mlp_forward_program() {
    // A one-layer MLP forward pass: relu(x @ w + b) reduced to a per-row sum.
    let mut b = Builder::new("mlp_forward");
    let main = b.main();
    let x = b.input(main, Shape::of(DType::F32, [8, 16])).unwrap();
    let w = b.input(main, Shape::of(DType::F32, [16, 4])).unwrap();
    let bias = b.input(main, Shape::of(DType::F32, [4])).unwrap();

    let product = b.dot_general(x, &[1], &[], w, &[0], &[]).done().unwrap();
    let bias = b.broadcast_in_dim(bias, Shape::of(DType::F32, [8, 4]), &[1]).unwrap();
    let activated = b.add(product, bias).unwrap();
    let zero = b.constant_scalar(main, 0.0f32).unwrap();
    let zeros = b.broadcast_in_dim(zero, Shape::of(DType::F32, [8, 4]), &[]).unwrap();
    let relu = b.maximum(activated, zeros).unwrap();

    let sum_init = b.constant_scalar(main, 0.0f32).unwrap();
    let reducer = b.closure(main);
    let lhs = b.input(reducer, Shape::scalar(DType::F32)).unwrap();
    let rhs = b.input(reducer, Shape::scalar(DType::F32)).unwrap();
    let sum = b.add(lhs, rhs).unwrap();
    b.ret(reducer, &[sum]).unwrap();
    let row_sums = b.reduce(relu, sum_init, reducer, &[1]).unwrap();
    assert_eq!(b.shape(row_sums).dimensions, vec![8]);
    b.ret(main, &[row_sums]).unwrap();

    let program = b.build().unwrap();
    assert!(program.contains("\"stablehlo.dot_general\""));
    assert!(program.contains("dot_dimension_numbers = #stablehlo.dot<"));
    assert!(program.contains("\"stablehlo.broadcast_in_dim\""));
    assert!(program.contains("\"stablehlo.maximum\""));
    assert!(program.contains("\"stablehlo.reduce\""));
    assert!(program.contains("// reductionFn"));
    assert!(program.contains("dimensions = array<i64: 1>"));
    assert!(program.contains("-> tensor<8xf32>"));
}

#[test]
fn test_shape_arithmetic_folding_program() {
    // The shape tensor is concatenate(get_dimension_size(x, 0), [64, -1]); for x of shape
    // [12, 128] the dynamic reshape folds to a static reshape with target [12, 64, 2] and no
    // dynamic_reshape survives in the emitted text.
    let mut b = Builder::new("shape_folding");
    let main = b.main();
    let x = b.input(main, Shape::of(DType::F32, [12, 128])).unwrap();
    let rows = b.get_dimension_size(x, 0).unwrap();
    let rows = b.reshape(rows, &[1]).unwrap();
    let rest = b
        .constant(main, Literal::from_flat_i64(DType::I32, &[64, -1], [2]).unwrap())
        .unwrap();
    let target = b.concatenate(0, &[rows, rest]).unwrap();
    let reshaped = b.dynamic_reshape(x, target).unwrap();
    b.ret(main, &[reshaped]).unwrap();

    let program = b.build().unwrap();
    assert!(program.contains("\"stablehlo.reshape\""));
    assert!(!program.contains("dynamic_reshape"));
    assert!(program.contains("-> tensor<12x64x2xf32>"));
}

#[test]
fn test_bounded_dynamic_broadcast_program() {
    // An unfoldable target shape keeps the dynamic broadcast, with bounds emitted for the
    // dynamic result dimensions.
    let mut b = Builder::new("bounded_broadcast")
        .with_dynamic_shape_options(DynamicShapeOptions { fill_dim: 128, min_bound: 512, max_bound: 65536 });
    let main = b.main();
    let x = b.input(main, Shape::of(DType::F32, [1, 64])).unwrap();
    let target = b.input(main, Shape::of(DType::I32, [2])).unwrap();
    let broadcast = b.dynamic_broadcast_in_dim(x, target, &[0, 1]).unwrap();
    b.ret(main, &[broadcast]).unwrap();

    let program = b.build().unwrap();
    assert!(program.contains("\"stablehlo.dynamic_broadcast_in_dim\""));
    assert!(program.contains("tensor<?x?xf32, #stablehlo.bounds<512, 512>>"));
}

#[test]
fn test_sorted_top_values_program() {
    // Sorting values together with their indices, the common top-k building block.
    let mut b = Builder::new("top_values");
    let main = b.main();
    let values = b.input(main, Shape::of(DType::F32, [2, 8])).unwrap();
    let indices = b.iota(main, Shape::of(DType::I32, [2, 8]), 1).unwrap();

    let comparator = b.closure(main);
    let lhs = b.input(comparator, Shape::scalar(DType::F32)).unwrap();
    let rhs = b.input(comparator, Shape::scalar(DType::F32)).unwrap();
    let _lhs_index = b.input(comparator, Shape::scalar(DType::I32)).unwrap();
    let _rhs_index = b.input(comparator, Shape::scalar(DType::I32)).unwrap();
    let descending = b.compare(lhs, rhs, ComparisonDirection::Gt, ComparisonType::Float).unwrap();
    b.ret(comparator, &[descending]).unwrap();

    let sorted = b.sort(comparator, -1, true, &[values, indices]).unwrap();
    let top = b.slice(sorted[0], &[0, 0], &[2, 3], &[1, 1]).unwrap();
    let top_indices = b.slice(sorted[1], &[0, 0], &[2, 3], &[1, 1]).unwrap();
    b.ret(main, &[top, top_indices]).unwrap();

    let program = b.build().unwrap();
    assert!(program.contains("\"stablehlo.sort\""));
    assert!(program.contains("// comparator"));
    assert!(program.contains("is_stable = true"));
    assert!(program.contains("\"stablehlo.iota\""));
    assert!(program.contains("-> (tensor<2x3xf32>, tensor<2x3xi32>)"));
}

#[test]
fn test_nested_closure_capture_program() {
    // A while loop whose body reduces a captured tensor: the reduce's reducer closure nests
    // inside the body closure, and the body references a value of @main (lexical capture).
    let mut b = Builder::new("nested_closures");
    let main = b.main();
    let data = b.input(main, Shape::of(DType::F32, [4])).unwrap();
    let iterations = b.constant_scalar(main, 0i32).unwrap();

    let cond = b.closure(main);
    let i = b.input(cond, Shape::scalar(DType::I32)).unwrap();
    let _acc = b.input(cond, Shape::scalar(DType::F32)).unwrap();
    let limit = b.constant_scalar(cond, 3i32).unwrap();
    let not_done = b.compare(i, limit, ComparisonDirection::Lt, ComparisonType::Signed).unwrap();
    b.ret(cond, &[not_done]).unwrap();

    let body = b.closure(main);
    let i = b.input(body, Shape::scalar(DType::I32)).unwrap();
    let acc = b.input(body, Shape::scalar(DType::F32)).unwrap();
    let one = b.constant_scalar(body, 1i32).unwrap();
    let next_i = b.add(i, one).unwrap();
    let zero = b.constant_scalar(body, 0.0f32).unwrap();
    let reducer = b.closure(body);
    let lhs = b.input(reducer, Shape::scalar(DType::F32)).unwrap();
    let rhs = b.input(reducer, Shape::scalar(DType::F32)).unwrap();
    let sum = b.add(lhs, rhs).unwrap();
    b.ret(reducer, &[sum]).unwrap();
    // `data` belongs to @main and is captured by the body closure.
    let total = b.reduce(data, zero, reducer, &[0]).unwrap();
    assert_eq!(total.function(), body);
    let next_acc = b.add(acc, total).unwrap();
    b.ret(body, &[next_i, next_acc]).unwrap();

    let initial_acc = b.constant_scalar(main, 0.0f32).unwrap();
    let results = b.while_loop(cond, body, &[iterations, initial_acc]).unwrap();
    b.ret(main, &results).unwrap();

    let program = b.build().unwrap();
    assert!(program.contains("\"stablehlo.while\""));
    assert!(program.contains("\"stablehlo.reduce\""));
    // The reduce region nests inside the while body region.
    let body_at = program.find("// body").unwrap();
    let reducer_at = program.find("// reductionFn").unwrap();
    assert!(reducer_at > body_at);
}

#[test]
fn test_conditional_program() {
    let mut b = Builder::new("conditional");
    let main = b.main();
    let x = b.input(main, Shape::scalar(DType::F32)).unwrap();
    let zero = b.constant_scalar(main, 0.0f32).unwrap();
    let is_positive =
        b.compare(x, zero, ComparisonDirection::Gt, ComparisonType::Float).unwrap();

    let true_branch = b.closure(main);
    let two = b.constant_scalar(true_branch, 2.0f32).unwrap();
    let scaled = b.mul(x, two).unwrap();
    b.ret(true_branch, &[scaled]).unwrap();

    let false_branch = b.closure(main);
    let half = b.constant_scalar(false_branch, 0.5f32).unwrap();
    let halved = b.mul(x, half).unwrap();
    b.ret(false_branch, &[halved]).unwrap();

    let results = b.if_then_else(is_positive, true_branch, false_branch).unwrap();
    b.ret(main, &results).unwrap();

    let program = b.build().unwrap();
    assert!(program.contains("\"stablehlo.if\""));
    assert!(program.contains("// true_branch"));
    assert!(program.contains("// false_branch"));
    assert!(program.contains("-> tensor<f32>"));
}

//! Builds `while i < 10 { i = i + 1 }` as a StableHLO module, compiles it on the CPU plugin,
//! executes it, and reads the final counter back.
//!
//! Run with: `cargo run --example counting_loop`

use sable::hlo::{Builder, ComparisonDirection, ComparisonType, DType, Shape};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut b = Builder::new("counting_loop");
    let main = b.main();
    let counter = b.constant_scalar(main, 0i32)?;

    let cond = b.closure(main);
    let value = b.input(cond, Shape::scalar(DType::I32))?;
    let limit = b.constant_scalar(cond, 10i32)?;
    let keep_going = b.compare(value, limit, ComparisonDirection::Lt, ComparisonType::Signed)?;
    b.ret(cond, &[keep_going])?;

    let body = b.closure(main);
    let value = b.input(body, Shape::scalar(DType::I32))?;
    let one = b.constant_scalar(body, 1i32)?;
    let next = b.add(value, one)?;
    b.ret(body, &[next])?;

    let results = b.while_loop(cond, body, &[counter])?;
    b.ret(main, &results)?;
    let program = b.build()?;
    println!("{program}");

    let plugin = sable::pjrt::get_plugin("cpu")?;
    let client = plugin.client(&[])?;
    let executable = client.compile().with_stablehlo(program).done()?;
    let outputs = executable.execute(&[]).done()?;
    let result: i32 = outputs[0].to_scalar()?;
    println!("final counter = {result}");
    assert_eq!(result, 10);

    for output in &outputs {
        output.destroy()?;
    }
    executable.destroy()?;
    client.destroy();
    sable::pjrt::free_all();
    Ok(())
}

//! sable builds StableHLO computation modules programmatically and executes them on
//! accelerator runtimes implementing the PJRT C ABI.
//!
//! The [`hlo`] crate constructs typed IR with per-operation shape inference and serializes it
//! to MLIR text; the [`pjrt`] crate loads plugins, compiles modules, and moves data in and out
//! of device buffers.
//!
//! ```no_run
//! use sable::hlo::{Builder, DType, Shape};
//!
//! let mut b = Builder::new("x_squared_plus_one");
//! let main = b.main();
//! let x = b.input(main, Shape::scalar(DType::F32))?;
//! let squared = b.mul(x, x)?;
//! let one = b.constant_scalar(main, 1.0f32)?;
//! let result = b.add(squared, one)?;
//! b.ret(main, &[result])?;
//! let program = b.build()?;
//!
//! let plugin = sable::pjrt::get_plugin("cpu")?;
//! let client = plugin.client(&[])?;
//! let executable = client.compile().with_stablehlo(program).done()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use sable_hlo as hlo;
pub use sable_pjrt as pjrt;

pub use sable_hlo::{Builder, DIM_UNKNOWN, DType, Literal, Shape};
pub use sable_pjrt::{Buffer, Client, LoadedExecutable, Plugin, available_plugins, free_all, get_plugin};

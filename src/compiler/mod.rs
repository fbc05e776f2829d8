//! JIT compilation of elementwise kernels.
//!
//! # Pipeline
//!
//! ```text
//! EltwiseDesc → ConstTable → EltwiseInjector → KernelBuilder → EltwiseKernel
//!                   ↑              ↑                ↑               ↓
//!              codegen/       codegen/          codegen/        parallel.rs
//!              const_table    injector.rs       kernel.rs       (rayon fork-join)
//!                             math_approx.rs    bf16.rs
//! ```

pub mod codegen;
pub mod executable;
pub mod parallel;

pub use codegen::CodegenOutput;
pub use executable::{EltwiseKernel, EltwiseKernelFn};
pub use parallel::{balance211, run_parallel, run_parallel_inplace, thread_range};

//! eltwise-jit: runtime-generated vectorized elementwise activation kernels.
//!
//! Kernels are emitted as native x86_64 code for one of three vector width
//! classes (SSE4.1, AVX2+FMA, AVX-512F), cached by the caller, and invoked
//! either directly or through a cache-line partitioned rayon dispatch.
//!
//! # Quick Start
//!
//! ```ignore
//! use eltwise_jit::{build, run_parallel, DType, EltwiseAlg};
//!
//! let kernel = build(EltwiseAlg::Tanh, 0.0, 0.0, DType::F32, false)?;
//! run_parallel(&kernel, &src, None, &mut dst)?;
//! ```

pub mod compiler;
pub mod config;
pub mod dispatch;
pub mod reference;
pub mod types;

pub use compiler::codegen::injector::{EltwiseInjector, InjectorConfig, RegTable};
pub use compiler::{balance211, run_parallel, run_parallel_inplace, EltwiseKernel, EltwiseKernelFn};
pub use config::{jit_config, JitConfig};
pub use dispatch::{device_profile, DeviceProfile, IsaFeatures, VectorWidth};
pub use types::{DType, EltwiseAlg, EltwiseDesc, EltwiseError, EltwiseResult, Element, Propagation};

/// Build a kernel for the widest vector class this host supports.
pub fn build(
    alg: EltwiseAlg,
    alpha: f32,
    beta: f32,
    dtype: DType,
    backward: bool,
) -> EltwiseResult<EltwiseKernel> {
    let mut desc = EltwiseDesc::new(alg, alpha, beta).with_dtype(dtype);
    if backward {
        desc = desc.backward();
    }
    EltwiseKernel::build(&desc)
}

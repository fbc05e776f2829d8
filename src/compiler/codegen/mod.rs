//! Code generation for elementwise kernels.
//!
//! ```text
//! const_table ──► injector + math_approx ──► kernel (+ bf16) ──► CodegenOutput
//!                        │ SimdOps
//!                        ▼
//!                   x86_64::X86Emitter (iced-x86)
//! ```
//!
//! The formula layer (`injector`, `math_approx`) only sees the `SimdOps`
//! trait; everything that names a machine register lives behind the
//! `jit-x86` feature.

pub mod const_table;
pub mod injector;
pub mod math_approx;
pub mod simd_ops;

#[cfg(all(target_arch = "x86_64", feature = "jit-x86"))]
pub mod bf16;
#[cfg(all(target_arch = "x86_64", feature = "jit-x86"))]
pub mod kernel;
#[cfg(all(target_arch = "x86_64", feature = "jit-x86"))]
pub mod x86_64;

use std::path::{Path, PathBuf};

use crate::dispatch::VectorWidth;
use crate::types::{EltwiseDesc, EltwiseError, EltwiseResult};

/// Output of code generation.
pub struct CodegenOutput {
    /// Table bytes followed by machine code.
    pub code: Vec<u8>,
    /// Offset of the first instruction within `code`.
    pub entry_offset: usize,
}

/// Generate the kernel for `desc` on `width`.
#[cfg(all(target_arch = "x86_64", feature = "jit-x86"))]
pub fn generate_kernel(desc: &EltwiseDesc, width: VectorWidth, native_bf16: bool) -> EltwiseResult<CodegenOutput> {
    kernel::KernelBuilder::new(*desc, width)
        .native_bf16(native_bf16)
        .generate()
        .map_err(EltwiseError::Codegen)
}

#[cfg(not(all(target_arch = "x86_64", feature = "jit-x86")))]
pub fn generate_kernel(desc: &EltwiseDesc, width: VectorWidth, _native_bf16: bool) -> EltwiseResult<CodegenOutput> {
    Err(EltwiseError::Unsupported(format!(
        "{} on {width}: no code generator for this target",
        desc.alg
    )))
}

/// File name of a dumped kernel: `eltwise_<alg>_<width>_<dtype>_<fwd|bwd>.bin`.
pub fn dump_file_name(desc: &EltwiseDesc, width: VectorWidth) -> String {
    let dir = if desc.is_backward() { "bwd" } else { "fwd" };
    format!(
        "eltwise_{}_{}_{}_{}.bin",
        desc.alg.name(),
        width.name(),
        desc.dtype.name(),
        dir
    )
}

/// Write a generated region to `dir` for offline disassembly. Failures are
/// logged; a dump never fails a build.
pub fn dump_code(dir: &Path, desc: &EltwiseDesc, width: VectorWidth, code: &[u8]) -> Option<PathBuf> {
    let path = dir.join(dump_file_name(desc, width));
    let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, code));
    match written {
        Ok(()) => {
            log::debug!("dumped {} bytes to {}", code.len(), path.display());
            Some(path)
        }
        Err(err) => {
            log::warn!("JIT dump to {} failed: {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DType, EltwiseAlg};

    #[test]
    fn test_dump_file_name() {
        let desc = EltwiseDesc::new(EltwiseAlg::SoftRelu, 0.0, 0.0).with_dtype(DType::BF16);
        assert_eq!(dump_file_name(&desc, VectorWidth::Medium), "eltwise_soft_relu_avx2_bf16_fwd.bin");
        let desc = EltwiseDesc::new(EltwiseAlg::Relu, 0.1, 0.0).backward();
        assert_eq!(dump_file_name(&desc, VectorWidth::Wide), "eltwise_relu_avx512_f32_bwd.bin");
    }

    #[test]
    fn test_dump_code_writes_file() {
        let dir = std::env::temp_dir().join(format!("eltwise-jit-dump-{}", std::process::id()));
        let desc = EltwiseDesc::new(EltwiseAlg::Abs, 0.0, 0.0);
        let path = dump_code(&dir, &desc, VectorWidth::Narrow, &[0xC3]).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xC3]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}

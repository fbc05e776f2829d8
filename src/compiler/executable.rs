//! EltwiseKernel — mmap'd executable code + metadata.
//!
//! Wraps one generated elementwise kernel. The constant table and the code
//! are copied into a private anonymous mapping that is made read+execute
//! before the first call and never written again, so a kernel can be shared
//! freely between threads.

use crate::compiler::codegen;
use crate::config::jit_config;
use crate::dispatch::{device_profile, VectorWidth};
use crate::types::{DType, EltwiseDesc, EltwiseError, EltwiseResult};

/// Signature of a generated kernel.
///
/// ```text
/// fn(src: *const u8, cmp: *const u8, dst: *mut u8, count: usize)
/// ```
///
/// `cmp` is only read by backward kernels. `count` is in elements.
pub type EltwiseKernelFn = unsafe extern "sysv64" fn(
    *const u8, // src
    *const u8, // cmp
    *mut u8,   // dst
    usize,     // count
);

/// A JIT-compiled elementwise kernel.
pub struct EltwiseKernel {
    /// Executable memory region (table + code)
    code: ExecutableBuffer,
    /// Entry point offset within the code buffer
    entry_offset: usize,
    /// Bytes actually generated (before page rounding)
    code_size: usize,
    desc: EltwiseDesc,
    width: VectorWidth,
    native_bf16: bool,
}

impl std::fmt::Debug for EltwiseKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EltwiseKernel")
            .field("desc", &self.desc)
            .field("width", &self.width)
            .field("code_size", &self.code_size)
            .field("native_bf16", &self.native_bf16)
            .finish()
    }
}

impl EltwiseKernel {
    /// Build for the widest class the host supports, capped by
    /// `ELTWISE_JIT_MAX_ISA`.
    pub fn build(desc: &EltwiseDesc) -> EltwiseResult<Self> {
        desc.validate()?;
        let profile = device_profile();
        let width = profile.best_width(jit_config().max_width).ok_or_else(|| {
            EltwiseError::Unsupported(format!("no vector width class available on this host ({})", profile.isa))
        })?;
        Self::build_for(desc, width)
    }

    /// Build for a specific width class.
    pub fn build_for(desc: &EltwiseDesc, width: VectorWidth) -> EltwiseResult<Self> {
        let native = desc.dtype == DType::BF16 && device_profile().native_bf16(width);
        Self::compile(desc, width, native)
    }

    /// Like `build_for`, but always use the emulated bf16 rounding even when
    /// the host converts natively.
    pub fn build_emulated(desc: &EltwiseDesc, width: VectorWidth) -> EltwiseResult<Self> {
        Self::compile(desc, width, false)
    }

    fn compile(desc: &EltwiseDesc, width: VectorWidth, native_bf16: bool) -> EltwiseResult<Self> {
        desc.validate()?;
        let profile = device_profile();
        if !profile.supports(width) {
            return Err(EltwiseError::Unsupported(format!(
                "{width} kernels need ISA support this host lacks ({})",
                profile.isa
            )));
        }

        let out = codegen::generate_kernel(desc, width, native_bf16)?;
        if let Some(dir) = &jit_config().dump_dir {
            codegen::dump_code(dir, desc, width, &out.code);
        }

        let code = ExecutableBuffer::new(&out.code)?;
        log::debug!(
            "eltwise kernel {} {} {} {}: {} bytes (table {}){}",
            desc.alg,
            width,
            desc.dtype.name(),
            if desc.is_backward() { "bwd" } else { "fwd" },
            out.code.len(),
            out.entry_offset,
            if native_bf16 { ", native bf16" } else { "" }
        );

        Ok(EltwiseKernel {
            code,
            entry_offset: out.entry_offset,
            code_size: out.code.len(),
            desc: *desc,
            width,
            native_bf16,
        })
    }

    pub fn desc(&self) -> &EltwiseDesc {
        &self.desc
    }

    pub fn width(&self) -> VectorWidth {
        self.width
    }

    /// Size of the generated table + code in bytes.
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Whether bf16 stores use the hardware conversion.
    pub fn native_bf16(&self) -> bool {
        self.native_bf16
    }

    /// Get the entry point function pointer.
    ///
    /// # Safety
    /// The caller must ensure the arguments match `EltwiseKernelFn`.
    #[inline]
    pub unsafe fn entry_point(&self) -> EltwiseKernelFn {
        let ptr = self.code.ptr().add(self.entry_offset);
        std::mem::transmute::<*const u8, EltwiseKernelFn>(ptr)
    }

    /// Run the kernel over `count` elements.
    ///
    /// # Safety
    /// `src` and `dst` must be valid for `count` elements of the kernel's
    /// dtype; `cmp` likewise for backward kernels and null otherwise. `src`
    /// and `dst` may be identical but must not partially overlap.
    #[inline]
    pub unsafe fn invoke(&self, src: *const u8, cmp: *const u8, dst: *mut u8, count: usize) {
        debug_assert_eq!(cmp.is_null(), !self.desc.is_backward());
        if count == 0 {
            return;
        }
        let f = self.entry_point();
        f(src, cmp, dst, count);
    }
}

/// An executable memory buffer backed by mmap.
pub(crate) struct ExecutableBuffer {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: ExecutableBuffer owns its mmap'd memory exclusively. The pointer is
// never aliased and the buffer is immutable (PROT_READ|PROT_EXEC) after construction.
unsafe impl Send for ExecutableBuffer {}
unsafe impl Sync for ExecutableBuffer {}

impl ExecutableBuffer {
    /// Allocate an executable memory region and copy code into it.
    pub(crate) fn new(code: &[u8]) -> EltwiseResult<Self> {
        if code.is_empty() {
            return Err(EltwiseError::Executable("empty code region".into()));
        }

        // Round up to page size
        let page_size = page_size();
        let len = (code.len() + page_size - 1) & !(page_size - 1);

        // SAFETY: mmap with MAP_PRIVATE|MAP_ANONYMOUS creates a new anonymous mapping.
        // No file descriptor is used (-1). Return value is checked for MAP_FAILED.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(EltwiseError::Executable(format!(
                "mmap of {len} bytes failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let ptr = ptr as *mut u8;

        // SAFETY: the mapping is at least code.len() bytes and writable.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        }

        // Make executable (and read-only)
        let ret = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_EXEC) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::munmap(ptr as *mut _, len);
            }
            return Err(EltwiseError::Executable(format!("mprotect failed: {err}")));
        }

        Ok(ExecutableBuffer { ptr, len })
    }

    pub(crate) fn ptr(&self) -> *const u8 {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut _, self.len);
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EltwiseAlg;

    #[test]
    fn test_executable_buffer_empty() {
        assert!(ExecutableBuffer::new(&[]).is_err());
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn test_executable_buffer_alloc() {
        let code = [0xC3u8]; // ret
        let buf = ExecutableBuffer::new(&code).unwrap();
        assert!(!buf.ptr().is_null());
        assert_eq!(buf.len(), page_size());
        unsafe {
            let f: extern "C" fn() = std::mem::transmute(buf.ptr());
            f();
        }
    }

    #[test]
    fn test_backward_rejected_before_codegen() {
        let desc = EltwiseDesc::new(EltwiseAlg::Exp, 0.0, 0.0).backward();
        assert!(matches!(
            EltwiseKernel::build(&desc),
            Err(EltwiseError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unsupported_width_rejected() {
        let desc = EltwiseDesc::new(EltwiseAlg::Abs, 0.0, 0.0);
        for width in VectorWidth::ALL {
            let res = EltwiseKernel::build_for(&desc, width);
            if device_profile().supports(width) {
                let k = res.unwrap();
                assert_eq!(k.width(), width);
                assert!(k.code_size() > 0);
            } else {
                assert!(matches!(res, Err(EltwiseError::Unsupported(_))));
            }
        }
    }
}

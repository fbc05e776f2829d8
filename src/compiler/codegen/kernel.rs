//! Kernel builder: wraps one transform into a complete callable function.
//!
//! ```text
//! fn(src: *const u8, cmp: *const u8, dst: *mut u8, count: usize)   sysv64
//!      rdi              rsi              rdx          rcx
//! ```
//!
//! Layout of the generated region:
//!
//! ```text
//! [ constant table, 64-byte padded ][ lea rax, table
//!                                     vector loop: count >= lanes
//!                                     tail loop:   one element per pass
//!                                     vzeroupper; ret ]
//! ```
//!
//! `rax` holds the table base and `r8` is the scalar bf16 temporary; the
//! other general-purpose registers are untouched, so the kernel needs no
//! prologue.

use iced_x86::code_asm::*;

use super::bf16::Bf16Conv;
use super::injector::EltwiseInjector;
use super::simd_ops::{SimdOps, VReg};
use super::x86_64::{xmm_reg, ymm_reg, zmm_reg, X86Emitter};
use super::CodegenOutput;
use crate::dispatch::VectorWidth;
use crate::types::{DType, EltwiseDesc};

/// Register holding the source (and result) lanes.
pub const VREG_SRC: VReg = VReg(1);
/// Register holding the comparison lanes of a backward kernel.
pub const VREG_CMP: VReg = VReg(2);

/// Loads and stores are either one full vector or one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Vector,
    Scalar,
}

pub struct KernelBuilder {
    desc: EltwiseDesc,
    width: VectorWidth,
    native_bf16: bool,
}

impl KernelBuilder {
    pub fn new(desc: EltwiseDesc, width: VectorWidth) -> Self {
        KernelBuilder {
            desc,
            width,
            native_bf16: false,
        }
    }

    /// Use `vcvtneps2bf16` for bf16 stores. Only valid on the wide class of
    /// a host with AVX512_BF16 and AVX512VL.
    pub fn native_bf16(mut self, native: bool) -> Self {
        self.native_bf16 = native;
        self
    }

    pub fn generate(&self) -> Result<CodegenOutput, String> {
        let desc = &self.desc;
        let width = self.width;
        let backward = desc.is_backward();
        if self.native_bf16 && width != VectorWidth::Wide {
            return Err(format!("native bf16 conversion is not available on {width}"));
        }

        let mut injector = EltwiseInjector::new(desc.alg, desc.alpha, desc.beta);
        if backward {
            injector = injector.for_backward();
        }
        let mut table = injector.table();
        let conv = match desc.dtype {
            DType::F32 => None,
            DType::BF16 => Some(Bf16Conv::new(self.native_bf16, &mut table)),
        };

        let mut e = X86Emitter::new(width)?;
        e.embed_table(&table.to_bytes(width.lanes()))?;

        let operands: &[VReg] = if backward { &[VREG_SRC, VREG_CMP] } else { &[VREG_SRC] };
        injector.prepare(&mut e, operands, &[])?;

        let lanes = width.lanes();
        let esz = desc.dtype.size_bytes();
        let vec_loop = e.alloc_label();
        let tail_loop = e.alloc_label();
        let done = e.alloc_label();

        // ── Vector loop ─────────────────────────────────────────────────
        e.define_label(vec_loop)?;
        e.asm().cmp(rcx, lanes as i32).map_err(|e| e.to_string())?;
        let tail = e.code_label(tail_loop)?;
        e.asm().jb(tail).map_err(|e| e.to_string())?;

        self.body(&mut e, &injector, conv.as_ref(), Access::Vector)?;

        let step = (lanes * esz) as i32;
        self.advance(&mut e, step)?;
        e.asm().sub(rcx, lanes as i32).map_err(|e| e.to_string())?;
        let top = e.code_label(vec_loop)?;
        e.asm().jmp(top).map_err(|e| e.to_string())?;

        // ── Tail loop ───────────────────────────────────────────────────
        e.define_label(tail_loop)?;
        e.asm().test(rcx, rcx).map_err(|e| e.to_string())?;
        let exit = e.code_label(done)?;
        e.asm().jz(exit).map_err(|e| e.to_string())?;

        self.body(&mut e, &injector, conv.as_ref(), Access::Scalar)?;

        self.advance(&mut e, esz as i32)?;
        e.asm().dec(rcx).map_err(|e| e.to_string())?;
        let tail = e.code_label(tail_loop)?;
        e.asm().jmp(tail).map_err(|e| e.to_string())?;

        e.define_label(done)?;
        injector.finish(&mut e)?;
        if width != VectorWidth::Narrow {
            e.asm().vzeroupper().map_err(|e| e.to_string())?;
        }
        e.asm().ret().map_err(|e| e.to_string())?;

        e.finalize()
    }

    /// load, transform, store
    fn body(
        &self,
        e: &mut X86Emitter,
        injector: &EltwiseInjector,
        conv: Option<&Bf16Conv>,
        access: Access,
    ) -> Result<(), String> {
        self.load(e, conv, VREG_SRC, rdi, access)?;
        if self.desc.is_backward() {
            self.load(e, conv, VREG_CMP, rsi, access)?;
            injector.apply_backward(e, VREG_SRC, VREG_CMP)?;
        } else {
            injector.apply(e, VREG_SRC)?;
        }
        self.store(e, conv, VREG_SRC, rdx, access)
    }

    fn advance(&self, e: &mut X86Emitter, bytes: i32) -> Result<(), String> {
        e.asm().add(rdi, bytes).map_err(|e| e.to_string())?;
        if self.desc.is_backward() {
            e.asm().add(rsi, bytes).map_err(|e| e.to_string())?;
        }
        e.asm().add(rdx, bytes).map_err(|e| e.to_string())
    }

    fn load(
        &self,
        e: &mut X86Emitter,
        conv: Option<&Bf16Conv>,
        dst: VReg,
        base: AsmRegister64,
        access: Access,
    ) -> Result<(), String> {
        match (conv, access) {
            (Some(c), Access::Vector) => c.load_vector(e, dst, base),
            (Some(c), Access::Scalar) => c.load_scalar(e, dst, base),
            (None, Access::Vector) => match self.width {
                VectorWidth::Narrow => e.asm().movups(xmm_reg(dst.0)?, xmmword_ptr(base)),
                VectorWidth::Medium => e.asm().vmovups(ymm_reg(dst.0)?, ymmword_ptr(base)),
                VectorWidth::Wide => e.asm().vmovups(zmm_reg(dst.0)?, zmmword_ptr(base)),
            }
            .map_err(|e| e.to_string()),
            (None, Access::Scalar) => {
                let d = xmm_reg(dst.0)?;
                match self.width {
                    VectorWidth::Narrow => e.asm().movss(d, dword_ptr(base)),
                    _ => e.asm().vmovss(d, dword_ptr(base)),
                }
                .map_err(|e| e.to_string())
            }
        }
    }

    fn store(
        &self,
        e: &mut X86Emitter,
        conv: Option<&Bf16Conv>,
        src: VReg,
        base: AsmRegister64,
        access: Access,
    ) -> Result<(), String> {
        match (conv, access) {
            (Some(c), Access::Vector) => c.store_vector(e, src, base),
            (Some(c), Access::Scalar) => c.store_scalar(e, src, base),
            (None, Access::Vector) => match self.width {
                VectorWidth::Narrow => e.asm().movups(xmmword_ptr(base), xmm_reg(src.0)?),
                VectorWidth::Medium => e.asm().vmovups(ymmword_ptr(base), ymm_reg(src.0)?),
                VectorWidth::Wide => e.asm().vmovups(zmmword_ptr(base), zmm_reg(src.0)?),
            }
            .map_err(|e| e.to_string()),
            (None, Access::Scalar) => {
                let s = xmm_reg(src.0)?;
                match self.width {
                    VectorWidth::Narrow => e.asm().movss(dword_ptr(base), s),
                    _ => e.asm().vmovss(dword_ptr(base), s),
                }
                .map_err(|e| e.to_string())
            }
        }
    }
}

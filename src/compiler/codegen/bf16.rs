//! bf16 load/store conversion for generated kernels.
//!
//! Loads widen each 16-bit word into the high half of a 32-bit lane, which is
//! exact. Stores round to nearest even. With AVX512_BF16 on the wide class
//! the native `vcvtneps2bf16` does the rounding; everywhere else it is
//! emulated in integer lanes:
//!
//! ```text
//! t = ((x >> 16) & 1) + 0x7fff
//! q = (x >> 16) | 0x40          quiet NaN with the original payload
//! x = unord(x, x) ? q : (x + t) >> 16
//! ```
//!
//! followed by a width-specific narrowing of dwords to words.

use iced_x86::code_asm::*;

use super::const_table::ConstTable;
use super::injector::WIDE_PRED_K;
use super::simd_ops::{CmpPredicate, Pred, SimdOps, Src, VReg};
use super::x86_64::{xmm_reg, ymm_reg, zmm_reg, X86Emitter};
use crate::dispatch::VectorWidth;

/// Rounding temporaries. Live only inside a store, after the transform.
pub const CONV_T: VReg = VReg(3);
pub const CONV_Q: VReg = VReg(4);

/// Table indices of the rounding constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bf16Consts {
    pub lsb: usize,
    pub round_bias: usize,
    pub quiet_bit: usize,
}

impl Bf16Consts {
    /// Append the rounding constants after the transform's own layout.
    pub fn append(table: &mut ConstTable) -> Self {
        Bf16Consts {
            lsb: table.push(0x0000_0001),
            round_bias: table.push(0x0000_7fff),
            quiet_bit: table.push(0x0000_0040),
        }
    }
}

/// Predicate the emulated rounding uses on `width`.
pub fn conv_pred(width: VectorWidth) -> Pred {
    match width {
        VectorWidth::Wide => Pred::K(WIDE_PRED_K),
        _ => Pred::Vec(VReg(0)),
    }
}

/// Round the f32 lanes of `v` to bf16, leaving each result in the low
/// 16 bits of its lane. Clobbers `CONV_T`, `CONV_Q` and `pred`.
pub fn emit_round_to_bf16<E: SimdOps>(e: &mut E, v: VReg, c: &Bf16Consts, pred: Pred) -> Result<(), String> {
    let (t, q) = (CONV_T, CONV_Q);
    e.vshr_i32(t, v, 16)?;
    e.vand(t, t, Src::Table(c.lsb))?;
    e.vadd_i32(t, t, Src::Table(c.round_bias))?;
    e.vshr_i32(q, v, 16)?;
    e.vor(q, q, Src::Table(c.quiet_bit))?;
    e.vcmp(pred, v, Src::Reg(v), CmpPredicate::Unord)?;
    e.vadd_i32(v, v, Src::Reg(t))?;
    e.vshr_i32(v, v, 16)?;
    e.vselect(v, pred, Src::Reg(q), v)
}

/// bf16 conversion strategy of one kernel, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bf16Conv {
    Native,
    Emulated(Bf16Consts),
}

impl Bf16Conv {
    /// Pick the strategy; the emulated one appends its constants to `table`.
    pub fn new(native: bool, table: &mut ConstTable) -> Self {
        if native {
            Bf16Conv::Native
        } else {
            Bf16Conv::Emulated(Bf16Consts::append(table))
        }
    }

    /// One full vector of bf16 from `[base]` into `dst`.
    pub fn load_vector(&self, e: &mut X86Emitter, dst: VReg, base: AsmRegister64) -> Result<(), String> {
        let reg = widened(e.width(), dst)?;
        let asm = e.asm();
        match reg {
            Widened::Narrow(d) => {
                asm.pmovzxwd(d, qword_ptr(base)).map_err(|e| e.to_string())?;
                asm.pslld(d, 16i32)
            }
            Widened::Medium(d) => {
                asm.vpmovzxwd(d, xmmword_ptr(base)).map_err(|e| e.to_string())?;
                asm.vpslld(d, d, 16i32)
            }
            Widened::Wide(d) => {
                asm.vpmovzxwd(d, ymmword_ptr(base)).map_err(|e| e.to_string())?;
                asm.vpslld(d, d, 16i32)
            }
        }
        .map_err(|e| e.to_string())
    }

    /// One bf16 element from `[base]` into lane 0 of `dst` (other lanes zero).
    pub fn load_scalar(&self, e: &mut X86Emitter, dst: VReg, base: AsmRegister64) -> Result<(), String> {
        let narrow = e.width() == VectorWidth::Narrow;
        let d = xmm_reg(dst.0)?;
        let asm = e.asm();
        asm.movzx(r8d, word_ptr(base)).map_err(|e| e.to_string())?;
        asm.shl(r8d, 16i32).map_err(|e| e.to_string())?;
        let r = if narrow { asm.movd(d, r8d) } else { asm.vmovd(d, r8d) };
        r.map_err(|e| e.to_string())
    }

    /// Store the f32 lanes of `src` to `[base]` as bf16. Clobbers `src`.
    pub fn store_vector(&self, e: &mut X86Emitter, src: VReg, base: AsmRegister64) -> Result<(), String> {
        match self {
            Bf16Conv::Native => {
                if e.width() != VectorWidth::Wide {
                    return Err(format!("native bf16 conversion needs avx512, not {}", e.width()));
                }
                let (t, s) = (ymm_reg(CONV_T.0)?, zmm_reg(src.0)?);
                let asm = e.asm();
                asm.vcvtneps2bf16(t, s).map_err(|e| e.to_string())?;
                asm.vmovdqu(ymmword_ptr(base), t).map_err(|e| e.to_string())
            }
            Bf16Conv::Emulated(c) => {
                let pred = conv_pred(e.width());
                emit_round_to_bf16(e, src, c, pred)?;
                let reg = widened(e.width(), src)?;
                let low = xmm_reg(src.0)?;
                let asm = e.asm();
                match reg {
                    Widened::Narrow(s) => {
                        asm.packusdw(s, s).map_err(|e| e.to_string())?;
                        asm.movq(qword_ptr(base), s)
                    }
                    Widened::Medium(s) => {
                        asm.vpackusdw(s, s, s).map_err(|e| e.to_string())?;
                        asm.vpermq(s, s, 0xD8i32).map_err(|e| e.to_string())?;
                        asm.vmovdqu(xmmword_ptr(base), low)
                    }
                    Widened::Wide(s) => asm.vpmovdw(ymmword_ptr(base), s),
                }
                .map_err(|e| e.to_string())
            }
        }
    }

    /// Store lane 0 of `src` to `[base]` as bf16. Clobbers `src`.
    pub fn store_scalar(&self, e: &mut X86Emitter, src: VReg, base: AsmRegister64) -> Result<(), String> {
        let narrow = e.width() == VectorWidth::Narrow;
        let word = match self {
            Bf16Conv::Native => {
                let (t, s) = (xmm_reg(CONV_T.0)?, xmm_reg(src.0)?);
                let asm = e.asm();
                // the 128-bit form also exists as a VEX (AVX-NE-CONVERT) encoding
                let prefer_vex = asm.prefer_vex();
                asm.set_prefer_vex(false);
                let r = asm.vcvtneps2bf16(t, s);
                asm.set_prefer_vex(prefer_vex);
                r.map_err(|e| e.to_string())?;
                t
            }
            Bf16Conv::Emulated(c) => {
                let pred = conv_pred(e.width());
                emit_round_to_bf16(e, src, c, pred)?;
                xmm_reg(src.0)?
            }
        };
        let asm = e.asm();
        let r = if narrow { asm.movd(r8d, word) } else { asm.vmovd(r8d, word) };
        r.map_err(|e| e.to_string())?;
        asm.mov(word_ptr(base), r8w).map_err(|e| e.to_string())
    }
}

enum Widened {
    Narrow(AsmRegisterXmm),
    Medium(AsmRegisterYmm),
    Wide(AsmRegisterZmm),
}

fn widened(width: VectorWidth, reg: VReg) -> Result<Widened, String> {
    Ok(match width {
        VectorWidth::Narrow => Widened::Narrow(xmm_reg(reg.0)?),
        VectorWidth::Medium => Widened::Medium(ymm_reg(reg.0)?),
        VectorWidth::Wide => Widened::Wide(zmm_reg(reg.0)?),
    })
}

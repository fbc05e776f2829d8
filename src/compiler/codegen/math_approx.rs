//! Shared math approximations — ISA-independent transcendental transforms.
//!
//! Generic emit functions for exp, elu, tanh, logistic and soft_relu. They
//! are called by `injector.rs`, read every constant from the table laid out
//! in `const_table.rs`, and emit instructions via the `SimdOps` trait.
//!
//! Register usage follows the injector's role table: `aux(0)` is the mask
//! (and the predicate on the narrow and medium classes), `aux(1)..` are
//! scratch. Each function documents which roles it clobbers.
//!
//! Accuracy on the FMA classes: exp within 1e-6 relative, tanh and logistic
//! within 1e-6 absolute, soft_relu within 2e-6 of max(1, |result|).

use super::const_table::{exp_idx as X, soft_relu_idx as S};
use super::injector::{with_spilled, RegTable};
use super::simd_ops::{CmpPredicate, SimdOps, Src, VReg};

fn t(idx: usize) -> Src {
    Src::Table(idx)
}

// ── Exponential ─────────────────────────────────────────────────────────────

/// Emit `v = exp(v)`.
///
/// Algorithm:
/// 1. Record lanes below ln(FLT_MIN), clamp into [ln(FLT_MIN), 89]
/// 2. n = floor(x * log2(e) + 0.5)
/// 3. r = x - n * ln(2)
/// 4. n1 = floor(n / 2), n2 = n - n1; 2^n1 and 2^n2 built in the exponent
///    field, 2^n1 zeroed for the recorded lanes
/// 5. Horner: p = p0 + r*(1 + r*(p2 + r*(p3 + r*(p4 + r*p5))))
/// 6. exp(x) = p * 2^n1 * 2^n2
///
/// n reaches 128 just below ln(FLT_MAX), which has no f32 exponent field;
/// the split keeps both halves representable. Inputs past ln(FLT_MAX)
/// overflow to +inf. Clobbers `aux(0)..=aux(2)` and the predicate. Reads
/// table entries 0..=11 and `ZERO`.
pub fn emit_exp<E: SimdOps>(e: &mut E, r: &RegTable, v: VReg) -> Result<(), String> {
    let (a0, a1, a2, p) = (r.aux(0)?, r.aux(1)?, r.aux(2)?, r.pred()?);

    e.vcmp(p, v, t(X::EXP_LO), CmpPredicate::Lt)?;
    e.vmin(v, v, t(X::EXP_HI))?;
    e.vmax(v, v, t(X::EXP_LO))?;
    e.vmov(a1, Src::Reg(v))?;

    // n = floor(x * log2(e) + 0.5)
    e.vmul(v, v, t(X::LOG2E))?;
    e.vadd(v, v, t(X::HALF))?;
    e.vfloor(a2, v)?;
    e.vmov(v, Src::Reg(a2))?;

    // r = x - n * ln2 (clobbers a2 without FMA)
    e.vfnmadd231(a1, a2, t(X::LN2))?;

    // n1 = floor(n / 2), n2 = n - n1
    e.vmul(a2, v, t(X::HALF))?;
    e.vfloor(a2, a2)?;
    e.vsub(v, v, Src::Reg(a2))?;

    // 2^n1, 2^n2
    for s in [a2, v] {
        e.vcvt_f32_i32(s, s)?;
        e.vadd_i32(s, s, t(X::EXP_BIAS))?;
        e.vshl_i32(s, s, 23)?;
    }
    e.vselect(a2, p, t(X::ZERO), a2)?;
    // predicate is dead from here on, aux(0) may alias it
    e.vmov(a0, Src::Reg(v))?;

    e.vmov(v, t(X::P5))?;
    for c in [X::P4, X::P3, X::P2, X::ONE, X::P0] {
        e.vfmadd213(v, a1, t(c))?;
    }
    e.vmul(v, v, Src::Reg(a2))?;
    e.vmul(v, v, Src::Reg(a0))
}

/// Emit `v = v > 0 ? v : alpha * (exp(v) - 1)`.
///
/// Clobbers `aux(0)..=aux(3)` and the predicate.
pub fn emit_elu<E: SimdOps>(e: &mut E, r: &RegTable, v: VReg) -> Result<(), String> {
    let (a3, p) = (r.aux(3)?, r.pred()?);

    e.vmov(a3, Src::Reg(v))?;
    emit_exp(e, r, v)?;
    e.vsub(v, v, t(X::ONE))?;
    e.vmul(v, v, t(X::ALPHA))?;
    e.vcmp(p, a3, t(X::ZERO), CmpPredicate::Nle)?;
    e.vselect(v, p, Src::Reg(a3), v)
}

// ── Logistic ────────────────────────────────────────────────────────────────

/// Emit `v = 1 / (1 + exp(-v))`.
///
/// Evaluated on -|x| so the exponential never overflows:
/// s = e / (1 + e) with e = exp(-|x|), result is s for negative x and
/// 1 - s otherwise. Clobbers `aux(0)..=aux(3)` and the predicate.
pub fn emit_logistic<E: SimdOps>(e: &mut E, r: &RegTable, v: VReg) -> Result<(), String> {
    let (a1, a2, a3, p) = (r.aux(1)?, r.aux(2)?, r.aux(3)?, r.pred()?);

    e.vand(a3, v, t(X::SIGN_MASK))?;
    e.vor(v, v, t(X::SIGN_MASK))?;
    emit_exp(e, r, v)?;

    e.vadd(a1, v, t(X::ONE))?;
    e.vdiv(v, v, Src::Reg(a1))?;
    e.vmov(a2, t(X::ONE))?;
    e.vsub(a2, a2, Src::Reg(v))?;

    e.vpred_from_sign(p, a3)?;
    e.vselect(a2, p, Src::Reg(v), a2)?;
    e.vmov(v, Src::Reg(a2))
}

// ── Tanh ────────────────────────────────────────────────────────────────────

/// Emit `v = tanh(v)`.
///
/// Works on |x| and restores the sign at the end. Four regions:
///
/// | \|x\| | result |
/// |---|---|
/// | below sqrt(3) * 2^-12 | x |
/// | below ln(3)/2 | x * P(x^2), degree-4 P |
/// | below atanh(1 - 2^-25) | 1 - 2 / (exp(2x) + 1) |
/// | above | 1 |
///
/// The polynomial and exponential regions are skipped when no lane needs
/// them. The exponential runs with `aux(1)` and the predicate spilled.
/// Clobbers `aux(0)..=aux(4)` and the predicate.
pub fn emit_tanh<E: SimdOps>(e: &mut E, r: &RegTable, v: VReg) -> Result<(), String> {
    let (a1, a2, a3, a4) = (r.aux(1)?, r.aux(2)?, r.aux(3)?, r.aux(4)?);
    let p = r.pred()?;
    let end = e.alloc_label();

    e.vand(a4, v, t(X::SIGN_MASK))?;
    e.vand(v, v, t(X::ABS_MASK))?;
    e.vmov(a1, Src::Reg(v))?;

    e.vcmp(p, v, t(X::TANH_LINEAR), CmpPredicate::Nlt)?;
    e.branch_if_none(p, end)?;

    // x * (p0 + p1 x^2 + ... + p4 x^8)
    e.vmul(a2, v, Src::Reg(v))?;
    e.vmov(a3, t(X::TANH_P4))?;
    for c in [X::TANH_P3, X::TANH_P2, X::TANH_P1, X::TANH_P0] {
        e.vfmadd213(a3, a2, t(c))?;
    }
    e.vmul(a3, a3, Src::Reg(v))?;
    e.vselect(a1, p, Src::Reg(a3), a1)?;

    e.vcmp(p, v, t(X::TANH_POLY), CmpPredicate::Nlt)?;
    e.branch_if_none(p, end)?;

    // 1 - 2 / (exp(2x) + 1)
    e.vadd(a3, v, Src::Reg(v))?;
    with_spilled(e, &[a1], Some(p), |e| emit_exp(e, r, a3))?;
    e.vadd(a3, a3, t(X::ONE))?;
    e.vmov(a2, t(X::NEG_TWO))?;
    e.vdiv(a2, a2, Src::Reg(a3))?;
    e.vadd(a2, a2, t(X::ONE))?;
    e.vselect(a1, p, Src::Reg(a2), a1)?;

    e.vcmp(p, v, t(X::TANH_SAT), CmpPredicate::Nlt)?;
    e.vmov(a2, t(X::ONE))?;
    e.vselect(a1, p, Src::Reg(a2), a1)?;

    e.define_label(end)?;
    e.vxor(v, a1, Src::Reg(a4))
}

// ── Soft ReLU ───────────────────────────────────────────────────────────────

/// Emit `v = ln(1 + exp(v))`.
///
/// With x = n ln2 + r: 1 + e^x = 2^n (e^r + 2^-n), so
/// result = n ln2 + ln(e^r + 2^-n). The logarithm splits its argument into
/// 2^k * m with m in [0.5, 1) and evaluates a degree-8 polynomial in m - 1.
/// Inputs above 88 return the input itself. Clobbers `aux(0)..=aux(3)` and
/// the predicate.
pub fn emit_soft_relu<E: SimdOps>(e: &mut E, r: &RegTable, v: VReg) -> Result<(), String> {
    let (a0, a1, a2, a3) = (r.aux(0)?, r.aux(1)?, r.aux(2)?, r.aux(3)?);
    let p = r.pred()?;

    e.vmov(a2, Src::Reg(v))?;
    e.vmin(v, v, t(S::CLAMP_HI))?;
    e.vmax(v, v, t(S::CLAMP_LO))?;
    e.vmov(a1, Src::Reg(v))?;

    // n = floor(x * log2(e) + 0.5), a0 = n ln2, r = x - n ln2
    e.vmul(v, v, t(S::LOG2E))?;
    e.vadd(v, v, t(S::HALF))?;
    e.vfloor(a0, v)?;
    e.vmov(v, Src::Reg(a0))?;
    e.vmul(a0, a0, t(S::LN2))?;
    e.vsub(a1, a1, Src::Reg(a0))?;

    // e^r
    e.vmov(a3, t(S::EXP_P5))?;
    for c in [S::EXP_P4, S::EXP_P3, S::EXP_P2, S::EXP_P1, S::EXP_P0] {
        e.vfmadd213(a3, a1, t(c))?;
    }

    // + 2^-n
    e.vmul(a1, v, t(S::NEG_ONE))?;
    e.vcvt_f32_i32(a1, a1)?;
    e.vadd_i32(a1, a1, t(S::EXP_BIAS))?;
    e.vshl_i32(a1, a1, 23)?;
    e.vadd(a3, a3, Src::Reg(a1))?;

    // k = exponent(a3) - 126, y = mantissa(a3) in [0.5, 1) minus one
    e.vmov(v, Src::Reg(a3))?;
    e.vshr_i32(v, v, 23)?;
    e.vcvt_i32_f32(v, v)?;
    e.vsub(v, v, t(S::EXPONENT_BIAS_M1))?;
    e.vand(a3, a3, t(S::MANTISSA_MASK))?;
    e.vor(a3, a3, t(S::HALF_EXPONENT))?;
    e.vsub(a3, a3, t(S::ONE))?;

    // ln(1 + y)
    e.vmov(a1, t(S::LN_P8))?;
    for c in (S::LN_P0..S::LN_P8).rev() {
        e.vfmadd213(a1, a3, t(c))?;
    }

    // + k ln2 + n ln2
    e.vmul(v, v, t(S::LN2))?;
    e.vadd(a1, a1, Src::Reg(v))?;
    e.vadd(a1, a1, Src::Reg(a0))?;

    e.vcmp(p, a2, t(S::CLAMP_HI), CmpPredicate::Nle)?;
    e.vselect(a1, p, Src::Reg(a2), a1)?;
    e.vmov(v, Src::Reg(a1))
}

#[cfg(all(test, target_arch = "x86_64", feature = "jit-x86"))]
mod tests {
    use super::*;
    use crate::compiler::codegen::const_table::ConstTable;
    use crate::compiler::codegen::injector::EltwiseInjector;
    use crate::compiler::codegen::x86_64::X86Emitter;
    use crate::dispatch::VectorWidth;
    use crate::types::EltwiseAlg;
    use iced_x86::{Decoder, DecoderOptions, Mnemonic};

    fn emit(alg: EltwiseAlg, width: VectorWidth) -> Vec<Mnemonic> {
        let mut inj = EltwiseInjector::new(alg, 1.0, 0.0);
        let table: ConstTable = inj.table();
        let mut e = X86Emitter::new(width).unwrap();
        e.embed_table(&table.to_bytes(width.lanes())).unwrap();
        inj.prepare(&mut e, &[VReg(1)], &[]).unwrap();
        inj.apply(&mut e, VReg(1)).unwrap();
        inj.finish(&mut e).unwrap();
        e.asm().ret().unwrap();
        let out = e.finalize().unwrap();
        let code = &out.code[out.entry_offset..];
        Decoder::with_ip(64, code, 0, DecoderOptions::NONE)
            .iter()
            .map(|i| i.mnemonic())
            .collect()
    }

    #[test]
    fn test_exp_narrow_has_no_fma() {
        let m = emit(EltwiseAlg::Exp, VectorWidth::Narrow);
        assert!(m.contains(&Mnemonic::Roundps));
        assert!(m.contains(&Mnemonic::Blendvps));
        assert!(!m.iter().any(|x| format!("{x:?}").starts_with("Vfm")));
    }

    #[test]
    fn test_exp_wide_uses_opmask_blend() {
        let m = emit(EltwiseAlg::Exp, VectorWidth::Wide);
        assert!(m.contains(&Mnemonic::Vrndscaleps));
        assert!(m.contains(&Mnemonic::Vblendmps));
        assert_eq!(m.iter().filter(|&&x| x == Mnemonic::Vfmadd213ps).count(), 5);
    }

    #[test]
    fn test_tanh_spills_around_exp() {
        for width in VectorWidth::ALL {
            let m = emit(EltwiseAlg::Tanh, width);
            // two region exits
            let jumps = m.iter().filter(|&&x| x == Mnemonic::Je).count();
            assert_eq!(jumps, 2, "{width}");
            assert_eq!(m.iter().filter(|&&x| x == Mnemonic::Sub).count(), 1, "{width}");
            assert_eq!(m.iter().filter(|&&x| x == Mnemonic::Add).count(), 1, "{width}");
            if width == VectorWidth::Wide {
                assert_eq!(m.iter().filter(|&&x| x == Mnemonic::Kmovw).count(), 2);
            }
        }
    }

    #[test]
    fn test_soft_relu_and_logistic_emit() {
        for width in VectorWidth::ALL {
            assert!(emit(EltwiseAlg::SoftRelu, width).len() > 30, "{width}");
            assert!(emit(EltwiseAlg::Logistic, width).len() > 20, "{width}");
            assert!(emit(EltwiseAlg::Elu, width).len() > 20, "{width}");
        }
    }
}

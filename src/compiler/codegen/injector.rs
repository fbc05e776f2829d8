//! Transform injector: emits `v = f(v)` for one vector register.
//!
//! The injector owns the register discipline around a transform:
//!
//! 1. `prepare` reserves the scratch registers the transform needs: the
//!    lowest indices that are neither operands nor live, then live
//!    registers when the free ones run out. Borrowed live registers are
//!    always spilled; with `save_state` every scratch register and the table
//!    base register are. It then loads the table base.
//! 2. `apply` / `apply_backward` emit the formula, touching only the target
//!    register, the scratch set and the predicate register.
//! 3. `finish` undoes what `prepare` saved.
//!
//! On the narrow class `blendvps` reads its mask from `xmm0`, so whenever a
//! transform needs scratch registers, `xmm0` is the first of them and holds
//! the predicate.

use super::const_table::{abs_idx, linear_idx, relu_idx, sqrt_idx, ConstTable};
use super::math_approx;
use super::simd_ops::{CmpPredicate, Pred, SimdOps, Src, VReg};
use crate::dispatch::VectorWidth;
use crate::types::EltwiseAlg;

/// Opmask register used as the predicate on the wide class.
pub const WIDE_PRED_K: u8 = 1;

/// Scratch registers a transform needs besides its target register.
pub fn aux_vecs_count(alg: EltwiseAlg, alpha: f32, backward: bool) -> usize {
    if backward {
        return 2;
    }
    match alg {
        EltwiseAlg::Relu => {
            if alpha == 0.0 {
                0
            } else {
                2
            }
        }
        EltwiseAlg::Elu => 4,
        EltwiseAlg::Tanh => 5,
        EltwiseAlg::Square => 0,
        EltwiseAlg::Abs => 0,
        EltwiseAlg::Sqrt => 2,
        EltwiseAlg::Linear => 1,
        EltwiseAlg::BoundedRelu => 0,
        EltwiseAlg::SoftRelu => 4,
        EltwiseAlg::Logistic => 4,
        EltwiseAlg::Exp => 3,
    }
}

/// Scratch registers by role, produced by `prepare`.
///
/// `mask` and `aux(0)` name the same register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegTable {
    regs: Vec<VReg>,
    pred: Option<Pred>,
}

impl RegTable {
    pub fn mask(&self) -> Result<VReg, String> {
        self.aux(0)
    }

    pub fn aux(&self, i: usize) -> Result<VReg, String> {
        self.regs
            .get(i)
            .copied()
            .ok_or_else(|| format!("scratch slot aux{i} not reserved ({} reserved)", self.regs.len()))
    }

    /// Predicate register: the mask vector (narrow, medium) or `k1` (wide).
    pub fn pred(&self) -> Result<Pred, String> {
        self.pred.ok_or_else(|| "transform reserved no predicate".to_string())
    }

    pub fn regs(&self) -> &[VReg] {
        &self.regs
    }
}

/// Spill `regs` (and `pred`) to a fresh stack region around `body`.
///
/// The restore is emitted after the body, so every spill in the generated
/// code is paired with exactly one restore. `body` must not branch past the
/// end of the region.
pub fn with_spilled<E, F>(e: &mut E, regs: &[VReg], pred: Option<Pred>, body: F) -> Result<(), String>
where
    E: SimdOps,
    F: FnOnce(&mut E) -> Result<(), String>,
{
    let vlen = e.width().vlen_bytes() as i32;
    let pred_bytes = match pred {
        Some(Pred::Vec(_)) => vlen,
        Some(Pred::K(_)) => 8,
        None => 0,
    };
    let pred_off = regs.len() as i32 * vlen;
    let bytes = (pred_off + pred_bytes) as u32;
    if bytes == 0 {
        return body(e);
    }

    e.stack_alloc(bytes)?;
    for (i, &r) in regs.iter().enumerate() {
        e.vstore_stack(i as i32 * vlen, r)?;
    }
    if let Some(p) = pred {
        e.pred_store(pred_off, p)?;
    }

    body(e)?;

    if let Some(p) = pred {
        e.pred_load(p, pred_off)?;
    }
    for (i, &r) in regs.iter().enumerate() {
        e.vmov(r, Src::Stack(i as i32 * vlen))?;
    }
    e.stack_free(bytes)
}

/// Embedding options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InjectorConfig {
    /// Preserve the scratch registers and the table base register across
    /// `prepare`..`finish`, for embedding into code that owns them.
    pub save_state: bool,
}

/// Emits one elementwise transform into a surrounding code stream.
#[derive(Debug, Clone)]
pub struct EltwiseInjector {
    alg: EltwiseAlg,
    alpha: f32,
    beta: f32,
    backward: bool,
    save_state: bool,
    regs: Option<RegTable>,
    /// Registers `prepare` stored to its stack region, in slot order.
    saved: Vec<VReg>,
    /// Bytes reserved below the pushed table base by `prepare`.
    spill_bytes: u32,
}

impl EltwiseInjector {
    pub fn new(alg: EltwiseAlg, alpha: f32, beta: f32) -> Self {
        EltwiseInjector {
            alg,
            alpha,
            beta,
            backward: false,
            save_state: false,
            regs: None,
            saved: Vec::new(),
            spill_bytes: 0,
        }
    }

    /// Emit the derivative form (`apply_backward`); Relu only.
    pub fn for_backward(mut self) -> Self {
        self.backward = true;
        self
    }

    pub fn with_config(mut self, config: InjectorConfig) -> Self {
        self.save_state = config.save_state;
        self
    }

    pub fn alg(&self) -> EltwiseAlg {
        self.alg
    }

    pub fn aux_vecs_count(&self) -> usize {
        aux_vecs_count(self.alg, self.alpha, self.backward)
    }

    /// Constant table this transform reads.
    pub fn table(&self) -> ConstTable {
        ConstTable::for_alg(self.alg, self.alpha, self.beta)
    }

    /// Role assignment chosen by `prepare`.
    pub fn regs(&self) -> Option<&RegTable> {
        self.regs.as_ref()
    }

    /// Reserve scratch registers and load the table base.
    ///
    /// `operands` are the registers later passed to `apply` or
    /// `apply_backward` and are never handed out. `live` registers hold
    /// caller values: they are used only when too few registers are free,
    /// and then saved here and restored by `finish`.
    pub fn prepare<E: SimdOps>(&mut self, e: &mut E, operands: &[VReg], live: &[VReg]) -> Result<(), String> {
        if self.regs.is_some() {
            return Err("injector prepared twice without finish".into());
        }
        if self.backward && !self.alg.has_backward() {
            return Err(format!("no backward formula for {}", self.alg));
        }

        let width = e.width();
        let count = self.aux_vecs_count();
        let mut picked: Vec<VReg> = Vec::with_capacity(count);
        let mut borrowed: Vec<VReg> = Vec::new();

        if width == VectorWidth::Narrow && count > 0 {
            if operands.contains(&VReg(0)) {
                return Err(format!(
                    "{}: xmm0 is the blend mask on sse4.1 but was passed as an operand",
                    self.alg
                ));
            }
            picked.push(VReg(0));
            if live.contains(&VReg(0)) {
                borrowed.push(VReg(0));
            }
        }
        for idx in 0..width.num_vregs() {
            if picked.len() >= count {
                break;
            }
            let r = VReg(idx);
            if operands.contains(&r) || live.contains(&r) || picked.contains(&r) {
                continue;
            }
            picked.push(r);
        }
        for idx in 0..width.num_vregs() {
            if picked.len() >= count {
                break;
            }
            let r = VReg(idx);
            if operands.contains(&r) || picked.contains(&r) {
                continue;
            }
            picked.push(r);
            borrowed.push(r);
        }
        if picked.len() < count {
            return Err(format!(
                "{} needs {count} scratch registers, only {} are not operands on {width}",
                self.alg,
                picked.len()
            ));
        }
        if !borrowed.is_empty() {
            log::debug!("{} on {width}: spilling {} live registers for scratch", self.alg, borrowed.len());
        }

        let saved = if self.save_state { picked.clone() } else { borrowed };
        if self.save_state {
            e.push_table_base()?;
        }
        let vlen = width.vlen_bytes() as i32;
        self.spill_bytes = (saved.len() as i32 * vlen) as u32;
        if self.spill_bytes > 0 {
            e.stack_alloc(self.spill_bytes)?;
            for (i, &r) in saved.iter().enumerate() {
                e.vstore_stack(i as i32 * vlen, r)?;
            }
        }
        e.load_table_base()?;

        let pred = match (width, picked.first()) {
            (_, None) => None,
            (VectorWidth::Wide, Some(_)) => Some(Pred::K(WIDE_PRED_K)),
            (_, Some(&mask)) => Some(Pred::Vec(mask)),
        };
        self.saved = saved;
        self.regs = Some(RegTable { regs: picked, pred });
        Ok(())
    }

    /// v = f(v)
    pub fn apply<E: SimdOps>(&self, e: &mut E, v: VReg) -> Result<(), String> {
        let r = self.prepared(v)?;
        match self.alg {
            EltwiseAlg::Relu if self.alpha == 0.0 => e.vmax(v, v, Src::Table(relu_idx::ZERO)),
            EltwiseAlg::Relu => emit_leaky_relu(e, r, v, v),
            EltwiseAlg::BoundedRelu => {
                e.vmax(v, v, Src::Table(relu_idx::ZERO))?;
                e.vmin(v, v, Src::Table(relu_idx::ALPHA))
            }
            EltwiseAlg::Square => e.vmul(v, v, Src::Reg(v)),
            EltwiseAlg::Abs => e.vand(v, v, Src::Table(abs_idx::ABS_MASK)),
            EltwiseAlg::Sqrt => emit_sqrt(e, r, v),
            EltwiseAlg::Linear => {
                let a0 = r.aux(0)?;
                e.vmov(a0, Src::Table(linear_idx::ALPHA))?;
                e.vfmadd213(v, a0, Src::Table(linear_idx::BETA))
            }
            EltwiseAlg::Elu => math_approx::emit_elu(e, r, v),
            EltwiseAlg::Exp => math_approx::emit_exp(e, r, v),
            EltwiseAlg::Logistic => math_approx::emit_logistic(e, r, v),
            EltwiseAlg::Tanh => math_approx::emit_tanh(e, r, v),
            EltwiseAlg::SoftRelu => math_approx::emit_soft_relu(e, r, v),
        }
    }

    /// v = cmp > 0 ? v : alpha * v, where `v` holds the incoming gradient
    /// and `cmp` the forward input.
    pub fn apply_backward<E: SimdOps>(&self, e: &mut E, v: VReg, cmp: VReg) -> Result<(), String> {
        let r = self.prepared(v)?;
        if !self.backward || self.alg != EltwiseAlg::Relu {
            return Err(format!("no backward formula for {}", self.alg));
        }
        if r.regs().contains(&cmp) {
            return Err(format!("comparison register {cmp:?} overlaps the scratch set"));
        }
        emit_leaky_relu(e, r, v, cmp)
    }

    pub fn finish<E: SimdOps>(&mut self, e: &mut E) -> Result<(), String> {
        self.regs.take().ok_or("injector finished without prepare")?;
        let vlen = e.width().vlen_bytes() as i32;
        for (i, &r) in self.saved.iter().enumerate() {
            e.vmov(r, Src::Stack(i as i32 * vlen))?;
        }
        if self.spill_bytes > 0 {
            e.stack_free(self.spill_bytes)?;
        }
        if self.save_state {
            e.pop_table_base()?;
        }
        self.saved.clear();
        self.spill_bytes = 0;
        Ok(())
    }

    fn prepared(&self, v: VReg) -> Result<&RegTable, String> {
        let r = self.regs.as_ref().ok_or("injector used before prepare")?;
        if r.regs().contains(&v) {
            return Err(format!("target register {v:?} overlaps the scratch set"));
        }
        Ok(r)
    }
}

/// v = decide > 0 ? v : alpha * v
fn emit_leaky_relu<E: SimdOps>(e: &mut E, r: &RegTable, v: VReg, decide: VReg) -> Result<(), String> {
    let (a1, p) = (r.aux(1)?, r.pred()?);
    e.vmov(a1, Src::Reg(v))?;
    e.vmul(v, v, Src::Table(relu_idx::ALPHA))?;
    e.vcmp(p, decide, Src::Table(relu_idx::ZERO), CmpPredicate::Nle)?;
    e.vselect(v, p, Src::Reg(a1), v)
}

/// v = v > 0 ? sqrt(v) : 0
fn emit_sqrt<E: SimdOps>(e: &mut E, r: &RegTable, v: VReg) -> Result<(), String> {
    let (a1, p) = (r.aux(1)?, r.pred()?);
    e.vcmp(p, v, Src::Table(sqrt_idx::ZERO), CmpPredicate::Nle)?;
    e.vsqrt(a1, v)?;
    e.vmov(v, Src::Table(sqrt_idx::ZERO))?;
    e.vselect(v, p, Src::Reg(a1), v)
}

#[cfg(all(test, target_arch = "x86_64", feature = "jit-x86"))]
mod tests {
    use super::*;
    use crate::compiler::codegen::x86_64::{xmm_reg, ymm_reg, zmm_reg, X86Emitter};
    use crate::compiler::executable::ExecutableBuffer;
    use crate::dispatch::device_profile;
    use crate::reference;
    use iced_x86::code_asm::*;

    fn emitter(width: VectorWidth, table: &ConstTable) -> X86Emitter {
        let mut e = X86Emitter::new(width).unwrap();
        e.embed_table(&table.to_bytes(width.lanes())).unwrap();
        e
    }

    #[test]
    fn test_aux_counts() {
        assert_eq!(aux_vecs_count(EltwiseAlg::Relu, 0.0, false), 0);
        assert_eq!(aux_vecs_count(EltwiseAlg::Relu, 0.1, false), 2);
        assert_eq!(aux_vecs_count(EltwiseAlg::Relu, 0.0, true), 2);
        assert_eq!(aux_vecs_count(EltwiseAlg::Tanh, 0.0, false), 5);
        assert_eq!(aux_vecs_count(EltwiseAlg::Exp, 0.0, false), 3);
        assert!(EltwiseAlg::ALL.iter().all(|&a| aux_vecs_count(a, 1.0, false) <= 5));
    }

    #[test]
    fn test_narrow_mask_is_xmm0() {
        let mut inj = EltwiseInjector::new(EltwiseAlg::Tanh, 0.0, 0.0);
        let mut e = emitter(VectorWidth::Narrow, &inj.table());
        inj.prepare(&mut e, &[VReg(1)], &[VReg(3)]).unwrap();
        let r = inj.regs().unwrap();
        assert_eq!(r.mask().unwrap(), VReg(0));
        assert_eq!(r.regs(), &[VReg(0), VReg(2), VReg(4), VReg(5), VReg(6)]);
        assert_eq!(r.pred().unwrap(), Pred::Vec(VReg(0)));
    }

    #[test]
    fn test_narrow_xmm0_operand_or_live() {
        let mut inj = EltwiseInjector::new(EltwiseAlg::Sqrt, 0.0, 0.0);
        let mut e = emitter(VectorWidth::Narrow, &inj.table());
        assert!(inj.prepare(&mut e, &[VReg(0)], &[]).is_err());

        // live xmm0 is borrowed and still becomes the mask
        let mut inj = EltwiseInjector::new(EltwiseAlg::Sqrt, 0.0, 0.0);
        let mut e = emitter(VectorWidth::Narrow, &inj.table());
        inj.prepare(&mut e, &[VReg(1)], &[VReg(0)]).unwrap();
        assert_eq!(inj.regs().unwrap().regs(), &[VReg(0), VReg(2)]);
        assert_eq!(inj.saved, vec![VReg(0)]);

        // no scratch needed: xmm0 may be an operand
        let mut inj = EltwiseInjector::new(EltwiseAlg::Square, 0.0, 0.0);
        let mut e = emitter(VectorWidth::Narrow, &inj.table());
        inj.prepare(&mut e, &[VReg(0)], &[]).unwrap();
        assert!(inj.regs().unwrap().regs().is_empty());
    }

    #[test]
    fn test_wide_uses_opmask() {
        let mut inj = EltwiseInjector::new(EltwiseAlg::Exp, 0.0, 0.0);
        let mut e = emitter(VectorWidth::Wide, &inj.table());
        inj.prepare(&mut e, &[VReg(0)], &[]).unwrap();
        let r = inj.regs().unwrap();
        assert_eq!(r.regs(), &[VReg(1), VReg(2), VReg(3)]);
        assert_eq!(r.pred().unwrap(), Pred::K(WIDE_PRED_K));
    }

    #[test]
    fn test_live_registers_borrowed_last() {
        // 13 of 16 registers live: the three free ones first, then the
        // lowest live ones
        let live: Vec<VReg> = (0..13).filter(|&i| i != 3).map(VReg).collect();
        let mut inj = EltwiseInjector::new(EltwiseAlg::Tanh, 0.0, 0.0);
        let mut e = emitter(VectorWidth::Medium, &inj.table());
        inj.prepare(&mut e, &[VReg(3)], &live).unwrap();
        assert_eq!(inj.regs().unwrap().regs(), &[VReg(13), VReg(14), VReg(15), VReg(0), VReg(1)]);
        assert_eq!(inj.saved, vec![VReg(0), VReg(1)]);
        inj.apply(&mut e, VReg(3)).unwrap();
        inj.finish(&mut e).unwrap();
        assert!(inj.saved.is_empty());
    }

    #[test]
    fn test_scratch_exhaustion() {
        // only operands can make a transform run out of registers
        let operands: Vec<VReg> = (0..12).map(VReg).collect();
        let live: Vec<VReg> = (12..16).map(VReg).collect();
        let mut inj = EltwiseInjector::new(EltwiseAlg::Tanh, 0.0, 0.0);
        let mut e = emitter(VectorWidth::Medium, &inj.table());
        let err = inj.prepare(&mut e, &operands, &live).unwrap_err();
        assert!(err.contains("needs 5 scratch registers"), "{err}");
    }

    #[test]
    fn test_misuse_is_reported() {
        let mut inj = EltwiseInjector::new(EltwiseAlg::Elu, 1.0, 0.0);
        let mut e = emitter(VectorWidth::Medium, &inj.table());
        assert!(inj.apply(&mut e, VReg(8)).is_err());
        inj.prepare(&mut e, &[VReg(8)], &[]).unwrap();
        // target inside the scratch set
        assert!(inj.apply(&mut e, VReg(0)).is_err());
        assert!(inj.apply_backward(&mut e, VReg(8), VReg(9)).is_err());
        inj.apply(&mut e, VReg(8)).unwrap();
        inj.finish(&mut e).unwrap();
        assert!(inj.finish(&mut e).is_err());
    }

    // ── Register preservation ──────────────────────────────────────────

    const TARGET: u8 = 3;

    /// Build `fn(regs: *mut u8)`: load every vector register from `regs`,
    /// run the injector on `TARGET` with `live` declared, store every
    /// register back.
    fn build_harness(width: VectorWidth, inj: &mut EltwiseInjector, live: &[VReg]) -> (ExecutableBuffer, usize) {
        let mut e = emitter(width, &inj.table());
        let n = width.num_vregs();
        let vlen = width.vlen_bytes() as i32;

        for i in 0..n {
            let off = i as i32 * vlen;
            match width {
                VectorWidth::Narrow => e.asm().movups(xmm_reg(i).unwrap(), xmmword_ptr(rdi + off)),
                VectorWidth::Medium => e.asm().vmovups(ymm_reg(i).unwrap(), ymmword_ptr(rdi + off)),
                VectorWidth::Wide => e.asm().vmovups(zmm_reg(i).unwrap(), zmmword_ptr(rdi + off)),
            }
            .unwrap();
        }
        // rax is the table base; the caller's value must survive too
        e.asm().mov(rax, 0x1234_5678i64).unwrap();

        inj.prepare(&mut e, &[VReg(TARGET)], live).unwrap();
        inj.apply(&mut e, VReg(TARGET)).unwrap();
        inj.finish(&mut e).unwrap();

        for i in 0..n {
            let off = i as i32 * vlen;
            match width {
                VectorWidth::Narrow => e.asm().movups(xmmword_ptr(rdi + off), xmm_reg(i).unwrap()),
                VectorWidth::Medium => e.asm().vmovups(ymmword_ptr(rdi + off), ymm_reg(i).unwrap()),
                VectorWidth::Wide => e.asm().vmovups(zmmword_ptr(rdi + off), zmm_reg(i).unwrap()),
            }
            .unwrap();
        }
        e.asm().mov(qword_ptr(rdi + n as i32 * vlen), rax).unwrap();
        if width != VectorWidth::Narrow {
            e.asm().vzeroupper().unwrap();
        }
        e.asm().ret().unwrap();

        let out = e.finalize().unwrap();
        (ExecutableBuffer::new(&out.code).unwrap(), out.entry_offset)
    }

    /// Run the harness for every transform on every supported width. The
    /// target must hold f(x); registers in `preserved(width)` must come back
    /// bit-identical.
    fn check_preservation(save_state: bool, live: impl Fn(VectorWidth) -> Vec<VReg>, preserved: impl Fn(VectorWidth) -> Vec<VReg>) {
        let inputs = [-3.0f32, -0.5, 0.0, 0.25, 1.0, 2.5, 7.0, -9.0];
        for width in device_profile().supported_widths() {
            for alg in EltwiseAlg::ALL {
                let (alpha, beta) = (0.5f32, 0.25f32);
                let mut inj = EltwiseInjector::new(alg, alpha, beta).with_config(InjectorConfig { save_state });
                let (buf, entry) = build_harness(width, &mut inj, &live(width));

                let lanes = width.lanes();
                let n = width.num_vregs() as usize;
                let mut regs = vec![0f32; n * lanes + 2];
                for (i, slot) in regs.iter_mut().enumerate().take(n * lanes) {
                    *slot = 1000.0 + i as f32;
                }
                for l in 0..lanes {
                    regs[TARGET as usize * lanes + l] = inputs[l % inputs.len()];
                }
                let before = regs.clone();

                unsafe {
                    let f: unsafe extern "sysv64" fn(*mut u8) = std::mem::transmute(buf.ptr().add(entry));
                    f(regs.as_mut_ptr() as *mut u8);
                }

                for l in 0..lanes {
                    let i = TARGET as usize * lanes + l;
                    let x = before[i];
                    let want = reference::eltwise_fwd(alg, x, alpha, beta);
                    let got = regs[i];
                    assert!(
                        (got - want).abs() <= 1e-5 * want.abs().max(1.0),
                        "{width} {alg}: f({x}) = {got}, want {want}"
                    );
                }
                for reg in preserved(width) {
                    for l in 0..lanes {
                        let i = reg.0 as usize * lanes + l;
                        assert_eq!(regs[i].to_bits(), before[i].to_bits(), "{width} {alg}: reg {} clobbered", reg.0);
                    }
                }
                if save_state {
                    let rax_after =
                        u64::from(regs[n * lanes].to_bits()) | (u64::from(regs[n * lanes + 1].to_bits()) << 32);
                    assert_eq!(rax_after, 0x1234_5678, "{width} {alg}: table base not restored");
                }
            }
        }
    }

    fn all_but_target(width: VectorWidth) -> Vec<VReg> {
        (0..width.num_vregs()).filter(|&i| i != TARGET).map(VReg).collect()
    }

    #[test]
    fn test_save_state_preserves_registers() {
        check_preservation(true, |_| Vec::new(), all_but_target);
    }

    #[test]
    fn test_borrowed_live_registers_restored() {
        // every register live except the target and the top three
        let live = |w: VectorWidth| {
            let n = w.num_vregs();
            all_but_target(w).into_iter().filter(|r| r.0 < n - 3).collect()
        };
        check_preservation(false, live, live);
    }
}

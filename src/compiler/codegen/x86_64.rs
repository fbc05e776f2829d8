//! x86_64 JIT code generation via iced-x86 CodeAssembler.
//!
//! `X86Emitter` implements `SimdOps` for the three vector width classes:
//!
//! | class  | regs        | float ops      | bitwise              | blend                    |
//! |--------|-------------|----------------|----------------------|--------------------------|
//! | narrow | xmm0-15     | SSE 2-operand  | andps/orps/xorps     | blendvps (mask in xmm0)  |
//! | medium | ymm0-15     | VEX 3-operand  | vandps/vorps/vxorps  | vblendvps                |
//! | wide   | zmm0-31     | EVEX 3-operand | vpandd/vpord/vpxord  | vblendmps under k-mask   |
//!
//! The constant table is emitted as data at the start of the code region and
//! addressed RIP-relative into `rax` (the table base register).

use iced_x86::code_asm::*;

use super::simd_ops::{CmpPredicate, Label, Pred, SimdOps, Src, VReg};
use super::CodegenOutput;
use crate::dispatch::VectorWidth;

/// Alignment of the code entry point after the embedded table.
pub const TABLE_ALIGN: usize = 64;

// ── Register mapping ────────────────────────────────────────────────────────

pub fn xmm_reg(idx: u8) -> Result<AsmRegisterXmm, String> {
    let regs = [
        xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12,
        xmm13, xmm14, xmm15, xmm16, xmm17, xmm18, xmm19, xmm20, xmm21, xmm22, xmm23, xmm24,
        xmm25, xmm26, xmm27, xmm28, xmm29, xmm30, xmm31,
    ];
    regs.get(idx as usize)
        .copied()
        .ok_or_else(|| format!("xmm index {idx} out of range (0..31)"))
}

pub fn ymm_reg(idx: u8) -> Result<AsmRegisterYmm, String> {
    let regs = [
        ymm0, ymm1, ymm2, ymm3, ymm4, ymm5, ymm6, ymm7, ymm8, ymm9, ymm10, ymm11, ymm12,
        ymm13, ymm14, ymm15, ymm16, ymm17, ymm18, ymm19, ymm20, ymm21, ymm22, ymm23, ymm24,
        ymm25, ymm26, ymm27, ymm28, ymm29, ymm30, ymm31,
    ];
    regs.get(idx as usize)
        .copied()
        .ok_or_else(|| format!("ymm index {idx} out of range (0..31)"))
}

pub fn zmm_reg(idx: u8) -> Result<AsmRegisterZmm, String> {
    let regs = [
        zmm0, zmm1, zmm2, zmm3, zmm4, zmm5, zmm6, zmm7, zmm8, zmm9, zmm10, zmm11, zmm12,
        zmm13, zmm14, zmm15, zmm16, zmm17, zmm18, zmm19, zmm20, zmm21, zmm22, zmm23, zmm24,
        zmm25, zmm26, zmm27, zmm28, zmm29, zmm30, zmm31,
    ];
    regs.get(idx as usize)
        .copied()
        .ok_or_else(|| format!("zmm index {idx} out of range (0..31)"))
}

/// Map opmask index 1..7 to iced-x86 AsmRegisterK (k0 cannot be a write mask).
pub fn k_reg(idx: u8) -> Result<AsmRegisterK, String> {
    match idx {
        1 => Ok(k1),
        2 => Ok(k2),
        3 => Ok(k3),
        4 => Ok(k4),
        5 => Ok(k5),
        6 => Ok(k6),
        7 => Ok(k7),
        _ => Err(format!("opmask index {idx} out of range (1..7)")),
    }
}

fn zmm_masked(reg: AsmRegisterZmm, k: u8) -> Result<AsmRegisterZmm, String> {
    match k {
        1 => Ok(reg.k1()),
        2 => Ok(reg.k2()),
        3 => Ok(reg.k3()),
        4 => Ok(reg.k4()),
        5 => Ok(reg.k5()),
        6 => Ok(reg.k6()),
        7 => Ok(reg.k7()),
        _ => Err(format!("opmask index {k} out of range (1..7)")),
    }
}

/// A resolved second operand.
enum Opnd {
    Reg(u8),
    Mem(AsmMemoryOperand),
}

/// `dst = a op b` for every width class. `$sse` is the 2-operand SSE form,
/// `$vex` the AVX form and `$evex` the AVX-512 form (differs for bitwise ops).
macro_rules! emit_binop {
    ($self:ident, $sse:ident, $vex:ident, $evex:ident, $dst:expr, $a:expr, $b:expr, $commutative:expr) => {{
        let (dst, a, b): (VReg, VReg, Src) = ($dst, $a, $b);
        match $self.width {
            VectorWidth::Narrow => {
                let b = $self.narrow_tie(dst, a, b, $commutative)?;
                let d = xmm_reg(dst.0)?;
                match $self.opnd(b) {
                    Opnd::Reg(r) => $self.asm.$sse(d, xmm_reg(r)?),
                    Opnd::Mem(m) => $self.asm.$sse(d, m),
                }
            }
            VectorWidth::Medium => {
                let (d, a) = (ymm_reg(dst.0)?, ymm_reg(a.0)?);
                match $self.opnd(b) {
                    Opnd::Reg(r) => $self.asm.$vex(d, a, ymm_reg(r)?),
                    Opnd::Mem(m) => $self.asm.$vex(d, a, m),
                }
            }
            VectorWidth::Wide => {
                let (d, a) = (zmm_reg(dst.0)?, zmm_reg(a.0)?);
                match $self.opnd(b) {
                    Opnd::Reg(r) => $self.asm.$evex(d, a, zmm_reg(r)?),
                    Opnd::Mem(m) => $self.asm.$evex(d, a, m),
                }
            }
        }
        .map_err(|e| e.to_string())
    }};
}

/// `dst = op(a)` for register-only unary forms.
macro_rules! emit_unop {
    ($self:ident, $sse:ident, $vex:ident, $dst:expr, $a:expr) => {{
        let (dst, a): (VReg, VReg) = ($dst, $a);
        match $self.width {
            VectorWidth::Narrow => $self.asm.$sse(xmm_reg(dst.0)?, xmm_reg(a.0)?),
            VectorWidth::Medium => $self.asm.$vex(ymm_reg(dst.0)?, ymm_reg(a.0)?),
            VectorWidth::Wide => $self.asm.$vex(zmm_reg(dst.0)?, zmm_reg(a.0)?),
        }
        .map_err(|e| e.to_string())
    }};
}

/// `dst = a shift imm` (32-bit lanes).
macro_rules! emit_shift {
    ($self:ident, $sse:ident, $vex:ident, $dst:expr, $a:expr, $imm:expr) => {{
        let (dst, a, imm): (VReg, VReg, i32) = ($dst, $a, $imm as i32);
        match $self.width {
            VectorWidth::Narrow => {
                $self.mov_reg(dst, a)?;
                $self.asm.$sse(xmm_reg(dst.0)?, imm)
            }
            VectorWidth::Medium => $self.asm.$vex(ymm_reg(dst.0)?, ymm_reg(a.0)?, imm),
            VectorWidth::Wide => $self.asm.$vex(zmm_reg(dst.0)?, zmm_reg(a.0)?, imm),
        }
        .map_err(|e| e.to_string())
    }};
}

// ── Emitter ─────────────────────────────────────────────────────────────────

/// x86_64 instruction emitter for one vector width class.
pub struct X86Emitter {
    asm: CodeAssembler,
    width: VectorWidth,
    labels: Vec<CodeLabel>,
    table_label: CodeLabel,
    /// Bytes of table data in front of the first instruction.
    entry_offset: usize,
    table_embedded: bool,
}

impl X86Emitter {
    pub fn new(width: VectorWidth) -> Result<Self, String> {
        let mut asm = CodeAssembler::new(64).map_err(|e| e.to_string())?;
        let table_label = asm.create_label();
        Ok(X86Emitter {
            asm,
            width,
            labels: Vec::new(),
            table_label,
            entry_offset: 0,
            table_embedded: false,
        })
    }

    /// Raw assembler access for ISA-specific sequences (loads, stores,
    /// conversions, loop control).
    pub fn asm(&mut self) -> &mut CodeAssembler {
        &mut self.asm
    }

    /// Place the lane-replicated table bytes at the head of the code region.
    /// Must be called before the first instruction.
    pub fn embed_table(&mut self, bytes: &[u8]) -> Result<(), String> {
        if self.table_embedded || !self.asm.instructions().is_empty() {
            return Err("constant table must be embedded before any code".into());
        }
        let padded = bytes.len().div_ceil(TABLE_ALIGN) * TABLE_ALIGN;
        let mut data = Vec::with_capacity(padded);
        data.extend_from_slice(bytes);
        data.resize(padded, 0);

        self.asm.set_label(&mut self.table_label).map_err(|e| e.to_string())?;
        if !data.is_empty() {
            self.asm.db(&data).map_err(|e| e.to_string())?;
        }
        self.entry_offset = padded;
        self.table_embedded = true;
        Ok(())
    }

    /// Jump target for loop control in the kernel builder.
    pub fn code_label(&self, label: Label) -> Result<CodeLabel, String> {
        self.labels
            .get(label.0 as usize)
            .copied()
            .ok_or_else(|| format!("unknown label {}", label.0))
    }

    /// Assemble and return the machine code with its entry offset.
    pub fn finalize(mut self) -> Result<CodegenOutput, String> {
        if !self.table_embedded {
            return Err("constant table was never embedded".into());
        }
        let code = self.asm.assemble(0).map_err(|e| e.to_string())?;
        Ok(CodegenOutput {
            code,
            entry_offset: self.entry_offset,
        })
    }

    // ── Operand helpers ─────────────────────────────────────────────────

    fn vec_ptr(&self, mem: AsmMemoryOperand) -> AsmMemoryOperand {
        match self.width {
            VectorWidth::Narrow => xmmword_ptr(mem),
            VectorWidth::Medium => ymmword_ptr(mem),
            VectorWidth::Wide => zmmword_ptr(mem),
        }
    }

    fn opnd(&self, src: Src) -> Opnd {
        match src {
            Src::Reg(r) => Opnd::Reg(r.0),
            Src::Table(idx) => {
                let off = (idx * self.width.vlen_bytes()) as i32;
                Opnd::Mem(self.vec_ptr(rax + off))
            }
            Src::Stack(off) => Opnd::Mem(self.vec_ptr(rsp + off)),
        }
    }

    fn mov_reg(&mut self, dst: VReg, src: VReg) -> Result<(), String> {
        if dst == src {
            return Ok(());
        }
        match self.width {
            VectorWidth::Narrow => self.asm.movaps(xmm_reg(dst.0)?, xmm_reg(src.0)?),
            VectorWidth::Medium => self.asm.vmovaps(ymm_reg(dst.0)?, ymm_reg(src.0)?),
            VectorWidth::Wide => self.asm.vmovaps(zmm_reg(dst.0)?, zmm_reg(src.0)?),
        }
        .map_err(|e| e.to_string())
    }

    /// Make `dst` hold `a` for a 2-operand SSE instruction and return the
    /// operand to combine with it.
    fn narrow_tie(&mut self, dst: VReg, a: VReg, b: Src, commutative: bool) -> Result<Src, String> {
        if dst == a {
            return Ok(b);
        }
        if b == Src::Reg(dst) {
            if commutative {
                return Ok(Src::Reg(a));
            }
            return Err(format!(
                "sse: second operand aliases destination xmm{} of a non-commutative op",
                dst.0
            ));
        }
        self.mov_reg(dst, a)?;
        Ok(b)
    }

    fn vec_pred(&self, pred: Pred) -> Result<VReg, String> {
        match (self.width, pred) {
            (VectorWidth::Narrow | VectorWidth::Medium, Pred::Vec(m)) => Ok(m),
            (w, p) => Err(format!("predicate {p:?} not valid for {w}")),
        }
    }

    fn k_pred(&self, pred: Pred) -> Result<u8, String> {
        match (self.width, pred) {
            (VectorWidth::Wide, Pred::K(k)) => Ok(k),
            (w, p) => Err(format!("predicate {p:?} not valid for {w}")),
        }
    }
}

impl SimdOps for X86Emitter {
    fn width(&self) -> VectorWidth {
        self.width
    }

    fn vmov(&mut self, dst: VReg, src: Src) -> Result<(), String> {
        match self.opnd(src) {
            Opnd::Reg(r) => self.mov_reg(dst, VReg(r)),
            Opnd::Mem(m) => match self.width {
                VectorWidth::Narrow => self.asm.movups(xmm_reg(dst.0)?, m),
                VectorWidth::Medium => self.asm.vmovups(ymm_reg(dst.0)?, m),
                VectorWidth::Wide => self.asm.vmovups(zmm_reg(dst.0)?, m),
            }
            .map_err(|e| e.to_string()),
        }
    }

    fn vstore_stack(&mut self, offset: i32, src: VReg) -> Result<(), String> {
        let m = self.vec_ptr(rsp + offset);
        match self.width {
            VectorWidth::Narrow => self.asm.movups(m, xmm_reg(src.0)?),
            VectorWidth::Medium => self.asm.vmovups(m, ymm_reg(src.0)?),
            VectorWidth::Wide => self.asm.vmovups(m, zmm_reg(src.0)?),
        }
        .map_err(|e| e.to_string())
    }

    fn vzero(&mut self, dst: VReg) -> Result<(), String> {
        emit_binop!(self, xorps, vxorps, vpxord, dst, dst, Src::Reg(dst), true)
    }

    fn vadd(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, addps, vaddps, vaddps, dst, a, b, true)
    }

    fn vsub(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, subps, vsubps, vsubps, dst, a, b, false)
    }

    fn vmul(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, mulps, vmulps, vmulps, dst, a, b, true)
    }

    fn vdiv(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, divps, vdivps, vdivps, dst, a, b, false)
    }

    // max/min are not commutative for NaN operands.
    fn vmax(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, maxps, vmaxps, vmaxps, dst, a, b, false)
    }

    fn vmin(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, minps, vminps, vminps, dst, a, b, false)
    }

    fn vsqrt(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        emit_unop!(self, sqrtps, vsqrtps, dst, a)
    }

    fn vfloor(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        // imm 1 = round toward -inf
        match self.width {
            VectorWidth::Narrow => self.asm.roundps(xmm_reg(dst.0)?, xmm_reg(a.0)?, 1i32),
            VectorWidth::Medium => self.asm.vroundps(ymm_reg(dst.0)?, ymm_reg(a.0)?, 1i32),
            VectorWidth::Wide => self.asm.vrndscaleps(zmm_reg(dst.0)?, zmm_reg(a.0)?, 1i32),
        }
        .map_err(|e| e.to_string())
    }

    fn vfmadd213(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        match self.width {
            VectorWidth::Narrow => {
                self.vmul(dst, dst, Src::Reg(a))?;
                self.vadd(dst, dst, b)
            }
            VectorWidth::Medium => {
                let (d, a) = (ymm_reg(dst.0)?, ymm_reg(a.0)?);
                match self.opnd(b) {
                    Opnd::Reg(r) => self.asm.vfmadd213ps(d, a, ymm_reg(r)?),
                    Opnd::Mem(m) => self.asm.vfmadd213ps(d, a, m),
                }
                .map_err(|e| e.to_string())
            }
            VectorWidth::Wide => {
                let (d, a) = (zmm_reg(dst.0)?, zmm_reg(a.0)?);
                match self.opnd(b) {
                    Opnd::Reg(r) => self.asm.vfmadd213ps(d, a, zmm_reg(r)?),
                    Opnd::Mem(m) => self.asm.vfmadd213ps(d, a, m),
                }
                .map_err(|e| e.to_string())
            }
        }
    }

    fn vfnmadd231(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        match self.width {
            VectorWidth::Narrow => {
                if a == dst {
                    return Err("sse: vfnmadd231 needs distinct dst and multiplicand".into());
                }
                self.vmul(a, a, b)?;
                self.vsub(dst, dst, Src::Reg(a))
            }
            VectorWidth::Medium => {
                let (d, a) = (ymm_reg(dst.0)?, ymm_reg(a.0)?);
                match self.opnd(b) {
                    Opnd::Reg(r) => self.asm.vfnmadd231ps(d, a, ymm_reg(r)?),
                    Opnd::Mem(m) => self.asm.vfnmadd231ps(d, a, m),
                }
                .map_err(|e| e.to_string())
            }
            VectorWidth::Wide => {
                let (d, a) = (zmm_reg(dst.0)?, zmm_reg(a.0)?);
                match self.opnd(b) {
                    Opnd::Reg(r) => self.asm.vfnmadd231ps(d, a, zmm_reg(r)?),
                    Opnd::Mem(m) => self.asm.vfnmadd231ps(d, a, m),
                }
                .map_err(|e| e.to_string())
            }
        }
    }

    fn vand(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, andps, vandps, vpandd, dst, a, b, true)
    }

    fn vor(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, orps, vorps, vpord, dst, a, b, true)
    }

    fn vxor(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, xorps, vxorps, vpxord, dst, a, b, true)
    }

    fn vadd_i32(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String> {
        emit_binop!(self, paddd, vpaddd, vpaddd, dst, a, b, true)
    }

    fn vshl_i32(&mut self, dst: VReg, a: VReg, imm: u8) -> Result<(), String> {
        emit_shift!(self, pslld, vpslld, dst, a, imm)
    }

    fn vshr_i32(&mut self, dst: VReg, a: VReg, imm: u8) -> Result<(), String> {
        emit_shift!(self, psrld, vpsrld, dst, a, imm)
    }

    fn vcvt_f32_i32(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        emit_unop!(self, cvttps2dq, vcvttps2dq, dst, a)
    }

    fn vcvt_i32_f32(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        emit_unop!(self, cvtdq2ps, vcvtdq2ps, dst, a)
    }

    fn vcmp(&mut self, pred: Pred, a: VReg, b: Src, cmp: CmpPredicate) -> Result<(), String> {
        let imm = cmp as i32;
        match self.width {
            VectorWidth::Narrow => {
                let m = self.vec_pred(pred)?;
                let b = self.narrow_tie(m, a, b, false)?;
                let d = xmm_reg(m.0)?;
                match self.opnd(b) {
                    Opnd::Reg(r) => self.asm.cmpps(d, xmm_reg(r)?, imm),
                    Opnd::Mem(mem) => self.asm.cmpps(d, mem, imm),
                }
            }
            VectorWidth::Medium => {
                let (d, a) = (ymm_reg(self.vec_pred(pred)?.0)?, ymm_reg(a.0)?);
                match self.opnd(b) {
                    Opnd::Reg(r) => self.asm.vcmpps(d, a, ymm_reg(r)?, imm),
                    Opnd::Mem(mem) => self.asm.vcmpps(d, a, mem, imm),
                }
            }
            VectorWidth::Wide => {
                let (k, a) = (k_reg(self.k_pred(pred)?)?, zmm_reg(a.0)?);
                match self.opnd(b) {
                    Opnd::Reg(r) => self.asm.vcmpps(k, a, zmm_reg(r)?, imm),
                    Opnd::Mem(mem) => self.asm.vcmpps(k, a, mem, imm),
                }
            }
        }
        .map_err(|e| e.to_string())
    }

    fn vpred_from_sign(&mut self, pred: Pred, a: VReg) -> Result<(), String> {
        match self.width {
            // blendv selects on the lane sign bit
            VectorWidth::Narrow | VectorWidth::Medium => {
                let m = self.vec_pred(pred)?;
                self.mov_reg(m, a)
            }
            VectorWidth::Wide => {
                let k = k_reg(self.k_pred(pred)?)?;
                let a = zmm_reg(a.0)?;
                self.asm.vptestmd(k, a, a).map_err(|e| e.to_string())
            }
        }
    }

    fn vselect(&mut self, dst: VReg, pred: Pred, if_true: Src, if_false: VReg) -> Result<(), String> {
        match self.width {
            VectorWidth::Narrow => {
                let m = self.vec_pred(pred)?;
                if m != VReg(0) {
                    return Err(format!("sse: blend mask must be xmm0, got xmm{}", m.0));
                }
                if dst != if_false {
                    if dst == m || if_true == Src::Reg(dst) {
                        return Err(format!("sse: select into xmm{} would clobber an input", dst.0));
                    }
                    self.mov_reg(dst, if_false)?;
                }
                let d = xmm_reg(dst.0)?;
                match self.opnd(if_true) {
                    Opnd::Reg(r) => self.asm.blendvps(d, xmm_reg(r)?),
                    Opnd::Mem(mem) => self.asm.blendvps(d, mem),
                }
                .map_err(|e| e.to_string())
            }
            VectorWidth::Medium => {
                let m = ymm_reg(self.vec_pred(pred)?.0)?;
                let (d, f) = (ymm_reg(dst.0)?, ymm_reg(if_false.0)?);
                match self.opnd(if_true) {
                    Opnd::Reg(r) => self.asm.vblendvps(d, f, ymm_reg(r)?, m),
                    Opnd::Mem(mem) => self.asm.vblendvps(d, f, mem, m),
                }
                .map_err(|e| e.to_string())
            }
            VectorWidth::Wide => {
                let k = self.k_pred(pred)?;
                let d = zmm_masked(zmm_reg(dst.0)?, k)?;
                let f = zmm_reg(if_false.0)?;
                match self.opnd(if_true) {
                    Opnd::Reg(r) => self.asm.vblendmps(d, f, zmm_reg(r)?),
                    Opnd::Mem(mem) => self.asm.vblendmps(d, f, mem),
                }
                .map_err(|e| e.to_string())
            }
        }
    }

    fn branch_if_none(&mut self, pred: Pred, label: Label) -> Result<(), String> {
        let target = self.code_label(label)?;
        match self.width {
            VectorWidth::Narrow => {
                let m = xmm_reg(self.vec_pred(pred)?.0)?;
                self.asm.ptest(m, m)
            }
            VectorWidth::Medium => {
                let m = ymm_reg(self.vec_pred(pred)?.0)?;
                self.asm.vtestps(m, m)
            }
            VectorWidth::Wide => {
                let k = k_reg(self.k_pred(pred)?)?;
                self.asm.kortestw(k, k)
            }
        }
        .map_err(|e| e.to_string())?;
        self.asm.jz(target).map_err(|e| e.to_string())
    }

    fn pred_store(&mut self, offset: i32, pred: Pred) -> Result<(), String> {
        match pred {
            Pred::Vec(m) => self.vstore_stack(offset, m),
            Pred::K(k) => self
                .asm
                .kmovw(word_ptr(rsp + offset), k_reg(k)?)
                .map_err(|e| e.to_string()),
        }
    }

    fn pred_load(&mut self, pred: Pred, offset: i32) -> Result<(), String> {
        match pred {
            Pred::Vec(m) => self.vmov(m, Src::Stack(offset)),
            Pred::K(k) => self
                .asm
                .kmovw(k_reg(k)?, word_ptr(rsp + offset))
                .map_err(|e| e.to_string()),
        }
    }

    fn stack_alloc(&mut self, bytes: u32) -> Result<(), String> {
        self.asm.sub(rsp, bytes as i32).map_err(|e| e.to_string())
    }

    fn stack_free(&mut self, bytes: u32) -> Result<(), String> {
        self.asm.add(rsp, bytes as i32).map_err(|e| e.to_string())
    }

    fn load_table_base(&mut self) -> Result<(), String> {
        self.asm.lea(rax, ptr(self.table_label)).map_err(|e| e.to_string())
    }

    fn push_table_base(&mut self) -> Result<(), String> {
        self.asm.push(rax).map_err(|e| e.to_string())
    }

    fn pop_table_base(&mut self) -> Result<(), String> {
        self.asm.pop(rax).map_err(|e| e.to_string())
    }

    fn alloc_label(&mut self) -> Label {
        let l = self.asm.create_label();
        self.labels.push(l);
        Label((self.labels.len() - 1) as u32)
    }

    fn define_label(&mut self, label: Label) -> Result<(), String> {
        let mut l = self.code_label(label)?;
        self.asm.set_label(&mut l).map_err(|e| e.to_string())?;
        self.labels[label.0 as usize] = l;
        Ok(())
    }
}

//! SimdOps trait — width-agnostic vector instruction set for transform codegen.
//!
//! The transform formulas (`math_approx.rs`, `injector.rs`) are written once
//! against `SimdOps`; the x86 backend lowers every method for the narrow,
//! medium and wide vector classes.
//!
//! Key design decisions:
//! - `VReg(u8)` is the physical register index within the class (`xmmN`,
//!   `ymmN`, `zmmN`); the injector decides which indices it may touch.
//! - Second operands are `Src`: a register, a lane-replicated constant table
//!   entry, or a stack slot. Formulas never materialize constants themselves.
//! - Predicates are `Pred`: a vector mask on narrow/medium, an opmask on wide.
//! - All methods return `Result<(), String>` for uniform error handling.

use crate::dispatch::VectorWidth;

// ── Operand model ───────────────────────────────────────────────────────────

/// Vector register index within the target's register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u8);

/// Second source operand of a vector instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Reg(VReg),
    /// Entry `i` of the constant table (addressed through the table base).
    Table(usize),
    /// Vector-sized slot at `rsp + offset`.
    Stack(i32),
}

impl From<VReg> for Src {
    fn from(r: VReg) -> Self {
        Src::Reg(r)
    }
}

/// Lane predicate produced by compares and consumed by selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pred {
    /// All-ones / all-zeros lanes in a vector register (narrow, medium).
    Vec(VReg),
    /// Opmask register `k1..k7` (wide).
    K(u8),
}

/// Compare predicates (the `cmpps` immediate encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmpPredicate {
    /// a < b (ordered)
    Lt = 1,
    /// a <= b (ordered)
    Le = 2,
    /// either operand is NaN
    Unord = 3,
    /// !(a < b); true on NaN
    Nlt = 5,
    /// !(a <= b); true on NaN
    Nle = 6,
}

/// Label for branch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

// ── SimdOps trait ───────────────────────────────────────────────────────────

/// Width-agnostic vector instruction interface.
///
/// Three-operand methods follow `dst = a op b`. On the narrow class the
/// backend ties `dst` to `a` with a register move when they differ; it fails
/// rather than silently reordering when `b` aliases `dst` for a
/// non-commutative operation.
pub trait SimdOps {
    /// Vector class the code is generated for.
    fn width(&self) -> VectorWidth;

    // ── Moves ───────────────────────────────────────────────────────────

    /// dst = src
    fn vmov(&mut self, dst: VReg, src: Src) -> Result<(), String>;
    /// [rsp + offset] = src
    fn vstore_stack(&mut self, offset: i32, src: VReg) -> Result<(), String>;
    /// dst = 0
    fn vzero(&mut self, dst: VReg) -> Result<(), String>;

    // ── Float arithmetic ────────────────────────────────────────────────

    /// dst = a + b
    fn vadd(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = a - b
    fn vsub(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = a * b
    fn vmul(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = a / b
    fn vdiv(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = max(a, b)  (returns b when either is NaN)
    fn vmax(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = min(a, b)  (returns b when either is NaN)
    fn vmin(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = sqrt(a)
    fn vsqrt(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = floor(a)
    fn vfloor(&mut self, dst: VReg, a: VReg) -> Result<(), String>;

    // ── FMA variants for Horner polynomial evaluation ───────────────────

    /// dst = dst * a + b  (single rounding where the class has FMA)
    fn vfmadd213(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = dst - a * b. Without FMA `a` is clobbered.
    fn vfnmadd231(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;

    // ── Bitwise / integer operations ────────────────────────────────────

    /// dst = a & b
    fn vand(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = a | b
    fn vor(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = a ^ b
    fn vxor(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = a + b  (32-bit integer lanes)
    fn vadd_i32(&mut self, dst: VReg, a: VReg, b: Src) -> Result<(), String>;
    /// dst = a << imm  (logical, 32-bit lanes)
    fn vshl_i32(&mut self, dst: VReg, a: VReg, imm: u8) -> Result<(), String>;
    /// dst = a >> imm  (logical, 32-bit lanes)
    fn vshr_i32(&mut self, dst: VReg, a: VReg, imm: u8) -> Result<(), String>;
    /// dst = i32(a)  (truncating)
    fn vcvt_f32_i32(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = f32(a)
    fn vcvt_i32_f32(&mut self, dst: VReg, a: VReg) -> Result<(), String>;

    // ── Predicates ──────────────────────────────────────────────────────

    /// pred = a <cmp> b
    fn vcmp(&mut self, pred: Pred, a: VReg, b: Src, cmp: CmpPredicate) -> Result<(), String>;
    /// pred = lanes of `a` that are non-zero. `a` must hold isolated sign
    /// bits (each lane `0` or `0x80000000`).
    fn vpred_from_sign(&mut self, pred: Pred, a: VReg) -> Result<(), String>;
    /// dst = pred ? if_true : if_false
    fn vselect(&mut self, dst: VReg, pred: Pred, if_true: Src, if_false: VReg) -> Result<(), String>;
    /// Jump to `label` when no lane of `pred` is set.
    fn branch_if_none(&mut self, pred: Pred, label: Label) -> Result<(), String>;
    /// Spill a predicate to `[rsp + offset]`.
    fn pred_store(&mut self, offset: i32, pred: Pred) -> Result<(), String>;
    /// Reload a predicate from `[rsp + offset]`.
    fn pred_load(&mut self, pred: Pred, offset: i32) -> Result<(), String>;

    // ── Stack and table base ────────────────────────────────────────────

    /// rsp -= bytes
    fn stack_alloc(&mut self, bytes: u32) -> Result<(), String>;
    /// rsp += bytes
    fn stack_free(&mut self, bytes: u32) -> Result<(), String>;
    /// Load the constant table address into the table base register.
    fn load_table_base(&mut self) -> Result<(), String>;
    /// Save the caller's table base register on the stack.
    fn push_table_base(&mut self) -> Result<(), String>;
    /// Restore the caller's table base register.
    fn pop_table_base(&mut self) -> Result<(), String>;

    // ── Labels ──────────────────────────────────────────────────────────

    /// Allocate a new label (returns unique label ID).
    fn alloc_label(&mut self) -> Label;
    /// Define a label at the current code position.
    fn define_label(&mut self, label: Label) -> Result<(), String>;
}

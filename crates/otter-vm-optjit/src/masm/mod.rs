//! Macro assembler for the optimizing tier.
//!
//! Emits into a flat instruction stream over a small virtual ISA. Branches
//! are created unresolved and handed back as [`Jump`] handles; the caller
//! resolves them by linking to the current position or to a [`Label`].
//!
//! ```text
//!   let ok = masm.branch64(Equal, reg, imm)   // target unknown
//!   masm.abort_with_reason(..)
//!   ok.link(&mut masm)                         // target = here
//! ```
//!
//! Positions are instruction indices. An assembler may be created with a
//! non-zero origin so that code built for a patch region can refer to
//! positions in the enclosing code.

pub mod regs;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

use smallvec::SmallVec;

pub use regs::{Fpr, Gpr};

use crate::abort::AbortReason;
use crate::ic::{CallSiteIndex, SlowPathOperation, StackMapId};

/// Memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mem {
    /// `[base + offset]`
    Base {
        /// Base register.
        base: Gpr,
        /// Byte displacement.
        offset: i32,
    },
    /// Absolute address.
    Absolute(u64),
}

impl Mem {
    /// `[base + offset]`
    pub const fn base(base: Gpr, offset: i32) -> Self {
        Self::Base { base, offset }
    }

    /// `[address]`
    pub const fn absolute(address: u64) -> Self {
        Self::Absolute(address)
    }

    /// Same operand displaced by `delta` bytes.
    pub const fn offset_by(self, delta: i32) -> Self {
        match self {
            Self::Base { base, offset } => Self::Base {
                base,
                offset: offset.wrapping_add(delta),
            },
            Self::Absolute(address) => Self::Absolute(address.wrapping_add(delta as i64 as u64)),
        }
    }
}

/// Source operand of a comparison or test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Register contents.
    Reg(Gpr),
    /// Immediate.
    Imm(u64),
    /// Memory contents (width taken from the instruction).
    Mem(Mem),
}

impl From<Gpr> for Operand {
    fn from(value: Gpr) -> Self {
        Self::Reg(value)
    }
}

impl From<Mem> for Operand {
    fn from(value: Mem) -> Self {
        Self::Mem(value)
    }
}

/// Integer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationalCondition {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// Unsigned `>`.
    Above,
    /// Unsigned `>=`.
    AboveOrEqual,
    /// Unsigned `<`.
    Below,
    /// Unsigned `<=`.
    BelowOrEqual,
    /// Signed `>`.
    GreaterThan,
    /// Signed `>=`.
    GreaterThanOrEqual,
    /// Signed `<`.
    LessThan,
    /// Signed `<=`.
    LessThanOrEqual,
}

impl RelationalCondition {
    /// Evaluate on 64-bit operands.
    pub fn eval64(self, lhs: u64, rhs: u64) -> bool {
        match self {
            Self::Equal => lhs == rhs,
            Self::NotEqual => lhs != rhs,
            Self::Above => lhs > rhs,
            Self::AboveOrEqual => lhs >= rhs,
            Self::Below => lhs < rhs,
            Self::BelowOrEqual => lhs <= rhs,
            Self::GreaterThan => (lhs as i64) > (rhs as i64),
            Self::GreaterThanOrEqual => (lhs as i64) >= (rhs as i64),
            Self::LessThan => (lhs as i64) < (rhs as i64),
            Self::LessThanOrEqual => (lhs as i64) <= (rhs as i64),
        }
    }

    /// Evaluate on the low 32 bits of both operands.
    pub fn eval32(self, lhs: u64, rhs: u64) -> bool {
        let (l, r) = (lhs as u32, rhs as u32);
        match self {
            Self::GreaterThan => (l as i32) > (r as i32),
            Self::GreaterThanOrEqual => (l as i32) >= (r as i32),
            Self::LessThan => (l as i32) < (r as i32),
            Self::LessThanOrEqual => (l as i32) <= (r as i32),
            unsigned => unsigned.eval64(u64::from(l), u64::from(r)),
        }
    }

    /// Logical negation.
    pub fn invert(self) -> Self {
        match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::Above => Self::BelowOrEqual,
            Self::AboveOrEqual => Self::Below,
            Self::Below => Self::AboveOrEqual,
            Self::BelowOrEqual => Self::Above,
            Self::GreaterThan => Self::LessThanOrEqual,
            Self::GreaterThanOrEqual => Self::LessThan,
            Self::LessThan => Self::GreaterThanOrEqual,
            Self::LessThanOrEqual => Self::GreaterThan,
        }
    }
}

/// Outcome of `value & mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCondition {
    /// No masked bit set.
    Zero,
    /// Some masked bit set.
    NonZero,
}

impl ResultCondition {
    /// Evaluate on an already-masked value.
    pub fn eval(self, masked: u64) -> bool {
        match self {
            Self::Zero => masked == 0,
            Self::NonZero => masked != 0,
        }
    }

    /// Logical negation.
    pub fn invert(self) -> Self {
        match self {
            Self::Zero => Self::NonZero,
            Self::NonZero => Self::Zero,
        }
    }
}

/// Double comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoubleCondition {
    /// Ordered and equal; false if either side is NaN.
    Equal,
    /// Unordered or not equal.
    NotEqualOrUnordered,
}

impl DoubleCondition {
    /// Evaluate on two doubles.
    pub fn eval(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Equal => lhs == rhs,
            Self::NotEqualOrUnordered => lhs != rhs,
        }
    }
}

/// A position in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(usize);

impl Label {
    /// Label at an absolute instruction index.
    pub const fn at(position: usize) -> Self {
        Self(position)
    }

    /// Instruction index this label designates.
    pub const fn position(self) -> usize {
        self.0
    }
}

/// A contiguous range of instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeRegion {
    /// First instruction.
    pub start: usize,
    /// Number of instructions.
    pub len: usize,
}

impl CodeRegion {
    /// One past the last instruction.
    pub const fn end(&self) -> usize {
        self.start + self.len
    }
}

/// One virtual-ISA instruction.
///
/// Branch targets are `None` until linked.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    /// No operation.
    Nop,
    /// `dst = src`
    Move { dst: Gpr, src: Gpr },
    /// `dst = imm`
    MoveImm { dst: Gpr, imm: u64 },
    /// `dst = f64::from_bits(bits)`
    MoveDoubleBits { dst: Fpr, bits: u64 },
    /// 64-bit load.
    Load64 { dst: Gpr, src: Mem },
    /// Zero-extending 32-bit load.
    Load32 { dst: Gpr, src: Mem },
    /// Zero-extending 8-bit load.
    Load8 { dst: Gpr, src: Mem },
    /// 64-bit store.
    Store64 { src: Gpr, dst: Mem },
    /// Store of the low 32 bits.
    Store32 { src: Gpr, dst: Mem },
    /// 64-bit immediate store.
    Store64Imm { imm: u64, dst: Mem },
    /// 32-bit immediate store.
    Store32Imm { imm: u32, dst: Mem },
    /// Double load.
    LoadDouble { dst: Fpr, src: Mem },
    /// Double store.
    StoreDouble { src: Fpr, dst: Mem },
    /// `dst &= imm`
    And64Imm { dst: Gpr, imm: u64 },
    /// `dst ^= imm`
    Xor64Imm { dst: Gpr, imm: u64 },
    /// `dst = zext32(dst | imm)`
    Or32Imm { dst: Gpr, imm: u32 },
    /// `dst = zext32(src + imm)`
    Add32Imm { dst: Gpr, src: Gpr, imm: u32 },
    /// Compare 64-bit operands and branch.
    Branch64 {
        cond: RelationalCondition,
        lhs: Operand,
        rhs: Operand,
        target: Option<Label>,
    },
    /// Compare 32-bit operands and branch.
    Branch32 {
        cond: RelationalCondition,
        lhs: Operand,
        rhs: Operand,
        target: Option<Label>,
    },
    /// Compare a byte in memory with an immediate and branch.
    Branch8 {
        cond: RelationalCondition,
        lhs: Mem,
        imm: u8,
        target: Option<Label>,
    },
    /// Branch on `value & mask` (64-bit).
    BranchTest64 {
        cond: ResultCondition,
        value: Operand,
        mask: Operand,
        target: Option<Label>,
    },
    /// Branch on `value & mask` (32-bit).
    BranchTest32 {
        cond: ResultCondition,
        value: Operand,
        mask: Operand,
        target: Option<Label>,
    },
    /// Compare two doubles and branch.
    BranchDouble {
        cond: DoubleCondition,
        lhs: Fpr,
        rhs: Fpr,
        target: Option<Label>,
    },
    /// Unconditional branch.
    Jump { target: Option<Label> },
    /// Unconditional branch with a fixed-width encoding that may be
    /// retargeted after code is installed.
    PatchableJump { target: Option<Label> },
    /// Indirect call to the address held in `target`.
    Call { target: Gpr },
    /// Call into the runtime's slow path for an inline cache site.
    CallSlowPath {
        operation: SlowPathOperation,
        stack_map: StackMapId,
        call_site: CallSiteIndex,
    },
    /// Crash with a diagnosable reason.
    Abort(AbortReason),
    /// Debugger trap.
    Breakpoint,
    /// Return to caller.
    Ret,
}

impl Inst {
    /// Branch target slot, if this is a branch.
    pub fn target(&self) -> Option<Option<Label>> {
        match self {
            Self::Branch64 { target, .. }
            | Self::Branch32 { target, .. }
            | Self::Branch8 { target, .. }
            | Self::BranchTest64 { target, .. }
            | Self::BranchTest32 { target, .. }
            | Self::BranchDouble { target, .. }
            | Self::Jump { target }
            | Self::PatchableJump { target } => Some(*target),
            _ => None,
        }
    }

    fn target_mut(&mut self) -> Option<&mut Option<Label>> {
        match self {
            Self::Branch64 { target, .. }
            | Self::Branch32 { target, .. }
            | Self::Branch8 { target, .. }
            | Self::BranchTest64 { target, .. }
            | Self::BranchTest32 { target, .. }
            | Self::BranchDouble { target, .. }
            | Self::Jump { target }
            | Self::PatchableJump { target } => Some(target),
            _ => None,
        }
    }

    /// Point this branch at `label`. Returns `false` for non-branches.
    pub fn set_target(&mut self, label: Label) -> bool {
        match self.target_mut() {
            Some(slot) => {
                *slot = Some(label);
                true
            }
            None => false,
        }
    }

    /// Whether this is a branch that is always taken.
    pub fn is_unconditional(&self) -> bool {
        matches!(self, Self::Jump { .. } | Self::PatchableJump { .. })
    }

    /// Whether this is a branch whose target is still unknown.
    pub fn is_unlinked_branch(&self) -> bool {
        matches!(self.target(), Some(None))
    }
}

/// Handle to an emitted branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "an unlinked jump leaves the branch without a target"]
pub struct Jump(usize);

impl Jump {
    /// Handle to the branch at an absolute instruction index.
    pub const fn at(position: usize) -> Self {
        Self(position)
    }

    /// Instruction index of the branch.
    pub const fn position(self) -> usize {
        self.0
    }

    /// Resolve to the assembler's current position.
    pub fn link(self, masm: &mut MacroAssembler) {
        let here = masm.label();
        masm.link_jump(self, here);
    }

    /// Resolve to `label`.
    pub fn link_to(self, masm: &mut MacroAssembler, label: Label) {
        masm.link_jump(self, label);
    }
}

/// Handle to a fixed-width jump stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "an unlinked jump leaves the branch without a target"]
pub struct PatchableJump(Jump);

impl PatchableJump {
    /// The underlying branch.
    pub const fn jump(self) -> Jump {
        self.0
    }
}

/// Ordered collection of branches sharing one destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "an unlinked jump list leaves branches without a target"]
pub struct JumpList(SmallVec<[Jump; 2]>);

impl JumpList {
    /// Empty list.
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    /// Append one branch.
    pub fn push(&mut self, jump: Jump) {
        self.0.push(jump);
    }

    /// Append every branch of `other`, preserving order.
    pub fn append(&mut self, other: JumpList) {
        self.0.extend(other.0);
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list holds no branch.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Branches in emission order.
    pub fn iter(&self) -> impl Iterator<Item = Jump> + '_ {
        self.0.iter().copied()
    }

    /// Resolve every branch to the current position.
    pub fn link(self, masm: &mut MacroAssembler) {
        let here = masm.label();
        self.link_to(masm, here);
    }

    /// Resolve every branch to `label`.
    pub fn link_to(self, masm: &mut MacroAssembler, label: Label) {
        for jump in self.0 {
            jump.link_to(masm, label);
        }
    }
}

impl From<Jump> for JumpList {
    fn from(jump: Jump) -> Self {
        let mut list = Self::new();
        list.push(jump);
        list
    }
}

impl IntoIterator for JumpList {
    type Item = Jump;
    type IntoIter = smallvec::IntoIter<[Jump; 2]>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Instruction stream under construction.
#[derive(Debug, Clone, Default)]
pub struct MacroAssembler {
    origin: usize,
    insts: Vec<Inst>,
}

impl MacroAssembler {
    /// Empty assembler starting at position 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty assembler whose first instruction will sit at `origin`.
    pub fn with_origin(origin: usize) -> Self {
        Self {
            origin,
            insts: Vec::new(),
        }
    }

    /// Position of the first instruction.
    pub fn origin(&self) -> usize {
        self.origin
    }

    /// Number of emitted instructions.
    pub fn code_len(&self) -> usize {
        self.insts.len()
    }

    /// Current position.
    pub fn label(&self) -> Label {
        Label(self.origin + self.insts.len())
    }

    /// Emitted instructions.
    pub fn instructions(&self) -> &[Inst] {
        &self.insts
    }

    /// Instruction at an absolute position, if it was emitted here.
    pub fn instruction(&self, position: usize) -> Option<&Inst> {
        position
            .checked_sub(self.origin)
            .and_then(|index| self.insts.get(index))
    }

    /// Take the instruction stream.
    pub fn into_instructions(self) -> Vec<Inst> {
        self.insts
    }

    /// Branches whose target is still unknown, in emission order.
    pub fn unlinked_jumps(&self) -> impl Iterator<Item = Jump> + '_ {
        self.insts
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.is_unlinked_branch())
            .map(|(index, _)| Jump(self.origin + index))
    }

    /// Point `jump` at `label`.
    pub fn link_jump(&mut self, jump: Jump, label: Label) {
        let linked = jump
            .0
            .checked_sub(self.origin)
            .and_then(|index| self.insts.get_mut(index))
            .is_some_and(|inst| inst.set_target(label));
        debug_assert!(linked, "jump at {} is not a branch of this assembler", jump.0);
    }

    fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    fn emit_branch(&mut self, inst: Inst) -> Jump {
        let jump = Jump(self.origin + self.insts.len());
        self.insts.push(inst);
        jump
    }

    /// `nop`
    pub fn nop(&mut self) {
        self.emit(Inst::Nop);
    }

    /// `dst = src`
    pub fn move_reg(&mut self, src: Gpr, dst: Gpr) {
        self.emit(Inst::Move { dst, src });
    }

    /// `dst = imm`
    pub fn move_imm(&mut self, imm: u64, dst: Gpr) {
        self.emit(Inst::MoveImm { dst, imm });
    }

    /// `dst = f64::from_bits(bits)`
    pub fn move_double_bits(&mut self, bits: u64, dst: Fpr) {
        self.emit(Inst::MoveDoubleBits { dst, bits });
    }

    /// 64-bit load.
    pub fn load64(&mut self, src: Mem, dst: Gpr) {
        self.emit(Inst::Load64 { dst, src });
    }

    /// Zero-extending 32-bit load.
    pub fn load32(&mut self, src: Mem, dst: Gpr) {
        self.emit(Inst::Load32 { dst, src });
    }

    /// Zero-extending 8-bit load.
    pub fn load8(&mut self, src: Mem, dst: Gpr) {
        self.emit(Inst::Load8 { dst, src });
    }

    /// 64-bit store.
    pub fn store64(&mut self, src: Gpr, dst: Mem) {
        self.emit(Inst::Store64 { src, dst });
    }

    /// Store of the low 32 bits of `src`.
    pub fn store32(&mut self, src: Gpr, dst: Mem) {
        self.emit(Inst::Store32 { src, dst });
    }

    /// 64-bit immediate store.
    pub fn store64_imm(&mut self, imm: u64, dst: Mem) {
        self.emit(Inst::Store64Imm { imm, dst });
    }

    /// 32-bit immediate store.
    pub fn store32_imm(&mut self, imm: u32, dst: Mem) {
        self.emit(Inst::Store32Imm { imm, dst });
    }

    /// Double load.
    pub fn load_double(&mut self, src: Mem, dst: Fpr) {
        self.emit(Inst::LoadDouble { dst, src });
    }

    /// Double store.
    pub fn store_double(&mut self, src: Fpr, dst: Mem) {
        self.emit(Inst::StoreDouble { src, dst });
    }

    /// `dst &= imm`
    pub fn and64_imm(&mut self, imm: u64, dst: Gpr) {
        self.emit(Inst::And64Imm { dst, imm });
    }

    /// `dst ^= imm`
    pub fn xor64_imm(&mut self, imm: u64, dst: Gpr) {
        self.emit(Inst::Xor64Imm { dst, imm });
    }

    /// `dst = zext32(dst | imm)`
    pub fn or32_imm(&mut self, imm: u32, dst: Gpr) {
        self.emit(Inst::Or32Imm { dst, imm });
    }

    /// `dst = zext32(src + imm)`
    pub fn add32_imm(&mut self, imm: u32, src: Gpr, dst: Gpr) {
        self.emit(Inst::Add32Imm { dst, src, imm });
    }

    /// Compare 64-bit operands and branch when `cond` holds.
    pub fn branch64(
        &mut self,
        cond: RelationalCondition,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Jump {
        self.emit_branch(Inst::Branch64 {
            cond,
            lhs: lhs.into(),
            rhs: rhs.into(),
            target: None,
        })
    }

    /// Compare 32-bit operands and branch when `cond` holds.
    pub fn branch32(
        &mut self,
        cond: RelationalCondition,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> Jump {
        self.emit_branch(Inst::Branch32 {
            cond,
            lhs: lhs.into(),
            rhs: rhs.into(),
            target: None,
        })
    }

    /// Compare a byte in memory and branch when `cond` holds.
    pub fn branch8(&mut self, cond: RelationalCondition, lhs: Mem, imm: u8) -> Jump {
        self.emit_branch(Inst::Branch8 {
            cond,
            lhs,
            imm,
            target: None,
        })
    }

    /// Branch on `value & mask` (64-bit).
    pub fn branch_test64(
        &mut self,
        cond: ResultCondition,
        value: impl Into<Operand>,
        mask: impl Into<Operand>,
    ) -> Jump {
        self.emit_branch(Inst::BranchTest64 {
            cond,
            value: value.into(),
            mask: mask.into(),
            target: None,
        })
    }

    /// Branch on `value & mask` (32-bit).
    pub fn branch_test32(
        &mut self,
        cond: ResultCondition,
        value: impl Into<Operand>,
        mask: impl Into<Operand>,
    ) -> Jump {
        self.emit_branch(Inst::BranchTest32 {
            cond,
            value: value.into(),
            mask: mask.into(),
            target: None,
        })
    }

    /// Compare two doubles and branch when `cond` holds.
    pub fn branch_double(&mut self, cond: DoubleCondition, lhs: Fpr, rhs: Fpr) -> Jump {
        self.emit_branch(Inst::BranchDouble {
            cond,
            lhs,
            rhs,
            target: None,
        })
    }

    /// Unconditional branch.
    pub fn jump(&mut self) -> Jump {
        self.emit_branch(Inst::Jump { target: None })
    }

    /// Unconditional branch that can be retargeted after installation.
    pub fn patchable_jump(&mut self) -> PatchableJump {
        PatchableJump(self.emit_branch(Inst::PatchableJump { target: None }))
    }

    /// Indirect call through `target`.
    pub fn call(&mut self, target: Gpr) {
        self.emit(Inst::Call { target });
    }

    /// Call the runtime slow path of an inline cache site.
    pub fn call_slow_path(
        &mut self,
        operation: SlowPathOperation,
        stack_map: StackMapId,
        call_site: CallSiteIndex,
    ) {
        self.emit(Inst::CallSlowPath {
            operation,
            stack_map,
            call_site,
        });
    }

    /// Crash with `reason`.
    pub fn abort_with_reason(&mut self, reason: AbortReason) {
        self.emit(Inst::Abort(reason));
    }

    /// Debugger trap.
    pub fn breakpoint(&mut self) {
        self.emit(Inst::Breakpoint);
    }

    /// Return to caller.
    pub fn ret(&mut self) {
        self.emit(Inst::Ret);
    }
}

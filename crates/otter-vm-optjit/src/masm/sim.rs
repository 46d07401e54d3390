//! Reference interpreter for the virtual ISA.
//!
//! Executes a finished instruction stream against a register file and a
//! sparse byte-addressed memory. Host functions can be installed at
//! addresses for `call`, and a single handler services `call_slow_path`.
//! Every executed position is recorded so tests can assert which branches
//! were reached.

use rustc_hash::FxHashMap;

use super::{Fpr, Gpr, Inst, Mem, Operand, RelationalCondition};
use crate::abort::AbortReason;
use crate::ic::{CallSiteIndex, SlowPathOperation, StackMapId};
use crate::lattice::StructureInfo;
use crate::value::{JsValue, ValueRegs};

/// Default bound on executed instructions per run.
pub const DEFAULT_STEP_LIMIT: usize = 100_000;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Reached `ret`.
    Returned,
    /// Reached `abort`.
    Aborted(AbortReason),
    /// Reached `breakpoint`.
    Breakpoint,
}

/// Faults of the simulator itself, as opposed to program exits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    /// A branch was reached before being linked.
    #[error("branch at {pc} has no target")]
    UnlinkedBranch { pc: usize },
    /// `call` through an address with no host function.
    #[error("call to {address:#x} with no host function installed")]
    UnknownCallTarget { address: u64 },
    /// `call_slow_path` with no handler installed.
    #[error("slow path called at {pc} with no handler installed")]
    MissingSlowPathHandler { pc: usize },
    /// The program did not exit in time.
    #[error("step limit of {limit} exceeded")]
    StepLimit { limit: usize },
    /// Control ran past the last instruction.
    #[error("control fell off the end of the code at {pc}")]
    FellOffEnd { pc: usize },
}

/// Arguments of a `call_slow_path` as seen by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowPathCall {
    /// Runtime operation requested.
    pub operation: SlowPathOperation,
    /// Stack map of the calling site.
    pub stack_map: StackMapId,
    /// Unwind context of the calling site.
    pub call_site: CallSiteIndex,
}

/// Registers and memory.
#[derive(Debug, Clone, Default)]
pub struct MachineState {
    gprs: [u64; Gpr::COUNT],
    fprs: [u64; Fpr::COUNT],
    memory: FxHashMap<u64, u8>,
}

impl MachineState {
    /// Zeroed registers, empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// GPR contents.
    pub fn gpr(&self, gpr: Gpr) -> u64 {
        self.gprs[gpr.index()]
    }

    /// Set a GPR.
    pub fn set_gpr(&mut self, gpr: Gpr, value: u64) {
        self.gprs[gpr.index()] = value;
    }

    /// FPR contents as raw bits.
    pub fn fpr_bits(&self, fpr: Fpr) -> u64 {
        self.fprs[fpr.index()]
    }

    /// FPR contents.
    pub fn fpr(&self, fpr: Fpr) -> f64 {
        f64::from_bits(self.fpr_bits(fpr))
    }

    /// Set an FPR from raw bits.
    pub fn set_fpr_bits(&mut self, fpr: Fpr, bits: u64) {
        self.fprs[fpr.index()] = bits;
    }

    /// Unwritten bytes read as zero.
    pub fn read8(&self, address: u64) -> u8 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    /// Little-endian 32-bit read.
    pub fn read32(&self, address: u64) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read8(address.wrapping_add(i as u64));
        }
        u32::from_le_bytes(bytes)
    }

    /// Little-endian 64-bit read.
    pub fn read64(&self, address: u64) -> u64 {
        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read8(address.wrapping_add(i as u64));
        }
        u64::from_le_bytes(bytes)
    }

    /// Write one byte.
    pub fn write8(&mut self, address: u64, value: u8) {
        self.memory.insert(address, value);
    }

    /// Little-endian 32-bit write.
    pub fn write32(&mut self, address: u64, value: u32) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write8(address.wrapping_add(i as u64), byte);
        }
    }

    /// Little-endian 64-bit write.
    pub fn write64(&mut self, address: u64, value: u64) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write8(address.wrapping_add(i as u64), byte);
        }
    }

    /// Place `value` in `regs` using the representation `regs` implies.
    pub fn set_value(&mut self, regs: ValueRegs, value: &JsValue) {
        match regs {
            ValueRegs::Packed(gpr) => self.set_gpr(gpr, value.encode_packed()),
            ValueRegs::Split { tag, payload } => {
                let (tag_word, payload_word) = value.encode_split();
                self.set_gpr(tag, u64::from(tag_word));
                self.set_gpr(payload, u64::from(payload_word));
            }
        }
    }

    /// Value in `regs` as a slot image (see [`JsValue::encode_slot`]).
    pub fn value_bits(&self, regs: ValueRegs) -> u64 {
        match regs {
            ValueRegs::Packed(gpr) => self.gpr(gpr),
            ValueRegs::Split { tag, payload } => {
                ((self.gpr(tag) & 0xFFFF_FFFF) << 32) | (self.gpr(payload) & 0xFFFF_FFFF)
            }
        }
    }

    /// Write a full cell header at `address`.
    pub fn write_cell_header(&mut self, address: u64, info: &StructureInfo) {
        self.write64(address, info.id_blob());
    }

    fn address(&self, mem: Mem) -> u64 {
        match mem {
            Mem::Base { base, offset } => self.gpr(base).wrapping_add(offset as i64 as u64),
            Mem::Absolute(address) => address,
        }
    }

    fn operand64(&self, operand: Operand) -> u64 {
        match operand {
            Operand::Reg(gpr) => self.gpr(gpr),
            Operand::Imm(imm) => imm,
            Operand::Mem(mem) => self.read64(self.address(mem)),
        }
    }

    fn operand32(&self, operand: Operand) -> u64 {
        match operand {
            Operand::Mem(mem) => u64::from(self.read32(self.address(mem))),
            other => self.operand64(other) & 0xFFFF_FFFF,
        }
    }
}

type HostFn = Box<dyn FnMut(&mut MachineState)>;
type SlowPathFn = Box<dyn FnMut(&mut MachineState, SlowPathCall)>;

/// Simulator.
pub struct Machine {
    /// Registers and memory, readable and writable between runs.
    pub state: MachineState,
    hosts: FxHashMap<u64, HostFn>,
    slow_path: Option<SlowPathFn>,
    step_limit: usize,
    trace: Vec<usize>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// Fresh machine with the default step limit.
    pub fn new() -> Self {
        Self {
            state: MachineState::new(),
            hosts: FxHashMap::default(),
            slow_path: None,
            step_limit: DEFAULT_STEP_LIMIT,
            trace: Vec::new(),
        }
    }

    /// Install `host` as the function called at `address`.
    pub fn install_host(&mut self, address: u64, host: impl FnMut(&mut MachineState) + 'static) {
        self.hosts.insert(address, Box::new(host));
    }

    /// Install the slow-path handler.
    pub fn on_slow_path(&mut self, handler: impl FnMut(&mut MachineState, SlowPathCall) + 'static) {
        self.slow_path = Some(Box::new(handler));
    }

    /// Change the step limit.
    pub fn set_step_limit(&mut self, limit: usize) {
        self.step_limit = limit;
    }

    /// Positions executed by the last run, in order.
    pub fn trace(&self) -> &[usize] {
        &self.trace
    }

    /// Whether the last run executed `position`.
    pub fn executed(&self, position: usize) -> bool {
        self.trace.contains(&position)
    }

    /// Run `code` from `entry` until it exits.
    pub fn run(&mut self, code: &[Inst], entry: usize) -> Result<Exit, SimError> {
        self.trace.clear();
        let mut pc = entry;
        for _ in 0..self.step_limit {
            let inst = code.get(pc).ok_or(SimError::FellOffEnd { pc })?;
            self.trace.push(pc);
            let mut next = pc + 1;
            let state = &mut self.state;
            let mut taken = |target: Option<super::Label>, cond: bool| -> Result<(), SimError> {
                let target = target.ok_or(SimError::UnlinkedBranch { pc })?;
                if cond {
                    next = target.position();
                }
                Ok(())
            };

            match *inst {
                Inst::Nop => {}
                Inst::Move { dst, src } => state.set_gpr(dst, state.gpr(src)),
                Inst::MoveImm { dst, imm } => state.set_gpr(dst, imm),
                Inst::MoveDoubleBits { dst, bits } => state.set_fpr_bits(dst, bits),
                Inst::Load64 { dst, src } => state.set_gpr(dst, state.read64(state.address(src))),
                Inst::Load32 { dst, src } => {
                    state.set_gpr(dst, u64::from(state.read32(state.address(src))))
                }
                Inst::Load8 { dst, src } => {
                    state.set_gpr(dst, u64::from(state.read8(state.address(src))))
                }
                Inst::Store64 { src, dst } => state.write64(state.address(dst), state.gpr(src)),
                Inst::Store32 { src, dst } => {
                    state.write32(state.address(dst), state.gpr(src) as u32)
                }
                Inst::Store64Imm { imm, dst } => state.write64(state.address(dst), imm),
                Inst::Store32Imm { imm, dst } => state.write32(state.address(dst), imm),
                Inst::LoadDouble { dst, src } => {
                    state.set_fpr_bits(dst, state.read64(state.address(src)))
                }
                Inst::StoreDouble { src, dst } => {
                    state.write64(state.address(dst), state.fpr_bits(src))
                }
                Inst::And64Imm { dst, imm } => state.set_gpr(dst, state.gpr(dst) & imm),
                Inst::Xor64Imm { dst, imm } => state.set_gpr(dst, state.gpr(dst) ^ imm),
                Inst::Or32Imm { dst, imm } => {
                    state.set_gpr(dst, u64::from(state.gpr(dst) as u32 | imm))
                }
                Inst::Add32Imm { dst, src, imm } => {
                    state.set_gpr(dst, u64::from((state.gpr(src) as u32).wrapping_add(imm)))
                }
                Inst::Branch64 {
                    cond,
                    lhs,
                    rhs,
                    target,
                } => taken(target, cond.eval64(state.operand64(lhs), state.operand64(rhs)))?,
                Inst::Branch32 {
                    cond,
                    lhs,
                    rhs,
                    target,
                } => taken(target, cond.eval32(state.operand32(lhs), state.operand32(rhs)))?,
                Inst::Branch8 {
                    cond,
                    lhs,
                    imm,
                    target,
                } => {
                    let byte = state.read8(state.address(lhs));
                    taken(target, cond.eval32(u64::from(byte), u64::from(imm)))?
                }
                Inst::BranchTest64 {
                    cond,
                    value,
                    mask,
                    target,
                } => taken(target, cond.eval(state.operand64(value) & state.operand64(mask)))?,
                Inst::BranchTest32 {
                    cond,
                    value,
                    mask,
                    target,
                } => taken(target, cond.eval(state.operand32(value) & state.operand32(mask)))?,
                Inst::BranchDouble {
                    cond,
                    lhs,
                    rhs,
                    target,
                } => taken(target, cond.eval(state.fpr(lhs), state.fpr(rhs)))?,
                Inst::Jump { target } | Inst::PatchableJump { target } => taken(target, true)?,
                Inst::Call { target } => {
                    let address = state.gpr(target);
                    let host = self
                        .hosts
                        .get_mut(&address)
                        .ok_or(SimError::UnknownCallTarget { address })?;
                    host(state);
                }
                Inst::CallSlowPath {
                    operation,
                    stack_map,
                    call_site,
                } => {
                    let handler = self
                        .slow_path
                        .as_mut()
                        .ok_or(SimError::MissingSlowPathHandler { pc })?;
                    handler(
                        state,
                        SlowPathCall {
                            operation,
                            stack_map,
                            call_site,
                        },
                    );
                }
                Inst::Abort(reason) => return Ok(Exit::Aborted(reason)),
                Inst::Breakpoint => return Ok(Exit::Breakpoint),
                Inst::Ret => return Ok(Exit::Returned),
            }
            pc = next;
        }
        Err(SimError::StepLimit {
            limit: self.step_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masm::{MacroAssembler, ResultCondition};

    #[test]
    fn memory_is_little_endian_and_zero_filled() {
        let mut state = MachineState::new();
        state.write64(0x100, 0x1122_3344_5566_7788);
        assert_eq!(state.read8(0x100), 0x88);
        assert_eq!(state.read32(0x104), 0x1122_3344);
        assert_eq!(state.read64(0x2000), 0);
    }

    #[test]
    fn branches_follow_conditions() {
        let mut masm = MacroAssembler::new();
        let skip = masm.branch64(RelationalCondition::Equal, Gpr::REG_T0, Operand::Imm(5));
        masm.abort_with_reason(AbortReason::IsNotInt32);
        skip.link(&mut masm);
        let zero = masm.branch_test32(ResultCondition::Zero, Gpr::REG_T1, Operand::Imm(0xF));
        masm.ret();
        zero.link(&mut masm);
        masm.breakpoint();

        let code = masm.into_instructions();
        let mut machine = Machine::new();
        machine.state.set_gpr(Gpr::REG_T0, 5);
        machine.state.set_gpr(Gpr::REG_T1, 0x10);
        assert_eq!(machine.run(&code, 0), Ok(Exit::Breakpoint));
        assert!(!machine.executed(1));

        machine.state.set_gpr(Gpr::REG_T0, 4);
        assert_eq!(
            machine.run(&code, 0),
            Ok(Exit::Aborted(AbortReason::IsNotInt32))
        );
    }

    #[test]
    fn faults_are_reported() {
        let mut masm = MacroAssembler::new();
        let _pending = masm.jump();
        let code = masm.into_instructions();
        let mut machine = Machine::new();
        assert_eq!(
            machine.run(&code, 0),
            Err(SimError::UnlinkedBranch { pc: 0 })
        );

        let mut masm = MacroAssembler::new();
        let top = masm.label();
        masm.jump().link_to(&mut masm, top);
        machine.set_step_limit(10);
        assert_eq!(
            machine.run(masm.instructions(), 0),
            Err(SimError::StepLimit { limit: 10 })
        );
    }

    #[test]
    fn host_calls_see_machine_state() {
        let mut masm = MacroAssembler::new();
        masm.move_imm(0xAB00, Gpr::NON_PRESERVED_NON_RETURN);
        masm.call(Gpr::NON_PRESERVED_NON_RETURN);
        masm.ret();
        let mut machine = Machine::new();
        machine.install_host(0xAB00, |state| state.set_gpr(Gpr::RETURN_VALUE, 42));
        assert_eq!(machine.run(masm.instructions(), 0), Ok(Exit::Returned));
        assert_eq!(machine.state.gpr(Gpr::RETURN_VALUE), 42);
    }
}

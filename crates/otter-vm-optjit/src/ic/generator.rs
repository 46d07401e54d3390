//! Property-access generators.
//!
//! Each inline cache site gets a fixed-size region the linker can rewrite:
//!
//! ```text
//!   begin:  patchable_jump slow_landing   ; placeholder
//!           nop ... nop                   ; room for the specialized access
//!   done:   <code after the site>
//!   ...
//!   slow_landing:
//!           call_slow_path op, stackmap, callsite
//!           jump <unresolved>              ; linker points this at `done`
//! ```

use super::IcId;
use crate::error::JitError;
use crate::masm::{CodeRegion, Jump, Label, MacroAssembler};
use crate::unit::CompilationUnit;

/// Instructions reserved for each site's specialized access.
pub const INLINE_REGION_LEN: usize = 16;

/// Patch metadata for one emitted inline region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessGenerator {
    /// First instruction of the region.
    pub begin: Label,
    /// The rewritable range.
    pub region: CodeRegion,
    /// Placeholder branch to the slow path, the first instruction of the
    /// region.
    pub slow_path_jump: Jump,
    /// Where both the fast and slow paths rejoin.
    pub done: Label,
}

/// Emit the inline region of site `id` at the current position and record
/// it on the descriptor.
pub fn emit_inline_cache(
    unit: &mut CompilationUnit,
    masm: &mut MacroAssembler,
    id: IcId,
) -> AccessGenerator {
    let begin = masm.label();
    let slow_path_jump = masm.patchable_jump().jump();
    while masm.label().position() < begin.position() + INLINE_REGION_LEN {
        masm.nop();
    }
    let generator = AccessGenerator {
        begin,
        region: CodeRegion {
            start: begin.position(),
            len: INLINE_REGION_LEN,
        },
        slow_path_jump,
        done: masm.label(),
    };
    unit.append_generator(id, generator);
    generator
}

/// Emit the slow paths of every generator of site `id` that does not have
/// one yet. Returns how many were emitted.
///
/// Fails when the site already records more exits than generators.
pub fn emit_slow_paths(
    unit: &mut CompilationUnit,
    masm: &mut MacroAssembler,
    id: IcId,
) -> Result<usize, JitError> {
    let descriptor = unit.descriptor(id);
    let generators = descriptor.generators();
    let exits = descriptor.slow_path_done().len();
    let pending = generators
        .get(exits..)
        .ok_or(JitError::UnbalancedSlowPathExits {
            ic: id,
            generators: generators.len(),
            exits,
        })?
        .to_vec();
    let operation = descriptor.slow_path_operation();
    let stack_map = descriptor.stack_map_id();
    let call_site = descriptor.call_site_index();

    for generator in &pending {
        generator.slow_path_jump.link(masm);
        masm.call_slow_path(operation, stack_map, call_site);
        let exit = masm.jump();
        unit.append_slow_path_exit(id, exit);
    }
    Ok(pending.len())
}

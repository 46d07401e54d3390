//! Per-compilation descriptor registry.
//!
//! ```text
//!   CompilationUnit ──finish(masm)──► FinishedUnit ──Linker::link──► LinkedCode
//!   (single writer)                   (immutable, Send)
//! ```
//!
//! Descriptors are created and appended to only through the unit. `finish`
//! consumes it, so nothing can be appended once linking may begin.

use rustc_hash::FxHashSet;

use crate::config::JitOptions;
use crate::error::JitError;
use crate::ic::{
    AccessGenerator, CallSiteIndex, EcmaMode, IcId, InlineCacheDescriptor, PropertyKey, PutKind,
    StackMapId,
};
use crate::masm::{Inst, Jump, MacroAssembler};

/// Descriptors of one compilation while code is being generated.
#[derive(Debug)]
pub struct CompilationUnit {
    options: JitOptions,
    descriptors: Vec<InlineCacheDescriptor>,
}

impl CompilationUnit {
    /// Empty unit.
    pub fn new(options: JitOptions) -> Self {
        Self {
            options,
            descriptors: Vec::new(),
        }
    }

    /// Options this unit is compiled with.
    pub fn options(&self) -> &JitOptions {
        &self.options
    }

    /// Register a descriptor and return its handle.
    pub fn create_descriptor(&mut self, descriptor: InlineCacheDescriptor) -> IcId {
        if self.options.debug_assertions {
            assert!(
                !descriptor.stack_map_id().is_unset(),
                "inline cache created without a stack map"
            );
        }
        let id = IcId::new(self.descriptors.len());
        self.descriptors.push(descriptor);
        id
    }

    /// New read site.
    pub fn create_get_by_id(
        &mut self,
        stack_map_id: StackMapId,
        call_site_index: CallSiteIndex,
        key: PropertyKey,
    ) -> IcId {
        self.create_descriptor(InlineCacheDescriptor::get_by_id(
            stack_map_id,
            call_site_index,
            key,
        ))
    }

    /// New write site.
    pub fn create_put_by_id(
        &mut self,
        stack_map_id: StackMapId,
        call_site_index: CallSiteIndex,
        key: PropertyKey,
        ecma_mode: EcmaMode,
        put_kind: PutKind,
    ) -> IcId {
        self.create_descriptor(InlineCacheDescriptor::put_by_id(
            stack_map_id,
            call_site_index,
            key,
            ecma_mode,
            put_kind,
        ))
    }

    /// New existence-check site.
    pub fn create_check_in(
        &mut self,
        stack_map_id: StackMapId,
        call_site_index: CallSiteIndex,
        key: PropertyKey,
    ) -> IcId {
        self.create_descriptor(InlineCacheDescriptor::check_in(
            stack_map_id,
            call_site_index,
            key,
        ))
    }

    /// Descriptor behind `id`.
    ///
    /// # Panics
    ///
    /// If `id` was issued by another unit.
    pub fn descriptor(&self, id: IcId) -> &InlineCacheDescriptor {
        &self.descriptors[id.index()]
    }

    /// Every descriptor, in creation order.
    pub fn descriptors(&self) -> &[InlineCacheDescriptor] {
        &self.descriptors
    }

    /// Record a patchable region for site `id`.
    pub fn append_generator(&mut self, id: IcId, generator: AccessGenerator) {
        self.descriptors[id.index()].push_generator(generator);
    }

    /// Record a slow-path exit for site `id`. The linker resolves the `i`-th
    /// exit to the done label of the `i`-th generator.
    pub fn append_slow_path_exit(&mut self, id: IcId, jump: Jump) {
        self.descriptors[id.index()].push_slow_path_exit(jump);
    }

    /// Close generation. Every branch in `masm` must be linked except the
    /// recorded slow-path exits.
    pub fn finish(self, masm: MacroAssembler) -> Result<FinishedUnit, JitError> {
        let exits: FxHashSet<usize> = self
            .descriptors
            .iter()
            .flat_map(|descriptor| descriptor.slow_path_done())
            .map(|jump| jump.position())
            .collect();
        if let Some(jump) = masm
            .unlinked_jumps()
            .find(|jump| !exits.contains(&jump.position()))
        {
            return Err(JitError::UnlinkedJump {
                position: jump.position(),
            });
        }

        let code = masm.into_instructions();
        tracing::debug!(
            descriptors = self.descriptors.len(),
            code_len = code.len(),
            "optimizing unit finished"
        );
        Ok(FinishedUnit {
            options: self.options,
            code,
            descriptors: self.descriptors,
        })
    }
}

/// Generated code and its descriptors, ready to link.
#[derive(Debug, Clone)]
pub struct FinishedUnit {
    options: JitOptions,
    code: Vec<Inst>,
    descriptors: Vec<InlineCacheDescriptor>,
}

impl FinishedUnit {
    /// Options the unit was compiled with.
    pub fn options(&self) -> &JitOptions {
        &self.options
    }

    /// Instruction stream with slow-path exits still unresolved.
    pub fn code(&self) -> &[Inst] {
        &self.code
    }

    /// Descriptors, in creation order.
    pub fn descriptors(&self) -> &[InlineCacheDescriptor] {
        &self.descriptors
    }

    /// Descriptor behind `id`.
    pub fn descriptor(&self, id: IcId) -> Option<&InlineCacheDescriptor> {
        self.descriptors.get(id.index())
    }

    /// Handles of every descriptor, in creation order.
    pub fn ids(&self) -> impl Iterator<Item = IcId> + '_ {
        (0..self.descriptors.len()).map(IcId::new)
    }
}

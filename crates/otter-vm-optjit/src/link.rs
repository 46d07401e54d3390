//! Link phase: resolve slow-path exits and specialize inline regions.
//!
//! For every descriptor, in creation order:
//!
//! 1. the `i`-th slow-path exit is pointed at the `i`-th generator's done
//!    label;
//! 2. the descriptor's stack map is looked up;
//! 3. each generator region, in append order, is rewritten into a structure
//!    check followed by the direct access, padded with nops. When the access
//!    cannot be resolved the placeholder jump stays and the site takes its
//!    slow path for the lifetime of the code.
//!
//! A site whose structure becomes stale is never re-specialized here; that
//! is left to whoever decides to relink.
//!
//! Linking reads the [`FinishedUnit`] without modifying it, so linking the
//! same unit against the same collaborators yields identical code.

use rustc_hash::FxHashMap;

use crate::cell_header::emit_store_structure_with_type_info;
use crate::config::JitOptions;
use crate::error::JitError;
use crate::ic::{
    AccessGenerator, DescriptorKind, IcId, InlineCacheDescriptor, PropertyKey, PutKind, StackMapId,
};
use crate::lattice::{StructureId, StructureInfo, TypeDescriptor};
use crate::masm::{CodeRegion, Gpr, Inst, Label, MacroAssembler, Mem};
use crate::type_guards::GuardEmitter;
use crate::unit::FinishedUnit;
use crate::value::{ValueRegs, cell, packed, split};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Register assignment the translator recorded for one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMapSnapshot {
    /// Object being accessed.
    pub base: ValueRegs,
    /// Value written by a write site.
    pub value: Option<ValueRegs>,
    /// Destination of a read or existence check.
    pub result: Option<ValueRegs>,
    /// Register the specialized code may clobber.
    pub scratch: Gpr,
    /// Structure the base was observed with.
    pub structure: Option<StructureId>,
}

impl StackMapSnapshot {
    /// Snapshot with only the base and scratch registers.
    pub fn new(base: ValueRegs, scratch: Gpr) -> Self {
        Self {
            base,
            value: None,
            result: None,
            scratch,
            structure: None,
        }
    }

    /// Set the result registers.
    pub fn with_result(mut self, result: ValueRegs) -> Self {
        self.result = Some(result);
        self
    }

    /// Set the written value's registers.
    pub fn with_value(mut self, value: ValueRegs) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the observed structure.
    pub fn expecting(mut self, structure: StructureId) -> Self {
        self.structure = Some(structure);
        self
    }
}

/// Stack-map lookup.
pub trait StackMaps {
    /// Snapshot recorded under `id`.
    fn snapshot(&self, id: StackMapId) -> Option<StackMapSnapshot>;
}

/// Stack maps issued and recorded in one table.
#[derive(Debug, Default)]
pub struct StackMapTable {
    maps: FxHashMap<StackMapId, StackMapSnapshot>,
    next_id: u32,
}

impl StackMapTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh id.
    ///
    /// # Panics
    ///
    /// When every id below [`StackMapId::UNSET`] has been issued.
    pub fn new_stack_map_id(&mut self) -> StackMapId {
        let id = StackMapId::new(self.next_id);
        assert!(!id.is_unset(), "stack map ids exhausted");
        self.next_id += 1;
        id
    }

    /// Record the snapshot for `id`, replacing any earlier one.
    pub fn record(&mut self, id: StackMapId, snapshot: StackMapSnapshot) {
        self.maps.insert(id, snapshot);
    }
}

impl StackMaps for StackMapTable {
    fn snapshot(&self, id: StackMapId) -> Option<StackMapSnapshot> {
        self.maps.get(&id).copied()
    }
}

/// Structure model queries.
pub trait Structures {
    /// Header fields of `structure`, or `None` if it is no longer valid.
    fn info(&self, structure: StructureId) -> Option<StructureInfo>;

    /// Inline slot of `key` in objects of `structure`.
    fn offset_of(&self, structure: StructureId, key: PropertyKey) -> Option<u32>;

    /// Structure reached by adding `key` to `structure`, and the slot the new
    /// property lands in.
    fn add_property_transition(
        &self,
        structure: StructureId,
        key: PropertyKey,
    ) -> Option<(StructureId, u32)>;
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Why a site was left on its slow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlowPathReason {
    /// The stack map carries no observed structure.
    NoStructure,
    /// The observed structure is no longer valid.
    InvalidStructure,
    /// The structure has no such property.
    MissingProperty,
    /// Adding the property has no cacheable transition.
    NoTransition,
    /// The stack map lacks the value or result registers.
    MissingRegisters,
}

/// What a generator region became.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Direct load from an inline slot.
    Load {
        /// Expected structure.
        structure: StructureId,
        /// Inline slot.
        offset: u32,
    },
    /// Direct store to an existing inline slot.
    Store {
        /// Expected structure.
        structure: StructureId,
        /// Inline slot.
        offset: u32,
    },
    /// Store to a new slot plus header re-initialization.
    Transition {
        /// Structure before the write.
        from: StructureId,
        /// Structure after the write.
        to: StructureId,
        /// Inline slot.
        offset: u32,
    },
    /// Existence check answered `true` inline.
    Present {
        /// Expected structure.
        structure: StructureId,
    },
    /// Placeholder kept; every execution takes the slow path.
    SlowPath(SlowPathReason),
}

impl Resolution {
    /// Whether the region was rewritten.
    pub fn is_specialized(&self) -> bool {
        !matches!(self, Self::SlowPath(_))
    }
}

/// Outcome for one generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteOutcome {
    /// Owning descriptor.
    pub ic: IcId,
    /// Index of the generator within the descriptor.
    pub generator: usize,
    /// Region the outcome applies to.
    pub region: CodeRegion,
    /// What the region became.
    pub resolution: Resolution,
}

/// Fully linked code.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedCode {
    code: Vec<Inst>,
    report: Vec<SiteOutcome>,
}

impl LinkedCode {
    /// Final instruction stream.
    pub fn code(&self) -> &[Inst] {
        &self.code
    }

    /// Per-generator outcomes, in processing order.
    pub fn report(&self) -> &[SiteOutcome] {
        &self.report
    }

    /// Branches still lacking a target. Zero for any successful link.
    pub fn unresolved_slow_path_exits(&self) -> usize {
        self.code
            .iter()
            .filter(|inst| inst.is_unlinked_branch())
            .count()
    }

    /// Take the instruction stream.
    pub fn into_code(self) -> Vec<Inst> {
        self.code
    }
}

// ---------------------------------------------------------------------------
// Linker
// ---------------------------------------------------------------------------

/// Links finished units against a stack-map table and a structure model.
pub struct Linker<'a> {
    stack_maps: &'a dyn StackMaps,
    structures: &'a dyn Structures,
}

impl<'a> Linker<'a> {
    /// Linker over the given collaborators.
    pub fn new(stack_maps: &'a dyn StackMaps, structures: &'a dyn Structures) -> Self {
        Self {
            stack_maps,
            structures,
        }
    }

    /// Produce the final code for `unit`.
    pub fn link(&self, unit: &FinishedUnit) -> Result<LinkedCode, JitError> {
        let mut code = unit.code().to_vec();
        let mut report = Vec::new();

        for (ic, descriptor) in unit.ids().zip(unit.descriptors()) {
            let generators = descriptor.generators();
            let exits = descriptor.slow_path_done();
            if generators.len() != exits.len() {
                return Err(JitError::UnbalancedSlowPathExits {
                    ic,
                    generators: generators.len(),
                    exits: exits.len(),
                });
            }
            for (generator, exit) in generators.iter().zip(exits) {
                let linked = code
                    .get_mut(exit.position())
                    .is_some_and(|inst| inst.set_target(generator.done));
                if !linked {
                    return Err(JitError::UnlinkedJump {
                        position: exit.position(),
                    });
                }
            }
            if generators.is_empty() {
                continue;
            }

            let stack_map = descriptor.stack_map_id();
            let snapshot = self
                .stack_maps
                .snapshot(stack_map)
                .ok_or(JitError::MissingStackMap { stack_map })?;

            for (index, generator) in generators.iter().enumerate() {
                let placeholder = generator.slow_path_jump.position();
                let slow_path = code
                    .get(placeholder)
                    .and_then(Inst::target)
                    .flatten()
                    .ok_or(JitError::UnlinkedJump {
                        position: placeholder,
                    })?;

                let resolution = match self.specialize(
                    unit.options(),
                    descriptor,
                    &snapshot,
                    generator,
                    slow_path,
                )? {
                    Ok((resolution, patch)) => {
                        code[generator.region.start..generator.region.end()]
                            .clone_from_slice(&patch);
                        resolution
                    }
                    Err(reason) => Resolution::SlowPath(reason),
                };
                tracing::trace!(
                    ic = ic.index(),
                    generator = index,
                    region_start = generator.region.start,
                    ?resolution,
                    "inline cache site linked"
                );
                report.push(SiteOutcome {
                    ic,
                    generator: index,
                    region: generator.region,
                    resolution,
                });
            }
        }

        let specialized = report
            .iter()
            .filter(|outcome| outcome.resolution.is_specialized())
            .count();
        tracing::debug!(
            sites = report.len(),
            specialized,
            slow_path = report.len() - specialized,
            "optimizing unit linked"
        );
        Ok(LinkedCode { code, report })
    }

    /// Build the replacement for one region. The outer error aborts the
    /// link; the inner one leaves the site on its slow path.
    fn specialize(
        &self,
        options: &JitOptions,
        descriptor: &InlineCacheDescriptor,
        snapshot: &StackMapSnapshot,
        generator: &AccessGenerator,
        slow_path: Label,
    ) -> Result<Result<(Resolution, Vec<Inst>), SlowPathReason>, JitError> {
        let Some(structure) = snapshot.structure else {
            return Ok(Err(SlowPathReason::NoStructure));
        };
        if self.structures.info(structure).is_none() {
            return Ok(Err(SlowPathReason::InvalidStructure));
        }
        let key = descriptor.key();

        let mut masm = MacroAssembler::with_origin(generator.region.start);
        let guards = GuardEmitter::new(options);
        guards
            .branch_if_not_type(
                &mut masm,
                snapshot.base,
                snapshot.scratch,
                TypeDescriptor::ObjectWithStructure(structure),
            )
            .link_to(&mut masm, slow_path);
        let object = snapshot.base.payload_gpr();

        let resolution = match *descriptor.kind() {
            DescriptorKind::GetById => {
                let Some(offset) = self.structures.offset_of(structure, key) else {
                    return Ok(Err(SlowPathReason::MissingProperty));
                };
                let Some(result) = snapshot.result else {
                    return Ok(Err(SlowPathReason::MissingRegisters));
                };
                load_slot(&mut masm, object, offset, result);
                Resolution::Load { structure, offset }
            }
            DescriptorKind::PutById {
                put_kind: PutKind::Replace,
                ..
            } => {
                let Some(offset) = self.structures.offset_of(structure, key) else {
                    return Ok(Err(SlowPathReason::MissingProperty));
                };
                let Some(value) = snapshot.value else {
                    return Ok(Err(SlowPathReason::MissingRegisters));
                };
                store_slot(&mut masm, object, offset, value);
                Resolution::Store { structure, offset }
            }
            DescriptorKind::PutById {
                put_kind: PutKind::Define,
                ..
            } => {
                let Some((to, offset)) = self.structures.add_property_transition(structure, key)
                else {
                    return Ok(Err(SlowPathReason::NoTransition));
                };
                let Some(to_info) = self.structures.info(to) else {
                    return Ok(Err(SlowPathReason::InvalidStructure));
                };
                let Some(value) = snapshot.value else {
                    return Ok(Err(SlowPathReason::MissingRegisters));
                };
                store_slot(&mut masm, object, offset, value);
                emit_store_structure_with_type_info(&mut masm, options, &to_info, object);
                Resolution::Transition {
                    from: structure,
                    to,
                    offset,
                }
            }
            DescriptorKind::CheckIn { .. } => {
                if self.structures.offset_of(structure, key).is_none() {
                    return Ok(Err(SlowPathReason::MissingProperty));
                }
                let Some(result) = snapshot.result else {
                    return Ok(Err(SlowPathReason::MissingRegisters));
                };
                materialize_true(&mut masm, result);
                Resolution::Present { structure }
            }
        };

        let available = generator.region.len;
        if masm.code_len() > available {
            return Err(JitError::RegionOverflow {
                needed: masm.code_len(),
                available,
            });
        }
        while masm.code_len() < available {
            masm.nop();
        }
        Ok(Ok((resolution, masm.into_instructions())))
    }
}

fn load_slot(masm: &mut MacroAssembler, object: Gpr, offset: u32, result: ValueRegs) {
    let slot = Mem::base(object, cell::inline_offset(offset));
    match result {
        ValueRegs::Packed(dst) => masm.load64(slot, dst),
        ValueRegs::Split { tag, payload } => {
            // Whichever half overwrites the object register goes last.
            if payload == object {
                masm.load32(slot.offset_by(4), tag);
                masm.load32(slot, payload);
            } else {
                masm.load32(slot, payload);
                masm.load32(slot.offset_by(4), tag);
            }
        }
    }
}

fn store_slot(masm: &mut MacroAssembler, object: Gpr, offset: u32, value: ValueRegs) {
    let slot = Mem::base(object, cell::inline_offset(offset));
    match value {
        ValueRegs::Packed(src) => masm.store64(src, slot),
        ValueRegs::Split { tag, payload } => {
            masm.store32(payload, slot);
            masm.store32(tag, slot.offset_by(4));
        }
    }
}

fn materialize_true(masm: &mut MacroAssembler, result: ValueRegs) {
    match result {
        ValueRegs::Packed(dst) => masm.move_imm(packed::VALUE_TRUE, dst),
        ValueRegs::Split { tag, payload } => {
            masm.move_imm(split::BOOLEAN_TAG.into(), tag);
            masm.move_imm(1, payload);
        }
    }
}

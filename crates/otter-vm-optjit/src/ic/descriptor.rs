use super::{AccessGenerator, CallSiteIndex, PropertyKey, SlowPathOperation, StackMapId};
use crate::masm::Jump;

/// Language mode of a write site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcmaMode {
    /// A failed write throws.
    Strict,
    /// A failed write is silently ignored.
    Sloppy,
}

/// What a write site does to the property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PutKind {
    /// Creates a new own property, transitioning the structure.
    Define,
    /// Replaces the value of an existing property.
    Replace,
}

/// Which property operation a descriptor caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcVariant {
    /// Property read.
    GetById,
    /// Property write.
    PutById,
    /// Property existence check.
    CheckIn,
}

/// Variant-specific fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Property read.
    GetById,
    /// Property write.
    PutById {
        /// Strictness of the enclosing code.
        ecma_mode: EcmaMode,
        /// Define or replace.
        put_kind: PutKind,
    },
    /// `key in base`. The shared key slot stays empty; the tested key lives
    /// here.
    CheckIn {
        /// Key whose presence is tested.
        key: PropertyKey,
    },
}

/// Per-site inline cache record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineCacheDescriptor {
    stack_map_id: StackMapId,
    call_site_index: CallSiteIndex,
    property_key: Option<PropertyKey>,
    generators: Vec<AccessGenerator>,
    slow_path_done: Vec<Jump>,
    kind: DescriptorKind,
}

impl InlineCacheDescriptor {
    fn new(
        stack_map_id: StackMapId,
        call_site_index: CallSiteIndex,
        property_key: Option<PropertyKey>,
        kind: DescriptorKind,
    ) -> Self {
        Self {
            stack_map_id,
            call_site_index,
            property_key,
            generators: Vec::new(),
            slow_path_done: Vec::new(),
            kind,
        }
    }

    /// Read site.
    pub fn get_by_id(
        stack_map_id: StackMapId,
        call_site_index: CallSiteIndex,
        key: PropertyKey,
    ) -> Self {
        Self::new(stack_map_id, call_site_index, Some(key), DescriptorKind::GetById)
    }

    /// Write site.
    pub fn put_by_id(
        stack_map_id: StackMapId,
        call_site_index: CallSiteIndex,
        key: PropertyKey,
        ecma_mode: EcmaMode,
        put_kind: PutKind,
    ) -> Self {
        Self::new(
            stack_map_id,
            call_site_index,
            Some(key),
            DescriptorKind::PutById {
                ecma_mode,
                put_kind,
            },
        )
    }

    /// Existence-check site.
    pub fn check_in(
        stack_map_id: StackMapId,
        call_site_index: CallSiteIndex,
        key: PropertyKey,
    ) -> Self {
        Self::new(
            stack_map_id,
            call_site_index,
            None,
            DescriptorKind::CheckIn { key },
        )
    }

    /// Stack map recorded for this site.
    pub fn stack_map_id(&self) -> StackMapId {
        self.stack_map_id
    }

    /// Unwind context of this site.
    pub fn call_site_index(&self) -> CallSiteIndex {
        self.call_site_index
    }

    /// Key bound by a read or write site; absent for existence checks.
    pub fn property_key(&self) -> Option<PropertyKey> {
        self.property_key
    }

    /// Key the site operates on, whatever the variant.
    pub fn key(&self) -> PropertyKey {
        match (self.property_key, &self.kind) {
            (_, DescriptorKind::CheckIn { key }) => *key,
            (Some(key), _) => key,
            (None, kind) => unreachable!("{kind:?} descriptor without a property key"),
        }
    }

    /// Variant-specific fields.
    pub fn kind(&self) -> &DescriptorKind {
        &self.kind
    }

    /// Discriminant.
    pub fn variant(&self) -> IcVariant {
        match self.kind {
            DescriptorKind::GetById => IcVariant::GetById,
            DescriptorKind::PutById { .. } => IcVariant::PutById,
            DescriptorKind::CheckIn { .. } => IcVariant::CheckIn,
        }
    }

    /// Strictness of a write site.
    pub fn ecma_mode(&self) -> Option<EcmaMode> {
        match self.kind {
            DescriptorKind::PutById { ecma_mode, .. } => Some(ecma_mode),
            _ => None,
        }
    }

    /// Define/replace flag of a write site.
    pub fn put_kind(&self) -> Option<PutKind> {
        match self.kind {
            DescriptorKind::PutById { put_kind, .. } => Some(put_kind),
            _ => None,
        }
    }

    /// Runtime operation the slow path calls.
    pub fn slow_path_operation(&self) -> SlowPathOperation {
        match self.kind {
            DescriptorKind::GetById => SlowPathOperation::GetById,
            DescriptorKind::CheckIn { .. } => SlowPathOperation::In,
            DescriptorKind::PutById {
                ecma_mode,
                put_kind,
            } => match (put_kind, ecma_mode) {
                (PutKind::Replace, EcmaMode::Strict) => SlowPathOperation::PutByIdStrict,
                (PutKind::Replace, EcmaMode::Sloppy) => SlowPathOperation::PutByIdSloppy,
                (PutKind::Define, EcmaMode::Strict) => SlowPathOperation::PutByIdDirectStrict,
                (PutKind::Define, EcmaMode::Sloppy) => SlowPathOperation::PutByIdDirectSloppy,
            },
        }
    }

    /// Patchable regions, in emission order.
    pub fn generators(&self) -> &[AccessGenerator] {
        &self.generators
    }

    /// Slow-path exits awaiting a return target, in emission order.
    pub fn slow_path_done(&self) -> &[Jump] {
        &self.slow_path_done
    }

    pub(crate) fn push_generator(&mut self, generator: AccessGenerator) {
        self.generators.push(generator);
    }

    pub(crate) fn push_slow_path_exit(&mut self, jump: Jump) {
        self.slow_path_done.push(jump);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ic::Interner;

    #[test]
    fn check_in_keeps_its_own_key() {
        let mut keys = Interner::new();
        let x = keys.intern("x");
        let desc = InlineCacheDescriptor::check_in(StackMapId::new(1), CallSiteIndex::new(0), x);
        assert_eq!(desc.property_key(), None);
        assert_eq!(desc.key(), x);
        assert_eq!(desc.variant(), IcVariant::CheckIn);
        assert_eq!(desc.slow_path_operation(), SlowPathOperation::In);
    }

    #[test]
    fn put_flags_select_operation() {
        let mut keys = Interner::new();
        let x = keys.intern("x");
        let desc = InlineCacheDescriptor::put_by_id(
            StackMapId::new(2),
            CallSiteIndex::new(4),
            x,
            EcmaMode::Strict,
            PutKind::Define,
        );
        assert_eq!(desc.property_key(), Some(x));
        assert_eq!(desc.ecma_mode(), Some(EcmaMode::Strict));
        assert_eq!(desc.put_kind(), Some(PutKind::Define));
        assert_eq!(desc.slow_path_operation(), SlowPathOperation::PutByIdDirectStrict);
        assert!(desc.generators().is_empty());
        assert!(desc.slow_path_done().is_empty());
    }

    #[test]
    fn get_by_id_has_no_write_flags() {
        let mut keys = Interner::new();
        let desc = InlineCacheDescriptor::get_by_id(
            StackMapId::new(7),
            CallSiteIndex::new(3),
            keys.intern("x"),
        );
        assert_eq!(desc.stack_map_id(), StackMapId::new(7));
        assert_eq!(desc.call_site_index(), CallSiteIndex::new(3));
        assert_eq!(desc.ecma_mode(), None);
        assert_eq!(desc.put_kind(), None);
    }
}

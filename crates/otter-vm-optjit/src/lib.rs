//! # Otter VM Optimizing JIT
//!
//! Inline-cache descriptors and the guard, assertion and exception-check
//! emitters of the optimizing tier.
//!
//! The translator owns a [`CompilationUnit`] per function. For each property
//! access that wants an inline cache it creates a descriptor, emits the
//! patchable region with [`ic::emit_inline_cache`] and the slow path with
//! [`ic::emit_slow_paths`], and finally calls [`CompilationUnit::finish`].
//! The [`Linker`] then specializes each region against the recorded stack
//! maps and the structure model.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod abort;
pub mod assertions;
pub mod cell_header;
pub mod config;
pub mod error;
pub mod exceptions;
pub mod ic;
pub mod lattice;
pub mod link;
pub mod masm;
pub mod type_guards;
pub mod unit;
pub mod value;
pub mod worker;

pub use abort::AbortReason;
pub use assertions::AssertionEmitter;
pub use cell_header::emit_store_structure_with_type_info;
pub use config::{JitOptions, VmLayout};
pub use error::JitError;
pub use exceptions::{ExceptionCheckKind, ExceptionChecker, ExceptionJumpWidth};
pub use ic::{InlineCacheDescriptor, Interner, PropertyKey};
pub use lattice::{StructureId, StructureInfo, TypeDescriptor};
pub use link::{
    LinkedCode, Linker, Resolution, SiteOutcome, SlowPathReason, StackMapSnapshot, StackMapTable,
    StackMaps, Structures,
};
pub use masm::MacroAssembler;
pub use type_guards::{GuardEmitter, purify_nan};
pub use unit::{CompilationUnit, FinishedUnit};
pub use value::{JsValue, RepresentationMode, TagRegistersMode, ValueRegs};
pub use worker::{CompileResult, CompileWorker};

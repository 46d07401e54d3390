//! Inline cache generation, linking and execution.

use std::cell::Cell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use otter_vm_optjit::ic::{
    CallSiteIndex, EcmaMode, IcId, PutKind, SlowPathOperation, StackMapId, emit_inline_cache,
    emit_slow_paths,
};
use otter_vm_optjit::masm::sim::{Exit, Machine};
use otter_vm_optjit::masm::{Gpr, Inst, MacroAssembler, Mem};
use otter_vm_optjit::value::{RepresentationMode, cell, packed};
use otter_vm_optjit::{
    CompilationUnit, CompileResult, CompileWorker, FinishedUnit, Interner, JitError, JitOptions,
    JsValue, Linker, PropertyKey, Resolution, SlowPathReason, StackMapSnapshot, StackMapTable,
    StructureId, StructureInfo, Structures, ValueRegs,
};

const S1: StructureId = StructureId::new(1);
const S2: StructureId = StructureId::new(2);
const S3: StructureId = StructureId::new(3);
const OBJECT: u64 = 0x1000;
const SLOW_PATH_MARK: u64 = 0x9000;

#[derive(Default)]
struct TestStructures {
    infos: FxHashMap<StructureId, StructureInfo>,
    offsets: FxHashMap<(StructureId, PropertyKey), u32>,
    transitions: FxHashMap<(StructureId, PropertyKey), (StructureId, u32)>,
}

impl TestStructures {
    fn define(&mut self, id: StructureId) -> &mut Self {
        self.infos.insert(
            id,
            StructureInfo {
                id,
                indexing_type: 0,
                cell_type: cell::FINAL_OBJECT_TYPE,
                inline_type_flags: 0,
            },
        );
        self
    }

    fn property(&mut self, id: StructureId, key: PropertyKey, offset: u32) -> &mut Self {
        self.offsets.insert((id, key), offset);
        self
    }

    fn transition(&mut self, from: StructureId, key: PropertyKey, to: StructureId, offset: u32) {
        self.transitions.insert((from, key), (to, offset));
    }
}

impl Structures for TestStructures {
    fn info(&self, structure: StructureId) -> Option<StructureInfo> {
        self.infos.get(&structure).copied()
    }

    fn offset_of(&self, structure: StructureId, key: PropertyKey) -> Option<u32> {
        self.offsets.get(&(structure, key)).copied()
    }

    fn add_property_transition(
        &self,
        structure: StructureId,
        key: PropertyKey,
    ) -> Option<(StructureId, u32)> {
        self.transitions.get(&(structure, key)).copied()
    }
}

struct Regs {
    base: ValueRegs,
    other: ValueRegs,
}

fn site_regs(mode: RepresentationMode) -> Regs {
    match mode {
        RepresentationMode::Packed => Regs {
            base: ValueRegs::Packed(Gpr::REG_T0),
            other: ValueRegs::Packed(Gpr::REG_T2),
        },
        RepresentationMode::Split => Regs {
            base: ValueRegs::Split {
                tag: Gpr::REG_T1,
                payload: Gpr::REG_T0,
            },
            other: ValueRegs::Split {
                tag: Gpr::REG_T3,
                payload: Gpr::REG_T2,
            },
        },
    }
}

fn modes() -> [JitOptions; 2] {
    [JitOptions::packed(true), JitOptions::split(true)]
}

/// One site: inline region, `ret`, then the out-of-line slow path.
fn single_site(
    options: JitOptions,
    create: impl FnOnce(&mut CompilationUnit) -> IcId,
) -> FinishedUnit {
    let mut unit = CompilationUnit::new(options);
    let mut masm = MacroAssembler::new();
    let ic = create(&mut unit);
    emit_inline_cache(&mut unit, &mut masm, ic);
    masm.ret();
    emit_slow_paths(&mut unit, &mut masm, ic).expect("slow paths emitted");
    unit.finish(masm).expect("unit finishes")
}

fn object(structure: StructureId) -> JsValue {
    JsValue::Cell {
        address: OBJECT,
        structure,
        cell_type: cell::FINAL_OBJECT_TYPE,
    }
}

/// Machine with one object at `OBJECT` and a slow-path handler that leaves
/// a mark and records the operation.
fn machine_for(
    options: &JitOptions,
    structure: StructureId,
    calls: Rc<Cell<Option<SlowPathOperation>>>,
) -> Machine {
    let mut machine = Machine::new();
    machine.state.set_gpr(Gpr::TAG_TYPE_NUMBER, packed::TAG_TYPE_NUMBER);
    machine.state.set_gpr(Gpr::TAG_MASK, packed::TAG_MASK);
    machine.state.write_cell_header(
        OBJECT,
        &StructureInfo {
            id: structure,
            indexing_type: 0,
            cell_type: cell::FINAL_OBJECT_TYPE,
            inline_type_flags: 0,
        },
    );
    machine
        .state
        .set_value(site_regs(options.representation).base, &object(structure));
    machine.on_slow_path(move |state, call| {
        state.write64(SLOW_PATH_MARK, 1);
        calls.set(Some(call.operation));
    });
    machine
}

fn slot_address(offset: u32) -> u64 {
    OBJECT + cell::inline_offset(offset) as u64
}

#[test]
fn test_get_by_id_links_to_direct_load() {
    for options in modes() {
        let mut keys = Interner::new();
        let x = keys.intern("x");
        let regs = site_regs(options.representation);

        let unit = single_site(options, |unit| {
            unit.create_get_by_id(StackMapId::new(7), CallSiteIndex::new(3), x)
        });
        let mut stack_maps = StackMapTable::new();
        stack_maps.record(
            StackMapId::new(7),
            StackMapSnapshot::new(regs.base, Gpr::new(9))
                .with_result(regs.other)
                .expecting(S1),
        );
        let mut structures = TestStructures::default();
        structures.define(S1).property(S1, x, 2);

        let linked = Linker::new(&stack_maps, &structures).link(&unit).unwrap();
        assert_eq!(linked.unresolved_slow_path_exits(), 0);
        assert_eq!(
            linked.report()[0].resolution,
            Resolution::Load {
                structure: S1,
                offset: 2
            }
        );
        let region = linked.report()[0].region;
        let direct_load = Mem::base(Gpr::REG_T0, cell::inline_offset(2));
        assert!(
            linked.code()[region.start..region.end()]
                .iter()
                .any(|inst| matches!(inst,
                    Inst::Load64 { src, .. } | Inst::Load32 { src, .. } if *src == direct_load)),
            "{:?}",
            &linked.code()[region.start..region.end()]
        );

        let calls = Rc::new(Cell::new(None));
        let mut machine = machine_for(&options, S1, calls.clone());
        let stored = JsValue::Int32(42).encode_slot(options.representation);
        machine.state.write64(slot_address(2), stored);
        assert_eq!(machine.run(linked.code(), 0), Ok(Exit::Returned));
        assert_eq!(machine.state.value_bits(regs.other), stored);
        assert_eq!(calls.get(), None);

        let mut machine = machine_for(&options, S2, calls.clone());
        assert_eq!(machine.run(linked.code(), 0), Ok(Exit::Returned));
        assert_eq!(calls.get(), Some(SlowPathOperation::GetById));
    }
}

#[test]
fn test_missing_property_keeps_slow_path() {
    for options in modes() {
        let mut keys = Interner::new();
        let x = keys.intern("x");
        let regs = site_regs(options.representation);

        let unit = single_site(options, |unit| {
            unit.create_get_by_id(StackMapId::new(7), CallSiteIndex::new(3), x)
        });
        let mut stack_maps = StackMapTable::new();
        stack_maps.record(
            StackMapId::new(7),
            StackMapSnapshot::new(regs.base, Gpr::new(9))
                .with_result(regs.other)
                .expecting(S1),
        );
        let mut structures = TestStructures::default();
        structures.define(S1).property(S1, keys.intern("y"), 0);

        let linked = Linker::new(&stack_maps, &structures).link(&unit).unwrap();
        assert_eq!(
            linked.report()[0].resolution,
            Resolution::SlowPath(SlowPathReason::MissingProperty)
        );
        let region = linked.report()[0].region;
        assert_eq!(
            &linked.code()[region.start..region.end()],
            &unit.code()[region.start..region.end()]
        );
        assert_eq!(linked.unresolved_slow_path_exits(), 0);

        let calls = Rc::new(Cell::new(None));
        let mut machine = machine_for(&options, S1, calls.clone());
        assert_eq!(machine.run(linked.code(), 0), Ok(Exit::Returned));
        assert_eq!(calls.get(), Some(SlowPathOperation::GetById));
        assert_eq!(machine.state.read64(SLOW_PATH_MARK), 1);
    }
}

#[test]
fn test_invalid_or_unknown_structure_keeps_slow_path() {
    let options = JitOptions::packed(false);
    let mut keys = Interner::new();
    let x = keys.intern("x");
    let regs = site_regs(options.representation);
    let unit = single_site(options, |unit| {
        unit.create_get_by_id(StackMapId::new(0), CallSiteIndex::new(0), x)
    });
    let structures = TestStructures::default();

    let mut stack_maps = StackMapTable::new();
    stack_maps.record(
        StackMapId::new(0),
        StackMapSnapshot::new(regs.base, Gpr::new(9))
            .with_result(regs.other)
            .expecting(S1),
    );
    let linked = Linker::new(&stack_maps, &structures).link(&unit).unwrap();
    assert_eq!(
        linked.report()[0].resolution,
        Resolution::SlowPath(SlowPathReason::InvalidStructure)
    );

    stack_maps.record(
        StackMapId::new(0),
        StackMapSnapshot::new(regs.base, Gpr::new(9)).with_result(regs.other),
    );
    let linked = Linker::new(&stack_maps, &structures).link(&unit).unwrap();
    assert_eq!(
        linked.report()[0].resolution,
        Resolution::SlowPath(SlowPathReason::NoStructure)
    );
}

#[test]
fn test_put_by_id_replace_and_define() {
    for options in modes() {
        let mut keys = Interner::new();
        let x = keys.intern("x");
        let regs = site_regs(options.representation);
        let mut structures = TestStructures::default();
        structures.define(S1).define(S3).property(S1, x, 1);
        structures.transition(S1, x, S3, 4);

        let mut stack_maps = StackMapTable::new();
        stack_maps.record(
            StackMapId::new(1),
            StackMapSnapshot::new(regs.base, Gpr::new(9))
                .with_value(regs.other)
                .expecting(S1),
        );
        let value = JsValue::Boolean(true);

        let replace = single_site(options, |unit| {
            unit.create_put_by_id(
                StackMapId::new(1),
                CallSiteIndex::new(0),
                x,
                EcmaMode::Strict,
                PutKind::Replace,
            )
        });
        let linked = Linker::new(&stack_maps, &structures)
            .link(&replace)
            .unwrap();
        assert_eq!(
            linked.report()[0].resolution,
            Resolution::Store {
                structure: S1,
                offset: 1
            }
        );
        let calls = Rc::new(Cell::new(None));
        let mut machine = machine_for(&options, S1, calls.clone());
        machine.state.set_value(regs.other, &value);
        assert_eq!(machine.run(linked.code(), 0), Ok(Exit::Returned));
        assert_eq!(
            machine.state.read64(slot_address(1)),
            value.encode_slot(options.representation)
        );
        assert_eq!(calls.get(), None);

        let define = single_site(options, |unit| {
            unit.create_put_by_id(
                StackMapId::new(1),
                CallSiteIndex::new(0),
                x,
                EcmaMode::Sloppy,
                PutKind::Define,
            )
        });
        let linked = Linker::new(&stack_maps, &structures).link(&define).unwrap();
        assert_eq!(
            linked.report()[0].resolution,
            Resolution::Transition {
                from: S1,
                to: S3,
                offset: 4
            }
        );
        let mut machine = machine_for(&options, S1, calls.clone());
        machine.state.set_value(regs.other, &value);
        assert_eq!(machine.run(linked.code(), 0), Ok(Exit::Returned));
        assert_eq!(machine.state.read32(OBJECT), S3.raw());
        assert_eq!(
            machine.state.read64(slot_address(4)),
            value.encode_slot(options.representation)
        );
        assert_eq!(calls.get(), None);

        let mut machine = machine_for(&options, S2, calls.clone());
        assert_eq!(machine.run(linked.code(), 0), Ok(Exit::Returned));
        assert_eq!(calls.get(), Some(SlowPathOperation::PutByIdDirectSloppy));
    }
}

#[test]
fn test_check_in_materializes_true() {
    for options in modes() {
        let mut keys = Interner::new();
        let x = keys.intern("x");
        let regs = site_regs(options.representation);
        let mut structures = TestStructures::default();
        structures.define(S1).property(S1, x, 0);
        let mut stack_maps = StackMapTable::new();
        stack_maps.record(
            StackMapId::new(5),
            StackMapSnapshot::new(regs.base, Gpr::new(9))
                .with_result(regs.other)
                .expecting(S1),
        );

        let unit = single_site(options, |unit| {
            unit.create_check_in(StackMapId::new(5), CallSiteIndex::new(1), x)
        });
        assert_eq!(unit.descriptors()[0].property_key(), None);
        let linked = Linker::new(&stack_maps, &structures).link(&unit).unwrap();
        assert_eq!(
            linked.report()[0].resolution,
            Resolution::Present { structure: S1 }
        );

        let calls = Rc::new(Cell::new(None));
        let mut machine = machine_for(&options, S1, calls.clone());
        assert_eq!(machine.run(linked.code(), 0), Ok(Exit::Returned));
        assert_eq!(
            machine.state.value_bits(regs.other),
            JsValue::Boolean(true).encode_slot(options.representation)
        );
        assert_eq!(calls.get(), None);
    }
}

#[test]
fn test_generators_are_linked_in_append_order() {
    let options = JitOptions::packed(false);
    let mut keys = Interner::new();
    let x = keys.intern("x");
    let regs = site_regs(options.representation);

    let mut unit = CompilationUnit::new(options);
    let mut masm = MacroAssembler::new();
    let ic = unit.create_get_by_id(StackMapId::new(2), CallSiteIndex::new(0), x);
    for _ in 0..3 {
        emit_inline_cache(&mut unit, &mut masm, ic);
        masm.nop();
    }
    masm.ret();
    assert_eq!(emit_slow_paths(&mut unit, &mut masm, ic).unwrap(), 3);
    let finished = unit.finish(masm).unwrap();

    let mut stack_maps = StackMapTable::new();
    stack_maps.record(
        StackMapId::new(2),
        StackMapSnapshot::new(regs.base, Gpr::new(9))
            .with_result(regs.other)
            .expecting(S1),
    );
    let mut structures = TestStructures::default();
    structures.define(S1).property(S1, x, 0);

    let linker = Linker::new(&stack_maps, &structures);
    let linked = linker.link(&finished).unwrap();
    let descriptor = &finished.descriptors()[0];
    let order: Vec<_> = linked
        .report()
        .iter()
        .map(|outcome| (outcome.generator, outcome.region))
        .collect();
    let expected: Vec<_> = descriptor
        .generators()
        .iter()
        .enumerate()
        .map(|(index, generator)| (index, generator.region))
        .collect();
    assert_eq!(order, expected);

    for (generator, exit) in descriptor.generators().iter().zip(descriptor.slow_path_done()) {
        assert_eq!(
            linked.code()[exit.position()].target(),
            Some(Some(generator.done))
        );
    }

    assert_eq!(linker.link(&finished).unwrap(), linked);
}

#[test]
fn test_missing_stack_map_is_an_error() {
    let mut keys = Interner::new();
    let x = keys.intern("x");
    let unit = single_site(JitOptions::packed(false), |unit| {
        unit.create_get_by_id(StackMapId::new(40), CallSiteIndex::new(0), x)
    });
    let err = Linker::new(&StackMapTable::new(), &TestStructures::default())
        .link(&unit)
        .unwrap_err();
    assert!(matches!(
        err,
        JitError::MissingStackMap { stack_map } if stack_map == StackMapId::new(40)
    ));
}

#[test]
fn test_exit_without_generator_is_unbalanced() {
    let mut keys = Interner::new();
    let mut unit = CompilationUnit::new(JitOptions::packed(false));
    let mut masm = MacroAssembler::new();
    let ic = unit.create_get_by_id(StackMapId::new(0), CallSiteIndex::new(0), keys.intern("x"));
    let stray = masm.jump();
    unit.append_slow_path_exit(ic, stray);
    let finished = unit.finish(masm).unwrap();

    let err = Linker::new(&StackMapTable::new(), &TestStructures::default())
        .link(&finished)
        .unwrap_err();
    assert!(matches!(
        err,
        JitError::UnbalancedSlowPathExits {
            generators: 0,
            exits: 1,
            ..
        }
    ));
}

#[test]
fn test_worker_hands_off_finished_units() {
    let options = JitOptions::packed(false);
    let mut keys = Interner::new();
    let x = keys.intern("x");
    let regs = site_regs(options.representation);

    let worker = CompileWorker::spawn(options).unwrap();
    worker
        .submit(1, move |unit, masm| {
            let ic = unit.create_get_by_id(StackMapId::new(3), CallSiteIndex::new(0), x);
            emit_inline_cache(unit, masm, ic);
            masm.ret();
            emit_slow_paths(unit, masm, ic)?;
            Ok(())
        })
        .unwrap();
    let unit = match worker.recv().unwrap() {
        CompileResult::Finished { unit_id: 1, unit } => unit,
        other => panic!("unexpected result {other:?}"),
    };

    let mut stack_maps = StackMapTable::new();
    stack_maps.record(
        StackMapId::new(3),
        StackMapSnapshot::new(regs.base, Gpr::new(9))
            .with_result(regs.other)
            .expecting(S1),
    );
    let mut structures = TestStructures::default();
    structures.define(S1).property(S1, x, 3);
    let linked = Linker::new(&stack_maps, &structures).link(&unit).unwrap();
    assert_eq!(
        linked.report()[0].resolution,
        Resolution::Load {
            structure: S1,
            offset: 3
        }
    );
}

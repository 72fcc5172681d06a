//! Collection behavior observable through the host API.

use std::rc::Rc;

use ember_bytecode::{Instruction, Op};
use ember_core::{Function, ScriptError, Value};
use ember_vm::{Vm, VmConfig};

#[test]
fn test_forced_collection_counts_garbage() {
    let mut vm = Vm::new();
    let kept = vm.table_new();
    vm.global_set("kept", Value::Table(kept));

    const GARBAGE: usize = 25;
    for _ in 0..GARBAGE {
        vm.table_new();
    }

    let stats = vm.gc_run();
    assert_eq!(stats.dead_objects, GARBAGE);
    assert_eq!(stats.live_objects, 1);
    assert!(stats.bytes_freed > 0);
    assert_eq!(vm.table_len(kept).unwrap(), 0);
}

#[test]
fn test_collected_handle_becomes_stale() {
    let mut vm = Vm::new();
    let t = vm.table_new();
    let key = Value::Str(vm.intern("k"));
    vm.table_set(t, &key, Value::Number(1.0)).unwrap();

    vm.gc_run();

    assert!(matches!(
        vm.table_get(t, &key),
        Err(ScriptError::Index(_))
    ));
    assert!(matches!(
        vm.table_set(t, &key, Value::Nil),
        Err(ScriptError::Index(_))
    ));
}

#[test]
fn test_low_threshold_triggers_collection_during_run() {
    let mut vm = Vm::with_config(VmConfig {
        gc_threshold: 1,
        ..VmConfig::default()
    });

    // Allocate five tables and drop each immediately.
    let proto = Rc::new(Function::new(None, 0, vec![
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Pop),
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Pop),
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Pop),
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Pop),
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Pop),
        Instruction::new(Op::PushNil),
        Instruction::with_a(Op::Return, 1),
    ]));

    vm.run(proto).unwrap();
    assert!(vm.gc_stats().gc_runs >= 1);
}

#[test]
fn test_table_on_stack_survives_triggered_collection() {
    let mut vm = Vm::with_config(VmConfig {
        gc_threshold: 1,
        ..VmConfig::default()
    });
    let key = vm.intern("x");

    // The first table stays on the stack while later allocations
    // force collections; its contents must survive.
    let mut proto = Function::new(None, 0, vec![
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Dup),
        Instruction::with_b(Op::PushString, 0),
        Instruction::with_b(Op::PushNumber, 1),
        Instruction::new(Op::SetField),
        Instruction::new(Op::Pop),
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Pop),
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Pop),
        Instruction::with_b(Op::PushString, 0),
        Instruction::new(Op::GetField),
        Instruction::with_a(Op::Return, 1),
    ]);
    proto.constants = vec![Value::Str(key), Value::Number(5.0)];

    assert_eq!(vm.run(Rc::new(proto)).unwrap(), Value::Number(5.0));
}

#[test]
fn test_field_growth_triggers_collection_without_new_allocations() {
    let mut vm = Vm::with_config(VmConfig {
        gc_threshold: 2048,
        ..VmConfig::default()
    });

    // One table, then enough stores to push table bytes past the
    // threshold with no further allocations.
    let mut code = vec![Instruction::new(Op::NewTable)];
    let mut constants = Vec::new();
    for i in 0..200u16 {
        code.push(Instruction::new(Op::Dup));
        code.push(Instruction::with_b(Op::PushNumber, i * 2));
        code.push(Instruction::with_b(Op::PushNumber, i * 2 + 1));
        code.push(Instruction::new(Op::SetField));
        code.push(Instruction::new(Op::Pop));
        constants.push(Value::Number(i as f64));
        constants.push(Value::Number(i as f64 + 1.0));
    }
    code.push(Instruction::with_b(Op::PushNumber, 0));
    code.push(Instruction::new(Op::GetField));
    code.push(Instruction::with_a(Op::Return, 1));

    let mut proto = Function::new(None, 0, code);
    proto.constants = constants;

    assert_eq!(vm.run(Rc::new(proto)).unwrap(), Value::Number(1.0));
    assert!(vm.gc_stats().gc_runs >= 1);
}

#[test]
fn test_pause_suppresses_triggered_collections() {
    let mut vm = Vm::with_config(VmConfig {
        gc_threshold: 1,
        ..VmConfig::default()
    });

    let churn = Rc::new(Function::new(None, 0, vec![
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Pop),
        Instruction::new(Op::NewTable),
        Instruction::new(Op::Pop),
        Instruction::new(Op::PushNil),
        Instruction::with_a(Op::Return, 1),
    ]));

    vm.gc_pause();
    vm.run(churn.clone()).unwrap();
    assert_eq!(vm.gc_stats().gc_runs, 0);

    // An explicit run still collects while paused.
    let stats = vm.gc_run();
    assert_eq!(stats.gc_runs, 1);

    vm.gc_resume();
    vm.run(churn).unwrap();
    assert!(vm.gc_stats().gc_runs >= 2);
}

#[test]
fn test_globals_anchor_tables_across_collections() {
    let mut vm = Vm::new();
    let t = vm.table_new();
    vm.bind_table("state", t);
    let key = Value::Str(vm.intern("lives"));
    vm.table_set(t, &key, Value::Number(3.0)).unwrap();

    for _ in 0..3 {
        vm.table_new();
        vm.gc_run();
    }

    assert_eq!(vm.table_get(t, &key).unwrap(), Value::Number(3.0));
    assert_eq!(vm.gc_stats().gc_runs, 3);
}

#[test]
fn test_nested_tables_survive_through_root() {
    let mut vm = Vm::new();
    let root = vm.table_new();
    vm.global_set("root", Value::Table(root));

    // Build a chain root -> a -> b and collect.
    let a = vm.table_new();
    let b = vm.table_new();
    let ka = Value::Str(vm.intern("a"));
    let kb = Value::Str(vm.intern("b"));
    vm.table_set(root, &ka, Value::Table(a)).unwrap();
    vm.table_set(a, &kb, Value::Table(b)).unwrap();

    let stats = vm.gc_run();
    assert_eq!(stats.live_objects, 3);
    assert_eq!(vm.table_len(b).unwrap(), 0);
}

#[test]
fn test_stats_include_string_bytes() {
    let mut vm = Vm::new();
    let _held = vm.intern("a-reasonably-long-interned-string");
    assert!(vm.gc_stats().bytes_allocated > 0);
}

#[test]
fn test_collection_updates_byte_accounting() {
    let mut vm = Vm::new();
    let t = vm.table_new();
    vm.global_set("t", Value::Table(t));
    for i in 0..200 {
        let key = Value::Str(vm.intern(&format!("k{}", i)));
        vm.table_set(t, &key, Value::Number(i as f64)).unwrap();
    }
    let grown = vm.gc_stats().bytes_allocated;

    vm.global_set("t", Value::Nil);
    let after = vm.gc_run();
    assert!(after.bytes_allocated < grown);
    assert!(after.bytes_freed > 0);
    assert_eq!(after.live_objects, 0);
}

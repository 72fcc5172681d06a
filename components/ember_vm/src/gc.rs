//! Mark-sweep collection over tables and interned strings.
//!
//! Roots are the operand stack, globals, active frames, open upvalues,
//! and the native registry. Tables are traced through the heap's mark
//! bits; strings carry their own mark bit and are swept out of the
//! interner when nothing reached them and the interner holds the last
//! reference. Reclaimed table slots get a new generation, which is how
//! host-held handles to dead tables become visibly stale.

use std::collections::HashSet;
use std::rc::Rc;
use std::time::Instant;

use ember_core::{Closure, TableHandle, Upvalue, Value};
use ember_memory::{GcStats, Heap};

use crate::vm::Vm;

/// Tracing worklists. Tables queue by handle once their mark bit is
/// newly set; closures queue by pointer with a seen set, since closed
/// upvalues can make them cyclic.
#[derive(Default)]
struct Tracer {
    tables: Vec<TableHandle>,
    closures: Vec<Rc<Closure>>,
    seen_closures: HashSet<*const Closure>,
}

impl Tracer {
    fn trace_value(&mut self, value: &Value, heap: &mut Heap) {
        match value {
            Value::Str(s) | Value::Native(s) => s.mark(),
            Value::Table(handle) => {
                if heap.mark(*handle) {
                    self.tables.push(*handle);
                }
            }
            Value::Function(closure) => self.closures.push(closure.clone()),
            Value::Coroutine(co) => self.closures.push(co.borrow().closure.clone()),
            Value::Nil | Value::Boolean(_) | Value::Number(_) | Value::Userdata(_) => {}
        }
    }
}

impl Vm {
    /// Run a full collection and return the updated statistics.
    pub fn gc_run(&mut self) -> GcStats {
        let start = Instant::now();

        self.strings.clear_marks();
        self.heap.clear_marks();

        let mut tracer = Tracer::default();

        for value in &self.stack {
            tracer.trace_value(value, &mut self.heap);
        }
        for frame in &self.frames {
            tracer.closures.push(frame.closure.clone());
        }
        {
            let mut entries = Vec::new();
            self.globals.for_each(|key, value| {
                key.mark();
                entries.push(value.clone());
            });
            for value in &entries {
                tracer.trace_value(value, &mut self.heap);
            }
        }
        for handle in self.open_upvalues.values() {
            // Open upvalues watch stack slots already traced above;
            // a closed one holding a value can still sit in the map
            // after an unwind.
            if let Upvalue::Closed(value) = &*handle.borrow() {
                tracer.trace_value(value, &mut self.heap);
            }
        }
        for name in self.natives.keys() {
            name.mark();
        }

        // Drain both worklists to a fixpoint.
        loop {
            if let Some(handle) = tracer.tables.pop() {
                let mut entries = Vec::new();
                if let Some(table) = self.heap.get(handle) {
                    table.for_each(|key, value| {
                        key.mark();
                        entries.push(value.clone());
                    });
                }
                for value in &entries {
                    tracer.trace_value(value, &mut self.heap);
                }
            } else if let Some(closure) = tracer.closures.pop() {
                if !tracer.seen_closures.insert(Rc::as_ptr(&closure)) {
                    continue;
                }
                if let Some(name) = &closure.proto.name {
                    name.mark();
                }
                for constant in &closure.proto.constants {
                    tracer.trace_value(constant, &mut self.heap);
                }
                for upvalue in &closure.upvalues {
                    if let Upvalue::Closed(value) = &*upvalue.borrow() {
                        tracer.trace_value(value, &mut self.heap);
                    }
                }
            } else {
                break;
            }
        }

        let (dead_strings, string_bytes) = self.strings.sweep_unmarked();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.heap.sweep(elapsed_ms);
        self.heap.note_external_free(dead_strings, string_bytes);

        self.gc_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::ScriptError;

    #[test]
    fn test_unreachable_tables_are_collected() {
        let mut vm = Vm::new();
        let kept = vm.table_new();
        vm.global_set("kept", Value::Table(kept));
        for _ in 0..10 {
            vm.table_new();
        }

        let stats = vm.gc_run();
        assert_eq!(stats.live_objects, 1);
        assert_eq!(stats.dead_objects, 10);
        assert_eq!(stats.gc_runs, 1);
        assert!(vm.table_len(kept).is_ok());
    }

    #[test]
    fn test_tables_reachable_through_tables_survive() {
        let mut vm = Vm::new();
        let outer = vm.table_new();
        let inner = vm.table_new();
        let key = Value::Str(vm.intern("inner"));
        vm.table_set(outer, &key, Value::Table(inner)).unwrap();
        vm.global_set("outer", Value::Table(outer));

        vm.gc_run();
        assert!(vm.table_len(inner).is_ok());
    }

    #[test]
    fn test_stack_values_are_roots() {
        let mut vm = Vm::new();
        let t = vm.table_new();
        vm.push(Value::Table(t)).unwrap();

        vm.gc_run();
        assert!(vm.table_len(t).is_ok());

        vm.pop().unwrap();
        vm.gc_run();
        assert!(matches!(vm.table_len(t), Err(ScriptError::Index(_))));
    }

    #[test]
    fn test_unreferenced_strings_are_evicted() {
        let mut vm = Vm::new();
        {
            let _temp = vm.intern("transient");
        }
        let durable = vm.intern("durable");
        vm.global_set("name", Value::Str(durable));

        let before = vm.gc_run();
        // "transient" was reclaimed; the global key "name" and the
        // value "durable" both survived.
        assert!(vm.strings.get("transient").is_none());
        assert!(vm.strings.get("durable").is_some());
        assert!(before.bytes_freed > 0);
    }

    #[test]
    fn test_host_held_strings_survive_unmarked() {
        let mut vm = Vm::new();
        let held = vm.intern("host-held");
        vm.gc_run();
        let again = vm.intern("host-held");
        assert!(held.ptr_eq(&again));
    }

    #[test]
    fn test_gc_time_accumulates() {
        let mut vm = Vm::new();
        vm.gc_run();
        vm.gc_run();
        assert_eq!(vm.gc_stats().gc_runs, 2);
    }
}

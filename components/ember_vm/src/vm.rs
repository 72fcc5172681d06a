//! The virtual machine and its host embedding API.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use ember_core::{
    new_upvalue_handle, Closure, Coroutine, CoroutineState, Function, InternedStr, Interner,
    ScriptError, Table, TableHandle, Upvalue, UpvalueHandle, Value,
};
use ember_memory::{GcStats, Heap};

use crate::compiler::ScriptCompiler;
use crate::config::VmConfig;
use crate::frame::Frame;
use crate::jit::JitBackend;
use crate::profile::OpcodeProfile;

/// A host function callable from scripts.
///
/// Arguments arrive popped off the operand stack; the returned value is
/// pushed in their place. Errors unwind the current run.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, ScriptError>;

/// Snapshot handed to the debug hook when a breakpoint fires.
#[derive(Debug, Clone, Copy)]
pub struct DebugEvent {
    /// Instruction index of the breakpoint within its function
    pub ip: usize,
    /// Call frames currently active
    pub frame_depth: usize,
    /// Operand stack height
    pub stack_depth: usize,
}

/// A script virtual machine.
///
/// Owns the operand stack, call frames, globals, interned strings, and
/// the table heap. One `Vm` is one isolated script world; nothing is
/// shared between instances.
pub struct Vm {
    pub(crate) config: VmConfig,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) globals: Table,
    pub(crate) strings: Interner,
    pub(crate) heap: Heap,
    pub(crate) natives: HashMap<InternedStr, NativeFn>,
    /// Open upvalues keyed by the absolute stack slot they watch
    pub(crate) open_upvalues: BTreeMap<usize, UpvalueHandle>,
    pub(crate) compiler: Option<Box<dyn ScriptCompiler>>,
    pub(crate) jit: Option<Box<dyn JitBackend>>,
    pub(crate) profile: Option<OpcodeProfile>,
    pub(crate) debug_hook: Option<Box<dyn FnMut(&DebugEvent)>>,
    pub(crate) last_error: Option<ScriptError>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Create a VM with default configuration.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Create a VM with explicit configuration.
    pub fn with_config(config: VmConfig) -> Self {
        let profile = config.enable_profiling.then(OpcodeProfile::new);
        let heap = Heap::new(config.gc_threshold);
        Self {
            stack: Vec::with_capacity(config.stack_size.min(1024)),
            frames: Vec::with_capacity(config.frame_stack_size),
            globals: Table::new(),
            strings: Interner::new(),
            heap,
            natives: HashMap::new(),
            open_upvalues: BTreeMap::new(),
            compiler: None,
            jit: None,
            profile,
            debug_hook: None,
            last_error: None,
            config,
        }
    }

    /// The configuration this VM was built with.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Install the source compiler used by [`Vm::eval`].
    pub fn set_compiler(&mut self, compiler: Box<dyn ScriptCompiler>) {
        self.compiler = Some(compiler);
    }

    /// Install the backend that receives hot functions.
    pub fn set_jit_backend(&mut self, backend: Box<dyn JitBackend>) {
        self.jit = Some(backend);
    }

    /// Install a hook invoked whenever a breakpoint executes.
    pub fn set_debug_hook(&mut self, hook: Box<dyn FnMut(&DebugEvent)>) {
        self.debug_hook = Some(hook);
    }

    /// Remove the debug hook.
    pub fn clear_debug_hook(&mut self) {
        self.debug_hook = None;
    }

    // ---- execution ------------------------------------------------

    /// Compile and run a chunk of source text.
    ///
    /// Requires a compiler installed via [`Vm::set_compiler`]; the
    /// chunk compiles to a zero-arity function which then runs to
    /// completion. The operand stack is exactly as deep afterwards as
    /// it was before.
    pub fn eval(&mut self, source: &str) -> Result<Value, ScriptError> {
        self.eval_named(source, "<eval>")
    }

    /// Compile and run a chunk of source text under a host-chosen
    /// chunk name, which the compiler receives for diagnostics.
    pub fn eval_named(&mut self, source: &str, name: &str) -> Result<Value, ScriptError> {
        let mut compiler = match self.compiler.take() {
            Some(compiler) => compiler,
            None => {
                let err = ScriptError::Compile {
                    message: "no compiler installed".to_string(),
                    line: 0,
                };
                self.last_error = Some(err.clone());
                return Err(err);
            }
        };
        let compiled = compiler.compile(source, name, &mut self.strings);
        self.compiler = Some(compiler);

        match compiled {
            Ok(proto) => self.run(proto),
            Err(err) => {
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Run a compiled zero-arity function to completion.
    pub fn run(&mut self, proto: Rc<Function>) -> Result<Value, ScriptError> {
        let closure = Rc::new(Closure::new(proto));
        self.call(Value::Function(closure), &[])
    }

    /// Call a callable value with arguments and return its result.
    ///
    /// Works for closures and bound natives, and may be re-entered
    /// from inside a native. On error the stack and frames are
    /// restored to their height at entry and the error is retained
    /// for [`Vm::last_error`].
    pub fn call(&mut self, callee: Value, args: &[Value]) -> Result<Value, ScriptError> {
        let stack_floor = self.stack.len();
        let frame_floor = self.frames.len();

        let result = self.call_inner(callee, args, frame_floor);
        if let Err(err) = &result {
            self.last_error = Some(err.clone());
            self.close_upvalues(stack_floor);
            self.frames.truncate(frame_floor);
            self.stack.truncate(stack_floor);
        }
        result
    }

    fn call_inner(
        &mut self,
        callee: Value,
        args: &[Value],
        frame_floor: usize,
    ) -> Result<Value, ScriptError> {
        self.push(callee)?;
        for arg in args {
            self.push(arg.clone())?;
        }
        let argc = u8::try_from(args.len())
            .map_err(|_| ScriptError::Capacity("too many call arguments".to_string()))?;

        if self.call_value(argc)? {
            self.run_loop(frame_floor)
        } else {
            // A native ran to completion and left its result on top.
            self.pop()
        }
    }

    /// Set up a call to the value sitting below `argc` arguments.
    ///
    /// Returns `true` when a frame was pushed and the interpreter must
    /// run it, `false` when a native already completed and pushed its
    /// result.
    pub(crate) fn call_value(&mut self, argc: u8) -> Result<bool, ScriptError> {
        let callee_index = self
            .stack
            .len()
            .checked_sub(argc as usize + 1)
            .ok_or_else(ScriptError::stack_underflow)?;

        match self.stack[callee_index].clone() {
            Value::Function(closure) => {
                if closure.proto.arity != argc {
                    return Err(ScriptError::Arity {
                        expected: closure.proto.arity,
                        got: argc,
                    });
                }
                if self.frames.len() >= self.config.frame_stack_size {
                    return Err(ScriptError::frame_overflow());
                }
                self.maybe_compile_hot(&closure.proto)?;
                self.frames.push(Frame::new(closure, callee_index));
                Ok(true)
            }
            Value::Native(name) => {
                let native = *self.natives.get(&name).ok_or_else(|| {
                    ScriptError::Dispatch(format!("unbound native function '{}'", name))
                })?;
                let args: Vec<Value> = self.stack.split_off(callee_index + 1);
                self.stack.truncate(callee_index);
                let result = native(self, &args)?;
                self.push(result)?;
                Ok(false)
            }
            other => Err(ScriptError::Type(format!(
                "cannot call a {}",
                other.type_name()
            ))),
        }
    }

    /// Count the call and hand the function to the JIT backend once
    /// it crosses the hotness threshold.
    fn maybe_compile_hot(&mut self, proto: &Rc<Function>) -> Result<(), ScriptError> {
        let count = proto.record_call();
        if self.config.enable_jit && count >= self.config.jit_threshold && !proto.has_jit_code() {
            if let Some(backend) = self.jit.as_mut() {
                let handle = backend.compile(proto)?;
                proto.cache_jit_code(handle);
            }
        }
        Ok(())
    }

    // ---- operand stack --------------------------------------------

    /// Push a value onto the operand stack.
    pub fn push(&mut self, value: Value) -> Result<(), ScriptError> {
        if self.stack.len() >= self.config.stack_size {
            return Err(ScriptError::stack_overflow());
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop the top value off the operand stack.
    pub fn pop(&mut self) -> Result<Value, ScriptError> {
        self.stack.pop().ok_or_else(ScriptError::stack_underflow)
    }

    /// Look at a value without popping; depth 0 is the top.
    pub fn peek(&self, depth: usize) -> Result<&Value, ScriptError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(ScriptError::stack_underflow)
    }

    /// Current operand stack height.
    pub fn get_top(&self) -> usize {
        self.stack.len()
    }

    /// Force the operand stack to a height, truncating or padding
    /// with nil.
    pub fn set_top(&mut self, top: usize) -> Result<(), ScriptError> {
        if top > self.config.stack_size {
            return Err(ScriptError::stack_overflow());
        }
        if top < self.stack.len() {
            self.close_upvalues(top);
            self.stack.truncate(top);
        } else {
            self.stack.resize(top, Value::Nil);
        }
        Ok(())
    }

    // ---- globals and natives --------------------------------------

    /// Read a global, nil when unset.
    pub fn global_get(&self, name: &str) -> Value {
        match self.strings.get(name) {
            Some(key) => self.globals.get(&key).cloned().unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    /// Write a global.
    pub fn global_set(&mut self, name: &str, value: Value) {
        let key = self.strings.intern(name);
        self.globals.set(key, value);
    }

    /// Register a native function and expose it as a global.
    pub fn bind_native(&mut self, name: &str, native: NativeFn) {
        let key = self.strings.intern(name);
        self.natives.insert(key.clone(), native);
        self.globals.set(key.clone(), Value::Native(key));
    }

    /// Expose a heap table as a global.
    pub fn bind_table(&mut self, name: &str, handle: TableHandle) {
        let key = self.strings.intern(name);
        self.globals.set(key, Value::Table(handle));
    }

    // ---- strings --------------------------------------------------

    /// Intern a string in this VM's string table.
    pub fn intern(&mut self, s: &str) -> InternedStr {
        self.strings.intern(s)
    }

    // ---- tables ---------------------------------------------------

    /// Allocate a fresh empty table, collecting first if the heap has
    /// crossed its threshold.
    pub fn table_new(&mut self) -> TableHandle {
        self.collect_if_needed();
        self.heap.alloc_table(Table::new())
    }

    /// Read `table[key]`, nil when absent. Fails on stale handles and
    /// non-scalar keys.
    pub fn table_get(&self, handle: TableHandle, key: &Value) -> Result<Value, ScriptError> {
        let key = self.lookup_key(key)?;
        let table = self.resolve(handle)?;
        Ok(key
            .and_then(|key| table.get(&key).cloned())
            .unwrap_or(Value::Nil))
    }

    /// Write `table[key]`. Returns `true` when the key was new.
    pub fn table_set(
        &mut self,
        handle: TableHandle,
        key: &Value,
        value: Value,
    ) -> Result<bool, ScriptError> {
        let key = self.intern_key(key)?;
        let table = self
            .heap
            .get_mut(handle)
            .ok_or_else(|| stale_handle(handle))?;
        let before = table.heap_size();
        let fresh = table.set(key, value);
        let after = table.heap_size();
        self.heap.add_bytes(after.saturating_sub(before));
        Ok(fresh)
    }

    /// Remove `table[key]`. Returns `true` when the key was present.
    pub fn table_remove(&mut self, handle: TableHandle, key: &Value) -> Result<bool, ScriptError> {
        let key = self.lookup_key(key)?;
        let table = self
            .heap
            .get_mut(handle)
            .ok_or_else(|| stale_handle(handle))?;
        Ok(match key {
            Some(key) => table.remove(&key),
            None => false,
        })
    }

    /// Whether `table[key]` is set.
    pub fn table_has(&self, handle: TableHandle, key: &Value) -> Result<bool, ScriptError> {
        let key = self.lookup_key(key)?;
        let table = self.resolve(handle)?;
        Ok(key.map(|key| table.has(&key)).unwrap_or(false))
    }

    /// Number of entries in a table.
    pub fn table_len(&self, handle: TableHandle) -> Result<usize, ScriptError> {
        Ok(self.resolve(handle)?.len())
    }

    fn resolve(&self, handle: TableHandle) -> Result<&Table, ScriptError> {
        self.heap.get(handle).ok_or_else(|| stale_handle(handle))
    }

    fn check_key_type(key: &Value) -> Result<(), ScriptError> {
        match key {
            Value::Nil | Value::Boolean(_) | Value::Number(_) | Value::Str(_) => Ok(()),
            other => Err(ScriptError::Type(format!(
                "a {} cannot be a table key",
                other.type_name()
            ))),
        }
    }

    /// Normalize a key value to its interned printed form.
    ///
    /// This is where `t[1]` and `t["1"]` become the same slot: every
    /// scalar key goes through its display string before interning.
    pub(crate) fn intern_key(&mut self, key: &Value) -> Result<InternedStr, ScriptError> {
        Self::check_key_type(key)?;
        match key {
            Value::Str(s) => Ok(s.clone()),
            other => Ok(self.strings.intern(&other.to_string())),
        }
    }

    /// Key normalization for lookups: does not intern, so a key whose
    /// printed form was never interned is simply absent.
    pub(crate) fn lookup_key(&self, key: &Value) -> Result<Option<InternedStr>, ScriptError> {
        Self::check_key_type(key)?;
        match key {
            Value::Str(s) => Ok(Some(s.clone())),
            other => Ok(self.strings.get(&other.to_string())),
        }
    }

    // ---- upvalues -------------------------------------------------

    /// Reuse or create the open upvalue watching a stack slot.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> UpvalueHandle {
        self.open_upvalues
            .entry(slot)
            .or_insert_with(|| new_upvalue_handle(slot))
            .clone()
    }

    /// Close every open upvalue at or above a stack slot, migrating
    /// the watched values into the upvalues themselves.
    pub(crate) fn close_upvalues(&mut self, from_slot: usize) {
        let closing = self.open_upvalues.split_off(&from_slot);
        for (slot, handle) in closing {
            let value = self.stack.get(slot).cloned().unwrap_or(Value::Nil);
            *handle.borrow_mut() = Upvalue::Closed(value);
        }
    }

    // ---- garbage collection ---------------------------------------

    pub(crate) fn collect_if_needed(&mut self) {
        if self.heap.should_collect() {
            self.gc_run();
        }
    }

    /// Collector statistics, including interned string bytes.
    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats_with_extra_bytes(self.strings.heap_size())
    }

    /// Suppress automatic collections until a matching
    /// [`Vm::gc_resume`]. Useful while the host holds unrooted
    /// handles. Explicit [`Vm::gc_run`] calls still collect.
    pub fn gc_pause(&mut self) {
        self.heap.pause();
    }

    /// Undo one [`Vm::gc_pause`].
    pub fn gc_resume(&mut self) {
        self.heap.resume();
    }

    // ---- coroutines -----------------------------------------------

    /// Wrap a closure in a suspended coroutine value.
    ///
    /// Coroutines cannot yet run; resuming one from bytecode is a
    /// dispatch error. Creation and status queries exist so hosts can
    /// build against the surface.
    pub fn coroutine_create(&mut self, function: Value) -> Result<Value, ScriptError> {
        match function {
            Value::Function(closure) => Ok(Value::Coroutine(Rc::new(RefCell::new(
                Coroutine::new(closure),
            )))),
            other => Err(ScriptError::Type(format!(
                "cannot make a coroutine from a {}",
                other.type_name()
            ))),
        }
    }

    /// Lifecycle state of a coroutine value.
    pub fn coroutine_status(&self, value: &Value) -> Result<CoroutineState, ScriptError> {
        match value {
            Value::Coroutine(co) => Ok(co.borrow().state),
            other => Err(ScriptError::Type(format!(
                "expected a coroutine, got a {}",
                other.type_name()
            ))),
        }
    }

    // ---- diagnostics ----------------------------------------------

    /// The most recent execution or compile error, until the next
    /// successful reset.
    pub fn last_error(&self) -> Option<&ScriptError> {
        self.last_error.as_ref()
    }

    /// The opcode profile, present when profiling is enabled.
    pub fn profile(&self) -> Option<&OpcodeProfile> {
        self.profile.as_ref()
    }

    /// Discard all transient run state.
    ///
    /// Clears the operand stack, frames, open upvalues, and the last
    /// error. Globals, natives, interned strings, and the heap are
    /// kept, so a VM that hit a runtime error is reusable afterwards.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.last_error = None;
    }
}

fn stale_handle(handle: TableHandle) -> ScriptError {
    ScriptError::Index(format!("stale table handle {}", handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_peek() {
        let mut vm = Vm::new();
        vm.push(Value::Number(1.0)).unwrap();
        vm.push(Value::Number(2.0)).unwrap();

        assert_eq!(vm.get_top(), 2);
        assert_eq!(vm.peek(0).unwrap(), &Value::Number(2.0));
        assert_eq!(vm.peek(1).unwrap(), &Value::Number(1.0));
        assert_eq!(vm.pop().unwrap(), Value::Number(2.0));
        assert_eq!(vm.get_top(), 1);
    }

    #[test]
    fn test_stack_underflow() {
        let mut vm = Vm::new();
        assert!(matches!(vm.pop(), Err(ScriptError::Capacity(_))));
        assert!(matches!(vm.peek(0), Err(ScriptError::Capacity(_))));
    }

    #[test]
    fn test_stack_overflow_respects_config() {
        let mut vm = Vm::with_config(VmConfig {
            stack_size: 2,
            ..VmConfig::default()
        });
        vm.push(Value::Nil).unwrap();
        vm.push(Value::Nil).unwrap();
        assert!(matches!(
            vm.push(Value::Nil),
            Err(ScriptError::Capacity(_))
        ));
    }

    #[test]
    fn test_set_top_pads_and_truncates() {
        let mut vm = Vm::new();
        vm.set_top(3).unwrap();
        assert_eq!(vm.get_top(), 3);
        assert_eq!(vm.peek(0).unwrap(), &Value::Nil);

        vm.push(Value::Number(9.0)).unwrap();
        vm.set_top(1).unwrap();
        assert_eq!(vm.get_top(), 1);
    }

    #[test]
    fn test_globals_roundtrip() {
        let mut vm = Vm::new();
        assert_eq!(vm.global_get("missing"), Value::Nil);

        vm.global_set("hp", Value::Number(100.0));
        assert_eq!(vm.global_get("hp"), Value::Number(100.0));

        vm.global_set("hp", Value::Nil);
        assert_eq!(vm.global_get("hp"), Value::Nil);
    }

    #[test]
    fn test_table_key_coercion() {
        let mut vm = Vm::new();
        let t = vm.table_new();

        // Numeric and string keys with the same printed form alias.
        vm.table_set(t, &Value::Number(1.0), Value::Number(10.0))
            .unwrap();
        let key = Value::Str(vm.intern("1"));
        assert_eq!(vm.table_get(t, &key).unwrap(), Value::Number(10.0));

        assert!(matches!(
            vm.table_set(t, &Value::Table(t), Value::Nil),
            Err(ScriptError::Type(_))
        ));
    }

    #[test]
    fn test_stale_handle_is_an_error() {
        let mut vm = Vm::new();
        let t = vm.table_new();
        vm.gc_run();
        assert!(matches!(
            vm.table_get(t, &Value::Number(0.0)),
            Err(ScriptError::Index(_))
        ));
    }

    #[test]
    fn test_coroutine_surface() {
        let mut vm = Vm::new();
        let proto = Rc::new(Function::new(None, 0, Vec::new()));
        let f = Value::Function(Rc::new(Closure::new(proto)));

        let co = vm.coroutine_create(f).unwrap();
        assert_eq!(
            vm.coroutine_status(&co).unwrap(),
            CoroutineState::Suspended
        );
        assert!(vm.coroutine_create(Value::Nil).is_err());
        assert!(vm.coroutine_status(&Value::Nil).is_err());
    }
}

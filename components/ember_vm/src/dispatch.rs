//! The bytecode dispatch loop.

use std::rc::Rc;
use std::time::Instant;

use ember_bytecode::{Instruction, Op};
use ember_core::{Closure, InternedStr, ScriptError, Table, Upvalue, UpvalueHandle, Value};

use crate::frame::Frame;
use crate::vm::{DebugEvent, Vm};

/// What a single instruction did to the control flow.
enum Step {
    /// Fall through to the next instruction
    Continue,
    /// The current frame returned with this value
    Returned(Value),
}

impl Vm {
    /// Run frames until the frame stack drops back to `frame_floor`.
    ///
    /// The result of the frame that brings the stack back to the floor
    /// is returned to the caller rather than pushed, so a completed
    /// run leaves the operand stack at its entry height.
    ///
    /// Each iteration notifies the debug hook before the fetch and
    /// checks the collection trigger after the instruction, so growth
    /// from any instruction (field writes, concatenation) can start a
    /// collection, not just fresh table allocations.
    pub(crate) fn run_loop(&mut self, frame_floor: usize) -> Result<Value, ScriptError> {
        loop {
            self.notify_debug_hook();

            let timer = self.profile.as_ref().map(|_| Instant::now());
            let instruction = self.fetch()?;

            let step = self.step(instruction)?;

            if let (Some(timer), Some(profile)) = (timer, self.profile.as_mut()) {
                profile.record(instruction.op, timer.elapsed().as_nanos() as u64);
            }

            // Re-root a returned value before any collection can run.
            if let Step::Returned(value) = step {
                if self.frames.len() == frame_floor {
                    return Ok(value);
                }
                self.push(value)?;
            }
            self.collect_if_needed();
        }
    }

    /// Hand the debug hook a snapshot of the instruction about to
    /// execute.
    fn notify_debug_hook(&mut self) {
        if self.debug_hook.is_none() {
            return;
        }
        let ip = match self.frames.last() {
            Some(frame) => frame.ip,
            None => return,
        };
        let event = DebugEvent {
            ip,
            frame_depth: self.frames.len(),
            stack_depth: self.stack.len(),
        };
        if let Some(hook) = self.debug_hook.as_mut() {
            hook(&event);
        }
    }

    fn fetch(&mut self) -> Result<Instruction, ScriptError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| ScriptError::Dispatch("no active frame".to_string()))?;
        let instruction = frame
            .closure
            .proto
            .code
            .get(frame.ip)
            .copied()
            .ok_or_else(|| {
                ScriptError::Dispatch("execution ran past the end of the function".to_string())
            })?;
        frame.ip += 1;
        Ok(instruction)
    }

    fn frame(&self) -> Result<&Frame, ScriptError> {
        self.frames
            .last()
            .ok_or_else(|| ScriptError::Dispatch("no active frame".to_string()))
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, ScriptError> {
        self.frames
            .last_mut()
            .ok_or_else(|| ScriptError::Dispatch("no active frame".to_string()))
    }

    /// Fetch a constant from the executing function's pool.
    fn constant(&self, index: u16) -> Result<Value, ScriptError> {
        let frame = self.frame()?;
        frame
            .closure
            .proto
            .constants
            .get(index as usize)
            .cloned()
            .ok_or_else(|| ScriptError::Index(format!("constant index {} out of range", index)))
    }

    /// Fetch a constant that must name something.
    fn name_constant(&self, index: u16) -> Result<InternedStr, ScriptError> {
        match self.constant(index)? {
            Value::Str(name) => Ok(name),
            other => Err(ScriptError::Dispatch(format!(
                "name constant is a {}, not a string",
                other.type_name()
            ))),
        }
    }

    fn pop_number(&mut self, op: &str) -> Result<f64, ScriptError> {
        let value = self.pop()?;
        value.as_number().ok_or_else(|| {
            ScriptError::Type(format!("{} expects a number, got a {}", op, value.type_name()))
        })
    }

    fn binary_numbers(&mut self, op: &str) -> Result<(f64, f64), ScriptError> {
        let rhs = self.pop_number(op)?;
        let lhs = self.pop_number(op)?;
        Ok((lhs, rhs))
    }

    fn step(&mut self, instruction: Instruction) -> Result<Step, ScriptError> {
        match instruction.op {
            Op::PushNil => self.push(Value::Nil)?,
            Op::PushTrue => self.push(Value::Boolean(true))?,
            Op::PushFalse => self.push(Value::Boolean(false))?,
            Op::PushNumber | Op::PushString => {
                let value = self.constant(instruction.b)?;
                self.push(value)?;
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let top = self.peek(0)?.clone();
                self.push(top)?;
            }
            Op::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(ScriptError::stack_underflow());
                }
                self.stack.swap(len - 1, len - 2);
            }

            Op::GetLocal => {
                let slot = self.frame()?.stack_base + instruction.b as usize;
                let value = self
                    .stack
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| local_out_of_range(instruction.b))?;
                self.push(value)?;
            }
            Op::SetLocal => {
                let slot = self.frame()?.stack_base + instruction.b as usize;
                let value = self.peek(0)?.clone();
                *self
                    .stack
                    .get_mut(slot)
                    .ok_or_else(|| local_out_of_range(instruction.b))? = value;
            }
            Op::GetGlobal => {
                let name = self.name_constant(instruction.b)?;
                let value = self.globals.get(&name).cloned().unwrap_or(Value::Nil);
                self.push(value)?;
            }
            Op::SetGlobal => {
                let name = self.name_constant(instruction.b)?;
                let value = self.peek(0)?.clone();
                self.globals.set(name, value);
            }
            Op::GetUpvalue => {
                let handle = self.upvalue(instruction.b)?;
                let value = match &*handle.borrow() {
                    Upvalue::Open(slot) => self
                        .stack
                        .get(*slot)
                        .cloned()
                        .ok_or_else(|| ScriptError::Index("open upvalue slot out of range".to_string()))?,
                    Upvalue::Closed(value) => value.clone(),
                };
                self.push(value)?;
            }
            Op::SetUpvalue => {
                let handle = self.upvalue(instruction.b)?;
                let value = self.peek(0)?.clone();
                let open_slot = handle.borrow().open_slot();
                match open_slot {
                    Some(slot) => {
                        *self.stack.get_mut(slot).ok_or_else(|| {
                            ScriptError::Index("open upvalue slot out of range".to_string())
                        })? = value;
                    }
                    None => *handle.borrow_mut() = Upvalue::Closed(value),
                }
            }

            Op::NewTable => {
                self.collect_if_needed();
                let table = if instruction.b > 0 {
                    Table::with_capacity(instruction.b as usize)
                } else {
                    Table::new()
                };
                let handle = self.heap.alloc_table(table);
                self.push(Value::Table(handle))?;
            }
            Op::GetField => {
                let key = self.pop()?;
                let target = self.pop()?;
                let handle = target.as_table().ok_or_else(|| {
                    ScriptError::Type(format!("field access on a {}", target.type_name()))
                })?;
                let value = self.table_get(handle, &key)?;
                self.push(value)?;
            }
            Op::SetField => {
                let value = self.pop()?;
                let key = self.pop()?;
                let target = self.pop()?;
                let handle = target.as_table().ok_or_else(|| {
                    ScriptError::Type(format!("field access on a {}", target.type_name()))
                })?;
                self.table_set(handle, &key, value.clone())?;
                self.push(value)?;
            }

            Op::Add => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = match (&lhs, &rhs) {
                    (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
                    (Value::Str(a), Value::Str(b)) => {
                        let joined = format!("{}{}", a, b);
                        Value::Str(self.strings.intern(&joined))
                    }
                    _ => {
                        return Err(ScriptError::Type(format!(
                            "cannot add a {} and a {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )))
                    }
                };
                self.push(result)?;
            }
            Op::Sub => {
                let (lhs, rhs) = self.binary_numbers("subtraction")?;
                self.push(Value::Number(lhs - rhs))?;
            }
            Op::Mul => {
                let (lhs, rhs) = self.binary_numbers("multiplication")?;
                self.push(Value::Number(lhs * rhs))?;
            }
            Op::Div => {
                let (lhs, rhs) = self.binary_numbers("division")?;
                if rhs == 0.0 {
                    return Err(ScriptError::Arithmetic("division by zero".to_string()));
                }
                self.push(Value::Number(lhs / rhs))?;
            }
            Op::Mod => {
                let (lhs, rhs) = self.binary_numbers("modulo")?;
                if rhs == 0.0 {
                    return Err(ScriptError::Arithmetic("modulo by zero".to_string()));
                }
                self.push(Value::Number(lhs % rhs))?;
            }
            Op::Neg => {
                let n = self.pop_number("negation")?;
                self.push(Value::Number(-n))?;
            }
            Op::Pow => {
                let (lhs, rhs) = self.binary_numbers("exponentiation")?;
                self.push(Value::Number(lhs.powf(rhs)))?;
            }

            Op::Eq => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Boolean(lhs == rhs))?;
            }
            Op::Ne => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Boolean(lhs != rhs))?;
            }
            Op::Lt => {
                let (lhs, rhs) = self.binary_numbers("comparison")?;
                self.push(Value::Boolean(lhs < rhs))?;
            }
            Op::Le => {
                let (lhs, rhs) = self.binary_numbers("comparison")?;
                self.push(Value::Boolean(lhs <= rhs))?;
            }
            Op::Gt => {
                let (lhs, rhs) = self.binary_numbers("comparison")?;
                self.push(Value::Boolean(lhs > rhs))?;
            }
            Op::Ge => {
                let (lhs, rhs) = self.binary_numbers("comparison")?;
                self.push(Value::Boolean(lhs >= rhs))?;
            }

            Op::And => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Boolean(lhs.is_truthy() && rhs.is_truthy()))?;
            }
            Op::Or => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(Value::Boolean(lhs.is_truthy() || rhs.is_truthy()))?;
            }
            Op::Not => {
                let value = self.pop()?;
                self.push(Value::Boolean(!value.is_truthy()))?;
            }

            Op::Jump => {
                self.frame_mut()?.ip += instruction.b as usize;
            }
            Op::JumpIfFalse => {
                if !self.peek(0)?.is_truthy() {
                    self.frame_mut()?.ip += instruction.b as usize;
                }
            }
            Op::JumpIfTrue => {
                if self.peek(0)?.is_truthy() {
                    self.frame_mut()?.ip += instruction.b as usize;
                }
            }
            Op::Loop => {
                let frame = self.frame_mut()?;
                frame.ip = frame.ip.checked_sub(instruction.b as usize).ok_or_else(|| {
                    ScriptError::Dispatch("loop target before function start".to_string())
                })?;
            }

            Op::Call => {
                self.call_value(instruction.a)?;
            }
            Op::Return => {
                let result = if instruction.a > 0 {
                    self.pop()?
                } else {
                    Value::Nil
                };
                let frame = self
                    .frames
                    .pop()
                    .ok_or_else(|| ScriptError::Dispatch("return with no active frame".to_string()))?;
                self.close_upvalues(frame.stack_base);
                self.stack.truncate(frame.stack_base);
                return Ok(Step::Returned(result));
            }
            Op::Closure => {
                let template = match self.constant(instruction.b)? {
                    Value::Function(template) => template,
                    other => {
                        return Err(ScriptError::Dispatch(format!(
                            "closure constant is a {}, not a function",
                            other.type_name()
                        )))
                    }
                };
                let enclosing = self.frame()?.closure.clone();
                let base = self.frame()?.stack_base;

                let proto = template.proto.clone();
                let mut upvalues = Vec::with_capacity(proto.upvalues.len());
                for descriptor in &proto.upvalues {
                    let handle = if descriptor.is_local {
                        self.capture_upvalue(base + descriptor.index as usize)
                    } else {
                        enclosing
                            .upvalues
                            .get(descriptor.index as usize)
                            .cloned()
                            .ok_or_else(|| {
                                ScriptError::Index(format!(
                                    "upvalue index {} out of range",
                                    descriptor.index
                                ))
                            })?
                    };
                    upvalues.push(handle);
                }
                self.push(Value::Function(Rc::new(Closure { proto, upvalues })))?;
            }
            Op::CloseUpvalue => {
                let top = self
                    .stack
                    .len()
                    .checked_sub(1)
                    .ok_or_else(ScriptError::stack_underflow)?;
                self.close_upvalues(top);
                self.pop()?;
            }

            Op::Yield | Op::Resume => {
                return Err(ScriptError::Dispatch(
                    "coroutines are not supported".to_string(),
                ));
            }

            Op::Print => {
                let value = self.pop()?;
                println!("{}", value);
            }
            Op::Assert => {
                let value = self.pop()?;
                if !value.is_truthy() {
                    return Err(ScriptError::Dispatch("assertion failed".to_string()));
                }
            }
            Op::Breakpoint => {
                let event = DebugEvent {
                    ip: self.frame()?.ip.saturating_sub(1),
                    frame_depth: self.frames.len(),
                    stack_depth: self.stack.len(),
                };
                if let Some(hook) = self.debug_hook.as_mut() {
                    hook(&event);
                }
            }
        }
        Ok(Step::Continue)
    }

    fn upvalue(&self, index: u16) -> Result<UpvalueHandle, ScriptError> {
        self.frame()?
            .closure
            .upvalues
            .get(index as usize)
            .cloned()
            .ok_or_else(|| ScriptError::Index(format!("upvalue index {} out of range", index)))
    }
}

fn local_out_of_range(slot: u16) -> ScriptError {
    ScriptError::Index(format!("local slot {} out of range", slot))
}

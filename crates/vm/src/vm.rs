//! Fetch-decode-execute loop.
//!
//! The VM is a restartable, one-step-at-a-time stepper: [`Vm::step`]
//! advances exactly one instruction and returns whether execution has
//! finished. [`Vm::run_to_end`] is a convenience driver that loops `step`
//! until `done`. Nothing here spawns a thread or suspends across an await
//! point: "lazy" means "callers choose when the next instruction runs",
//! not concurrency.

use crate::config::VmConfig;
use crate::error::RuntimeError;
use crate::guardian::Guardian;
use crate::heap::Heap;
use crate::stack::UnifiedStack;
use stepc_core::{Instruction, Opcode, Operand, Value, ValueKind};
use tracing::{trace, warn};

/// Result of a single [`Vm::step`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub done: bool,
    pub value: Option<Value>,
}

pub struct Vm {
    instructions: Vec<Instruction>,
    ip: usize,
    stack: UnifiedStack,
    bp: usize,
    heap: Heap,
    done: bool,
    sink: Box<dyn FnMut(&str)>,
}

impl Vm {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Vm::with_config(instructions, VmConfig::default())
    }

    pub fn with_config(instructions: Vec<Instruction>, config: VmConfig) -> Self {
        Vm::with_sink(instructions, config, Box::new(|line| println!("{line}")))
    }

    /// Build a VM that routes `print` output to a host-supplied sink instead
    /// of standard output, e.g. for capturing output in tests or forwarding
    /// it to a UI.
    pub fn with_sink(
        instructions: Vec<Instruction>,
        config: VmConfig,
        sink: Box<dyn FnMut(&str)>,
    ) -> Self {
        Vm {
            instructions,
            ip: 0,
            stack: UnifiedStack::new(config.stack_capacity),
            bp: 0,
            heap: Heap::new(),
            done: false,
            sink,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The program result: top of stack if any value sits above the base
    /// pointer, otherwise none.
    fn result(&self) -> Option<Value> {
        if self.stack.sp() > self.bp {
            self.stack.peek(self.ip).ok().cloned()
        } else {
            None
        }
    }

    /// Run exactly one instruction. Idempotent once `done`: repeated calls
    /// keep returning the same outcome without touching state further.
    pub fn step(&mut self) -> Result<StepOutcome, RuntimeError> {
        if self.done {
            return Ok(StepOutcome {
                done: true,
                value: self.result(),
            });
        }
        if self.ip >= self.instructions.len() {
            self.done = true;
            return Ok(StepOutcome {
                done: true,
                value: self.result(),
            });
        }

        let instruction = self.instructions[self.ip].clone();
        trace!(ip = self.ip, op = ?instruction.op, "executing instruction");
        self.execute(&instruction)?;

        if self.ip >= self.instructions.len() {
            self.done = true;
        }

        Ok(StepOutcome {
            done: self.done,
            value: if self.done { self.result() } else { None },
        })
    }

    pub fn run_to_end(&mut self) -> Result<Option<Value>, RuntimeError> {
        loop {
            let outcome = self.step()?;
            if outcome.done {
                return Ok(outcome.value);
            }
        }
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let ip = self.ip;
        let mut next_ip = ip + 1;

        match instruction.op {
            Opcode::Reserve => {
                let n = Self::count_operand(&instruction.operand, ip)?;
                for _ in 0..n {
                    self.stack.push(Value::Uninitialized, ip)?;
                }
            }
            Opcode::Push => {
                let value = match &instruction.operand {
                    Operand::Value(v) => v.clone(),
                    _ => return Err(RuntimeError::new("push requires a value operand", ip)),
                };
                self.stack.push(value, ip)?;
            }
            Opcode::Pop => {
                self.stack.pop(ip)?;
            }
            Opcode::PopN => {
                let n = Self::count_operand(&instruction.operand, ip)?;
                self.stack.pop_n(n, ip)?;
            }
            Opcode::Dup => self.stack.dup(ip)?,
            Opcode::Swap => self.stack.swap(ip)?,
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Percent => {
                let r = self.stack.pop(ip)?;
                let l = self.stack.pop(ip)?;
                let result = Self::binary_arith(instruction.op, &l, &r, ip)?;
                self.stack.push(result, ip)?;
            }
            Opcode::Negate => {
                let v = self.stack.pop(ip)?;
                Self::guarded(Guardian::check_numeric(&v, ip))?;
                let result = match v {
                    Value::Integer(n) => Value::Integer(-n),
                    Value::Double(d) => Value::Double(-d),
                    _ => unreachable!("check_numeric already ruled this out"),
                };
                self.stack.push(result, ip)?;
            }
            Opcode::Not => {
                let v = self.stack.pop(ip)?;
                let b = Self::guarded(Guardian::check_boolean(&v, ip))?;
                self.stack.push(Value::Boolean(!b), ip)?;
            }
            Opcode::Print => {
                let v = self.stack.peek(ip)?.clone();
                (self.sink)(&v.to_string());
            }
            Opcode::Load => {
                let slot = Self::slot_operand(&instruction.operand, ip)?;
                let v = self.stack.load(self.bp, slot, ip)?;
                self.stack.push(v, ip)?;
            }
            Opcode::Store => {
                let slot = Self::slot_operand(&instruction.operand, ip)?;
                self.stack.store(self.bp, slot, ip)?;
            }
            Opcode::Eq | Opcode::Neq => {
                let r = self.stack.pop(ip)?;
                let l = self.stack.pop(ip)?;
                let equal = l == r;
                let result = if instruction.op == Opcode::Eq {
                    equal
                } else {
                    !equal
                };
                self.stack.push(Value::Boolean(result), ip)?;
            }
            Opcode::Lt | Opcode::Gt | Opcode::Lte | Opcode::Gte => {
                let r = self.stack.pop(ip)?;
                let l = self.stack.pop(ip)?;
                let result = Self::compare(instruction.op, &l, &r, ip)?;
                self.stack.push(Value::Boolean(result), ip)?;
            }
            Opcode::Jump => {
                next_ip = Self::addr_operand(&instruction.operand, ip)?;
            }
            Opcode::JumpIfFalse => {
                let v = self.stack.pop(ip)?;
                let cond = Self::guarded(Guardian::check_boolean(&v, ip))?;
                if !cond {
                    next_ip = Self::addr_operand(&instruction.operand, ip)?;
                }
            }
            Opcode::JumpIfFalsePeek => {
                let cond = Self::guarded(Guardian::check_boolean(self.stack.peek(ip)?, ip))?;
                if !cond {
                    next_ip = Self::addr_operand(&instruction.operand, ip)?;
                }
            }
            Opcode::JumpIfTruePeek => {
                let cond = Self::guarded(Guardian::check_boolean(self.stack.peek(ip)?, ip))?;
                if cond {
                    next_ip = Self::addr_operand(&instruction.operand, ip)?;
                }
            }
            Opcode::AllocArr => {
                let elem_kind = match &instruction.operand {
                    Operand::ElemKind(k) => *k,
                    _ => return Err(RuntimeError::new("alloc_arr requires an element kind", ip)),
                };
                let size_value = self.stack.pop(ip)?;
                let size = Self::guarded(Guardian::check_integer(&size_value, "array size", ip))?;
                if size < 0 {
                    return Err(RuntimeError::new("array size must be a non-negative integer", ip));
                }
                let addr = self.heap.alloc(size as usize, elem_kind.zero());
                self.stack.push(Value::Pointer(addr), ip)?;
            }
            Opcode::LoadIdx => {
                let index_value = self.stack.pop(ip)?;
                let pointer_value = self.stack.pop(ip)?;
                let addr = Self::guarded(Guardian::check_pointer(&pointer_value, "load_idx", ip))?;
                Self::guarded(Guardian::check_heap_address(addr, self.heap.len(), ip))?;
                let index = Self::guarded(Guardian::check_integer(&index_value, "array index", ip))?;
                let index = Self::guarded(Guardian::check_array_bounds(self.heap.cell_len(addr, ip)?, index, ip))?;
                let v = self.heap.get(addr, index, ip)?;
                self.stack.push(v, ip)?;
            }
            Opcode::StoreIdx => {
                let value = self.stack.pop(ip)?;
                let index_value = self.stack.pop(ip)?;
                let pointer_value = self.stack.pop(ip)?;
                let addr = Self::guarded(Guardian::check_pointer(&pointer_value, "store_idx", ip))?;
                Self::guarded(Guardian::check_heap_address(addr, self.heap.len(), ip))?;
                let index = Self::guarded(Guardian::check_integer(&index_value, "array index", ip))?;
                let index = Self::guarded(Guardian::check_array_bounds(self.heap.cell_len(addr, ip)?, index, ip))?;
                self.heap.set(addr, index, value.clone(), ip)?;
                self.stack.push(value, ip)?;
            }
        }

        self.ip = next_ip;
        Ok(())
    }

    /// Forwards a guardian check's result, logging a `warn` event if it failed.
    fn guarded<T>(result: Result<T, RuntimeError>) -> Result<T, RuntimeError> {
        if let Err(e) = &result {
            warn!(ip = e.ip, error = %e, "guardian check failed");
        }
        result
    }

    fn slot_operand(operand: &Operand, ip: usize) -> Result<usize, RuntimeError> {
        match operand {
            Operand::Slot(s) => Ok(*s),
            _ => Err(RuntimeError::new("expected a slot operand", ip)),
        }
    }

    fn addr_operand(operand: &Operand, ip: usize) -> Result<usize, RuntimeError> {
        operand
            .as_addr()
            .ok_or_else(|| RuntimeError::new("expected an address operand", ip))
    }

    fn count_operand(operand: &Operand, ip: usize) -> Result<usize, RuntimeError> {
        match operand {
            Operand::Count(n) => Ok(*n),
            _ => Err(RuntimeError::new("expected a count operand", ip)),
        }
    }

    /// Promote to `double` if either operand is `double`, otherwise operate
    /// on `integer`. Division and modulo additionally guard against a zero
    /// divisor; on integers they truncate toward zero / inherit the
    /// dividend's sign, matching the language's integer semantics.
    fn binary_arith(op: Opcode, l: &Value, r: &Value, ip: usize) -> Result<Value, RuntimeError> {
        Self::guarded(Guardian::check_numeric(l, ip))?;
        Self::guarded(Guardian::check_numeric(r, ip))?;

        if matches!(l, Value::Double(_)) || matches!(r, Value::Double(_)) {
            let l = Self::as_f64(l);
            let r = Self::as_f64(r);
            let result = match op {
                Opcode::Add => l + r,
                Opcode::Sub => l - r,
                Opcode::Mul => l * r,
                Opcode::Div => {
                    if r == 0.0 {
                        return Err(RuntimeError::new("division by zero", ip));
                    }
                    l / r
                }
                Opcode::Percent => {
                    if r == 0.0 {
                        return Err(RuntimeError::new("modulo by zero", ip));
                    }
                    l % r
                }
                _ => unreachable!("caller only dispatches arithmetic opcodes here"),
            };
            return Ok(Value::Double(result));
        }

        let (Value::Integer(l), Value::Integer(r)) = (l, r) else {
            unreachable!("non-double numerics are integers")
        };
        let result = match op {
            Opcode::Add => l + r,
            Opcode::Sub => l - r,
            Opcode::Mul => l * r,
            Opcode::Div => {
                if *r == 0 {
                    return Err(RuntimeError::new("division by zero", ip));
                }
                l / r
            }
            Opcode::Percent => {
                if *r == 0 {
                    return Err(RuntimeError::new("modulo by zero", ip));
                }
                l % r
            }
            _ => unreachable!("caller only dispatches arithmetic opcodes here"),
        };
        Ok(Value::Integer(result))
    }

    fn compare(op: Opcode, l: &Value, r: &Value, ip: usize) -> Result<bool, RuntimeError> {
        Self::guarded(Guardian::check_numeric(l, ip))?;
        Self::guarded(Guardian::check_numeric(r, ip))?;
        let l = Self::as_f64(l);
        let r = Self::as_f64(r);
        Ok(match op {
            Opcode::Lt => l < r,
            Opcode::Gt => l > r,
            Opcode::Lte => l <= r,
            Opcode::Gte => l >= r,
            _ => unreachable!("caller only dispatches comparison opcodes here"),
        })
    }

    fn as_f64(v: &Value) -> f64 {
        match v {
            Value::Integer(n) => *n as f64,
            Value::Double(d) => *d,
            _ => unreachable!("already passed check_numeric"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepc_core::{Instruction as I, Opcode as Op, Operand as Opr};

    fn run(instructions: Vec<Instruction>) -> Option<Value> {
        Vm::new(instructions).run_to_end().unwrap()
    }

    #[test]
    fn push_leaves_value_on_stack() {
        let result = run(vec![I::new(Op::Push, Opr::Value(Value::Integer(7)))]);
        assert_eq!(result, Some(Value::Integer(7)));
    }

    #[test]
    fn integer_division_truncates_toward_zero() {
        let result = run(vec![
            I::new(Op::Push, Opr::Value(Value::Integer(-7))),
            I::new(Op::Push, Opr::Value(Value::Integer(2))),
            I::simple(Op::Div),
        ]);
        assert_eq!(result, Some(Value::Integer(-3)));
    }

    #[test]
    fn modulo_takes_dividend_sign() {
        let result = run(vec![
            I::new(Op::Push, Opr::Value(Value::Integer(-7))),
            I::new(Op::Push, Opr::Value(Value::Integer(2))),
            I::simple(Op::Percent),
        ]);
        assert_eq!(result, Some(Value::Integer(-1)));
    }

    #[test]
    fn mixed_type_arithmetic_promotes_to_double() {
        let result = run(vec![
            I::new(Op::Push, Opr::Value(Value::Integer(1))),
            I::new(Op::Push, Opr::Value(Value::Double(0.5))),
            I::simple(Op::Add),
        ]);
        assert_eq!(result, Some(Value::Double(1.5)));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let err = Vm::new(vec![
            I::new(Op::Push, Opr::Value(Value::Integer(1))),
            I::new(Op::Push, Opr::Value(Value::Integer(0))),
            I::simple(Op::Div),
        ])
        .run_to_end()
        .unwrap_err();
        assert!(err.message.contains("division by zero"));
    }

    #[test]
    fn reading_uninitialized_value_is_a_runtime_error() {
        let err = Vm::new(vec![
            I::new(Op::Reserve, Opr::Count(1)),
            I::new(Op::Load, Opr::Slot(0)),
            I::new(Op::Push, Opr::Value(Value::Integer(1))),
            I::simple(Op::Add),
        ])
        .run_to_end()
        .unwrap_err();
        assert!(err.message.contains("uninitialized"));
    }

    #[test]
    fn not_requires_boolean_strictly() {
        let err = Vm::new(vec![
            I::new(Op::Push, Opr::Value(Value::Integer(1))),
            I::simple(Op::Not),
        ])
        .run_to_end()
        .unwrap_err();
        assert!(err.message.contains("boolean required"));
    }

    #[test]
    fn store_does_not_pop_the_stored_value() {
        let result = run(vec![
            I::new(Op::Reserve, Opr::Count(1)),
            I::new(Op::Push, Opr::Value(Value::Integer(5))),
            I::new(Op::Store, Opr::Slot(0)),
        ]);
        assert_eq!(result, Some(Value::Integer(5)));
    }

    #[test]
    fn array_round_trip_through_load_idx_store_idx() {
        let result = run(vec![
            I::new(Op::Push, Opr::Value(Value::Integer(3))),
            I::new(Op::AllocArr, Opr::ElemKind(ValueKind::Integer)),
            I::simple(Op::Dup),
            I::new(Op::Push, Opr::Value(Value::Integer(1))),
            I::new(Op::Push, Opr::Value(Value::Integer(99))),
            I::simple(Op::StoreIdx),
            I::simple(Op::Pop),
            I::new(Op::Push, Opr::Value(Value::Integer(1))),
            I::simple(Op::LoadIdx),
        ]);
        assert_eq!(result, Some(Value::Integer(99)));
    }

    #[test]
    fn array_index_out_of_bounds_errors_before_mutation() {
        let err = Vm::new(vec![
            I::new(Op::Push, Opr::Value(Value::Integer(3))),
            I::new(Op::AllocArr, Opr::ElemKind(ValueKind::Integer)),
            I::simple(Op::Dup),
            I::new(Op::Push, Opr::Value(Value::Integer(3))),
            I::new(Op::Push, Opr::Value(Value::Integer(10))),
            I::simple(Op::StoreIdx),
        ])
        .run_to_end()
        .unwrap_err();
        assert!(err.message.contains("out of range [0, 2]"));
    }

    #[test]
    fn step_is_idempotent_once_done() {
        let mut vm = Vm::new(vec![I::new(Op::Push, Opr::Value(Value::Integer(1)))]);
        let first = vm.step().unwrap();
        assert!(!first.done);
        let second = vm.step().unwrap();
        assert!(second.done);
        let third = vm.step().unwrap();
        assert_eq!(second, third);
    }

    #[test]
    fn print_routes_through_the_configured_sink() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let captured = Rc::new(RefCell::new(Vec::new()));
        let captured_clone = captured.clone();
        let mut vm = Vm::with_sink(
            vec![
                I::new(Op::Push, Opr::Value(Value::Integer(42))),
                I::simple(Op::Print),
            ],
            VmConfig::default(),
            Box::new(move |line| captured_clone.borrow_mut().push(line.to_string())),
        );
        vm.run_to_end().unwrap();
        assert_eq!(captured.borrow().as_slice(), ["42"]);
    }
}

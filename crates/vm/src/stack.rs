//! The unified operand/local stack.
//!
//! One dense array serves both as the frame for local variables (indices
//! `bp..sp`) and as the operand stack above the highest live local. Fixed
//! capacity, preallocated to [`Value::Uninitialized`] so `load` never reads
//! genuinely unwritten memory.

use crate::error::RuntimeError;
use stepc_core::Value;

pub struct UnifiedStack {
    values: Vec<Value>,
    sp: usize,
}

impl UnifiedStack {
    pub fn new(capacity: usize) -> Self {
        UnifiedStack {
            values: vec![Value::Uninitialized; capacity],
            sp: 0,
        }
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    pub fn push(&mut self, value: Value, ip: usize) -> Result<(), RuntimeError> {
        if self.sp >= self.values.len() {
            return Err(RuntimeError::new("stack overflow", ip));
        }
        self.values[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self, ip: usize) -> Result<Value, RuntimeError> {
        if self.sp == 0 {
            return Err(RuntimeError::new("stack underflow", ip));
        }
        self.sp -= 1;
        Ok(std::mem::replace(&mut self.values[self.sp], Value::Uninitialized))
    }

    pub fn pop_n(&mut self, n: usize, ip: usize) -> Result<(), RuntimeError> {
        if n > self.sp {
            return Err(RuntimeError::new("stack underflow", ip));
        }
        for i in self.sp - n..self.sp {
            self.values[i] = Value::Uninitialized;
        }
        self.sp -= n;
        Ok(())
    }

    pub fn peek(&self, ip: usize) -> Result<&Value, RuntimeError> {
        if self.sp == 0 {
            return Err(RuntimeError::new("stack underflow", ip));
        }
        Ok(&self.values[self.sp - 1])
    }

    pub fn dup(&mut self, ip: usize) -> Result<(), RuntimeError> {
        let top = self.peek(ip)?.clone();
        self.push(top, ip)
    }

    pub fn swap(&mut self, ip: usize) -> Result<(), RuntimeError> {
        if self.sp < 2 {
            return Err(RuntimeError::new("stack underflow", ip));
        }
        self.values.swap(self.sp - 1, self.sp - 2);
        Ok(())
    }

    /// `load k` reads `stack[bp+k]`; valid only while that slot is a live
    /// local, i.e. `bp+k < sp`.
    pub fn load(&self, bp: usize, slot: usize, ip: usize) -> Result<Value, RuntimeError> {
        let addr = bp + slot;
        if addr >= self.sp {
            return Err(RuntimeError::new(
                format!("load of slot {slot} is out of the current frame"),
                ip,
            ));
        }
        Ok(self.values[addr].clone())
    }

    /// `store k` writes `stack[bp+k] = top` and does not pop: callers peek
    /// the value to store and leave it on the stack.
    pub fn store(&mut self, bp: usize, slot: usize, ip: usize) -> Result<(), RuntimeError> {
        let addr = bp + slot;
        if addr >= self.values.len() {
            return Err(RuntimeError::new(
                format!("store to slot {slot} exceeds stack capacity"),
                ip,
            ));
        }
        let value = self.peek(ip)?.clone();
        self.values[addr] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trips() {
        let mut s = UnifiedStack::new(8);
        s.push(Value::Integer(42), 0).unwrap();
        assert_eq!(s.pop(0).unwrap(), Value::Integer(42));
    }

    #[test]
    fn pop_on_empty_underflows() {
        let mut s = UnifiedStack::new(8);
        assert!(s.pop(0).is_err());
    }

    #[test]
    fn push_past_capacity_overflows() {
        let mut s = UnifiedStack::new(1);
        s.push(Value::Integer(1), 0).unwrap();
        assert!(s.push(Value::Integer(2), 0).is_err());
    }

    #[test]
    fn store_does_not_pop() {
        let mut s = UnifiedStack::new(8);
        s.push(Value::Uninitialized, 0).unwrap();
        s.push(Value::Integer(7), 0).unwrap();
        s.store(0, 0, 0).unwrap();
        assert_eq!(s.sp(), 2);
        assert_eq!(s.load(0, 0, 0).unwrap(), Value::Integer(7));
    }

    #[test]
    fn dup_copies_top() {
        let mut s = UnifiedStack::new(8);
        s.push(Value::Boolean(true), 0).unwrap();
        s.dup(0).unwrap();
        assert_eq!(s.sp(), 2);
        assert_eq!(s.pop(0).unwrap(), Value::Boolean(true));
        assert_eq!(s.pop(0).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn swap_exchanges_top_two() {
        let mut s = UnifiedStack::new(8);
        s.push(Value::Integer(1), 0).unwrap();
        s.push(Value::Integer(2), 0).unwrap();
        s.swap(0).unwrap();
        assert_eq!(s.pop(0).unwrap(), Value::Integer(1));
        assert_eq!(s.pop(0).unwrap(), Value::Integer(2));
    }

    #[test]
    fn pop_n_clears_the_discarded_slots() {
        let mut s = UnifiedStack::new(8);
        s.push(Value::Integer(1), 0).unwrap();
        s.push(Value::Integer(2), 0).unwrap();
        s.pop_n(2, 0).unwrap();
        assert_eq!(s.sp(), 0);
    }
}

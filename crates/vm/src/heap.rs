//! The array heap.
//!
//! An ordered collection of fixed-length array cells. Addresses are
//! insertion indices, monotonically increasing for the program's duration.
//! There is no `free`; cells live for the life of the program.

use crate::error::RuntimeError;
use stepc_core::Value;

#[derive(Default)]
pub struct Heap {
    cells: Vec<Vec<Value>>,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    /// Allocate a new cell of `len` copies of `fill` and return its address.
    pub fn alloc(&mut self, len: usize, fill: Value) -> usize {
        self.cells.push(vec![fill; len]);
        self.cells.len() - 1
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn check_address(&self, addr: usize, ip: usize) -> Result<(), RuntimeError> {
        if addr >= self.cells.len() {
            return Err(RuntimeError::new(format!("invalid heap address {addr}"), ip));
        }
        Ok(())
    }

    pub fn cell_len(&self, addr: usize, ip: usize) -> Result<usize, RuntimeError> {
        self.check_address(addr, ip)?;
        Ok(self.cells[addr].len())
    }

    pub fn get(&self, addr: usize, index: usize, ip: usize) -> Result<Value, RuntimeError> {
        self.check_address(addr, ip)?;
        let cell = &self.cells[addr];
        if index >= cell.len() {
            return Err(RuntimeError::new(
                format!(
                    "index {index} is out of range [0, {}]",
                    cell.len().saturating_sub(1)
                ),
                ip,
            ));
        }
        Ok(cell[index].clone())
    }

    pub fn set(&mut self, addr: usize, index: usize, value: Value, ip: usize) -> Result<(), RuntimeError> {
        self.check_address(addr, ip)?;
        let cell = &mut self.cells[addr];
        if index >= cell.len() {
            return Err(RuntimeError::new(
                format!(
                    "index {index} is out of range [0, {}]",
                    cell.len().saturating_sub(1)
                ),
                ip,
            ));
        }
        cell[index] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_sequential_addresses() {
        let mut h = Heap::new();
        assert_eq!(h.alloc(3, Value::Integer(0)), 0);
        assert_eq!(h.alloc(2, Value::Integer(0)), 1);
    }

    #[test]
    fn get_set_round_trip() {
        let mut h = Heap::new();
        let addr = h.alloc(2, Value::Integer(0));
        h.set(addr, 1, Value::Integer(9), 0).unwrap();
        assert_eq!(h.get(addr, 1, 0).unwrap(), Value::Integer(9));
    }

    #[test]
    fn out_of_bounds_index_errors() {
        let mut h = Heap::new();
        let addr = h.alloc(2, Value::Integer(0));
        let err = h.get(addr, 2, 0).unwrap_err();
        assert!(err.message.contains("out of range [0, 1]"));
    }

    #[test]
    fn invalid_address_errors() {
        let h = Heap::new();
        assert!(h.get(0, 0, 0).is_err());
    }
}

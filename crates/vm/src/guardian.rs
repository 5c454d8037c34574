//! Runtime safety checks.
//!
//! Every precondition an opcode depends on (initialization, numeric type,
//! boolean type, heap address validity, array bounds) is centralized here
//! rather than re-checked ad hoc in `Vm::execute`, so the error taxonomy in
//! one place matches the wording the opcode table expects.

use crate::error::RuntimeError;
use stepc_core::Value;

pub struct Guardian;

impl Guardian {
    pub fn check_initialized(value: &Value, ip: usize) -> Result<(), RuntimeError> {
        if value.is_uninitialized() {
            return Err(RuntimeError::new("use of uninitialized value", ip));
        }
        Ok(())
    }

    /// Numeric operand required: initialized and either `Integer` or `Double`.
    pub fn check_numeric(value: &Value, ip: usize) -> Result<(), RuntimeError> {
        Self::check_initialized(value, ip)?;
        if !value.is_numeric() {
            return Err(RuntimeError::new(
                format!("numeric operand required, found {}", value.type_name()),
                ip,
            ));
        }
        Ok(())
    }

    /// Boolean operand required, per the strict reading of conditions and
    /// `!`: no implicit numeric-to-boolean coercion.
    pub fn check_boolean(value: &Value, ip: usize) -> Result<bool, RuntimeError> {
        Self::check_initialized(value, ip)?;
        match value {
            Value::Boolean(b) => Ok(*b),
            _ => Err(RuntimeError::new(
                format!("boolean required, found {}", value.type_name()),
                ip,
            )),
        }
    }

    pub fn check_integer(value: &Value, what: &str, ip: usize) -> Result<i64, RuntimeError> {
        Self::check_initialized(value, ip)?;
        match value {
            Value::Integer(n) => Ok(*n),
            _ => Err(RuntimeError::new(format!("{what} must be an integer"), ip)),
        }
    }

    pub fn check_pointer(value: &Value, what: &str, ip: usize) -> Result<usize, RuntimeError> {
        Self::check_initialized(value, ip)?;
        match value {
            Value::Pointer(addr) => Ok(*addr),
            _ => Err(RuntimeError::new(
                format!("operand must be pointer for {what}"),
                ip,
            )),
        }
    }

    pub fn check_heap_address(addr: usize, count: usize, ip: usize) -> Result<(), RuntimeError> {
        if addr >= count {
            return Err(RuntimeError::new(format!("invalid heap address {addr}"), ip));
        }
        Ok(())
    }

    pub fn check_array_bounds(len: usize, index: i64, ip: usize) -> Result<usize, RuntimeError> {
        if index < 0 || index as usize >= len {
            return Err(RuntimeError::new(
                format!(
                    "index {index} is out of range [0, {}]",
                    len.saturating_sub(1)
                ),
                ip,
            ));
        }
        Ok(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_fails_every_check() {
        assert!(Guardian::check_initialized(&Value::Uninitialized, 0).is_err());
        assert!(Guardian::check_numeric(&Value::Uninitialized, 0).is_err());
        assert!(Guardian::check_boolean(&Value::Uninitialized, 0).is_err());
    }

    #[test]
    fn numeric_rejects_boolean() {
        assert!(Guardian::check_numeric(&Value::Boolean(true), 0).is_err());
    }

    #[test]
    fn boolean_rejects_numeric_without_coercion() {
        assert!(Guardian::check_boolean(&Value::Integer(1), 0).is_err());
    }

    #[test]
    fn array_bounds_rejects_negative_and_overflowing() {
        assert!(Guardian::check_array_bounds(3, -1, 0).is_err());
        assert!(Guardian::check_array_bounds(3, 3, 0).is_err());
        assert_eq!(Guardian::check_array_bounds(3, 2, 0).unwrap(), 2);
    }
}

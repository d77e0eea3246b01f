//! # Register Module
//!
//! The eBPF machine registers R0..R10. The set is closed: R0 holds call
//! return values and the program exit code, R1..R5 are caller-saved
//! argument registers, R6..R9 are callee-saved, and R10 is the read-only
//! frame pointer (never a generated ALU destination).

use crate::error::{Error, Result};

use std::fmt;

/// Sentinel returned when no initialized register is available.
pub const NO_REGISTER: u8 = 0xFF;

/// One of the eleven eBPF machine registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    /// Frame pointer.
    R10 = 10,
}

impl Register {
    /// Looks up the register with the given number.
    ///
    /// # Errors
    /// Returns `UnknownRegister` for numbers outside 0..=10, including the
    /// `NO_REGISTER` sentinel.
    pub fn from_number(n: u8) -> Result<Register> {
        match n {
            0 => Ok(Register::R0),
            1 => Ok(Register::R1),
            2 => Ok(Register::R2),
            3 => Ok(Register::R3),
            4 => Ok(Register::R4),
            5 => Ok(Register::R5),
            6 => Ok(Register::R6),
            7 => Ok(Register::R7),
            8 => Ok(Register::R8),
            9 => Ok(Register::R9),
            10 => Ok(Register::R10),
            _ => Err(Error::unknown_register(format!(
                "no such register: {}",
                n
            ))),
        }
    }

    /// Returns this register's number, the inverse of `from_number`.
    #[inline]
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.number())
    }
}

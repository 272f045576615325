use core::fmt;
use serde::{Deserialize, Serialize};

/// One 16-bit unit of transport payload.
pub type Word = u16;

/// Largest number of words a single read request may carry.
pub const MAX_READ_WORDS: u16 = 125;

/// The two disjoint register address spaces.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterClass {
    /// Read-write registers.
    Holding,
    /// Read-only registers.
    Input,
}

impl RegisterClass {
    pub fn is_writable(&self) -> bool {
        matches!(self, RegisterClass::Holding)
    }

    /// Function code used to read this address space.
    pub fn read_function(&self) -> u8 {
        match self {
            RegisterClass::Holding => 0x03,
            RegisterClass::Input => 0x04,
        }
    }
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterClass::Holding => f.write_str("holding"),
            RegisterClass::Input => f.write_str("input"),
        }
    }
}

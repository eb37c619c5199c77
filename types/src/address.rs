//! Account addresses and function selectors.

use std::fmt;

use crate::hash::hex_identifier;

/// A 20-byte account address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

hex_identifier!(Address, 20);

/// The first four bytes of a call's input data, identifying the invoked function.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncSelector([u8; 4]);

impl FuncSelector {
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Extract the selector from call data. Data shorter than four bytes
    /// (plain value transfers) maps to the zero selector.
    pub fn from_calldata(data: &[u8]) -> Self {
        let mut selector = [0u8; 4];
        if data.len() >= 4 {
            selector.copy_from_slice(&data[..4]);
        }
        Self(selector)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Debug for FuncSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncSelector({})", self)
    }
}

hex_identifier!(FuncSelector, 4);

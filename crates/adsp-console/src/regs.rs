//! Named register access over a memory window.
//!
//! Registers are declared in two phases: a [`RegisterMap`] builder
//! accumulates name → offset bindings, and [`RegisterMap::freeze`] produces
//! the immutable [`RegisterBank`] accessor.  Freezing is irreversible and
//! one-way by construction — there is no way to declare through a bank or
//! to read through a builder.
//!
//! Every [`RegisterBank::read`] goes to the hardware; nothing is cached,
//! because the firmware changes register state asynchronously.

use crate::error::{ConsoleError, Result};
use crate::region::ByteWindow;
use std::collections::HashMap;

/// Builder phase: accumulates register name → offset bindings.
#[derive(Debug)]
pub struct RegisterMap {
    window: ByteWindow,
    offsets: HashMap<&'static str, usize>,
}

impl RegisterMap {
    /// Start declaring registers over `window`.
    ///
    /// Offsets are relative to the window base.
    #[must_use]
    pub fn new(window: ByteWindow) -> Self {
        Self {
            window,
            offsets: HashMap::new(),
        }
    }

    /// Bind `name` to `offset`.
    ///
    /// Re-declaring a name rebinds it; the last declaration before
    /// [`freeze`](Self::freeze) wins.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::OutOfRange`] if the register word would fall
    /// outside the window.
    pub fn declare(&mut self, name: &'static str, offset: usize) -> Result<()> {
        if offset.checked_add(4).is_none_or(|end| end > self.window.len()) {
            return Err(ConsoleError::OutOfRange {
                offset,
                len: 4,
                size: self.window.len(),
            });
        }
        self.offsets.insert(name, offset);
        Ok(())
    }

    /// Switch irreversibly from declaration mode to access mode.
    #[must_use]
    pub fn freeze(self) -> RegisterBank {
        RegisterBank {
            window: self.window,
            offsets: self.offsets,
        }
    }
}

/// Access phase: immutable name → register accessor.
#[derive(Debug)]
pub struct RegisterBank {
    window: ByteWindow,
    offsets: HashMap<&'static str, usize>,
}

impl RegisterBank {
    /// Current value of the named register (fresh hardware read).
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::UnknownRegister`] for an undeclared name.
    pub fn read(&self, name: &str) -> Result<u32> {
        self.window.read_u32(self.offset(name)?)
    }

    /// Store `value` to the named register.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::UnknownRegister`] for an undeclared name.
    pub fn write(&self, name: &str, value: u32) -> Result<()> {
        self.window.write_u32(self.offset(name)?, value)
    }

    /// True if `name` was declared before freezing.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.offsets.contains_key(name)
    }

    fn offset(&self, name: &str) -> Result<usize> {
        self.offsets
            .get(name)
            .copied()
            .ok_or_else(|| ConsoleError::unknown_register(name))
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

use std::fmt;

use anyhow::{anyhow as error, Result};

pub mod error;
pub mod lines;
pub mod linux;
pub mod load_module;
pub mod loader;
pub mod path;

use crate::path::FilePath;

pub trait Module<'data> {
    /// Path to the executable module file.
    fn executable_path(&self) -> &FilePath;

    /// Path to the file containing debug info for the executable.
    ///
    /// May be the same as the executable path.
    fn debuginfo_path(&self) -> &FilePath;

    /// Raw bytes of the file that contains debug info.
    ///
    /// May be the same as the executable data.
    fn debuginfo_data(&self) -> &'data [u8];
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address(pub u64);

impl Address {
    pub fn offset_by(&self, offset: Offset) -> Result<Address> {
        let addr = self
            .0
            .checked_add(offset.0)
            .ok_or_else(|| error!("overflow: {:x} + {:x}", self.0, offset.0))?;

        Ok(Address(addr))
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Module-relative virtual offset.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Offset(pub u64);

impl fmt::LowerHex for Offset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

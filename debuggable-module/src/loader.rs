// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{Context, Result};

use crate::path::FilePath;

/// Reads module and debug info files once, and hands out borrowed views of their bytes
/// for as long as the loader lives.
#[derive(Default)]
pub struct Loader {
    loaded: elsa::sync::FrozenMap<FilePath, Box<[u8]>>,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, path: &FilePath) -> Result<&[u8]> {
        // Two threads racing on the same new path may both read it. The first insert
        // wins, and both get its data back.
        if let Some(data) = self.loaded.get(path) {
            return Ok(data);
        }

        let data: Box<[u8]> = std::fs::read(path)
            .with_context(|| format!("unable to read module file `{path}`"))?
            .into();

        Ok(self.loaded.insert(path.clone(), data))
    }
}

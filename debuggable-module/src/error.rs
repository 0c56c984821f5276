// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

use crate::path::FilePath;

/// Debug info exists for a module, but could not be turned into a line table.
#[derive(Debug, Error)]
pub enum SymbolLoadError {
    #[error("unable to parse debug info file `{path}`: {message}")]
    Parse { path: FilePath, message: String },

    #[error("unable to open debug session for `{path}`: {message}")]
    Session { path: FilePath, message: String },

    #[error("corrupt debug info in `{path}`: {message}")]
    Corrupt { path: FilePath, message: String },
}

impl SymbolLoadError {
    pub fn path(&self) -> &FilePath {
        match self {
            Self::Parse { path, .. } | Self::Session { path, .. } | Self::Corrupt { path, .. } => {
                path
            }
        }
    }
}

/// A source path substitution rule that is not of the form `<build prefix>?<local prefix>`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid path substitution `{rule}`: expected `<build prefix>?<local prefix>`")]
pub struct InvalidSubstitution {
    pub rule: String,
}

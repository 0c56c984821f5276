// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::path::PathBuf;

use debuggable_module::error::InvalidSubstitution;
use thiserror::Error;

/// Invalid filter configuration. Always detected before a target is launched.
#[derive(Debug, Error)]
pub enum FilterConfigError {
    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid allowlist rule at line {line}: `{rule}`")]
    AllowListRule { line: usize, rule: String },

    #[error("invalid excluded line regex `{regex}`: {source}")]
    LineRegex { regex: String, source: regex::Error },

    #[error("invalid unified diff at line {line}: {message}")]
    Diff { line: usize, message: String },

    #[error(transparent)]
    Substitution(#[from] InvalidSubstitution),

    #[error("unable to read `{}`: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
}

/// The target process could not be brought under debugger control.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("unable to launch `{}`: {message}", program.display())]
    Launch { program: PathBuf, message: String },

    #[error("unable to attach to process {pid}: {message}")]
    Attach { pid: i32, message: String },

    #[error("did not see initial execve() in tracee")]
    NoInitialExec,

    #[error("coverage recording is not supported on this platform")]
    Unsupported,
}

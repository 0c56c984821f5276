// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod allowlist;
pub mod binary;
pub mod cancel;
pub mod diff;
pub mod error;
pub mod filter;
pub mod merge;
pub mod record;
pub mod source;
pub mod timer;
pub mod warnings;

#[cfg(test)]
mod test_utils;

// Re-exports.
pub use allowlist::AllowList;
pub use filter::CoverageFilter;
pub use record::{CoverageRecorder, Recorded, StartInfo};
pub use source::RunCoverage;

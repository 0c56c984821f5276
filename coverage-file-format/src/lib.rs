// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde;

pub mod coverage;
pub mod export;

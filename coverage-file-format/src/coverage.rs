// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod binary;
pub mod cobertura;

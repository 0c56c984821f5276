// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use debuggable_module::path::FilePath;

use crate::source::{FileCoverage, ModuleCoverage, RunCoverage};

/// Combine runs into a new one.
///
/// Modules, files and lines are unioned by key. Flags are OR'd and counts summed, so the
/// result does not depend on input order, except for the exit code, which is the last
/// one present.
pub fn merge<'a>(runs: impl IntoIterator<Item = &'a RunCoverage>) -> RunCoverage {
    let mut exit_code = None;
    let mut modules: BTreeMap<FilePath, ModuleCoverage> = BTreeMap::new();

    for run in runs {
        if run.exit_code.is_some() {
            exit_code = run.exit_code;
        }

        for module in &run.modules {
            modules
                .entry(module.path.clone())
                .or_insert_with(|| ModuleCoverage::new(module.path.clone()))
                .add(module);
        }
    }

    RunCoverage {
        exit_code,
        modules: modules.into_values().collect(),
    }
}

/// Re-key `run` by source file alone.
///
/// Each distinct source file becomes one module named after it, holding the sum of that
/// file's coverage across every module that contains it.
pub fn aggregate_by_file(run: &RunCoverage) -> RunCoverage {
    let mut files: BTreeMap<FilePath, FileCoverage> = BTreeMap::new();

    for module in &run.modules {
        for (path, file) in &module.files {
            files.entry(path.clone()).or_default().add(file);
        }
    }

    let modules = files
        .into_iter()
        .map(|(path, file)| {
            let mut module = ModuleCoverage::new(path.clone());
            module.files.insert(path, file);
            module
        })
        .collect();

    RunCoverage {
        exit_code: run.exit_code,
        modules,
    }
}

#[cfg(test)]
mod tests;

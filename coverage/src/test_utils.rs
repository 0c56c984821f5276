// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod arbitraries {
    use std::collections::BTreeMap;

    use debuggable_module::path::FilePath;
    use proptest::collection::{btree_map, vec};
    use proptest::prelude::*;

    use crate::source::{Count, FileCoverage, Line, LineCoverage, ModuleCoverage, RunCoverage};

    // Small pools, so that generated runs share keys often.
    const MODULES: &[&str] = &["/bin/app", "/lib/libfoo.so", "/lib/libbar.so"];
    const FILES: &[&str] = &["/src/main.c", "/src/foo.c", "/include/foo.h"];

    prop_compose! {
        fn arb_line_coverage()(
            has_instrumentation_point in any::<bool>(),
            selected in any::<bool>(),
            count in 0u32..4,
        ) -> LineCoverage {
            let reportable = has_instrumentation_point && selected;

            LineCoverage {
                has_instrumentation_point,
                selected,
                count: Count(if reportable { count } else { 0 }),
            }
        }
    }

    prop_compose! {
        fn arb_file()(
            lines in btree_map(1u32..40, arb_line_coverage(), 0..8)
        ) -> FileCoverage {
            let lines = lines
                .into_iter()
                .filter_map(|(line, coverage)| Some((Line::new(line).ok()?, coverage)))
                .collect();

            FileCoverage { lines }
        }
    }

    prop_compose! {
        fn arb_module()(
            path in prop::sample::select(MODULES),
            files in btree_map(prop::sample::select(FILES), arb_file(), 0..3),
        ) -> ModuleCoverage {
            let mut module = ModuleCoverage::new(FilePath::new(path).unwrap());

            for (file, coverage) in files {
                module.files.insert(FilePath::new(file).unwrap(), coverage);
            }

            module
        }
    }

    prop_compose! {
        pub fn arb_run()(
            exit_code in prop::option::of(0i32..3),
            modules in vec(arb_module(), 0..4),
        ) -> RunCoverage {
            // Module paths are unique within a run.
            let mut unique = BTreeMap::new();
            for module in modules {
                unique.entry(module.path.clone()).or_insert(module);
            }

            RunCoverage {
                exit_code,
                modules: unique.into_values().collect(),
            }
        }
    }
}

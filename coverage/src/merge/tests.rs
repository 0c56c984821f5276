// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use debuggable_module::path::FilePath;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;
use crate::source::{Count, Line, LineCoverage};
use crate::test_utils::arbitraries::arb_run;

// Line `(line, instrumented, selected, count)`.
macro_rules! lines {
    ( $( ($line: expr, $ip: expr, $selected: expr, $count: expr), )* ) => {{
        let mut file = FileCoverage::default();

        $(
            file.lines.insert(
                Line::new($line)?,
                LineCoverage {
                    has_instrumentation_point: $ip,
                    selected: $selected,
                    count: Count($count),
                },
            );
        )*

        file
    }}
}

macro_rules! module {
    ( $path: expr => { $( $file: expr => $lines: tt, )* } ) => {{
        let mut module = ModuleCoverage::new(FilePath::new($path)?);

        $(
            module.files.insert(FilePath::new($file)?, lines! $lines);
        )*

        module
    }}
}

const MAIN_C: &str = "/src/main.c";
const UTIL_H: &str = "/src/util.h";

#[test]
fn test_merge_sums_shared_lines() -> Result<()> {
    let a = RunCoverage {
        exit_code: Some(0),
        modules: vec![module! {
            "/bin/app" => {
                MAIN_C => {
                    (1, true, true, 1),
                    (2, true, true, 0),
                    (3, false, true, 0),
                },
            }
        }],
    };

    let b = RunCoverage {
        exit_code: Some(3),
        modules: vec![module! {
            "/bin/app" => {
                MAIN_C => {
                    (1, true, true, 1),
                    (2, true, true, 1),
                    (4, true, false, 0),
                },
            }
        }],
    };

    let merged = merge([&a, &b]);

    let expected = RunCoverage {
        exit_code: Some(3),
        modules: vec![module! {
            "/bin/app" => {
                MAIN_C => {
                    (1, true, true, 2),
                    (2, true, true, 1),
                    (3, false, true, 0),
                    (4, true, false, 0),
                },
            }
        }],
    };

    assert_eq!(merged, expected);

    Ok(())
}

#[test]
fn test_merge_orders_modules_by_path() -> Result<()> {
    let a = RunCoverage {
        exit_code: None,
        modules: vec![
            module! { "/lib/libz.so" => {} },
            module! { "/bin/app" => {} },
        ],
    };

    let b = RunCoverage {
        exit_code: None,
        modules: vec![module! { "/lib/libc.so" => {} }],
    };

    let merged = merge([&a, &b]);
    let paths: Vec<_> = merged.modules.iter().map(|m| m.path.as_str()).collect();

    assert_eq!(paths, vec!["/bin/app", "/lib/libc.so", "/lib/libz.so"]);
    assert_eq!(merged.exit_code, None);

    Ok(())
}

#[test]
fn test_merge_does_not_mutate_inputs() -> Result<()> {
    let a = RunCoverage {
        exit_code: Some(0),
        modules: vec![module! {
            "/bin/app" => { MAIN_C => { (1, true, true, 1), }, }
        }],
    };
    let before = a.clone();

    let _ = merge([&a, &a]);

    assert_eq!(a, before);

    Ok(())
}

#[test]
fn test_merge_nothing() {
    assert_eq!(merge([]), RunCoverage::default());
}

#[test]
fn test_aggregate_by_file() -> Result<()> {
    let run = RunCoverage {
        exit_code: Some(0),
        modules: vec![
            module! {
                "/bin/app" => {
                    MAIN_C => { (1, true, true, 1), },
                    UTIL_H => { (5, true, true, 1), (6, true, true, 0), },
                }
            },
            module! {
                "/lib/libutil.so" => {
                    UTIL_H => { (5, true, true, 1), (7, false, true, 0), },
                }
            },
        ],
    };

    let aggregated = aggregate_by_file(&run);

    let expected = RunCoverage {
        exit_code: Some(0),
        modules: vec![
            module! {
                MAIN_C => { MAIN_C => { (1, true, true, 1), }, }
            },
            module! {
                UTIL_H => {
                    UTIL_H => {
                        (5, true, true, 2),
                        (6, true, true, 0),
                        (7, false, true, 0),
                    },
                }
            },
        ],
    };

    assert_eq!(aggregated, expected);

    Ok(())
}

fn counts(run: &RunCoverage) -> Vec<(String, String, u32, LineCoverage)> {
    let mut counts = vec![];

    for module in &run.modules {
        for (path, file) in &module.files {
            for (line, coverage) in &file.lines {
                counts.push((
                    module.path.to_string(),
                    path.to_string(),
                    line.number(),
                    *coverage,
                ));
            }
        }
    }

    counts
}

proptest! {
    #[test]
    fn test_merge_is_commutative(a in arb_run(), b in arb_run()) {
        let ab = merge([&a, &b]);
        let ba = merge([&b, &a]);

        prop_assert_eq!(ab.modules, ba.modules);
    }

    #[test]
    fn test_merge_is_associative(a in arb_run(), b in arb_run(), c in arb_run()) {
        let left = merge([&merge([&a, &b]), &c]);
        let right = merge([&a, &merge([&b, &c])]);

        prop_assert_eq!(left, right);
    }

    #[test]
    fn test_merge_with_self_doubles_counts(a in arb_run()) {
        let doubled = merge([&a, &a]);
        let single = merge([&a]);

        for ((_, _, _, twice), (_, _, _, once)) in counts(&doubled).iter().zip(counts(&single).iter()) {
            prop_assert_eq!(twice.count.0, once.count.0.saturating_mul(2));
        }
    }

    #[test]
    fn test_merge_never_counts_uninstrumented_lines(a in arb_run(), b in arb_run()) {
        for (_, _, _, line) in counts(&merge([&a, &b])) {
            if !line.has_instrumentation_point {
                prop_assert_eq!(line.count, Count(0));
            }
        }
    }

    #[test]
    fn test_aggregate_preserves_totals(a in arb_run()) {
        let total: u64 = counts(&a).iter().map(|(_, _, _, l)| u64::from(l.count.0)).sum();
        let aggregated: u64 = counts(&aggregate_by_file(&a)).iter().map(|(_, _, _, l)| u64::from(l.count.0)).sum();

        prop_assert_eq!(total, aggregated);
    }
}

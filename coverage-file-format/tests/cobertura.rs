// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use coverage::source::{Count, FileCoverage, Line, LineCoverage, ModuleCoverage, RunCoverage};
use coverage_file_format::coverage::cobertura::CoberturaCoverage;
use debuggable_module::path::FilePath;
use pretty_assertions::assert_eq;

fn run() -> Result<RunCoverage> {
    let mut main_c = FileCoverage::default();
    main_c.lines.insert(
        Line::new(10)?,
        LineCoverage {
            has_instrumentation_point: true,
            selected: true,
            count: Count(3),
        },
    );
    main_c
        .lines
        .insert(Line::new(11)?, LineCoverage::new(true, true));

    // Not listed, and not counted in rates.
    main_c
        .lines
        .insert(Line::new(12)?, LineCoverage::new(true, false));

    let mut excluded_h = FileCoverage::default();
    excluded_h
        .lines
        .insert(Line::new(1)?, LineCoverage::new(true, false));

    let mut main = ModuleCoverage::new(FilePath::new("/build/main")?);
    main.files.insert(FilePath::new("/src/main.c")?, main_c);
    main.files
        .insert(FilePath::new("/src/excluded & old.h")?, excluded_h);

    Ok(RunCoverage {
        exit_code: Some(0),
        modules: vec![main, ModuleCoverage::new(FilePath::new("/lib/libc.so.6")?)],
    })
}

#[test]
fn test_cobertura_model() -> Result<()> {
    let xml = CoberturaCoverage::from(&run()?);

    assert_eq!(xml.lines_valid, 2);
    assert_eq!(xml.lines_covered, 1);
    assert!((xml.line_rate - 0.5).abs() < f64::EPSILON);

    // Modules without reportable lines are dropped.
    assert_eq!(xml.packages.packages.len(), 1);

    let package = &xml.packages.packages[0];
    assert_eq!(package.name, "/build/main");
    assert_eq!(package.classes.classes.len(), 1);

    let class = &package.classes.classes[0];
    assert_eq!(class.name, "main.c");
    assert_eq!(class.filename, "/src/main.c");

    let lines: Vec<_> = class.lines.lines.iter().map(|l| (l.number, l.hits)).collect();
    assert_eq!(lines, vec![(10, 3), (11, 0)]);

    Ok(())
}

#[test]
fn test_cobertura_xml() -> Result<()> {
    let text = CoberturaCoverage::from(&run()?).to_string()?;

    assert!(text.starts_with("<coverage line-rate=\"0.5000\""));
    assert!(text.contains("lines-covered=\"1\" lines-valid=\"2\""));
    assert!(text.contains("<source>/src/main.c</source>"));
    assert!(text.contains("<package name=\"/build/main\""));
    assert!(text.contains("<class name=\"main.c\" filename=\"/src/main.c\""));
    assert!(text.contains("<line number=\"10\" hits=\"3\" branch=\"false\"/>"));
    assert!(!text.contains("number=\"12\""));

    // Files without reportable lines are not listed.
    assert!(!text.contains("excluded &amp; old.h"));

    Ok(())
}

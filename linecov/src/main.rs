// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Context, Result};
use coverage::cancel::Cancellation;
use coverage::merge::{aggregate_by_file, merge};
use coverage::record::{CoverageRecorder, StartInfo};
use coverage::source::RunCoverage;
use coverage::warnings::{Warning, Warnings};
use coverage_file_format::coverage::binary;
use coverage_file_format::export::default_prefix;

mod options;

use options::{Config, Options, RecordSettings};

/// Exit code when no target exit code applies and the run did not succeed.
const FAILURE_EXIT_CODE: i32 = 1;

fn main() {
    let args: Vec<OsString> = std::env::args_os().collect();

    let options = match Options::from_args(args) {
        Ok(options) => options,
        Err(err) => usage_error(err),
    };

    env_logger::Builder::new()
        .filter_level(options.log_level())
        .parse_default_env()
        .init();

    let mut warnings = Warnings::new();

    let code = match run(&options, &mut warnings) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            FAILURE_EXIT_CODE
        }
    };

    print_warnings(&warnings);

    std::process::exit(code);
}

fn usage_error(err: anyhow::Error) -> ! {
    if let Some(err) = err.downcast_ref::<clap::Error>() {
        // `--help` and `--version` exit successfully.
        if !err.use_stderr() {
            err.exit();
        }

        let _ = err.print();
    } else {
        eprintln!("error: {err:#}");
    }

    std::process::exit(FAILURE_EXIT_CODE);
}

fn run(options: &Options, warnings: &mut Warnings) -> Result<i32> {
    let config = options.config()?;

    let mut runs = load_inputs(&config, warnings)?;
    let mut exit_code = 0;

    if let Some(start) = &config.start {
        let recorded = record(start.clone(), &config, warnings)?;

        if let Some(code) = recorded.exit_code {
            if code != 0 {
                error!("target exited with code {code}");
            }

            exit_code = code;
        }

        // Last, so its exit code wins the merge.
        runs.push(recorded);
    }

    let mut coverage = match runs.len() {
        // Keep the load order of a single run.
        1 => runs.remove(0),
        _ => merge(&runs),
    };

    if config.aggregate_by_file {
        coverage = aggregate_by_file(&coverage);
    }

    let summary = coverage.summary();
    info!(
        "covered {} of {} lines ({:.2}%)",
        summary.lines_covered,
        summary.lines_valid,
        summary.rate() * 100.0
    );

    let prefix = default_prefix(config.start.as_ref().and_then(StartInfo::program));

    for export in &config.exports {
        export.export(&coverage, &prefix)?;
    }

    Ok(exit_code)
}

fn load_inputs(config: &Config, warnings: &mut Warnings) -> Result<Vec<RunCoverage>> {
    let mut runs = vec![];

    for path in &config.inputs {
        match binary::load(path) {
            Ok(run) => {
                info!("loaded coverage input `{}`", path.display());
                runs.push(run);
            }
            Err(err) if config.abort_on_invalid_input => {
                return Err(err).context("merge aborted on invalid input");
            }
            Err(err) => {
                // Logged by `Warnings::push`.
                warnings.push(Warning::InvalidInput {
                    path: PathBuf::from(path),
                    reason: format!("{err:#}"),
                });
            }
        }
    }

    Ok(runs)
}

fn record(start: StartInfo, config: &Config, warnings: &mut Warnings) -> Result<RunCoverage> {
    let cancellation = Cancellation::new();

    let on_interrupt = cancellation.clone();
    interrupt::register(move || on_interrupt.cancel());

    if let Err(err) = interrupt::install() {
        warn!("unable to install Ctrl+C handler: {err}");
    }

    let RecordSettings {
        substitutions,
        cover_children,
        continue_after_exception,
        optimized_build,
        max_unmatched_paths,
        timeout,
    } = config.settings.clone();

    match start.program() {
        Some(program) => info!("recording `{}`", program.display()),
        None => info!("recording attached process"),
    }

    let recorded = CoverageRecorder::new(start)
        .filter(config.filter.clone())
        .substitutions(substitutions)
        .cover_children(cover_children)
        .continue_after_exception(continue_after_exception)
        .optimized_build(optimized_build)
        .max_unmatched_paths(max_unmatched_paths)
        .timeout(timeout)
        .cancellation(cancellation)
        .record()?;

    warnings.extend(recorded.warnings);

    Ok(recorded.coverage)
}

fn print_warnings(warnings: &Warnings) {
    if warnings.is_empty() {
        return;
    }

    eprintln!("{} warning(s):", warnings.len());

    for warning in warnings.iter() {
        eprintln!("  {warning}");
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn config(args: &[&str]) -> Result<Config> {
        let args: Vec<OsString> = std::iter::once("linecov")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect();

        Options::from_args(args)?.config()
    }

    #[test]
    fn test_invalid_input_is_one_warning() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("bad.cov");
        std::fs::write(&input, b"not coverage")?;

        let config = config(&["--input-coverage", &input.to_string_lossy()])?;
        let mut warnings = Warnings::new();

        let runs = load_inputs(&config, &mut warnings)?;

        assert!(runs.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings.iter().next(),
            Some(Warning::InvalidInput { path, .. }) if *path == input
        ));

        Ok(())
    }

    #[test]
    fn test_invalid_input_aborts_when_asked() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("bad.cov");
        std::fs::write(&input, b"not coverage")?;

        let config = config(&[
            "--input-coverage",
            &input.to_string_lossy(),
            "--abort-on-invalid-input",
        ])?;
        let mut warnings = Warnings::new();

        assert!(load_inputs(&config, &mut warnings).is_err());
        assert!(warnings.is_empty());

        Ok(())
    }
}

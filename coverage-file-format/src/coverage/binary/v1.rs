// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;

use coverage::source::{Count, FileCoverage, Line, LineCoverage, ModuleCoverage, RunCoverage};
use debuggable_module::path::FilePath;

use super::FormatError;

/// A persisted run. The exit code belongs to a live run only and is not stored.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RunCoverageRecord {
    pub modules: Vec<ModuleRecord>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ModuleRecord {
    pub path: String,
    pub files: Vec<FileRecord>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub lines: Vec<LineRecord>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LineRecord {
    pub number: u32,
    pub has_instrumentation_point: bool,
    pub selected: bool,
    pub count: u32,
}

impl From<&RunCoverage> for RunCoverageRecord {
    fn from(run: &RunCoverage) -> Self {
        let modules = run
            .modules
            .iter()
            .map(|module| ModuleRecord {
                path: module.path.to_string(),
                files: module
                    .files
                    .iter()
                    .map(|(path, file)| FileRecord {
                        path: path.to_string(),
                        lines: file
                            .lines
                            .iter()
                            .map(|(line, coverage)| LineRecord {
                                number: line.number(),
                                has_instrumentation_point: coverage.has_instrumentation_point,
                                selected: coverage.selected,
                                count: coverage.count.0,
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Self { modules }
    }
}

impl TryFrom<RunCoverageRecord> for RunCoverage {
    type Error = FormatError;

    fn try_from(record: RunCoverageRecord) -> Result<Self, FormatError> {
        let mut run = RunCoverage {
            exit_code: None,
            modules: vec![],
        };

        let mut seen = BTreeSet::new();

        for module in record.modules {
            let path = file_path(module.path)?;

            if !seen.insert(path.clone()) {
                return Err(invalid(format!("duplicate module `{path}`")));
            }

            let mut coverage = ModuleCoverage::new(path);

            for file in module.files {
                let path = file_path(file.path)?;
                let lines = file_lines(&path, file.lines)?;

                if coverage.files.insert(path.clone(), lines).is_some() {
                    return Err(invalid(format!(
                        "duplicate file `{path}` in module `{}`",
                        coverage.path
                    )));
                }
            }

            run.modules.push(coverage);
        }

        Ok(run)
    }
}

fn file_lines(path: &FilePath, records: Vec<LineRecord>) -> Result<FileCoverage, FormatError> {
    let mut file = FileCoverage::default();

    for record in records {
        let line = Line::new(record.number)
            .map_err(|_| invalid(format!("line 0 in `{path}`")))?;

        if record.count > 0 && !record.has_instrumentation_point {
            return Err(invalid(format!(
                "hits on line {line} of `{path}` without instrumentation point"
            )));
        }

        let coverage = LineCoverage {
            has_instrumentation_point: record.has_instrumentation_point,
            selected: record.selected,
            count: Count(record.count),
        };

        if file.lines.insert(line, coverage).is_some() {
            return Err(invalid(format!("duplicate line {line} in `{path}`")));
        }
    }

    Ok(file)
}

fn file_path(path: String) -> Result<FilePath, FormatError> {
    FilePath::new(path).map_err(|err| invalid(err.to_string()))
}

fn invalid(message: String) -> FormatError {
    FormatError::Invalid(message)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn line(number: u32, count: u32) -> LineRecord {
        LineRecord {
            number,
            has_instrumentation_point: true,
            selected: true,
            count,
        }
    }

    fn record(modules: Vec<ModuleRecord>) -> RunCoverageRecord {
        RunCoverageRecord { modules }
    }

    fn module(path: &str, files: Vec<FileRecord>) -> ModuleRecord {
        ModuleRecord {
            path: path.into(),
            files,
        }
    }

    fn file(path: &str, lines: Vec<LineRecord>) -> FileRecord {
        FileRecord {
            path: path.into(),
            lines,
        }
    }

    #[test]
    fn test_valid_record() {
        let record = record(vec![
            module("/bin/main", vec![file("/src/main.c", vec![line(1, 2)])]),
            module("/lib/libz.so", vec![]),
        ]);

        let run = RunCoverage::try_from(record.clone()).unwrap();
        assert_eq!(run.modules.len(), 2);
        assert_eq!(RunCoverageRecord::from(&run), record);
    }

    #[test]
    fn test_line_zero() {
        let record = record(vec![module(
            "/bin/main",
            vec![file("/src/main.c", vec![line(0, 0)])],
        )]);

        assert!(matches!(
            RunCoverage::try_from(record),
            Err(FormatError::Invalid(..))
        ));
    }

    #[test]
    fn test_hits_without_instrumentation_point() {
        let mut bad = line(3, 1);
        bad.has_instrumentation_point = false;

        let record = record(vec![module(
            "/bin/main",
            vec![file("/src/main.c", vec![bad])],
        )]);

        assert!(matches!(
            RunCoverage::try_from(record),
            Err(FormatError::Invalid(..))
        ));
    }

    #[test]
    fn test_duplicates() {
        let modules = record(vec![
            module("/bin/main", vec![]),
            module("/bin/main", vec![]),
        ]);
        assert!(RunCoverage::try_from(modules).is_err());

        let files = record(vec![module(
            "/bin/main",
            vec![file("/src/a.c", vec![]), file("/src/a.c", vec![])],
        )]);
        assert!(RunCoverage::try_from(files).is_err());

        let lines = record(vec![module(
            "/bin/main",
            vec![file("/src/a.c", vec![line(4, 0), line(4, 1)])],
        )]);
        assert!(RunCoverage::try_from(lines).is_err());
    }
}

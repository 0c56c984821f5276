// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Output formats for a final coverage run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use coverage::source::RunCoverage;
use thiserror::Error;

use crate::coverage::binary;
use crate::coverage::cobertura::CoberturaCoverage;

/// Output prefix when no target program ran.
pub const DEFAULT_PREFIX: &str = "CoverageOutput";

pub trait Exporter {
    fn export(&self, coverage: &RunCoverage, path: &Path) -> Result<()>;

    /// Output path used when none is given, derived from `prefix`.
    fn default_path(&self, prefix: &str) -> PathBuf;
}

/// Persisted form, a valid input for later merges.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryExporter;

impl Exporter for BinaryExporter {
    fn export(&self, coverage: &RunCoverage, path: &Path) -> Result<()> {
        binary::save(path, coverage)
    }

    fn default_path(&self, prefix: &str) -> PathBuf {
        PathBuf::from(format!("{prefix}.cov"))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CoberturaExporter;

impl Exporter for CoberturaExporter {
    fn export(&self, coverage: &RunCoverage, path: &Path) -> Result<()> {
        let mut xml = CoberturaCoverage::from(coverage);
        xml.timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        let text = xml.to_string()?;

        std::fs::write(path, text)
            .with_context(|| format!("unable to write Cobertura report `{}`", path.display()))
    }

    fn default_path(&self, prefix: &str) -> PathBuf {
        PathBuf::from(format!("{prefix}Coverage.xml"))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExportKind {
    Binary,
    Cobertura,
}

impl ExportKind {
    pub fn exporter(&self) -> Box<dyn Exporter> {
        match self {
            Self::Binary => Box::new(BinaryExporter),
            Self::Cobertura => Box::new(CoberturaExporter),
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Cobertura => write!(f, "cobertura"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown export type `{0}` (expected `binary` or `cobertura`)")]
pub struct UnknownExportKind(pub String);

impl FromStr for ExportKind {
    type Err = UnknownExportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "cobertura" => Ok(Self::Cobertura),
            _ => Err(UnknownExportKind(s.to_owned())),
        }
    }
}

/// An export request, `<kind>[:<path>]`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExportSpec {
    pub kind: ExportKind,
    pub path: Option<PathBuf>,
}

impl ExportSpec {
    pub fn new(kind: ExportKind) -> Self {
        Self { kind, path: None }
    }

    pub fn output_path(&self, prefix: &str) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => self.kind.exporter().default_path(prefix),
        }
    }

    pub fn export(&self, coverage: &RunCoverage, prefix: &str) -> Result<PathBuf> {
        let path = self.output_path(prefix);

        self.kind.exporter().export(coverage, &path)?;
        info!("exported {} coverage to `{}`", self.kind, path.display());

        Ok(path)
    }
}

impl FromStr for ExportSpec {
    type Err = UnknownExportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, path) = match s.split_once(':') {
            Some((kind, path)) if !path.is_empty() => (kind, Some(PathBuf::from(path))),
            Some((kind, _)) => (kind, None),
            None => (s, None),
        };

        Ok(Self {
            kind: kind.parse()?,
            path,
        })
    }
}

/// Output prefix for a run: the stem of the target program, if one ran.
pub fn default_prefix(program: Option<&Path>) -> String {
    program
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_PREFIX.to_owned())
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{Cursor, Write};

use coverage::source::{FileCoverage, ModuleCoverage, RunCoverage};
use debuggable_module::path::FilePath;
use quick_xml::{Result, Writer};

impl CoberturaCoverage {
    pub fn to_string(&self) -> anyhow::Result<String> {
        let mut data = Vec::new();
        let cursor = Cursor::new(&mut data);

        let mut writer = Writer::new_with_indent(cursor, b' ', 2);

        self.write_xml(&mut writer)?;

        let text = String::from_utf8(data)?;
        Ok(text)
    }
}

trait WriteXml {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()>;
}

// Only write optional fields if present.
impl<T> WriteXml for Option<T>
where
    T: WriteXml,
{
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        if let Some(value) = self {
            value.write_xml(writer)?;
        }

        Ok(())
    }
}

impl<T> WriteXml for Vec<T>
where
    T: WriteXml,
{
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        for value in self {
            value.write_xml(writer)?;
        }

        Ok(())
    }
}

macro_rules! float {
    ($val: expr) => {
        format!("{:.04}", $val).as_str()
    };
}

macro_rules! uint {
    ($val: expr) => {
        format!("{}", $val).as_str()
    };
}

macro_rules! string {
    ($val: expr) => {
        &*quick_xml::escape::escape(&$val)
    };
}

// <!ELEMENT coverage (sources?,packages)>
// <!ATTLIST coverage line-rate        CDATA #REQUIRED>
// <!ATTLIST coverage branch-rate      CDATA #REQUIRED>
// <!ATTLIST coverage lines-covered    CDATA #REQUIRED>
// <!ATTLIST coverage lines-valid      CDATA #REQUIRED>
// <!ATTLIST coverage branches-covered CDATA #REQUIRED>
// <!ATTLIST coverage branches-valid   CDATA #REQUIRED>
// <!ATTLIST coverage complexity       CDATA #REQUIRED>
// <!ATTLIST coverage version          CDATA #REQUIRED>
// <!ATTLIST coverage timestamp        CDATA #REQUIRED>
#[derive(Clone, Debug, Default)]
pub struct CoberturaCoverage {
    pub sources: Option<Sources>,
    pub packages: Packages,

    pub line_rate: f64,
    pub lines_covered: u64,
    pub lines_valid: u64,
    pub version: String,
    pub timestamp: u64,
}

impl WriteXml for CoberturaCoverage {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        // Branch coverage is not measured.
        writer
            .create_element("coverage")
            .with_attributes([
                ("line-rate", float!(self.line_rate)),
                ("branch-rate", float!(0.0)),
                ("lines-covered", uint!(self.lines_covered)),
                ("lines-valid", uint!(self.lines_valid)),
                ("branches-covered", "0"),
                ("branches-valid", "0"),
                ("complexity", "0"),
                ("version", string!(self.version)),
                ("timestamp", uint!(self.timestamp)),
            ])
            .write_inner_content(|w| {
                self.sources.write_xml(w)?;
                self.packages.write_xml(w)?;

                Ok(())
            })?;

        Ok(())
    }
}

// <!ELEMENT sources (source*)>
#[derive(Clone, Debug, Default)]
pub struct Sources {
    pub sources: Vec<Source>,
}

impl WriteXml for Sources {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer
            .create_element("sources")
            .write_inner_content(|w| self.sources.write_xml(w))?;

        Ok(())
    }
}

// <!ELEMENT source (#PCDATA)>
#[derive(Clone, Debug, Default)]
pub struct Source {
    pub path: String,
}

impl WriteXml for Source {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer
            .create_element("source")
            .write_text_content(quick_xml::events::BytesText::new(&self.path))?;

        Ok(())
    }
}

// <!ELEMENT packages (package*)>
#[derive(Clone, Debug, Default)]
pub struct Packages {
    pub packages: Vec<Package>,
}

impl WriteXml for Packages {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer
            .create_element("packages")
            .write_inner_content(|w| self.packages.write_xml(w))?;

        Ok(())
    }
}

// <!ELEMENT package (classes)>
// <!ATTLIST package name        CDATA #REQUIRED>
// <!ATTLIST package line-rate   CDATA #REQUIRED>
// <!ATTLIST package branch-rate CDATA #REQUIRED>
// <!ATTLIST package complexity  CDATA #REQUIRED>
#[derive(Clone, Debug, Default)]
pub struct Package {
    pub classes: Classes,

    pub name: String,
    pub line_rate: f64,
}

impl WriteXml for Package {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer
            .create_element("package")
            .with_attributes([
                ("name", string!(self.name)),
                ("line-rate", float!(self.line_rate)),
                ("branch-rate", float!(0.0)),
                ("complexity", "0"),
            ])
            .write_inner_content(|w| self.classes.write_xml(w))?;

        Ok(())
    }
}

// <!ELEMENT classes (class*)>
#[derive(Clone, Debug, Default)]
pub struct Classes {
    pub classes: Vec<Class>,
}

impl WriteXml for Classes {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer
            .create_element("classes")
            .write_inner_content(|w| self.classes.write_xml(w))?;

        Ok(())
    }
}

// <!ELEMENT class (methods,lines)>
// <!ATTLIST class name        CDATA #REQUIRED>
// <!ATTLIST class filename    CDATA #REQUIRED>
// <!ATTLIST class line-rate   CDATA #REQUIRED>
// <!ATTLIST class branch-rate CDATA #REQUIRED>
// <!ATTLIST class complexity  CDATA #REQUIRED>
#[derive(Clone, Debug, Default)]
pub struct Class {
    pub lines: Lines,

    pub name: String,
    pub filename: String,
    pub line_rate: f64,
}

impl WriteXml for Class {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer
            .create_element("class")
            .with_attributes([
                ("name", string!(self.name)),
                ("filename", string!(self.filename)),
                ("line-rate", float!(self.line_rate)),
                ("branch-rate", float!(0.0)),
                ("complexity", "0"),
            ])
            .write_inner_content(|w| {
                // No function-level data.
                w.create_element("methods").write_empty()?;
                self.lines.write_xml(w)?;
                Ok(())
            })?;

        Ok(())
    }
}

// <!ELEMENT lines (line*)>
#[derive(Clone, Debug, Default)]
pub struct Lines {
    pub lines: Vec<Line>,
}

impl WriteXml for Lines {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer
            .create_element("lines")
            .write_inner_content(|w| self.lines.write_xml(w))?;

        Ok(())
    }
}

// <!ELEMENT line (conditions*)>
// <!ATTLIST line number CDATA #REQUIRED>
// <!ATTLIST line hits   CDATA #REQUIRED>
// <!ATTLIST line branch CDATA "false">
#[derive(Clone, Debug, Default)]
pub struct Line {
    pub number: u64,
    pub hits: u64,
}

impl WriteXml for Line {
    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer
            .create_element("line")
            .with_attributes([
                ("number", uint!(self.number)),
                ("hits", uint!(self.hits)),
                ("branch", "false"),
            ])
            .write_empty()?;

        Ok(())
    }
}

impl From<&RunCoverage> for CoberturaCoverage {
    fn from(run: &RunCoverage) -> Self {
        // One `<package>` per module, one `<class>` per source file of the module. Only
        // reportable lines are listed, so the rates match the run summary.
        let mut sources = vec![];
        let mut packages = vec![];

        for module in &run.modules {
            let package = package(module);

            if package.classes.classes.is_empty() {
                continue;
            }

            for class in &package.classes.classes {
                if !sources.iter().any(|s: &Source| s.path == class.filename) {
                    sources.push(Source {
                        path: class.filename.clone(),
                    });
                }
            }

            packages.push(package);
        }

        let summary = run.summary();

        CoberturaCoverage {
            sources: Some(Sources { sources }),
            packages: Packages { packages },
            line_rate: summary.rate(),
            lines_covered: summary.lines_covered,
            lines_valid: summary.lines_valid,
            version: env!("CARGO_PKG_VERSION").to_owned(),
            timestamp: 0,
        }
    }
}

fn package(module: &ModuleCoverage) -> Package {
    let classes = module
        .files
        .iter()
        .filter(|(_, file)| file.summary().lines_valid > 0)
        .map(|(path, file)| class(path, file))
        .collect();

    Package {
        classes: Classes { classes },
        name: module.path.to_string(),
        line_rate: module.summary().rate(),
    }
}

fn class(path: &FilePath, file: &FileCoverage) -> Class {
    let lines = file
        .lines
        .iter()
        .filter(|(_, coverage)| coverage.is_reportable())
        .map(|(line, coverage)| Line {
            number: u64::from(line.number()),
            hits: u64::from(coverage.count.0),
        })
        .collect();

    Class {
        lines: Lines { lines },
        name: path.file_name().to_owned(),
        filename: path.to_string(),
        line_rate: file.summary().rate(),
    }
}

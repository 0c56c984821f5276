// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::error::InvalidSubstitution;

/// Path to a file. Guaranteed UTF-8.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FilePath(String);

impl FilePath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();

        if Path::new(&path).file_name().is_none() {
            bail!("path has no file name: `{path}`");
        }

        if Path::new(&path).file_stem().is_none() {
            bail!("path has no file stem: `{path}`");
        }

        Ok(Self(path))
    }

    /// Lexically normalize `path` (drop `.`, fold `..`) and wrap it.
    ///
    /// Does not touch the file system, so symlinks are left as-is.
    pub fn normalized(path: impl AsRef<Path>) -> Result<Self> {
        let mut normal = PathBuf::new();

        for component in path.as_ref().components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normal.pop() {
                        normal.push(component);
                    }
                }
                _ => normal.push(component),
            }
        }

        Self::new(normal.to_string_lossy().into_owned())
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.as_path()
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
    }

    pub fn directory(&self) -> &str {
        self.as_path()
            .parent()
            .and_then(Path::to_str)
            .unwrap_or_default()
    }

    pub fn base_name(&self) -> &str {
        self.as_path()
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
    }
}

impl From<FilePath> for String {
    fn from(path: FilePath) -> Self {
        path.0
    }
}
impl From<FilePath> for PathBuf {
    fn from(path: FilePath) -> Self {
        path.0.into()
    }
}

impl AsRef<str> for FilePath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<OsStr> for FilePath {
    fn as_ref(&self) -> &OsStr {
        self.as_str().as_ref()
    }
}

impl AsRef<Path> for FilePath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rewrites the build-time prefix of a source path into a local one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathSubstitution {
    build: PathBuf,
    local: PathBuf,
}

impl PathSubstitution {
    pub fn new(build: impl Into<PathBuf>, local: impl Into<PathBuf>) -> Self {
        Self {
            build: build.into(),
            local: local.into(),
        }
    }

    /// Rewrite `path` if it starts with the build prefix.
    ///
    /// Prefixes match whole path components, so `/src` does not match `/srcs/a.c`.
    pub fn apply(&self, path: &Path) -> Option<PathBuf> {
        if cfg!(windows) {
            let lower = path.to_string_lossy().to_lowercase();
            let build = self.build.to_string_lossy().to_lowercase();
            let rest = Path::new(&lower).strip_prefix(&build).ok()?;

            // Keep the original casing of the unmatched tail.
            let skip = Path::new(&lower).components().count() - rest.components().count();
            let tail: PathBuf = path.components().skip(skip).collect();
            return Some(self.local.join(tail));
        }

        let rest = path.strip_prefix(&self.build).ok()?;
        Some(self.local.join(rest))
    }
}

impl FromStr for PathSubstitution {
    type Err = InvalidSubstitution;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidSubstitution {
            rule: rule.to_owned(),
        };

        let (build, local) = rule.split_once('?').ok_or_else(invalid)?;

        if build.is_empty() || local.is_empty() || local.contains('?') {
            return Err(invalid());
        }

        Ok(Self::new(build, local))
    }
}

/// Ordered substitution rules. The first rule whose prefix matches wins.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PathSubstitutions {
    rules: Vec<PathSubstitution>,
}

impl PathSubstitutions {
    pub fn new(rules: Vec<PathSubstitution>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: PathSubstitution) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply<'p>(&self, path: &'p Path) -> std::borrow::Cow<'p, Path> {
        for rule in &self.rules {
            if let Some(substituted) = rule.apply(path) {
                return substituted.into();
            }
        }

        path.into()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_file_path_rejects_directories() {
        assert!(FilePath::new("/").is_err());
        assert!(FilePath::new("").is_err());
        assert!(FilePath::new("/src/..").is_err());
        assert!(FilePath::new("/src/main.c").is_ok());
    }

    #[test]
    fn test_file_path_parts() -> Result<()> {
        let path = FilePath::new("/build/src/main.cpp")?;

        assert_eq!(path.file_name(), "main.cpp");
        assert_eq!(path.base_name(), "main");
        assert_eq!(path.directory(), "/build/src");

        Ok(())
    }

    #[test]
    fn test_normalized() -> Result<()> {
        let path = FilePath::normalized("/build/obj/../src/./main.c")?;
        assert_eq!(path.as_str(), "/build/src/main.c");

        let path = FilePath::normalized("../include/util.h")?;
        assert_eq!(path.as_str(), "../include/util.h");

        Ok(())
    }

    #[test]
    fn test_parse_substitution() {
        let rule: PathSubstitution = "/build?/home/me/src".parse().unwrap();
        assert_eq!(rule, PathSubstitution::new("/build", "/home/me/src"));

        assert!("/build".parse::<PathSubstitution>().is_err());
        assert!("?/local".parse::<PathSubstitution>().is_err());
        assert!("/build?".parse::<PathSubstitution>().is_err());
        assert!("/a?/b?/c".parse::<PathSubstitution>().is_err());
    }

    #[test]
    fn test_substitution_matches_whole_components() {
        let rule = PathSubstitution::new("/build/src", "/local");

        assert_eq!(
            rule.apply(Path::new("/build/src/lib/a.c")),
            Some(PathBuf::from("/local/lib/a.c"))
        );
        assert_eq!(rule.apply(Path::new("/build/srcs/a.c")), None);
        assert_eq!(rule.apply(Path::new("/other/a.c")), None);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let substitutions = PathSubstitutions::new(vec![
            PathSubstitution::new("/build/src", "/first"),
            PathSubstitution::new("/build", "/second"),
        ]);

        let path = substitutions.apply(Path::new("/build/src/a.c"));
        assert_eq!(path.as_ref(), Path::new("/first/a.c"));

        let path = substitutions.apply(Path::new("/build/include/a.h"));
        assert_eq!(path.as_ref(), Path::new("/second/include/a.h"));

        let path = substitutions.apply(Path::new("/usr/include/stdio.h"));
        assert_eq!(path.as_ref(), Path::new("/usr/include/stdio.h"));
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::Path;

use regex::{Regex, RegexSet};

use crate::error::FilterConfigError;

/// Include and exclude glob rules over paths.
///
/// A path is allowed if it matches an include rule (or there are none) and matches no
/// exclude rule.
#[derive(Clone, Debug)]
pub struct AllowList {
    allow: RegexSet,
    deny: RegexSet,
}

impl AllowList {
    pub fn new(
        allow: impl IntoIterator<Item = impl AsRef<str>>,
        deny: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, FilterConfigError> {
        let allow = globs_to_regexes(allow)?;
        let deny = globs_to_regexes(deny)?;

        Self::from_regexes(&allow, &deny)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FilterConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| FilterConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, FilterConfigError> {
        let mut allow = vec![];
        let mut deny = vec![];

        // We could just collect and pass to the `RegexSet` ctor.
        //
        // Instead, check each rule individually for diagnostic purposes.
        for (index, line) in text.lines().enumerate() {
            let parsed = AllowListLine::parse(line).map_err(|_| FilterConfigError::AllowListRule {
                line: index + 1,
                rule: line.to_owned(),
            })?;

            match parsed {
                AllowListLine::Blank | AllowListLine::Comment => {
                    // Ignore.
                }
                AllowListLine::Allow(re) => {
                    allow.push(re);
                }
                AllowListLine::Deny(re) => {
                    deny.push(re);
                }
            }
        }

        Self::from_regexes(&allow, &deny)
    }

    pub fn is_allowed(&self, path: impl AsRef<str>) -> bool {
        let path = path.as_ref();

        // Allowed if rule-allowed but not excluded by a negative (deny) rule.
        let allowed = self.allow.is_empty() || self.allow.is_match(path);
        allowed && !self.deny.is_match(path)
    }

    /// Add the allow and deny rules of `other` to `self`.
    ///
    /// On error, `self` is unchanged.
    pub fn extend(&mut self, other: &Self) -> Result<(), FilterConfigError> {
        let allow = add_regexsets(&self.allow, &other.allow)?;
        let deny = add_regexsets(&self.deny, &other.deny)?;

        self.allow = allow;
        self.deny = deny;

        Ok(())
    }

    fn from_regexes(allow: &[Regex], deny: &[Regex]) -> Result<Self, FilterConfigError> {
        let allow = regexset(allow)?;
        let deny = regexset(deny)?;

        Ok(Self { allow, deny })
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self {
            allow: RegexSet::empty(),
            deny: RegexSet::empty(),
        }
    }
}

fn regexset(regexes: &[Regex]) -> Result<RegexSet, FilterConfigError> {
    let patterns: Vec<_> = regexes.iter().map(Regex::as_str).collect();

    patterns_to_regexset(&patterns)
}

// The combined set can still exceed the compiled size limit.
fn add_regexsets(lhs: &RegexSet, rhs: &RegexSet) -> Result<RegexSet, FilterConfigError> {
    let mut patterns = lhs.patterns().to_vec();
    patterns.extend_from_slice(rhs.patterns());

    patterns_to_regexset(&patterns)
}

fn patterns_to_regexset<S: AsRef<str>>(patterns: &[S]) -> Result<RegexSet, FilterConfigError> {
    RegexSet::new(patterns).map_err(|source| FilterConfigError::Pattern {
        pattern: patterns
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" | "),
        source,
    })
}

fn globs_to_regexes(
    globs: impl IntoIterator<Item = impl AsRef<str>>,
) -> Result<Vec<Regex>, FilterConfigError> {
    globs
        .into_iter()
        .map(|glob| glob_to_regex(glob.as_ref()))
        .collect()
}

pub enum AllowListLine {
    Blank,
    Comment,
    Allow(Regex),
    Deny(Regex),
}

impl AllowListLine {
    pub fn parse(line: &str) -> Result<Self, FilterConfigError> {
        let line = line.trim();

        // Allow and ignore blank lines.
        if line.is_empty() {
            return Ok(Self::Blank);
        }

        // Support comments of the form `# <comment>`.
        if line.starts_with("# ") || line == "#" {
            return Ok(Self::Comment);
        }

        // Deny rules are of the form `! <rule>`.
        if let Some(expr) = line.strip_prefix("! ") {
            let re = glob_to_regex(expr.trim())?;
            return Ok(Self::Deny(re));
        }

        // A bare `!` has no rule to deny.
        if line.starts_with('!') {
            return Err(FilterConfigError::AllowListRule {
                line: 0,
                rule: line.to_owned(),
            });
        }

        // Try to interpret as allow rule.
        let re = glob_to_regex(line)?;
        Ok(Self::Allow(re))
    }
}

pub fn glob_to_regex(expr: &str) -> Result<Regex, FilterConfigError> {
    let escaped = regex::escape(expr);

    // Translate escaped glob wildcards into quantified regexes.
    let escaped = escaped.replace(r"\*", ".*");

    // Anchor to line start and end.
    // On Windows we should also ignore case.
    let anchored = if cfg!(windows) {
        format!("(?i)^{escaped}$")
    } else {
        format!("^{escaped}$")
    };

    Regex::new(&anchored).map_err(|source| FilterConfigError::Pattern {
        pattern: expr.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests;

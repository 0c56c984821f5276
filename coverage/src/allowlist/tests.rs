use anyhow::Result;

use super::{add_regexsets, patterns_to_regexset, AllowList};
use crate::error::FilterConfigError;

#[test]
fn test_default() -> Result<()> {
    let allowlist = AllowList::default();

    // All allowed.
    assert!(allowlist.is_allowed("a"));
    assert!(allowlist.is_allowed("a/b"));
    assert!(allowlist.is_allowed("b"));
    assert!(allowlist.is_allowed("c"));

    Ok(())
}

#[test]
fn test_empty() -> Result<()> {
    let text = include_str!("test-data/empty.txt");
    let allowlist = AllowList::parse(text)?;

    // No include rules, so nothing is narrowed.
    assert!(allowlist.is_allowed("a"));
    assert!(allowlist.is_allowed("a/b"));
    assert!(allowlist.is_allowed("b"));
    assert!(allowlist.is_allowed("c"));

    Ok(())
}

#[test]
fn test_allow_some() -> Result<()> {
    let text = include_str!("test-data/allow-some.txt");
    let allowlist = AllowList::parse(text)?;

    assert!(allowlist.is_allowed("a"));
    assert!(!allowlist.is_allowed("a/b"));
    assert!(allowlist.is_allowed("b"));
    assert!(!allowlist.is_allowed("c"));

    Ok(())
}

#[test]
fn test_allow_all() -> Result<()> {
    let text = include_str!("test-data/allow-all.txt");
    let allowlist = AllowList::parse(text)?;

    assert!(allowlist.is_allowed("a"));
    assert!(allowlist.is_allowed("a/b"));
    assert!(allowlist.is_allowed("b"));
    assert!(allowlist.is_allowed("c"));

    Ok(())
}

#[test]
fn test_allow_all_glob() -> Result<()> {
    let text = include_str!("test-data/allow-all-glob.txt");
    let allowlist = AllowList::parse(text)?;

    assert!(allowlist.is_allowed("a"));
    assert!(allowlist.is_allowed("a/b"));
    assert!(allowlist.is_allowed("b"));
    assert!(allowlist.is_allowed("c"));

    Ok(())
}

#[test]
fn test_allow_glob_except() -> Result<()> {
    let text = include_str!("test-data/allow-all-glob-except.txt");
    let allowlist = AllowList::parse(text)?;

    assert!(!allowlist.is_allowed("a"));
    assert!(allowlist.is_allowed("a/b"));
    assert!(!allowlist.is_allowed("a/c"));
    assert!(allowlist.is_allowed("a/d"));
    assert!(!allowlist.is_allowed("b"));
    assert!(allowlist.is_allowed("c"));

    Ok(())
}

#[test]
fn test_allow_glob_except_commented() -> Result<()> {
    let text = include_str!("test-data/allow-all-glob-except-commented.txt");
    let allowlist = AllowList::parse(text)?;

    assert!(!allowlist.is_allowed("a"));
    assert!(allowlist.is_allowed("a/b"));
    assert!(!allowlist.is_allowed("a/c"));
    assert!(allowlist.is_allowed("a/d"));
    assert!(!allowlist.is_allowed("b"));

    // Allowed by the rule `c`, but not allowed because `# c` is a comment.
    assert!(!allowlist.is_allowed("c"));

    Ok(())
}

#[test]
fn test_allow_glob_extension() -> Result<()> {
    let text = include_str!("test-data/allow-all-glob-extension.txt");
    let allowlist = AllowList::parse(text)?;

    assert!(allowlist.is_allowed("a.c"));
    assert!(allowlist.is_allowed("a.h"));

    assert!(!allowlist.is_allowed("ac"));
    assert!(!allowlist.is_allowed("ah"));

    assert!(!allowlist.is_allowed("axc"));
    assert!(!allowlist.is_allowed("axh"));

    Ok(())
}

#[test]
fn test_deny_only() -> Result<()> {
    let text = include_str!("test-data/deny-system.txt");
    let allowlist = AllowList::parse(text)?;

    assert!(allowlist.is_allowed("/home/dev/app"));
    assert!(allowlist.is_allowed("/opt/lib/libfoo.so"));

    assert!(!allowlist.is_allowed("/usr/lib/libc.so.6"));
    assert!(!allowlist.is_allowed("/lib/x86_64-linux-gnu/libm.so.6"));

    Ok(())
}

#[test]
fn test_new_from_globs() -> Result<()> {
    let allowlist = AllowList::new(["/src/*"], ["*/generated/*"])?;

    assert!(allowlist.is_allowed("/src/main.c"));
    assert!(!allowlist.is_allowed("/src/generated/parser.c"));
    assert!(!allowlist.is_allowed("/other/main.c"));

    Ok(())
}

#[test]
fn test_globs_are_not_regexes() -> Result<()> {
    let allowlist = AllowList::new(["/src/a+b.c"], Vec::<String>::new())?;

    assert!(allowlist.is_allowed("/src/a+b.c"));
    assert!(!allowlist.is_allowed("/src/aab.c"));

    Ok(())
}

#[test]
fn test_extend() -> Result<()> {
    let mut allowlist = AllowList::new(["/src/*"], Vec::<String>::new())?;
    let other = AllowList::parse("/include/*\n! /src/vendor/*\n")?;

    allowlist.extend(&other)?;

    assert!(allowlist.is_allowed("/src/main.c"));
    assert!(allowlist.is_allowed("/include/util.h"));
    assert!(!allowlist.is_allowed("/src/vendor/zlib.c"));
    assert!(!allowlist.is_allowed("/usr/include/stdio.h"));

    Ok(())
}

#[test]
fn test_extend_keeps_rule_order() -> Result<()> {
    let lhs = patterns_to_regexset(&["^/a$", "^/b$"])?;
    let rhs = patterns_to_regexset(&["^/c$"])?;

    let combined = add_regexsets(&lhs, &rhs)?;

    assert_eq!(combined.patterns(), ["^/a$", "^/b$", "^/c$"]);
    assert!(combined.is_match("/c"));

    Ok(())
}

#[test]
fn test_invalid_combined_set_is_an_error() {
    let err = patterns_to_regexset(&["^/a$", "("]).unwrap_err();

    match err {
        FilterConfigError::Pattern { pattern, .. } => assert_eq!(pattern, "^/a$ | ("),
        err => panic!("unexpected error: {err}"),
    }
}

#[test]
fn test_bare_deny_is_invalid() {
    let err = AllowList::parse("/src/*\n!\n").unwrap_err();

    assert!(matches!(
        err,
        FilterConfigError::AllowListRule { line: 2, .. }
    ));
}

//! Exclusion pattern matching
//!
//! Patterns are matched against relative paths that start with the source's
//! own name (`docs/tmp/x`), the same paths that appear in outcomes.
//!
//! - A plain pattern excludes that exact path and everything below it.
//!   Matching is per component, so `foo` never excludes `foo2`.
//! - A glob with a `/` is anchored at the start of the relative path and
//!   excludes any path whose prefix matches it.
//! - A glob without a `/` matches any single path component.
//! - Absolute patterns only take effect after [`ExclusionSet::resolve`]
//!   rewrites them relative to the source parents.
//!
//! `*` and `?` never cross a `/` (`**` does).

use crate::error::{Result, SafeCopyError};
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Component, Path, PathBuf};

const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

#[derive(Debug, Clone)]
enum Pattern {
    Prefix(PathBuf),
    Absolute(PathBuf),
    AnchoredGlob(GlobMatcher),
    NameGlob(GlobMatcher),
}

impl Pattern {
    fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let trimmed = if trimmed.len() > 1 {
            trimmed.trim_end_matches('/')
        } else {
            trimmed
        };
        let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);

        if trimmed.is_empty() || trimmed == "." {
            return Err(SafeCopyError::exclusion(raw, "empty pattern"));
        }

        let path = Path::new(trimmed);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(SafeCopyError::exclusion(raw, "'..' is not allowed"));
        }

        if path.is_absolute() {
            return Ok(Self::Absolute(path.to_path_buf()));
        }

        if trimmed.contains(GLOB_CHARS) {
            let matcher = GlobBuilder::new(trimmed)
                .literal_separator(true)
                .build()
                .map_err(|e| SafeCopyError::exclusion(raw, e.to_string()))?
                .compile_matcher();

            if trimmed.contains('/') {
                Ok(Self::AnchoredGlob(matcher))
            } else {
                Ok(Self::NameGlob(matcher))
            }
        } else {
            Ok(Self::Prefix(path.to_path_buf()))
        }
    }

    fn matches(&self, relative: &Path) -> bool {
        match self {
            Self::Prefix(prefix) => relative.starts_with(prefix),
            Self::Absolute(_) => false,
            Self::AnchoredGlob(matcher) => {
                let mut prefix = PathBuf::new();
                for component in relative.components() {
                    prefix.push(component);
                    if matcher.is_match(&prefix) {
                        return true;
                    }
                }
                false
            }
            Self::NameGlob(matcher) => relative.components().any(|c| match c {
                Component::Normal(name) => matcher.is_match(name),
                _ => false,
            }),
        }
    }
}

/// Ordered set of exclusion patterns
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    patterns: Vec<Pattern>,
    raw: Vec<String>,
}

impl ExclusionSet {
    /// Create an empty set that excludes nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a list of patterns
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut set = Self::new();
        for pattern in patterns {
            set.add_pattern(pattern.as_ref())?;
        }
        Ok(set)
    }

    /// Parse a comma separated pattern list, as given to `--exclude`
    pub fn parse(list: &str) -> Result<Self> {
        let patterns: Vec<&str> = list.split(',').collect();
        Self::from_patterns(&patterns)
    }

    /// Add one pattern to the set
    pub fn add_pattern(&mut self, pattern: &str) -> Result<()> {
        let compiled = Pattern::parse(pattern)?;
        self.patterns.push(compiled);
        self.raw.push(pattern.trim().to_string());
        Ok(())
    }

    /// Rewrite absolute patterns relative to each source parent
    ///
    /// Relative patterns are kept. An absolute pattern that lies under none of
    /// `bases` can never match and is dropped.
    pub fn resolve(&self, bases: &[PathBuf]) -> Result<Self> {
        let mut resolved = Self::new();

        for (raw, pattern) in self.raw.iter().zip(&self.patterns) {
            match pattern {
                Pattern::Absolute(abs) => {
                    for base in bases {
                        if let Ok(rel) = abs.strip_prefix(base) {
                            if rel.as_os_str().is_empty() {
                                continue;
                            }
                            resolved.add_pattern(&rel.to_string_lossy())?;
                        }
                    }
                }
                _ => {
                    resolved.patterns.push(pattern.clone());
                    resolved.raw.push(raw.clone());
                }
            }
        }

        Ok(resolved)
    }

    /// Check if a relative path, or any ancestor of it, is excluded
    pub fn is_excluded(&self, relative: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches(relative))
    }

    /// Get the source pattern strings
    pub fn patterns(&self) -> &[String] {
        &self.raw
    }

    /// Check if the set has no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

use std::path::Path;

use fs_err as fs;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{DtmError, Result};
use crate::paths::IGNORE_FILE_NAME;

/// Glob patterns from a project's `.dtmignore`, matched against paths inside
/// the data directory.
///
/// A pattern matches either the whole relative path (`raw/*.csv`) or just the
/// entry's file name (`*.tmp`, `scratch`), so a bare name applies at any depth.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    patterns: Vec<String>,
    set: GlobSet,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }
}

impl IgnoreRules {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern.trim_end_matches('/')).map_err(|e| {
                DtmError::invalid_argument(format!("Invalid ignore pattern '{pattern}': {e}"))
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| DtmError::invalid_argument(format!("Invalid ignore patterns: {e}")))?;
        Ok(Self { patterns, set })
    }

    /// Parses the content of an ignore file: one pattern per line, blank lines
    /// and `#` comments skipped.
    pub fn parse(content: &str) -> Result<Self> {
        Self::new(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Loads `<project_root>/.dtmignore`. A missing file means nothing is ignored.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(IGNORE_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let rules = Self::parse(&fs::read_to_string(&path)?)?;
        log::debug!(
            "Loaded {} ignore pattern(s) from {}",
            rules.patterns.len(),
            path.display()
        );
        Ok(rules)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether the entry at `relative` (relative to the data directory) is ignored.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        if self.is_empty() {
            return false;
        }
        self.set.is_match(relative)
            || relative
                .file_name()
                .map(|name| self.set.is_match(Path::new(name)))
                .unwrap_or(false)
    }
}

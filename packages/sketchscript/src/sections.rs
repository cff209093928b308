//! Demo scripts split into sections at `// %pause` markers.
//!
//! `:load` runs the first section of a file; each `:next` runs the following
//! one, which lets a walkthrough build up an animation step by step.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

const PAUSE_MARKER: &str = r"(?m)^[ \t]*//[ \t]*%pause\b.*$";

#[derive(Debug, Clone)]
pub struct ScriptSections {
    path: Option<String>,
    sections: Vec<String>,
    cursor: usize,
}

impl ScriptSections {
    pub fn parse(source: &str, path: Option<&str>) -> Result<Self> {
        let marker = Regex::new(PAUSE_MARKER).context("bad pause marker regex")?;
        let sections = marker
            .split(source)
            .map(|section| section.trim_matches('\n').to_string())
            .filter(|section| !section.trim().is_empty())
            .collect();

        Ok(Self {
            path: path.map(str::to_string),
            sections,
            cursor: 0,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Reading demo {}", path.display()))?;
        Self::parse(&source, Some(&path.display().to_string()))
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Next section to run, advancing the cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&str> {
        let section = self.sections.get(self.cursor)?;
        self.cursor += 1;
        Some(section)
    }

    pub fn remaining(&self) -> usize {
        self.sections.len() - self.cursor
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_at_pause_markers() {
        let source = "let a = 1;\n// %pause\nlet b = 2;\n  //%pause show b\n\nlet c = 3;\n";
        let mut sections = ScriptSections::parse(source, Some("demo.rhai")).unwrap();

        assert_eq!(sections.len(), 3);
        assert_eq!(sections.next(), Some("let a = 1;"));
        assert_eq!(sections.next(), Some("let b = 2;"));
        assert_eq!(sections.remaining(), 1);
        assert_eq!(sections.next(), Some("let c = 3;"));
        assert_eq!(sections.next(), None);
        assert_eq!(sections.path(), Some("demo.rhai"));
    }

    #[test]
    fn test_no_markers_is_one_section() {
        let sections = ScriptSections::parse("let a = 1; // %pauses are inline here\n", None).unwrap();
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn test_empty_sections_are_dropped() {
        let sections = ScriptSections::parse("// %pause\n\n// %pause\nlet x = 1;", None).unwrap();
        assert_eq!(sections.len(), 1);
    }
}

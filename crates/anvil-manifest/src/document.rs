//! ---
//! anvil_section: "04-manifest-validation"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Package constraint manifest parsing and validation."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use indexmap::IndexMap;
use semver::Version;
use serde::Serialize;
use thiserror::Error;

use crate::record::{Record, RecordError};

/// Failure modes when parsing a whole manifest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: RecordError,
    },
    #[error("duplicate package '{name}' (lines {first} and {second})")]
    DuplicatePackage {
        name: String,
        first: usize,
        second: usize,
    },
}

/// One physical manifest line.
///
/// Comments and blank lines are kept so a parsed manifest renders back to
/// the exact document it was read from; the consuming installer skips them
/// but humans use them as section separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Line {
    Blank,
    /// Comment text without the leading `#`.
    Comment(String),
    Record(Record),
}

/// An ordered package constraint manifest.
///
/// Record order is semantically significant to the consumer (it is applied
/// as the processing sequence), so it is preserved through parse and render
/// and never normalised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    lines: Vec<Line>,
    /// canonical name -> (index into `lines`, 1-based source line)
    #[serde(skip)]
    index: IndexMap<String, (usize, usize)>,
}

impl Manifest {
    /// Parse a manifest document top-to-bottom.
    ///
    /// Fails on the first malformed record and on duplicate package names.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut lines = Vec::new();
        let mut index: IndexMap<String, (usize, usize)> = IndexMap::new();

        for (offset, raw) in text.lines().enumerate() {
            let line_no = offset + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                lines.push(Line::Blank);
                continue;
            }
            if let Some(comment) = trimmed.strip_prefix('#') {
                lines.push(Line::Comment(comment.trim().to_owned()));
                continue;
            }

            let record = Record::parse(trimmed).map_err(|source| ManifestError::Record {
                line: line_no,
                source,
            })?;
            let key = record.canonical_name();
            if let Some(&(_, first)) = index.get(&key) {
                return Err(ManifestError::DuplicatePackage {
                    name: record.name,
                    first,
                    second: line_no,
                });
            }
            index.insert(key, (lines.len(), line_no));
            lines.push(Line::Record(record));
        }

        Ok(Self { lines, index })
    }

    /// Records in document order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.lines.iter().filter_map(|line| match line {
            Line::Record(record) => Some(record),
            _ => None,
        })
    }

    /// Number of records (comments and blanks excluded).
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Look up a record by package name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Record> {
        let &(idx, _) = self.index.get(&name.to_ascii_lowercase())?;
        match &self.lines[idx] {
            Line::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Whether `name` at `candidate` satisfies the manifest.
    ///
    /// Packages the manifest does not mention are unconstrained.
    pub fn accepts(&self, name: &str, candidate: &Version) -> bool {
        self.get(name)
            .map_or(true, |record| record.accepts(candidate))
    }

    /// All physical lines, including comments and blanks.
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Serialize back to the line format, preserving order and comments.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Blank => {}
                Line::Comment(text) => {
                    out.push('#');
                    if !text.is_empty() {
                        out.push(' ');
                        out.push_str(text);
                    }
                }
                Line::Record(record) => out.push_str(&record.to_string()),
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CmpOp;

    const SAMPLE: &str = "\
# Test tooling, applied in listed order.

hacking>=3.0.0,<3.1.0 # Apache-2.0
coverage!=4.4,>=4.0 # Apache-2.0
stestr>=1.0.0 # Apache-2.0
";

    #[test]
    fn parses_records_in_document_order() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        let names: Vec<_> = manifest.records().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["hacking", "coverage", "stestr"]);
        assert_eq!(manifest.len(), 3);
    }

    #[test]
    fn comments_and_blanks_are_skipped_but_kept() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        assert!(matches!(manifest.lines()[0], Line::Comment(_)));
        assert!(matches!(manifest.lines()[1], Line::Blank));
    }

    #[test]
    fn render_round_trips_the_document() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.render(), SAMPLE);
        // A re-parse of the rendering is identical.
        assert_eq!(Manifest::parse(&manifest.render()).unwrap(), manifest);
    }

    #[test]
    fn duplicate_packages_are_rejected() {
        let err = Manifest::parse("stestr>=1.0.0\nSTESTR>=2.0.0\n").unwrap_err();
        assert_eq!(
            err,
            ManifestError::DuplicatePackage {
                name: "STESTR".to_owned(),
                first: 1,
                second: 2,
            }
        );
    }

    #[test]
    fn record_errors_carry_line_numbers() {
        let err = Manifest::parse("# header\nstestr>=1.0.0\nbroken==\n").unwrap_err();
        match err {
            ManifestError::Record { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        let record = manifest.get("Hacking").unwrap();
        assert_eq!(record.constraints[0].op, CmpOp::Ge);
        assert!(manifest.get("unlisted").is_none());
    }

    #[test]
    fn accepts_consults_the_matching_record() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        assert!(manifest.accepts("hacking", &Version::new(3, 0, 1)));
        assert!(!manifest.accepts("hacking", &Version::new(3, 1, 0)));
        assert!(!manifest.accepts("coverage", &Version::new(4, 4, 0)));
        // Unlisted packages are unconstrained.
        assert!(manifest.accepts("flake8", &Version::new(1, 0, 0)));
    }

    #[test]
    fn empty_document_is_valid() {
        let manifest = Manifest::parse("").unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.render(), "");
    }
}

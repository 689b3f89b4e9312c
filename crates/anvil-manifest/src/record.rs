//! ---
//! anvil_section: "04-manifest-validation"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Package constraint manifest parsing and validation."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure modes when parsing a single record line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing package name")]
    MissingName,
    #[error("package '{name}' has no version constraint")]
    MissingConstraint { name: String },
    #[error("constraint '{segment}' does not start with a comparison operator")]
    MissingOperator { segment: String },
    #[error("constraint '{segment}' has an operator but no version")]
    MissingVersion { segment: String },
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },
    #[error("invalid character '{found}' in package name '{name}'")]
    InvalidName { name: String, found: char },
}

/// Comparison operator of a version constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Split a comparison operator off the front of `segment`.
    ///
    /// Two-character operators are tried first so `>=1.0` is not read as
    /// `>` followed by the junk version `=1.0`.
    pub fn strip_prefix(segment: &str) -> Option<(CmpOp, &str)> {
        const TABLE: [(&str, CmpOp); 6] = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::NotEq),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
        ];
        for (token, op) in TABLE {
            if let Some(rest) = segment.strip_prefix(token) {
                return Some((op, rest));
            }
        }
        None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn evaluate(&self, candidate: &Version, bound: &Version) -> bool {
        match self {
            CmpOp::Eq => candidate == bound,
            CmpOp::NotEq => candidate != bound,
            CmpOp::Lt => candidate < bound,
            CmpOp::Le => candidate <= bound,
            CmpOp::Gt => candidate > bound,
            CmpOp::Ge => candidate >= bound,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single comparison bounding acceptable versions, e.g. `>=3.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub op: CmpOp,
    /// Version text as written in the manifest (`3.0` stays `3.0`).
    pub literal: String,
    /// Normalised form used for comparisons.
    pub version: Version,
}

impl Constraint {
    /// Parse one comma-separated constraint segment, e.g. `<3.1.0`.
    pub fn parse(segment: &str) -> Result<Self, RecordError> {
        let segment = segment.trim();
        let Some((op, rest)) = CmpOp::strip_prefix(segment) else {
            return Err(RecordError::MissingOperator {
                segment: segment.to_owned(),
            });
        };
        let literal = rest.trim();
        if literal.is_empty() {
            return Err(RecordError::MissingVersion {
                segment: segment.to_owned(),
            });
        }
        let version = parse_version(literal)?;
        Ok(Self {
            op,
            literal: literal.to_owned(),
            version,
        })
    }

    /// Whether `candidate` satisfies this constraint.
    pub fn matches(&self, candidate: &Version) -> bool {
        self.op.evaluate(candidate, &self.version)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.literal)
    }
}

/// A dependency constraint record: package name, constraint conjunction, and
/// an optional trailing license annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub constraints: Vec<Constraint>,
    pub license: Option<String>,
}

impl Record {
    /// Parse a record line of the form
    /// `<name><op><version>[,<op><version>]*[ # <license>]`.
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let line = line.trim();
        let (requirement, license) = match line.split_once('#') {
            Some((req, tag)) => {
                let tag = tag.trim();
                (req.trim_end(), (!tag.is_empty()).then(|| tag.to_owned()))
            }
            None => (line, None),
        };

        let name_end = requirement
            .find(|c: char| !is_name_char(c))
            .unwrap_or(requirement.len());
        let name = &requirement[..name_end];
        if name.is_empty() {
            return Err(RecordError::MissingName);
        }
        let rest = requirement[name_end..].trim();
        if rest.is_empty() {
            return Err(RecordError::MissingConstraint {
                name: name.to_owned(),
            });
        }
        if CmpOp::strip_prefix(rest).is_none() {
            // The name ended on a character that is neither part of a valid
            // name nor the start of an operator, e.g. `foo bar>=1.0`.
            let found = rest.chars().next().unwrap_or(' ');
            if !matches!(found, '<' | '>' | '=' | '!') {
                return Err(RecordError::InvalidName {
                    name: name.to_owned(),
                    found,
                });
            }
        }

        let constraints = rest
            .split(',')
            .map(Constraint::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_owned(),
            constraints,
            license,
        })
    }

    /// Canonical key used for duplicate detection; package names compare
    /// case-insensitively on the consumer side.
    pub fn canonical_name(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    /// Whether `candidate` satisfies every constraint of the record.
    pub fn accepts(&self, candidate: &Version) -> bool {
        self.constraints.iter().all(|c| c.matches(candidate))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (idx, constraint) in self.constraints.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", constraint)?;
        }
        if let Some(license) = &self.license {
            write!(f, " # {}", license)?;
        }
        Ok(())
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Parse a constraint version, padding short forms (`3`, `3.0`) out to full
/// `major.minor.patch` before handing off to `semver`.
fn parse_version(text: &str) -> Result<Version, RecordError> {
    if let Ok(version) = Version::parse(text) {
        return Ok(version);
    }

    let parts: Vec<&str> = text.split('.').collect();
    let numeric = !parts.is_empty()
        && parts.len() <= 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if !numeric {
        return Err(RecordError::InvalidVersion {
            version: text.to_owned(),
            reason: "expected numeric dotted version".to_owned(),
        });
    }

    let mut padded = parts;
    while padded.len() < 3 {
        padded.push("0");
    }
    Version::parse(&padded.join(".")).map_err(|err| RecordError::InvalidVersion {
        version: text.to_owned(),
        reason: err.to_string(),
    })
}

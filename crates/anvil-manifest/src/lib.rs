//! ---
//! anvil_section: "04-manifest-validation"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Package constraint manifest parsing and validation."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
//! Package constraint manifests.
//!
//! Provisioning images ship a flat, ordered list of package constraint
//! records, one per line:
//!
//! ```text
//! # build tooling
//! hacking>=3.0.0,<3.1.0 # Apache-2.0
//! stestr>=1.0.0 # Apache-2.0
//! ```
//!
//! The installer on the other side applies records top-to-bottom, so parsing
//! and rendering both preserve record order. This crate only checks the
//! manifest's own well-formedness; resolving or fetching packages is the
//! consumer's job.

pub mod document;
pub mod record;

pub use document::{Line, Manifest, ManifestError};
pub use record::{CmpOp, Constraint, Record, RecordError};

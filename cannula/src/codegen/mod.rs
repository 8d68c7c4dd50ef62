//! Code generators
//!
//! Each generator consumes the analyzed [`SchemaModel`](crate::ir::SchemaModel)
//! and produces one artifact. [`generator`] runs them together and writes the
//! results.

pub mod column;
pub mod context;
pub mod format;
pub mod forms;
pub mod generator;
pub mod sql;
pub mod templates;
pub mod types;

use std::path::PathBuf;

pub use generator::{WriteOutcome, generate, render, write_files};

/// How an existing file at the target path is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Always replace, used for generated Rust modules
    Overwrite,
    /// Keep the existing file unless forced, used for hand-editable templates
    SkipExisting,
}

/// A rendered artifact waiting to be written
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub content: String,
    pub policy: WritePolicy,
}

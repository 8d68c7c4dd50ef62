//! cannula
//!
//! Generates Rust source from an annotated GraphQL schema:
//!
//! - `types.rs`: object, input, interface, union and enum types plus root
//!   operation contracts
//! - `context.rs`: memoizing SeaORM datasources, HTTP connector datasources,
//!   the `Settings` trait and the `Context` aggregator
//! - `sql.rs`: SeaORM entities for `@db_sql` types
//! - HTML templates for the queries and mutations of an operations document
//!
//! Usage:
//!   cannula codegen --schema schema.graphql --dest src/gql

pub mod analyzer;
pub mod codegen;
pub mod config;
mod error;
pub mod ir;
pub mod json_selection;
pub mod naming;
pub mod sdl;

pub use codegen::{GeneratedFile, WriteOutcome, WritePolicy, generate, render};
pub use config::{CodegenConfig, ConfigOverrides};
pub use error::GeneratorError;

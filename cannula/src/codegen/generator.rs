//! Code generation orchestration
//!
//! Runs the whole pipeline in memory (schema build, metadata extraction,
//! analysis, relation resolution, every generator) and only then touches
//! the filesystem, so a failing run writes nothing.

use std::path::{Path, PathBuf};

use proc_macro2::TokenStream;
use quote::quote;
use tracing::{debug, info, warn};

use super::context::ContextGenerator;
use super::format::format_code;
use super::sql::SqlGenerator;
use super::templates::{TemplateGenerator, parse_operations};
use super::types::TypesGenerator;
use super::{GeneratedFile, WritePolicy};
use crate::analyzer::{analyze, resolve_relations};
use crate::config::{CodegenConfig, read_schema};
use crate::error::GeneratorError;
use crate::ir::SchemaModel;
use crate::sdl::{build_and_extend_schema, extract_metadata};

/// What happened to one generated file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// An existing template was kept
    Skipped,
    /// Logged only
    DryRun,
}

/// Build the model for a set of schema fragments
pub fn build_model<S>(
    sources: &[S],
    config: &CodegenConfig,
) -> Result<SchemaModel, GeneratorError>
where
    S: Clone + Into<crate::sdl::SdlSource>,
{
    let (schema, documents) = build_and_extend_schema(sources)?;
    let metadata = extract_metadata(&documents);
    let model = analyze(&schema, &metadata, &config.scalars)?;
    debug!(
        object_types = model.object_types.len(),
        db_types = model.db_types().count(),
        connectors = model.connectors.len(),
        "analyzed schema"
    );
    Ok(model)
}

/// Render every artifact without writing anything
pub fn render(config: &CodegenConfig) -> Result<Vec<GeneratedFile>, GeneratorError> {
    let schema_path = config.schema_path();
    let fragments = read_schema(&schema_path)?;
    debug!(path = %schema_path.display(), fragments = fragments.len(), "read schema");

    let model = build_model(&fragments, config)?;
    let relations = resolve_relations(&model)?;

    let dest = config.dest_path();
    let mut files = vec![
        module(&dest, "types.rs", TypesGenerator::new(&model, config.use_pydantic).generate()?),
        module(
            &dest,
            "context.rs",
            ContextGenerator::new(&model, &relations, config.use_pydantic).generate()?,
        ),
        module(&dest, "sql.rs", SqlGenerator::new(&model).generate()?),
        module(&dest, "mod.rs", format_code(mod_tokens())?),
    ];

    let operations_path = config.operations_path();
    if operations_path.is_file() {
        let text = std::fs::read_to_string(&operations_path)
            .map_err(|e| GeneratorError::io(&operations_path, e))?;
        let document = parse_operations(&text)?;
        files.extend(TemplateGenerator::new(&model, config.operations_directory()).generate(&document));
    } else {
        debug!(path = %operations_path.display(), "no operations document, skipping templates");
    }

    Ok(files)
}

/// Write rendered files according to their policy
pub fn write_files(
    files: &[GeneratedFile],
    force: bool,
    dry_run: bool,
) -> Result<Vec<(PathBuf, WriteOutcome)>, GeneratorError> {
    let mut outcomes = Vec::with_capacity(files.len());
    for file in files {
        let outcome = write_file(file, force, dry_run)?;
        outcomes.push((file.path.clone(), outcome));
    }
    Ok(outcomes)
}

fn write_file(file: &GeneratedFile, force: bool, dry_run: bool) -> Result<WriteOutcome, GeneratorError> {
    let path = &file.path;
    if file.policy == WritePolicy::SkipExisting && path.exists() && !force {
        warn!(path = %path.display(), "template exists, skipping (use --force to overwrite)");
        return Ok(WriteOutcome::Skipped);
    }
    if dry_run {
        info!(path = %path.display(), bytes = file.content.len(), "would write");
        return Ok(WriteOutcome::DryRun);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GeneratorError::io(parent, e))?;
    }
    std::fs::write(path, &file.content).map_err(|e| GeneratorError::io(path, e))?;
    info!(path = %path.display(), "wrote file");
    Ok(WriteOutcome::Written)
}

/// Render and write everything described by `config`
pub fn generate(config: &CodegenConfig) -> Result<Vec<(PathBuf, WriteOutcome)>, GeneratorError> {
    let files = render(config)?;
    write_files(&files, config.force, config.dry_run)
}

fn module(dest: &Path, name: &str, content: String) -> GeneratedFile {
    GeneratedFile {
        path: dest.join(name),
        content,
        policy: WritePolicy::Overwrite,
    }
}

fn mod_tokens() -> TokenStream {
    quote! {
        //! Generated GraphQL modules
        //! @generated

        pub mod context;
        pub mod sql;
        pub mod types;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = indoc! {r#"
        type User @db_sql {
            id: ID! @field_meta(primary_key: true)
            name: String
        }

        type Query {
            users: [User]
        }

        type Mutation {
            renameUser(id: ID!, name: String!): User
        }
    "#};

    const OPERATIONS: &str = indoc! {r#"
        query AllUsers {
            users { id name }
        }

        mutation RenameUser($id: ID!, $name: String!) {
            renameUser(id: $id, name: $name) { id name }
        }
    "#};

    fn project(operations: Option<&str>) -> (tempfile::TempDir, CodegenConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("schema.graphql"), SCHEMA).unwrap();
        if let Some(operations) = operations {
            std::fs::write(dir.path().join("operations.graphql"), operations).unwrap();
        }
        let config = CodegenConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        (dir, config)
    }

    fn names(outcomes: &[(PathBuf, WriteOutcome)], root: &Path) -> Vec<(String, WriteOutcome)> {
        outcomes
            .iter()
            .map(|(path, outcome)| {
                let relative = path.strip_prefix(root).unwrap_or(path);
                (relative.display().to_string(), *outcome)
            })
            .collect()
    }

    #[test]
    fn test_generate_writes_modules_and_templates() {
        let (dir, config) = project(Some(OPERATIONS));
        let outcomes = generate(&config).unwrap();
        assert_eq!(
            names(&outcomes, dir.path()),
            vec![
                ("gql/types.rs".to_string(), WriteOutcome::Written),
                ("gql/context.rs".to_string(), WriteOutcome::Written),
                ("gql/sql.rs".to_string(), WriteOutcome::Written),
                ("gql/mod.rs".to_string(), WriteOutcome::Written),
                ("app/_operations/AllUsers.html".to_string(), WriteOutcome::Written),
                ("app/_operations/RenameUser_form.html".to_string(), WriteOutcome::Written),
                ("app/_operations/RenameUser_result.html".to_string(), WriteOutcome::Written),
            ]
        );

        let types = std::fs::read_to_string(dir.path().join("gql/types.rs")).unwrap();
        assert!(types.contains("pub struct UserType {"));
        let sql = std::fs::read_to_string(dir.path().join("gql/sql.rs")).unwrap();
        assert!(sql.contains("pub use user::Model as DBUser;"));
        let module = std::fs::read_to_string(dir.path().join("gql/mod.rs")).unwrap();
        for line in ["pub mod context;", "pub mod sql;", "pub mod types;"] {
            assert!(module.contains(line));
        }
    }

    #[test]
    fn test_without_operations_document() {
        let (dir, config) = project(None);
        let outcomes = generate(&config).unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(!dir.path().join("app").exists());
    }

    #[test]
    fn test_existing_template_is_kept() {
        let (dir, config) = project(Some(OPERATIONS));
        generate(&config).unwrap();

        let template = dir.path().join("app/_operations/AllUsers.html");
        std::fs::write(&template, "<p>edited</p>").unwrap();

        let outcomes = generate(&config).unwrap();
        let outcome = outcomes.iter().find(|(path, _)| *path == template).map(|(_, o)| *o);
        assert_eq!(outcome, Some(WriteOutcome::Skipped));
        assert_eq!(std::fs::read_to_string(&template).unwrap(), "<p>edited</p>");

        // Generated modules are always replaced
        let outcome = outcomes
            .iter()
            .find(|(path, _)| path.ends_with("gql/types.rs"))
            .map(|(_, o)| *o);
        assert_eq!(outcome, Some(WriteOutcome::Written));
    }

    #[test]
    fn test_force_replaces_template() {
        let (dir, mut config) = project(Some(OPERATIONS));
        generate(&config).unwrap();

        let template = dir.path().join("app/_operations/AllUsers.html");
        let original = std::fs::read_to_string(&template).unwrap();
        std::fs::write(&template, "<p>edited</p>").unwrap();

        config.force = true;
        generate(&config).unwrap();
        assert_eq!(std::fs::read_to_string(&template).unwrap(), original);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (dir, mut config) = project(Some(OPERATIONS));
        config.dry_run = true;
        let outcomes = generate(&config).unwrap();
        assert!(outcomes.iter().all(|(_, outcome)| *outcome == WriteOutcome::DryRun));
        assert!(!dir.path().join("gql").exists());
        assert!(!dir.path().join("app").exists());
    }

    #[test]
    fn test_failing_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("schema.graphql"),
            "type Tag @db_sql { name: String! }",
        )
        .unwrap();
        let config = CodegenConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        };

        let err = generate(&config).unwrap_err();
        assert!(matches!(err, GeneratorError::PrimaryKey(_)));
        assert!(!dir.path().join("gql").exists());
    }

    #[test]
    fn test_output_is_deterministic() {
        let (_dir, config) = project(Some(OPERATIONS));
        let first = render(&config).unwrap();
        let second = render(&config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_schema_directory() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema");
        std::fs::create_dir(&schema).unwrap();
        std::fs::write(schema.join("a_user.graphql"), "type User { id: ID! }").unwrap();
        std::fs::write(
            schema.join("b_extend.graphql"),
            "extend type User { email: String }",
        )
        .unwrap();
        let config = CodegenConfig {
            root: dir.path().to_path_buf(),
            schema: PathBuf::from("schema"),
            ..Default::default()
        };

        let files = render(&config).unwrap();
        let types = &files[0].content;
        assert!(types.contains("pub email: Option<String>,"));
    }
}

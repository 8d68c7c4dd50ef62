//! cannula
//!
//! Command line entry point for code generation.
//!
//! Usage:
//!   cannula codegen --schema schema.graphql --dest src/gql
//!   cannula codegen --dry-run --debug

mod errors;

use std::path::PathBuf;
use std::process;

use cannula::{CodegenConfig, ConfigOverrides, WriteOutcome};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use errors::CliError;

#[derive(Parser, Debug)]
#[command(name = "cannula")]
#[command(about = "Generate Rust code and templates from an annotated GraphQL schema")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate types, datasources, entities and templates
    Codegen(CodegenArgs),
}

#[derive(clap::Args, Debug, Default)]
struct CodegenArgs {
    /// Schema file or directory of `*.graphql` files
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Destination directory for generated modules
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Operations document used for templates
    #[arg(long)]
    operations: Option<PathBuf>,

    /// Application directory
    #[arg(long)]
    app_directory: Option<PathBuf>,

    /// Template output directory
    #[arg(long)]
    operations_directory: Option<PathBuf>,

    /// Custom scalar mapping as NAME=rust::Path, repeatable
    #[arg(long = "scalar", value_name = "NAME=PATH")]
    scalars: Vec<String>,

    /// Generate serde-validating types
    #[arg(long)]
    use_pydantic: bool,

    /// Overwrite existing templates
    #[arg(long)]
    force: bool,

    /// Log what would be written without writing
    #[arg(long, alias = "dry_run")]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,
}

impl CodegenArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            schema: self.schema.clone(),
            dest: self.dest.clone(),
            operations: self.operations.clone(),
            app_directory: self.app_directory.clone(),
            operations_directory: self.operations_directory.clone(),
            scalars: self.scalars.clone(),
            use_pydantic: self.use_pydantic,
            force: self.force,
            dry_run: self.dry_run,
        }
    }
}

fn main() {
    let args = Args::parse();
    let Command::Codegen(codegen) = args.command;

    init_tracing(codegen.debug);

    if let Err(err) = run(&codegen) {
        eprintln!("error: {}", err);
        if codegen.debug {
            eprintln!("{:?}", err);
        }
        process::exit(1);
    }
}

/// Install the subscriber, `RUST_LOG` wins over the default level
fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

fn run(args: &CodegenArgs) -> Result<(), CliError> {
    let cwd = std::env::current_dir().map_err(CliError::CurrentDirectory)?;
    let config = load_config(&cwd, args)?;
    debug!(?config, "resolved configuration");

    let outcomes = cannula::generate(&config)?;
    let count = |wanted: WriteOutcome| outcomes.iter().filter(|(_, o)| *o == wanted).count();
    info!(
        written = count(WriteOutcome::Written),
        skipped = count(WriteOutcome::Skipped),
        dry_run = count(WriteOutcome::DryRun),
        "code generation finished"
    );
    Ok(())
}

fn load_config(start: &std::path::Path, args: &CodegenArgs) -> Result<CodegenConfig, CliError> {
    let mut config = CodegenConfig::discover(start)?;
    config.apply(args.overrides())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codegen_flags() {
        let args = Args::try_parse_from([
            "cannula",
            "codegen",
            "--schema",
            "graphql",
            "--scalar",
            "Datetime=chrono::NaiveDateTime",
            "--scalar",
            "UUID=uuid::Uuid",
            "--dry_run",
            "-d",
        ])
        .unwrap();
        let Command::Codegen(codegen) = args.command;
        assert_eq!(codegen.schema, Some(PathBuf::from("graphql")));
        assert_eq!(codegen.scalars.len(), 2);
        assert!(codegen.dry_run);
        assert!(codegen.debug);
        assert!(!codegen.force);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cannula.toml"),
            "[tool.cannula.codegen]\ndest = \"from_file\"\nschema = \"api.graphql\"\n",
        )
        .unwrap();

        let args = CodegenArgs {
            dest: Some(PathBuf::from("from_flag")),
            use_pydantic: true,
            ..Default::default()
        };
        let config = load_config(dir.path(), &args).unwrap();
        assert_eq!(config.dest_path(), dir.path().join("from_flag"));
        assert_eq!(config.schema_path(), dir.path().join("api.graphql"));
        assert!(config.use_pydantic);
    }

    #[test]
    fn test_invalid_scalar_flag() {
        let dir = tempfile::tempdir().unwrap();
        let args = CodegenArgs {
            scalars: vec!["Datetime".to_string()],
            ..Default::default()
        };
        let err = load_config(dir.path(), &args).unwrap_err();
        assert!(err.to_string().contains("invalid scalar 'Datetime'"));
    }
}

//! Code generation configuration
//!
//! Settings live in the `[tool.cannula.codegen]` table of `cannula.toml`
//! (a bare `[tool.cannula]` table is accepted too). Relative paths resolve
//! against the directory holding the config file. Command line flags are
//! applied on top with [`CodegenConfig::apply`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::GeneratorError;

/// Default config file name
pub const CONFIG_FILE: &str = "cannula.toml";

/// Parent directories searched for [`CONFIG_FILE`]
const MAX_PARENT_DEPTH: usize = 5;

/// Settings for one code generation run
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodegenConfig {
    /// Directory receiving `types.rs`, `context.rs` and `sql.rs`
    pub dest: PathBuf,
    /// Schema file, or a directory of `*.graphql` files
    pub schema: PathBuf,
    /// Operations document, optional on disk
    pub operations: PathBuf,
    pub app_directory: PathBuf,
    /// Template directory, `{app_directory}/_operations` when unset
    pub operations_directory: Option<PathBuf>,
    /// Static asset directory, `{app_directory}/_static` when unset
    pub static_directory: Option<PathBuf>,
    /// Generate serde-validating types
    pub use_pydantic: bool,
    /// Custom scalar name to Rust type path
    pub scalars: BTreeMap<String, String>,
    /// Overwrite existing templates
    pub force: bool,
    /// Log instead of writing files
    pub dry_run: bool,
    /// Directory relative paths resolve against
    #[serde(skip)]
    pub root: PathBuf,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        CodegenConfig {
            dest: PathBuf::from("gql"),
            schema: PathBuf::from("schema.graphql"),
            operations: PathBuf::from("operations.graphql"),
            app_directory: PathBuf::from("app"),
            operations_directory: None,
            static_directory: None,
            use_pydantic: false,
            scalars: BTreeMap::new(),
            force: false,
            dry_run: false,
            root: PathBuf::from("."),
        }
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub schema: Option<PathBuf>,
    pub dest: Option<PathBuf>,
    pub operations: Option<PathBuf>,
    pub app_directory: Option<PathBuf>,
    pub operations_directory: Option<PathBuf>,
    /// `NAME=rust::Path` pairs
    pub scalars: Vec<String>,
    pub use_pydantic: bool,
    pub force: bool,
    pub dry_run: bool,
}

impl CodegenConfig {
    /// Load the nearest config file above `start`, or defaults rooted at `start`
    pub fn discover(start: impl AsRef<Path>) -> Result<Self, GeneratorError> {
        let start = start.as_ref();
        match find_config_file(start) {
            Some(path) => Self::from_file(&path),
            None => {
                debug!(start = %start.display(), "no config file found, using defaults");
                Ok(CodegenConfig {
                    root: start.to_path_buf(),
                    ..Default::default()
                })
            }
        }
    }

    /// Load a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GeneratorError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| GeneratorError::io(path, e))?;
        let mut config = Self::from_toml(&text)
            .map_err(|e| GeneratorError::Config(format!("{}: {}", path.display(), e)))?;
        config.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse config text, reading `tool.cannula.codegen` or `tool.cannula`
    pub fn from_toml(text: &str) -> Result<Self, GeneratorError> {
        let document: toml::Table =
            toml::from_str(text).map_err(|e| GeneratorError::Config(e.to_string()))?;
        let Some(tool) = document
            .get("tool")
            .and_then(|tool| tool.get("cannula"))
            .cloned()
        else {
            return Ok(CodegenConfig::default());
        };
        let table = match tool.get("codegen") {
            Some(codegen) => codegen.clone(),
            None => tool,
        };
        table
            .try_into()
            .map_err(|e: toml::de::Error| GeneratorError::Config(e.to_string()))
    }

    /// Apply command line values on top of file values
    pub fn apply(&mut self, overrides: ConfigOverrides) -> Result<(), GeneratorError> {
        if let Some(schema) = overrides.schema {
            self.schema = schema;
        }
        if let Some(dest) = overrides.dest {
            self.dest = dest;
        }
        if let Some(operations) = overrides.operations {
            self.operations = operations;
        }
        if let Some(app_directory) = overrides.app_directory {
            self.app_directory = app_directory;
        }
        if let Some(operations_directory) = overrides.operations_directory {
            self.operations_directory = Some(operations_directory);
        }
        for scalar in overrides.scalars {
            let (name, path) = parse_scalar(&scalar)?;
            self.scalars.insert(name, path);
        }
        self.use_pydantic |= overrides.use_pydantic;
        self.force |= overrides.force;
        self.dry_run |= overrides.dry_run;
        Ok(())
    }

    /// Resolve a configured path against the config root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn dest_path(&self) -> PathBuf {
        self.resolve(&self.dest)
    }

    pub fn schema_path(&self) -> PathBuf {
        self.resolve(&self.schema)
    }

    pub fn operations_path(&self) -> PathBuf {
        self.resolve(&self.operations)
    }

    pub fn operations_directory(&self) -> PathBuf {
        match &self.operations_directory {
            Some(dir) => self.resolve(dir),
            None => self.resolve(&self.app_directory.join("_operations")),
        }
    }

    pub fn static_directory(&self) -> PathBuf {
        match &self.static_directory {
            Some(dir) => self.resolve(dir),
            None => self.resolve(&self.app_directory.join("_static")),
        }
    }
}

/// Walk up from `start` looking for [`CONFIG_FILE`]
fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take(MAX_PARENT_DEPTH + 1)
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// Split `NAME=rust::Path`
fn parse_scalar(value: &str) -> Result<(String, String), GeneratorError> {
    match value.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim().to_string(), path.trim().to_string()))
        }
        _ => Err(GeneratorError::Config(format!(
            "invalid scalar '{}', expected NAME=rust::Path",
            value
        ))),
    }
}

/// Read every schema fragment
///
/// A directory contributes its `*.graphql` files in file name order.
pub fn read_schema(path: &Path) -> Result<Vec<String>, GeneratorError> {
    if !path.is_dir() {
        let text = std::fs::read_to_string(path).map_err(|e| GeneratorError::io(path, e))?;
        return Ok(vec![text]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).map_err(|e| GeneratorError::io(path, e))? {
        let entry = entry.map_err(|e| GeneratorError::io(path, e))?;
        let file = entry.path();
        if file.extension().is_some_and(|ext| ext == "graphql") {
            files.push(file);
        }
    }
    files.sort();

    files
        .iter()
        .map(|file| std::fs::read_to_string(file).map_err(|e| GeneratorError::io(file, e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = CodegenConfig::default();
        assert_eq!(config.dest, PathBuf::from("gql"));
        assert_eq!(config.operations_directory(), PathBuf::from("./app/_operations"));
        assert_eq!(config.static_directory(), PathBuf::from("./app/_static"));
        assert!(!config.use_pydantic);
    }

    #[test]
    fn test_codegen_table() {
        let config = CodegenConfig::from_toml(indoc! {r#"
            [tool.cannula.codegen]
            dest = "src/gql"
            schema = "graphql"
            use_pydantic = true

            [tool.cannula.codegen.scalars]
            Datetime = "chrono::DateTime<chrono::Utc>"
        "#})
        .unwrap();
        assert_eq!(config.dest, PathBuf::from("src/gql"));
        assert_eq!(config.schema, PathBuf::from("graphql"));
        assert!(config.use_pydantic);
        assert_eq!(config.scalars["Datetime"], "chrono::DateTime<chrono::Utc>");
        // Unset values keep their defaults
        assert_eq!(config.operations, PathBuf::from("operations.graphql"));
    }

    #[test]
    fn test_bare_tool_table() {
        let config = CodegenConfig::from_toml(indoc! {r#"
            [tool.cannula]
            dest = "out"
        "#})
        .unwrap();
        assert_eq!(config.dest, PathBuf::from("out"));
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let err = CodegenConfig::from_toml("[tool.cannula.codegen]\ndestination = \"x\"").unwrap_err();
        assert!(matches!(err, GeneratorError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let mut config = CodegenConfig::from_toml(indoc! {r#"
            [tool.cannula.codegen]
            dest = "gql"
            scalars = { Datetime = "String" }
        "#})
        .unwrap();
        config
            .apply(ConfigOverrides {
                dest: Some(PathBuf::from("generated")),
                operations_directory: Some(PathBuf::from("templates")),
                scalars: vec!["Datetime=chrono::NaiveDateTime".into(), "UUID=uuid::Uuid".into()],
                force: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.dest, PathBuf::from("generated"));
        assert_eq!(config.operations_directory(), PathBuf::from("./templates"));
        assert_eq!(config.scalars["Datetime"], "chrono::NaiveDateTime");
        assert_eq!(config.scalars["UUID"], "uuid::Uuid");
        assert!(config.force);
        assert!(!config.dry_run);

        let err = config
            .apply(ConfigOverrides {
                scalars: vec!["Datetime".into()],
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("expected NAME=rust::Path"));
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[tool.cannula.codegen]\ndest = \"out\"\n",
        )
        .unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let config = CodegenConfig::discover(&nested).unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.dest_path(), dir.path().join("out"));
    }

    #[test]
    fn test_discover_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CodegenConfig::discover(dir.path()).unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.dest, PathBuf::from("gql"));
    }

    #[test]
    fn test_read_schema_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.graphql"), "type B { id: ID }").unwrap();
        std::fs::write(dir.path().join("a.graphql"), "type A { id: ID }").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let fragments = read_schema(dir.path()).unwrap();
        assert_eq!(fragments, vec!["type A { id: ID }", "type B { id: ID }"]);

        let single = read_schema(&dir.path().join("a.graphql")).unwrap();
        assert_eq!(single.len(), 1);

        let err = read_schema(&dir.path().join("missing.graphql")).unwrap_err();
        assert!(matches!(err, GeneratorError::Io { .. }));
    }
}

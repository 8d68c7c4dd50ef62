//! Column mapping for SeaORM entities
//!
//! Maps stored GraphQL fields to entity column types and builds the
//! `#[sea_orm(...)]` attribute contents for each column.

use heck::ToSnakeCase;

use crate::error::GeneratorError;
use crate::ir::{ANY_TYPE, Field, Literal, SchemaModel, meta_flag, meta_str};

/// How a row value converts into the GraphQL type's field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Same type on both sides
    Direct,
    /// Stored as JSON, decoded with `serde_json::from_value`
    Json,
    /// Stored as the enum's string value, decoded with `FromStr`
    Enum,
}

/// Column type of a stored field
#[derive(Debug, Clone, PartialEq)]
pub struct MappedType {
    /// Rust type of the model field without the outer `Option`
    pub rust_type: String,
    /// Explicit `column_type`, when SeaORM can not infer it
    pub column_type: Option<&'static str>,
    pub conversion: Conversion,
}

impl MappedType {
    /// Rust type as declared on the model, `Option` wrapped when nullable
    pub fn declared(&self, required: bool) -> String {
        if required {
            self.rust_type.clone()
        } else {
            format!("Option<{}>", self.rust_type)
        }
    }

    /// Integer primary keys keep SeaORM's auto increment default
    fn is_integer(&self) -> bool {
        matches!(self.rust_type.as_str(), "i64" | "i32")
    }
}

/// Map a stored field onto its column type
pub fn map_field_type(field: &Field, model: &SchemaModel) -> MappedType {
    let field_type = &field.field_type;

    // Lists have no native column, keep them as JSON
    if field_type.is_list {
        return MappedType {
            rust_type: "Json".to_string(),
            column_type: Some("JsonBinary"),
            conversion: Conversion::Json,
        };
    }

    if model.enum_type(&field_type.graphql_name).is_some() {
        return MappedType {
            rust_type: "String".to_string(),
            column_type: None,
            conversion: Conversion::Enum,
        };
    }

    match field_type.value.as_deref() {
        None | Some(ANY_TYPE) => MappedType {
            rust_type: "Json".to_string(),
            column_type: Some("JsonBinary"),
            conversion: Conversion::Direct,
        },
        Some(value) => MappedType {
            rust_type: value.to_string(),
            column_type: None,
            conversion: Conversion::Direct,
        },
    }
}

/// Database column name of a field
pub fn column_name(field: &Field) -> String {
    meta_str(&field.metadata, "db_column")
        .map(str::to_string)
        .unwrap_or_else(|| field.name.to_snake_case())
}

/// Whether the column of a stored field accepts NULL
///
/// Explicit `nullable` metadata wins over the schema, except that a non-null
/// schema field can not be made nullable. Primary keys are never nullable.
pub fn column_nullable(field: &Field) -> Result<bool, GeneratorError> {
    let required = field.field_type.required;
    let explicit = field.metadata.get("nullable").and_then(Literal::as_bool);

    // Non-null in the schema and nullable in metadata can not both hold
    if required && explicit == Some(true) {
        return Err(GeneratorError::Nullability(format!(
            "Field '{}' is marked as non-null in GraphQL schema, but metadata specifies \
             nullable=true. Remove the nullable metadata or update the GraphQL schema.",
            field.name
        )));
    }

    if field.is_primary_key() {
        return Ok(false);
    }
    Ok(explicit.unwrap_or(!required))
}

/// Generated SeaORM column attributes for a field
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAttributes {
    /// The #[sea_orm(...)] attribute contents
    pub attributes: Vec<String>,
}

impl ColumnAttributes {
    /// Comma separated attribute contents, empty when there are none
    pub fn joined(&self) -> String {
        self.attributes.join(", ")
    }
}

/// Generate column attributes from field metadata and the mapped type
pub fn generate_attributes(
    field: &Field,
    mapped: &MappedType,
) -> Result<ColumnAttributes, GeneratorError> {
    let mut attributes = Vec::new();
    column_nullable(field)?;
    let nullable = meta_flag(&field.metadata, "nullable");

    if field.is_primary_key() {
        // SeaORM defaults to auto_increment = true for primary keys,
        // so it is only spelled out when it must be off
        let auto_increment = field
            .metadata
            .get("auto_increment")
            .and_then(Literal::as_bool)
            .unwrap_or_else(|| mapped.is_integer());
        if auto_increment {
            attributes.push("primary_key".to_string());
        } else {
            attributes.push("primary_key, auto_increment = false".to_string());
        }
    } else {
        // Unique constraint
        if field.flag("unique") {
            attributes.push("unique".to_string());
        }

        // Index
        if field.flag("index") {
            attributes.push("indexed".to_string());
        }

        if nullable {
            attributes.push("nullable".to_string());
        }
    }

    // Custom column name
    if let Some(column) = meta_str(&field.metadata, "db_column") {
        if column != field.name.to_snake_case() {
            attributes.push(format!("column_name = \"{}\"", column));
        }
    }

    // Column type for values SeaORM can not infer
    if let Some(column_type) = mapped.column_type {
        attributes.push(format!("column_type = \"{}\"", column_type));
    }

    // Default value
    if let Some(default) = field.metadata.get("default_value") {
        let default = match default {
            Literal::String(s) | Literal::Enum(s) => s.clone(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Bool(b) => b.to_string(),
            Literal::Null | Literal::List(_) | Literal::Object(_) => String::new(),
        };
        if !default.is_empty() {
            attributes.push(format!("default_value = \"{}\"", default.escape_default()));
        }
    }

    Ok(ColumnAttributes { attributes })
}

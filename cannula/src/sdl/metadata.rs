//! Metadata extraction
//!
//! Walks every type and field declaration, including `extend` blocks, and
//! collects metadata from two sources: `@metadata(...)` blocks in the
//! description and the `@db_sql` / `@field_meta` directives. Directive
//! arguments win over description metadata for the same key. Repeated
//! declarations of a type or field overlay earlier metadata.

use std::collections::{BTreeMap, BTreeSet};

use async_graphql_parser::Positioned;
use async_graphql_parser::types::{ConstDirective, ServiceDocument, TypeKind, TypeSystemDefinition};
use tracing::debug;

use super::const_to_literal;
use super::doc_metadata::parse_description;
use crate::ir::{Argument, Directive, Literal, Metadata};
use crate::naming::pluralize;

/// Type level directive marking a db-backed type
pub const DB_SQL: &str = "db_sql";

/// Field level directive carrying column and relation metadata
pub const FIELD_META: &str = "field_meta";

/// Metadata for one type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeMeta {
    pub metadata: Metadata,
    pub description: Option<String>,
}

/// Metadata for one field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMeta {
    pub metadata: Metadata,
    pub description: Option<String>,
    pub directives: Vec<Directive>,
}

/// Metadata for a whole schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaMetadata {
    pub type_metadata: BTreeMap<String, TypeMeta>,
    pub field_metadata: BTreeMap<String, BTreeMap<String, FieldMeta>>,
}

impl SchemaMetadata {
    /// Metadata of a type, empty when the type has none
    pub fn type_meta(&self, type_name: &str) -> Option<&TypeMeta> {
        self.type_metadata.get(type_name)
    }

    /// Metadata of a field, empty when the field has none
    pub fn field_meta(&self, type_name: &str, field_name: &str) -> Option<&FieldMeta> {
        self.field_metadata
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
    }
}

/// Extract metadata from every document, in order
pub fn extract_metadata(documents: &[ServiceDocument]) -> SchemaMetadata {
    let mut extracted = SchemaMetadata::default();
    let mut db_sql_types = BTreeSet::new();

    for doc in documents {
        for definition in &doc.definitions {
            let TypeSystemDefinition::Type(ty) = definition else {
                continue;
            };
            let ty = &ty.node;
            let type_name = ty.name.node.to_string();

            let parsed = parse_description(ty.description.as_ref().map(|d| d.node.as_str()));
            let mut metadata = parsed.metadata;
            for directive in &ty.directives {
                if directive.node.name.node.as_str() == DB_SQL {
                    db_sql_types.insert(type_name.clone());
                    metadata.extend(db_sql_metadata(&directive.node));
                }
            }
            merge_type(&mut extracted, &type_name, metadata, parsed.description);

            match &ty.kind {
                TypeKind::Object(object) => {
                    for field in &object.fields {
                        let field = &field.node;
                        merge_field(
                            &mut extracted,
                            &type_name,
                            field.name.node.as_str(),
                            field.description.as_ref().map(|d| d.node.as_str()),
                            &field.directives,
                        );
                    }
                }
                TypeKind::Interface(interface) => {
                    for field in &interface.fields {
                        let field = &field.node;
                        merge_field(
                            &mut extracted,
                            &type_name,
                            field.name.node.as_str(),
                            field.description.as_ref().map(|d| d.node.as_str()),
                            &field.directives,
                        );
                    }
                }
                TypeKind::InputObject(input) => {
                    for field in &input.fields {
                        let field = &field.node;
                        merge_field(
                            &mut extracted,
                            &type_name,
                            field.name.node.as_str(),
                            field.description.as_ref().map(|d| d.node.as_str()),
                            &field.directives,
                        );
                    }
                }
                TypeKind::Scalar | TypeKind::Union(_) | TypeKind::Enum(_) => {}
            }
        }
    }

    // `@db_sql` without a table name falls back to the pluralized type name
    for type_name in db_sql_types {
        let meta = extracted.type_metadata.entry(type_name.clone()).or_default();
        meta.metadata
            .entry("db_table".to_string())
            .or_insert_with(|| Literal::String(pluralize(&type_name)));
    }

    debug!(
        types = extracted.type_metadata.len(),
        "extracted schema metadata"
    );
    extracted
}

/// Overlay type metadata, a non-empty description replaces the previous one
fn merge_type(
    extracted: &mut SchemaMetadata,
    type_name: &str,
    metadata: Metadata,
    description: Option<String>,
) {
    let entry = extracted
        .type_metadata
        .entry(type_name.to_string())
        .or_default();
    entry.metadata.extend(metadata);
    if description.is_some() {
        entry.description = description;
    }
}

fn merge_field(
    extracted: &mut SchemaMetadata,
    type_name: &str,
    field_name: &str,
    raw_description: Option<&str>,
    directives: &[Positioned<ConstDirective>],
) {
    let parsed = parse_description(raw_description);
    let mut metadata = parsed.metadata;
    let directives: Vec<Directive> = directives.iter().map(|d| directive(&d.node)).collect();
    for directive in &directives {
        if directive.name == FIELD_META {
            for arg in &directive.args {
                if let Some(value) = &arg.value {
                    metadata.insert(arg.name.clone(), value.clone());
                }
            }
        }
    }

    let entry = extracted
        .field_metadata
        .entry(type_name.to_string())
        .or_default()
        .entry(field_name.to_string())
        .or_default();
    entry.metadata.extend(metadata);
    if parsed.description.is_some() {
        entry.description = parsed.description;
    }
    entry.directives.extend(directives);
}

/// Map `@db_sql` arguments onto metadata keys
fn db_sql_metadata(directive: &ConstDirective) -> Metadata {
    let mut metadata = Metadata::new();
    for (name, value) in &directive.arguments {
        let key = match name.node.as_str() {
            "table_name" => "db_table",
            "constraint" => "constraints",
            other => other,
        };
        metadata.insert(key.to_string(), const_to_literal(&value.node));
    }
    metadata
}

/// Convert a parsed directive usage into the IR
pub fn directive(directive: &ConstDirective) -> Directive {
    Directive {
        name: directive.name.node.to_string(),
        args: directive
            .arguments
            .iter()
            .map(|(name, value)| Argument {
                name: name.node.to_string(),
                field_type: None,
                value: Some(const_to_literal(&value.node)),
                default: None,
                required: false,
            })
            .collect(),
    }
}

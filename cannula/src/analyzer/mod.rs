//! Schema analysis
//!
//! Combines the built schema with extracted metadata into the normalized
//! [`SchemaModel`]. Every collection is sorted by name so that repeated runs
//! over an unchanged schema produce identical output.

mod relation;

use std::collections::BTreeMap;

use async_graphql_parser::types::{
    BaseType, FieldDefinition, InputValueDefinition, Type, TypeDefinition, TypeKind,
};
use tracing::debug;

use crate::error::GeneratorError;
use crate::ir::{
    Argument, EnumType, EnumValue, Field, FieldType, ObjectType, SchemaModel, TypeKind as IrKind,
    UnionType, meta_flag,
};
use crate::sdl::connect::{extract_connectors, extract_sources};
use crate::sdl::metadata::directive;
use crate::sdl::{BUILTIN_SCALARS, Schema, SchemaMetadata, const_to_literal};

pub use relation::{compile_predicate, placeholders, resolve_relations};

/// Stand-in field added to empty root types
pub const EMPTY_FIELD: &str = "_empty";

/// Rust type for a built-in scalar
pub fn builtin_scalar(name: &str) -> Option<&'static str> {
    match name {
        "String" | "ID" => Some("String"),
        "Int" => Some("i64"),
        "Float" => Some("f64"),
        "Boolean" => Some("bool"),
        _ => None,
    }
}

/// Resolves GraphQL type references against the schema and scalar registry
pub struct TypeResolver<'a> {
    schema: &'a Schema,
    scalars: &'a BTreeMap<String, String>,
}

impl<'a> TypeResolver<'a> {
    pub fn new(schema: &'a Schema, scalars: &'a BTreeMap<String, String>) -> Self {
        TypeResolver { schema, scalars }
    }

    /// Resolve a type reference, walking list and non-null wrappers
    pub fn parse_graphql_type(&self, ty: &Type) -> FieldType {
        let inner = match &ty.base {
            BaseType::Named(name) => self.resolve_named(name.as_str()),
            BaseType::List(element) => {
                let element = self.parse_graphql_type(element);
                FieldType {
                    value: element
                        .value
                        .as_ref()
                        .map(|_| format!("Vec<{}>", element.type_name())),
                    required: false,
                    of_type: element.of_type,
                    is_list: true,
                    is_object_type: element.is_object_type,
                    graphql_name: element.graphql_name,
                }
            }
        };
        FieldType {
            required: !ty.nullable,
            ..inner
        }
    }

    fn resolve_named(&self, name: &str) -> FieldType {
        let kind = self.schema.types.get(name).map(|t| &t.kind);
        let (value, is_object_type) = match kind {
            Some(TypeKind::Object(_) | TypeKind::Interface(_) | TypeKind::Union(_)) => {
                (self.schema.rust_name(name).map(str::to_string), true)
            }
            Some(TypeKind::InputObject(_) | TypeKind::Enum(_)) => {
                (self.schema.rust_name(name).map(str::to_string), false)
            }
            Some(TypeKind::Scalar) | None => (self.scalar(name), false),
        };
        FieldType {
            value: value.clone(),
            required: false,
            of_type: value,
            is_list: false,
            is_object_type,
            graphql_name: name.to_string(),
        }
    }

    fn scalar(&self, name: &str) -> Option<String> {
        builtin_scalar(name)
            .map(str::to_string)
            .or_else(|| self.scalars.get(name).cloned())
    }
}

/// Build the normalized model
pub fn analyze(
    schema: &Schema,
    metadata: &SchemaMetadata,
    scalars: &BTreeMap<String, String>,
) -> Result<SchemaModel, GeneratorError> {
    let resolver = TypeResolver::new(schema, scalars);
    let mut model = SchemaModel {
        scalars: scalars.clone(),
        ..Default::default()
    };

    for (name, definition) in &schema.types {
        if name.starts_with("__")
            || schema.prelude_types.contains(name)
            || BUILTIN_SCALARS.contains(&name.as_str())
        {
            continue;
        }

        match &definition.kind {
            TypeKind::InputObject(input) => {
                let fields = input
                    .fields
                    .iter()
                    .map(|f| parse_input_field(&resolver, metadata, name, &f.node))
                    .collect();
                model
                    .input_types
                    .push(object_type(schema, metadata, definition, IrKind::Input, fields, vec![]));
            }
            TypeKind::Interface(interface) => {
                let fields = interface
                    .fields
                    .iter()
                    .map(|f| parse_field(&resolver, metadata, name, &f.node))
                    .collect();
                let implements = interface.implements.iter().map(|i| i.node.to_string()).collect();
                model.interface_types.push(object_type(
                    schema,
                    metadata,
                    definition,
                    IrKind::Interface,
                    fields,
                    implements,
                ));
            }
            TypeKind::Union(union) => {
                model.union_types.push(UnionType {
                    name: name.clone(),
                    rust_type: schema.rust_name(name).unwrap_or(name).to_string(),
                    types: union
                        .members
                        .iter()
                        .map(|m| resolver.resolve_named(m.node.as_str()))
                        .collect(),
                    description: type_description(metadata, name),
                });
            }
            TypeKind::Enum(enum_type) => {
                model.enum_types.push(EnumType {
                    name: name.clone(),
                    rust_type: schema.rust_name(name).unwrap_or(name).to_string(),
                    values: enum_type
                        .values
                        .iter()
                        .map(|v| EnumValue {
                            name: v.node.value.node.to_string(),
                            description: v.node.description.as_ref().map(|d| d.node.clone()),
                        })
                        .collect(),
                    description: type_description(metadata, name),
                });
            }
            TypeKind::Object(object) if schema.is_operation_type(name) => {
                model.operation_fields.extend(
                    object
                        .fields
                        .iter()
                        .filter(|f| f.node.name.node.as_str() != EMPTY_FIELD)
                        .map(|f| parse_field(&resolver, metadata, name, &f.node)),
                );
            }
            TypeKind::Object(object) => {
                let fields = object
                    .fields
                    .iter()
                    .map(|f| parse_field(&resolver, metadata, name, &f.node))
                    .collect();
                let implements = object.implements.iter().map(|i| i.node.to_string()).collect();
                model.object_types.push(object_type(
                    schema,
                    metadata,
                    definition,
                    IrKind::Object,
                    fields,
                    implements,
                ));
            }
            TypeKind::Scalar => {}
        }
    }

    model.object_types.sort_by(|a, b| a.name.cmp(&b.name));
    model.interface_types.sort_by(|a, b| a.name.cmp(&b.name));
    model.input_types.sort_by(|a, b| a.name.cmp(&b.name));
    model.union_types.sort_by(|a, b| a.name.cmp(&b.name));
    model.enum_types.sort_by(|a, b| a.name.cmp(&b.name));
    model
        .operation_fields
        .sort_by(|a, b| (&a.name, &a.parent).cmp(&(&b.name, &b.parent)));

    model.sources = extract_sources(schema)?;
    model.connectors = extract_connectors(schema, &model.sources)?;

    validate_primary_keys(&model)?;

    debug!(
        objects = model.object_types.len(),
        interfaces = model.interface_types.len(),
        inputs = model.input_types.len(),
        unions = model.union_types.len(),
        operations = model.operation_fields.len(),
        "analyzed schema"
    );
    Ok(model)
}

fn type_description(metadata: &SchemaMetadata, name: &str) -> Option<String> {
    metadata.type_meta(name).and_then(|m| m.description.clone())
}

fn object_type(
    schema: &Schema,
    metadata: &SchemaMetadata,
    definition: &TypeDefinition,
    kind: IrKind,
    fields: Vec<Field>,
    interfaces: Vec<String>,
) -> ObjectType {
    let name = definition.name.node.to_string();
    let type_meta = metadata.type_meta(&name);
    ObjectType {
        rust_type: schema.rust_name(&name).unwrap_or(&name).to_string(),
        kind,
        fields,
        directives: definition.directives.iter().map(|d| directive(&d.node)).collect(),
        description: type_meta.and_then(|m| m.description.clone()),
        metadata: type_meta.map(|m| m.metadata.clone()).unwrap_or_default(),
        interfaces,
        name,
    }
}

fn parse_field(
    resolver: &TypeResolver<'_>,
    metadata: &SchemaMetadata,
    parent: &str,
    field: &FieldDefinition,
) -> Field {
    let name = field.name.node.to_string();
    let field_type = resolver.parse_graphql_type(&field.ty.node);
    let field_meta = metadata.field_meta(parent, &name);
    let field_metadata = field_meta.map(|m| m.metadata.clone()).unwrap_or_default();
    let computed = meta_flag(&field_metadata, "computed") || field_type.is_object_type;

    Field {
        args: field
            .arguments
            .iter()
            .map(|arg| parse_argument(resolver, &arg.node))
            .collect(),
        directives: field.directives.iter().map(|d| directive(&d.node)).collect(),
        description: field_meta.and_then(|m| m.description.clone()),
        metadata: field_metadata,
        parent: parent.to_string(),
        computed,
        default: None,
        field_type,
        name,
    }
}

fn parse_input_field(
    resolver: &TypeResolver<'_>,
    metadata: &SchemaMetadata,
    parent: &str,
    field: &InputValueDefinition,
) -> Field {
    let name = field.name.node.to_string();
    let field_meta = metadata.field_meta(parent, &name);
    Field {
        field_type: resolver.parse_graphql_type(&field.ty.node),
        description: field_meta.and_then(|m| m.description.clone()),
        args: Vec::new(),
        directives: field.directives.iter().map(|d| directive(&d.node)).collect(),
        metadata: field_meta.map(|m| m.metadata.clone()).unwrap_or_default(),
        parent: parent.to_string(),
        computed: false,
        default: field.default_value.as_ref().map(|v| const_to_literal(&v.node)),
        name,
    }
}

fn parse_argument(resolver: &TypeResolver<'_>, arg: &InputValueDefinition) -> Argument {
    let field_type = resolver.parse_graphql_type(&arg.ty.node);
    Argument {
        name: arg.name.node.to_string(),
        required: field_type.required,
        default: arg.default_value.as_ref().map(|v| const_to_literal(&v.node)),
        value: None,
        field_type: Some(field_type),
    }
}

/// Only a composite key may declare more than one primary key field
fn validate_primary_keys(model: &SchemaModel) -> Result<(), GeneratorError> {
    for object in model.db_types() {
        let keys = object.primary_keys();
        if keys.len() > 1 && !meta_flag(&object.metadata, "composite_primary_key") {
            let names: Vec<&str> = keys.iter().map(|f| f.name.as_str()).collect();
            return Err(GeneratorError::PrimaryKey(format!(
                "Multiple primary keys found in type '{}': {}. To create a composite primary key, \
                 add 'composite_primary_key: true' to the type's metadata.",
                object.name,
                names.join(", ")
            )));
        }
    }
    Ok(())
}

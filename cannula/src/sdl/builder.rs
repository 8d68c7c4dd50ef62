//! Schema building
//!
//! Parses SDL fragments, merges `extend` blocks into their base definitions
//! and guarantees that `Query` and `Mutation` roots exist.

use std::collections::{BTreeMap, BTreeSet};

use async_graphql_parser::types::{
    BaseType, ConstDirective, DirectiveDefinition, ServiceDocument, Type, TypeDefinition,
    TypeKind, TypeSystemDefinition,
};
use async_graphql_parser::{Positioned, parse_schema};
use indexmap::IndexMap;
use tracing::debug;

use crate::error::GeneratorError;

/// Directives and helper inputs every schema is augmented with
pub const PRELUDE: &str = r#"
directive @db_sql(
    table_name: String
    composite_primary_key: Boolean = false
    constraint: [String]
) on OBJECT

directive @field_meta(
    db_column: String
    primary_key: Boolean = false
    foreign_key: String
    index: Boolean = false
    nullable: Boolean = false
    unique: Boolean = false
    where: String
    raw_sql: String
    args: [String]
    function: String
    weight: Float
) on FIELD_DEFINITION

directive @source(name: String!, http: SourceHTTP) repeatable on SCHEMA

directive @connect(
    source: String
    http: ConnectHTTP!
    selection: String
    entity: Boolean = false
) on FIELD_DEFINITION

input HTTPHeaderMapping {
    name: String!
    from: String
    value: String
}

input SourceHTTP {
    baseURL: String!
    headers: [HTTPHeaderMapping]
}

input ConnectHTTP {
    GET: String
    POST: String
    PUT: String
    PATCH: String
    DELETE: String
    headers: [HTTPHeaderMapping]
    body: String
}
"#;

/// Scalars every GraphQL schema knows about
pub const BUILTIN_SCALARS: &[&str] = &["String", "Int", "Float", "Boolean", "ID"];

/// Directives defined by the GraphQL specification itself
const BUILTIN_DIRECTIVES: &[&str] = &["deprecated", "specifiedBy", "skip", "include", "oneOf"];

/// One SDL fragment, either raw text or an already parsed document
#[derive(Debug, Clone)]
pub enum SdlSource {
    Text(String),
    Document(ServiceDocument),
}

impl From<&str> for SdlSource {
    fn from(s: &str) -> Self {
        SdlSource::Text(s.to_string())
    }
}

impl From<String> for SdlSource {
    fn from(s: String) -> Self {
        SdlSource::Text(s)
    }
}

impl From<ServiceDocument> for SdlSource {
    fn from(doc: ServiceDocument) -> Self {
        SdlSource::Document(doc)
    }
}

/// A unified schema built from every fragment
#[derive(Debug, Clone)]
pub struct Schema {
    /// Type definitions in declaration order, extensions merged in
    pub types: IndexMap<String, TypeDefinition>,
    /// Directive definitions, prelude included
    pub directives: IndexMap<String, DirectiveDefinition>,
    /// Directives applied to the schema itself (`extend schema @source(...)`)
    pub schema_directives: Vec<Positioned<ConstDirective>>,
    pub query_type: String,
    pub mutation_type: String,
    pub subscription_type: String,
    /// Types contributed by the prelude, never generated
    pub prelude_types: BTreeSet<String>,
    /// Generated Rust name for every object, interface, input, union and enum
    pub rust_names: BTreeMap<String, String>,
}

impl Schema {
    /// Generated Rust name of a schema type
    pub fn rust_name(&self, name: &str) -> Option<&str> {
        self.rust_names.get(name).map(String::as_str)
    }

    /// Whether the name is one of the root operation types
    pub fn is_operation_type(&self, name: &str) -> bool {
        name == self.query_type || name == self.mutation_type || name == self.subscription_type
    }
}

/// Parse every fragment into a document, preserving order
pub fn parse_documents<S>(sources: &[S]) -> Result<Vec<ServiceDocument>, GeneratorError>
where
    S: Clone + Into<SdlSource>,
{
    let mut documents = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        match source.clone().into() {
            SdlSource::Document(doc) => documents.push(doc),
            SdlSource::Text(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                let doc = parse_schema(&text).map_err(|e| GeneratorError::Syntax {
                    source_index: index,
                    message: e.to_string(),
                })?;
                documents.push(doc);
            }
        }
    }
    Ok(documents)
}

/// Build one schema from parsed documents
pub fn build_schema(documents: &[ServiceDocument]) -> Result<Schema, GeneratorError> {
    let prelude = parse_schema(PRELUDE)
        .map_err(|e| GeneratorError::CodeGenError(format!("invalid prelude: {}", e)))?;

    let mut schema = Schema {
        types: IndexMap::new(),
        directives: IndexMap::new(),
        schema_directives: Vec::new(),
        query_type: "Query".to_string(),
        mutation_type: "Mutation".to_string(),
        subscription_type: "Subscription".to_string(),
        prelude_types: BTreeSet::new(),
        rust_names: BTreeMap::new(),
    };

    // Base definitions first, extensions are applied once every base type is known
    let mut extensions: Vec<&TypeDefinition> = Vec::new();
    for (is_prelude, doc) in std::iter::once((true, &prelude)).chain(documents.iter().map(|d| (false, d))) {
        for definition in &doc.definitions {
            match definition {
                TypeSystemDefinition::Type(ty) if ty.node.extend => extensions.push(&ty.node),
                TypeSystemDefinition::Type(ty) => {
                    let name = ty.node.name.node.to_string();
                    if schema.types.contains_key(&name) {
                        return Err(GeneratorError::SchemaValidation(format!(
                            "There can be only one type named '{}'.",
                            name
                        )));
                    }
                    if is_prelude {
                        schema.prelude_types.insert(name.clone());
                    }
                    schema.types.insert(name, ty.node.clone());
                }
                TypeSystemDefinition::Schema(def) => {
                    let def = &def.node;
                    if let Some(query) = &def.query {
                        schema.query_type = query.node.to_string();
                    }
                    if let Some(mutation) = &def.mutation {
                        schema.mutation_type = mutation.node.to_string();
                    }
                    if let Some(subscription) = &def.subscription {
                        schema.subscription_type = subscription.node.to_string();
                    }
                    schema.schema_directives.extend(def.directives.iter().cloned());
                }
                TypeSystemDefinition::Directive(def) => {
                    schema
                        .directives
                        .insert(def.node.name.node.to_string(), def.node.clone());
                }
            }
        }
    }

    for extension in extensions {
        apply_extension(&mut schema, extension)?;
    }

    let roots = [schema.query_type.clone(), schema.mutation_type.clone()];
    for root in &roots {
        ensure_root(&mut schema, root)?;
    }

    validate(&schema)?;
    assign_rust_names(&mut schema);

    debug!(types = schema.types.len(), "built schema");
    Ok(schema)
}

/// Merge an `extend` block into its base definition
fn apply_extension(schema: &mut Schema, extension: &TypeDefinition) -> Result<(), GeneratorError> {
    let name = extension.name.node.as_str();
    let base = schema.types.get_mut(name).ok_or_else(|| {
        GeneratorError::SchemaValidation(format!(
            "Cannot extend type '{}' because it is not defined.",
            name
        ))
    })?;

    if let Some(description) = &extension.description {
        if !description.node.trim().is_empty() {
            base.description = Some(description.clone());
        }
    }
    base.directives.extend(extension.directives.iter().cloned());

    match (&mut base.kind, &extension.kind) {
        (TypeKind::Object(base), TypeKind::Object(ext)) => {
            for field in &ext.fields {
                let field_name = &field.node.name.node;
                if base.fields.iter().any(|f| &f.node.name.node == field_name) {
                    return Err(duplicate_field(name, field_name));
                }
                base.fields.push(field.clone());
            }
            base.implements.extend(ext.implements.iter().cloned());
        }
        (TypeKind::Interface(base), TypeKind::Interface(ext)) => {
            for field in &ext.fields {
                let field_name = &field.node.name.node;
                if base.fields.iter().any(|f| &f.node.name.node == field_name) {
                    return Err(duplicate_field(name, field_name));
                }
                base.fields.push(field.clone());
            }
            base.implements.extend(ext.implements.iter().cloned());
        }
        (TypeKind::InputObject(base), TypeKind::InputObject(ext)) => {
            for field in &ext.fields {
                let field_name = &field.node.name.node;
                if base.fields.iter().any(|f| &f.node.name.node == field_name) {
                    return Err(duplicate_field(name, field_name));
                }
                base.fields.push(field.clone());
            }
        }
        (TypeKind::Union(base), TypeKind::Union(ext)) => {
            base.members.extend(ext.members.iter().cloned());
        }
        (TypeKind::Enum(base), TypeKind::Enum(ext)) => {
            base.values.extend(ext.values.iter().cloned());
        }
        (TypeKind::Scalar, TypeKind::Scalar) => {}
        _ => {
            return Err(GeneratorError::SchemaValidation(format!(
                "Cannot extend type '{}' with a definition of a different kind.",
                name
            )));
        }
    }

    debug!(type_name = name, "applied extension");
    Ok(())
}

fn duplicate_field(type_name: &str, field_name: &str) -> GeneratorError {
    GeneratorError::SchemaValidation(format!(
        "Field '{}.{}' can only be defined once.",
        type_name, field_name
    ))
}

/// Add an empty stand-in root type when the schema does not declare one
fn ensure_root(schema: &mut Schema, name: &str) -> Result<(), GeneratorError> {
    if schema.types.contains_key(name) {
        return Ok(());
    }
    let sdl = format!("type {} {{ _empty: String }}", name);
    let doc = parse_schema(&sdl).map_err(|e| GeneratorError::CodeGenError(e.to_string()))?;
    for definition in doc.definitions {
        if let TypeSystemDefinition::Type(ty) = definition {
            schema.types.insert(name.to_string(), ty.node);
        }
    }
    debug!(root = name, "added stand-in root type");
    Ok(())
}

/// Innermost named type of a type reference
pub fn named_type(ty: &Type) -> &str {
    match &ty.base {
        BaseType::Named(name) => name.as_str(),
        BaseType::List(inner) => named_type(inner),
    }
}

/// Check every type and directive reference resolves
fn validate(schema: &Schema) -> Result<(), GeneratorError> {
    let known = |name: &str| BUILTIN_SCALARS.contains(&name) || schema.types.contains_key(name);

    let check_directives = |owner: &str, directives: &[Positioned<ConstDirective>]| {
        for directive in directives {
            let directive_name = directive.node.name.node.as_str();
            if !schema.directives.contains_key(directive_name)
                && !BUILTIN_DIRECTIVES.contains(&directive_name)
            {
                return Err(GeneratorError::SchemaValidation(format!(
                    "Unknown directive '@{}' used on '{}'.",
                    directive_name, owner
                )));
            }
        }
        Ok(())
    };

    check_directives("schema", &schema.schema_directives)?;

    for (type_name, definition) in &schema.types {
        check_directives(type_name, &definition.directives)?;

        match &definition.kind {
            TypeKind::Object(object) => {
                for interface in &object.implements {
                    if !matches!(
                        schema.types.get(interface.node.as_str()).map(|t| &t.kind),
                        Some(TypeKind::Interface(_))
                    ) {
                        return Err(GeneratorError::SchemaValidation(format!(
                            "Type '{}' implements unknown interface '{}'.",
                            type_name, interface.node
                        )));
                    }
                }
                for field in &object.fields {
                    validate_field(type_name, &field.node, &known)?;
                    let owner = format!("{}.{}", type_name, field.node.name.node);
                    check_directives(&owner, &field.node.directives)?;
                }
            }
            TypeKind::Interface(interface) => {
                for field in &interface.fields {
                    validate_field(type_name, &field.node, &known)?;
                    let owner = format!("{}.{}", type_name, field.node.name.node);
                    check_directives(&owner, &field.node.directives)?;
                }
            }
            TypeKind::InputObject(input) => {
                for field in &input.fields {
                    let referenced = named_type(&field.node.ty.node);
                    if !known(referenced) {
                        return Err(unknown_type(referenced, type_name, &field.node.name.node));
                    }
                }
            }
            TypeKind::Union(union) => {
                for member in &union.members {
                    if !matches!(
                        schema.types.get(member.node.as_str()).map(|t| &t.kind),
                        Some(TypeKind::Object(_))
                    ) {
                        return Err(GeneratorError::SchemaValidation(format!(
                            "Union '{}' includes unknown object type '{}'.",
                            type_name, member.node
                        )));
                    }
                }
            }
            TypeKind::Scalar | TypeKind::Enum(_) => {}
        }
    }
    Ok(())
}

fn validate_field(
    type_name: &str,
    field: &async_graphql_parser::types::FieldDefinition,
    known: &impl Fn(&str) -> bool,
) -> Result<(), GeneratorError> {
    let referenced = named_type(&field.ty.node);
    if !known(referenced) {
        return Err(unknown_type(referenced, type_name, &field.name.node));
    }
    for arg in &field.arguments {
        let referenced = named_type(&arg.node.ty.node);
        if !known(referenced) {
            return Err(unknown_type(
                referenced,
                type_name,
                &format!("{}({})", field.name.node, arg.node.name.node),
            ));
        }
    }
    Ok(())
}

fn unknown_type(referenced: &str, type_name: &str, field_name: &str) -> GeneratorError {
    GeneratorError::SchemaValidation(format!(
        "Unknown type '{}' referenced by '{}.{}'.",
        referenced, type_name, field_name
    ))
}

/// Attach generated Rust names to every named type
fn assign_rust_names(schema: &mut Schema) {
    for (name, definition) in &schema.types {
        let shadows = SHADOWED_NAMES.contains(&name.as_str());
        let rust_name = match &definition.kind {
            TypeKind::Object(_) => format!("{}Type", name),
            TypeKind::InputObject(_) => format!("{}Input", name),
            TypeKind::Interface(_) if shadows => format!("{}Interface", name),
            TypeKind::Union(_) if shadows => format!("{}Union", name),
            TypeKind::Enum(_) if shadows => format!("{}Enum", name),
            TypeKind::Interface(_) | TypeKind::Union(_) | TypeKind::Enum(_) => name.clone(),
            TypeKind::Scalar => continue,
        };
        schema.rust_names.insert(name.clone(), rust_name);
    }
}

/// Names the generated modules use unqualified, kept free of schema types
const SHADOWED_NAMES: &[&str] = &[
    "Arc",
    "Box",
    "BoxFuture",
    "Context",
    "DatasourceError",
    "Default",
    "Error",
    "Future",
    "HashMap",
    "Json",
    "Mutex",
    "Option",
    "Pin",
    "ResolverError",
    "ResolverResult",
    "Result",
    "RootType",
    "Settings",
    "String",
    "Vec",
];

/// Parse and build in one step
pub fn build_and_extend_schema<S>(sources: &[S]) -> Result<(Schema, Vec<ServiceDocument>), GeneratorError>
where
    S: Clone + Into<SdlSource>,
{
    let documents = parse_documents(sources)?;
    let schema = build_schema(&documents)?;
    Ok((schema, documents))
}

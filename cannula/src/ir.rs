//! Intermediate Representation (IR) for code generation
//!
//! The IR is the normalized type model the analyzer builds from the schema
//! and its metadata. Generators only read it; it is built fresh for every run.

use std::collections::BTreeMap;

use crate::naming::{lower_first, pluralize};

/// Rust type used when a GraphQL type cannot be resolved
pub const ANY_TYPE: &str = "serde_json::Value";

/// A literal coerced from SDL defaults, directive arguments or doc metadata
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// GraphQL enum value, kept by its symbolic name
    Enum(String),
    List(Vec<Literal>),
    Object(Vec<(String, Literal)>),
}

impl Literal {
    /// String content of a string or enum literal
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) | Literal::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content, accepting the `"true"` spelling from loose metadata
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(b) => Some(*b),
            Literal::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Literal::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Items of a list of strings; a single string is a one item list
    pub fn as_str_list(&self) -> Vec<String> {
        match self {
            Literal::List(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Literal::String(s) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Look up a key of an object literal
    pub fn get(&self, key: &str) -> Option<&Literal> {
        match self {
            Literal::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Metadata attached to a type or field, keyed by metadata name
pub type Metadata = BTreeMap<String, Literal>;

/// Read a boolean flag from metadata, absent means false
pub fn meta_flag(metadata: &Metadata, key: &str) -> bool {
    metadata.get(key).and_then(Literal::as_bool).unwrap_or(false)
}

/// Read a string value from metadata
pub fn meta_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Literal::as_str)
}

/// A GraphQL type reference resolved to a Rust type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldType {
    /// Rust type without the outer `Option`, e.g. `Vec<String>`
    pub value: Option<String>,
    /// Non-null in the schema
    pub required: bool,
    /// Rust type of the innermost named type
    pub of_type: Option<String>,
    /// Wrapped in a list at the outer level
    pub is_list: bool,
    /// Innermost named type is an object, interface or union
    pub is_object_type: bool,
    /// Innermost named type as written in the SDL
    pub graphql_name: String,
}

impl FieldType {
    /// Resolved type, falling back to an opaque JSON value
    pub fn safe_value(&self) -> &str {
        self.value.as_deref().unwrap_or(ANY_TYPE)
    }

    /// Type as declared on a struct field or return position
    pub fn type_name(&self) -> String {
        if self.required {
            self.safe_value().to_string()
        } else {
            format!("Option<{}>", self.safe_value())
        }
    }
}

/// A field argument or directive argument
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    /// Declared type, `None` for directive usages
    pub field_type: Option<FieldType>,
    /// Supplied value, only set for directive usages
    pub value: Option<Literal>,
    /// Default from the SDL
    pub default: Option<Literal>,
    pub required: bool,
}

impl Argument {
    /// Type as declared on a method parameter
    pub fn type_name(&self) -> String {
        match &self.field_type {
            Some(field_type) => field_type.type_name(),
            None => format!("Option<{ANY_TYPE}>"),
        }
    }
}

/// A directive usage on a type or field
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<Argument>,
}

impl Directive {
    /// Value of a named argument
    pub fn arg(&self, name: &str) -> Option<&Literal> {
        self.args
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.value.as_ref())
    }
}

/// A field on an object, interface or input type
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub description: Option<String>,
    pub args: Vec<Argument>,
    pub directives: Vec<Directive>,
    pub metadata: Metadata,
    /// GraphQL name of the declaring type
    pub parent: String,
    /// Explicit `computed` metadata or an object typed target
    pub computed: bool,
    /// Default for input fields
    pub default: Option<Literal>,
}

impl Field {
    /// Resolved by a method rather than stored on the type
    pub fn is_computed(&self) -> bool {
        !self.args.is_empty() || self.computed
    }

    /// Type as declared on a struct field or return position
    pub fn type_name(&self) -> String {
        self.field_type.type_name()
    }

    /// Name of the callable contract for a root operation field
    pub fn operation_name(&self) -> String {
        format!("{}{}", self.name, self.parent)
    }

    /// Arguments without a default that must be supplied
    pub fn required_args(&self) -> impl Iterator<Item = &Argument> {
        self.args.iter().filter(|a| a.required && a.default.is_none())
    }

    /// Arguments that may be omitted
    pub fn optional_args(&self) -> impl Iterator<Item = &Argument> {
        self.args.iter().filter(|a| !a.required || a.default.is_some())
    }

    /// Metadata flag helper
    pub fn flag(&self, key: &str) -> bool {
        meta_flag(&self.metadata, key)
    }

    /// Whether this field is part of the primary key
    pub fn is_primary_key(&self) -> bool {
        self.flag("primary_key")
    }

    /// Foreign key target as `table.column`
    pub fn foreign_key(&self) -> Option<&str> {
        meta_str(&self.metadata, "foreign_key")
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Field<{}.{}>", self.parent, self.name)
    }
}

/// The GraphQL category of an [`ObjectType`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Interface,
    Input,
}

/// An object, interface or input type
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectType {
    pub name: String,
    /// Generated Rust name (`UserType`, `UserInput`, `Node`)
    pub rust_type: String,
    pub kind: TypeKind,
    pub fields: Vec<Field>,
    pub directives: Vec<Directive>,
    pub description: Option<String>,
    pub metadata: Metadata,
    /// Interfaces implemented by an object or interface
    pub interfaces: Vec<String>,
}

impl ObjectType {
    /// Backed by a database table
    pub fn is_db_type(&self) -> bool {
        self.table_name().is_some()
    }

    /// Backing table name
    pub fn table_name(&self) -> Option<&str> {
        meta_str(&self.metadata, "db_table")
    }

    /// Name of the generated row type alias
    pub fn db_type(&self) -> String {
        format!("DB{}", self.name)
    }

    /// Name of the generated entity module in `sql.rs`
    pub fn db_module(&self) -> String {
        heck::ToSnakeCase::to_snake_case(self.name.as_str())
    }

    /// Attribute addressing this type's repository on the context
    pub fn context_attr(&self) -> String {
        pluralize(&self.name)
    }

    /// Name of the generated repository type
    pub fn datasource_name(&self) -> String {
        format!("{}Datasource", self.name)
    }

    /// Fields stored on the generated struct
    pub fn stored_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.is_computed())
    }

    /// Fields resolved by methods
    pub fn computed_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_computed())
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields marked as primary key
    pub fn primary_keys(&self) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.is_primary_key()).collect()
    }
}

/// A union type
#[derive(Debug, Clone, PartialEq)]
pub struct UnionType {
    pub name: String,
    pub rust_type: String,
    pub types: Vec<FieldType>,
    pub description: Option<String>,
}

/// An enum type
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub rust_type: String,
    pub values: Vec<EnumValue>,
    pub description: Option<String>,
}

/// A single enum value
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub name: String,
    pub description: Option<String>,
}

/// HTTP verbs usable in `@connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// All methods in the order they are checked
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
    ];

    /// Upper case verb as written in the directive
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// A header forwarded or set on HTTP requests
#[derive(Debug, Clone, PartialEq)]
pub struct HttpHeader {
    pub name: String,
    /// Incoming request header to copy the value from
    pub from: Option<String>,
    /// Literal value, may reference `$config.name`
    pub value: Option<String>,
}

/// A remote HTTP source declared with `@source`
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSource {
    pub name: String,
    pub base_url: String,
    pub headers: Vec<HttpHeader>,
}

impl HttpSource {
    /// Name of the generated datasource type
    pub fn datasource_name(&self) -> String {
        format!("{}HTTPDatasource", heck::ToUpperCamelCase::to_upper_camel_case(self.name.as_str()))
    }

    /// Attribute addressing this source on the context
    pub fn context_attr(&self) -> String {
        heck::ToSnakeCase::to_snake_case(self.name.as_str())
    }
}

/// A field resolved through an HTTP call declared with `@connect`
#[derive(Debug, Clone, PartialEq)]
pub struct Connector {
    /// GraphQL name of the declaring type
    pub parent: String,
    pub field: String,
    /// Named source, `None` for a standalone connector
    pub source: Option<String>,
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<HttpHeader>,
    pub body: Option<String>,
    pub selection: Option<String>,
    /// Result is an entity that should be constructed from the response
    pub entity: bool,
}

impl Connector {
    /// Name of the datasource owning this connector
    pub fn datasource_name(&self) -> String {
        use heck::ToUpperCamelCase;
        match &self.source {
            Some(source) => format!("{}HTTPDatasource", source.to_upper_camel_case()),
            None => format!(
                "{}{}HTTPDatasource",
                self.parent.to_upper_camel_case(),
                self.field.to_upper_camel_case()
            ),
        }
    }

    /// Method name on the datasource (`query_remote`)
    pub fn method_name(&self) -> String {
        format!("{}_{}", self.parent.to_lowercase(), self.field)
    }
}

/// How a relation field is fetched from its target repository
#[derive(Debug, Clone, PartialEq)]
pub enum RelationKind {
    /// Fetched with the default primary key lookup through a foreign key
    PrimaryKey {
        /// Sibling field holding the foreign key
        foreign_key_field: String,
    },
    /// Fetched with a bound predicate on a generated repository method
    Predicate {
        /// Generated method name, `{parentLowerFirst}_{fieldName}`
        method: String,
        /// Predicate with `$n` positional placeholders
        predicate: String,
        /// Bind parameters in placeholder order
        params: Vec<RelationParam>,
        /// Returns a list
        many: bool,
    },
}

/// A bind parameter of a predicate relation
#[derive(Debug, Clone, PartialEq)]
pub struct RelationParam {
    pub name: String,
    pub field_type: FieldType,
}

/// A resolved relation between two db-backed types
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub parent: String,
    pub field: String,
    pub target: String,
    pub kind: RelationKind,
}

impl Relation {
    /// Method name used for a predicate relation
    pub fn method_name(parent: &str, field: &str) -> String {
        format!("{}_{}", lower_first(parent), field)
    }
}

/// The complete normalized type model, every collection sorted by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaModel {
    pub object_types: Vec<ObjectType>,
    pub interface_types: Vec<ObjectType>,
    pub input_types: Vec<ObjectType>,
    pub union_types: Vec<UnionType>,
    pub enum_types: Vec<EnumType>,
    pub operation_fields: Vec<Field>,
    pub sources: Vec<HttpSource>,
    pub connectors: Vec<Connector>,
    /// Custom scalar names mapped to Rust types
    pub scalars: BTreeMap<String, String>,
}

impl SchemaModel {
    /// Object type by GraphQL name
    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.object_types.iter().find(|t| t.name == name)
    }

    /// Input type by GraphQL name
    pub fn input_type(&self, name: &str) -> Option<&ObjectType> {
        self.input_types.iter().find(|t| t.name == name)
    }

    /// Enum type by GraphQL name
    pub fn enum_type(&self, name: &str) -> Option<&EnumType> {
        self.enum_types.iter().find(|t| t.name == name)
    }

    /// Object types backed by a table
    pub fn db_types(&self) -> impl Iterator<Item = &ObjectType> {
        self.object_types.iter().filter(|t| t.is_db_type())
    }

    /// db-backed type owning a table
    pub fn db_type_by_table(&self, table: &str) -> Option<&ObjectType> {
        self.db_types().find(|t| t.table_name() == Some(table))
    }

    /// Connector declared on a field
    pub fn connector(&self, parent: &str, field: &str) -> Option<&Connector> {
        self.connectors
            .iter()
            .find(|c| c.parent == parent && c.field == field)
    }
}

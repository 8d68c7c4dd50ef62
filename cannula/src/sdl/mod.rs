//! SDL parsing, schema building and metadata extraction

mod builder;
pub mod connect;
pub mod doc_metadata;
pub mod metadata;

use async_graphql_value::ConstValue;

use crate::ir::Literal;

pub use builder::{
    BUILTIN_SCALARS, PRELUDE, Schema, SdlSource, build_and_extend_schema, build_schema, named_type,
    parse_documents,
};
pub use metadata::{FieldMeta, SchemaMetadata, TypeMeta, extract_metadata};

/// Convert a parsed constant into a literal
pub(crate) fn const_to_literal(value: &ConstValue) -> Literal {
    match value {
        ConstValue::Null => Literal::Null,
        ConstValue::Boolean(b) => Literal::Bool(*b),
        ConstValue::Number(n) => match n.as_i64() {
            Some(int) => Literal::Int(int),
            None => Literal::Float(n.as_f64().unwrap_or_default()),
        },
        ConstValue::String(s) => Literal::String(s.clone()),
        ConstValue::Enum(name) => Literal::Enum(name.to_string()),
        ConstValue::Binary(bytes) => Literal::String(String::from_utf8_lossy(bytes).into_owned()),
        ConstValue::List(items) => Literal::List(items.iter().map(const_to_literal).collect()),
        ConstValue::Object(entries) => Literal::Object(
            entries
                .iter()
                .map(|(key, value)| (key.to_string(), const_to_literal(value)))
                .collect(),
        ),
    }
}

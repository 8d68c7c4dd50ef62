//! Relation resolution
//!
//! Decides how every field that targets a db-backed object type is fetched:
//! through the target's primary key via a foreign key, or through a bound
//! predicate on a generated repository method.

use tracing::debug;

use crate::error::GeneratorError;
use crate::ir::{
    Field, FieldType, ObjectType, Relation, RelationKind, RelationParam, SchemaModel, meta_str,
};

/// Resolve every relation in the model, failing on the first ambiguous one
pub fn resolve_relations(model: &SchemaModel) -> Result<Vec<Relation>, GeneratorError> {
    validate_foreign_keys(model)?;

    let mut relations = Vec::new();
    // Only db-backed parents have repositories to fetch through
    for parent in model.db_types() {
        for field in &parent.fields {
            if model.connector(&parent.name, &field.name).is_some() {
                continue;
            }
            let Some(target) = model
                .object_type(&field.field_type.graphql_name)
                .filter(|t| t.is_db_type())
            else {
                continue;
            };
            let relation = resolve_field(parent, field, target)?;
            debug!(field = %field, target = %target.name, "resolved relation");
            relations.push(relation);
        }
    }
    Ok(relations)
}

fn resolve_field(
    parent: &ObjectType,
    field: &Field,
    target: &ObjectType,
) -> Result<Relation, GeneratorError> {
    let relation = |kind| Relation {
        parent: parent.name.clone(),
        field: field.name.clone(),
        target: target.name.clone(),
        kind,
    };

    let predicate =
        meta_str(&field.metadata, "where").or_else(|| meta_str(&field.metadata, "raw_sql"));
    if let Some(predicate) = predicate {
        let params = bind_params(parent, field, predicate)?;
        return Ok(relation(RelationKind::Predicate {
            method: Relation::method_name(&parent.name, &field.name),
            predicate: compile_predicate(predicate, &params),
            params,
            many: field.field_type.is_list,
        }));
    }

    if let Some(key_field) = foreign_key_field(parent, field, target) {
        if field.field_type.is_list {
            return Err(GeneratorError::Relation(format!(
                "{} is related via {} but {} is a list. Either change the response type to be \
                 singular or provide 'where' and 'args' to retrieve data.",
                field,
                key_field,
                list_display(&field.field_type)
            )));
        }
        return Ok(relation(RelationKind::PrimaryKey {
            foreign_key_field: key_field.name.clone(),
        }));
    }

    let mut message = format!(
        "{} includes a relation to {} that requires a 'where' metadata attribute like \
         '{}_id = :id' to perform the query.",
        field,
        target.name,
        heck::ToSnakeCase::to_snake_case(parent.name.as_str())
    );
    if field.field_type.is_list {
        message.push_str(
            " List relations can not be inferred from a foreign key; either provide 'where' \
             or change the response type to be singular.",
        );
    }
    Err(GeneratorError::Relation(message))
}

/// Sibling field holding a foreign key into the target's table
///
/// The relation field may name the sibling directly with its own
/// `foreign_key` metadata; otherwise the first sibling whose `table.column`
/// foreign key points at the target table is used.
fn foreign_key_field<'a>(
    parent: &'a ObjectType,
    field: &Field,
    target: &ObjectType,
) -> Option<&'a Field> {
    if let Some(named) = field.foreign_key().and_then(|name| parent.field(name)) {
        return Some(named);
    }
    let table = target.table_name()?;
    parent.fields.iter().find(|sibling| {
        sibling.name != field.name
            && sibling
                .foreign_key()
                .and_then(|fk| fk.split_once('.'))
                .is_some_and(|(fk_table, _)| fk_table == table)
    })
}

fn list_display(field_type: &FieldType) -> String {
    format!("[{}]", field_type.graphql_name)
}

/// Bind parameters for a predicate, typed from the parent's fields or the
/// field's own arguments, in placeholder order
fn bind_params(
    parent: &ObjectType,
    field: &Field,
    predicate: &str,
) -> Result<Vec<RelationParam>, GeneratorError> {
    let declared = field
        .metadata
        .get("args")
        .map(|args| args.as_str_list())
        .unwrap_or_default();
    for name in &declared {
        if parent.field(name).is_none() {
            return Err(GeneratorError::Relation(format!(
                "{} lists '{}' in 'args' but {} has no such field.",
                field, name, parent.name
            )));
        }
    }

    let mut params = Vec::new();
    for name in placeholders(predicate) {
        let field_type = parent
            .field(&name)
            .map(|f| f.field_type.clone())
            .or_else(|| {
                field
                    .args
                    .iter()
                    .find(|a| a.name == name)
                    .and_then(|a| a.field_type.clone())
            })
            .ok_or_else(|| {
                GeneratorError::Relation(format!(
                    "{} binds ':{}' but neither {} nor the field declares '{}'.",
                    field, name, parent.name, name
                ))
            })?;
        params.push(RelationParam { name, field_type });
    }
    Ok(params)
}

/// Named `:param` placeholders in first appearance order, without duplicates
///
/// Quoted strings and `::` casts are not placeholders.
pub fn placeholders(predicate: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    scan(predicate, |token| {
        if let Token::Param(name) = token {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    });
    names
}

/// Rewrite `:name` placeholders into `$n` positional parameters
pub fn compile_predicate(predicate: &str, params: &[RelationParam]) -> String {
    let mut compiled = String::with_capacity(predicate.len());
    scan(predicate, |token| match token {
        Token::Text(text) => compiled.push_str(text),
        Token::Param(name) => match params.iter().position(|p| p.name == name) {
            Some(index) => compiled.push_str(&format!("${}", index + 1)),
            None => {
                compiled.push(':');
                compiled.push_str(name);
            }
        },
    });
    compiled
}

enum Token<'a> {
    Text(&'a str),
    Param(&'a str),
}

fn scan<'a>(predicate: &'a str, mut emit: impl FnMut(Token<'a>)) {
    let bytes = predicate.as_bytes();
    let mut start = 0;
    let mut i = 0;
    let mut quoted = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                quoted = !quoted;
                i += 1;
            }
            b':' if !quoted && bytes.get(i + 1) == Some(&b':') => i += 2,
            b':' if !quoted
                && bytes
                    .get(i + 1)
                    .is_some_and(|c| c.is_ascii_alphabetic() || *c == b'_') =>
            {
                emit(Token::Text(&predicate[start..i]));
                let name_start = i + 1;
                let mut end = name_start;
                while bytes
                    .get(end)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'_')
                {
                    end += 1;
                }
                emit(Token::Param(&predicate[name_start..end]));
                start = end;
                i = end;
            }
            _ => i += 1,
        }
    }
    emit(Token::Text(&predicate[start..]));
}

/// Every `table.column` foreign key must point at a db-backed type's table
fn validate_foreign_keys(model: &SchemaModel) -> Result<(), GeneratorError> {
    for object in model.db_types() {
        for field in &object.fields {
            let Some(foreign_key) = field.foreign_key() else {
                continue;
            };
            // A bare name refers to a sibling field, see `foreign_key_field`
            let Some((table, _)) = foreign_key.split_once('.') else {
                continue;
            };
            if model.db_type_by_table(table).is_none() {
                return Err(GeneratorError::Relation(format!(
                    "{} has foreign key '{}' but no type is stored in table '{}'.",
                    field, foreign_key, table
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::sdl::{build_and_extend_schema, extract_metadata};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn relations(sdl: &str) -> Result<Vec<Relation>, GeneratorError> {
        let (schema, documents) = build_and_extend_schema(&[sdl])?;
        let metadata = extract_metadata(&documents);
        let model = analyze(&schema, &metadata, &Default::default())?;
        resolve_relations(&model)
    }

    const BLOG: &str = indoc! {r#"
        type User @db_sql {
            id: ID! @field_meta(primary_key: true)
            name: String!
            posts(limit: Int = 10): [Post] @field_meta(where: "author_id = :id AND kind <> ':skip' AND age > :limit")
        }

        type Post @db_sql {
            id: ID! @field_meta(primary_key: true)
            author_id: String! @field_meta(foreign_key: "users.id")
            author: User
        }
    "#};

    #[test]
    fn test_where_and_foreign_key_relations() {
        let relations = relations(BLOG).unwrap();
        assert_eq!(relations.len(), 2);

        let author = &relations[0];
        assert_eq!((author.parent.as_str(), author.field.as_str()), ("Post", "author"));
        assert_eq!(
            author.kind,
            RelationKind::PrimaryKey {
                foreign_key_field: "author_id".into()
            }
        );

        let posts = &relations[1];
        assert_eq!(posts.target, "Post");
        let RelationKind::Predicate {
            method,
            predicate,
            params,
            many,
        } = &posts.kind
        else {
            panic!("expected a predicate relation");
        };
        assert_eq!(method, "user_posts");
        assert_eq!(predicate, "author_id = $1 AND kind <> ':skip' AND age > $2");
        assert_eq!(params[0].name, "id");
        assert_eq!(params[0].field_type.type_name(), "String");
        assert_eq!(params[1].name, "limit");
        assert_eq!(params[1].field_type.type_name(), "Option<i64>");
        assert!(*many);
    }

    #[test]
    fn test_list_relation_without_where_fails() {
        let err = relations(indoc! {r#"
            type User @db_sql {
                id: ID! @field_meta(primary_key: true)
                posts: [Post]
            }
            type Post @db_sql {
                id: ID! @field_meta(primary_key: true)
            }
        "#})
        .unwrap_err();
        assert!(matches!(err, GeneratorError::Relation(_)));
        let message = err.to_string();
        assert!(message.contains("Field<User.posts>"));
        assert!(message.contains("requires a 'where' metadata attribute"));
        assert!(message.contains("List relations"));
    }

    #[test]
    fn test_list_relation_with_foreign_key_fails() {
        let err = relations(indoc! {r#"
            type User @db_sql {
                id: ID! @field_meta(primary_key: true)
            }
            type Post @db_sql {
                id: ID! @field_meta(primary_key: true)
                author_id: String @field_meta(foreign_key: "users.id")
                authors: [User]
            }
        "#})
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "relation error: Field<Post.authors> is related via Field<Post.author_id> but [User] \
             is a list. Either change the response type to be singular or provide 'where' and \
             'args' to retrieve data."
        );
    }

    #[test]
    fn test_singular_relation_without_key_fails() {
        let err = relations(indoc! {r#"
            type User @db_sql {
                id: ID! @field_meta(primary_key: true)
                latestPost: Post
            }
            type Post @db_sql {
                id: ID! @field_meta(primary_key: true)
            }
        "#})
        .unwrap_err();
        assert!(err.to_string().contains(
            "Field<User.latestPost> includes a relation to Post that requires a 'where' \
             metadata attribute like 'user_id = :id' to perform the query."
        ));
    }

    #[test]
    fn test_unknown_bind_parameter_fails() {
        let err = relations(indoc! {r#"
            type User @db_sql {
                id: ID! @field_meta(primary_key: true)
                posts: [Post] @field_meta(where: "author_id = :ghost")
            }
            type Post @db_sql {
                id: ID! @field_meta(primary_key: true)
            }
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("binds ':ghost'"));
    }

    #[test]
    fn test_foreign_key_to_unknown_table_fails() {
        let err = relations(indoc! {r#"
            type Post @db_sql {
                id: ID! @field_meta(primary_key: true)
                author_id: String @field_meta(foreign_key: "accounts.id")
            }
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("no type is stored in table 'accounts'"));
    }

    #[test]
    fn test_non_db_targets_are_ignored() {
        let relations = relations(indoc! {r#"
            type Profile { bio: String }
            type User @db_sql {
                id: ID! @field_meta(primary_key: true)
                profile: Profile
            }
        "#})
        .unwrap();
        assert!(relations.is_empty());
    }

    #[test]
    fn test_non_db_parents_are_ignored() {
        let relations = relations(indoc! {r#"
            type User @db_sql {
                id: ID! @field_meta(primary_key: true)
            }
            type Dashboard {
                topUser: User
                recentUsers: [User]
            }
        "#})
        .unwrap();
        assert!(relations.is_empty());
    }

    #[test]
    fn test_placeholders_skip_casts_and_strings() {
        assert_eq!(
            placeholders("created::date > :since AND note = ':nope' AND id = :id OR p = :since"),
            vec!["since".to_string(), "id".to_string()]
        );
    }
}

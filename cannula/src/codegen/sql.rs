//! `sql.rs` generation
//!
//! One SeaORM entity module per db-backed object type, plus a `DB{Name}`
//! alias for each entity's model. Types without a table are skipped.

use std::collections::BTreeSet;

use heck::ToUpperCamelCase;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use tracing::debug;

use super::column::{column_name, column_nullable, generate_attributes, map_field_type};
use super::format::{attribute_args, format_code, rust_type};
use crate::error::GeneratorError;
use crate::ir::{Field, ObjectType, SchemaModel};
use crate::naming::{field_ident, ident, type_ident};

/// Generates the entity module
pub struct SqlGenerator<'a> {
    model: &'a SchemaModel,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(model: &'a SchemaModel) -> Self {
        SqlGenerator { model }
    }

    /// Render the formatted module
    pub fn generate(&self) -> Result<String, GeneratorError> {
        format_code(self.tokens()?)
    }

    /// Build the module token stream
    pub fn tokens(&self) -> Result<TokenStream, GeneratorError> {
        let mut entities = Vec::new();
        let mut aliases = Vec::new();
        for object in self.model.db_types() {
            entities.push(self.entity_tokens(object)?);

            let module = ident(&object.db_module());
            let alias = format_ident!("{}", object.db_type());
            aliases.push(quote! { pub use #module::Model as #alias; });
        }

        debug!(entities = entities.len(), "generated entities");

        Ok(quote! {
            //! SeaORM entities generated from the schema
            //! @generated

            #![allow(missing_docs)]
            #![allow(unused_imports)]

            #(#entities)*

            #(#aliases)*
        })
    }

    fn entity_tokens(&self, object: &ObjectType) -> Result<TokenStream, GeneratorError> {
        let module = ident(&object.db_module());
        let table_name = object.table_name().unwrap_or_default();

        if object.primary_keys().is_empty() {
            return Err(GeneratorError::PrimaryKey(format!(
                "Type '{}' is stored in table '{}' but declares no primary key. Add \
                 'primary_key: true' to one of its fields.",
                object.name, table_name
            )));
        }

        // Generate one column per stored field
        let mut columns = Vec::new();
        for field in object.stored_fields() {
            let mapped = map_field_type(field, self.model);
            let attributes = generate_attributes(field, &mapped)?;
            let name = field_ident(&field.name);
            let ty = rust_type(&mapped.declared(!column_nullable(field)?))?;

            let attribute = if attributes.attributes.is_empty() {
                quote! {}
            } else {
                let args = attribute_args(&attributes.joined())?;
                quote! { #[sea_orm(#args)] }
            };
            columns.push(quote! {
                #attribute
                pub #name: #ty
            });
        }

        let (relations, related) = self.relation_tokens(object)?;

        let doc = format!("Entity for the `{}` table", table_name);
        Ok(quote! {
            #[doc = #doc]
            pub mod #module {
                use sea_orm::entity::prelude::*;

                #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
                #[sea_orm(table_name = #table_name)]
                pub struct Model {
                    #(#columns),*
                }

                #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
                pub enum Relation {
                    #(#relations),*
                }

                #(#related)*

                impl ActiveModelBehavior for ActiveModel {}
            }
        })
    }

    /// `belongs_to` relations for `table.column` foreign keys
    fn relation_tokens(
        &self,
        object: &ObjectType,
    ) -> Result<(Vec<TokenStream>, Vec<TokenStream>), GeneratorError> {
        let mut relations = Vec::new();
        let mut related = Vec::new();
        let mut related_targets = BTreeSet::new();

        for field in object.stored_fields() {
            let Some((table, column)) = field.foreign_key().and_then(|fk| fk.split_once('.')) else {
                continue;
            };
            let Some(target) = self.model.db_type_by_table(table) else {
                continue;
            };

            let variant = type_ident(relation_name(field));
            let target_module = target.db_module();
            let belongs_to = format!("super::{}::Entity", target_module);
            let from = format!("Column::{}", field.name.to_upper_camel_case());
            let to = format!(
                "super::{}::Column::{}",
                target_module,
                target_column(target, column).to_upper_camel_case()
            );
            relations.push(quote! {
                #[sea_orm(belongs_to = #belongs_to, from = #from, to = #to)]
                #variant
            });

            // One `Related` impl per target entity
            if related_targets.insert(target_module.clone()) {
                let target_mod = ident(&target_module);
                related.push(quote! {
                    impl Related<super::#target_mod::Entity> for Entity {
                        fn to() -> RelationDef {
                            Relation::#variant.def()
                        }
                    }
                });
            }
        }

        Ok((relations, related))
    }
}

/// Relation variant name, `author_id` becomes `Author`
fn relation_name(field: &Field) -> &str {
    let name = field.name.as_str();
    name.strip_suffix("_id")
        .or_else(|| name.strip_suffix("Id"))
        .filter(|stem| !stem.is_empty())
        .unwrap_or(name)
}

/// Field name on the target whose column matches the foreign key column
fn target_column(target: &ObjectType, column: &str) -> String {
    target
        .stored_fields()
        .find(|f| column_name(f) == column)
        .map(|f| f.name.clone())
        .unwrap_or_else(|| column.to_string())
}

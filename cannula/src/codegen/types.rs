//! `types.rs` generation
//!
//! Emits one Rust declaration per schema type: enums, interface traits,
//! object structs with resolver traits, unions, input structs and the
//! root operation contracts bundled into `RootType`.

use proc_macro2::{Literal as TokenLiteral, TokenStream};
use quote::{format_ident, quote};
use tracing::debug;

use super::format::{format_code, rust_type};
use crate::error::GeneratorError;
use crate::ir::{EnumType, Field, FieldType, Literal, ObjectType, SchemaModel, UnionType};
use crate::naming::{field_ident, ident, type_ident};

/// Generates the types module
pub struct TypesGenerator<'a> {
    model: &'a SchemaModel,
    /// Add serde derives and renames so values can be validated on the wire
    validating: bool,
}

impl<'a> TypesGenerator<'a> {
    pub fn new(model: &'a SchemaModel, validating: bool) -> Self {
        TypesGenerator { model, validating }
    }

    /// Render the formatted module
    pub fn generate(&self) -> Result<String, GeneratorError> {
        format_code(self.tokens()?)
    }

    /// Build the module token stream
    pub fn tokens(&self) -> Result<TokenStream, GeneratorError> {
        let enums = self
            .model
            .enum_types
            .iter()
            .map(|e| self.enum_tokens(e))
            .collect::<Vec<_>>();
        let interfaces = self
            .model
            .interface_types
            .iter()
            .map(|i| self.interface_tokens(i))
            .collect::<Result<Vec<_>, _>>()?;
        let objects = self
            .model
            .object_types
            .iter()
            .map(|o| self.object_tokens(o))
            .collect::<Result<Vec<_>, _>>()?;
        let unions = self
            .model
            .union_types
            .iter()
            .map(|u| self.union_tokens(u))
            .collect::<Result<Vec<_>, _>>()?;
        let inputs = self
            .model
            .input_types
            .iter()
            .map(|i| self.input_tokens(i))
            .collect::<Result<Vec<_>, _>>()?;
        let root = self.root_tokens()?;

        debug!(
            enums = enums.len(),
            objects = objects.len(),
            inputs = inputs.len(),
            "generated types"
        );

        Ok(quote! {
            //! GraphQL types generated from the schema
            //! @generated

            #![allow(missing_docs)]
            #![allow(unused_imports)]
            #![allow(clippy::too_many_arguments)]

            use std::future::Future;
            use std::pin::Pin;

            /// Error returned by resolvers
            pub type ResolverError = Box<dyn std::error::Error + Send + Sync>;

            /// Result returned by resolvers
            pub type ResolverResult<T> = Result<T, ResolverError>;

            /// Boxed future returned by root operation resolvers
            pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

            #(#enums)*
            #(#interfaces)*
            #(#objects)*
            #(#unions)*
            #(#inputs)*
            #root
        })
    }

    /// Derive list shared by structs
    fn struct_derives(&self) -> TokenStream {
        if self.validating {
            quote! { #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)] }
        } else {
            quote! { #[derive(Debug, Clone)] }
        }
    }

    /// `#[serde(rename = "...")]` when the Rust name differs from the GraphQL name
    fn rename(&self, graphql_name: &str, rust_name: &str) -> TokenStream {
        if self.validating && graphql_name != rust_name.trim_start_matches("r#") {
            quote! { #[serde(rename = #graphql_name)] }
        } else {
            quote! {}
        }
    }

    fn enum_tokens(&self, enum_type: &EnumType) -> TokenStream {
        let enum_ident = ident(&enum_type.rust_type);
        let doc = doc_attr(enum_type.description.as_deref());

        let derives = if self.validating {
            quote! {
                #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
            }
        } else {
            quote! { #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)] }
        };

        let mut variants = Vec::new();
        let mut as_str_arms = Vec::new();
        let mut from_str_arms = Vec::new();
        for (index, value) in enum_type.values.iter().enumerate() {
            let variant = type_ident(&value.name);
            let name = &value.name;
            let value_doc = doc_attr(value.description.as_deref());
            // First value is the default, matching GraphQL's first listed value
            let default_attr = if index == 0 {
                quote! { #[default] }
            } else {
                quote! {}
            };
            let rename = if self.validating {
                quote! { #[serde(rename = #name)] }
            } else {
                quote! {}
            };
            variants.push(quote! {
                #value_doc
                #default_attr
                #rename
                #variant
            });
            as_str_arms.push(quote! { #enum_ident::#variant => #name });
            from_str_arms.push(quote! { #name => Ok(#enum_ident::#variant) });
        }

        let enum_name = &enum_type.name;
        quote! {
            #doc
            #derives
            pub enum #enum_ident {
                #(#variants),*
            }

            impl #enum_ident {
                /// Value as written in the schema
                pub const fn as_str(&self) -> &'static str {
                    match self {
                        #(#as_str_arms),*
                    }
                }
            }

            impl std::fmt::Display for #enum_ident {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.as_str())
                }
            }

            impl std::str::FromStr for #enum_ident {
                type Err = String;

                fn from_str(value: &str) -> Result<Self, Self::Err> {
                    match value {
                        #(#from_str_arms,)*
                        other => Err(format!("'{}' is not a valid {}", other, #enum_name)),
                    }
                }
            }
        }
    }

    fn interface_tokens(&self, interface: &ObjectType) -> Result<TokenStream, GeneratorError> {
        let trait_ident = ident(&interface.rust_type);
        let doc = doc_attr(interface.description.as_deref());

        let mut getters = Vec::new();
        for field in interface.stored_fields() {
            let name = field_ident(&field.name);
            let ty = rust_type(&field.type_name())?;
            let field_doc = doc_attr(field.description.as_deref());
            getters.push(quote! {
                #field_doc
                fn #name(&self) -> &#ty;
            });
        }

        Ok(quote! {
            #doc
            pub trait #trait_ident {
                #(#getters)*
            }
        })
    }

    fn object_tokens(&self, object: &ObjectType) -> Result<TokenStream, GeneratorError> {
        let struct_ident = ident(&object.rust_type);
        let typename = &object.name;
        let doc = doc_attr(object.description.as_deref());
        let derives = self.struct_derives();

        // Stored fields become struct members
        let mut members = Vec::new();
        let mut params = Vec::new();
        let mut inits = Vec::new();
        for field in object.stored_fields() {
            let name = field_ident(&field.name);
            let ty = rust_type(&field.type_name())?;
            let field_doc = doc_attr(field.description.as_deref());
            let rename = self.rename(&field.name, &name.to_string());
            members.push(quote! {
                #field_doc
                #rename
                pub #name: #ty
            });
            if field.field_type.required {
                params.push(quote! { #name: #ty });
                inits.push(quote! { #name });
            } else {
                inits.push(quote! { #name: None });
            }
        }

        let resolvers = self.resolvers_tokens(object)?;
        let interface_impls = self.interface_impls(object)?;

        Ok(quote! {
            #doc
            #derives
            pub struct #struct_ident {
                #(#members),*
            }

            impl #struct_ident {
                /// The `__typename` of this type
                pub const TYPENAME: &'static str = #typename;

                pub fn new(#(#params),*) -> Self {
                    Self {
                        #(#inits),*
                    }
                }
            }

            #resolvers
            #interface_impls
        })
    }

    /// Computed fields become methods on a resolver trait implemented by hand
    fn resolvers_tokens(&self, object: &ObjectType) -> Result<TokenStream, GeneratorError> {
        let computed: Vec<&Field> = object.computed_fields().collect();
        if computed.is_empty() {
            return Ok(quote! {});
        }

        let trait_ident = format_ident!("{}Resolvers", object.rust_type);
        let mut methods = Vec::new();
        for field in computed {
            let name = field_ident(&field.name);
            let output = rust_type(&field.type_name())?;
            let args = argument_params(field)?;
            let field_doc = doc_attr(field.description.as_deref());
            methods.push(quote! {
                #field_doc
                fn #name(&self, ctx: &C #(, #args)*) -> impl Future<Output = ResolverResult<#output>> + Send;
            });
        }

        let doc = format!("Resolvers for the computed fields of `{}`", object.name);
        Ok(quote! {
            #[doc = #doc]
            pub trait #trait_ident<C: Send + Sync>: Send + Sync {
                #(#methods)*
            }
        })
    }

    /// Implement interface traits whose stored fields the object also stores
    fn interface_impls(&self, object: &ObjectType) -> Result<TokenStream, GeneratorError> {
        let struct_ident = ident(&object.rust_type);
        let mut impls = Vec::new();

        for interface_name in &object.interfaces {
            let Some(interface) = self
                .model
                .interface_types
                .iter()
                .find(|i| &i.name == interface_name)
            else {
                continue;
            };

            let compatible = interface.stored_fields().all(|field| {
                object
                    .field(&field.name)
                    .is_some_and(|own| !own.is_computed() && own.type_name() == field.type_name())
            });
            if !compatible {
                debug!(
                    object = %object.name,
                    interface = %interface.name,
                    "skipping interface impl, fields differ"
                );
                continue;
            }

            let trait_ident = ident(&interface.rust_type);
            let mut getters = Vec::new();
            for field in interface.stored_fields() {
                let name = field_ident(&field.name);
                let ty = rust_type(&field.type_name())?;
                getters.push(quote! {
                    fn #name(&self) -> &#ty {
                        &self.#name
                    }
                });
            }
            impls.push(quote! {
                impl #trait_ident for #struct_ident {
                    #(#getters)*
                }
            });
        }

        Ok(quote! { #(#impls)* })
    }

    fn union_tokens(&self, union: &UnionType) -> Result<TokenStream, GeneratorError> {
        let enum_ident = ident(&union.rust_type);
        let doc = doc_attr(union.description.as_deref());
        let derives = self.struct_derives();
        let untagged = if self.validating {
            quote! { #[serde(untagged)] }
        } else {
            quote! {}
        };

        let mut variants = Vec::new();
        let mut typename_arms = Vec::new();
        let mut from_impls = Vec::new();
        for member in &union.types {
            let variant = type_ident(&member.graphql_name);
            let member_ty = rust_type(member.safe_value())?;
            variants.push(quote! { #variant(#member_ty) });
            typename_arms.push(quote! { #enum_ident::#variant(_) => #member_ty::TYPENAME });
            from_impls.push(quote! {
                impl From<#member_ty> for #enum_ident {
                    fn from(value: #member_ty) -> Self {
                        #enum_ident::#variant(value)
                    }
                }
            });
        }

        Ok(quote! {
            #doc
            #derives
            #untagged
            pub enum #enum_ident {
                #(#variants),*
            }

            impl #enum_ident {
                /// The `__typename` of the contained value
                pub fn typename(&self) -> &'static str {
                    match self {
                        #(#typename_arms),*
                    }
                }
            }

            #(#from_impls)*
        })
    }

    fn input_tokens(&self, input: &ObjectType) -> Result<TokenStream, GeneratorError> {
        let struct_ident = ident(&input.rust_type);
        let doc = doc_attr(input.description.as_deref());
        let derives = self.struct_derives();

        let mut members = Vec::new();
        let mut params = Vec::new();
        let mut inits = Vec::new();
        for field in &input.fields {
            let name = field_ident(&field.name);
            let type_name = self_referencing(input, field);
            let ty = rust_type(&type_name)?;
            let field_doc = doc_attr(field.description.as_deref());
            let rename = self.rename(&field.name, &name.to_string());
            members.push(quote! {
                #field_doc
                #rename
                pub #name: #ty
            });

            let default = field
                .default
                .as_ref()
                .and_then(|literal| self.default_tokens(literal, &field.field_type));
            match default {
                Some(value) => inits.push(quote! { #name: #value }),
                None if field.field_type.required => {
                    params.push(quote! { #name: #ty });
                    inits.push(quote! { #name });
                }
                None => inits.push(quote! { #name: None }),
            }
        }

        Ok(quote! {
            #doc
            #derives
            pub struct #struct_ident {
                #(#members),*
            }

            impl #struct_ident {
                /// Build the input applying schema defaults
                pub fn new(#(#params),*) -> Self {
                    Self {
                        #(#inits),*
                    }
                }
            }
        })
    }

    /// Default value expression for a field, `None` when it can not be expressed
    fn default_tokens(&self, literal: &Literal, field_type: &FieldType) -> Option<TokenStream> {
        let value = match literal {
            Literal::Null => return Some(quote! { None }),
            Literal::List(items) => {
                let nullable_items = field_type
                    .value
                    .as_deref()
                    .is_some_and(|v| v.starts_with("Vec<Option<"));
                let items = items
                    .iter()
                    .map(|item| match item {
                        Literal::Null => Some(quote! { None }),
                        _ => {
                            let value = self.scalar_tokens(item, field_type)?;
                            Some(if nullable_items {
                                quote! { Some(#value) }
                            } else {
                                value
                            })
                        }
                    })
                    .collect::<Option<Vec<_>>>()?;
                quote! { vec![#(#items),*] }
            }
            other => self.scalar_tokens(other, field_type)?,
        };

        if field_type.required {
            Some(value)
        } else {
            Some(quote! { Some(#value) })
        }
    }

    fn scalar_tokens(&self, literal: &Literal, field_type: &FieldType) -> Option<TokenStream> {
        match literal {
            Literal::Bool(b) => Some(quote! { #b }),
            Literal::Int(i) if field_type.of_type.as_deref() == Some("f64") => {
                let value = TokenLiteral::f64_unsuffixed(*i as f64);
                Some(quote! { #value })
            }
            Literal::Int(i) => {
                let value = TokenLiteral::i64_unsuffixed(*i);
                Some(quote! { #value })
            }
            Literal::Float(f) => {
                let value = TokenLiteral::f64_unsuffixed(*f);
                Some(quote! { #value })
            }
            Literal::String(s) | Literal::Enum(s) => {
                // Enum defaults become variants when the target is a known enum
                let known = self
                    .model
                    .enum_type(&field_type.graphql_name)
                    .filter(|e| e.values.iter().any(|v| &v.name == s));
                match known {
                    Some(enum_type) => {
                        let enum_ident = ident(&enum_type.rust_type);
                        let variant = type_ident(s);
                        Some(quote! { #enum_ident::#variant })
                    }
                    None => Some(quote! { String::from(#s) }),
                }
            }
            Literal::Null | Literal::List(_) | Literal::Object(_) => None,
        }
    }

    /// One callable contract per root operation field, bundled in `RootType`
    fn root_tokens(&self) -> Result<TokenStream, GeneratorError> {
        let operations = &self.model.operation_fields;

        let mut contracts = Vec::new();
        let mut members = Vec::new();
        let mut defaults = Vec::new();
        for field in operations {
            let trait_ident = type_ident(&field.operation_name());
            let output = rust_type(&field.type_name())?;
            let args = argument_params(field)?;
            let arg_names: Vec<_> = field.args.iter().map(|a| field_ident(&a.name)).collect();
            let arg_types = field
                .args
                .iter()
                .map(|a| rust_type(&a.type_name()))
                .collect::<Result<Vec<_>, _>>()?;
            let doc = doc_attr(field.description.as_deref());

            contracts.push(quote! {
                #doc
                pub trait #trait_ident<C>: Send + Sync {
                    fn call<'a>(&'a self, ctx: &'a C #(, #args)*) -> BoxFuture<'a, ResolverResult<#output>>;
                }

                impl<C, F> #trait_ident<C> for F
                where
                    F: for<'a> Fn(&'a C #(, #arg_types)*) -> BoxFuture<'a, ResolverResult<#output>> + Send + Sync,
                {
                    fn call<'a>(&'a self, ctx: &'a C #(, #args)*) -> BoxFuture<'a, ResolverResult<#output>> {
                        self(ctx #(, #arg_names)*)
                    }
                }
            });

            // Same field name on two roots, keep both apart
            let collides = operations
                .iter()
                .filter(|other| other.name == field.name)
                .count()
                > 1;
            let member = if collides {
                field_ident(&field.operation_name())
            } else {
                field_ident(&field.name)
            };
            members.push(quote! { pub #member: Option<Box<dyn #trait_ident<C>>> });
            defaults.push(quote! { #member: None });
        }

        Ok(quote! {
            #(#contracts)*

            /// Resolver registrations for every root operation
            pub struct RootType<C> {
                #(#members),*
            }

            impl<C> Default for RootType<C> {
                fn default() -> Self {
                    Self {
                        #(#defaults),*
                    }
                }
            }
        })
    }
}

/// `name: Type` parameters for the arguments of a field
fn argument_params(field: &Field) -> Result<Vec<TokenStream>, GeneratorError> {
    field
        .args
        .iter()
        .map(|arg| {
            let name = field_ident(&arg.name);
            let ty = rust_type(&arg.type_name())?;
            Ok(quote! { #name: #ty })
        })
        .collect()
}

/// Box direct self references so the input has a finite size
fn self_referencing(input: &ObjectType, field: &Field) -> String {
    let field_type = &field.field_type;
    if field_type.graphql_name != input.name || field_type.is_list {
        return field.type_name();
    }
    let boxed = format!("Box<{}>", field_type.safe_value());
    if field_type.required {
        boxed
    } else {
        format!("Option<{}>", boxed)
    }
}

/// `#[doc = "..."]` for an optional description
pub(crate) fn doc_attr(description: Option<&str>) -> TokenStream {
    match description {
        Some(text) => {
            let text = format!(" {}", text);
            quote! { #[doc = #text] }
        }
        None => quote! {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::sdl::{build_and_extend_schema, extract_metadata};
    use indoc::indoc;

    const SCHEMA: &str = indoc! {r#"
        "Sort order"
        enum Sort { ASC DESC }

        interface Node { id: ID! }

        "A person"
        type User implements Node {
            id: ID!
            displayName: String
            "@metadata(computed: true)"
            score: Int
            posts(limit: Int = 10): [Post]
        }

        type Post implements Node { id: ID!, title: String! }

        union SearchResult = User | Post

        input Filter {
            limit: Int = 10
            sort: Sort = DESC
            tags: [String] = ["a", "b"]
            ratio: Float = 1
            query: String!
            not: Filter
        }

        type Query {
            me: User
            search(filter: Filter!): [SearchResult]
        }

        type Mutation {
            me(name: String!): User
        }
    "#};

    fn generate(sdl: &str, validating: bool) -> String {
        let (schema, documents) = build_and_extend_schema(&[sdl]).unwrap();
        let metadata = extract_metadata(&documents);
        let model = analyze(&schema, &metadata, &Default::default()).unwrap();
        TypesGenerator::new(&model, validating).generate().unwrap()
    }

    #[test]
    fn test_schema_names_do_not_shadow_std_types() {
        let code = generate(
            indoc! {r#"
                type User { id: ID! }
                union Result = User
                enum Option { ON OFF }
                type Query {
                    find(mode: Option = ON): Result
                }
            "#},
            false,
        );
        assert!(code.contains("pub enum ResultUnion {"));
        assert!(code.contains("pub enum OptionEnum {"));
        assert!(code.contains("Option<ResultUnion>"));
        assert!(!code.contains("pub enum Result "));
        assert!(!code.contains("pub enum Option "));
    }

    #[test]
    fn test_object_struct_and_resolvers() {
        let code = generate(SCHEMA, false);
        assert!(code.contains("pub struct UserType {"));
        assert!(code.contains("pub const TYPENAME: &'static str = \"User\";"));
        assert!(code.contains("pub display_name: Option<String>,"));
        assert!(code.contains("pub fn new(id: String) -> Self"));
        assert!(code.contains("pub trait UserTypeResolvers<C: Send + Sync>: Send + Sync"));
        assert!(code.contains("fn score(&self, ctx: &C)"));
        assert!(code.contains("fn posts("));
        assert!(code.contains("limit: Option<i64>"));
        assert!(code.contains("impl Future<Output = ResolverResult<Option<Vec<PostType>>>> + Send"));
        // Computed fields are not stored
        assert!(!code.contains("pub score:"));
        assert!(!code.contains("pub posts:"));
    }

    #[test]
    fn test_interfaces_and_unions() {
        let code = generate(SCHEMA, false);
        assert!(code.contains("pub trait Node {"));
        assert!(code.contains("fn id(&self) -> &String;"));
        assert!(code.contains("impl Node for UserType {"));
        assert!(code.contains("impl Node for PostType {"));
        assert!(code.contains("pub enum SearchResult {"));
        assert!(code.contains("User(UserType)"));
        assert!(code.contains("impl From<PostType> for SearchResult"));
    }

    #[test]
    fn test_enum_generation() {
        let code = generate(SCHEMA, false);
        assert!(code.contains("/// Sort order"));
        assert!(code.contains("pub enum Sort {"));
        assert!(code.contains("#[default]\n    Asc,"));
        assert!(code.contains("Sort::Desc => \"DESC\""));
        assert!(code.contains("impl std::str::FromStr for Sort"));
    }

    #[test]
    fn test_input_defaults() {
        let code = generate(SCHEMA, false);
        assert!(code.contains("pub struct FilterInput {"));
        assert!(code.contains("limit: Some(10)"));
        assert!(code.contains("sort: Some(Sort::Desc)"));
        assert!(code.contains("tags: Some(vec![Some(String::from(\"a\")), Some(String::from(\"b\"))])"));
        assert!(code.contains("ratio: Some(1.0)"));
        assert!(code.contains("pub fn new(query: String) -> Self"));
        assert!(code.contains("pub not: Option<Box<FilterInput>>"));
    }

    #[test]
    fn test_root_operations() {
        let code = generate(SCHEMA, false);
        assert!(code.contains("pub trait MeQuery<C>: Send + Sync"));
        assert!(code.contains("pub trait SearchQuery<C>: Send + Sync"));
        assert!(code.contains("pub trait MeMutation<C>: Send + Sync"));
        assert!(code.contains("filter: FilterInput"));
        assert!(code.contains("pub struct RootType<C> {"));
        // `me` exists on both roots
        assert!(code.contains("pub me_query: Option<Box<dyn MeQuery<C>>>"));
        assert!(code.contains("pub me_mutation: Option<Box<dyn MeMutation<C>>>"));
        assert!(code.contains("pub search: Option<Box<dyn SearchQuery<C>>>"));
    }

    #[test]
    fn test_validating_mode_adds_serde_only() {
        let plain = generate(SCHEMA, false);
        let validating = generate(SCHEMA, true);
        assert!(!plain.contains("serde::Serialize"));
        assert!(validating.contains("serde::Serialize, serde::Deserialize"));
        assert!(validating.contains("#[serde(rename = \"displayName\")]"));
        assert!(validating.contains("#[serde(rename = \"ASC\")]"));
        assert!(validating.contains("#[serde(untagged)]"));
        // Same fields in the same order
        let fields = |code: &str| {
            code.lines()
                .filter(|l| l.trim_start().starts_with("pub ") && l.contains(':'))
                .map(str::trim)
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        assert_eq!(fields(&plain), fields(&validating));
    }

    #[test]
    fn test_generation_is_deterministic() {
        assert_eq!(generate(SCHEMA, false), generate(SCHEMA, false));
    }

    #[test]
    fn test_keyword_fields() {
        let code = generate("type Item { type: String, self: Int }", false);
        assert!(code.contains("pub r#type: Option<String>"));
        assert!(code.contains("pub self_: Option<i64>"));
    }
}

//! `context.rs` generation
//!
//! Emits the data access layer for a schema: a memoizing
//! `DatabaseRepository` with one `{Name}Datasource` per db-backed type, one
//! HTTP datasource per `@source` (or standalone `@connect`), the `Settings`
//! trait listing every `$config` variable and the `Context` that owns them.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use regex::Regex;
use tracing::debug;

use super::column::{Conversion, column_nullable, map_field_type};
use super::format::{format_code, rust_type};
use crate::error::GeneratorError;
use crate::ir::{
    Connector, Field, HttpHeader, ObjectType, Relation, RelationKind, SchemaModel,
};
use crate::naming::{field_ident, ident};
use crate::sdl::connect::config_vars;

static CONFIG_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$config\.([A-Za-z_][A-Za-z0-9_]*)").expect("config variable pattern is valid")
});
static ARGS_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\$args\.([A-Za-z_][A-Za-z0-9_]*)\}").expect("argument pattern is valid")
});

/// Generates the context module
pub struct ContextGenerator<'a> {
    model: &'a SchemaModel,
    relations: &'a [Relation],
    /// Connector responses decode into the declared types
    validating: bool,
}

/// Connectors served by one generated HTTP datasource
struct HttpGroup<'a> {
    struct_name: String,
    context_attr: String,
    base_url: String,
    headers: Vec<HttpHeader>,
    connectors: Vec<&'a Connector>,
}

impl<'a> ContextGenerator<'a> {
    pub fn new(model: &'a SchemaModel, relations: &'a [Relation], validating: bool) -> Self {
        ContextGenerator {
            model,
            relations,
            validating,
        }
    }

    /// Render the formatted module
    pub fn generate(&self) -> Result<String, GeneratorError> {
        format_code(self.tokens()?)
    }

    /// Build the module token stream
    pub fn tokens(&self) -> Result<TokenStream, GeneratorError> {
        let db_types: Vec<&ObjectType> = self.model.db_types().collect();
        let groups = self.http_groups();

        let repository = if db_types.is_empty() {
            quote! {}
        } else {
            repository_tokens()
        };
        let http = if groups.is_empty() {
            quote! {}
        } else {
            http_tokens()
        };

        let datasources = db_types
            .iter()
            .map(|object| self.datasource_tokens(object))
            .collect::<Result<Vec<_>, _>>()?;
        let http_datasources = groups
            .iter()
            .map(|group| self.http_datasource_tokens(group))
            .collect::<Result<Vec<_>, _>>()?;
        let settings = self.settings_tokens(!db_types.is_empty());
        let context = self.context_tokens(&db_types, &groups);

        debug!(
            repositories = datasources.len(),
            http = http_datasources.len(),
            "generated context"
        );

        Ok(quote! {
            //! Data access context generated from the schema
            //! @generated

            #![allow(missing_docs)]
            #![allow(dead_code)]
            #![allow(unused_imports)]
            #![allow(unused_variables)]
            #![allow(clippy::too_many_arguments)]

            use std::collections::HashMap;
            use std::error::Error;
            use std::marker::PhantomData;
            use std::ops::Deref;
            use std::sync::{Arc, Mutex, PoisonError};

            use futures::future::{BoxFuture, FutureExt, Shared};

            use super::sql;
            use super::types::*;

            /// Error returned by every datasource method
            pub type DatasourceError = Box<dyn Error + Send + Sync>;

            #repository
            #http
            #(#datasources)*
            #(#http_datasources)*
            #settings
            #context
        })
    }

    /// One group per named source, plus one per standalone connector
    fn http_groups(&self) -> Vec<HttpGroup<'a>> {
        let mut groups: Vec<HttpGroup<'a>> = self
            .model
            .sources
            .iter()
            .map(|source| HttpGroup {
                struct_name: source.datasource_name(),
                context_attr: source.context_attr(),
                base_url: source.base_url.clone(),
                headers: source.headers.clone(),
                connectors: self
                    .model
                    .connectors
                    .iter()
                    .filter(|c| c.source.as_deref() == Some(source.name.as_str()))
                    .collect(),
            })
            .collect();

        for connector in self.model.connectors.iter().filter(|c| c.source.is_none()) {
            groups.push(HttpGroup {
                struct_name: connector.datasource_name(),
                context_attr: heck::ToSnakeCase::to_snake_case(
                    format!("{}_{}", connector.parent, connector.field).as_str(),
                ),
                base_url: String::new(),
                headers: Vec::new(),
                connectors: vec![connector],
            });
        }
        groups
    }

    fn datasource_tokens(&self, object: &ObjectType) -> Result<TokenStream, GeneratorError> {
        let struct_ident = ident(&object.datasource_name());
        let graph_ident = ident(&object.rust_type);
        let module = ident(&object.db_module());
        let doc = format!("Repository for `{}` rows", object.name);

        // Relations are served by the repository of their target
        let methods = self
            .relations
            .iter()
            .filter(|r| r.target == object.name)
            .map(|r| self.relation_tokens(r, object))
            .collect::<Result<Vec<_>, _>>()?;

        let conversion = self.conversion_tokens(object)?;

        Ok(quote! {
            #[doc = #doc]
            pub struct #struct_ident(DatabaseRepository<sql::#module::Entity, #graph_ident>);

            impl #struct_ident {
                pub fn new(db: DatabaseConnection, readonly: Option<DatabaseConnection>) -> Self {
                    Self(DatabaseRepository::new(db, readonly))
                }

                #(#methods)*
            }

            impl Deref for #struct_ident {
                type Target = DatabaseRepository<sql::#module::Entity, #graph_ident>;

                fn deref(&self) -> &Self::Target {
                    &self.0
                }
            }

            #conversion
        })
    }

    fn relation_tokens(
        &self,
        relation: &Relation,
        target: &ObjectType,
    ) -> Result<TokenStream, GeneratorError> {
        let graph_ident = ident(&target.rust_type);
        let doc = format!("Resolve `{}.{}`", relation.parent, relation.field);

        match &relation.kind {
            RelationKind::PrimaryKey { foreign_key_field } => {
                let method = field_ident(&Relation::method_name(&relation.parent, &relation.field));
                let key = self
                    .model
                    .object_type(&relation.parent)
                    .and_then(|parent| parent.field(foreign_key_field))
                    .ok_or_else(|| {
                        GeneratorError::CodeGenError(format!(
                            "Foreign key field '{}' missing on {}",
                            foreign_key_field, relation.parent
                        ))
                    })?;
                let key_ident = field_ident(&key.name);
                let key_type = rust_type(&key.type_name())?;
                let body = if key.field_type.required {
                    quote! { self.get_by_pk(#key_ident).await }
                } else {
                    quote! {
                        match #key_ident {
                            Some(key) => self.get_by_pk(key).await,
                            None => Ok(None),
                        }
                    }
                };
                Ok(quote! {
                    #[doc = #doc]
                    pub async fn #method(&self, #key_ident: #key_type) -> Result<Option<#graph_ident>, DatasourceError> {
                        #body
                    }
                })
            }
            RelationKind::Predicate {
                method,
                predicate,
                params,
                many,
            } => {
                let method = field_ident(method);
                let mut args = Vec::new();
                let mut values = Vec::new();
                for param in params {
                    let name = field_ident(&param.name);
                    let ty = rust_type(&param.field_type.type_name())?;
                    args.push(quote! { #name: #ty });
                    values.push(quote! { sea_orm::Value::from(#name) });
                }

                let expr = if values.is_empty() {
                    quote! { Expr::cust(#predicate) }
                } else {
                    quote! { Expr::cust_with_values(#predicate, [#(#values),*]) }
                };
                let (output, call) = if *many {
                    (
                        quote! { Vec<#graph_ident> },
                        quote! { self.get_models(condition, None, None).await },
                    )
                } else {
                    (
                        quote! { Option<#graph_ident> },
                        quote! { self.get_model(condition).await },
                    )
                };
                Ok(quote! {
                    #[doc = #doc]
                    pub async fn #method(&self #(, #args)*) -> Result<#output, DatasourceError> {
                        let condition = Condition::all().add(#expr);
                        #call
                    }
                })
            }
        }
    }

    /// `TryFrom<Model>` converting a row into the graph type
    ///
    /// JSON and enum columns that fail to decode are errors.
    fn conversion_tokens(&self, object: &ObjectType) -> Result<TokenStream, GeneratorError> {
        let graph_ident = ident(&object.rust_type);
        let module = ident(&object.db_module());

        let mut inits = Vec::new();
        for field in object.stored_fields() {
            let name = field_ident(&field.name);
            let mapped = map_field_type(field, self.model);
            let nullable = column_nullable(field)?;
            let value = match (mapped.conversion, nullable) {
                (Conversion::Direct, _) => quote! { model.#name },
                (Conversion::Json, false) => quote! { serde_json::from_value(model.#name)? },
                (Conversion::Json, true) => {
                    quote! { model.#name.map(serde_json::from_value).transpose()? }
                }
                (Conversion::Enum, false) => quote! { model.#name.parse()? },
                (Conversion::Enum, true) => {
                    quote! { model.#name.map(|value| value.parse()).transpose()? }
                }
            };
            // Non-null columns behind optional schema fields
            let value = if !field.field_type.required && !nullable {
                quote! { Some(#value) }
            } else {
                value
            };
            inits.push(quote! { #name: #value });
        }

        Ok(quote! {
            impl TryFrom<sql::#module::Model> for #graph_ident {
                type Error = DatasourceError;

                fn try_from(model: sql::#module::Model) -> Result<Self, Self::Error> {
                    Ok(Self {
                        #(#inits),*
                    })
                }
            }
        })
    }

    fn http_datasource_tokens(&self, group: &HttpGroup<'_>) -> Result<TokenStream, GeneratorError> {
        let struct_ident = ident(&group.struct_name);
        let base_url = config_expr(&group.base_url);
        let headers = headers_tokens(&group.headers);

        let mut fields = Vec::new();
        let mut inits = Vec::new();
        let mut methods = Vec::new();
        for connector in &group.connectors {
            let request = field_ident(&connector.method_name());
            let method = format_ident!("{}", connector.method.as_str());
            let path = config_expr(&connector.path);
            let connector_headers = headers_tokens(&connector.headers);
            fields.push(quote! { #request: ConnectRequest });
            inits.push(quote! {
                #request: ConnectRequest::new(Method::#method, #path, #connector_headers)
            });
            methods.push(self.connector_tokens(connector)?);
        }

        let doc = format!("HTTP datasource `{}`", group.struct_name);
        Ok(quote! {
            #[doc = #doc]
            pub struct #struct_ident {
                http: HttpDatasource,
                #(#fields),*
            }

            impl #struct_ident {
                pub fn new<S: Settings>(settings: &S, request_headers: &HeaderMap) -> Result<Self, DatasourceError> {
                    Ok(Self {
                        http: HttpDatasource::new(#base_url, #headers),
                        #(#inits),*
                    })
                }

                #(#methods)*
            }

            impl Deref for #struct_ident {
                type Target = HttpDatasource;

                fn deref(&self) -> &Self::Target {
                    &self.http
                }
            }
        })
    }

    fn connector_tokens(&self, connector: &Connector) -> Result<TokenStream, GeneratorError> {
        let owner = format!("Field<{}.{}>", connector.parent, connector.field);
        let field = self.connector_field(connector).ok_or_else(|| {
            GeneratorError::Connect(format!("{}: connector field is not declared", owner))
        })?;

        let method = field_ident(&connector.method_name());
        let request = method.clone();
        let mut params = Vec::new();
        for arg in &field.args {
            let name = field_ident(&arg.name);
            let ty = rust_type(&arg.type_name())?;
            params.push(quote! { #name: #ty });
        }

        // `{$args.name}` placeholders are bound at call time
        let path = args_bindings(field, &connector.path, &owner, quote! { self.#request.path })?;
        let body = match &connector.body {
            Some(template) => {
                let bound = args_bindings(field, template, &owner, quote! { String::from(#template) })?;
                quote! { Some(serde_json::from_str::<serde_json::Value>(&#bound)?) }
            }
            None => quote! { None },
        };

        let selection = match &connector.selection {
            Some(selection) => quote! {
                let response = cannula::json_selection::apply_selection(&response, #selection);
            },
            None => quote! {},
        };
        let (output, result) = if self.validating {
            let output = rust_type(&field.type_name())?;
            (output, quote! { Ok(serde_json::from_value(response)?) })
        } else {
            (quote! { serde_json::Value }, quote! { Ok(response) })
        };

        let doc = format!(
            "`{} {}` for `{}.{}`",
            connector.method.as_str(),
            connector.path,
            connector.parent,
            connector.field
        );
        Ok(quote! {
            #[doc = #doc]
            pub async fn #method(&self #(, #params)*) -> Result<#output, DatasourceError> {
                let path = #path;
                let body = #body;
                let response = self.http.fetch(&self.#request, &path, body).await?;
                #selection
                #result
            }
        })
    }

    /// Field declaring a connector, on an object or a root operation type
    fn connector_field(&self, connector: &Connector) -> Option<&'a Field> {
        self.model
            .object_type(&connector.parent)
            .and_then(|object| object.field(&connector.field))
            .or_else(|| {
                self.model
                    .operation_fields
                    .iter()
                    .find(|f| f.parent == connector.parent && f.name == connector.field)
            })
    }

    fn settings_tokens(&self, has_db: bool) -> TokenStream {
        let vars = config_vars(&self.model.sources, &self.model.connectors);
        let getters = vars.iter().map(|var| {
            let name = field_ident(var);
            quote! { fn #name(&self) -> String; }
        });
        let sessions = if has_db {
            quote! {
                /// Read write connection
                fn session(&self) -> &DatabaseConnection;

                /// Optional read replica
                fn readonly_session(&self) -> Option<&DatabaseConnection> {
                    None
                }
            }
        } else {
            quote! {}
        };

        quote! {
            /// Configuration the datasources are built from
            pub trait Settings: Send + Sync {
                #(#getters)*
                #sessions
            }
        }
    }

    fn context_tokens(&self, db_types: &[&ObjectType], groups: &[HttpGroup<'_>]) -> TokenStream {
        let mut fields = Vec::new();
        let mut inits = Vec::new();

        // Repositories are addressed by the pluralized type name
        for object in db_types {
            let attr = field_ident(&object.context_attr());
            let datasource = ident(&object.datasource_name());
            fields.push(quote! { pub #attr: #datasource });
            inits.push(quote! { #attr: #datasource::new(db.clone(), readonly.clone()) });
        }

        for group in groups {
            let attr = field_ident(&group.context_attr);
            let datasource = ident(&group.struct_name);
            fields.push(quote! { pub #attr: #datasource });
            inits.push(quote! { #attr: #datasource::new(settings.as_ref(), request_headers)? });
        }

        let connections = if db_types.is_empty() {
            quote! {}
        } else {
            quote! {
                let db = settings.session().clone();
                let readonly = settings.readonly_session().cloned();
            }
        };
        let headers_param = if groups.is_empty() {
            quote! {}
        } else {
            quote! { , request_headers: &HeaderMap }
        };

        quote! {
            /// Datasources for one request
            pub struct Context<S: Settings> {
                pub settings: Arc<S>,
                #(#fields),*
            }

            impl<S: Settings> Context<S> {
                pub fn new(settings: Arc<S> #headers_param) -> Result<Self, DatasourceError> {
                    #connections
                    Ok(Self {
                        #(#inits,)*
                        settings,
                    })
                }
            }
        }
    }
}

/// Expression building a string with `$config.name` replaced by settings values
fn config_expr(text: &str) -> TokenStream {
    let names: Vec<&str> = CONFIG_REF
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if names.is_empty() {
        return quote! { String::from(#text) };
    }
    let escaped = text.replace('{', "{{").replace('}', "}}");
    let template = CONFIG_REF.replace_all(&escaped, "{}").into_owned();
    let getters = names.iter().map(|name| {
        let name = field_ident(name);
        quote! { settings.#name() }
    });
    quote! { format!(#template #(, #getters)*) }
}

/// Header map expression for a list of header mappings
fn headers_tokens(headers: &[HttpHeader]) -> TokenStream {
    if headers.is_empty() {
        return quote! { HeaderMap::new() };
    }
    let inserts = headers.iter().map(|header| {
        let name = header.name.to_lowercase();
        match (&header.from, &header.value) {
            (Some(from), _) => {
                let from = from.to_lowercase();
                quote! { copy_header(&mut headers, #name, request_headers, #from)?; }
            }
            (None, Some(value)) => {
                let value = config_expr(value);
                quote! { insert_header(&mut headers, #name, #value)?; }
            }
            (None, None) => quote! {},
        }
    });
    quote! {
        {
            let mut headers = HeaderMap::new();
            #(#inserts)*
            headers
        }
    }
}

/// Expression replacing `{$args.name}` placeholders in `template`
fn args_bindings(
    field: &Field,
    template: &str,
    owner: &str,
    source: TokenStream,
) -> Result<TokenStream, GeneratorError> {
    let mut bindings = BTreeMap::new();
    for caps in ARGS_REF.captures_iter(template) {
        let (Some(placeholder), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let arg = field
            .args
            .iter()
            .find(|a| a.name == name.as_str())
            .ok_or_else(|| {
                GeneratorError::Connect(format!(
                    "{}: '{}' references unknown argument '{}'",
                    owner,
                    placeholder.as_str(),
                    name.as_str()
                ))
            })?;
        let arg_ident = field_ident(&arg.name);
        let value = if arg.field_type.as_ref().is_some_and(|t| t.required) {
            quote! { &#arg_ident.to_string() }
        } else {
            quote! { &#arg_ident.as_ref().map(|value| value.to_string()).unwrap_or_default() }
        };
        bindings.insert(placeholder.as_str().to_string(), value);
    }

    if bindings.is_empty() {
        return Ok(quote! { #source.clone() });
    }
    let replacements = bindings
        .iter()
        .map(|(placeholder, value)| quote! { .replace(#placeholder, #value) });
    Ok(quote! { #source #(#replacements)* })
}

/// Memoizing repository support shared by every `{Name}Datasource`
fn repository_tokens() -> TokenStream {
    quote! {
        use sea_orm::sea_query::Expr;
        use sea_orm::{
            ActiveModelBehavior, ActiveModelTrait, Condition, ConnectionTrait, DatabaseConnection,
            DbErr, EntityTrait, IntoActiveModel, PrimaryKeyTrait, QueryFilter, QuerySelect,
            QueryTrait, Select,
        };

        /// Rows returned by a list fetch without an explicit limit
        pub const DEFAULT_LIMIT: u64 = 100;

        /// Offset of a list fetch without an explicit offset
        pub const DEFAULT_OFFSET: u64 = 0;

        type Pending<T> = Shared<BoxFuture<'static, Result<T, Arc<DbErr>>>>;

        /// Entity access with request memoization
        ///
        /// Concurrent fetches of the same statement share one query. Writes
        /// clear every memoized result.
        pub struct DatabaseRepository<E: EntityTrait, G> {
            db: DatabaseConnection,
            readonly: Option<DatabaseConnection>,
            models: Mutex<HashMap<String, Pending<Option<E::Model>>>>,
            lists: Mutex<HashMap<String, Pending<Vec<E::Model>>>>,
            graph: PhantomData<fn() -> G>,
        }

        impl<E, G> DatabaseRepository<E, G>
        where
            E: EntityTrait,
            E::Model: Sync,
            G: TryFrom<E::Model, Error = DatasourceError>,
        {
            pub fn new(db: DatabaseConnection, readonly: Option<DatabaseConnection>) -> Self {
                Self {
                    db,
                    readonly,
                    models: Mutex::new(HashMap::new()),
                    lists: Mutex::new(HashMap::new()),
                    graph: PhantomData,
                }
            }

            fn reader(&self) -> &DatabaseConnection {
                self.readonly.as_ref().unwrap_or(&self.db)
            }

            fn cache_key(&self, select: &Select<E>) -> String {
                select.build(self.reader().get_database_backend()).to_string()
            }

            async fn fetch_one(&self, select: Select<E>) -> Result<Option<E::Model>, DatasourceError> {
                let key = self.cache_key(&select);
                let pending = {
                    let mut cache = self.models.lock().unwrap_or_else(PoisonError::into_inner);
                    cache
                        .entry(key)
                        .or_insert_with(|| {
                            let db = self.reader().clone();
                            async move { select.one(&db).await.map_err(Arc::new) }
                                .boxed()
                                .shared()
                        })
                        .clone()
                };
                Ok(pending.await?)
            }

            async fn fetch_all(&self, select: Select<E>) -> Result<Vec<E::Model>, DatasourceError> {
                let key = self.cache_key(&select);
                let pending = {
                    let mut cache = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
                    cache
                        .entry(key)
                        .or_insert_with(|| {
                            let db = self.reader().clone();
                            async move { select.all(&db).await.map_err(Arc::new) }
                                .boxed()
                                .shared()
                        })
                        .clone()
                };
                Ok(pending.await?)
            }

            /// Point lookup by primary key
            pub async fn get_by_pk<K>(&self, key: K) -> Result<Option<G>, DatasourceError>
            where
                K: Into<<E::PrimaryKey as PrimaryKeyTrait>::ValueType>,
            {
                self.fetch_one(E::find_by_id(key)).await?.map(G::try_from).transpose()
            }

            /// First row matching `condition`
            pub async fn get_model(&self, condition: Condition) -> Result<Option<G>, DatasourceError> {
                self.fetch_one(E::find().filter(condition)).await?.map(G::try_from).transpose()
            }

            /// Rows matching `condition`, `DEFAULT_LIMIT` and `DEFAULT_OFFSET` when unset
            pub async fn get_models(
                &self,
                condition: Condition,
                limit: Option<u64>,
                offset: Option<u64>,
            ) -> Result<Vec<G>, DatasourceError> {
                let select = E::find()
                    .filter(condition)
                    .limit(limit.unwrap_or(DEFAULT_LIMIT))
                    .offset(offset.unwrap_or(DEFAULT_OFFSET));
                self.fetch_all(select).await?.into_iter().map(G::try_from).collect()
            }

            /// Rows matching `condition` with the default page
            pub async fn filter(&self, condition: Condition) -> Result<Vec<G>, DatasourceError> {
                self.get_models(condition, None, None).await
            }

            /// Insert a row
            pub async fn add<A>(&self, model: A) -> Result<G, DatasourceError>
            where
                A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
                E::Model: IntoActiveModel<A>,
            {
                let model = model.insert(&self.db).await?;
                self.clear();
                G::try_from(model)
            }

            /// Update a row
            pub async fn update<A>(&self, model: A) -> Result<G, DatasourceError>
            where
                A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
                E::Model: IntoActiveModel<A>,
            {
                let model = model.update(&self.db).await?;
                self.clear();
                G::try_from(model)
            }

            /// Drop every memoized result
            pub fn clear(&self) {
                self.models.lock().unwrap_or_else(PoisonError::into_inner).clear();
                self.lists.lock().unwrap_or_else(PoisonError::into_inner).clear();
            }
        }
    }
}

/// HTTP support shared by every generated HTTP datasource
fn http_tokens() -> TokenStream {
    quote! {
        use reqwest::Method;
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        type PendingResponse = Shared<BoxFuture<'static, Result<serde_json::Value, Arc<reqwest::Error>>>>;

        /// Method, path template and headers of one connector
        pub struct ConnectRequest {
            pub method: Method,
            pub path: String,
            pub headers: HeaderMap,
        }

        impl ConnectRequest {
            pub fn new(method: Method, path: String, headers: HeaderMap) -> Self {
                Self { method, path, headers }
            }
        }

        /// JSON over HTTP with memoized `GET` requests
        ///
        /// Any other method clears the memoized responses.
        pub struct HttpDatasource {
            client: reqwest::Client,
            base_url: String,
            headers: HeaderMap,
            cache: Mutex<HashMap<String, PendingResponse>>,
        }

        impl HttpDatasource {
            pub fn new(base_url: String, headers: HeaderMap) -> Self {
                Self {
                    client: reqwest::Client::new(),
                    base_url,
                    headers,
                    cache: Mutex::new(HashMap::new()),
                }
            }

            pub fn url(&self, path: &str) -> String {
                format!("{}{}", self.base_url.trim_end_matches('/'), path)
            }

            pub async fn fetch(
                &self,
                request: &ConnectRequest,
                path: &str,
                body: Option<serde_json::Value>,
            ) -> Result<serde_json::Value, DatasourceError> {
                let url = self.url(path);
                let mut builder = self
                    .client
                    .request(request.method.clone(), &url)
                    .headers(self.headers.clone())
                    .headers(request.headers.clone());
                if let Some(body) = body {
                    builder = builder.json(&body);
                }

                if request.method != Method::GET {
                    self.clear();
                    let response = builder.send().await?.error_for_status()?;
                    return Ok(response.json().await?);
                }

                let pending = {
                    let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
                    cache
                        .entry(url)
                        .or_insert_with(|| {
                            async move {
                                let response = builder.send().await?.error_for_status()?;
                                response.json::<serde_json::Value>().await
                            }
                            .map(|result| result.map_err(Arc::new))
                            .boxed()
                            .shared()
                        })
                        .clone()
                };
                Ok(pending.await?)
            }

            /// Drop every memoized response
            pub fn clear(&self) {
                self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
            }
        }

        fn insert_header(headers: &mut HeaderMap, name: &str, value: String) -> Result<(), DatasourceError> {
            headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(&value)?);
            Ok(())
        }

        fn copy_header(
            headers: &mut HeaderMap,
            name: &str,
            incoming: &HeaderMap,
            from: &str,
        ) -> Result<(), DatasourceError> {
            if let Some(value) = incoming.get(from) {
                headers.insert(HeaderName::from_bytes(name.as_bytes())?, value.clone());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{analyze, resolve_relations};
    use crate::sdl::{build_and_extend_schema, extract_metadata};
    use indoc::indoc;

    const SCHEMA: &str = indoc! {r#"
        extend schema
            @source(
                name: "product_api",
                http: {
                    baseURL: "$config.products_url",
                    headers: [
                        {name: "Authorization", value: "Bearer $config.api_token"},
                        {name: "X-Trace", from: "x-trace"}
                    ]
                }
            )

        enum Role { ADMIN MEMBER }

        type User @db_sql {
            id: ID! @field_meta(primary_key: true)
            name: String
            role: Role!
            tags: [String]
            posts(limit: Int = 10): [Post] @field_meta(where: "author_id = :id AND rank < :limit")
            latest: Post @field_meta(raw_sql: "author_id = :id ORDER BY created DESC")
        }

        type Post @db_sql {
            id: ID! @field_meta(primary_key: true)
            author_id: ID @field_meta(foreign_key: "users.id")
            author: User
        }

        type Product {
            id: ID!
            name: String
        }

        type Query {
            products(category: String): [Product]
                @connect(
                    source: "product_api",
                    http: {GET: "/products?category={$args.category}"},
                    selection: "$.products[] { id name }"
                )
            weather(city: String!): String
                @connect(http: {GET: "https://weather.example/{$args.city}"})
        }
    "#};

    fn generate_with(sdl: &str, validating: bool) -> Result<String, GeneratorError> {
        let (schema, documents) = build_and_extend_schema(&[sdl])?;
        let metadata = extract_metadata(&documents);
        let model = analyze(&schema, &metadata, &Default::default())?;
        let relations = resolve_relations(&model)?;
        ContextGenerator::new(&model, &relations, validating).generate()
    }

    fn generate(sdl: &str) -> String {
        generate_with(sdl, false).unwrap()
    }

    #[test]
    fn test_repository_support() {
        let code = generate(SCHEMA);
        assert!(code.contains("pub const DEFAULT_LIMIT: u64 = 100;"));
        assert!(code.contains("pub const DEFAULT_OFFSET: u64 = 0;"));
        assert!(code.contains("pub struct DatabaseRepository<E: EntityTrait, G> {"));
        assert!(code.contains("pub async fn get_by_pk<K>"));
        assert!(code.contains("pub async fn filter(&self, condition: Condition)"));
        assert!(code.contains("select.build(self.reader().get_database_backend()).to_string()"));
        assert!(code.contains(".shared()"));
        // Writes clear the memoized results
        assert!(code.contains("let model = model.insert(&self.db).await?;\n        self.clear();"));
    }

    #[test]
    fn test_datasources_per_db_type() {
        let code = generate(SCHEMA);
        assert!(code.contains("pub struct UserDatasource(DatabaseRepository<sql::user::Entity, UserType>);"));
        assert!(code.contains("pub struct PostDatasource(DatabaseRepository<sql::post::Entity, PostType>);"));
        assert!(code.contains("impl Deref for UserDatasource {"));
        assert!(!code.contains("ProductDatasource"));
    }

    #[test]
    fn test_predicate_relation_methods() {
        let code = generate(SCHEMA);
        assert!(code.contains("pub async fn user_posts("));
        assert!(code.contains("\"author_id = $1 AND rank < $2\""));
        assert!(code.contains("sea_orm::Value::from(id)"));
        assert!(code.contains("sea_orm::Value::from(limit)"));
        assert!(code.contains("self.get_models(condition, None, None).await"));

        assert!(code.contains("pub async fn user_latest("));
        assert!(code.contains("\"author_id = $1 ORDER BY created DESC\""));
        assert!(code.contains("self.get_model(condition).await"));
    }

    #[test]
    fn test_primary_key_relation_method() {
        let code = generate(SCHEMA);
        assert!(code.contains("pub async fn post_author("));
        assert!(code.contains("author_id: Option<String>"));
        assert!(code.contains("Some(key) => self.get_by_pk(key).await,"));
    }

    #[test]
    fn test_row_conversion() {
        let code = generate(SCHEMA);
        assert!(code.contains("impl TryFrom<sql::user::Model> for UserType {"));
        assert!(code.contains("type Error = DatasourceError;"));
        assert!(code.contains("id: model.id,"));
        // Undecodable values are errors, never silent defaults
        assert!(code.contains("role: model.role.parse()?,"));
        assert!(code.contains("tags: model.tags.map(serde_json::from_value).transpose()?,"));
        assert!(!code.contains("parse().unwrap_or_default()"));
        assert!(!code.contains("from_value(value).ok()"));
        assert!(code.contains("G: TryFrom<E::Model, Error = DatasourceError>,"));
        assert!(code.contains(".map(G::try_from).transpose()"));
    }

    #[test]
    fn test_row_conversion_with_nullability_override() {
        let code = generate(indoc! {r#"
            enum Role { ADMIN MEMBER }

            type User @db_sql {
                id: ID! @field_meta(primary_key: true)
                name: String @field_meta(nullable: false)
                role: Role @field_meta(nullable: false)
                labels: [String] @field_meta(nullable: false)
            }
        "#});
        assert!(code.contains("name: Some(model.name),"));
        assert!(code.contains("role: Some(model.role.parse()?),"));
        assert!(code.contains("labels: Some(serde_json::from_value(model.labels)?),"));
    }

    #[test]
    fn test_http_datasources() {
        let code = generate(SCHEMA);
        assert!(code.contains("pub struct ProductApiHTTPDatasource {"));
        assert!(code.contains("pub struct QueryWeatherHTTPDatasource {"));
        assert!(code.contains("format!(\"{}\", settings.products_url())"));
        assert!(code.contains("format!(\"Bearer {}\", settings.api_token())"));
        assert!(code.contains("copy_header(&mut headers, \"x-trace\", request_headers, \"x-trace\")?;"));
        assert!(code.contains("pub async fn query_products("));
        assert!(code.contains(".replace("));
        assert!(code.contains("\"{$args.category}\""));
        assert!(code.contains("cannula::json_selection::apply_selection("));
        assert!(code.contains("\"$.products[] { id name }\""));
        assert!(code.contains("self.query_weather.path.replace(\"{$args.city}\", &city.to_string())"));
        assert!(code.contains("-> Result<serde_json::Value, DatasourceError>"));
    }

    #[test]
    fn test_validating_connectors_decode_declared_types() {
        let code = generate_with(SCHEMA, true).unwrap();
        assert!(code.contains("Result<Option<Vec<Option<ProductType>>>, DatasourceError>"));
        assert!(code.contains("Ok(serde_json::from_value(response)?)"));
    }

    #[test]
    fn test_settings_and_context() {
        let code = generate(SCHEMA);
        assert!(code.contains("pub trait Settings: Send + Sync {"));
        let api = code.find("fn api_token(&self) -> String;").unwrap();
        let products = code.find("fn products_url(&self) -> String;").unwrap();
        assert!(api < products);
        assert!(code.contains("fn session(&self) -> &DatabaseConnection;"));
        assert!(code.contains("pub struct Context<S: Settings> {"));
        assert!(code.contains("pub users: UserDatasource,"));
        assert!(code.contains("pub posts: PostDatasource,"));
        assert!(code.contains("pub product_api: ProductApiHTTPDatasource,"));
        assert!(code.contains("pub query_weather: QueryWeatherHTTPDatasource,"));
    }

    #[test]
    fn test_unknown_path_argument() {
        let err = generate_with(
            r#"type Query { item: String @connect(http: {GET: "/items/{$args.id}"}) }"#,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, GeneratorError::Connect(_)));
        assert!(err.to_string().contains("unknown argument 'id'"));
    }

    #[test]
    fn test_without_db_types_or_sources() {
        let code = generate("type Query { hello: String }");
        assert!(!code.contains("DatabaseRepository"));
        assert!(!code.contains("HttpDatasource"));
        assert!(code.contains("pub fn new(settings: Arc<S>) -> Result<Self, DatasourceError>"));
    }

    #[test]
    fn test_deterministic_output() {
        assert_eq!(generate(SCHEMA), generate(SCHEMA));
    }
}

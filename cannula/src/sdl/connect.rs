//! HTTP sources and connectors
//!
//! `extend schema @source(...)` declares a remote HTTP API; `@connect(...)`
//! on a field binds that field to one request against a source.

use std::collections::BTreeSet;

use async_graphql_parser::types::TypeKind;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::Schema;
use super::metadata::directive;
use crate::error::GeneratorError;
use crate::ir::{Connector, HttpHeader, HttpMethod, HttpSource, Literal};

/// Schema level directive declaring an HTTP source
pub const SOURCE: &str = "source";

/// Field level directive binding a field to an HTTP request
pub const CONNECT: &str = "connect";

static CONFIG_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$config\.([A-Za-z_][A-Za-z0-9_]*)").expect("config variable pattern is valid")
});

/// Collect `@source` declarations, sorted by name
pub fn extract_sources(schema: &Schema) -> Result<Vec<HttpSource>, GeneratorError> {
    let mut sources = Vec::new();
    for usage in &schema.schema_directives {
        let usage = directive(&usage.node);
        if usage.name != SOURCE {
            continue;
        }
        let name = usage
            .arg("name")
            .and_then(Literal::as_str)
            .ok_or_else(|| GeneratorError::Connect("@source directive requires a 'name'".to_string()))?;

        let http = usage.arg("http");
        let base_url = http
            .and_then(|h| h.get("baseURL"))
            .and_then(Literal::as_str)
            .unwrap_or_default()
            .to_string();
        let headers = http.and_then(|h| h.get("headers")).map(headers).unwrap_or_default();

        if sources.iter().any(|s: &HttpSource| s.name == name) {
            return Err(GeneratorError::Connect(format!(
                "@source '{}' is declared more than once",
                name
            )));
        }
        sources.push(HttpSource {
            name: name.to_string(),
            base_url,
            headers,
        });
    }
    sources.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sources)
}

/// Collect `@connect` usages on object fields, sorted by type then field
pub fn extract_connectors(
    schema: &Schema,
    sources: &[HttpSource],
) -> Result<Vec<Connector>, GeneratorError> {
    let mut connectors = Vec::new();
    for (type_name, definition) in &schema.types {
        let TypeKind::Object(object) = &definition.kind else {
            continue;
        };
        for field in &object.fields {
            let field = &field.node;
            for usage in &field.directives {
                let usage = directive(&usage.node);
                if usage.name != CONNECT {
                    continue;
                }
                let owner = format!("Field<{}.{}>", type_name, field.name.node);
                let connector = parse_connector(
                    type_name,
                    field.name.node.as_str(),
                    &owner,
                    &usage,
                    sources,
                )?;
                debug!(field = %owner, method = connector.method.as_str(), "found connector");
                connectors.push(connector);
            }
        }
    }
    connectors.sort_by(|a, b| (&a.parent, &a.field).cmp(&(&b.parent, &b.field)));
    Ok(connectors)
}

fn parse_connector(
    parent: &str,
    field: &str,
    owner: &str,
    usage: &crate::ir::Directive,
    sources: &[HttpSource],
) -> Result<Connector, GeneratorError> {
    let http = usage.arg("http");

    let methods: Vec<(HttpMethod, &str)> = HttpMethod::ALL
        .iter()
        .filter_map(|method| {
            http.and_then(|h| h.get(method.as_str()))
                .and_then(Literal::as_str)
                .map(|path| (*method, path))
        })
        .collect();

    let (method, path) = match methods.as_slice() {
        [] => {
            return Err(GeneratorError::Connect(format!(
                "{}: @connect directive must provide one of 'GET,POST,PUT,PATCH,DELETE'",
                owner
            )));
        }
        [single] => *single,
        many => {
            let names: Vec<String> = many
                .iter()
                .map(|(m, _)| format!("'{}'", m.as_str()))
                .collect();
            return Err(GeneratorError::Connect(format!(
                "{}: @connect directive can only use one method you set [{}]",
                owner,
                names.join(", ")
            )));
        }
    };

    let source = usage.arg("source").and_then(Literal::as_str).map(str::to_string);
    if let Some(source) = &source {
        if !sources.iter().any(|s| &s.name == source) {
            return Err(GeneratorError::Connect(format!(
                "{}: @connect references unknown source '{}'",
                owner, source
            )));
        }
    }

    Ok(Connector {
        parent: parent.to_string(),
        field: field.to_string(),
        source,
        method,
        path: path.to_string(),
        headers: http.and_then(|h| h.get("headers")).map(headers).unwrap_or_default(),
        body: http
            .and_then(|h| h.get("body"))
            .and_then(Literal::as_str)
            .map(str::to_string),
        selection: usage.arg("selection").and_then(Literal::as_str).map(str::to_string),
        entity: usage.arg("entity").and_then(Literal::as_bool).unwrap_or(false),
    })
}

fn headers(value: &Literal) -> Vec<HttpHeader> {
    let Literal::List(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name").and_then(Literal::as_str)?;
            Some(HttpHeader {
                name: name.to_string(),
                from: item.get("from").and_then(Literal::as_str).map(str::to_string),
                value: item.get("value").and_then(Literal::as_str).map(str::to_string),
            })
        })
        .collect()
}

/// `$config.name` references in a template string
pub fn config_refs(text: &str) -> impl Iterator<Item = &str> {
    CONFIG_VAR
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// Every config variable referenced by sources and connectors, sorted and unique
pub fn config_vars(sources: &[HttpSource], connectors: &[Connector]) -> Vec<String> {
    let mut vars = BTreeSet::new();
    let header_values = |headers: &[HttpHeader]| {
        headers
            .iter()
            .filter_map(|h| h.value.clone())
            .collect::<Vec<_>>()
    };
    for source in sources {
        vars.extend(config_refs(&source.base_url).map(str::to_string));
        for value in header_values(&source.headers) {
            vars.extend(config_refs(&value).map(str::to_string));
        }
    }
    for connector in connectors {
        vars.extend(config_refs(&connector.path).map(str::to_string));
        for value in header_values(&connector.headers) {
            vars.extend(config_refs(&value).map(str::to_string));
        }
    }
    vars.into_iter().collect()
}

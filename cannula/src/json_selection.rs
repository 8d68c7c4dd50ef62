//! JSON selection projections for HTTP connectors
//!
//! A selection such as `$.data.products[] { id name }` names a dotted root
//! path into the response, an optional array marker and the fields to keep.
//! Generated connector methods call [`apply_selection`] on every response.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static ROOT_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$?\.?([^\s{]+)").expect("root path pattern is valid"));
static FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("field pattern is valid"));

/// A parsed selection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonSelection {
    /// Dotted path to the selected value, empty for the response itself
    pub root: String,
    /// Fields to project, empty keeps the value untouched
    pub fields: Vec<String>,
    /// Root ends in `[]` or `[*]`
    pub is_array: bool,
}

impl JsonSelection {
    /// Parse a selection string
    ///
    /// ```
    /// use cannula::json_selection::JsonSelection;
    ///
    /// let selection = JsonSelection::parse("$.data.products[] { id name }");
    /// assert_eq!(selection.root, "data.products");
    /// assert_eq!(selection.fields, vec!["id", "name"]);
    /// assert!(selection.is_array);
    /// ```
    pub fn parse(selection: &str) -> Self {
        let selection = selection.trim();
        let mut root = ROOT_PATH
            .captures(selection)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let is_array = root.contains("[]") || root.contains("[*]");
        if is_array {
            root = root.replace("[]", "").replace("[*]", "");
        }

        let fields = match selection.find('{') {
            Some(start) => {
                let body = selection[start..].trim_matches(|c| c == '{' || c == '}');
                FIELD
                    .find_iter(body)
                    .map(|m| m.as_str().to_string())
                    .collect()
            }
            None => Vec::new(),
        };

        JsonSelection {
            root,
            fields,
            is_array,
        }
    }

    /// Project a response through this selection
    pub fn apply(&self, data: &Value) -> Value {
        let selected = value_at_path(data, &self.root);

        if self.fields.is_empty() {
            return selected.cloned().unwrap_or(Value::Null);
        }

        if self.is_array {
            let items = match selected {
                None | Some(Value::Null) => return Value::Array(Vec::new()),
                Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
                Some(other) => vec![other],
            };
            return Value::Array(
                items
                    .into_iter()
                    .filter_map(Value::as_object)
                    .map(|item| self.project(Some(item)))
                    .collect(),
            );
        }

        self.project(selected.and_then(Value::as_object))
    }

    fn project(&self, item: Option<&Map<String, Value>>) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|field| {
                    let value = item
                        .and_then(|item| item.get(field))
                        .cloned()
                        .unwrap_or(Value::Null);
                    (field.clone(), value)
                })
                .collect(),
        )
    }
}

/// Walk a dotted path through objects and list indices
///
/// A missing key, an out of range index or a `null` along the way ends the
/// walk with `None`.
pub fn value_at_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }
    let mut current = data;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

/// Parse `selection` and project `data` through it
///
/// ```
/// use cannula::json_selection::apply_selection;
/// use serde_json::json;
///
/// let data = json!({"products": [{"id": 1, "name": "Lamp", "desc": "..."}]});
/// assert_eq!(
///     apply_selection(&data, "$.products[] { id name }"),
///     json!([{"id": 1, "name": "Lamp"}])
/// );
/// ```
pub fn apply_selection(data: &Value, selection: &str) -> Value {
    JsonSelection::parse(selection).apply(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            JsonSelection::parse("$.products { id name }"),
            JsonSelection {
                root: "products".into(),
                fields: vec!["id".into(), "name".into()],
                is_array: false,
            }
        );
        assert_eq!(JsonSelection::parse("products { id }").root, "products");
        assert_eq!(JsonSelection::parse("{ id name }").root, "");
        let star = JsonSelection::parse("$.data.items[*] { id }");
        assert_eq!(star.root, "data.items");
        assert!(star.is_array);
        assert!(JsonSelection::parse("$.data").fields.is_empty());
    }

    #[test]
    fn test_no_fields_returns_raw_data() {
        let data = json!({"data": {"count": 3}});
        assert_eq!(apply_selection(&data, "$.data"), json!({"count": 3}));
        assert_eq!(apply_selection(&data, "$.missing"), Value::Null);
    }

    #[test]
    fn test_array_selection() {
        let data = json!({
            "products": [
                {"id": 1, "name": "Lamp", "price": 10},
                "not an object",
                {"id": 2}
            ]
        });
        assert_eq!(
            apply_selection(&data, "$.products[] { id name }"),
            json!([
                {"id": 1, "name": "Lamp"},
                {"id": 2, "name": null}
            ])
        );
    }

    #[test]
    fn test_array_selection_wraps_and_defaults() {
        let single = json!({"product": {"id": 7, "name": "Chair"}});
        assert_eq!(
            apply_selection(&single, "product[] { id }"),
            json!([{"id": 7}])
        );
        let null = json!({"product": null});
        assert_eq!(apply_selection(&null, "product[] { id }"), json!([]));
    }

    #[test]
    fn test_single_selection() {
        let data = json!({"user": {"id": "u1", "name": "Ann", "email": "a@x"}});
        assert_eq!(
            apply_selection(&data, "$.user { id name }"),
            json!({"id": "u1", "name": "Ann"})
        );
        let list = json!({"user": [{"id": "u1"}]});
        assert_eq!(
            apply_selection(&list, "$.user { id name }"),
            json!({"id": null, "name": null})
        );
    }

    #[test]
    fn test_path_with_list_index() {
        let data = json!({"data": {"items": [{"id": 1}, {"id": 2}]}});
        assert_eq!(
            apply_selection(&data, "$.data.items.1 { id }"),
            json!({"id": 2})
        );
        assert_eq!(value_at_path(&data, "data.items.9"), None);
    }
}

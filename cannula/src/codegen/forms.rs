//! Mutation form rendering
//!
//! A form has one control per operation variable. Input object variables
//! become fieldsets whose controls carry dotted names (`input.address.city`).

use async_graphql_parser::Positioned;
use async_graphql_parser::types::{BaseType, VariableDefinition};
use tracing::debug;

use super::templates::{Html, escape};
use crate::ir::{Field, ObjectType, SchemaModel};
use crate::naming::field_label;
use crate::sdl::named_type;

/// HTML input type for a scalar name, checked before name patterns
const SCALAR_INPUTS: &[(&str, &str)] = &[
    ("int", "number"),
    ("float", "number"),
    ("string", "text"),
    ("boolean", "checkbox"),
    ("bool", "checkbox"),
    ("id", "text"),
    ("datetime", "datetime-local"),
    ("date", "date"),
    ("time", "time"),
    ("email", "email"),
    ("url", "url"),
    ("uuid", "text"),
    ("json", "textarea"),
    ("bigint", "number"),
    ("decimal", "number"),
    ("phone", "tel"),
    ("color", "color"),
    ("upload", "file"),
    ("longtext", "textarea"),
    ("richtext", "textarea"),
];

/// HTML input type for a field name fragment
const NAME_PATTERNS: &[(&str, &str)] = &[
    ("email", "email"),
    ("url", "url"),
    ("link", "url"),
    ("website", "url"),
    ("phone", "tel"),
    ("telephone", "tel"),
    ("mobile", "tel"),
    ("color", "color"),
    ("date", "date"),
    ("time", "time"),
    ("content", "textarea"),
    ("description", "textarea"),
    ("bio", "textarea"),
    ("about", "textarea"),
    ("notes", "textarea"),
];

/// One form control
#[derive(Debug, Clone, PartialEq)]
pub struct FormControl<'a> {
    /// Dotted form field name
    pub name: String,
    pub label: String,
    pub input_type: &'static str,
    pub required: bool,
    pub help: Option<&'a str>,
    /// Enum values offered by a select
    pub options: Vec<&'a str>,
}

impl FormControl<'_> {
    /// Element id, the dotted name with `_` separators
    pub fn id(&self) -> String {
        self.name.replace('.', "_")
    }
}

/// Pick an HTML input type
///
/// A password hint wins, then the scalar type, then the field name, then a
/// select hint in the description.
pub fn html_input_type(name: &str, graphql_name: &str, description: Option<&str>) -> &'static str {
    let name = name.to_lowercase();
    let scalar = graphql_name.to_lowercase();
    let description = description.unwrap_or_default().to_lowercase();

    if name.contains("password") || description.contains("password") {
        return "password";
    }
    if let Some((_, input)) = SCALAR_INPUTS.iter().find(|(s, _)| *s == scalar) {
        return *input;
    }
    if let Some((_, input)) = NAME_PATTERNS.iter().find(|(p, _)| name.contains(*p)) {
        return *input;
    }
    if ["select", "enum", "options"]
        .iter()
        .any(|hint| description.contains(hint))
    {
        return "select";
    }
    "text"
}

/// Renders the `{name}_form.html` template of a mutation
pub struct FormRenderer<'a> {
    model: &'a SchemaModel,
}

impl<'a> FormRenderer<'a> {
    pub fn new(model: &'a SchemaModel) -> Self {
        FormRenderer { model }
    }

    pub fn render(&self, operation: &str, variables: &[Positioned<VariableDefinition>]) -> String {
        let mut html = Html::default();
        html.open(format!(
            r##"<form id="{}-form" class="{} operation-form" hx-post="" hx-target="#{}-result">"##,
            operation, operation, operation
        ));

        for variable in variables {
            let variable = &variable.node;
            let name = variable.name.node.as_str();
            let type_name = named_type(&variable.var_type.node);
            let required = !variable.var_type.node.nullable;

            match self.model.input_type(type_name) {
                Some(input) => {
                    html.open(format!(r#"<fieldset class="{}">"#, escape(name)));
                    html.line(format!("<legend>{}</legend>", escape(&field_label(name))));
                    self.input_fields(&mut html, input, name, &mut vec![input.name.as_str()]);
                    html.close("</fieldset>");
                }
                None => {
                    if matches!(variable.var_type.node.base, BaseType::List(_)) {
                        debug!(variable = name, "list variable rendered as a text control");
                    }
                    let control = self.control(name.to_string(), name, type_name, None, required);
                    render_control(&mut html, &control);
                }
            }
        }

        html.line(r#"<button type="submit">Submit</button>"#);
        html.close("</form>");
        html.finish()
    }

    fn input_fields(
        &self,
        html: &mut Html,
        input: &'a ObjectType,
        prefix: &str,
        stack: &mut Vec<&'a str>,
    ) {
        for field in &input.fields {
            let path = format!("{}.{}", prefix, field.name);
            let nested = self.model.input_type(&field.field_type.graphql_name);
            match nested {
                Some(nested) if !stack.contains(&nested.name.as_str()) => {
                    html.open(format!(r#"<fieldset class="{}">"#, escape(&path)));
                    html.line(format!("<legend>{}</legend>", escape(&field_label(&field.name))));
                    stack.push(nested.name.as_str());
                    self.input_fields(html, nested, &path, stack);
                    stack.pop();
                    html.close("</fieldset>");
                }
                // Recursive inputs stop at the first repetition
                Some(nested) => {
                    debug!(input = %nested.name, field = %field, "skipping recursive input");
                }
                None => {
                    let control = self.field_control(path, field);
                    render_control(html, &control);
                }
            }
        }
    }

    fn field_control(&self, path: String, field: &'a Field) -> FormControl<'a> {
        self.control(
            path,
            &field.name,
            &field.field_type.graphql_name,
            field.description.as_deref(),
            field.field_type.required,
        )
    }

    fn control(
        &self,
        path: String,
        name: &str,
        graphql_name: &str,
        description: Option<&'a str>,
        required: bool,
    ) -> FormControl<'a> {
        let enum_type = self.model.enum_type(graphql_name);
        let input_type = match enum_type {
            Some(_) if !name.to_lowercase().contains("password") => "select",
            _ => html_input_type(name, graphql_name, description),
        };
        let options = enum_type
            .map(|e| e.values.iter().map(|v| v.name.as_str()).collect())
            .unwrap_or_default();

        FormControl {
            label: field_label(name),
            name: path,
            input_type,
            required,
            help: description,
            options,
        }
    }
}

fn render_control(html: &mut Html, control: &FormControl<'_>) {
    let id = control.id();
    let name = escape(&control.name);
    let required = if control.required { " required" } else { "" };

    html.open(format!(r#"<div class="form-field {}">"#, control.input_type));
    match control.input_type {
        "checkbox" => {
            html.line(format!(
                r#"<input type="checkbox" id="{}" name="{}" value="true"{}>"#,
                id, name, required
            ));
            html.line(format!(r#"<label for="{}">{}</label>"#, id, escape(&control.label)));
        }
        "textarea" => {
            html.line(format!(r#"<label for="{}">{}</label>"#, id, escape(&control.label)));
            html.line(format!(
                r#"<textarea id="{}" name="{}"{}></textarea>"#,
                id, name, required
            ));
        }
        "select" => {
            html.line(format!(r#"<label for="{}">{}</label>"#, id, escape(&control.label)));
            html.open(format!(r#"<select id="{}" name="{}"{}>"#, id, name, required));
            html.line(r#"<option value="">Select...</option>"#);
            for option in &control.options {
                html.line(format!(
                    r#"<option value="{}">{}</option>"#,
                    escape(option),
                    escape(&field_label(&option.to_lowercase()))
                ));
            }
            html.close("</select>");
        }
        "number" => {
            html.line(format!(r#"<label for="{}">{}</label>"#, id, escape(&control.label)));
            html.line(format!(
                r#"<input type="number" id="{}" name="{}" step="any"{}>"#,
                id, name, required
            ));
        }
        input_type => {
            html.line(format!(r#"<label for="{}">{}</label>"#, id, escape(&control.label)));
            html.line(format!(
                r#"<input type="{}" id="{}" name="{}"{}>"#,
                input_type, id, name, required
            ));
        }
    }
    if let Some(help) = control.help {
        html.line(format!(r#"<small class="help">{}</small>"#, escape(help)));
    }
    html.close("</div>");
}

//! Operation templates
//!
//! Every named operation in the operations document gets an HTML template
//! written in Jinja syntax: `{name}.html` for a query, `{name}_form.html` and
//! `{name}_result.html` for a mutation. Selections are flattened into
//! [`TemplateField`]s first; lists render as tables and single objects as
//! definition lists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_graphql_parser::{Positioned, parse_query};
use async_graphql_parser::types::{
    DocumentOperations, ExecutableDocument, FragmentDefinition, OperationDefinition,
    OperationType, Selection, SelectionSet,
};
use async_graphql_value::Name;
use tracing::{debug, warn};

use super::forms::FormRenderer;
use super::{GeneratedFile, WritePolicy};
use crate::error::GeneratorError;
use crate::ir::{Field, ObjectType, SchemaModel};
use crate::naming::field_label;

/// Scalars rendered inside a `<time>` element
const DATETIME_SCALARS: &[&str] = &["datetime", "date", "timestamp"];

/// Parse an operations document
pub fn parse_operations(source: &str) -> Result<ExecutableDocument, GeneratorError> {
    parse_query(source).map_err(|e| GeneratorError::Syntax {
        source_index: 0,
        message: e.to_string(),
    })
}

/// A selected field flattened for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateField {
    /// Response key, the alias when one is given
    pub name: String,
    /// Dotted path from the enclosing object or loop item
    pub path: String,
    pub label: String,
    /// GraphQL name of the leaf type, `String` when unknown
    pub type_name: String,
    pub is_list: bool,
    /// Fields of each item of a nested list
    pub nested_fields: Vec<TemplateField>,
}

impl TemplateField {
    fn new(key: &str, path: String, schema_field: Option<&Field>) -> Self {
        TemplateField {
            name: key.to_string(),
            label: field_label(key),
            type_name: schema_field
                .map(|f| f.field_type.graphql_name.clone())
                .unwrap_or_else(|| "String".to_string()),
            is_list: schema_field.is_some_and(|f| f.field_type.is_list),
            path,
            nested_fields: Vec::new(),
        }
    }

    /// CSS class derived from the path
    pub fn class_name(&self) -> String {
        format!("field {}", self.path)
    }

    /// Rendered inside a `<time>` element
    pub fn is_datetime(&self) -> bool {
        DATETIME_SCALARS.contains(&self.type_name.to_lowercase().as_str())
    }
}

/// Flattens selection sets against the type model
pub struct SelectionFlattener<'a> {
    model: &'a SchemaModel,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
}

impl<'a> SelectionFlattener<'a> {
    pub fn new(
        model: &'a SchemaModel,
        fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    ) -> Self {
        SelectionFlattener { model, fragments }
    }

    /// Flatten `selection_set` selected on `parent`
    ///
    /// Nested singular objects extend the dotted path; nested lists become
    /// one field carrying the fields of each item.
    pub fn flatten(
        &self,
        selection_set: &SelectionSet,
        prefix: &str,
        parent: &ObjectType,
    ) -> Vec<TemplateField> {
        let mut fields = Vec::new();
        for selection in &selection_set.items {
            match &selection.node {
                Selection::Field(field) => {
                    let field = &field.node;
                    let key = field
                        .alias
                        .as_ref()
                        .map(|a| a.node.as_str())
                        .unwrap_or_else(|| field.name.node.as_str());
                    let path = join_path(prefix, key);
                    let schema_field = parent.field(field.name.node.as_str());
                    let nested_type = schema_field
                        .filter(|_| !field.selection_set.node.items.is_empty())
                        .and_then(|f| self.composite_type(&f.field_type.graphql_name));

                    match (schema_field, nested_type) {
                        (Some(schema_field), Some(nested)) if schema_field.field_type.is_list => {
                            let mut list = TemplateField::new(key, path, Some(schema_field));
                            list.nested_fields =
                                self.flatten(&field.selection_set.node, "", nested);
                            fields.push(list);
                        }
                        (Some(_), Some(nested)) => {
                            fields.extend(self.flatten(&field.selection_set.node, &path, nested));
                        }
                        _ => fields.push(TemplateField::new(key, path, schema_field)),
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let name = &spread.node.fragment_name.node;
                    match self.fragments.get(name) {
                        Some(fragment)
                            if fragment.node.type_condition.node.on.node.as_str() == parent.name =>
                        {
                            fields.extend(self.flatten(
                                &fragment.node.selection_set.node,
                                prefix,
                                parent,
                            ));
                        }
                        Some(_) => debug!(fragment = %name, parent = %parent.name, "fragment does not apply"),
                        None => warn!(fragment = %name, "unknown fragment"),
                    }
                }
                Selection::InlineFragment(inline) => {
                    let applies = inline
                        .node
                        .type_condition
                        .as_ref()
                        .is_none_or(|condition| condition.node.on.node.as_str() == parent.name);
                    if applies {
                        fields.extend(self.flatten(&inline.node.selection_set.node, prefix, parent));
                    }
                }
            }
        }
        fields
    }

    /// Object or interface type by GraphQL name
    fn composite_type(&self, name: &str) -> Option<&'a ObjectType> {
        self.model
            .object_type(name)
            .or_else(|| self.model.interface_types.iter().find(|t| t.name == name))
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Indented line writer for HTML output
#[derive(Debug, Default)]
pub struct Html {
    out: String,
    depth: usize,
}

impl Html {
    /// Write one line at the current depth
    pub fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    /// Write a line and indent the following ones
    pub fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.depth += 1;
    }

    /// Dedent and write a line
    pub fn close(&mut self, text: impl AsRef<str>) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Escape text for HTML content and attribute values
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Generates templates for the operations of one document
pub struct TemplateGenerator<'a> {
    model: &'a SchemaModel,
    directory: PathBuf,
}

impl<'a> TemplateGenerator<'a> {
    pub fn new(model: &'a SchemaModel, directory: impl AsRef<Path>) -> Self {
        TemplateGenerator {
            model,
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// Render every named operation, sorted by name
    pub fn generate(&self, document: &ExecutableDocument) -> Vec<GeneratedFile> {
        let mut operations: Vec<(&str, &OperationDefinition)> = match &document.operations {
            DocumentOperations::Single(_) => {
                warn!("Skipping anonymous operation");
                Vec::new()
            }
            DocumentOperations::Multiple(operations) => operations
                .iter()
                .map(|(name, op)| (name.as_str(), &op.node))
                .collect(),
        };
        operations.sort_by_key(|(name, _)| *name);

        let flattener = SelectionFlattener::new(self.model, &document.fragments);
        let mut files = Vec::new();
        for (name, operation) in operations {
            match operation.ty {
                OperationType::Query => {
                    files.push(self.file(format!("{}.html", name), self.result(&flattener, name, operation)));
                }
                OperationType::Mutation => {
                    let form = FormRenderer::new(self.model).render(name, &operation.variable_definitions);
                    files.push(self.file(format!("{}_form.html", name), form));
                    files.push(self.file(
                        format!("{}_result.html", name),
                        self.result(&flattener, name, operation),
                    ));
                }
                OperationType::Subscription => {
                    debug!(operation = name, "no template for subscriptions");
                }
            }
        }
        files
    }

    fn file(&self, file_name: String, content: String) -> GeneratedFile {
        GeneratedFile {
            path: self.directory.join(file_name),
            content,
            policy: WritePolicy::SkipExisting,
        }
    }

    /// Result template for the top level selections of an operation
    fn result(&self, flattener: &SelectionFlattener<'_>, name: &str, operation: &OperationDefinition) -> String {
        let mut html = Html::default();
        html.open(format!(r#"<div class="{}" id="{}-result">"#, name, name));

        for selection in &operation.selection_set.node.items {
            let Selection::Field(field) = &selection.node else {
                continue;
            };
            let field = &field.node;
            let field_name = field.name.node.as_str();
            let key = field
                .alias
                .as_ref()
                .map(|a| a.node.as_str())
                .unwrap_or(field_name);
            let path = format!("data.{}", key);

            let Some(operation_field) = self.operation_field(operation.ty, field_name) else {
                warn!(operation = name, field = field_name, "unknown operation field");
                continue;
            };
            let object_type = self
                .model
                .object_type(&operation_field.field_type.graphql_name)
                .or_else(|| {
                    self.model
                        .interface_types
                        .iter()
                        .find(|t| t.name == operation_field.field_type.graphql_name)
                });

            match object_type {
                Some(object_type) if !field.selection_set.node.items.is_empty() => {
                    let fields = flattener.flatten(&field.selection_set.node, "", object_type);
                    if operation_field.field_type.is_list {
                        render_list(&mut html, key, &path, &fields);
                    } else {
                        render_object(&mut html, key, &path, &fields);
                    }
                }
                _ => {
                    let leaf = TemplateField::new(key, path.clone(), Some(operation_field));
                    html.open(format!(r#"<section class="result-value" id="{}">"#, key));
                    html.line(format!(
                        r#"<p class="{}">{}</p>"#,
                        leaf.class_name(),
                        value_markup(&leaf, &path)
                    ));
                    html.close("</section>");
                }
            }
        }

        html.close("</div>");
        html.finish()
    }

    fn operation_field(&self, ty: OperationType, name: &str) -> Option<&'a Field> {
        let root = match ty {
            OperationType::Query => "Query",
            OperationType::Mutation => "Mutation",
            OperationType::Subscription => "Subscription",
        };
        let fields = &self.model.operation_fields;
        fields
            .iter()
            .find(|f| f.name == name && f.parent == root)
            .or_else(|| fields.iter().find(|f| f.name == name))
    }
}

/// Table with one column per selected field
fn render_list(html: &mut Html, key: &str, path: &str, fields: &[TemplateField]) {
    html.open(format!(r#"<section class="result-list" id="{}">"#, key));
    html.line(format!("<h2>{}</h2>", escape(&field_label(key))));
    html.open(format!("{{% if {} %}}", path));
    html.open("<table>");
    html.open("<thead>");
    html.open("<tr>");
    for field in fields {
        html.line(format!("<th>{}</th>", escape(&field.label)));
    }
    html.close("</tr>");
    html.close("</thead>");
    html.open("<tbody>");
    html.open(format!("{{% for item in {} %}}", path));
    html.open("<tr>");
    for field in fields {
        html.line(format!(
            r#"<td class="{}">{}</td>"#,
            field.class_name(),
            field_markup(field, "item", 0)
        ));
    }
    html.close("</tr>");
    html.close("{% endfor %}");
    html.close("</tbody>");
    html.close("</table>");
    html.line("{% else %}");
    html.line(format!(
        r#"<p class="empty">No {} found.</p>"#,
        escape(&field_label(key).to_lowercase())
    ));
    html.close("{% endif %}");
    html.close("</section>");
}

/// Definition list with one entry per selected field
fn render_object(html: &mut Html, key: &str, path: &str, fields: &[TemplateField]) {
    html.open(format!(r#"<section class="result-object" id="{}">"#, key));
    html.line(format!("<h2>{}</h2>", escape(&field_label(key))));
    html.open(format!("{{% if {} %}}", path));
    html.open("<dl>");
    for field in fields {
        html.line(format!("<dt>{}</dt>", escape(&field.label)));
        html.line(format!(
            r#"<dd class="{}">{}</dd>"#,
            field.class_name(),
            field_markup(field, path, 0)
        ));
    }
    html.close("</dl>");
    html.close("{% endif %}");
    html.close("</section>");
}

/// Markup for one field relative to `scope`
fn field_markup(field: &TemplateField, scope: &str, depth: usize) -> String {
    let value = format!("{}.{}", scope, field.path);
    if field.nested_fields.is_empty() {
        return value_markup(field, &value);
    }

    // Nested lists loop with a variable per depth
    let item = format!("item_{}", depth + 1);
    let entries: Vec<String> = field
        .nested_fields
        .iter()
        .map(|nested| {
            format!(
                r#"<span class="{}">{}</span>"#,
                nested.class_name(),
                field_markup(nested, &item, depth + 1)
            )
        })
        .collect();
    format!(
        "<ul>{{% for {} in {} %}}<li>{}</li>{{% endfor %}}</ul>",
        item,
        value,
        entries.join(" ")
    )
}

/// Markup for a leaf value
fn value_markup(field: &TemplateField, value: &str) -> String {
    if field.is_datetime() {
        format!(r#"<time datetime="{{{{ {} }}}}">{{{{ {} }}}}</time>"#, value, value)
    } else if field.is_list {
        format!(r#"{{{{ {}|join(", ") }}}}"#, value)
    } else {
        format!("{{{{ {} }}}}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::sdl::{build_and_extend_schema, extract_metadata};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = indoc! {r#"
        scalar Datetime

        enum Role { ADMIN MEMBER }

        type Comment { text: String! }

        type Post {
            title: String!
            comments: [Comment!]!
        }

        type User {
            id: ID!
            name: String!
            createdAt: Datetime!
            score: Float!
            tags: [String]
            posts: [Post!]!
            manager: User
        }

        input AddressInput {
            city: String!
            zip: String
        }

        input UserInput {
            name: String!
            email: String
            password: String!
            age: Int
            active: Boolean
            role: Role
            bio: String
            address: AddressInput
            referrer: UserInput
        }

        type Query {
            users: [User]!
            user(id: ID!): User
            version: String
        }

        type Mutation {
            createUser(input: UserInput!, notify: Boolean): User
        }
    "#};

    fn model() -> SchemaModel {
        let (schema, documents) = build_and_extend_schema(&[SCHEMA]).unwrap();
        let metadata = extract_metadata(&documents);
        analyze(&schema, &metadata, &Default::default()).unwrap()
    }

    fn render(operations: &str) -> Vec<GeneratedFile> {
        let model = model();
        let document = parse_operations(operations).unwrap();
        TemplateGenerator::new(&model, "templates").generate(&document)
    }

    fn content<'a>(files: &'a [GeneratedFile], name: &str) -> &'a str {
        files
            .iter()
            .find(|f| f.path == Path::new("templates").join(name))
            .map(|f| f.content.as_str())
            .unwrap()
    }

    #[test]
    fn test_list_query() {
        let files = render(indoc! {"
            query GetUsers {
                users { id name createdAt score tags }
            }
        "});
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].policy, WritePolicy::SkipExisting);
        let html = content(&files, "GetUsers.html");
        assert!(html.contains(r#"<div class="GetUsers" id="GetUsers-result">"#));
        assert!(html.contains("{% for item in data.users %}"));
        assert!(html.contains("<th>Createdat</th>"));
        assert!(html.contains(r#"<td class="field id">{{ item.id }}</td>"#));
        assert!(html.contains(
            r#"<td class="field createdAt"><time datetime="{{ item.createdAt }}">{{ item.createdAt }}</time></td>"#
        ));
        assert!(html.contains(r#"{{ item.tags|join(", ") }}"#));
        assert!(html.contains(r#"<p class="empty">No users found.</p>"#));
    }

    #[test]
    fn test_fragments_and_aliases() {
        let files = render(indoc! {"
            fragment UserFields on User { name createdAt }
            fragment PostFields on Post { title }

            query GetUser {
                person: user(id: \"1\") {
                    id
                    ...UserFields
                    ...PostFields
                    ... on User { score }
                    boss: manager { name }
                }
            }
        "});
        let html = content(&files, "GetUser.html");
        assert!(html.contains(r#"<section class="result-object" id="person">"#));
        assert!(html.contains("{% if data.person %}"));
        assert!(html.contains(r#"<dd class="field name">{{ data.person.name }}</dd>"#));
        assert!(html.contains(r#"<dd class="field score">{{ data.person.score }}</dd>"#));
        // Nested singular objects extend the path
        assert!(html.contains(r#"<dd class="field boss.name">{{ data.person.boss.name }}</dd>"#));
        // Fragments on other types are not expanded
        assert!(!html.contains("title"));
    }

    #[test]
    fn test_nested_lists() {
        let model = model();
        let document = parse_operations(indoc! {"
            query GetNested {
                user(id: \"1\") { posts { title comments { text } } }
            }
        "})
        .unwrap();
        let (_, operation) = match &document.operations {
            DocumentOperations::Multiple(ops) => ops.iter().next().unwrap(),
            DocumentOperations::Single(_) => unreachable!(),
        };
        let Selection::Field(user) = &operation.node.selection_set.node.items[0].node else {
            unreachable!()
        };
        let flattener = SelectionFlattener::new(&model, &document.fragments);
        let fields = flattener.flatten(
            &user.node.selection_set.node,
            "",
            model.object_type("User").unwrap(),
        );

        assert_eq!(fields.len(), 1);
        let posts = &fields[0];
        assert!(posts.is_list);
        assert_eq!(posts.path, "posts");
        assert_eq!(posts.nested_fields[0].path, "title");
        assert_eq!(posts.nested_fields[1].nested_fields[0].path, "text");

        let files = TemplateGenerator::new(&model, "templates").generate(&document);
        let html = content(&files, "GetNested.html");
        assert!(html.contains("{% for item_1 in data.user.posts %}"));
        assert!(html.contains("{% for item_2 in item_1.comments %}"));
        assert!(html.contains("{{ item_2.text }}"));
    }

    #[test]
    fn test_scalar_operation_field() {
        let files = render("query Version { version }");
        let html = content(&files, "Version.html");
        assert!(html.contains(r#"<p class="field data.version">{{ data.version }}</p>"#));
    }

    #[test]
    fn test_mutation_form_and_result() {
        let files = render(indoc! {"
            mutation CreateUser($input: UserInput!, $notify: Boolean) {
                createUser(input: $input, notify: $notify) { id name }
            }
        "});
        assert_eq!(files.len(), 2);

        let form = content(&files, "CreateUser_form.html");
        assert!(form.contains(r#"<form id="CreateUser-form""#));
        assert!(form.contains("<legend>Input</legend>"));
        assert!(form.contains(r#"<input type="text" id="input_name" name="input.name" required>"#));
        assert!(form.contains(r#"<input type="text" id="input_email" name="input.email">"#));
        assert!(form.contains(r#"<input type="password" id="input_password" name="input.password" required>"#));
        assert!(form.contains(r#"<input type="number" id="input_age" name="input.age" step="any">"#));
        assert!(form.contains(r#"<input type="checkbox" id="input_active" name="input.active" value="true">"#));
        assert!(form.contains(r#"<select id="input_role" name="input.role">"#));
        assert!(form.contains(r#"<option value="ADMIN">Admin</option>"#));
        // The String scalar decides before the `bio` name pattern
        assert!(form.contains(r#"<input type="text" id="input_bio" name="input.bio">"#));
        assert!(form.contains(r#"<input type="text" id="input_address_city" name="input.address.city" required>"#));
        assert!(form.contains(r#"<input type="checkbox" id="notify" name="notify" value="true">"#));
        // Recursive inputs are not expanded again
        assert!(!form.contains("input.referrer"));

        let result = content(&files, "CreateUser_result.html");
        assert!(result.contains(r#"<div class="CreateUser" id="CreateUser-result">"#));
        assert!(result.contains("{{ data.createUser.name }}"));
    }

    #[test]
    fn test_anonymous_operations_are_skipped() {
        assert!(render("query { users { id } }").is_empty());
    }

    #[test]
    fn test_operations_sorted_by_name() {
        let files = render(indoc! {"
            query Zeta { version }
            query Alpha { version }
        "});
        let names: Vec<_> = files
            .iter()
            .filter_map(|f| f.path.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["Alpha.html", "Zeta.html"]);
    }

    #[test]
    fn test_syntax_error() {
        let err = parse_operations("query Broken {").unwrap_err();
        assert!(matches!(err, GeneratorError::Syntax { .. }));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">&</a>"#), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}

//! Naming conventions shared by the analyzer and the generators

use heck::{ToSnakeCase, ToUpperCamelCase};
use proc_macro2::{Ident, Span};

/// Words whose plural does not follow any suffix rule
const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("goose", "geese"),
    ("mouse", "mice"),
    ("criterion", "criteria"),
];

/// Words ending in -o that take -es
const O_ES_WORDS: &[&str] = &[
    "hero", "potato", "tomato", "echo", "veto", "volcano", "tornado",
];

/// Pluralize a type name for use as a context attribute
///
/// The name is lowercased first, so `City` becomes `cities`.
pub fn pluralize(name: &str) -> String {
    let word = name.to_lowercase();

    if let Some((_, plural)) = IRREGULAR_PLURALS.iter().find(|(single, _)| *single == word) {
        return plural.to_string();
    }

    // Greek and Latin endings
    if let Some(stem) = word.strip_suffix("is") {
        return format!("{stem}es");
    }
    if let Some(stem) = word.strip_suffix("us") {
        return format!("{stem}i");
    }
    if let Some(stem) = word.strip_suffix("on") {
        return format!("{stem}a");
    }

    // Sibilants
    if ["s", "sh", "ch", "x", "zz"].iter().any(|end| word.ends_with(end)) {
        return format!("{word}es");
    }
    if word.ends_with('z') {
        return format!("{word}zes");
    }

    if let Some(stem) = word.strip_suffix('y') {
        let consonant_before = stem
            .chars()
            .last()
            .is_some_and(|c| !"aeiou".contains(c));
        if consonant_before {
            return format!("{stem}ies");
        }
    }

    if let Some(stem) = word.strip_suffix("fe") {
        return format!("{stem}ves");
    }
    if let Some(stem) = word.strip_suffix('f') {
        return format!("{stem}ves");
    }

    if O_ES_WORDS.contains(&word.as_str()) {
        return format!("{word}es");
    }

    format!("{word}s")
}

/// Lowercase the first character, leaving the rest untouched (`UserPost` -> `userPost`)
pub fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Human readable label for a field (`first_name` -> `First Name`)
pub fn field_label(name: &str) -> String {
    name.replace('_', " ")
        .split(' ')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rust keywords that need a raw identifier
const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "dyn", "else", "enum", "extern",
    "false", "fn", "for", "gen", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut",
    "pub", "ref", "return", "static", "struct", "trait", "true", "try", "type", "unsafe", "use",
    "where", "while", "abstract", "become", "box", "do", "final", "macro", "override", "priv",
    "typeof", "unsized", "virtual", "yield",
];

/// Keywords that cannot be raw identifiers
const RESERVED: &[&str] = &["self", "Self", "super", "crate", "_"];

/// Build an identifier from an arbitrary name, escaping keywords
pub fn ident(name: &str) -> Ident {
    if RESERVED.contains(&name) {
        return Ident::new(&format!("{name}_"), Span::call_site());
    }
    if KEYWORDS.contains(&name) {
        return Ident::new_raw(name, Span::call_site());
    }
    Ident::new(name, Span::call_site())
}

/// snake_case identifier for a GraphQL field or argument name
pub fn field_ident(name: &str) -> Ident {
    let snake = name.to_snake_case();
    if snake.is_empty() {
        return ident("field_");
    }
    ident(&snake)
}

/// UpperCamelCase identifier for a type or variant name
pub fn type_ident(name: &str) -> Ident {
    let camel = name.to_upper_camel_case();
    if camel.is_empty() || camel.starts_with(|c: char| c.is_ascii_digit()) {
        return ident(&format!("V{camel}"));
    }
    ident(&camel)
}

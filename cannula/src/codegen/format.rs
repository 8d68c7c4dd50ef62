//! Rendering of generated token streams

use proc_macro2::TokenStream;
use quote::ToTokens;

use crate::error::GeneratorError;

/// Parse a token stream as a Rust file and pretty print it
///
/// A stream that does not parse is an error: generated output must always be
/// valid Rust.
pub fn format_code(tokens: TokenStream) -> Result<String, GeneratorError> {
    let code = tokens.to_string();
    let parsed = syn::parse_file(&code).map_err(|e| {
        GeneratorError::CodeGenError(format!("Failed to parse generated code: {}", e))
    })?;
    Ok(prettyplease::unparse(&parsed))
}

/// Parse a Rust type written as text, e.g. `Option<Vec<String>>`
pub fn rust_type(ty: &str) -> Result<TokenStream, GeneratorError> {
    syn::parse_str::<syn::Type>(ty)
        .map(|parsed| parsed.to_token_stream())
        .map_err(|e| GeneratorError::CodeGenError(format!("Invalid Rust type '{}': {}", ty, e)))
}

/// Parse a comma separated attribute list, e.g. `primary_key, unique`
pub fn attribute_args(args: &str) -> Result<TokenStream, GeneratorError> {
    args.parse::<TokenStream>().map_err(|e| {
        GeneratorError::CodeGenError(format!("Invalid attribute arguments '{}': {}", args, e))
    })
}

//! Attribute parsing for the Record derive macro.
//!
//! Handles struct-level `#[orm(table = "...")]` and field-level
//! `#[orm(id, column = "...", skip)]`.

use heck::ToSnakeCase;
use syn::{DeriveInput, Result};

/// Parsed field-level `#[orm(...)]` attributes.
#[derive(Default)]
pub(super) struct FieldAttr {
    pub is_id: bool,
    pub skip: bool,
    pub column: Option<String>,
}

impl syn::parse::Parse for FieldAttr {
    fn parse(input: syn::parse::ParseStream) -> Result<Self> {
        let mut attr = FieldAttr::default();

        while !input.is_empty() {
            let ident: syn::Ident = input.parse()?;
            if ident == "id" {
                attr.is_id = true;
            } else if ident == "skip" {
                attr.skip = true;
            } else if ident == "column" {
                let _: syn::Token![=] = input.parse()?;
                let value: syn::LitStr = input.parse()?;
                if value.value().trim().is_empty() {
                    return Err(syn::Error::new_spanned(value, "column name cannot be empty"));
                }
                attr.column = Some(value.value());
            } else {
                return Err(syn::Error::new_spanned(
                    &ident,
                    format!("unknown orm attribute `{ident}`; expected `id`, `column` or `skip`"),
                ));
            }

            if input.peek(syn::Token![,]) {
                let _: syn::Token![,] = input.parse()?;
            } else {
                break;
            }
        }

        Ok(attr)
    }
}

/// Merge every `#[orm(...)]` attribute on a field.
pub(super) fn field_attr(field: &syn::Field) -> Result<FieldAttr> {
    let mut merged = FieldAttr::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("orm") {
            continue;
        }
        let parsed: FieldAttr = attr.parse_args()?;
        merged.is_id |= parsed.is_id;
        merged.skip |= parsed.skip;
        if parsed.column.is_some() {
            merged.column = parsed.column;
        }
    }
    if merged.skip && (merged.is_id || merged.column.is_some()) {
        return Err(syn::Error::new_spanned(
            field,
            "`skip` cannot be combined with `id` or `column`",
        ));
    }
    Ok(merged)
}

/// Table from `#[orm(table = "...")]`, or the snake_case struct name.
pub(super) fn table_name(input: &DeriveInput) -> Result<String> {
    for attr in &input.attrs {
        if !attr.path().is_ident("orm") {
            continue;
        }
        let nested = attr.parse_args::<syn::MetaNameValue>()?;
        if !nested.path.is_ident("table") {
            return Err(syn::Error::new_spanned(
                &nested.path,
                "expected #[orm(table = \"table_name\")]",
            ));
        }
        if let syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(lit),
            ..
        }) = &nested.value
        {
            return Ok(lit.value());
        }
        return Err(syn::Error::new_spanned(
            &nested.value,
            "table name must be a string literal",
        ));
    }
    Ok(input.ident.to_string().to_snake_case())
}

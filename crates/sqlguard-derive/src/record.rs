//! Record derive macro implementation

mod attrs;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Result};

struct MappedField<'a> {
    ident: &'a syn::Ident,
    ty: &'a syn::Type,
    column: String,
    is_id: bool,
}

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Record can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Record can only be derived for structs",
            ));
        }
    };

    let table = attrs::table_name(&input)?;

    let mut mapped = Vec::new();
    for field in fields {
        let attr = attrs::field_attr(field)?;
        if attr.skip {
            continue;
        }
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let column = attr.column.unwrap_or_else(|| {
            let raw = ident.to_string();
            raw.strip_prefix("r#").map(str::to_string).unwrap_or(raw)
        });
        mapped.push(MappedField {
            ident,
            ty: &field.ty,
            column,
            is_id: attr.is_id,
        });
    }

    let ids: Vec<_> = mapped.iter().filter(|f| f.is_id).collect();
    if ids.len() > 1 {
        return Err(syn::Error::new_spanned(
            ids[1].ident,
            "only one field can be marked #[orm(id)]",
        ));
    }

    let descriptors = mapped.iter().map(|f| {
        let ty = f.ty;
        let logical = f.ident.to_string();
        let logical = logical.strip_prefix("r#").unwrap_or(&logical).to_string();
        let column = &f.column;
        let pk = f.is_id.then(|| quote! { .primary_key() });
        quote! {
            ::sqlguard::FieldDescriptor::of::<#ty>(#logical, #column) #pk
        }
    });

    let assign_arms = mapped.iter().enumerate().map(|(i, f)| {
        let ident = f.ident;
        quote! {
            #i => self.#ident = ::sqlguard::convert_assign(raw)?,
        }
    });

    let value_arms = mapped.iter().enumerate().map(|(i, f)| {
        let ident = f.ident;
        quote! {
            #i => ::sqlguard::ToValue::to_value(&self.#ident),
        }
    });

    Ok(quote! {
        impl #impl_generics ::sqlguard::Record for #name #ty_generics #where_clause {
            fn table_name() -> &'static str {
                #table
            }

            fn fields() -> ::std::vec::Vec<::sqlguard::FieldDescriptor> {
                ::std::vec![#(#descriptors),*]
            }

            fn assign(
                &mut self,
                index: usize,
                raw: &::sqlguard::Value,
            ) -> ::std::result::Result<(), ::sqlguard::DecodeError> {
                match index {
                    #(#assign_arms)*
                    _ => {}
                }
                ::std::result::Result::Ok(())
            }

            fn value_at(&self, index: usize) -> ::sqlguard::OrmResult<::sqlguard::Value> {
                match index {
                    #(#value_arms)*
                    _ => ::std::result::Result::Err(::sqlguard::OrmError::Other(::std::format!(
                        "{} has no field at index {}",
                        ::std::any::type_name::<Self>(),
                        index
                    ))),
                }
            }
        }
    })
}

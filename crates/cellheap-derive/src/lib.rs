//! Derive macro for the `Trace` trait.

use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Data, DeriveInput, Fields, GenericParam,
    Generics, Ident, Index, Path,
};

/// Derives `Trace` for a struct or enum.
///
/// Every field is traced in declaration order. Unions are rejected because
/// the macro cannot know which variant of the storage is active.
///
/// The generated impl path defaults to `::cellheap`; use
/// `#[cellheap(crate = some::path)]` when the crate is renamed.
#[proc_macro_derive(Trace, attributes(cellheap))]
pub fn derive_trace(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let mut cellheap: Path = parse_quote!(::cellheap);

    for attr in &input.attrs {
        if !attr.path().is_ident("cellheap") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                cellheap = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute"))
            }
        });

        if let Err(err) = result {
            return err.into_compile_error().into();
        }
    }

    let name = &input.ident;
    let generics = add_trait_bounds(&cellheap, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let trace_body = generate_trace_body(&cellheap, name, &input.data);

    let generated = quote! {
        unsafe impl #impl_generics #cellheap::Trace for #name #ty_generics #where_clause {
            #[inline]
            fn trace(&self, visitor: &mut impl #cellheap::Visitor) {
                #trace_body
            }
        }
    };

    generated.into()
}

fn add_trait_bounds(cellheap: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_trace = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Trace")
                } else {
                    false
                }
            });
            let has_static = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Lifetime(l) = b {
                    l.ident == "static"
                } else {
                    false
                }
            });

            if !has_trace {
                type_param.bounds.push(parse_quote!(#cellheap::Trace));
            }
            if !has_static {
                type_param.bounds.push(parse_quote!('static));
            }
        }
    }
    generics
}

fn generate_trace_body(cellheap: &Path, name: &Ident, data: &Data) -> TokenStream {
    match data {
        Data::Struct(data) => generate_struct_trace(cellheap, &data.fields),
        Data::Enum(data) => generate_enum_trace(cellheap, name, data),
        Data::Union(u) => {
            quote_spanned! {
                u.union_token.span => compile_error!("`Trace` must be manually implemented for unions");
            }
        }
    }
}

fn generate_struct_trace(cellheap: &Path, fields: &Fields) -> TokenStream {
    match fields {
        Fields::Named(f) => {
            let trace_calls = f.named.iter().map(|field| {
                let name = &field.ident;
                quote_spanned! {field.span() =>
                    #cellheap::Trace::trace(&self.#name, visitor);
                }
            });
            quote! { #(#trace_calls)* }
        }
        Fields::Unnamed(f) => {
            let trace_calls = f.unnamed.iter().enumerate().map(|(i, field)| {
                let index = Index::from(i);
                quote_spanned! {field.span() =>
                    #cellheap::Trace::trace(&self.#index, visitor);
                }
            });
            quote! { #(#trace_calls)* }
        }
        Fields::Unit => quote! {},
    }
}

fn generate_enum_trace(cellheap: &Path, name: &Ident, data: &syn::DataEnum) -> TokenStream {
    let match_arms = data.variants.iter().map(|variant| {
        let var_name = &variant.ident;
        match &variant.fields {
            Fields::Named(f) => {
                let field_names: Vec<_> = f
                    .named
                    .iter()
                    .enumerate()
                    .map(|(i, _)| format_ident!("field{}", i))
                    .collect();
                let field_idents: Vec<_> =
                    f.named.iter().map(|f| f.ident.as_ref().unwrap()).collect();
                let trace_calls = field_names.iter().map(|field| {
                    quote! { #cellheap::Trace::trace(#field, visitor); }
                });

                quote! {
                    #name::#var_name { #(#field_idents: #field_names),* } => {
                        #(#trace_calls)*
                    }
                }
            }
            Fields::Unnamed(f) => {
                let field_names: Vec<_> = (0..f.unnamed.len())
                    .map(|i| format_ident!("field{}", i))
                    .collect();
                let trace_calls = field_names.iter().map(|field| {
                    quote! { #cellheap::Trace::trace(#field, visitor); }
                });

                quote! {
                    #name::#var_name(#(#field_names),*) => {
                        #(#trace_calls)*
                    }
                }
            }
            Fields::Unit => {
                quote! {
                    #name::#var_name => {}
                }
            }
        }
    });

    quote! {
        match self {
            #(#match_arms)*
        }
    }
}

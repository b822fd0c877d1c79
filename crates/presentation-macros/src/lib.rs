//! Procedural macros for presentation-core view models.
//!
//! This crate provides `#[derive(ViewModel)]`, which implements the
//! `ViewModel` trait and, for transactional types, the property table used
//! for snapshots.
//!
//! # Attributes
//!
//! ## `#[view_model(...)]`
//!
//! Struct-level configuration:
//!
//! - `transactional`: implement `TrxViewModel`; the node takes a snapshot
//!   when created and supports accept/reject
//! - `ignore_dirty = ["a", "b"]`: property names that never mark the node
//!   dirty
//!
//! ## Field attributes
//!
//! ```ignore
//! #[derive(ViewModel)]
//! #[view_model(transactional)]
//! struct Order {
//!     base: ViewModelBase,
//!
//!     #[property]
//!     reference: Property<Option<String>>,
//!
//!     #[property(setter = "set_quantity")]
//!     quantity: Property<u32>,
//!
//!     #[child]
//!     customer: Property<Option<Arc<Customer>>>,
//!
//!     #[collection]
//!     lines: ViewModelCollection<OrderLine>,
//! }
//! ```
//!
//! - `#[property]`: a plain value; `name = "..."` overrides the notification
//!   name and `setter = "method"` restores it through `fn method(&self, V)`
//! - `#[child]`: an optional child view model
//! - `#[collection]`: a child collection
//!
//! Fields without one of these attributes are not part of the table.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Field, Fields, Ident, LitStr, parse_macro_input};

/// Derive `ViewModel` (and `TrxViewModel` for transactional types).
///
/// The struct must have a `base: ViewModelBase` field and no generic
/// parameters.
#[proc_macro_derive(ViewModel, attributes(view_model, property, child, collection))]
pub fn derive_view_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_derive_view_model(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Parsed struct-level attributes.
#[derive(Default)]
struct ViewModelAttrs {
    transactional: bool,
    ignore_dirty: Vec<LitStr>,
}

enum FieldKind {
    Value { setter: Option<Ident> },
    Child,
    Collection,
}

/// Parsed field information.
struct FieldInfo {
    ident: Ident,
    name: LitStr,
    kind: FieldKind,
}

fn impl_derive_view_model(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "ViewModel derive does not support generic parameters",
        ));
    }

    let attrs = parse_view_model_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "ViewModel derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(input, "ViewModel derive only supports structs"));
        }
    };

    if !fields.iter().any(|f| f.ident.as_ref().is_some_and(|i| i == "base")) {
        return Err(syn::Error::new_spanned(
            input,
            "ViewModel derive requires a `base: ViewModelBase` field",
        ));
    }

    let mut infos = Vec::new();
    for field in fields {
        if let Some(info) = parse_field(field)? {
            infos.push(info);
        }
    }

    let ignored = &attrs.ignore_dirty;
    let children = generate_child_nodes(&infos);

    let as_transactional = if attrs.transactional {
        quote! {
            fn as_transactional(&self) -> Option<&dyn ::presentation_core::Transactional> {
                Some(self)
            }
        }
    } else {
        quote! {}
    };

    let trx_impl = if attrs.transactional {
        let table = generate_property_table(struct_name, &infos);
        quote! {
            impl ::presentation_core::TrxViewModel for #struct_name {
                fn property_table() -> &'static ::presentation_core::PropertyTable<Self> {
                    static TABLE: ::std::sync::OnceLock<::presentation_core::PropertyTable<#struct_name>> =
                        ::std::sync::OnceLock::new();
                    TABLE.get_or_init(|| #table)
                }
            }
        }
    } else {
        quote! {}
    };

    Ok(quote! {
        impl ::presentation_core::ViewModel for #struct_name {
            fn base(&self) -> &::presentation_core::ViewModelBase {
                &self.base
            }

            fn ignored_dirty_properties(&self) -> &'static [&'static str] {
                &[#(#ignored),*]
            }

            #[allow(unused_mut)]
            fn child_nodes(&self) -> ::std::vec::Vec<::std::sync::Arc<dyn ::presentation_core::ViewModel>> {
                let mut nodes: ::std::vec::Vec<::std::sync::Arc<dyn ::presentation_core::ViewModel>> =
                    ::std::vec::Vec::new();
                #children
                nodes
            }

            #as_transactional
        }

        #trx_impl
    })
}

/// Parse struct-level #[view_model(...)] attributes.
fn parse_view_model_attrs(attrs: &[Attribute]) -> syn::Result<ViewModelAttrs> {
    let mut result = ViewModelAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("view_model") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("transactional") {
                result.transactional = true;
                Ok(())
            } else if meta.path.is_ident("ignore_dirty") {
                let input = meta.value()?;
                let content;
                syn::bracketed!(content in input);
                let names = content.parse_terminated(<LitStr as syn::parse::Parse>::parse, syn::Token![,])?;
                result.ignore_dirty.extend(names);
                Ok(())
            } else {
                Err(meta.error("expected `transactional` or `ignore_dirty = [...]`"))
            }
        })?;
    }

    Ok(result)
}

/// Parse a field with a #[property], #[child] or #[collection] attribute.
fn parse_field(field: &Field) -> syn::Result<Option<FieldInfo>> {
    let Some(ident) = field.ident.clone() else {
        return Ok(None);
    };
    if ident == "base" {
        return Ok(None);
    }

    let mut found: Option<(FieldKind, Option<LitStr>)> = None;

    for attr in &field.attrs {
        let kind = if attr.path().is_ident("property") {
            let mut setter = None;
            let mut name = None;
            // #[property] without arguments has nothing to parse.
            if matches!(attr.meta, syn::Meta::List(_)) {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("setter") {
                        let lit: LitStr = meta.value()?.parse()?;
                        setter = Some(lit.parse::<Ident>()?);
                        Ok(())
                    } else if meta.path.is_ident("name") {
                        name = Some(meta.value()?.parse::<LitStr>()?);
                        Ok(())
                    } else {
                        Err(meta.error("expected `setter = \"...\"` or `name = \"...\"`"))
                    }
                })?;
            }
            Some((FieldKind::Value { setter }, name))
        } else if attr.path().is_ident("child") {
            Some((FieldKind::Child, parse_name_only(attr)?))
        } else if attr.path().is_ident("collection") {
            Some((FieldKind::Collection, parse_name_only(attr)?))
        } else {
            None
        };

        if let Some(kind) = kind {
            if found.is_some() {
                return Err(syn::Error::new_spanned(
                    attr,
                    "a field takes only one of #[property], #[child] or #[collection]",
                ));
            }
            found = Some(kind);
        }
    }

    Ok(found.map(|(kind, name)| FieldInfo {
        name: name.unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span())),
        ident,
        kind,
    }))
}

fn parse_name_only(attr: &Attribute) -> syn::Result<Option<LitStr>> {
    let mut name = None;
    if matches!(attr.meta, syn::Meta::List(_)) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                name = Some(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else {
                Err(meta.error("expected `name = \"...\"`"))
            }
        })?;
    }
    Ok(name)
}

fn generate_child_nodes(infos: &[FieldInfo]) -> TokenStream2 {
    let pushes = infos.iter().filter_map(|info| {
        let ident = &info.ident;
        match info.kind {
            FieldKind::Value { .. } => None,
            FieldKind::Child => Some(quote! {
                if let Some(child) = self.#ident.get() {
                    nodes.push(child);
                }
            }),
            FieldKind::Collection => Some(quote! {
                nodes.extend(
                    self.#ident
                        .iter()
                        .map(|item| item as ::std::sync::Arc<dyn ::presentation_core::ViewModel>),
                );
            }),
        }
    });
    quote! { #(#pushes)* }
}

fn generate_property_table(struct_name: &Ident, infos: &[FieldInfo]) -> TokenStream2 {
    let entries = infos.iter().map(|info| {
        let ident = &info.ident;
        let name = &info.name;
        match &info.kind {
            FieldKind::Value { setter: None } => quote! {
                .value(#name, |vm: &#struct_name| &vm.#ident)
            },
            FieldKind::Value { setter: Some(setter) } => quote! {
                .value_with_setter(#name, |vm: &#struct_name| &vm.#ident, |vm: &#struct_name, value| {
                    vm.#setter(value);
                })
            },
            FieldKind::Child => quote! {
                .child(#name, |vm: &#struct_name| &vm.#ident)
            },
            FieldKind::Collection => quote! {
                .collection(#name, |vm: &#struct_name| &vm.#ident)
            },
        }
    });

    quote! {
        ::presentation_core::PropertyTable::<#struct_name>::builder()
            #(#entries)*
            .build()
    }
}

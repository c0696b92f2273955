//! Procedural macros for Conveyor.
//!
//! - `#[processor]` turns an `async fn(Event) -> impl IntoOutcome` into a processor
//! - `#[interceptor]` turns an `async fn(Event, &Next) -> impl IntoOutcome` into an interceptor
//! - `#[derive(Lifecycle)]` gives a type the empty lifecycle

use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

mod component;

/// Turn an async function into a unit-struct processor of the same name.
///
/// ```rust,ignore
/// #[conveyor::processor(name = "upper", non_blocking)]
/// async fn upper(event: Event) -> Event {
///     let text = event.payload_str().unwrap_or_default().to_uppercase();
///     event.with_payload(text)
/// }
/// ```
#[proc_macro_attribute]
pub fn processor(attr: TokenStream, item: TokenStream) -> TokenStream {
    component::component_impl(component::Kind::Processor, attr, item)
}

/// Turn an async function into a unit-struct interceptor of the same name.
///
/// The second argument is the continuation for the rest of the chain.
#[proc_macro_attribute]
pub fn interceptor(attr: TokenStream, item: TokenStream) -> TokenStream {
    component::component_impl(component::Kind::Interceptor, attr, item)
}

/// Derive a `Lifecycle` implementation that ignores every call.
#[proc_macro_derive(Lifecycle)]
pub fn derive_lifecycle(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::conveyor::Lifecycle for #name #ty_generics #where_clause {}
    };

    TokenStream::from(expanded)
}

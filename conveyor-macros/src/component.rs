//! `#[processor]` and `#[interceptor]`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, Ident, ItemFn, LitStr, Token, parse::Parse, parse_macro_input};

pub(crate) enum Kind {
    Processor,
    Interceptor,
}

impl Kind {
    fn arity(&self) -> usize {
        match self {
            Kind::Processor => 1,
            Kind::Interceptor => 2,
        }
    }

    fn signature(&self) -> &'static str {
        match self {
            Kind::Processor => "async fn(event: Event) -> impl IntoOutcome",
            Kind::Interceptor => "async fn(event: Event, next: &Next) -> impl IntoOutcome",
        }
    }
}

/// Arguments for the component macros.
pub(crate) struct ComponentArgs {
    pub name: Option<String>,
    pub non_blocking: bool,
}

impl Parse for ComponentArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut name = None;
        let mut non_blocking = false;

        while !input.is_empty() {
            let ident: Ident = input.parse()?;

            match ident.to_string().as_str() {
                "name" => {
                    input.parse::<Token![=]>()?;
                    let lit: LitStr = input.parse()?;
                    name = Some(lit.value());
                }
                "non_blocking" => {
                    non_blocking = true;
                }
                other => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {}", other),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(ComponentArgs { name, non_blocking })
    }
}

pub(crate) fn component_impl(kind: Kind, attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as ComponentArgs);
    let input = parse_macro_input!(item as ItemFn);

    let fn_name = &input.sig.ident;
    let fn_vis = &input.vis;
    let fn_block = &input.block;
    let inputs = &input.sig.inputs;

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(&input.sig.fn_token, "function must be async")
            .to_compile_error()
            .into();
    }

    if inputs.len() != kind.arity() || inputs.iter().any(|arg| matches!(arg, FnArg::Receiver(_))) {
        return syn::Error::new_spanned(
            &input.sig,
            format!("expected a function of the form `{}`", kind.signature()),
        )
        .to_compile_error()
        .into();
    }

    let output = match &input.sig.output {
        syn::ReturnType::Default => quote! { () },
        syn::ReturnType::Type(_, ty) => quote! { #ty },
    };

    let display_name = args.name.unwrap_or_else(|| fn_name.to_string());
    let non_blocking = args.non_blocking;

    let inner_inputs = inputs.iter();
    let component_impl = match kind {
        Kind::Processor => quote! {
            impl ::conveyor::Processor for #fn_name {
                async fn process(&self, __event: ::conveyor::Event) -> ::conveyor::ProcessResult {
                    async fn __inner(#(#inner_inputs),*) -> #output #fn_block
                    ::conveyor::IntoOutcome::into_outcome(__inner(__event).await)
                }

                fn is_non_blocking(&self) -> bool {
                    #non_blocking
                }

                fn name(&self) -> &str {
                    #display_name
                }
            }
        },
        Kind::Interceptor => quote! {
            impl ::conveyor::Interceptor for #fn_name {
                async fn intercept(
                    &self,
                    __event: ::conveyor::Event,
                    __next: &::conveyor::Next,
                ) -> ::conveyor::ProcessResult {
                    async fn __inner(#(#inner_inputs),*) -> #output #fn_block
                    ::conveyor::IntoOutcome::into_outcome(__inner(__event, __next).await)
                }

                fn is_non_blocking(&self) -> bool {
                    #non_blocking
                }

                fn name(&self) -> &str {
                    #display_name
                }
            }
        },
    };

    let expanded = quote! {
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, Debug, Default)]
        #[doc = concat!("Generated from `", stringify!(#fn_name), "`.")]
        #fn_vis struct #fn_name;

        impl ::conveyor::Lifecycle for #fn_name {}

        #component_impl
    };

    TokenStream::from(expanded)
}

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::parse::Parser;

use crate::parse::{ItemFn, is_test_attribute, lit_str, lit_u32, with_error};

// syn::AttributeArgs is gone since syn 2.
type AttributeArgs = syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>;

const KNOWN_ARGS: &str = "`event_interval`, `unhandled_error`";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Entry {
    Main,
    Test,
}

impl Entry {
    fn name(self) -> &'static str {
        match self {
            Entry::Main => "fibra::main",
            Entry::Test => "fibra::test",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum UnhandledError {
    Log,
    Panic,
}

impl UnhandledError {
    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "log" => Ok(UnhandledError::Log),
            "panic" => Ok(UnhandledError::Panic),
            _ => Err(format!(
                "no such unhandled error policy `{s}`, expected `log` or `panic`"
            )),
        }
    }

    fn path(self) -> TokenStream {
        match self {
            UnhandledError::Log => quote! { fibra::runtime::UnhandledErrorPolicy::Log },
            UnhandledError::Panic => quote! { fibra::runtime::UnhandledErrorPolicy::Panic },
        }
    }
}

/// Runtime knobs accepted by both attributes.
#[derive(Debug, Default)]
struct Config {
    event_interval: Option<u32>,
    unhandled_error: Option<UnhandledError>,
}

impl Config {
    fn from_args(entry: Entry, input: &ItemFn, args: AttributeArgs) -> syn::Result<Self> {
        if input.sig.asyncness.is_none() {
            let msg = "the `async` keyword is missing from the function declaration";
            return Err(syn::Error::new_spanned(input.sig.fn_token, msg));
        }

        let mut config = Config::default();

        for arg in args {
            let namevalue = match arg {
                syn::Meta::NameValue(namevalue) => namevalue,
                syn::Meta::Path(path) => {
                    let msg = match path.get_ident().map(|ident| ident.to_string()) {
                        Some(name) if name == "event_interval" || name == "unhandled_error" => {
                            format!("`{name}` requires a value, e.g. `#[{}({name} = ...)]`", entry.name())
                        }
                        _ => format!("unknown argument, expected one of: {KNOWN_ARGS}"),
                    };
                    return Err(syn::Error::new_spanned(path, msg));
                }
                other => {
                    let msg = format!("unknown argument, expected one of: {KNOWN_ARGS}");
                    return Err(syn::Error::new_spanned(other, msg));
                }
            };

            let name = namevalue
                .path
                .get_ident()
                .ok_or_else(|| syn::Error::new_spanned(&namevalue.path, "expected an identifier"))?
                .to_string();

            let syn::Expr::Lit(syn::ExprLit { lit, .. }) = &namevalue.value else {
                return Err(syn::Error::new_spanned(&namevalue.value, "expected a literal"));
            };

            match name.as_str() {
                "event_interval" => {
                    if config.event_interval.is_some() {
                        return Err(syn::Error::new_spanned(lit, "`event_interval` set multiple times"));
                    }

                    let interval = lit_u32(lit, "event_interval")?;
                    if interval == 0 {
                        return Err(syn::Error::new_spanned(lit, "`event_interval` may not be 0"));
                    }
                    config.event_interval = Some(interval);
                }
                "unhandled_error" => {
                    if config.unhandled_error.is_some() {
                        return Err(syn::Error::new_spanned(lit, "`unhandled_error` set multiple times"));
                    }

                    let policy = lit_str(lit, "unhandled_error")?;
                    let policy =
                        UnhandledError::parse(&policy).map_err(|msg| syn::Error::new_spanned(lit, msg))?;
                    config.unhandled_error = Some(policy);
                }
                _ => {
                    let msg = format!("unknown argument `{name}`, expected one of: {KNOWN_ARGS}");
                    return Err(syn::Error::new_spanned(namevalue, msg));
                }
            }
        }

        Ok(config)
    }
}

pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(Entry::Main, args, item)
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(Entry::Test, args, item)
}

// On a bad argument the function still expands, with the default config, next
// to the error. Keeps IDE completion working inside the body.
fn expand(entry: Entry, args: TokenStream, item: TokenStream) -> TokenStream {
    let input: ItemFn = match syn::parse2(item.clone()) {
        Ok(input) => input,
        Err(err) => return with_error(item, err),
    };

    let config = check_signature(entry, &input)
        .and_then(|()| AttributeArgs::parse_terminated.parse2(args))
        .and_then(|args| Config::from_args(entry, &input, args));

    match config {
        Ok(config) => generate(entry, input, &config),
        Err(err) => with_error(generate(entry, input, &Config::default()), err),
    }
}

fn check_signature(entry: Entry, input: &ItemFn) -> syn::Result<()> {
    match entry {
        Entry::Main if input.sig.ident == "main" && !input.sig.inputs.is_empty() => Err(
            syn::Error::new_spanned(&input.sig.ident, "the main function cannot accept arguments"),
        ),
        Entry::Test => match input.attrs().find(|attr| is_test_attribute(attr)) {
            Some(attr) => Err(syn::Error::new_spanned(
                attr,
                "second test attribute is supplied, remove it or put it after `#[fibra::test]`",
            )),
            None => Ok(()),
        },
        Entry::Main => Ok(()),
    }
}

fn generate(entry: Entry, mut input: ItemFn, config: &Config) -> TokenStream {
    input.sig.asyncness = None;

    // A mismatched output type is reported on the last statement.
    let (start, end) = input.last_stmt_spans();

    let mut rt = quote_spanned! {start=> fibra::runtime::Builder::new_local() };

    if let Some(interval) = config.event_interval {
        rt = quote_spanned! {start=> #rt.event_interval(#interval) };
    }

    if let Some(policy) = config.unhandled_error {
        let policy = policy.path();
        rt = quote_spanned! {start=> #rt.unhandled_error(#policy) };
    }

    let generated_attrs = match entry {
        Entry::Test => quote! { #[::core::prelude::v1::test] },
        Entry::Main => quote! {},
    };

    let body = input.body();

    // Tests block on a `Pin<&mut dyn Future>` so that every test shares one
    // instantiation of `block_on`.
    let body = match entry {
        Entry::Test => {
            let output = match &input.sig.output {
                syn::ReturnType::Default => quote! { () },
                syn::ReturnType::Type(_, ty) => quote! { #ty },
            };

            quote! {
                let body = async #body;
                let body = ::core::pin::pin!(body);
                let body: ::core::pin::Pin<&mut dyn ::core::future::Future<Output = #output>> = body;
            }
        }
        Entry::Main => quote! {
            let body = async #body;
        },
    };

    let tail = quote_spanned! {end=>
        #[allow(clippy::expect_used, clippy::needless_return)]
        {
            return #rt
                .try_build()
                .expect("failed to build the fibra runtime")
                .block_on(body);
        }
    };

    input.into_tokens(generated_attrs, body, tail)
}

use proc_macro2::{Span, TokenStream, TokenTree};
use quote::ToTokens;
use syn::parse::{Parse, ParseStream};
use syn::{Attribute, Signature, Visibility, braced};

pub(crate) fn lit_str(lit: &syn::Lit, field: &str) -> syn::Result<String> {
    match lit {
        syn::Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new(
            other.span(),
            format!("expected a string literal for `{field}`"),
        )),
    }
}

pub(crate) fn lit_u32(lit: &syn::Lit, field: &str) -> syn::Result<u32> {
    match lit {
        syn::Lit::Int(int) => int.base10_parse::<u32>().map_err(|err| {
            syn::Error::new(int.span(), format!("invalid value for `{field}`: {err}"))
        }),
        other => Err(syn::Error::new(
            other.span(),
            format!("expected an integer literal for `{field}`"),
        )),
    }
}

/// Matches `#[test]`, `#[std::prelude::v1::test]` and the like.
pub(crate) fn is_test_attribute(attr: &Attribute) -> bool {
    let syn::Meta::Path(path) = &attr.meta else {
        return false;
    };

    if path.segments.iter().any(|segment| !segment.arguments.is_none()) {
        return false;
    }

    let segments: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();
    match segments.as_slice() {
        [name] => path.leading_colon.is_none() && name == "test",
        [krate, prelude, _, name] => {
            (krate == "std" || krate == "core") && prelude == "prelude" && name == "test"
        }
        _ => false,
    }
}

/// Appends `error` to `tokens`, so the item still expands next to the
/// diagnostic.
pub(crate) fn with_error(mut tokens: TokenStream, error: syn::Error) -> TokenStream {
    tokens.extend(error.into_compile_error());
    tokens
}

/// A function item whose body is kept as raw statements, split on `;`.
pub(crate) struct ItemFn {
    outer_attrs: Vec<Attribute>,
    pub(crate) vis: Visibility,
    pub(crate) sig: Signature,
    brace_token: syn::token::Brace,
    inner_attrs: Vec<Attribute>,
    stmts: Vec<TokenStream>,
}

impl ItemFn {
    pub(crate) fn attrs(&self) -> impl Iterator<Item = &Attribute> {
        self.outer_attrs.iter().chain(self.inner_attrs.iter())
    }

    pub(crate) fn body(&self) -> Body<'_> {
        Body {
            brace_token: self.brace_token,
            stmts: &self.stmts,
        }
    }

    /// First and last span of the final statement. Type errors on the output
    /// are reported there.
    pub(crate) fn last_stmt_spans(&self) -> (Span, Span) {
        let mut tokens = self
            .stmts
            .last()
            .cloned()
            .unwrap_or_default()
            .into_iter();

        let start = tokens.next().map_or_else(Span::call_site, |t| t.span());
        let end = tokens.last().map_or(start, |t| t.span());
        (start, end)
    }

    /// Re-emits the function with `generated_attrs` appended to its
    /// attributes and `body` followed by `tail` as its block.
    pub(crate) fn into_tokens(
        self,
        generated_attrs: TokenStream,
        body: TokenStream,
        tail: TokenStream,
    ) -> TokenStream {
        let mut tokens = TokenStream::new();

        for attr in self.outer_attrs {
            attr.to_tokens(&mut tokens);
        }

        // Blocks do not take inner attributes, they move to the function.
        for mut attr in self.inner_attrs {
            attr.style = syn::AttrStyle::Outer;
            attr.to_tokens(&mut tokens);
        }

        generated_attrs.to_tokens(&mut tokens);

        self.vis.to_tokens(&mut tokens);
        self.sig.to_tokens(&mut tokens);

        self.brace_token.surround(&mut tokens, |tokens| {
            body.to_tokens(tokens);
            tail.to_tokens(tokens);
        });

        tokens
    }
}

impl Parse for ItemFn {
    fn parse(input: ParseStream<'_>) -> syn::Result<Self> {
        let outer_attrs = input.call(Attribute::parse_outer)?;
        let vis: Visibility = input.parse()?;
        let sig: Signature = input.parse()?;

        let content;
        let brace_token = braced!(content in input);
        let inner_attrs = Attribute::parse_inner(&content)?;

        // Statements are only split, never parsed: the body is emitted as is.
        let mut stmts = Vec::new();
        let mut stmt = TokenStream::new();

        while !content.is_empty() {
            if let Some(semi) = content.parse::<Option<syn::Token![;]>>()? {
                semi.to_tokens(&mut stmt);
                stmts.push(std::mem::take(&mut stmt));
                continue;
            }

            stmt.extend([content.parse::<TokenTree>()?]);
        }

        if !stmt.is_empty() {
            stmts.push(stmt);
        }

        Ok(Self {
            outer_attrs,
            vis,
            sig,
            brace_token,
            inner_attrs,
            stmts,
        })
    }
}

pub(crate) struct Body<'a> {
    brace_token: syn::token::Brace,
    stmts: &'a [TokenStream],
}

impl ToTokens for Body<'_> {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        self.brace_token.surround(tokens, |tokens| {
            for stmt in self.stmts {
                stmt.to_tokens(tokens);
            }
        });
    }
}

use proc_macro2::{Span, TokenStream, TokenTree};
use quote::quote;
use syn::{parse_macro_input, Data, DataEnum, DataUnion, DeriveInput, Error, Meta, MetaList};

/// Derives the `utils::bytes::Cast` marker for a wire struct.
///
/// The struct must carry an explicit `repr(C)`, `repr(C, packed)` or
/// `repr(transparent)`, may not be generic, and every field must itself be
/// `Cast`. For `repr(C)` a compile-time assertion rejects any layout with
/// padding bytes, since padding would be observable through the cast.
#[proc_macro_derive(Cast)]
pub fn cast(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
	let DeriveInput { attrs, ident: name, generics, data, .. } = parse_macro_input!(item as DeriveInput);

	if !generics.params.is_empty() {
		return Error::new(Span::call_site(), "Generic structs are not supported.")
			.to_compile_error()
			.into();
	}

	// Whether "C" or "transparent" has been seen, and whether "packed" has.
	let mut base = false;
	let mut packed = false;

	for attr in attrs {
		let Meta::List(MetaList { path, tokens, .. }) = attr.meta else { continue };

		if !path.is_ident("repr") {
			continue;
		}

		for token in tokens.into_iter() {
			match token {
				TokenTree::Ident(ident) if ident == "C" || ident == "transparent" => base = true,
				TokenTree::Ident(ident) if ident == "packed" => packed = true,
				TokenTree::Punct(punct) if punct.as_char() == ',' => {}
				_ => return Error::new(token.span(), "Unexpected token").to_compile_error().into(),
			}
		}
	}

	if !base {
		return Error::new(Span::call_site(), "Struct needs explicit repr(C) or repr(transparent)")
			.to_compile_error()
			.into();
	}

	let fields = match data {
		Data::Struct(obj) => obj.fields,
		Data::Enum(DataEnum { enum_token, .. }) => return Error::new_spanned(enum_token, "Enums are not supported.").to_compile_error().into(),
		Data::Union(DataUnion { union_token, .. }) => return Error::new_spanned(union_token, "Unions are not supported.").to_compile_error().into(),
	};

	let mut bounds = TokenStream::new();
	let mut sizes = quote! { 0usize };

	for field in fields {
		let ty = field.ty;

		bounds.extend(quote! {
			const _: fn() = || {
				fn assert_cast<T: ::utils::bytes::Cast>() {}
				assert_cast::<#ty>();
			};
		});

		sizes.extend(quote! { + ::core::mem::size_of::<#ty>() });
	}

	// repr(packed) structures can never contain padding.
	let no_padding = if packed {
		TokenStream::new()
	} else {
		quote! {
			const _: () = assert!(
				::core::mem::size_of::<#name>() == #sizes,
				concat!(stringify!(#name), " has padding bytes")
			);
		}
	};

	quote! {
		#bounds
		#no_padding

		unsafe impl ::utils::bytes::Cast for #name {}
	}
	.into()
}

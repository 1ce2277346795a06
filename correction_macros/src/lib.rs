use heck::ToSnakeCase;
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, ItemStruct};

/// Adds the annotated correction to `CorrectionRegistry` before `main` runs.
///
/// The struct must implement `Correction` and be constructible through `Correction::new`, so
/// generic structs are rejected.
///
/// ```ignore
/// #[register_correction]
/// #[derive(Clone, Debug, Default)]
/// pub struct ZingerRemoval {
///     pub dif: f32,
///     pub size: usize,
/// }
/// ```
#[proc_macro_attribute]
pub fn register_correction(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let correction = parse_macro_input!(item as ItemStruct);
    if !correction.generics.params.is_empty() {
        return syn::Error::new_spanned(
            &correction.generics,
            "registered corrections cannot be generic",
        )
        .to_compile_error()
        .into();
    }

    let ident = &correction.ident;
    let register = format_ident!(
        "register_correction_{}",
        ident.to_string().to_snake_case(),
        span = ident.span()
    );

    quote! {
        #correction

        #[doc(hidden)]
        #[ctor::ctor]
        fn #register() {
            crate::corrections::correction::CorrectionRegistry::register_correction::<#ident>();
        }
    }
    .into()
}

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Entry-point attribute: wraps the annotated function's body as a single
/// effect and interprets it with `effectum::runtime::unsafe_run_sync`.
///
/// ```ignore
/// #[effectum::main]
/// fn main() -> effectum::Effect<std::io::Error, ()> {
///     effectum::Effect::pure(()).map(|_| println!("hello"))
/// }
/// ```
#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);

    let attributes = &item.attrs;
    let visibility = &item.vis;
    let signature = &item.sig;
    let body = &item.block;

    let result = quote! {
        #(#attributes)*
        #visibility #signature {
            let __effectum_effect = (move || #body)();
            ::effectum::runtime::unsafe_run_sync(__effectum_effect)
                .expect("effectum: unhandled error escaped #[effectum::main]")
        }
    };

    result.into()
}

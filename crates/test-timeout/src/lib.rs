//! `#[test_timeout::timeout]` runs a synchronous test on a watchdog thread
//! and fails it once the deadline passes.
//!
//! ```ignore
//! #[test_timeout::timeout]          // 10s
//! #[test_timeout::timeout(3)]       // 3s
//! #[test_timeout::timeout("750ms")]
//! fn accepts_within_deadline() { /* ... */ }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, Lit};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let timeout_ms = if attr.is_empty() {
        DEFAULT_TIMEOUT_MS
    } else {
        let lit = parse_macro_input!(attr as Lit);
        match parse_timeout(&lit) {
            Ok(ms) => ms,
            Err(err) => return err.to_compile_error().into(),
        }
    };

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();
    let test_name = sig.ident.to_string();

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_millis(#timeout_ms);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::Builder::new()
                .name(format!("{}-watchdog", #test_name))
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #block));
                    let _ = sender.send(result);
                })
                .expect("failed to spawn test thread");
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("{} timed out after {:?}", #test_name, timeout_duration)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

/// Integers are seconds; strings take an `ms` or `s` suffix.
fn parse_timeout(lit: &Lit) -> Result<u64, syn::Error> {
    let ms = match lit {
        Lit::Int(int) => int.base10_parse::<u64>()?.saturating_mul(1_000),
        Lit::Str(text) => {
            let value = text.value();
            let value = value.trim();
            let parsed = if let Some(ms) = value.strip_suffix("ms") {
                ms.trim().parse::<u64>().ok()
            } else if let Some(secs) = value.strip_suffix('s') {
                secs.trim().parse::<u64>().ok().map(|s| s.saturating_mul(1_000))
            } else {
                None
            };
            parsed.ok_or_else(|| {
                syn::Error::new_spanned(text, "expected a duration like \"500ms\" or \"3s\"")
            })?
        }
        other => {
            return Err(syn::Error::new_spanned(
                other,
                "timeout takes an integer number of seconds or a duration string",
            ))
        }
    };
    if ms == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(ms)
}

fn is_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!((segments.next(), segments.next()), (Some(first), None) if first.ident == "test")
}

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ImplItem, ImplItemFn, ItemImpl, Stmt, Visibility};

/// Procedural macro that injects a logging context into the public methods of an impl block
///
/// Every synchronous `pub fn` gets
/// `let _waypoint_logger_ctx = crate::primitives::logger::LogContext::new("TypeName");`
/// as its first statement, so log lines emitted inside are prefixed with `[TypeName]`.
///
/// `async fn`s are left untouched: the context lives in thread-local storage and
/// cannot follow a future that moves between worker threads.
///
/// # Usage
///
/// ```rust,ignore
/// #[log_scope]
/// impl MyStruct {
///     pub fn some_method(&self) -> String {
///         info!("prefixed with [MyStruct]");
///         "result".to_string()
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn log_scope(_args: TokenStream, input: TokenStream) -> TokenStream {
    let input_impl = parse_macro_input!(input as ItemImpl);

    let type_name = match &*input_impl.self_ty {
        syn::Type::Path(type_path) => type_path.path.segments.last().map_or_else(
            || "Unknown".to_string(),
            |segment| segment.ident.to_string(),
        ),
        _ => "Unknown".to_string(),
    };

    let new_items = input_impl
        .items
        .iter()
        .map(|item| match item {
            ImplItem::Fn(method) if is_scoped_method(method) => {
                let mut new_method = method.clone();
                inject_logging_context(&mut new_method, &type_name);
                ImplItem::Fn(new_method)
            }
            _ => item.clone(),
        })
        .collect();

    let new_impl = ItemImpl {
        items: new_items,
        ..input_impl
    };

    quote! {
        #new_impl
    }
    .into()
}

/// Public and synchronous methods receive a logging context
fn is_scoped_method(method: &ImplItemFn) -> bool {
    matches!(method.vis, Visibility::Public(_)) && method.sig.asyncness.is_none()
}

/// Inject logging context at the start of a function body
fn inject_logging_context(method: &mut ImplItemFn, type_name: &str) {
    let context_stmt: Stmt = syn::parse_quote! {
        let _waypoint_logger_ctx = crate::primitives::logger::LogContext::new(#type_name);
    };

    method.block.stmts.insert(0, context_stmt);
}

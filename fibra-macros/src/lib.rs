#![allow(clippy::needless_doctest_main)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Entry point attributes for the fibra runtime.

mod entry;
mod parse;

/// Runs an `async fn main` on a fibra runtime built for the current thread.
///
/// The function body becomes the root future passed to `block_on`, so `main`
/// returns once the body, every future it created and every task it started
/// completed.
///
/// ```no_run
/// #[fibra::main]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// Equivalent code not using `#[fibra::main]`
///
/// ```no_run
/// fn main() {
///     fibra::runtime::Builder::new_local()
///         .try_build()
///         .expect("failed to build the fibra runtime")
///         .block_on(async {
///             println!("Hello world");
///         })
/// }
/// ```
///
/// # Arguments
///
/// - `event_interval = N`: tasks polled per loop iteration before timers and
///   callbacks get a turn again.
/// - `unhandled_error = "log" | "panic"`: what happens to a task error that no
///   completion handler received.
///
/// ```no_run
/// #[fibra::main(event_interval = 16, unhandled_error = "panic")]
/// async fn main() -> fibra::Result<()> {
///     fibra::sleep(std::time::Duration::from_millis(10)).await?;
///     Ok(())
/// }
/// ```
///
/// The function may not take arguments.
///
/// # Rejected arguments
///
/// Unknown arguments are a compile error:
///
/// ```compile_fail
/// #[fibra::main(flavor = "current_thread")]
/// async fn main() {}
/// ```
///
/// So are unknown policies:
///
/// ```compile_fail
/// #[fibra::main(unhandled_error = "ignore")]
/// async fn main() {}
/// ```
///
/// An argument given twice:
///
/// ```compile_fail
/// #[fibra::main(event_interval = 4, event_interval = 8)]
/// async fn main() {}
/// ```
///
/// An `event_interval` of zero:
///
/// ```compile_fail
/// #[fibra::main(event_interval = 0)]
/// async fn main() {}
/// ```
///
/// And a missing `async`:
///
/// ```compile_fail
/// #[fibra::main]
/// fn main() {}
/// ```
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Runs an `async fn` test on its own fibra runtime.
///
/// Accepts the same arguments as [`macro@main`].
///
/// ```ignore
/// #[fibra::test]
/// async fn my_test() -> fibra::Result<()> {
///     let sum = fibra::spawn(async { 1 + 2 }).await?;
///     assert_eq!(sum, 3);
///     Ok(())
/// }
/// ```
///
/// Equivalent code not using `#[fibra::test]`
///
/// ```ignore
/// #[test]
/// fn my_test() -> fibra::Result<()> {
///     fibra::runtime::Builder::new_local()
///         .try_build()
///         .expect("failed to build the fibra runtime")
///         .block_on(async {
///             let sum = fibra::spawn(async { 1 + 2 }).await?;
///             assert_eq!(sum, 3);
///             Ok(())
///         })
/// }
/// ```
///
/// Combines with `rstest` when placed after it:
///
/// ```ignore
/// use rstest::rstest;
///
/// #[rstest]
/// #[case(1)]
/// #[case(2)]
/// #[fibra::test(unhandled_error = "panic")]
/// async fn my_test(#[case] n: u32) {
///     assert!(n > 0);
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}

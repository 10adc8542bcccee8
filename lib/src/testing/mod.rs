//! Result-returning test harness.
//!
//! Tests are plain `fn() -> TestResult` items checked with the macros in
//! `assertions`; [`define_test_suite!`](crate::define_test_suite) wraps a list
//! of them into `#[test]` functions so `cargo test` drives them.

use core::fmt;

mod assertions;
mod runner;

pub use runner::run_single_test;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    Skipped,
}

impl TestResult {
    #[inline]
    pub fn is_pass(&self) -> bool {
        *self == Self::Pass
    }

    /// `Skipped` is not a failure.
    #[inline]
    pub fn is_failure(&self) -> bool {
        *self == Self::Fail
    }
}

#[doc(hidden)]
pub fn report_failure(check: &str, detail: fmt::Arguments<'_>, note: Option<fmt::Arguments<'_>>) {
    match note {
        Some(note) => crate::klog_error!("{check} failed: {note} ({detail})"),
        None => crate::klog_error!("{check} failed: {detail}"),
    }
}

#[macro_export]
macro_rules! pass {
    () => {
        $crate::testing::TestResult::Pass
    };
}

/// Evaluates to `TestResult::Fail`, logging the message if one is given.
#[macro_export]
macro_rules! fail {
    () => {
        $crate::testing::TestResult::Fail
    };
    ($($msg:tt)+) => {{
        $crate::testing::report_failure(
            "test",
            ::core::format_args!($($msg)+),
            ::core::option::Option::None,
        );
        $crate::testing::TestResult::Fail
    }};
}

/// Expands to a `<suite>_suite` module holding one `#[test]` per listed
/// function; the `#[test]` panics only on `Fail`.
#[macro_export]
macro_rules! define_test_suite {
    ($suite:ident, [$($case:ident),* $(,)?]) => {
        $crate::paste::paste! {
            #[cfg(test)]
            mod [<$suite _suite>] {
                $(
                    #[test]
                    fn $case() {
                        let name = ::core::concat!(
                            ::core::stringify!($suite), "::", ::core::stringify!($case)
                        );
                        let outcome = $crate::testing::run_single_test(name, super::$case);
                        assert!(!outcome.is_failure(), "{name} failed");
                    }
                )*
            }
        }
    };
}

//! Early-return checks for `fn() -> TestResult` bodies.
//!
//! A failed check reports through [`report_failure`](super::report_failure)
//! and returns `TestResult::Fail` from the enclosing function, so one test can
//! hold several checks without unwinding. Every macro takes an optional
//! trailing format message.

#[macro_export]
macro_rules! assert_test {
    ($cond:expr $(, $($msg:tt)+)?) => {
        if !$cond {
            $crate::testing::report_failure(
                "assert",
                ::core::format_args!("{}", ::core::stringify!($cond)),
                $crate::__test_note!($($($msg)+)?),
            );
            return $crate::testing::TestResult::Fail;
        }
    };
}

#[macro_export]
macro_rules! assert_eq_test {
    ($left:expr, $right:expr $(, $($msg:tt)+)?) => {
        match (&$left, &$right) {
            (got, want) => {
                if *got != *want {
                    $crate::testing::report_failure(
                        "assert_eq",
                        ::core::format_args!("want {:?}, got {:?}", want, got),
                        $crate::__test_note!($($($msg)+)?),
                    );
                    return $crate::testing::TestResult::Fail;
                }
            }
        }
    };
}

#[macro_export]
macro_rules! assert_ne_test {
    ($left:expr, $right:expr $(, $($msg:tt)+)?) => {
        match (&$left, &$right) {
            (a, b) => {
                if *a == *b {
                    $crate::testing::report_failure(
                        "assert_ne",
                        ::core::format_args!("both sides are {:?}", a),
                        $crate::__test_note!($($($msg)+)?),
                    );
                    return $crate::testing::TestResult::Fail;
                }
            }
        }
    };
}

/// Unwraps `Ok`, or fails the test with the error.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr $(, $($msg:tt)+)?) => {
        match $result {
            ::core::result::Result::Ok(value) => value,
            ::core::result::Result::Err(err) => {
                $crate::testing::report_failure(
                    "assert_ok",
                    ::core::format_args!("got Err({:?})", err),
                    $crate::__test_note!($($($msg)+)?),
                );
                return $crate::testing::TestResult::Fail;
            }
        }
    };
}

/// Requires `Err(expected)`; any `Ok` or other error fails the test.
#[macro_export]
macro_rules! assert_err {
    ($result:expr, $expected:expr $(, $($msg:tt)+)?) => {
        match ($result, $expected) {
            (::core::result::Result::Err(err), want) if err == want => {}
            (other, want) => {
                $crate::testing::report_failure(
                    "assert_err",
                    ::core::format_args!("want Err({:?}), got {:?}", want, other),
                    $crate::__test_note!($($($msg)+)?),
                );
                return $crate::testing::TestResult::Fail;
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __test_note {
    () => {
        ::core::option::Option::None
    };
    ($($msg:tt)+) => {
        ::core::option::Option::Some(::core::format_args!($($msg)+))
    };
}

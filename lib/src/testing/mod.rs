//! In-crate test harness, in the same idiom `slopos`'s kernel-side tests use
//! instead of `#[test]`: a `TestResult` every test function returns, a
//! handful of `assert_*_test!` macros that `return Fail` early, and
//! `define_test_suite!` to roll a list of test functions into one runnable
//! suite.
//!
//! The teacher's version also auto-registers suites into a
//! `.test_registry` link-section so a freestanding kernel binary can
//! discover and run them without a `main` that names them. That trick needs
//! a linker script this crate pair doesn't ship (it isn't a bootable
//! kernel), so suites here are plain functions a test module calls directly
//! — still not `#[test]`, but without the registry machinery.

pub mod assertions;
pub mod harness;

pub use harness::{TestRunSummary, TestSuiteResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestResult {
    Pass,
    Fail,
    Skipped,
}

impl TestResult {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// Run a single test function, logging its name and outcome.
pub fn run_single_test(name: &str, f: impl FnOnce() -> TestResult) -> TestResult {
    let result = f();
    match result {
        TestResult::Pass => crate::klog_debug!("test {} ... ok", name),
        TestResult::Skipped => crate::klog_debug!("test {} ... skipped", name),
        TestResult::Fail => crate::klog_info!("test {} ... FAILED", name),
    }
    result
}

#[macro_export]
macro_rules! pass {
    () => {
        $crate::testing::TestResult::Pass
    };
}

#[macro_export]
macro_rules! fail {
    () => {
        $crate::testing::TestResult::Fail
    };
    ($msg:expr) => {{
        $crate::klog_info!("TEST FAIL: {}", $msg);
        $crate::testing::TestResult::Fail
    }};
    ($fmt:expr, $($arg:tt)*) => {{
        $crate::klog_info!(concat!("TEST FAIL: ", $fmt), $($arg)*);
        $crate::testing::TestResult::Fail
    }};
}

#[macro_export]
macro_rules! run_test {
    ($passed:expr, $total:expr, $test_fn:expr) => {{
        $total += 1;
        let result = $crate::testing::run_single_test(stringify!($test_fn), || $test_fn());
        if result.is_pass() {
            $passed += 1;
        }
        result
    }};

    ($test_fn:expr) => {{ $crate::testing::run_single_test(stringify!($test_fn), || $test_fn()) }};

    ($name:expr, $test_fn:expr) => {{ $crate::testing::run_single_test($name, || $test_fn()) }};
}

/// Roll a list of test functions (each returning [`TestResult`]) into one
/// named suite runner, `$suite_fn`, that returns a [`TestSuiteResult`].
#[macro_export]
macro_rules! define_test_suite {
    ($suite_fn:ident, $suite_name:expr, [$($test_fn:path),* $(,)?]) => {
        pub fn $suite_fn() -> $crate::testing::TestSuiteResult {
            let mut passed = 0u32;
            let mut total = 0u32;

            $(
                $crate::run_test!(passed, total, $test_fn);
            )*

            let mut result = $crate::testing::TestSuiteResult::new($suite_name);
            result.fill(passed, total);
            result
        }
    };
}

//! Custom assertion macros and utilities
//!
//! Provides enhanced assertion macros for better test output and
//! more descriptive error messages. Macros are exported at the crate root,
//! so call them as `crate::assert_ran!` from test modules.

/// Assert that a result is ok and return the value
///
/// This macro unwraps a Result, providing a better error message
/// if the result is an error.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is an error
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        assert!($result.is_err(), "Expected Err, got Ok");
    };
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {}
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => panic!("Expected different error variant, got: {:?}", e),
        }
    };
}

/// Assert that a string contains a substring
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {{
        let haystack = $haystack;
        assert!(
            haystack.contains($needle),
            "Expected '{}' to contain '{}'",
            haystack,
            $needle
        );
    }};
}

/// Assert that an orchestrator request ran and return its report
#[macro_export]
macro_rules! assert_ran {
    ($outcome:expr) => {
        match $outcome {
            kioku::client::sync::SyncOutcome::Ran(report) => report,
            other => panic!("Expected the sync to run, got {:?}", other),
        }
    };
}

/// Assert that a drain stopped the expected way
#[macro_export]
macro_rules! assert_drain {
    ($report:expr, $pattern:pat) => {
        match &$report.outcome {
            $pattern => {}
            other => panic!("Unexpected drain outcome: {:?}", other),
        }
    };
}

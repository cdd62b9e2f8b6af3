//! End-to-end validation of a generated project

mod test_runner;

pub use test_runner::{INSTALL_FAILED, NO_TEST_FILE, TEST_TIMED_OUT_OUTPUT, TestRunner, TestRunnerConfig};

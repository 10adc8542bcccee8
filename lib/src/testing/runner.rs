use super::TestResult;

pub fn run_single_test<F>(name: &str, case: F) -> TestResult
where
    F: FnOnce() -> TestResult,
{
    crate::klog_debug!("test {name}: start");
    let outcome = case();
    match outcome {
        TestResult::Pass => crate::klog_debug!("test {name}: pass"),
        TestResult::Skipped => crate::klog_info!("test {name}: skipped"),
        TestResult::Fail => crate::klog_error!("test {name}: FAIL"),
    }
    outcome
}

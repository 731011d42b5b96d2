use crate::metrics::StatsCollector;
use crate::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry_times: u32,
    pub priority_adjust: i32,
}

/// Builds the next attempt for `request`, or `None` once the ceiling is hit.
///
/// Counts `{base_key}/count` and `{base_key}/reason_count/{reason}` for a
/// retry, `{base_key}/max_reached` when giving up.
pub fn get_retry_request(
    request: &Request,
    reason: &str,
    policy: RetryPolicy,
    stats: &StatsCollector,
    base_key: &str,
) -> Option<Request> {
    let retry_times = request.retry_times + 1;

    if retry_times <= policy.max_retry_times {
        log::debug!(
            "Retrying {} (failed {} times): {}",
            request,
            retry_times,
            reason
        );
        let mut new_request = request.clone();
        new_request.retry_times = retry_times;
        new_request.dont_filter = true;
        new_request.priority = request.priority + policy.priority_adjust;

        stats.inc_value(format!("{}/count", base_key));
        stats.inc_value(format!("{}/reason_count/{}", base_key, reason));
        Some(new_request)
    } else {
        stats.inc_value(format!("{}/max_reached", base_key));
        log::error!(
            "Gave up retrying {} (failed {} times): {}",
            request,
            retry_times,
            reason
        );
        None
    }
}

//! Pool/selection/refresh counters
//!
//! Records via the `metrics` facade only — no exporter dependency here.
//! An embedding binary installs whatever recorder it wants (Prometheus,
//! statsd, …) and these calls become real once one is installed; until
//! then they are no-ops, same as the teacher platform's proxy-side
//! metrics module.

/// Record a completed `selectAccountForFamily` call.
pub fn record_selection(family: &str, mode: &str, outcome: &str) {
    metrics::counter!(
        "pool_account_selections_total",
        "family" => family.to_string(),
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}

/// Record a token refresh attempt's outcome.
pub fn record_refresh(outcome: &str) {
    metrics::counter!("pool_token_refreshes_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an account being marked rate-limited for a family.
pub fn record_rate_limit(family: &str, reason: &str) {
    metrics::counter!(
        "pool_rate_limits_total",
        "family" => family.to_string(),
        "reason" => reason.to_string(),
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn record_selection_increments_labeled_counter() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_selection("claude", "sticky", "hit");

        let output = handle.render();
        assert!(output.contains("pool_account_selections_total"));
        assert!(output.contains("family=\"claude\""));
        assert!(output.contains("mode=\"sticky\""));
        assert!(output.contains("outcome=\"hit\""));
    }

    #[test]
    fn record_refresh_and_rate_limit_do_not_panic_without_recorder() {
        record_refresh("success");
        record_rate_limit("gemini-pro", "rate-limit");
    }
}

//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。未安装导出器时，
//! 记录函数是空操作。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use super::ObservabilityConfig;

/// 安装 Prometheus 导出器并在指定端口暴露 `/metrics`
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    register_common_metrics(&config.service_name);
    info!("Metrics exporter listening on {}", addr);

    Ok(())
}

/// 注册通用指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("rule_evaluations_total", "Total number of rule evaluations");
    metrics::describe_histogram!(
        "rule_evaluation_duration_seconds",
        "Rule evaluation duration in seconds"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 记录规则评估
///
/// `outcome` 取 `matched`、`unmatched` 或 `error`。
#[inline]
pub fn record_rule_evaluation(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("rule_evaluations_total", "outcome" => outcome).increment(1);

    metrics::histogram!("rule_evaluation_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_rule_evaluation("matched", 0.01);
        record_rule_evaluation("unmatched", 0.02);
        record_rule_evaluation("error", 0.001);
    }
}

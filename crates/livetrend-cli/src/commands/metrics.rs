//! Metrics command - list the metrics the feed knows about

use anyhow::Result;
use telemetry_stream::KNOWN_METRICS;

use crate::output::{MetricRow, OutputContext};

fn describe(metric: &str) -> &'static str {
    match metric {
        "speed" => "Vehicle speed",
        "temp" => "Temperature",
        "power" => "Power draw",
        "traction" => "Traction effort",
        "brake" => "Brake effort",
        _ => "",
    }
}

pub fn metric_rows() -> Vec<MetricRow> {
    KNOWN_METRICS
        .iter()
        .map(|metric| MetricRow {
            metric: metric.to_string(),
            description: describe(metric).to_string(),
        })
        .collect()
}

/// List known metrics
pub fn metrics(ctx: &OutputContext) -> Result<()> {
    ctx.print(&metric_rows());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_metric_is_described() {
        let rows = metric_rows();
        assert_eq!(rows.len(), KNOWN_METRICS.len());
        assert!(rows.iter().all(|row| !row.description.is_empty()));
        assert_eq!(rows[0].metric, "speed");
    }
}

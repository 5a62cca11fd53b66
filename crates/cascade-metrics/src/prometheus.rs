//! Prometheus text exposition format.
//!
//! Renders queue depth gauges into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use crate::gauges::QueueGauge;

/// Render queue depth gauges into Prometheus text format.
///
/// Produces one GAUGE family with `queue` and `application` labels.
pub fn render_prometheus(application: &str, gauges: &[QueueGauge]) -> String {
    let mut out = String::new();

    out.push_str("# HELP cascade_messages_in_queue Approximate number of messages waiting in a queue.\n");
    out.push_str("# TYPE cascade_messages_in_queue gauge\n");
    for g in gauges {
        out.push_str(&format!(
            "cascade_messages_in_queue{{queue=\"{}\",application=\"{}\"}} {}\n",
            escape_label(&g.queue),
            escape_label(application),
            g.value
        ));
    }

    out
}

/// Escape a label value per the exposition format.
fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

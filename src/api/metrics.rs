//! Prometheus text-format rendering (exposition format 0.0.4).

use crate::types::CountersSnapshot;

pub fn render(stats: &CountersSnapshot, device_count: usize) -> String {
    let mut out = String::with_capacity(512);

    let mut counter = |name: &str, help: &str, value: u64| {
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} counter\n"));
        out.push_str(&format!("{name} {value}\n"));
    };

    counter(
        "niac_packets_sent_total",
        "Frames transmitted by the simulator.",
        stats.packets_sent,
    );
    counter(
        "niac_packets_received_total",
        "Frames captured from the wire.",
        stats.packets_received,
    );
    counter(
        "niac_snmp_queries_total",
        "SNMP requests answered.",
        stats.snmp_queries,
    );
    counter("niac_errors_total", "Malformed or undeliverable frames.", stats.errors);

    out.push_str("# HELP niac_devices_total Simulated devices currently configured.\n");
    out.push_str("# TYPE niac_devices_total gauge\n");
    out.push_str(&format!("niac_devices_total {device_count}\n"));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_shape() {
        let stats = CountersSnapshot { packets_sent: 10, packets_received: 20, ..Default::default() };
        let text = render(&stats, 3);
        assert!(text.contains("niac_packets_sent_total 10\n"));
        assert!(text.contains("niac_packets_received_total 20\n"));
        assert!(text.contains("niac_devices_total 3\n"));
        assert!(text.contains("# TYPE niac_devices_total gauge\n"));
    }
}

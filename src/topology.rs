//! Topology: nodes and links derived from device trunk-port config,
//! with GraphML and DOT renderers. Never persisted; rebuilt on reload.

use serde::Serialize;
use std::collections::HashMap;

use crate::config::Config;
use crate::types::DeviceState;

#[derive(Debug, Clone, Serialize)]
pub struct TopologyNode {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyLink {
    pub source: String,
    pub target: String,
    pub source_if: String,
    pub target_if: Option<String>,
    pub link_type: String,
    pub vlans: Vec<u16>,
    pub native_vlan: Option<u16>,
    pub speed: Option<String>,
    pub duplex: Option<String>,
    pub status: String,
    /// Percent, 0 when unknown.
    pub utilization: u8,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Topology {
    pub nodes: Vec<TopologyNode>,
    pub links: Vec<TopologyLink>,
}

/// Derive the topology from configuration plus live device states.
/// A link is `up` only when both ends exist and are Up.
pub fn build(config: &Config, states: &HashMap<String, DeviceState>) -> Topology {
    let mut nodes: Vec<TopologyNode> = config
        .devices
        .iter()
        .map(|d| TopologyNode {
            name: d.name.clone(),
            node_type: d.device_type.as_str().to_string(),
        })
        .collect();
    nodes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut links = Vec::new();
    let mut seen: std::collections::HashSet<(String, String, String)> =
        std::collections::HashSet::new();

    for device in &config.devices {
        for trunk in &device.trunk_ports {
            // Deduplicate the two directions of the same cable
            let key = if device.name <= trunk.peer_device {
                (device.name.clone(), trunk.peer_device.clone(), trunk.port.clone())
            } else {
                (
                    trunk.peer_device.clone(),
                    device.name.clone(),
                    trunk.peer_port.clone().unwrap_or_else(|| trunk.port.clone()),
                )
            };
            if !seen.insert(key) {
                continue;
            }

            let peer_exists = config.device(&trunk.peer_device).is_some();
            let both_up = peer_exists
                && states.get(&device.name).copied().unwrap_or(DeviceState::Up)
                    == DeviceState::Up
                && states
                    .get(&trunk.peer_device)
                    .copied()
                    .unwrap_or(DeviceState::Up)
                    == DeviceState::Up;

            links.push(TopologyLink {
                source: device.name.clone(),
                target: trunk.peer_device.clone(),
                source_if: trunk.port.clone(),
                target_if: trunk.peer_port.clone(),
                link_type: trunk.link_type.clone(),
                vlans: trunk.vlans.clone(),
                native_vlan: trunk.native_vlan,
                speed: trunk.speed.clone(),
                duplex: trunk.duplex.clone(),
                status: if both_up { "up".into() } else { "down".into() },
                utilization: 0,
            });
        }
    }
    links.sort_by(|a, b| (&a.source, &a.target, &a.source_if).cmp(&(&b.source, &b.target, &b.source_if)));

    Topology { nodes, links }
}

/// GraphML rendering of the topology.
pub fn export_graphml(topology: &Topology) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
    out.push_str("  <key id=\"type\" for=\"node\" attr.name=\"type\" attr.type=\"string\"/>\n");
    out.push_str("  <key id=\"status\" for=\"edge\" attr.name=\"status\" attr.type=\"string\"/>\n");
    out.push_str("  <graph id=\"niac\" edgedefault=\"undirected\">\n");

    for node in &topology.nodes {
        out.push_str(&format!(
            "    <node id=\"{}\"><data key=\"type\">{}</data></node>\n",
            xml_escape(&node.name),
            xml_escape(&node.node_type)
        ));
    }
    for (i, link) in topology.links.iter().enumerate() {
        out.push_str(&format!(
            "    <edge id=\"e{}\" source=\"{}\" target=\"{}\"><data key=\"status\">{}</data></edge>\n",
            i,
            xml_escape(&link.source),
            xml_escape(&link.target),
            xml_escape(&link.status)
        ));
    }

    out.push_str("  </graph>\n</graphml>\n");
    out
}

/// Graphviz DOT rendering of the topology.
pub fn export_dot(topology: &Topology) -> String {
    let mut out = String::from("graph niac {\n");
    for node in &topology.nodes {
        out.push_str(&format!(
            "  \"{}\" [shape=box, label=\"{}\\n({})\"];\n",
            node.name, node.name, node.node_type
        ));
    }
    for link in &topology.links {
        let style = if link.status == "up" { "solid" } else { "dashed" };
        out.push_str(&format!(
            "  \"{}\" -- \"{}\" [label=\"{} - {}\", style={}];\n",
            link.source,
            link.target,
            link.source_if,
            link.target_if.as_deref().unwrap_or("?"),
            style
        ));
    }
    out.push_str("}\n");
    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config::from_yaml(
            r#"
devices:
  - name: core1
    mac: "aa:bb:cc:00:00:01"
    ip: 10.0.0.1
    type: router
    trunk_ports:
      - port: ge-0/0/0
        peer_device: sw1
        peer_port: ge-1/0/24
        vlans: [10, 20]
        native_vlan: 1
  - name: sw1
    mac: "aa:bb:cc:00:00:02"
    ip: 10.0.0.2
    type: switch
    trunk_ports:
      - port: ge-1/0/24
        peer_device: core1
        peer_port: ge-0/0/0
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_nodes_and_dedup_links() {
        let topology = build(&sample(), &HashMap::new());
        assert_eq!(topology.nodes.len(), 2);
        // Both directions of the cable collapse into one link
        assert_eq!(topology.links.len(), 1);
        assert_eq!(topology.links[0].vlans, vec![10, 20]);
        assert_eq!(topology.links[0].status, "up");
    }

    #[test]
    fn test_link_down_when_peer_down() {
        let mut states = HashMap::new();
        states.insert("sw1".to_string(), DeviceState::Down);
        let topology = build(&sample(), &states);
        assert_eq!(topology.links[0].status, "down");
    }

    #[test]
    fn test_graphml_well_formed_bits() {
        let topology = build(&sample(), &HashMap::new());
        let xml = export_graphml(&topology);
        assert!(xml.contains("<node id=\"core1\">"));
        assert!(xml.contains("edgedefault=\"undirected\""));
        assert!(xml.ends_with("</graphml>\n"));
    }

    #[test]
    fn test_dot_contains_edge() {
        let topology = build(&sample(), &HashMap::new());
        let dot = export_dot(&topology);
        assert!(dot.starts_with("graph niac {"));
        assert!(dot.contains("\"core1\" -- \"sw1\""));
    }
}

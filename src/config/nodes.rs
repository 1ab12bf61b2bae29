//! 节点描述文件加载
//!
//! 文件格式为 JSON 数组，每项对应一个 `Node`

use std::collections::HashSet;
use std::path::Path;

use tokio::fs;
use tracing::info;

use crate::domain::{is_plain_dir_name, is_valid_mac, Node};
use crate::error::{DeployError, DeployResult};

/// 从 JSON 文件加载节点列表
pub async fn load_nodes(path: &Path) -> DeployResult<Vec<Node>> {
    let content = fs::read_to_string(path).await.map_err(|e| {
        DeployError::config(format!("failed to read nodes file {}: {}", path.display(), e))
    })?;

    let nodes = parse_nodes(&content)
        .map_err(|e| DeployError::config(format!("{}: {}", path.display(), e)))?;

    info!(path = %path.display(), count = nodes.len(), "Loaded node descriptors");
    Ok(nodes)
}

/// 解析并校验节点列表
pub fn parse_nodes(content: &str) -> Result<Vec<Node>, String> {
    let nodes: Vec<Node> =
        serde_json::from_str(content).map_err(|e| format!("invalid nodes JSON: {}", e))?;

    let mut macs = HashSet::new();
    let mut links = HashSet::new();
    for node in &nodes {
        if node.mac_address.is_empty() || node.ip_address.is_empty() {
            return Err(format!("node {} is missing MAC or IP address", node.hostname));
        }
        // MAC 与目录覆盖都会成为 fs_root 下的目录名，旧目录在解包前会被整体删除
        if !is_valid_mac(&node.mac_address) {
            return Err(format!(
                "node {} has malformed MAC address \"{}\"",
                node.hostname, node.mac_address
            ));
        }
        if let Some(name) = node.nfs_folder_name.as_deref().filter(|n| !n.is_empty()) {
            if !is_plain_dir_name(name) {
                return Err(format!(
                    "node {} has nfs_folder_name \"{}\": must be a single directory name",
                    node.hostname, name
                ));
            }
        }
        if !macs.insert(node.mac_address.to_lowercase()) {
            return Err(format!("duplicate MAC address {}", node.mac_address));
        }
        // 两个节点共用一个 PoE 端口会互相断电
        if !links.insert(node.router_port_link) {
            return Err(format!(
                "router port ether{} is assigned to more than one node",
                node.router_port_link
            ));
        }
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_NODES: &str = r#"[
        {"hostname": "csl-1", "ip_address": "10.0.0.11", "mac_address": "aa:bb:cc:00:00:01",
         "username": "root", "password": "pw", "port": 22, "router_port_link": 2},
        {"hostname": "csl-2", "ip_address": "10.0.0.12", "mac_address": "aa:bb:cc:00:00:02",
         "username": "root", "password": "pw", "router_port_link": 3, "nfs_folder_name": "bench"}
    ]"#;

    #[test]
    fn test_parse_nodes() {
        let nodes = parse_nodes(TWO_NODES).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].nfs_folder_name.as_deref(), Some("bench"));
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let json = TWO_NODES.replace("\"router_port_link\": 3", "\"router_port_link\": 2");
        let err = parse_nodes(&json).unwrap_err();
        assert!(err.contains("ether2"));
    }

    #[test]
    fn test_duplicate_mac_rejected() {
        let json = TWO_NODES.replace("aa:bb:cc:00:00:02", "AA:BB:CC:00:00:01");
        assert!(parse_nodes(&json).unwrap_err().contains("duplicate MAC"));
    }

    #[test]
    fn test_folder_override_must_stay_under_fs_root() {
        for bad in ["..", ".", "../precious", "/", "/srv/pxe", "bench/a"] {
            let json = TWO_NODES.replace("\"bench\"", &format!("{:?}", bad));
            let err = parse_nodes(&json).unwrap_err();
            assert!(err.contains("nfs_folder_name"), "{:?} accepted: {}", bad, err);
        }
    }

    #[test]
    fn test_empty_folder_override_is_allowed() {
        let json = TWO_NODES.replace("\"bench\"", "\"\"");
        let nodes = parse_nodes(&json).unwrap();
        assert_eq!(nodes[1].nfs_dir_name(), "aabbcc000002");
    }

    #[test]
    fn test_malformed_mac_rejected() {
        let json = TWO_NODES.replace("aa:bb:cc:00:00:02", "../../etc");
        assert!(parse_nodes(&json).unwrap_err().contains("malformed MAC"));
    }

    #[tokio::test]
    async fn test_load_nodes_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        tokio::fs::write(&path, TWO_NODES).await.unwrap();

        let nodes = load_nodes(&path).await.unwrap();
        assert_eq!(nodes[0].hostname, "csl-1");

        let missing = load_nodes(&dir.path().join("missing.json")).await;
        assert!(matches!(missing, Err(DeployError::Config(_))));
    }
}

//! 节点与部署批次领域模型

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// boot 分区在节点 NFS 目录中的子目录名
pub const BOOT_DIR_NAME: &str = "boot";
/// root 分区在节点 NFS 目录中的子目录名
pub const ROOT_DIR_NAME: &str = "rootfs";
/// TFTP 根目录名
pub const TFTP_ROOT_DIR_NAME: &str = "tftpboot";

/// 待部署节点描述（从静态配置构造，之后只读）
#[derive(Clone, Deserialize, PartialEq)]
pub struct Node {
    pub hostname: String,
    pub ip_address: String,
    pub mac_address: String,
    pub username: String,
    pub password: String,
    /// SSH 端口
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// 路由器上的以太网端口序号
    pub router_port_link: u32,
    /// NFS 目录名覆盖，未设置时由 MAC 地址生成
    #[serde(default)]
    pub nfs_folder_name: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl Node {
    /// NFS 目录名：显式覆盖，或去掉冒号的 MAC 地址
    ///
    /// 覆盖值不是单级目录名（含 `/`、`.`、`..`）时忽略，目录始终位于文件系统根之下
    pub fn nfs_dir_name(&self) -> String {
        match self.nfs_folder_name.as_deref() {
            Some(name) if is_plain_dir_name(name) => name.to_string(),
            _ => self.mac_address.replace(':', ""),
        }
    }

    /// TFTP 引导目录名：冒号替换为连字符的 MAC 地址
    pub fn tftp_dir_name(&self) -> String {
        self.mac_address.replace(':', "-")
    }
}

/// 能安全拼接到文件系统根之下的单级目录名
pub fn is_plain_dir_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

/// `aa:bb:cc:dd:ee:ff` 形式的 MAC 地址
pub fn is_valid_mac(mac: &str) -> bool {
    let octets: Vec<&str> = mac.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("hostname", &self.hostname)
            .field("ip_address", &self.ip_address)
            .field("mac_address", &self.mac_address)
            .field("username", &self.username)
            .field("password", &"***")
            .field("port", &self.port)
            .field("router_port_link", &self.router_port_link)
            .field("nfs_folder_name", &self.nfs_folder_name)
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ip={}, mac={}, port=ether{})",
            self.hostname, self.ip_address, self.mac_address, self.router_port_link
        )
    }
}

/// 单个节点在 PXE 文件系统中的路径
#[derive(Clone, Debug, PartialEq)]
pub struct NodePaths {
    /// `{fs_root}/{nfs_dir}`
    pub node_dir: PathBuf,
    /// `{fs_root}/{nfs_dir}/boot`
    pub boot_dir: PathBuf,
    /// `{fs_root}/{nfs_dir}/rootfs`
    pub root_dir: PathBuf,
    /// `{fs_root}/tftpboot/{mac-with-hyphens}`
    pub tftp_link: PathBuf,
}

impl NodePaths {
    pub fn for_node(fs_root: &Path, node: &Node) -> Self {
        let node_dir = fs_root.join(node.nfs_dir_name());
        Self {
            boot_dir: node_dir.join(BOOT_DIR_NAME),
            root_dir: node_dir.join(ROOT_DIR_NAME),
            tftp_link: fs_root.join(TFTP_ROOT_DIR_NAME).join(node.tftp_dir_name()),
            node_dir,
        }
    }
}

/// 一次编排运行的目标节点集合及其派生路径
#[derive(Clone, Debug)]
pub struct DeploymentBatch {
    entries: Vec<(Node, NodePaths)>,
}

impl DeploymentBatch {
    pub fn new(fs_root: &Path, nodes: &[Node]) -> Self {
        let entries = nodes
            .iter()
            .map(|node| (node.clone(), NodePaths::for_node(fs_root, node)))
            .collect();
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Node, NodePaths)> {
        self.entries.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.entries.iter().map(|(node, _)| node)
    }

    pub fn ip_addresses(&self) -> Vec<String> {
        self.nodes().map(|n| n.ip_address.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

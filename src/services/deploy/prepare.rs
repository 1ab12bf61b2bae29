//! 单节点文件系统准备：解包镜像 → 配置文件系统 → 刷新 TFTP 引导链接

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{error, info, warn};

use crate::domain::{Node, NodePaths, NodePrepareResult};
use crate::services::fs_config::FilesystemConfigurator;
use crate::services::image::ImageUnpacker;

/// 节点准备器
#[derive(Clone)]
pub struct NodePreparer {
    unpacker: ImageUnpacker,
    configurator: FilesystemConfigurator,
    image: PathBuf,
    server_ip: String,
}

impl NodePreparer {
    pub fn new(
        unpacker: ImageUnpacker,
        configurator: FilesystemConfigurator,
        image: impl Into<PathBuf>,
        server_ip: impl Into<String>,
    ) -> Self {
        Self {
            unpacker,
            configurator,
            image: image.into(),
            server_ip: server_ip.into(),
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    /// 准备一个节点，返回每一步的结果
    ///
    /// 解包失败时不再配置与创建链接
    pub async fn prepare(&self, node: &Node, paths: &NodePaths) -> NodePrepareResult {
        info!(node = %node.hostname, mac = %node.mac_address, "Preparing node filesystem");

        let mut result = NodePrepareResult {
            hostname: node.hostname.clone(),
            mac_address: node.mac_address.clone(),
            boot_dir: paths.boot_dir.clone(),
            root_dir: paths.root_dir.clone(),
            tftp_link: paths.tftp_link.clone(),
            unpacked: false,
            error: None,
            configure: None,
            symlinked: false,
        };

        match self
            .unpacker
            .unpack(&self.image, &paths.boot_dir, &paths.root_dir)
            .await
        {
            Ok(true) => result.unpacked = true,
            Ok(false) => {
                warn!(node = %node.hostname, "Image unpack did not complete");
                result.error = Some("image unpack did not complete".to_string());
                return result;
            }
            Err(e) => {
                error!(node = %node.hostname, error = %e, "Image unpack failed");
                result.error = Some(e.to_string());
                return result;
            }
        }

        result.configure = Some(
            self.configurator
                .configure(
                    &paths.boot_dir,
                    &paths.root_dir,
                    &self.server_ip,
                    &node.ip_address,
                    &node.hostname,
                )
                .await,
        );

        result.symlinked = match refresh_tftp_link(&paths.tftp_link, &paths.boot_dir).await {
            Ok(()) => true,
            Err(e) => {
                error!(node = %node.hostname, link = %paths.tftp_link.display(), error = %e, "Failed to create TFTP boot link");
                false
            }
        };

        if result.succeeded() {
            info!(node = %node.hostname, "Node filesystem prepared");
        }
        result
    }
}

/// 创建（或替换）`link → boot_dir` 符号链接
pub async fn refresh_tftp_link(link: &Path, boot_dir: &Path) -> std::io::Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::symlink_metadata(link).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(link).await?,
        Ok(_) => fs::remove_file(link).await?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    fs::symlink(boot_dir, link).await
}

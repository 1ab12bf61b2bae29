//! SD 卡镜像解包
//!
//! 镜像分区 1 为 boot 内容，分区 2 为根文件系统。解包期间 NFS 服务保持停止，
//! 所有获取的资源（服务停止、loop 设备、挂载）在任何退出路径上都会按逆序释放。

pub mod scope;

use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, error, info};

use crate::error::{DeployError, DeployResult};
use crate::infra::command::{shell_quote, CommandExecutor};

pub use scope::{HeldResource, ResourceScope};

/// boot 分区编号
const BOOT_PARTITION: u32 = 1;
/// 根文件系统分区编号
const ROOT_PARTITION: u32 = 2;

/// 镜像解包器
#[derive(Clone)]
pub struct ImageUnpacker {
    executor: Arc<dyn CommandExecutor>,
    nfs_service: String,
}

impl ImageUnpacker {
    pub fn new(executor: Arc<dyn CommandExecutor>, nfs_service: impl Into<String>) -> Self {
        Self {
            executor,
            nfs_service: nfs_service.into(),
        }
    }

    /// 将镜像两个分区的内容复制到 `boot_dir` / `root_dir`
    ///
    /// - `Err`：不可恢复的准备错误（镜像不存在、loop/挂载/服务失败），已完成清理
    /// - `Ok(false)`：软失败（旧目录无法删除、复制失败），已完成清理
    pub async fn unpack(&self, image: &Path, boot_dir: &Path, root_dir: &Path) -> DeployResult<bool> {
        info!(image = %image.display(), boot_dir = %boot_dir.display(), root_dir = %root_dir.display(), "Unpacking image");

        match fs::metadata(image).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(DeployError::ImageNotFound(image.to_path_buf())),
        }

        // 临时挂载目录在作用域释放（卸载）之后才删除
        let scratch = tempfile::Builder::new().prefix("pxe-unpack-").tempdir()?;

        let mut scope = ResourceScope::new(self.executor.clone());
        let result = self
            .unpack_in_scope(&mut scope, image, scratch.path(), boot_dir, root_dir)
            .await;
        let released = scope.release_all().await;

        match (result, released) {
            (Err(e), released) => {
                if let Err(release_err) = released {
                    error!(error = %release_err, "Cleanup after failed unpack also failed");
                }
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
            (Ok(copied), Ok(())) => {
                if copied {
                    info!(image = %image.display(), "Image unpacked");
                }
                Ok(copied)
            }
        }
    }

    async fn unpack_in_scope(
        &self,
        scope: &mut ResourceScope,
        image: &Path,
        scratch: &Path,
        boot_dir: &Path,
        root_dir: &Path,
    ) -> DeployResult<bool> {
        scope.stop_service(&self.nfs_service).await?;

        if let Some(node_dir) = boot_dir.parent() {
            if !remove_previous(node_dir).await {
                return Ok(false);
            }
        }

        let device = scope.attach_loop(image).await?;

        if !self
            .copy_partition(scope, &device, BOOT_PARTITION, scratch, boot_dir)
            .await?
        {
            return Ok(false);
        }
        if !self
            .copy_partition(scope, &device, ROOT_PARTITION, scratch, root_dir)
            .await?
        {
            return Ok(false);
        }

        scope.detach_loop(&device).await?;
        Ok(true)
    }

    /// 挂载一个分区并复制全部内容，复制完成后立即卸载
    async fn copy_partition(
        &self,
        scope: &mut ResourceScope,
        device: &str,
        partition: u32,
        scratch: &Path,
        destination: &Path,
    ) -> DeployResult<bool> {
        scope
            .mount_readonly(&partition_device(device, partition), scratch)
            .await?;

        let copied = self.copy_tree(scratch, destination).await;

        scope.unmount(scratch).await?;
        Ok(copied)
    }

    /// `cp -a src/. dst`，保留权限、属主与特殊文件
    async fn copy_tree(&self, source: &Path, destination: &Path) -> bool {
        if let Err(e) = fs::create_dir_all(destination).await {
            error!(destination = %destination.display(), error = %e, "Failed to create destination directory");
            return false;
        }

        let command = format!(
            "cp -a {} {}",
            shell_quote(format!("{}/.", source.display())),
            shell_quote(destination.to_string_lossy())
        );
        debug!(command = %command, "Copying partition contents");

        match self.executor.exec(&command).await {
            Ok(output) if output.success() => true,
            Ok(output) => {
                error!(
                    destination = %destination.display(),
                    exit_code = output.exit_code,
                    output = %output.output.trim(),
                    "Partition copy failed"
                );
                false
            }
            Err(e) => {
                error!(destination = %destination.display(), error = %e, "Partition copy failed");
                false
            }
        }
    }
}

/// 删除节点上一次部署留下的目录
async fn remove_previous(node_dir: &Path) -> bool {
    debug!(dir = %node_dir.display(), "Removing previous node filesystem");
    match fs::remove_dir_all(node_dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            error!(dir = %node_dir.display(), error = %e, "Failed to remove previous node filesystem");
            false
        }
    }
}

/// 分区设备路径 (e.g., /dev/loop0p2)
pub fn partition_device(device: &str, partition: u32) -> String {
    format!("{}p{}", device, partition)
}

//! 资源作用域：按获取顺序入栈，按严格逆序释放
//!
//! 顺序固定为 停止 NFS 服务 → 挂接 loop 设备 → 挂载分区 → (使用) → 卸载 → 解除 loop → 启动 NFS。
//! 越过栈顶释放资源（例如分区仍挂载时解除 loop 设备）属于编程错误，直接 panic。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::{DeployError, DeployResult};
use crate::infra::command::{shell_quote, CommandExecutor};

/// 作用域内持有的资源
#[derive(Clone, Debug, PartialEq)]
pub enum HeldResource {
    /// 已停止、退出作用域时需要重新启动的服务
    ServiceStopped { service: String },
    /// 已挂接的 loop 设备
    LoopDevice { device: String, image: PathBuf },
    /// 已挂载的分区
    Mount { device: String, mount_point: PathBuf },
}

impl HeldResource {
    fn describe(&self) -> String {
        match self {
            HeldResource::ServiceStopped { service } => format!("stopped service {}", service),
            HeldResource::LoopDevice { device, image } => {
                format!("loop device {} ({})", device, image.display())
            }
            HeldResource::Mount { device, mount_point } => {
                format!("mount of {} at {}", device, mount_point.display())
            }
        }
    }
}

/// 资源作用域
///
/// 调用方必须在所有退出路径上调用 `release_all`
pub struct ResourceScope {
    executor: Arc<dyn CommandExecutor>,
    held: Vec<HeldResource>,
}

impl ResourceScope {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            held: Vec::new(),
        }
    }

    /// 当前持有的资源（栈底在前）
    pub fn held(&self) -> &[HeldResource] {
        &self.held
    }

    /// 停止服务，退出作用域时重新启动
    pub async fn stop_service(&mut self, service: &str) -> DeployResult<()> {
        debug!(service = %service, "Stopping service");
        let command = format!("service {} stop", shell_quote(service));
        let output = self.executor.exec(&command).await?;
        if !output.success() {
            return Err(DeployError::Service {
                service: service.to_string(),
                action: "stop",
                reason: output.output.trim().to_string(),
            });
        }

        self.held.push(HeldResource::ServiceStopped {
            service: service.to_string(),
        });
        Ok(())
    }

    /// 为镜像文件挂接 loop 设备（同时扫描分区），返回设备路径
    pub async fn attach_loop(&mut self, image: &Path) -> DeployResult<String> {
        debug!(image = %image.display(), "Attaching image to loop device");
        let command = format!("losetup --show -fP {}", shell_quote(image.to_string_lossy()));
        let output = self.executor.exec(&command).await?;

        let device = output
            .output
            .split_whitespace()
            .next()
            .filter(|_| output.success())
            .map(str::to_string)
            .ok_or_else(|| DeployError::LoopAttach {
                image: image.to_path_buf(),
                reason: if output.output.trim().is_empty() {
                    format!("losetup exited with status {}", output.exit_code)
                } else {
                    output.output.trim().to_string()
                },
            })?;

        debug!(device = %device, "Loop device attached");
        self.held.push(HeldResource::LoopDevice {
            device: device.clone(),
            image: image.to_path_buf(),
        });
        Ok(device)
    }

    /// 只读挂载分区
    pub async fn mount_readonly(&mut self, device: &str, mount_point: &Path) -> DeployResult<()> {
        assert!(
            self.held
                .iter()
                .any(|r| matches!(r, HeldResource::LoopDevice { device: d, .. } if device.starts_with(d.as_str()))),
            "mount of {} requested without an attached loop device",
            device
        );

        debug!(device = %device, mount_point = %mount_point.display(), "Mounting partition");
        let command = format!(
            "mount -o ro {} {}",
            shell_quote(device),
            shell_quote(mount_point.to_string_lossy())
        );
        let output = self.executor.exec(&command).await?;
        if !output.success() {
            return Err(DeployError::Mount {
                device: device.to_string(),
                mount_point: mount_point.to_path_buf(),
                reason: output.output.trim().to_string(),
            });
        }

        self.held.push(HeldResource::Mount {
            device: device.to_string(),
            mount_point: mount_point.to_path_buf(),
        });
        Ok(())
    }

    /// 卸载栈顶的挂载点
    ///
    /// 卸载失败时资源保留在栈上，`release_all` 不会在它之下解除 loop 设备
    pub async fn unmount(&mut self, mount_point: &Path) -> DeployResult<()> {
        match self.held.last() {
            Some(HeldResource::Mount { mount_point: top, .. }) if top == mount_point => {}
            other => panic!(
                "unmount of {} out of order: top of scope is {:?}",
                mount_point.display(),
                other.map(HeldResource::describe)
            ),
        }

        release(self.executor.as_ref(), &self.held[self.held.len() - 1]).await?;
        self.held.pop();
        Ok(())
    }

    /// 解除栈顶的 loop 设备
    pub async fn detach_loop(&mut self, device: &str) -> DeployResult<()> {
        match self.held.last() {
            Some(HeldResource::LoopDevice { device: top, .. }) if top == device => {}
            other => panic!(
                "detach of {} out of order: top of scope is {:?}",
                device,
                other.map(HeldResource::describe)
            ),
        }

        release(self.executor.as_ref(), &self.held[self.held.len() - 1]).await?;
        self.held.pop();
        Ok(())
    }

    /// 按逆序释放全部资源
    ///
    /// 某个挂载无法卸载时，其下的 loop 设备不能解除（保持顺序约束），
    /// 但服务仍会被重新启动。返回遇到的第一个错误。
    pub async fn release_all(&mut self) -> DeployResult<()> {
        let mut first_error = None;
        let mut mount_stuck = false;

        while let Some(resource) = self.held.pop() {
            if mount_stuck && matches!(resource, HeldResource::LoopDevice { .. }) {
                error!(resource = %resource.describe(), "Leaving loop device attached: a partition is still mounted");
                continue;
            }

            match release(self.executor.as_ref(), &resource).await {
                Ok(()) => {}
                Err(e) => {
                    error!(resource = %resource.describe(), error = %e, "Failed to release resource");
                    if matches!(resource, HeldResource::Mount { .. }) {
                        mount_stuck = true;
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            let leaked: Vec<String> = self.held.iter().map(HeldResource::describe).collect();
            error!(leaked = ?leaked, "Resource scope dropped without release");
        }
    }
}

async fn release(executor: &dyn CommandExecutor, resource: &HeldResource) -> DeployResult<()> {
    match resource {
        HeldResource::Mount { mount_point, .. } => {
            debug!(mount_point = %mount_point.display(), "Unmounting partition");
            let output = executor
                .exec(&format!("umount {}", shell_quote(mount_point.to_string_lossy())))
                .await?;
            if !output.success() {
                return Err(DeployError::Unmount {
                    mount_point: mount_point.clone(),
                    reason: output.output.trim().to_string(),
                });
            }
        }
        HeldResource::LoopDevice { device, .. } => {
            debug!(device = %device, "Detaching loop device");
            let output = executor
                .exec(&format!("losetup -d {}", shell_quote(device)))
                .await?;
            if !output.success() {
                return Err(DeployError::LoopDetach {
                    device: device.clone(),
                    reason: output.output.trim().to_string(),
                });
            }
        }
        HeldResource::ServiceStopped { service } => {
            info!(service = %service, "Starting service");
            let output = executor
                .exec(&format!("service {} start", shell_quote(service)))
                .await?;
            if !output.success() {
                return Err(DeployError::Service {
                    service: service.clone(),
                    action: "start",
                    reason: output.output.trim().to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[tokio::test]
    async fn test_release_all_in_reverse_order() {
        let host = FakeHost::new();
        let mut scope = ResourceScope::new(host.clone());

        scope.stop_service("nfs-kernel-server").await.unwrap();
        let device = scope.attach_loop(Path::new("/images/sdcard.img")).await.unwrap();
        scope
            .mount_readonly(&format!("{}p1", device), Path::new("/tmp/scratch"))
            .await
            .unwrap();
        assert_eq!(scope.held().len(), 3);

        scope.release_all().await.unwrap();

        assert!(scope.held().is_empty());
        assert_eq!(
            host.commands(),
            vec![
                "service nfs-kernel-server stop",
                "losetup --show -fP /images/sdcard.img",
                "mount -o ro /dev/loop0p1 /tmp/scratch",
                "umount /tmp/scratch",
                "losetup -d /dev/loop0",
                "service nfs-kernel-server start",
            ]
        );
        assert!(host.order_violations().is_empty());
    }

    #[tokio::test]
    async fn test_failed_attach_holds_nothing_new() {
        let host = FakeHost::new();
        host.fail_commands_containing("losetup --show");
        let mut scope = ResourceScope::new(host.clone());

        scope.stop_service("nfs-kernel-server").await.unwrap();
        let err = scope.attach_loop(Path::new("/images/sdcard.img")).await.unwrap_err();
        assert!(matches!(err, DeployError::LoopAttach { .. }));
        assert_eq!(scope.held().len(), 1);

        scope.release_all().await.unwrap();
        assert_eq!(host.commands_matching("start").len(), 1);
    }

    #[tokio::test]
    async fn test_stuck_mount_keeps_loop_but_restarts_service() {
        let host = FakeHost::new();
        host.fail_commands_containing("umount");
        let mut scope = ResourceScope::new(host.clone());

        scope.stop_service("nfs-kernel-server").await.unwrap();
        let device = scope.attach_loop(Path::new("/images/sdcard.img")).await.unwrap();
        scope
            .mount_readonly(&format!("{}p2", device), Path::new("/tmp/scratch"))
            .await
            .unwrap();

        let err = scope.release_all().await.unwrap_err();
        assert!(matches!(err, DeployError::Unmount { .. }));
        assert!(host.commands_matching("losetup -d").is_empty());
        assert_eq!(host.commands_matching("service nfs-kernel-server start").len(), 1);
        assert!(host.order_violations().is_empty());
    }

    #[tokio::test]
    #[should_panic(expected = "out of order")]
    async fn test_detach_under_mount_panics() {
        let host = FakeHost::new();
        let mut scope = ResourceScope::new(host.clone());

        let device = scope.attach_loop(Path::new("/images/sdcard.img")).await.unwrap();
        scope
            .mount_readonly(&format!("{}p1", device), Path::new("/tmp/scratch"))
            .await
            .unwrap();
        let _ = scope.detach_loop(&device).await;
    }

    #[tokio::test]
    async fn test_explicit_unmount_then_release() {
        let host = FakeHost::new();
        let mut scope = ResourceScope::new(host.clone());

        let device = scope.attach_loop(Path::new("/images/sdcard.img")).await.unwrap();
        let part = format!("{}p1", device);
        scope.mount_readonly(&part, Path::new("/tmp/a")).await.unwrap();
        scope.unmount(Path::new("/tmp/a")).await.unwrap();
        scope.mount_readonly(&format!("{}p2", device), Path::new("/tmp/a")).await.unwrap();
        scope.unmount(Path::new("/tmp/a")).await.unwrap();
        scope.detach_loop(&device).await.unwrap();

        assert!(scope.held().is_empty());
        assert_eq!(host.attached_loops(), 0);
        assert_eq!(host.active_mounts(), 0);
    }
}

//! 节点文件系统配置
//!
//! 解包后改写 fstab、sshd_config、cmdline.txt 与 hostname，使节点能通过 NFS 启动。
//! 各子操作相互独立，一个失败不影响其余操作执行。

use std::path::Path;

use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::domain::ConfigureReport;
use crate::error::DeployResult;

/// 根文件系统内的配置文件路径
pub const FSTAB_PATH: &str = "etc/fstab";
pub const SSHD_CONFIG_PATH: &str = "etc/ssh/sshd_config";
pub const HOSTNAME_PATH: &str = "etc/hostname";
/// boot 目录内的内核命令行文件
pub const CMDLINE_FILE_NAME: &str = "cmdline.txt";

/// sshd_config 中需要替换的指令：包含子串的整行替换为启用形式
const SSHD_REPLACEMENTS: &[(&str, &str)] = &[
    ("PermitRootLogin", "PermitRootLogin yes"),
    ("PasswordAuthentication", "PasswordAuthentication yes"),
    ("/etc/ssh/ssh_host_rsa_key", "HostKey /etc/ssh/ssh_host_rsa_key"),
];

/// 文件系统配置器
#[derive(Clone, Debug, Default)]
pub struct FilesystemConfigurator;

impl FilesystemConfigurator {
    pub fn new() -> Self {
        Self
    }

    /// 依次执行全部子操作，返回每项结果
    pub async fn configure(
        &self,
        boot_dir: &Path,
        root_dir: &Path,
        server_ip: &str,
        node_ip: &str,
        hostname: &str,
    ) -> ConfigureReport {
        info!(hostname = %hostname, node_ip = %node_ip, "Configuring node filesystem");

        let report = ConfigureReport {
            sshd_config: outcome("sshd_config", self.rewrite_sshd_config(&root_dir.join(SSHD_CONFIG_PATH)).await),
            fstab: outcome(
                "fstab",
                self.rewrite_fstab(&root_dir.join(FSTAB_PATH), boot_dir, server_ip).await,
            ),
            cmdline: outcome(
                "cmdline",
                self.rewrite_cmdline(&boot_dir.join(CMDLINE_FILE_NAME), root_dir, server_ip)
                    .await,
            ),
            hostname: outcome(
                "hostname",
                self.rewrite_hostname(&root_dir.join(HOSTNAME_PATH), hostname).await,
            ),
        };

        if !report.all_ok() {
            warn!(hostname = %hostname, report = ?report, "Node filesystem partially configured");
        }
        report
    }

    /// 将根分区挂载行替换为指向 boot 目录的 NFS 挂载
    ///
    /// 找不到第二列为 `/` 的非注释行时返回 false，文件保持不变
    pub async fn rewrite_fstab(&self, fstab: &Path, boot_dir: &Path, server_ip: &str) -> DeployResult<bool> {
        debug!(path = %fstab.display(), "Rewriting fstab");
        let mut lines = read_lines(fstab).await?;
        if lines.is_empty() {
            return Ok(false);
        }

        let Some(idx) = lines
            .iter()
            .position(|line| !line.trim_start().starts_with('#') && line.split_whitespace().nth(1) == Some("/"))
        else {
            warn!(path = %fstab.display(), "No root mount line in fstab");
            return Ok(false);
        };

        lines[idx] = fstab_nfs_line(server_ip, boot_dir);
        write_lines(fstab, &lines).await?;
        Ok(true)
    }

    /// 启用 root 登录与密码认证，固定 RSA 主机密钥
    pub async fn rewrite_sshd_config(&self, path: &Path) -> DeployResult<bool> {
        debug!(path = %path.display(), "Rewriting sshd config");
        let lines = read_lines(path).await?;
        if lines.is_empty() {
            return Ok(false);
        }

        let lines: Vec<String> = lines
            .into_iter()
            .map(|line| {
                SSHD_REPLACEMENTS
                    .iter()
                    .filter(|(needle, _)| line.contains(*needle))
                    .last()
                    .map(|(_, canonical)| canonical.to_string())
                    .unwrap_or(line)
            })
            .collect();

        write_lines(path, &lines).await?;
        Ok(true)
    }

    /// 覆盖内核命令行：NFS v4.1/TCP 根文件系统，SELinux 不强制
    pub async fn rewrite_cmdline(&self, path: &Path, root_dir: &Path, server_ip: &str) -> DeployResult<bool> {
        let cmdline = kernel_cmdline(server_ip, root_dir);
        debug!(path = %path.display(), cmdline = %cmdline, "Rewriting kernel cmdline");
        write_lines(path, &[cmdline]).await?;
        Ok(true)
    }

    /// 覆盖 hostname 文件
    pub async fn rewrite_hostname(&self, path: &Path, hostname: &str) -> DeployResult<bool> {
        debug!(path = %path.display(), hostname = %hostname, "Rewriting hostname");
        write_lines(path, &[hostname.to_string()]).await?;
        Ok(true)
    }
}

/// fstab 中 boot 目录的 NFS 挂载行
pub fn fstab_nfs_line(server_ip: &str, boot_dir: &Path) -> String {
    format!(
        "{}:{} /boot nfs defaults,vers=4.1,tcp 0 0",
        server_ip,
        boot_dir.display()
    )
}

/// NFS 根文件系统的内核命令行
pub fn kernel_cmdline(server_ip: &str, root_dir: &Path) -> String {
    format!(
        "rootwait console=tty1 console=ttyS0,115200 pcie_aspm=off selinux=1 enforcing=0 \
         ip=dhcp root=/dev/nfs nfsroot={}:{},vers=4.1,proto=tcp",
        server_ip,
        root_dir.display()
    )
}

fn outcome(step: &str, result: DeployResult<bool>) -> bool {
    match result {
        Ok(ok) => ok,
        Err(e) => {
            error!(step = %step, error = %e, "Filesystem configuration step failed");
            false
        }
    }
}

async fn read_lines(path: &Path) -> DeployResult<Vec<String>> {
    let content = fs::read_to_string(path).await?;
    Ok(content.lines().map(str::to_string).collect())
}

/// 每行以换行结尾写回
async fn write_lines(path: &Path, lines: &[String]) -> DeployResult<()> {
    let mut content = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    fs::write(path, content).await?;
    Ok(())
}

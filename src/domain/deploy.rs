//! 部署相关领域模型

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 批次部署状态机
///
/// `PoweredUnknown → PoweredOff → FilesystemsPrepared → PoweredOn → BootConfirmed | BootTimedOut`
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    PoweredUnknown,
    PoweredOff,
    FilesystemsPrepared,
    PoweredOn,
    BootConfirmed,
    BootTimedOut,
}

impl DeployPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployPhase::PoweredUnknown => "powered_unknown",
            DeployPhase::PoweredOff => "powered_off",
            DeployPhase::FilesystemsPrepared => "filesystems_prepared",
            DeployPhase::PoweredOn => "powered_on",
            DeployPhase::BootConfirmed => "boot_confirmed",
            DeployPhase::BootTimedOut => "boot_timed_out",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployPhase::BootConfirmed | DeployPhase::BootTimedOut)
    }

    /// 状态机允许的唯一后继
    pub fn can_advance_to(&self, next: DeployPhase) -> bool {
        matches!(
            (self, next),
            (DeployPhase::PoweredUnknown, DeployPhase::PoweredOff)
                | (DeployPhase::PoweredOff, DeployPhase::FilesystemsPrepared)
                | (DeployPhase::FilesystemsPrepared, DeployPhase::PoweredOn)
                | (DeployPhase::PoweredOn, DeployPhase::BootConfirmed)
                | (DeployPhase::PoweredOn, DeployPhase::BootTimedOut)
        )
    }

    /// 推进状态机，非法跳转属于编程错误
    pub fn advance(&mut self, next: DeployPhase) {
        assert!(
            self.can_advance_to(next),
            "illegal deploy phase transition {} -> {}",
            self.as_str(),
            next.as_str()
        );
        *self = next;
    }
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// 部署阶段信息
#[derive(Clone, Debug, Serialize)]
pub struct DeployStage {
    /// 阶段标识 (e.g., "power_off", "prepare_filesystems", "wait_boot")
    pub name: String,
    /// 显示名称
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    /// 附加信息
    pub message: Option<String>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }
}

/// 文件系统配置各子操作的结果
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ConfigureReport {
    pub fstab: bool,
    pub sshd_config: bool,
    pub cmdline: bool,
    pub hostname: bool,
}

impl ConfigureReport {
    pub fn all_ok(&self) -> bool {
        self.fstab && self.sshd_config && self.cmdline && self.hostname
    }
}

/// 单个节点的文件系统准备结果
#[derive(Clone, Debug, Serialize)]
pub struct NodePrepareResult {
    pub hostname: String,
    pub mac_address: String,
    pub boot_dir: PathBuf,
    pub root_dir: PathBuf,
    pub tftp_link: PathBuf,
    /// 镜像解包是否成功
    pub unpacked: bool,
    /// 解包失败的原因（致命错误或软失败）
    pub error: Option<String>,
    /// 解包失败时不会执行配置
    pub configure: Option<ConfigureReport>,
    pub symlinked: bool,
}

impl NodePrepareResult {
    pub fn succeeded(&self) -> bool {
        self.unpacked
            && self.symlinked
            && self.configure.as_ref().map(ConfigureReport::all_ok).unwrap_or(false)
    }
}

/// 一次批次部署的结果
#[derive(Clone, Debug, Serialize)]
pub struct DeployReport {
    pub run_id: String,
    pub phase: DeployPhase,
    pub success: bool,
    pub stages: Vec<DeployStage>,
    pub nodes: Vec<NodePrepareResult>,
    /// 主机可达等待结果（未执行时为 None）
    pub hosts_reachable: Option<bool>,
    /// SSH 端口等待结果（未执行时为 None）
    pub ports_open: Option<bool>,
    #[serde(skip)]
    pub boot_duration: Option<Duration>,
}

impl DeployReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: DeployPhase::PoweredUnknown,
            success: false,
            stages: Vec::new(),
            nodes: Vec::new(),
            hosts_reachable: None,
            ports_open: None,
            boot_duration: None,
        }
    }

    /// 两个启动等待阶段是否都成功
    pub fn boot_confirmed(&self) -> bool {
        self.hosts_reachable == Some(true) && self.ports_open == Some(true)
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodePrepareResult> {
        self.nodes.iter().filter(|n| !n.succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_happy_path() {
        let mut phase = DeployPhase::PoweredUnknown;
        phase.advance(DeployPhase::PoweredOff);
        phase.advance(DeployPhase::FilesystemsPrepared);
        phase.advance(DeployPhase::PoweredOn);
        assert!(!phase.is_terminal());
        phase.advance(DeployPhase::BootTimedOut);
        assert!(phase.is_terminal());
    }

    #[test]
    #[should_panic(expected = "illegal deploy phase transition")]
    fn test_phase_cannot_skip_power_off() {
        let mut phase = DeployPhase::PoweredUnknown;
        phase.advance(DeployPhase::FilesystemsPrepared);
    }

    #[test]
    fn test_deploy_stage_lifecycle() {
        let mut stage = DeployStage::new("power_off", "Power Off");
        assert_eq!(stage.status, StageStatus::Pending);

        stage.start();
        assert_eq!(stage.status, StageStatus::Running);
        assert!(stage.started_at.is_some());

        stage.finish(true, Some("2 ports off".to_string()));
        assert_eq!(stage.status, StageStatus::Success);
        assert!(stage.finished_at.is_some());
        assert!(stage.duration_ms.is_some());
    }

    #[test]
    fn test_node_result_requires_every_step() {
        let mut result = NodePrepareResult {
            hostname: "csl-1".to_string(),
            mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
            boot_dir: PathBuf::from("/pxe/aabbccddeeff/boot"),
            root_dir: PathBuf::from("/pxe/aabbccddeeff/rootfs"),
            tftp_link: PathBuf::from("/pxe/tftpboot/aa-bb-cc-dd-ee-ff"),
            unpacked: true,
            error: None,
            configure: Some(ConfigureReport {
                fstab: true,
                sshd_config: true,
                cmdline: true,
                hostname: true,
            }),
            symlinked: true,
        };
        assert!(result.succeeded());

        result.configure.as_mut().unwrap().fstab = false;
        assert!(!result.succeeded());

        result.configure = None;
        assert!(!result.succeeded());
    }

    #[test]
    fn test_report_boot_confirmed() {
        let mut report = DeployReport::new("run");
        assert!(!report.boot_confirmed());
        report.hosts_reachable = Some(true);
        report.ports_open = Some(false);
        assert!(!report.boot_confirmed());
        report.ports_open = Some(true);
        assert!(report.boot_confirmed());
    }
}

//! 批次部署编排
//!
//! 断电 → 逐个节点准备文件系统 → 上电 → 等待启动。
//! 供电失败中止整个批次；单节点准备失败默认只记录，由 `BatchPolicy` 决定是否中止。

pub mod prepare;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info, warn, Instrument};

use crate::config::{BatchPolicy, BootWaitConfig, DeployerConfig};
use crate::domain::{DeployPhase, DeployReport, DeployStage, DeploymentBatch, Node, PowerState};
use crate::infra::{LocalShell, SshCommandRunner};
use crate::services::boot_monitor::{BootMonitor, NetworkProbe};
use crate::services::fs_config::FilesystemConfigurator;
use crate::services::image::ImageUnpacker;
use crate::services::power::PowerController;
use crate::services::router::RouterClient;

pub use prepare::NodePreparer;

/// 阶段标识
pub mod stages {
    pub const POWER_OFF: &str = "power_off";
    pub const PREPARE_FILESYSTEMS: &str = "prepare_filesystems";
    pub const POWER_ON: &str = "power_on";
    pub const WAIT_BOOT: &str = "wait_boot";
}

fn new_stages() -> Vec<DeployStage> {
    vec![
        DeployStage::new(stages::POWER_OFF, "Power Off"),
        DeployStage::new(stages::PREPARE_FILESYSTEMS, "Prepare Filesystems"),
        DeployStage::new(stages::POWER_ON, "Power On"),
        DeployStage::new(stages::WAIT_BOOT, "Wait For Boot"),
    ]
}

/// 部署编排器
pub struct Deployment {
    power: PowerController,
    preparer: NodePreparer,
    monitor: BootMonitor,
    fs_root: PathBuf,
    boot_wait: BootWaitConfig,
    policy: BatchPolicy,
}

impl Deployment {
    pub fn new(
        power: PowerController,
        preparer: NodePreparer,
        monitor: BootMonitor,
        fs_root: impl Into<PathBuf>,
        boot_wait: BootWaitConfig,
        policy: BatchPolicy,
    ) -> Self {
        Self {
            power,
            preparer,
            monitor,
            fs_root: fs_root.into(),
            boot_wait,
            policy,
        }
    }

    /// 用生产实现组装：SSH 连接路由器，本地 shell 操作块设备，网络探测确认启动
    pub fn from_config(config: &DeployerConfig, image: impl Into<PathBuf>) -> Self {
        let router = RouterClient::new(Arc::new(SshCommandRunner::from_router_config(&config.router)));
        let local = Arc::new(LocalShell::new(config.pxe_server.local_command_timeout));

        let preparer = NodePreparer::new(
            ImageUnpacker::new(local, config.pxe_server.nfs_service.clone()),
            FilesystemConfigurator::new(),
            image,
            config.pxe_server.ip_address.clone(),
        );
        let monitor = BootMonitor::new(Arc::new(NetworkProbe::new()), config.boot_wait.port_probe_timeout);

        Self::new(
            PowerController::new(router),
            preparer,
            monitor,
            config.pxe_server.filesystem_root.clone(),
            config.boot_wait.clone(),
            config.policy.clone(),
        )
    }

    /// 部署一批节点
    pub async fn deploy(&self, nodes: &[Node]) -> DeployReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("deploy", run_id = %run_id);
        self.run(run_id, nodes).instrument(span).await
    }

    async fn run(&self, run_id: String, nodes: &[Node]) -> DeployReport {
        let mut report = DeployReport::new(run_id);
        report.stages = new_stages();

        let batch = DeploymentBatch::new(&self.fs_root, nodes);
        if batch.is_empty() {
            warn!("No nodes to deploy");
            skip_remaining(&mut report, 0, "empty batch");
            return report;
        }

        info!(
            nodes = batch.len(),
            image = %self.preparer.image().display(),
            fs_root = %self.fs_root.display(),
            "Starting deployment"
        );

        // 1. 断电
        report.stages[0].start();
        if !self.power.set_power(batch.nodes(), PowerState::Off).await {
            error!("Could not confirm nodes are powered off, aborting");
            report.stages[0].finish(false, Some("power off not confirmed".to_string()));
            skip_remaining(&mut report, 1, "power off failed");
            return report;
        }
        report.stages[0].finish(true, Some(format!("{} ports off", batch.len())));
        report.phase.advance(DeployPhase::PoweredOff);

        // 2. 逐个节点准备文件系统
        report.stages[1].start();
        for (node, paths) in batch.iter() {
            let result = self.preparer.prepare(node, paths).await;
            if !result.succeeded() {
                error!(node = %node.hostname, error = ?result.error, "Node preparation failed");
            }
            report.nodes.push(result);
        }

        let failed: Vec<String> = report.failed_nodes().map(|n| n.hostname.clone()).collect();
        let prepared_message = format!("{}/{} nodes prepared", batch.len() - failed.len(), batch.len());
        if !failed.is_empty() {
            warn!(failed = ?failed, "Some nodes were not fully prepared");
            if self.policy.abort_on_prepare_failure {
                report.stages[1].finish(false, Some(prepared_message));
                skip_remaining(&mut report, 2, "node preparation failed");
                return report;
            }
        }
        report.stages[1].finish(failed.is_empty(), Some(prepared_message));
        report.phase.advance(DeployPhase::FilesystemsPrepared);

        // 3. 上电
        report.stages[2].start();
        if !self.power.set_power(batch.nodes(), PowerState::On).await {
            error!("Could not confirm nodes are powered on, aborting");
            report.stages[2].finish(false, Some("power on not confirmed".to_string()));
            skip_remaining(&mut report, 3, "power on failed");
            return report;
        }
        report.stages[2].finish(true, Some(format!("{} ports on", batch.len())));
        report.phase.advance(DeployPhase::PoweredOn);

        // 4. 等待启动
        report.stages[3].start();
        let hosts = batch.ip_addresses();
        let started = Instant::now();
        let hosts_reachable = self
            .monitor
            .wait_for_hosts(&hosts, self.boot_wait.timeout, self.boot_wait.interval)
            .await;
        let ports_open = self
            .monitor
            .wait_for_ports(
                &hosts,
                self.boot_wait.ssh_port,
                self.boot_wait.timeout,
                self.boot_wait.interval,
            )
            .await;
        let elapsed = started.elapsed();

        report.hosts_reachable = Some(hosts_reachable);
        report.ports_open = Some(ports_open);
        report.boot_duration = Some(elapsed);

        if elapsed > self.boot_wait.warn_threshold() {
            warn!(
                elapsed_secs = elapsed.as_secs(),
                threshold_secs = self.boot_wait.warn_threshold().as_secs(),
                "Boot took longer than expected"
            );
        }

        let confirmed = report.boot_confirmed();
        report.stages[3].finish(
            confirmed,
            Some(format!(
                "hosts_reachable={} ports_open={} elapsed={}s",
                hosts_reachable,
                ports_open,
                elapsed.as_secs()
            )),
        );
        report.phase.advance(if confirmed {
            DeployPhase::BootConfirmed
        } else {
            DeployPhase::BootTimedOut
        });

        report.success = confirmed || !self.policy.require_boot_confirmation;
        if confirmed {
            info!(elapsed_secs = elapsed.as_secs(), "All nodes booted");
        } else {
            warn!(hosts_reachable, ports_open, "Boot was not confirmed for every node");
        }
        report
    }
}

fn skip_remaining(report: &mut DeployReport, from: usize, reason: &str) {
    for stage in report.stages.iter_mut().skip(from) {
        stage.skip(Some(reason.to_string()));
    }
}

//! PXE Deployer - PoE 节点网络启动部署工具
//!
//! 断电 → 解包镜像到每个节点的 NFS 目录 → 上电 → 等待节点启动

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::env::constants::VERSION;
use crate::config::{load_nodes, DeployerConfig};
use crate::domain::DeployReport;
use crate::infra::LocalShell;
use crate::services::{artifacts, Deployment, TestSuiteRunner};

/// 日志文件名
pub const LOG_FILE_NAME: &str = "deployment.log";

/// 默认日志过滤，可通过 `RUST_LOG` 覆盖
const DEFAULT_LOG_FILTER: &str = "pxe_deployer=debug,russh=warn";

/// 命令行选项
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// 覆盖 `PXE_NODES_FILE`
    pub nodes_file: Option<PathBuf>,
    /// 直接指定镜像，优先于其他来源
    pub image: Option<PathBuf>,
    /// 使用产物目录中最新的本地构建
    pub latest_local: bool,
    /// 部署成功后运行测试套件
    pub run_tests: bool,
}

/// 初始化日志：控制台输出，配置了日志目录时同时追加到 `deployment.log`
pub fn init_tracing(logs_dir: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let file_layer = match logs_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create logs directory {}", dir.display()))?;
            let path = dir.join(LOG_FILE_NAME);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

/// 执行一次完整部署，返回是否成功
pub async fn run(mut config: DeployerConfig, options: RunOptions) -> anyhow::Result<bool> {
    if let Some(nodes_file) = options.nodes_file.clone() {
        config.nodes_file = Some(nodes_file);
    }

    if let Err(problems) = config.validate() {
        let messages: Vec<String> = problems.iter().map(ToString::to_string).collect();
        bail!("invalid configuration:\n  {}", messages.join("\n  "));
    }

    log_startup_summary(&config, &options);

    let image = resolve_image(&config, &options).await?;
    let nodes_file = config
        .nodes_file
        .clone()
        .context("nodes file is not configured")?;
    let nodes = load_nodes(&nodes_file).await?;

    let report = Deployment::from_config(&config, image).deploy(&nodes).await;
    log_report(&report);

    if !report.success {
        return Ok(false);
    }

    if options.run_tests {
        let runner = TestSuiteRunner::new(
            Arc::new(LocalShell::new(config.pxe_server.local_command_timeout)),
            config.test_suite.clone(),
        );
        return Ok(runner.run().await);
    }

    Ok(true)
}

fn log_startup_summary(config: &DeployerConfig, options: &RunOptions) {
    info!(
        version = VERSION,
        router = %config.router.host,
        pxe_server = %config.pxe_server.ip_address,
        fs_root = %config.pxe_server.filesystem_root.display(),
        boot_timeout_secs = config.boot_wait.timeout.as_secs(),
        abort_on_prepare_failure = config.policy.abort_on_prepare_failure,
        require_boot_confirmation = config.policy.require_boot_confirmation,
        "PXE deployer starting"
    );
    // RouterConfig 的 Debug 输出不包含密码
    tracing::debug!(config = ?config, options = ?options, "Resolved configuration");
}

/// 选择本次部署使用的镜像
async fn resolve_image(config: &DeployerConfig, options: &RunOptions) -> anyhow::Result<PathBuf> {
    if let Some(image) = &options.image {
        return Ok(image.clone());
    }

    if options.latest_local {
        let artifacts_dir = config
            .pxe_server
            .artifacts_dir
            .as_deref()
            .context("--latest-local requires PXE_ARTIFACTS_DIR")?;
        let Some(artifact) = artifacts::latest_local_image(artifacts_dir).await? else {
            bail!("no builds found in {}", artifacts_dir.display());
        };
        artifacts::activate(&artifact, &config.pxe_server.sdcard_image_path).await?;
    }

    Ok(config.pxe_server.sdcard_image_path.clone())
}

fn log_report(report: &DeployReport) {
    for node in &report.nodes {
        if node.succeeded() {
            info!(node = %node.hostname, boot_dir = %node.boot_dir.display(), "Node ready");
        } else {
            warn!(node = %node.hostname, error = ?node.error, configure = ?node.configure, symlinked = node.symlinked, "Node not fully prepared");
        }
    }

    info!(
        run_id = %report.run_id,
        phase = report.phase.as_str(),
        success = report.success,
        boot_secs = report.boot_duration.map(|d| d.as_secs()),
        "Deployment finished"
    );

    match serde_json::to_string_pretty(report) {
        Ok(json) => tracing::debug!(report = %json, "Deployment report"),
        Err(e) => warn!(error = %e, "Failed to serialize deployment report"),
    }
}

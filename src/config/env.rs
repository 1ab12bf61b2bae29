//! 环境变量配置加载
//!
//! 进程启动时构造一次 `DeployerConfig`，之后按值传入各组件

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::DeployError;

/// 部署器配置
#[derive(Clone, Debug)]
pub struct DeployerConfig {
    pub router: RouterConfig,
    pub pxe_server: PxeServerConfig,
    pub boot_wait: BootWaitConfig,
    pub policy: BatchPolicy,
    pub test_suite: TestSuiteConfig,
    /// 节点描述 JSON 文件
    pub nodes_file: Option<PathBuf>,
}

/// 路由器（PoE 交换）配置
#[derive(Clone)]
pub struct RouterConfig {
    pub host: String,
    pub ssh_port: u16,
    pub username: String,
    pub password: String,
    /// 单条路由器命令的超时
    pub command_timeout: Duration,
}

/// PXE 服务器配置
#[derive(Clone, Debug)]
pub struct PxeServerConfig {
    /// 节点挂载 NFS 时使用的服务器地址
    pub ip_address: String,
    /// PXE 文件系统根目录 (e.g., /pxe)
    pub filesystem_root: PathBuf,
    /// SD 卡镜像路径
    pub sdcard_image_path: PathBuf,
    /// 本地已下载镜像目录
    pub artifacts_dir: Option<PathBuf>,
    /// 日志目录
    pub logs_dir: Option<PathBuf>,
    /// NFS 服务名
    pub nfs_service: String,
    /// 本地命令（cp/losetup/mount）的超时
    pub local_command_timeout: Duration,
}

/// 启动确认等待配置
#[derive(Clone, Debug)]
pub struct BootWaitConfig {
    /// 每个等待阶段的超时
    pub timeout: Duration,
    /// 轮询间隔
    pub interval: Duration,
    /// SSH 端口
    pub ssh_port: u16,
    /// 单次端口探测超时
    pub port_probe_timeout: Duration,
}

impl BootWaitConfig {
    /// 超过此时长记录告警：标称超时的两倍
    pub fn warn_threshold(&self) -> Duration {
        self.timeout * 2
    }
}

impl Default for BootWaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(constants::BOOT_TIMEOUT_SECS),
            interval: Duration::from_secs(1),
            ssh_port: 22,
            port_probe_timeout: Duration::from_secs(1),
        }
    }
}

/// 批次失败策略
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchPolicy {
    /// 单个节点文件系统准备失败时是否中止整个批次（默认继续）
    pub abort_on_prepare_failure: bool,
    /// 启动等待超时是否计入部署失败（默认只记录）
    pub require_boot_confirmation: bool,
}

/// 部署后测试套件配置
#[derive(Clone, Debug, Default)]
pub struct TestSuiteConfig {
    pub tests_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub tests: Vec<String>,
}

impl TestSuiteConfig {
    pub fn is_configured(&self) -> bool {
        self.tests_dir.is_some() && !self.tests.is_empty()
    }
}

impl DeployerConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self {
            router: RouterConfig::from_env(),
            pxe_server: PxeServerConfig::from_env(),
            boot_wait: BootWaitConfig::from_env(),
            policy: BatchPolicy::from_env(),
            test_suite: TestSuiteConfig::from_env(),
            nodes_file: env::var("PXE_NODES_FILE").ok().filter(|s| !s.is_empty()).map(PathBuf::from),
        }
    }

    /// 校验必填项，返回所有缺失项
    pub fn validate(&self) -> Result<(), Vec<DeployError>> {
        let mut problems = Vec::new();

        if self.router.host.is_empty() {
            problems.push(DeployError::config("ROUTER_HOST is not set"));
        }
        if self.router.username.is_empty() {
            problems.push(DeployError::config("ROUTER_USERNAME is not set"));
        }
        if self.pxe_server.ip_address.is_empty() {
            problems.push(DeployError::config("PXE_SERVER_IP is not set"));
        }
        if self.nodes_file.is_none() {
            problems.push(DeployError::config("PXE_NODES_FILE is not set"));
        }
        if self.boot_wait.interval.is_zero() {
            problems.push(DeployError::config("PXE_POLL_INTERVAL_MS must be positive"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Self {
        let host = env::var("ROUTER_HOST").unwrap_or_default();
        let ssh_port = env::var("ROUTER_SSH_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(22);
        let username = env::var("ROUTER_USERNAME").unwrap_or_default();
        let password = env::var("ROUTER_PASSWORD").unwrap_or_default();
        let command_timeout = Duration::from_secs(parse_u64("ROUTER_COMMAND_TIMEOUT_SECS", 30));

        Self {
            host,
            ssh_port,
            username,
            password,
            command_timeout,
        }
    }
}

impl std::fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterConfig")
            .field("host", &self.host)
            .field("ssh_port", &self.ssh_port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl PxeServerConfig {
    pub fn from_env() -> Self {
        let ip_address = env::var("PXE_SERVER_IP").unwrap_or_default();
        let filesystem_root = env::var("PXE_FS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(constants::DEFAULT_FS_ROOT));
        let sdcard_image_path = env::var("PXE_SDCARD_IMAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| filesystem_root.join(constants::IMAGE_FILE_NAME));
        let artifacts_dir = env::var("PXE_ARTIFACTS_DIR").ok().filter(|s| !s.is_empty()).map(PathBuf::from);
        let logs_dir = env::var("PXE_LOGS_DIR").ok().filter(|s| !s.is_empty()).map(PathBuf::from);
        let nfs_service = env::var("PXE_NFS_SERVICE").unwrap_or_else(|_| "nfs-kernel-server".to_string());
        let local_command_timeout = Duration::from_secs(parse_u64("PXE_LOCAL_COMMAND_TIMEOUT_SECS", 1800));

        Self {
            ip_address,
            filesystem_root,
            sdcard_image_path,
            artifacts_dir,
            logs_dir,
            nfs_service,
            local_command_timeout,
        }
    }
}

impl BootWaitConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: Duration::from_secs(parse_u64("PXE_BOOT_TIMEOUT_SECS", constants::BOOT_TIMEOUT_SECS)),
            interval: Duration::from_millis(parse_u64("PXE_POLL_INTERVAL_MS", 1000)),
            ssh_port: env::var("PXE_SSH_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ssh_port),
            port_probe_timeout: Duration::from_millis(parse_u64("PXE_PORT_PROBE_TIMEOUT_MS", 1000)),
        }
    }
}

impl BatchPolicy {
    pub fn from_env() -> Self {
        Self {
            abort_on_prepare_failure: parse_bool("PXE_ABORT_ON_PREPARE_FAILURE", false),
            require_boot_confirmation: parse_bool("PXE_REQUIRE_BOOT_CONFIRMATION", false),
        }
    }
}

impl TestSuiteConfig {
    pub fn from_env() -> Self {
        let tests = env::var("ROBOT_TESTS")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        Self {
            tests_dir: env::var("ROBOT_TESTS_DIR").ok().filter(|s| !s.is_empty()).map(PathBuf::from),
            reports_dir: env::var("ROBOT_REPORTS_DIR").ok().filter(|s| !s.is_empty()).map(PathBuf::from),
            tests,
        }
    }
}

fn parse_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            warn!(key = %key, value = %v, "Invalid numeric value, using default {}", default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// 逗号分隔列表，去除空白与空项
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 常量
pub mod constants {
    /// 每个启动等待阶段的标称超时（秒）
    pub const BOOT_TIMEOUT_SECS: u64 = 300; // 5 分钟

    /// 默认 PXE 文件系统根目录
    pub const DEFAULT_FS_ROOT: &str = "/pxe";

    /// 构建产物中的镜像文件名
    pub const IMAGE_FILE_NAME: &str = "sdcard.img";

    /// 本地构建目录命名格式
    pub const ARTIFACT_FOLDER_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" smoke.robot, ssh.robot ,,nfs.robot"),
            vec!["smoke.robot", "ssh.robot", "nfs.robot"]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_parse_helpers() {
        env::set_var("PXE_TEST_NUMERIC", "42");
        env::set_var("PXE_TEST_BAD_NUMERIC", "forty-two");
        env::set_var("PXE_TEST_FLAG", "TRUE");

        assert_eq!(parse_u64("PXE_TEST_NUMERIC", 1), 42);
        assert_eq!(parse_u64("PXE_TEST_BAD_NUMERIC", 7), 7);
        assert_eq!(parse_u64("PXE_TEST_MISSING_NUMERIC", 9), 9);
        assert!(parse_bool("PXE_TEST_FLAG", false));
        assert!(!parse_bool("PXE_TEST_MISSING_FLAG", false));

        env::remove_var("PXE_TEST_NUMERIC");
        env::remove_var("PXE_TEST_BAD_NUMERIC");
        env::remove_var("PXE_TEST_FLAG");
    }

    #[test]
    fn test_warn_threshold_is_twice_timeout() {
        let wait = BootWaitConfig::default();
        assert_eq!(wait.warn_threshold(), Duration::from_secs(600));
    }

    #[test]
    fn test_validate_reports_every_missing_value() {
        let config = DeployerConfig {
            router: RouterConfig {
                host: String::new(),
                ssh_port: 22,
                username: String::new(),
                password: String::new(),
                command_timeout: Duration::from_secs(5),
            },
            pxe_server: PxeServerConfig {
                ip_address: String::new(),
                filesystem_root: PathBuf::from("/pxe"),
                sdcard_image_path: PathBuf::from("/pxe/sdcard.img"),
                artifacts_dir: None,
                logs_dir: None,
                nfs_service: "nfs-kernel-server".to_string(),
                local_command_timeout: Duration::from_secs(60),
            },
            boot_wait: BootWaitConfig::default(),
            policy: BatchPolicy::default(),
            test_suite: TestSuiteConfig::default(),
            nodes_file: None,
        };

        let problems = config.validate().unwrap_err();
        assert_eq!(problems.len(), 4);
    }

    #[test]
    fn test_router_debug_redacts_password() {
        let router = RouterConfig {
            host: "192.168.88.1".to_string(),
            ssh_port: 22,
            username: "admin".to_string(),
            password: "topsecret".to_string(),
            command_timeout: Duration::from_secs(5),
        };
        assert!(!format!("{:?}", router).contains("topsecret"));
    }
}

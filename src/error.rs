//! 统一错误处理
//!
//! 两种严重级别：
//! - 不可恢复的准备错误（镜像缺失、loop 设备、挂载、NFS 服务）以 `DeployError` 返回
//! - 软失败（路由器命令非零退出、校验不一致、fstab 无根分区行）以 `false` + 日志返回

use std::path::PathBuf;
use thiserror::Error;

use crate::infra::command::CommandError;

/// 部署错误类型
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Unknown {kind} value \"{value}\"")]
    UnknownEnumValue { kind: &'static str, value: String },

    #[error("Malformed router output: {0}")]
    MalformedOutput(String),

    #[error("Image file {0} does not exist or is not a regular file")]
    ImageNotFound(PathBuf),

    #[error("Failed to attach loop device for {image}: {reason}")]
    LoopAttach { image: PathBuf, reason: String },

    #[error("Failed to detach loop device {device}: {reason}")]
    LoopDetach { device: String, reason: String },

    #[error("Failed to mount {device} at {mount_point}: {reason}")]
    Mount {
        device: String,
        mount_point: PathBuf,
        reason: String,
    },

    #[error("Failed to unmount {mount_point}: {reason}")]
    Unmount { mount_point: PathBuf, reason: String },

    #[error("Failed to {action} service {service}: {reason}")]
    Service {
        service: String,
        action: &'static str,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeployError {
    /// 创建未知枚举值错误
    pub fn unknown_value(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownEnumValue {
            kind,
            value: value.into(),
        }
    }

    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// 是否属于资源准备阶段的致命错误
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            DeployError::ImageNotFound(_)
                | DeployError::LoopAttach { .. }
                | DeployError::LoopDetach { .. }
                | DeployError::Mount { .. }
                | DeployError::Unmount { .. }
                | DeployError::Service { .. }
        )
    }
}

/// 便捷类型别名
pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_value_display() {
        let err = DeployError::unknown_value("power state", "half-on");
        assert_eq!(err.to_string(), "Unknown power state value \"half-on\"");
    }

    #[test]
    fn test_setup_failure_classification() {
        let mount = DeployError::Mount {
            device: "/dev/loop0p1".to_string(),
            mount_point: PathBuf::from("/tmp/x"),
            reason: "busy".to_string(),
        };
        assert!(mount.is_setup_failure());
        assert!(DeployError::ImageNotFound(PathBuf::from("/nope.img")).is_setup_failure());
        assert!(!DeployError::MalformedOutput("x".to_string()).is_setup_failure());
        assert!(!DeployError::config("missing").is_setup_failure());
    }
}

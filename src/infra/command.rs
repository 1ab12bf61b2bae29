//! 命令执行器
//!
//! 路由器命令与本地文件系统操作都只依赖 `CommandExecutor` 接口：
//! - `LocalShell`：本地 `sh -c` 执行（losetup/mount/cp/service 等）
//! - `SshCommandRunner`：通过 SSH 在路由器上执行（见 `infra::ssh`）

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error};

/// 命令执行错误
#[derive(Debug, Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// 命令超时
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// SSH 传输失败
    #[error("SSH error: {0}")]
    Ssh(String),

    /// 命令以非零状态退出
    #[error("`{command}` exited with status {exit_code}: {output}")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        output: String,
    },
}

/// 命令执行结果：合并后的输出与退出码
#[derive(Clone, Debug, PartialEq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// 非零退出时转换为 `CommandError::NonZeroExit`
    pub fn check(self, command: &str) -> Result<Self, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError::NonZeroExit {
                command: command.to_string(),
                exit_code: self.exit_code,
                output: self.output.trim().to_string(),
            })
        }
    }
}

/// 命令执行能力
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// 执行命令，返回 `(output, exit_code)`
    ///
    /// 非零退出码不是错误，只有传输层失败（无法启动、超时、SSH 断开）才返回 `Err`
    async fn exec(&self, command: &str) -> Result<CommandOutput, CommandError>;

    /// 命令执行所在的主机
    fn host(&self) -> &str;
}

/// 本地 shell 执行器
pub struct LocalShell {
    timeout: Duration,
}

impl LocalShell {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

#[async_trait]
impl CommandExecutor for LocalShell {
    async fn exec(&self, command: &str) -> Result<CommandOutput, CommandError> {
        debug!(command = %command, "Running local command");

        let child = Command::new("sh")
            .args(["-c", command])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            result = child => result.map_err(CommandError::SpawnFailed)?,
            _ = tokio::time::sleep(self.timeout) => {
                error!(command = %command, "Command timed out after {:?}", self.timeout);
                return Err(CommandError::Timeout(self.timeout));
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            output: text,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn host(&self) -> &str {
        "localhost"
    }
}

/// 为 shell 命令行引用参数（单引号包裹）
pub fn shell_quote(arg: impl AsRef<str>) -> String {
    let arg = arg.as_ref();
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/-_.:=@%+,".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

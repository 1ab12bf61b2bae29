//! SSH 命令执行器
//!
//! 路由器命令通过 SSH 执行，每条命令建立一次会话（与路由器 CLI 的短连接习惯一致）

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tracing::{debug, warn};

use crate::config::RouterConfig;
use crate::infra::command::{CommandError, CommandExecutor, CommandOutput};

/// 客户端回调：接受任意主机密钥（路由器位于隔离的部署网络内）
struct RouterHandler;

#[async_trait]
impl client::Handler for RouterHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// 基于密码认证的 SSH 命令执行器
pub struct SshCommandRunner {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

impl SshCommandRunner {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            timeout,
        }
    }

    /// 从路由器配置创建
    pub fn from_router_config(config: &RouterConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.ssh_port,
            config.username.clone(),
            config.password.clone(),
            config.command_timeout,
        )
    }

    async fn connect(&self) -> Result<Handle<RouterHandler>, CommandError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.timeout),
            ..Default::default()
        });

        let mut session = client::connect(config, (self.host.as_str(), self.port), RouterHandler)
            .await
            .map_err(|e| CommandError::Ssh(format!("connect to {}:{}: {}", self.host, self.port, e)))?;

        let authenticated = session
            .authenticate_password(self.username.as_str(), self.password.as_str())
            .await
            .map_err(|e| CommandError::Ssh(format!("authentication: {}", e)))?;

        if !authenticated {
            return Err(CommandError::Ssh(format!(
                "password authentication rejected for {}@{}",
                self.username, self.host
            )));
        }

        Ok(session)
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, CommandError> {
        let session = self.connect().await?;

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| CommandError::Ssh(format!("open session: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| CommandError::Ssh(format!("exec: {}", e)))?;

        let mut output = Vec::new();
        let mut exit_code = None;

        // 退出码可能先于剩余输出到达，读到通道关闭为止
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                _ => {}
            }
        }

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            warn!(host = %self.host, error = %e, "SSH disconnect failed");
        }

        Ok(CommandOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_code: exit_code.unwrap_or(-1),
        })
    }
}

#[async_trait]
impl CommandExecutor for SshCommandRunner {
    async fn exec(&self, command: &str) -> Result<CommandOutput, CommandError> {
        debug!(host = %self.host, command = %command, "Running remote command");

        match tokio::time::timeout(self.timeout, self.run(command)).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout(self.timeout)),
        }
    }

    fn host(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Debug for SshCommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshCommandRunner")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

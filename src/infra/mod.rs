//! 基础设施模块
//!
//! 封装外部依赖（本地命令执行、SSH 远程命令、原始套接字）

pub mod command;
pub mod ssh;
pub mod syn;

pub use command::{shell_quote, CommandError, CommandExecutor, CommandOutput, LocalShell};
pub use ssh::SshCommandRunner;

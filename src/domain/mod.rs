//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio

pub mod deploy;
pub mod node;
pub mod port;

// Re-exports for convenience
pub use deploy::{
    ConfigureReport, DeployPhase, DeployReport, DeployStage, NodePrepareResult, StageStatus,
};
pub use node::{is_plain_dir_name, is_valid_mac, DeploymentBatch, Node, NodePaths};
pub use port::{port_name, PortRecord, PowerState, VoltageMode};

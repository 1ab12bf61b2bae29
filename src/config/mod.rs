//! 配置模块
//!
//! 环境变量解析与节点描述加载

pub mod env;
pub mod nodes;

pub use env::{
    BatchPolicy, BootWaitConfig, DeployerConfig, PxeServerConfig, RouterConfig, TestSuiteConfig,
};
pub use nodes::load_nodes;

//! 服务层模块
//!
//! 路由器供电、镜像解包、文件系统配置、启动确认与批次编排

pub mod artifacts;
pub mod boot_monitor;
pub mod deploy;
pub mod fs_config;
pub mod image;
pub mod power;
pub mod router;
pub mod test_suite;

pub use boot_monitor::{BootMonitor, NetworkProbe, ReachabilityProbe};
pub use deploy::{Deployment, NodePreparer};
pub use fs_config::FilesystemConfigurator;
pub use image::ImageUnpacker;
pub use power::PowerController;
pub use router::RouterClient;
pub use test_suite::TestSuiteRunner;

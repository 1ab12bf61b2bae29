//! 部署后的 Robot Framework 测试

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::TestSuiteConfig;
use crate::infra::command::{shell_quote, CommandExecutor};

/// 测试套件执行器
pub struct TestSuiteRunner {
    executor: Arc<dyn CommandExecutor>,
    config: TestSuiteConfig,
}

impl TestSuiteRunner {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: TestSuiteConfig) -> Self {
        Self { executor, config }
    }

    /// 依次运行每个测试，全部通过返回 true
    ///
    /// 某个测试失败后仍会继续运行其余测试
    pub async fn run(&self) -> bool {
        let Some(tests_dir) = self.config.tests_dir.as_ref().filter(|_| self.config.is_configured())
        else {
            info!("No tests configured, skipping test suite");
            return true;
        };

        info!(count = self.config.tests.len(), tests_dir = %tests_dir.display(), "Running test suite");

        let mut passed = 0;
        for test in &self.config.tests {
            let command = self.command_for(&tests_dir.join(test).to_string_lossy());
            match self.executor.exec(&command).await {
                Ok(output) if output.success() => {
                    info!(test = %test, "Test passed");
                    debug!(test = %test, output = %output.output.trim_end(), "Test output");
                    passed += 1;
                }
                Ok(output) => {
                    warn!(test = %test, exit_code = output.exit_code, output = %output.output.trim_end(), "Test failed");
                }
                Err(e) => {
                    error!(test = %test, error = %e, "Failed to run test");
                }
            }
        }

        info!(passed, total = self.config.tests.len(), "Test suite finished");
        passed == self.config.tests.len()
    }

    fn command_for(&self, test_path: &str) -> String {
        match &self.config.reports_dir {
            Some(reports) => format!(
                "robot -d {} {}",
                shell_quote(reports.to_string_lossy()),
                shell_quote(test_path)
            ),
            None => format!("robot {}", shell_quote(test_path)),
        }
    }
}

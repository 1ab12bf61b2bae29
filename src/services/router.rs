//! 路由器 PoE 端口客户端
//!
//! 通过 `CommandExecutor` 下发路由器 CLI 命令，并把 `poe print` 的文本输出解析为 `PortRecord`

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{PortRecord, PowerState};
use crate::error::{DeployError, DeployResult};
use crate::infra::command::CommandExecutor;

/// 查询所有 PoE 端口
pub const POE_PRINT_COMMAND: &str = "interface ethernet poe print without-paging";
/// 注释行标记
pub const COMMENT_MARKER: &str = ";;;";
/// 有效数据行的列数
const PORT_ROW_COLUMNS: usize = 8;

/// PoE 端口状态客户端
#[derive(Clone)]
pub struct RouterClient {
    executor: Arc<dyn CommandExecutor>,
}

impl RouterClient {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// 查询所有端口的当前状态
    ///
    /// 每次调用都会重新读取硬件状态
    pub async fn query_ports(&self) -> DeployResult<Vec<PortRecord>> {
        debug!(router = %self.executor.host(), command = POE_PRINT_COMMAND, "Querying PoE ports");

        let output = self
            .executor
            .exec(POE_PRINT_COMMAND)
            .await?
            .check(POE_PRINT_COMMAND)?;

        parse_poe_print(&output.output)
    }

    /// 按名称查询单个端口
    pub async fn port_by_name(&self, name: &str) -> DeployResult<Option<PortRecord>> {
        Ok(self
            .query_ports()
            .await?
            .into_iter()
            .find(|port| port.name == name))
    }

    /// 设置端口供电状态
    ///
    /// 非零退出返回 `Ok(false)`，不做回读校验
    pub async fn set_port_power(&self, port_name: &str, state: PowerState) -> DeployResult<bool> {
        let command = format!("interface ethernet poe set {} poe-out={}", port_name, state);
        debug!(router = %self.executor.host(), command = %command, "Setting PoE port power");

        let output = self.executor.exec(&command).await?;
        if !output.success() {
            warn!(
                port = %port_name,
                exit_code = output.exit_code,
                output = %output.output.trim(),
                "Router rejected PoE power command"
            );
        }
        Ok(output.success())
    }

    pub async fn power_on(&self, port_name: &str) -> DeployResult<bool> {
        self.set_port_power(port_name, PowerState::On).await
    }

    pub async fn power_off(&self, port_name: &str) -> DeployResult<bool> {
        self.set_port_power(port_name, PowerState::Off).await
    }
}

/// 解析 `interface ethernet poe print` 输出
///
/// 空行、注释行、表头行以及列数不为 8 的行都会被跳过；
/// 只有可识别行中的非法取值才会报错
pub fn parse_poe_print(output: &str) -> DeployResult<Vec<PortRecord>> {
    let mut ports = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains(COMMENT_MARKER) {
            continue;
        }
        if line.starts_with('#') || line.starts_with("Columns") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != PORT_ROW_COLUMNS {
            continue;
        }

        ports.push(parse_port_row(&fields)?);
    }

    Ok(ports)
}

fn parse_port_row(fields: &[&str]) -> DeployResult<PortRecord> {
    let priority = fields[4].parse::<i64>().map_err(|_| {
        DeployError::MalformedOutput(format!("priority \"{}\" of port {} is not an integer", fields[4], fields[1]))
    })?;

    let flag = |idx: usize, column: &str| {
        crate::domain::port::parse_flag(fields[idx]).ok_or_else(|| {
            DeployError::MalformedOutput(format!(
                "{} \"{}\" of port {} is not a boolean",
                column, fields[idx], fields[1]
            ))
        })
    };

    Ok(PortRecord {
        name: fields[1].to_string(),
        state: fields[2].parse()?,
        voltage: fields[3].parse()?,
        priority,
        lldp_enabled: flag(5, "lldp-enabled")?,
        cycle_ping_enabled: flag(6, "power-cycle-ping-enabled")?,
        power_cycle_interval: fields[7].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VoltageMode;
    use crate::testing::FakeHost;

    const PRINT_OUTPUT: &str = "\
Flags: X - disabled
Columns: NAME, POE-OUT, POE-VOLTAGE, POE-PRIORITY, POE-LLDP-ENABLED
#   NAME     POE-OUT    POE-VOLTAGE  POE-PRIORITY  POE-LLDP-ENABLED  POWER-CYCLE-PING-ENABLED  POWER-CYCLE-INTERVAL
0   ether2   auto-on    auto         10            no                no                        none

;;; uplink, do not touch
1   ether3   off        high         5             yes               yes                       none
2   ether4   forced-on  low          1             no                no
";

    #[test]
    fn test_parse_poe_print() {
        let ports = parse_poe_print(PRINT_OUTPUT).unwrap();

        // ether4 行只有 7 列，被跳过
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name, "ether2");
        assert_eq!(ports[0].state, PowerState::On);
        assert_eq!(ports[0].voltage, VoltageMode::Auto);
        assert_eq!(ports[0].priority, 10);
        assert!(!ports[0].lldp_enabled);

        assert_eq!(ports[1].name, "ether3");
        assert_eq!(ports[1].state, PowerState::Off);
        assert_eq!(ports[1].voltage, VoltageMode::High);
        assert!(ports[1].lldp_enabled);
        assert!(ports[1].cycle_ping_enabled);
        assert_eq!(ports[1].power_cycle_interval, "none");
    }

    #[test]
    fn test_comment_marker_line_is_skipped_even_with_eight_fields() {
        let output = "0 ether2 auto-on auto 10 no no ;;;\n";
        assert!(parse_poe_print(output).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_power_state_fails() {
        let output = "0   ether2   waiting    auto   10   no   no   none\n";
        let err = parse_poe_print(output).unwrap_err();
        assert!(matches!(err, DeployError::UnknownEnumValue { kind: "power state", .. }));
    }

    #[test]
    fn test_bad_priority_is_malformed() {
        let output = "0   ether2   off   auto   high   no   no   none\n";
        assert!(matches!(
            parse_poe_print(output),
            Err(DeployError::MalformedOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_query_ports_non_zero_exit_is_command_error() {
        let host = FakeHost::router(&[("ether2", PowerState::On)]);
        host.fail_commands_containing("poe print");
        let client = RouterClient::new(host.clone());

        let result = client.query_ports().await;
        assert!(matches!(result, Err(DeployError::Command(_))));
    }

    #[tokio::test]
    async fn test_set_port_power_reports_exit_status() {
        let host = FakeHost::router(&[("ether2", PowerState::On)]);
        let client = RouterClient::new(host.clone());

        assert!(client.power_off("ether2").await.unwrap());
        assert_eq!(
            client.port_by_name("ether2").await.unwrap().unwrap().state,
            PowerState::Off
        );

        // 路由器上不存在的端口：非零退出
        assert!(!client.set_port_power("ether9", PowerState::Off).await.unwrap());
        assert_eq!(
            host.commands_matching("poe-out="),
            vec![
                "interface ethernet poe set ether2 poe-out=off".to_string(),
                "interface ethernet poe set ether9 poe-out=off".to_string(),
            ]
        );
    }
}

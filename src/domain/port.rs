//! 路由器 PoE 端口领域模型

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// PoE 供电状态（路由器 `poe-out` 取值）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerState {
    Off,
    #[serde(rename = "auto-on")]
    On,
    ForcedOn,
}

impl PowerState {
    /// 路由器 CLI 中使用的取值
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Off => "off",
            PowerState::On => "auto-on",
            PowerState::ForcedOn => "forced-on",
        }
    }
}

impl FromStr for PowerState {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(PowerState::Off),
            "auto-on" => Ok(PowerState::On),
            "forced-on" => Ok(PowerState::ForcedOn),
            other => Err(DeployError::unknown_value("power state", other)),
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PoE 输出电压模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoltageMode {
    Auto,
    Low,
    High,
}

impl VoltageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoltageMode::Auto => "auto",
            VoltageMode::Low => "low",
            VoltageMode::High => "high",
        }
    }
}

impl FromStr for VoltageMode {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(VoltageMode::Auto),
            "low" => Ok(VoltageMode::Low),
            "high" => Ok(VoltageMode::High),
            other => Err(DeployError::unknown_value("voltage mode", other)),
        }
    }
}

impl fmt::Display for VoltageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个 PoE 端口的一次查询结果
///
/// 每次查询路由器都会重新生成，不跨调用缓存
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortRecord {
    /// 端口名 (e.g., "ether3")
    pub name: String,
    pub state: PowerState,
    pub voltage: VoltageMode,
    pub priority: i64,
    pub lldp_enabled: bool,
    pub cycle_ping_enabled: bool,
    /// 原样保留的 power-cycle-interval 列
    pub power_cycle_interval: String,
}

/// 路由器端口名：`ether{link}`
pub fn port_name(router_port_link: u32) -> String {
    format!("ether{}", router_port_link)
}

/// 解析路由器输出中的布尔列
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "yes" | "true" | "enabled" | "y" => Some(true),
        "0" | "n" | "no" | "none" | "false" | "disabled" => Some(false),
        _ => None,
    }
}

//! 节点供电控制
//!
//! 两阶段：逐个端口下发设置命令（遇错立即返回，不回滚），
//! 全部成功后一次性查询所有端口并校验目标状态

use std::collections::HashSet;

use tracing::{debug, error, info};

use crate::domain::{port_name, Node, PowerState};
use crate::services::router::RouterClient;

/// PoE 供电控制器
#[derive(Clone)]
pub struct PowerController {
    router: RouterClient,
}

impl PowerController {
    pub fn new(router: RouterClient) -> Self {
        Self { router }
    }

    /// 设置一组节点的供电状态并校验
    ///
    /// 只有回读结果中每个目标端口都处于 `state` 时才返回 true
    pub async fn set_power<'a, I>(&self, nodes: I, state: PowerState) -> bool
    where
        I: IntoIterator<Item = &'a Node>,
    {
        let ports: Vec<String> = nodes
            .into_iter()
            .map(|node| port_name(node.router_port_link))
            .collect();

        if ports.is_empty() {
            error!(state = %state, "No PoE ports to switch");
            return false;
        }

        for port in &ports {
            debug!(port = %port, state = %state, "Switching PoE port");
            match self.router.set_port_power(port, state).await {
                Ok(true) => {}
                Ok(false) => {
                    error!(port = %port, state = %state, "Failed to set PoE port state");
                    return false;
                }
                Err(e) => {
                    error!(port = %port, state = %state, error = %e, "Failed to set PoE port state");
                    return false;
                }
            }
        }

        self.verify(&ports, state).await
    }

    /// 单次查询校验所有目标端口
    async fn verify(&self, ports: &[String], state: PowerState) -> bool {
        debug!(count = ports.len(), state = %state, "Verifying PoE port states");

        let records = match self.router.query_ports().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to query PoE ports");
                return false;
            }
        };

        if records.is_empty() {
            error!("Router returned an empty PoE port list");
            return false;
        }

        let mut unseen: HashSet<&str> = ports.iter().map(String::as_str).collect();
        for record in &records {
            if !unseen.remove(record.name.as_str()) {
                continue;
            }
            if record.state != state {
                error!(
                    port = %record.name,
                    actual = %record.state,
                    expected = %state,
                    "PoE port is in unexpected state"
                );
                return false;
            }
        }

        if !unseen.is_empty() {
            error!(missing = ?unseen, "PoE ports missing from router output");
            return false;
        }

        info!(count = ports.len(), state = %state, "PoE ports verified");
        true
    }
}

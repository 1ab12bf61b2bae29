//! 启动确认轮询
//!
//! 两个阶段各自维护一个"未确认"主机集合：主机一旦探测成功即移出，且不会再加入；
//! 集合在截止时间前清空则返回 true，否则返回 false

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::Socket;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::infra::syn::{self, SynReply};

/// 主机/端口可达性探测
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// ICMP echo，超时内收到应答返回 true
    async fn ping(&self, host: &str, timeout: Duration) -> bool;

    /// TCP 握手探测，超时内收到 SYN-ACK 返回 true
    async fn syn_probe(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// 生产环境探测器
///
/// ICMP 通过系统 `ping`；失败（包括立即失败）都会等满给定超时再返回，
/// 调用方的轮询节奏因此不依赖失败的快慢。
/// 端口探测发送半开 SYN（见 [`crate::infra::syn`]），
/// 无法打开原始套接字时退回 TCP connect，并只记录一次
pub struct NetworkProbe {
    ping_program: String,
    raw_sockets: AtomicBool,
    ping_spawn_reported: AtomicBool,
}

impl NetworkProbe {
    pub fn new() -> Self {
        Self::with_ping_program("ping")
    }

    pub fn with_ping_program(program: impl Into<String>) -> Self {
        Self {
            ping_program: program.into(),
            raw_sockets: AtomicBool::new(true),
            ping_spawn_reported: AtomicBool::new(false),
        }
    }

    async fn run_ping(&self, host: &str, timeout: Duration) -> bool {
        // iputils ping 的 -W 以秒为单位，向上取整后再由外层超时截断
        let wait_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
        let child = Command::new(&self.ping_program)
            .args(["-c", "1", "-W", &wait_secs.to_string(), host])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                // 启动失败不会自行恢复（程序缺失、无权限），只报一次
                if !self.ping_spawn_reported.swap(true, Ordering::Relaxed) {
                    error!(program = %self.ping_program, error = %e, "Failed to run ping, hosts will not be confirmed");
                }
                false
            }
            Err(_) => false,
        }
    }

    async fn half_open(&self, socket: Socket, host: &str, port: u16, timeout: Duration) -> bool {
        let dst = match resolve_ipv4(host, port).await {
            Ok(dst) => dst,
            Err(e) => {
                debug!(host = %host, error = %e, "No IPv4 address, using TCP connect");
                return connect_check(host, port, timeout).await;
            }
        };

        let outcome = tokio::task::spawn_blocking(move || syn::check_port(&socket, dst, port, timeout)).await;
        match outcome {
            Ok(Ok(Some(SynReply::Open))) => true,
            Ok(Ok(Some(SynReply::Closed))) => {
                debug!(host = %host, port, "Port not open yet (RST)");
                false
            }
            Ok(Ok(None)) => false,
            Ok(Err(e)) => {
                debug!(host = %host, port, error = %e, "SYN send failed");
                false
            }
            Err(e) => {
                warn!(host = %host, port, error = %e, "SYN task failed");
                false
            }
        }
    }
}

impl Default for NetworkProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReachabilityProbe for NetworkProbe {
    async fn ping(&self, host: &str, timeout: Duration) -> bool {
        let started = Instant::now();
        if self.run_ping(host, timeout).await {
            return true;
        }
        tokio::time::sleep_until(started + timeout).await;
        false
    }

    async fn syn_probe(&self, host: &str, port: u16, timeout: Duration) -> bool {
        if self.raw_sockets.load(Ordering::Relaxed) {
            match syn::open_raw_socket() {
                Ok(socket) => return self.half_open(socket, host, port, timeout).await,
                Err(e) => {
                    if self.raw_sockets.swap(false, Ordering::Relaxed) {
                        warn!(error = %e, "Cannot open raw socket, falling back to TCP connect for port checks");
                    }
                }
            }
        }
        connect_check(host, port, timeout).await
    }
}

/// 完整握手，建立后立即关闭
async fn connect_check(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            debug!(host = %host, port, error = %e, "Port not open yet");
            false
        }
        Err(_) => false,
    }
}

async fn resolve_ipv4(host: &str, port: u16) -> io::Result<Ipv4Addr> {
    if let Ok(IpAddr::V4(addr)) = host.parse::<IpAddr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host((host, port))
        .await?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} has no IPv4 address", host)))
}

/// 启动确认监视器
#[derive(Clone)]
pub struct BootMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    port_probe_timeout: Duration,
}

impl BootMonitor {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, port_probe_timeout: Duration) -> Self {
        Self {
            probe,
            port_probe_timeout,
        }
    }

    /// 等待所有主机响应 ping
    ///
    /// 每轮的单主机超时为 `interval / 剩余主机数`，使整轮耗时仍落在 `interval` 之内；
    /// 随着主机陆续确认，剩余主机的超时会变长
    pub async fn wait_for_hosts(&self, hosts: &[String], timeout: Duration, interval: Duration) -> bool {
        let mut pending = unique_hosts(hosts);
        if pending.is_empty() {
            return true;
        }

        info!(hosts = ?pending, timeout_secs = timeout.as_secs(), "Waiting for hosts to respond to ping");

        let start = Instant::now();
        while start.elapsed() < timeout {
            let probe_timeout = interval / pending.len() as u32;

            let mut still_pending = Vec::with_capacity(pending.len());
            for host in pending {
                if self.probe.ping(&host, probe_timeout).await {
                    info!(host = %host, elapsed_ms = start.elapsed().as_millis() as u64, "Host is reachable");
                } else {
                    still_pending.push(host);
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                return true;
            }
        }

        warn!(pending = ?pending, "Timed out waiting for hosts");
        false
    }

    /// 等待所有主机的 `port` 端口开放
    ///
    /// 一轮探测提前结束时睡满剩余的 `interval`，保持约每 `interval` 一轮
    pub async fn wait_for_ports(
        &self,
        hosts: &[String],
        port: u16,
        timeout: Duration,
        interval: Duration,
    ) -> bool {
        let mut pending = unique_hosts(hosts);
        if pending.is_empty() {
            return true;
        }

        info!(hosts = ?pending, port, timeout_secs = timeout.as_secs(), "Waiting for port to open");

        let start = Instant::now();
        while start.elapsed() < timeout {
            let iteration_start = Instant::now();

            let mut still_pending = Vec::with_capacity(pending.len());
            for host in pending {
                if self.probe.syn_probe(&host, port, self.port_probe_timeout).await {
                    info!(host = %host, port, elapsed_ms = start.elapsed().as_millis() as u64, "Port is open");
                } else {
                    still_pending.push(host);
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                return true;
            }

            let spent = iteration_start.elapsed();
            if spent < interval {
                tokio::time::sleep(interval - spent).await;
            }
        }

        warn!(pending = ?pending, port, "Timed out waiting for port");
        false
    }
}

/// 去重并保持原有顺序，保证每个主机最多被移出一次
fn unique_hosts(hosts: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    hosts
        .iter()
        .filter(|h| seen.insert(h.as_str()))
        .cloned()
        .collect()
}

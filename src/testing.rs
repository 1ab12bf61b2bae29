//! 测试替身：模拟路由器与本地块设备命令的执行器、可编排的可达性探测

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::{Node, PowerState};
use crate::infra::command::{CommandError, CommandExecutor, CommandOutput};
use crate::services::boot_monitor::ReachabilityProbe;

pub fn test_node(index: u8, router_port_link: u32) -> Node {
    Node {
        hostname: format!("csl-{}", index),
        ip_address: format!("10.0.0.{}", 10 + index),
        mac_address: format!("dc:a6:32:00:00:{:02x}", index),
        username: "root".to_string(),
        password: "root".to_string(),
        port: 22,
        router_port_link,
        nfs_folder_name: None,
    }
}

#[derive(Default)]
struct FakeState {
    commands: Vec<String>,
    ports: Vec<(String, PowerState)>,
    sticky_ports: HashSet<String>,
    accept_unknown_ports: bool,
    failing: Vec<String>,
    next_loop: u32,
    loops: HashSet<String>,
    mounts: Vec<(String, String)>,
    violations: Vec<String>,
    partition_files: HashMap<u32, Vec<(String, String)>>,
}

/// 记录所有命令并模拟路由器 CLI 与 losetup/mount/umount 的执行器
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn router(ports: &[(&str, PowerState)]) -> Arc<Self> {
        let host = Self::default();
        host.state.lock().unwrap().ports = ports
            .iter()
            .map(|(name, state)| (name.to_string(), *state))
            .collect();
        Arc::new(host)
    }

    /// 包含该子串的命令以退出码 1 失败
    pub fn fail_commands_containing(&self, needle: &str) {
        self.state.lock().unwrap().failing.push(needle.to_string());
    }

    /// 对该端口的设置命令返回成功，但状态不变
    pub fn ignore_power_changes_on(&self, port: &str) {
        self.state.lock().unwrap().sticky_ports.insert(port.to_string());
    }

    /// 未知端口的设置命令也返回成功
    pub fn accept_unknown_ports(&self) {
        self.state.lock().unwrap().accept_unknown_ports = true;
    }

    /// `cp -a` 从该分区的挂载点复制时，向目标目录写入这些文件
    pub fn with_partition_files(&self, partition: u32, files: &[(&str, &str)]) {
        self.state.lock().unwrap().partition_files.insert(
            partition,
            files
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
        );
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn commands_matching(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    pub fn port_state(&self, name: &str) -> Option<PowerState> {
        self.state
            .lock()
            .unwrap()
            .ports
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }

    pub fn attached_loops(&self) -> usize {
        self.state.lock().unwrap().loops.len()
    }

    pub fn active_mounts(&self) -> usize {
        self.state.lock().unwrap().mounts.len()
    }

    /// 在仍有分区挂载时解除 loop 设备之类的顺序错误
    pub fn order_violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    fn print_ports(state: &FakeState) -> String {
        let mut out = String::from(
            "Columns: NAME, POE-OUT, POE-VOLTAGE, POE-PRIORITY, POE-LLDP-ENABLED, POWER-CYCLE-PING-ENABLED\n\
             #   NAME     POE-OUT   POE-VOLTAGE  POE-PRIORITY  POE-LLDP-ENABLED  POWER-CYCLE-PING-ENABLED  POWER-CYCLE-INTERVAL\n",
        );
        for (idx, (name, power)) in state.ports.iter().enumerate() {
            out.push_str(&format!(
                "{}   {}   {}   auto   10   no   no   none\n",
                idx, name, power
            ));
        }
        out
    }

    fn handle(state: &mut FakeState, command: &str) -> CommandOutput {
        if state.failing.iter().any(|needle| command.contains(needle.as_str())) {
            return CommandOutput::new("failure injected\n", 1);
        }

        let args: Vec<String> = command
            .split_whitespace()
            .map(|a| a.trim_matches('\'').to_string())
            .collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["interface", "ethernet", "poe", "print", ..] => {
                CommandOutput::new(Self::print_ports(state), 0)
            }
            ["interface", "ethernet", "poe", "set", port, value] => {
                let Some(target) = value
                    .strip_prefix("poe-out=")
                    .and_then(|v| v.parse::<PowerState>().ok())
                else {
                    return CommandOutput::new("invalid value\n", 1);
                };
                let sticky = state.sticky_ports.contains(*port);
                match state.ports.iter_mut().find(|(n, _)| n == port) {
                    Some((_, current)) => {
                        if !sticky {
                            *current = target;
                        }
                        CommandOutput::new("", 0)
                    }
                    None if state.accept_unknown_ports => CommandOutput::new("", 0),
                    None => CommandOutput::new("no such item\n", 1),
                }
            }
            ["losetup", "--show", "-fP", _image] => {
                let device = format!("/dev/loop{}", state.next_loop);
                state.next_loop += 1;
                state.loops.insert(device.clone());
                CommandOutput::new(format!("{}\n", device), 0)
            }
            ["losetup", "-d", device] => {
                if state.mounts.iter().any(|(d, _)| d.starts_with(*device)) {
                    state
                        .violations
                        .push(format!("detached {} while partitions were mounted", device));
                }
                if state.loops.remove(*device) {
                    CommandOutput::new("", 0)
                } else {
                    CommandOutput::new("losetup: no such device\n", 1)
                }
            }
            ["mount", "-o", "ro", device, mount_point] => {
                let parent_attached = state.loops.iter().any(|l| device.starts_with(l.as_str()));
                if !parent_attached {
                    return CommandOutput::new("mount: special device does not exist\n", 32);
                }
                state.mounts.push((device.to_string(), mount_point.to_string()));
                CommandOutput::new("", 0)
            }
            ["umount", mount_point] => {
                match state.mounts.iter().position(|(_, m)| m == mount_point) {
                    Some(idx) => {
                        state.mounts.remove(idx);
                        CommandOutput::new("", 0)
                    }
                    None => CommandOutput::new("umount: not mounted\n", 32),
                }
            }
            ["cp", "-a", source, destination] => {
                let mount_point = source.trim_end_matches("/.");
                let Some((device, _)) = state.mounts.iter().find(|(_, m)| m == mount_point) else {
                    return CommandOutput::new("cp: cannot stat source\n", 1);
                };
                let partition = device
                    .rsplit('p')
                    .next()
                    .and_then(|n| n.parse::<u32>().ok());
                let files = partition
                    .and_then(|n| state.partition_files.get(&n))
                    .cloned()
                    .unwrap_or_default();
                for (path, content) in files {
                    let target = std::path::Path::new(destination).join(path);
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent).unwrap();
                    }
                    std::fs::write(target, content).unwrap();
                }
                CommandOutput::new("", 0)
            }
            _ => CommandOutput::new("", 0),
        }
    }
}

/// 一个可部署的最小镜像内容：boot 分区的 cmdline 与根分区的配置文件
pub fn stage_bootable_image(host: &FakeHost) {
    host.with_partition_files(1, &[("cmdline.txt", "console=serial0,115200 root=PARTUUID=abcd-02\n")]);
    host.with_partition_files(
        2,
        &[
            ("etc/fstab", "proc /proc proc defaults 0 0\nPARTUUID=abcd-02 / ext4 defaults,noatime 0 1\n"),
            ("etc/ssh/sshd_config", "#PermitRootLogin prohibit-password\nPasswordAuthentication no\n"),
            ("etc/hostname", "raspberrypi\n"),
        ],
    );
}

#[async_trait]
impl CommandExecutor for FakeHost {
    async fn exec(&self, command: &str) -> Result<CommandOutput, CommandError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        Ok(Self::handle(&mut state, command))
    }

    fn host(&self) -> &str {
        "fake"
    }
}

/// 一次探测调用
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeCall {
    pub kind: &'static str,
    pub host: String,
    pub timeout: Duration,
}

/// 按时间表返回可达结果的探测器：主机在指定时刻之后才可达，
/// 不可达时探测会耗尽其超时
pub struct ScriptedProbe {
    start: Instant,
    hosts_up: HashMap<String, Duration>,
    ports_open: HashMap<String, Duration>,
    calls: Mutex<Vec<ProbeCall>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            hosts_up: HashMap::new(),
            ports_open: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn host_up_after(mut self, host: &str, after: Duration) -> Self {
        self.hosts_up.insert(host.to_string(), after);
        self
    }

    pub fn port_open_after(mut self, host: &str, after: Duration) -> Self {
        self.ports_open.insert(host.to_string(), after);
        self
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, kind: &str, host: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.kind == kind && c.host == host)
            .count()
    }

    async fn answer(&self, kind: &'static str, schedule: &HashMap<String, Duration>, host: &str, timeout: Duration) -> bool {
        self.calls.lock().unwrap().push(ProbeCall {
            kind,
            host: host.to_string(),
            timeout,
        });
        match schedule.get(host) {
            Some(after) if self.start.elapsed() >= *after => true,
            _ => {
                tokio::time::sleep(timeout).await;
                false
            }
        }
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn ping(&self, host: &str, timeout: Duration) -> bool {
        self.answer("ping", &self.hosts_up, host, timeout).await
    }

    async fn syn_probe(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let _ = port;
        self.answer("syn", &self.ports_open, host, timeout).await
    }
}

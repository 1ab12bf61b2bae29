//! 半开 TCP 探测
//!
//! 通过原始套接字发送一个 SYN，收到 SYN-ACK 视为端口开放，收到 RST 视为关闭。
//! 握手不会完成：内核收到没有对应连接的 SYN-ACK 后自行回复 RST。
//! 需要 CAP_NET_RAW（部署器本身以 root 运行以操作 loop 设备与挂载）。

use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

const TCP_HEADER_LEN: usize = 20;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPPROTO_TCP: u8 = 6;
const FLAG_SYN: u8 = 0x02;
const FLAG_RST: u8 = 0x04;
const FLAG_ACK: u8 = 0x10;
const SYN_WINDOW: u16 = 64240;

/// 目标对 SYN 的应答
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SynReply {
    /// SYN-ACK
    Open,
    /// RST
    Closed,
}

/// 打开 IPv4/TCP 原始套接字，没有权限时返回 `PermissionDenied`
pub fn open_raw_socket() -> io::Result<Socket> {
    Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::TCP))
}

/// 发送 SYN 并等待应答（阻塞），超时内没有相关应答返回 `Ok(None)`
pub fn check_port(socket: &Socket, dst: Ipv4Addr, port: u16, timeout: Duration) -> io::Result<Option<SynReply>> {
    let src = source_addr(dst, port)?;

    let nonce = uuid::Uuid::new_v4();
    let bytes = nonce.as_bytes();
    let src_port = 40000 + u16::from_be_bytes([bytes[0], bytes[1]]) % 20000;
    let seq = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);

    let segment = build_syn(src, dst, src_port, port, seq);
    socket.send_to(&segment, &SockAddr::from(SocketAddrV4::new(dst, 0)))?;

    // 原始套接字会收到本机所有入站 TCP 报文，只认目标端口发回本次源端口的应答
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 1500];
    let mut reader = socket;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        socket.set_read_timeout(Some(remaining))?;

        let n = match reader.read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        if let Some(reply) = classify_reply(&buf[..n], dst, port, src_port) {
            return Ok(Some(reply));
        }
    }
}

/// 本机到达 `dst` 时使用的源地址（UDP connect 不发送任何报文）
fn source_addr(dst: Ipv4Addr, port: u16) -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((dst, port))?;
    match socket.local_addr()? {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(_) => Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no IPv4 source address")),
    }
}

/// 构造不带选项的 SYN 报文段（校验和已填写）
pub fn build_syn(src: Ipv4Addr, dst: Ipv4Addr, src_port: u16, dst_port: u16, seq: u32) -> [u8; TCP_HEADER_LEN] {
    let mut header = [0u8; TCP_HEADER_LEN];
    header[0..2].copy_from_slice(&src_port.to_be_bytes());
    header[2..4].copy_from_slice(&dst_port.to_be_bytes());
    header[4..8].copy_from_slice(&seq.to_be_bytes());
    header[12] = ((TCP_HEADER_LEN / 4) as u8) << 4;
    header[13] = FLAG_SYN;
    header[14..16].copy_from_slice(&SYN_WINDOW.to_be_bytes());

    let checksum = tcp_checksum(src, dst, &header);
    header[16..18].copy_from_slice(&checksum.to_be_bytes());
    header
}

/// 带 IPv4 伪首部的 TCP 校验和
pub fn tcp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut add = |bytes: &[u8]| {
        for chunk in bytes.chunks(2) {
            let hi = chunk[0];
            let lo = chunk.get(1).copied().unwrap_or(0);
            sum += u32::from(u16::from_be_bytes([hi, lo]));
        }
    };

    add(&src.octets());
    add(&dst.octets());
    add(&[0, IPPROTO_TCP]);
    add(&(segment.len() as u16).to_be_bytes());
    add(segment);

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// 解析原始套接字收到的 IPv4 报文，判断是否为本次探测的应答
pub fn classify_reply(packet: &[u8], dst: Ipv4Addr, dst_port: u16, src_port: u16) -> Option<SynReply> {
    if packet.len() < IPV4_MIN_HEADER_LEN || packet[0] >> 4 != 4 || packet[9] != IPPROTO_TCP {
        return None;
    }
    let ihl = usize::from(packet[0] & 0x0f) * 4;
    if ihl < IPV4_MIN_HEADER_LEN || packet.len() < ihl + TCP_HEADER_LEN {
        return None;
    }
    if Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]) != dst {
        return None;
    }

    let tcp = &packet[ihl..];
    if u16::from_be_bytes([tcp[0], tcp[1]]) != dst_port || u16::from_be_bytes([tcp[2], tcp[3]]) != src_port {
        return None;
    }

    let flags = tcp[13];
    if flags & (FLAG_SYN | FLAG_ACK) == FLAG_SYN | FLAG_ACK {
        Some(SynReply::Open)
    } else if flags & FLAG_RST != 0 {
        Some(SynReply::Closed)
    } else {
        None
    }
}

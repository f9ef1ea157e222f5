//! Parsers for the platform connection tables: `/proc/net/tcp{,6}`, `netstat -ano`
//! and `lsof -nP -iTCP`. Pure text-in/records-out so they can be tested on any OS.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::types::{ConnectionState, RawConnection};

#[derive(Debug, Clone, PartialEq)]
pub struct ProcNetEntry {
    pub local_ip: IpAddr,
    pub local_port: u16,
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    pub state: ConnectionState,
    pub inode: u64,
}

/// Parse the contents of /proc/net/tcp (or tcp6 when `ipv6`). The header line is skipped.
pub fn parse_proc_net(content: &str, ipv6: bool) -> Vec<ProcNetEntry> {
    let mut out = Vec::new();
    for line in content.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 {
            continue;
        }
        let Some((local_ip, local_port)) = parse_hex_addr_port(parts[1], ipv6) else {
            continue;
        };
        let Some((remote_ip, remote_port)) = parse_hex_addr_port(parts[2], ipv6) else {
            continue;
        };
        out.push(ProcNetEntry {
            local_ip,
            local_port,
            remote_ip,
            remote_port,
            state: ConnectionState::from_proc_hex(parts[3]),
            inode: parts[9].parse::<u64>().unwrap_or(0),
        });
    }
    out
}

fn parse_hex_addr_port(s: &str, ipv6: bool) -> Option<(IpAddr, u16)> {
    let (addr_hex, port_hex) = s.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let ip = if ipv6 {
        let v6 = parse_hex_ipv6(addr_hex)?;
        // ::ffff:a.b.c.d -> a.b.c.d
        match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }
    } else {
        IpAddr::V4(parse_hex_ipv4(addr_hex)?)
    };
    Some((ip, port))
}

fn parse_hex_ipv4(hex: &str) -> Option<Ipv4Addr> {
    if hex.len() != 8 {
        return None;
    }
    let raw = u32::from_str_radix(hex, 16).ok()?;
    let b = raw.to_le_bytes();
    Some(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
}

fn parse_hex_ipv6(hex: &str) -> Option<Ipv6Addr> {
    if hex.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for i in 0..4 {
        let raw = u32::from_str_radix(&hex[i * 8..(i + 1) * 8], 16).ok()?;
        bytes[i * 4..i * 4 + 4].copy_from_slice(&raw.to_le_bytes());
    }
    Some(Ipv6Addr::from(bytes))
}

/// `socket:[12345]` -> 12345
pub fn parse_socket_inode(link: &str) -> Option<u64> {
    let rest = link.strip_prefix("socket:[")?;
    rest.strip_suffix(']')?.parse::<u64>().ok()
}

/// Split `1.2.3.4:443`, `[::1]:80` or `*:*` into address and port.
pub fn split_host_port(s: &str) -> Option<(String, u16)> {
    let (host, port) = s.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = if port == "*" { 0 } else { port.parse::<u16>().ok()? };
    Some((host.to_string(), port))
}

/// Parse Windows `netstat -ano` output, IPv4 and IPv6 alike. Only TCP rows carry a state
/// column; UDP rows are skipped.
pub fn parse_netstat(output: &str) -> Vec<RawConnection> {
    let mut out = Vec::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let tcp = parts
            .first()
            .is_some_and(|p| p.eq_ignore_ascii_case("TCP") || p.eq_ignore_ascii_case("TCPv6"));
        if parts.len() != 5 || !tcp {
            continue;
        }
        let (Some((local_address, local_port)), Some((remote_address, remote_port))) =
            (split_host_port(parts[1]), split_host_port(parts[2]))
        else {
            continue;
        };
        let Ok(pid) = parts[4].parse::<u32>() else {
            continue;
        };
        out.push(RawConnection {
            pid,
            local_address,
            local_port,
            remote_address,
            remote_port,
            state: ConnectionState::from_label(parts[3]),
        });
    }
    out
}

/// Parse `lsof -nP -iTCP` output (COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME).
pub fn parse_lsof(output: &str) -> Vec<RawConnection> {
    let mut out = Vec::new();
    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 9 {
            continue;
        }
        let Ok(pid) = parts[1].parse::<u32>() else {
            continue;
        };
        let Some(name) = parts.iter().find(|p| p.contains("->")) else {
            // listening sockets have no peer
            continue;
        };
        let Some((local, remote)) = name.split_once("->") else {
            continue;
        };
        let (Some((local_address, local_port)), Some((remote_address, remote_port))) =
            (split_host_port(local), split_host_port(remote))
        else {
            continue;
        };
        let state = parts
            .last()
            .filter(|s| s.starts_with('('))
            .map(|s| ConnectionState::from_label(s))
            .unwrap_or(ConnectionState::Unknown);
        out.push(RawConnection {
            pid,
            local_address,
            local_port,
            remote_address,
            remote_port,
            state,
        });
    }
    out
}

/// Listening sockets and sockets without a remote peer are not active connections.
pub fn is_active(state: ConnectionState, remote_address: &str, remote_port: u16) -> bool {
    if state == ConnectionState::Listen || remote_port == 0 {
        return false;
    }
    !matches!(remote_address, "" | "*" | "0.0.0.0" | "::")
}

//! Connection-table parsers for each platform's text format.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use nettrack_agent::netparse::{
    is_active, parse_lsof, parse_netstat, parse_proc_net, parse_socket_inode, split_host_port,
};
use nettrack_agent::types::ConnectionState;

const PROC_TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 21430 1 0000000000000000 100 0 0 10 0
   1: 0A01A8C0:C350 22D8B85D:01BB 01 00000000:00000000 02:000A7D9B 00000000  1000        0 98765 2 0000000000000000 20 4 30 10 -1
   2: garbage
";

const PROC_TCP6: &str = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000001000000:1F90 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 111 1 0000000000000000 100 0 0 10 0
   1: 0000000000000000FFFF00000A01A8C0:D431 0000000000000000FFFF000022D8B85D:0050 06 00000000:00000000 03:00000BB8 00000000     0        0 0 3 0000000000000000
";

#[test]
fn proc_net_tcp_v4_rows() {
    let rows = parse_proc_net(PROC_TCP, false);
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].local_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(rows[0].local_port, 3306);
    assert_eq!(rows[0].state, ConnectionState::Listen);
    assert_eq!(rows[0].inode, 21430);

    assert_eq!(rows[1].local_ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
    assert_eq!(rows[1].local_port, 50000);
    assert_eq!(rows[1].remote_ip, IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
    assert_eq!(rows[1].remote_port, 443);
    assert_eq!(rows[1].state, ConnectionState::Established);
    assert_eq!(rows[1].inode, 98765);
}

#[test]
fn proc_net_tcp6_rows_unmap_v4() {
    let rows = parse_proc_net(PROC_TCP6, true);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].local_ip, IpAddr::V6(Ipv6Addr::LOCALHOST));
    assert_eq!(rows[0].local_port, 8080);
    assert_eq!(rows[1].local_ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
    assert_eq!(rows[1].remote_ip, IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
    assert_eq!(rows[1].remote_port, 80);
    assert_eq!(rows[1].state, ConnectionState::TimeWait);
}

#[test]
fn socket_inode_links() {
    assert_eq!(parse_socket_inode("socket:[12345]"), Some(12345));
    assert_eq!(parse_socket_inode("pipe:[12345]"), None);
    assert_eq!(parse_socket_inode("/dev/null"), None);
}

#[test]
fn host_port_forms() {
    assert_eq!(split_host_port("1.2.3.4:443"), Some(("1.2.3.4".into(), 443)));
    assert_eq!(split_host_port("[::1]:80"), Some(("::1".into(), 80)));
    assert_eq!(split_host_port("*:*"), Some(("*".into(), 0)));
    assert_eq!(split_host_port("nohost"), None);
}

#[test]
fn netstat_tcp_rows() {
    let out = "
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1044
  TCP    192.168.1.10:50123     140.82.112.3:443       ESTABLISHED     7340
  TCP    [::1]:49670            [::1]:49671            TIME_WAIT       0
  UDP    0.0.0.0:5353           *:*                                    2212
";
    let conns = parse_netstat(out);
    assert_eq!(conns.len(), 3);
    assert_eq!(conns[0].state, ConnectionState::Listen);
    assert_eq!(conns[1].pid, 7340);
    assert_eq!(conns[1].remote_address, "140.82.112.3");
    assert_eq!(conns[1].remote_port, 443);
    assert_eq!(conns[1].state, ConnectionState::Established);
    assert_eq!(conns[2].local_address, "::1");
    assert_eq!(conns[2].state, ConnectionState::TimeWait);
}

#[test]
fn netstat_ipv6_rows() {
    let out = "
  Proto  Local Address          Foreign Address        State           PID
  TCP    [2001:db8::1]:50000    [2606:4700::1]:443     ESTABLISHED     42
  TCPv6  [fe80::1%12]:50001     [2001:db8::2]:22       SYN_SENT        43
  UDP    [::]:5353              *:*                                    2212
";
    let conns = parse_netstat(out);
    assert_eq!(conns.len(), 2);
    assert_eq!(conns[0].pid, 42);
    assert_eq!(conns[0].local_address, "2001:db8::1");
    assert_eq!(conns[0].local_port, 50000);
    assert_eq!(conns[0].remote_address, "2606:4700::1");
    assert_eq!(conns[0].remote_port, 443);
    assert_eq!(conns[0].state, ConnectionState::Established);
    assert!(is_active(conns[0].state, &conns[0].remote_address, conns[0].remote_port));
    assert_eq!(conns[1].pid, 43);
    assert_eq!(conns[1].remote_port, 22);
}

#[test]
fn lsof_rows() {
    let out = "COMMAND     PID  USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME
rapportd    512 alice    4u  IPv4 0x1a2b3c4d5e6f7a8b      0t0  TCP *:49152 (LISTEN)
firefox    2201 alice   88u  IPv4 0x2b3c4d5e6f7a8b9c      0t0  TCP 192.168.1.10:50500->151.101.1.69:443 (ESTABLISHED)
ssh        3300 alice    3u  IPv6 0x3c4d5e6f7a8b9c0d      0t0  TCP [fe80::1]:60000->[fe80::2]:22 (CLOSE_WAIT)
";
    let conns = parse_lsof(out);
    assert_eq!(conns.len(), 2);
    assert_eq!(conns[0].pid, 2201);
    assert_eq!(conns[0].local_port, 50500);
    assert_eq!(conns[0].remote_address, "151.101.1.69");
    assert_eq!(conns[0].state, ConnectionState::Established);
    assert_eq!(conns[1].remote_address, "fe80::2");
    assert_eq!(conns[1].remote_port, 22);
    assert_eq!(conns[1].state, ConnectionState::CloseWait);
}

#[test]
fn state_labels_and_codes() {
    assert_eq!(ConnectionState::from_label("LISTENING"), ConnectionState::Listen);
    assert_eq!(ConnectionState::from_label("(SYN_SENT)"), ConnectionState::SynSent);
    assert_eq!(ConnectionState::from_label("SYN_RECEIVED"), ConnectionState::SynRecv);
    assert_eq!(ConnectionState::from_label("FIN_WAIT_2"), ConnectionState::FinWait2);
    assert_eq!(ConnectionState::from_label("CLOSED"), ConnectionState::Close);
    assert_eq!(ConnectionState::from_label("BOUND"), ConnectionState::Unknown);
    assert_eq!(ConnectionState::from_proc_hex("01"), ConnectionState::Established);
    assert_eq!(ConnectionState::from_proc_hex("0B"), ConnectionState::Closing);
    assert_eq!(ConnectionState::from_proc_hex("zz"), ConnectionState::Unknown);
}

#[test]
fn listening_and_peerless_sockets_are_inactive() {
    assert!(is_active(ConnectionState::Established, "1.2.3.4", 443));
    assert!(is_active(ConnectionState::TimeWait, "::ffff:1.2.3.4", 80));
    assert!(!is_active(ConnectionState::Listen, "1.2.3.4", 443));
    assert!(!is_active(ConnectionState::Established, "0.0.0.0", 443));
    assert!(!is_active(ConnectionState::Established, "::", 443));
    assert!(!is_active(ConnectionState::Established, "*", 0));
    assert!(!is_active(ConnectionState::SynSent, "1.2.3.4", 0));
}

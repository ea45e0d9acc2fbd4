//! Listening-socket lookup per process.
//!
//! | Platform      | Source                                                   |
//! |---------------|----------------------------------------------------------|
//! | Linux         | `/proc/<pid>/fd` socket inodes joined with `/proc/<pid>/net/tcp{,6}` |
//! | Other Unix    | `lsof -nP -a -p <pid> -iTCP -sTCP:LISTEN -Fn`            |
//! | Windows       | `netstat -ano -p TCP`                                    |
//!
//! The text parsers are platform-independent so they can be exercised
//! everywhere; only [`listening_ports`] dispatches on the target OS.

use std::collections::HashSet;

/// Socket state code for `LISTEN` in `/proc/net/tcp`.
const PROC_TCP_LISTEN: &str = "0A";

/// TCP ports in LISTEN state owned by `pid`.
///
/// Returns an empty list when the process is gone, inaccessible, or the
/// platform tool is unavailable.
#[must_use]
pub fn listening_ports(pid: u32) -> Vec<u16> {
    let mut ports = platform_listening_ports(pid);
    ports.sort_unstable();
    ports.dedup();
    ports
}

#[cfg(target_os = "linux")]
fn platform_listening_ports(pid: u32) -> Vec<u16> {
    use std::fs;

    let Ok(entries) = fs::read_dir(format!("/proc/{pid}/fd")) else {
        return Vec::new();
    };

    let inodes: HashSet<u64> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| fs::read_link(entry.path()).ok())
        .filter_map(|target| parse_socket_inode(&target.to_string_lossy()))
        .collect();

    if inodes.is_empty() {
        return Vec::new();
    }

    ["tcp", "tcp6"]
        .iter()
        .filter_map(|table| fs::read_to_string(format!("/proc/{pid}/net/{table}")).ok())
        .flat_map(|content| parse_proc_net_tcp(&content, &inodes))
        .collect()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn platform_listening_ports(pid: u32) -> Vec<u16> {
    let output = std::process::Command::new("lsof")
        .args(["-nP", "-a", "-p", &pid.to_string(), "-iTCP", "-sTCP:LISTEN", "-Fn"])
        .output();
    match output {
        Ok(out) => parse_lsof_output(&String::from_utf8_lossy(&out.stdout)),
        Err(err) => {
            tracing::debug!(pid, %err, "lsof unavailable");
            Vec::new()
        }
    }
}

#[cfg(windows)]
fn platform_listening_ports(pid: u32) -> Vec<u16> {
    let output = std::process::Command::new("netstat")
        .args(["-ano", "-p", "TCP"])
        .output();
    match output {
        Ok(out) => parse_netstat_output(&String::from_utf8_lossy(&out.stdout), pid),
        Err(err) => {
            tracing::debug!(pid, %err, "netstat unavailable");
            Vec::new()
        }
    }
}

#[cfg(not(any(unix, windows)))]
fn platform_listening_ports(_pid: u32) -> Vec<u16> {
    Vec::new()
}

/// Extract the inode from an fd link target of the form `socket:[12345]`.
#[must_use]
pub fn parse_socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Ports of LISTEN rows in a `/proc/net/tcp` table whose inode is in `inodes`.
///
/// Rows look like:
///
/// ```text
///   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
///    0: 0100007F:1000 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 41231
/// ```
#[must_use]
pub fn parse_proc_net_tcp(content: &str, inodes: &HashSet<u64>) -> Vec<u16> {
    content
        .lines()
        .skip(1)
        .filter_map(|row| {
            let fields: Vec<&str> = row.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != PROC_TCP_LISTEN {
                return None;
            }
            let inode: u64 = fields[9].parse().ok()?;
            if !inodes.contains(&inode) {
                return None;
            }
            let (_, port_hex) = fields[1].rsplit_once(':')?;
            u16::from_str_radix(port_hex, 16).ok()
        })
        .collect()
}

/// Ports from `lsof -Fn` output (`n127.0.0.1:4096`, `n*:4096`, `n[::1]:4096`).
#[must_use]
pub fn parse_lsof_output(output: &str) -> Vec<u16> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix('n'))
        .filter_map(|addr| addr.rsplit_once(':'))
        .filter_map(|(_, port)| port.parse().ok())
        .collect()
}

/// Ports owned by `pid` in LISTENING rows of `netstat -ano` output.
///
/// Rows look like `  TCP    127.0.0.1:4096    0.0.0.0:0    LISTENING    1234`.
#[must_use]
pub fn parse_netstat_output(output: &str, pid: u32) -> Vec<u16> {
    output
        .lines()
        .filter_map(|row| {
            let fields: Vec<&str> = row.split_whitespace().collect();
            match fields.as_slice() {
                [proto, local, _, state, owner]
                    if proto.eq_ignore_ascii_case("tcp")
                        && *state == "LISTENING"
                        && owner.parse::<u32>().ok() == Some(pid) =>
                {
                    local.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
                }
                _ => None,
            }
        })
        .collect()
}

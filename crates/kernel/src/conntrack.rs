//! Kernel connection tracking table (`/proc/net/nf_conntrack`).

use crate::Error;
use std::net::IpAddr;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
    Other,
}

impl Transport {
    fn from_token(token: &str) -> Self {
        match token {
            "tcp" => Self::Tcp,
            "udp" => Self::Udp,
            _ => Self::Other,
        }
    }
}

/// Original-direction source and destination port of one tracked flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub transport: Transport,
    pub src: IpAddr,
    pub dport: Option<u16>,
}

impl Flow {
    pub fn is_tls(&self, transport: Transport) -> bool {
        self.transport == transport && self.dport == Some(443)
    }
}

/// Parse one table line, e.g.
/// `ipv4 2 tcp 6 431999 ESTABLISHED src=192.168.50.51 dst=172.217.0.14 sport=51324 dport=443 ...`.
///
/// Only the first `src=` and `dport=` tokens count; later ones describe the
/// reply direction.
pub fn parse_line(line: &str) -> Option<Flow> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 6 {
        return None;
    }
    let transport = Transport::from_token(parts[2]);
    let src = parts
        .iter()
        .find_map(|token| token.strip_prefix("src="))?
        .parse()
        .ok()?;
    let dport = parts
        .iter()
        .find_map(|token| token.strip_prefix("dport="))
        .and_then(|port| port.parse().ok());
    Some(Flow {
        transport,
        src,
        dport,
    })
}

/// Read at most `limit` lines of the table at `path`. A missing table yields
/// no flows.
pub async fn read_table(path: &Path, limit: usize) -> Result<Vec<Flow>, Error> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut flows = Vec::new();
    let mut read = 0;
    while read < limit {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        read += 1;
        // Labels such as `secctx=` may carry arbitrary bytes.
        let line = String::from_utf8_lossy(&buf);
        if let Some(flow) = parse_line(line.trim_end()) {
            flows.push(flow);
        }
    }
    Ok(flows)
}

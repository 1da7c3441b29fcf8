use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub addr: String,
    pub answered: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<String>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_addrs() -> Vec<String> {
    vec![
        "192.168.10.1:8889".into(), // vehicle access point
        "127.0.0.1:8889".into(),    // local bridge / simulator
    ]
}

/// Send the SDK handshake to each candidate in turn; the first one that answers
/// `ok` within `response_timeout` wins.
pub async fn autodetect_sdk(candidates: Vec<String>, response_timeout: Duration) -> Result<AutodetectResult> {
    let mut probes = Vec::new();
    let sock = UdpSocket::bind("0.0.0.0:0").await.context("bind probe socket")?;

    for addr in candidates {
        let start = Instant::now();
        let (answered, note) = match probe_one(&sock, &addr, response_timeout).await {
            Ok(reply) if reply.eq_ignore_ascii_case("ok") => (true, "ok".to_string()),
            Ok(reply) => (false, format!("unexpected reply {:?}", reply)),
            Err(e) => {
                warn!("fc probe failed addr={} err={:#}", addr, e);
                (false, format!("{:#}", e))
            }
        };

        probes.push(ProbeResult {
            addr: addr.clone(),
            answered,
            elapsed_ms: start.elapsed().as_millis() as u64,
            note,
        });

        if answered {
            info!("fc probe: OK {}", addr);
            return Ok(AutodetectResult { chosen: Some(addr), probes });
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

async fn probe_one(sock: &UdpSocket, addr: &str, response_timeout: Duration) -> Result<String> {
    let target = tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("resolve {}", addr))?
        .next()
        .with_context(|| format!("no address for {}", addr))?;
    sock.send_to(b"command", target).await.context("send handshake")?;

    let mut buf = [0u8; 256];
    let deadline = Instant::now() + response_timeout;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let (n, from) = tokio::time::timeout(left, sock.recv_from(&mut buf))
            .await
            .context("no reply")?
            .context("recv")?;
        if from.ip() == target.ip() {
            return Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_picks_first_answering_candidate() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let answering = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let answering_addr = answering.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok((_, from)) = answering.recv_from(&mut buf).await {
                let _ = answering.send_to(b"ok", from).await;
            }
        });

        let res = autodetect_sdk(
            vec![silent.local_addr().unwrap().to_string(), answering_addr.clone()],
            Duration::from_millis(150),
        )
        .await
        .unwrap();

        assert_eq!(res.chosen.as_deref(), Some(answering_addr.as_str()));
        assert_eq!(res.probes.len(), 2);
        assert!(!res.probes[0].answered);
        assert!(res.probes[1].answered);
    }
}

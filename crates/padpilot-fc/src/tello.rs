use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::safety::CommandLimits;
use crate::state::{LinkStatus, TelloState};
use crate::{Actuator, ActuatorError, Command, TelloConfig};

/// Text-SDK link to a Tello-class vehicle over UDP.
///
/// Commands go out on one socket and are answered with `ok`/`error ...` on the same socket.
/// The vehicle also pushes a state string about 10 times a second to a second port; a
/// background task keeps the latest decoded copy in `LinkStatus`.
pub struct TelloLink {
    cfg: TelloConfig,
    socket: Option<UdpSocket>,
    target: Option<SocketAddr>,
    status: Arc<Mutex<LinkStatus>>,
    state_task: Option<JoinHandle<()>>,
    limits: CommandLimits,
}

impl TelloLink {
    pub fn new(cfg: TelloConfig) -> Self {
        Self {
            cfg,
            socket: None,
            target: None,
            status: Arc::new(Mutex::new(LinkStatus::default())),
            state_task: None,
            limits: CommandLimits::default(),
        }
    }

    /// Shared handle for observers (e.g. `fc status`).
    pub fn status(&self) -> Arc<Mutex<LinkStatus>> {
        self.status.clone()
    }

    fn lock_status(&self) -> MutexGuard<'_, LinkStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn latest_state(&self) -> Result<TelloState, ActuatorError> {
        if self.socket.is_none() {
            return Err(ActuatorError::NotConnected);
        }
        let st = self.lock_status();
        match (&st.state, st.state_age()) {
            (Some(s), Some(age)) if age <= self.cfg.state_timeout() => Ok(s.clone()),
            (Some(_), Some(age)) => Err(ActuatorError::ConnectionLost(format!(
                "no state packet for {} ms",
                age.as_millis()
            ))),
            _ => Err(ActuatorError::ConnectionLost("no state packet received yet".into())),
        }
    }

    async fn spawn_state_listener(&mut self) -> Result<(), ActuatorError> {
        let sock = UdpSocket::bind(self.cfg.state_bind()).await?;
        let status = self.status.clone();

        self.state_task = Some(tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match sock.recv_from(&mut buf).await {
                    Ok((n, _from)) => {
                        let raw = String::from_utf8_lossy(&buf[..n]);
                        match TelloState::parse(&raw) {
                            Some(st) => status.lock().unwrap_or_else(|e| e.into_inner()).record_state(st),
                            None => debug!("tello: unparsable state packet: {:?}", raw),
                        }
                    }
                    Err(e) => {
                        warn!("tello: state socket closed: {}", e);
                        break;
                    }
                }
            }
        }));
        Ok(())
    }
}

impl Drop for TelloLink {
    fn drop(&mut self) {
        if let Some(task) = self.state_task.take() {
            task.abort();
        }
    }
}

fn is_ok_response(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("ok")
}

async fn recv_response(socket: &UdpSocket, target: SocketAddr) -> std::io::Result<String> {
    let mut buf = [0u8; 1024];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        if from.ip() == target.ip() {
            return Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string());
        }
        debug!("tello: ignoring datagram from {}", from);
    }
}

/// Discard late answers to earlier, timed-out commands.
fn drain_stale(socket: &UdpSocket) {
    let mut buf = [0u8; 1024];
    while let Ok((n, _)) = socket.try_recv_from(&mut buf) {
        debug!("tello: dropped stale response {:?}", String::from_utf8_lossy(&buf[..n]));
    }
}

#[async_trait]
impl Actuator for TelloLink {
    async fn connect(&mut self) -> Result<(), ActuatorError> {
        let target = tokio::net::lookup_host(self.cfg.address())
            .await?
            .next()
            .ok_or_else(|| ActuatorError::CommandFailed {
                command: "connect".into(),
                reason: format!("cannot resolve {}", self.cfg.address()),
            })?;
        let socket = UdpSocket::bind(self.cfg.bind()).await?;

        self.socket = Some(socket);
        self.target = Some(target);
        self.spawn_state_listener().await?;

        if let Err(e) = self.send(&Command::Sdk).await {
            warn!("tello: SDK handshake with {} failed: {}", target, e);
            self.disconnect().await?;
            return Err(e);
        }

        let mut st = self.lock_status();
        st.connected = true;
        st.address = Some(target.to_string());
        info!("tello: connected to {}", target);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ActuatorError> {
        if let Some(task) = self.state_task.take() {
            task.abort();
        }
        self.socket = None;
        self.target = None;
        self.lock_status().connected = false;
        Ok(())
    }

    async fn send(&mut self, cmd: &Command) -> Result<(), ActuatorError> {
        self.limits.check(cmd)?;
        let (socket, target) = match (&self.socket, self.target) {
            (Some(s), Some(t)) => (s, t),
            _ => return Err(ActuatorError::NotConnected),
        };
        let wire = cmd.wire();

        if !cmd.expects_response() {
            socket.send_to(wire.as_bytes(), target).await?;
            debug!("tello: -> {} (no response expected)", wire);
            return Ok(());
        }

        let wait = if cmd.is_long_running() {
            self.cfg.long_response_timeout()
        } else {
            self.cfg.response_timeout()
        };
        let attempts = self.cfg.retry_count();
        let mut last_err = None;

        for attempt in 1..=attempts {
            drain_stale(socket);
            socket.send_to(wire.as_bytes(), target).await?;
            debug!("tello: -> {} (attempt {}/{})", wire, attempt, attempts);

            match timeout(wait, recv_response(socket, target)).await {
                Ok(Ok(text)) => {
                    debug!("tello: <- {}", text);
                    self.status.lock().unwrap_or_else(|e| e.into_inner()).last_response = Some(text.clone());
                    if is_ok_response(&text) {
                        return Ok(());
                    }
                    warn!("tello: `{}` answered {:?} (attempt {}/{})", wire, text, attempt, attempts);
                    last_err = Some(ActuatorError::CommandFailed { command: wire.clone(), reason: text });
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!("tello: `{}` timed out after {:?} (attempt {}/{})", wire, wait, attempt, attempts);
                    last_err = Some(ActuatorError::Timeout { command: wire.clone(), attempts: attempt });
                }
            }
        }

        Err(last_err.unwrap_or(ActuatorError::Timeout { command: wire, attempts }))
    }

    fn altitude_cm(&self) -> Result<i32, ActuatorError> {
        Ok(self.latest_state()?.height_cm)
    }

    fn battery_percent(&self) -> Result<u8, ActuatorError> {
        Ok(self.latest_state()?.battery)
    }

    fn mission_pad_id(&self) -> Result<Option<u8>, ActuatorError> {
        Ok(self.latest_state()?.pad_id())
    }
}

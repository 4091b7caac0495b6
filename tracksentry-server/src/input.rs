//! Track message input
//!
//! Track sources send one JSON object per line, either as UDP datagrams
//! (several lines per datagram are allowed) or recorded in a file for
//! replay:
//!
//! ```text
//! {"type":"update","source":{"trackType":"ais","sourceIndex":0,"sourceId":244123},
//!  "update":{"position":{"lat":51.9,"lon":4.1}},"timeMs":1700000000000}
//! {"type":"delete","source":{"trackType":"ais","sourceIndex":0,"sourceId":244123}}
//! ```

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;
use tracksentry_core::{TrackSource, TrackUpdate};

use crate::error::ServerError;
use crate::Session;

/// Longest pause between two replayed messages
const MAX_REPLAY_GAP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackMessage {
    #[serde(rename_all = "camelCase")]
    Update {
        source: TrackSource,
        update: TrackUpdate,
        /// Recording time, used to pace a replay
        #[serde(default)]
        time_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Delete {
        source: TrackSource,
        #[serde(default)]
        time_ms: Option<u64>,
    },
}

impl TrackMessage {
    pub fn time_ms(&self) -> Option<u64> {
        match self {
            TrackMessage::Update { time_ms, .. } | TrackMessage::Delete { time_ms, .. } => *time_ms,
        }
    }
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<TrackMessage>, ServerError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

fn apply_text(session: &Session, text: &str, origin: &str) {
    for line in text.lines() {
        match parse_line(line) {
            Ok(Some(message)) => session.apply(message),
            Ok(None) => {}
            Err(e) => warn!("{}: {}", origin, e),
        }
    }
}

fn create_udp_socket(addr: SocketAddr) -> Result<UdpSocket, ServerError> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

// =============================================================================
// UDP
// =============================================================================

pub struct UdpInput {
    session: Session,
    addr: SocketAddr,
    buf: Vec<u8>,
}

impl UdpInput {
    pub fn new(session: Session, addr: SocketAddr) -> Self {
        UdpInput {
            session,
            addr,
            buf: vec![0u8; 65536],
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        let socket = create_udp_socket(self.addr)?;
        info!("Listening for track messages on {}", self.addr);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    debug!("UdpInput: shutdown");
                    return Ok(());
                },
                r = socket.recv_from(&mut self.buf) => {
                    match r {
                        Ok((len, from)) => {
                            trace!("{} bytes from {}", len, from);
                            match std::str::from_utf8(&self.buf[..len]) {
                                Ok(text) => apply_text(&self.session, text, &from.to_string()),
                                Err(e) => warn!("{}: {}", from, e),
                            }
                        }
                        Err(e) => {
                            warn!("Receive error on {}: {}", self.addr, e);
                        }
                    }
                },
            }
        }
    }
}

// =============================================================================
// Replay
// =============================================================================

pub struct Replay {
    session: Session,
    path: PathBuf,
}

impl Replay {
    pub fn new(session: Session, path: PathBuf) -> Self {
        Replay { session, path }
    }

    /// Messages are applied at the pace they were recorded, as far as
    /// their `timeMs` allows.
    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| ServerError::Io {
                path: self.path.clone(),
                source,
            })?;
        let mut lines = BufReader::new(file).lines();
        let origin = self.path.display().to_string();
        info!("Replaying track messages from {}", origin);

        let mut last_time: Option<u64> = None;
        let mut count = 0usize;
        loop {
            let line = tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                r = lines.next_line() => r,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(source) => {
                    return Err(ServerError::Io {
                        path: self.path.clone(),
                        source,
                    })
                }
            };
            let message = match parse_line(&line) {
                Ok(Some(m)) => m,
                Ok(None) => continue,
                Err(e) => {
                    warn!("{}: {}", origin, e);
                    continue;
                }
            };

            if let Some(t) = message.time_ms() {
                if let Some(gap) = last_time.and_then(|last| replay_gap(last, t)) {
                    tokio::select! {
                        _ = subsys.on_shutdown_requested() => {
                            return Ok(());
                        },
                        _ = sleep(gap) => {},
                    }
                }
                last_time = Some(t);
            }
            self.session.apply(message);
            count += 1;
        }
        info!("Replay of {} finished after {} messages", origin, count);
        Ok(())
    }
}

fn replay_gap(last_ms: u64, next_ms: u64) -> Option<Duration> {
    let gap = next_ms.checked_sub(last_ms)?;
    if gap == 0 {
        return None;
    }
    Some(Duration::from_millis(gap).min(MAX_REPLAY_GAP))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracksentry_core::TrackType;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("  # recorded at sea").unwrap(), None);

        let m = parse_line(
            r#"{"type":"update","source":{"trackType":"ais","sourceIndex":1,"sourceId":244123},"update":{"position":{"lat":51.9,"lon":4.1}},"timeMs":1000}"#,
        )
        .unwrap()
        .unwrap();
        match &m {
            TrackMessage::Update { source, update, .. } => {
                assert_eq!(source.track_type, TrackType::Ais);
                assert_eq!(source.source_id, 244123);
                assert!(update.position.is_some());
                assert!(update.velocity.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(m.time_ms(), Some(1000));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_line("{"), Err(ServerError::Message(_))));
        assert!(parse_line(r#"{"type":"move","source":{}}"#).is_err());
    }

    #[test]
    fn test_replay_gap() {
        assert_eq!(replay_gap(1000, 1000), None);
        assert_eq!(replay_gap(2000, 1000), None);
        assert_eq!(replay_gap(1000, 1250), Some(Duration::from_millis(250)));
        assert_eq!(replay_gap(0, 60_000), Some(MAX_REPLAY_GAP));
    }
}

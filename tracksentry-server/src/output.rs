//! Native [`AlarmOutput`]
//!
//! Network messages go out as UDP datagrams, broadcast allowed. Sounds
//! have no audio device here and are logged. Alarm log records are
//! appended to one file per UTC day, named `<prefix>_YYYYMMDD.log`.

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use socket2::{Domain, Protocol, Socket, Type};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use tracksentry_core::{AlarmLogRecord, AlarmOutput, AlarmSound, OutputError};

use crate::error::ServerError;

// =============================================================================
// Alarm Log File
// =============================================================================

#[derive(Debug, Default)]
pub struct AlarmLogFile {
    prefix: String,
    current: Option<(NaiveDate, File)>,
}

impl AlarmLogFile {
    pub fn set_prefix(&mut self, prefix: &str) {
        if self.prefix != prefix {
            self.prefix = prefix.to_string();
            self.current = None;
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        PathBuf::from(format!("{}_{}.log", self.prefix, date.format("%Y%m%d")))
    }

    pub fn write(&mut self, record: &AlarmLogRecord) -> Result<(), OutputError> {
        if self.prefix.is_empty() {
            return Ok(());
        }
        let time = DateTime::<Utc>::from_timestamp_millis(record.time_ms as i64)
            .ok_or_else(|| OutputError::new(format!("bad alarm time {}", record.time_ms)))?;
        let date = time.date_naive();

        if !matches!(&self.current, Some((d, _)) if *d == date) {
            let path = self.path_for(date);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            info!("Alarm log file {}", path.display());
            self.current = Some((date, file));
        }
        if let Some((_, file)) = &mut self.current {
            writeln!(file, "{},{}", time.format("%Y-%m-%d %H:%M:%S%.3f"), record)?;
        }
        Ok(())
    }
}

// =============================================================================
// Server Output
// =============================================================================

pub struct ServerOutput {
    net: Option<(UdpSocket, SocketAddr)>,
    log_file: AlarmLogFile,
}

impl ServerOutput {
    pub fn new(net_mesg_addr: Option<SocketAddr>) -> Result<Self, ServerError> {
        let net = match net_mesg_addr {
            Some(addr) => Some((create_send_socket(addr)?, addr)),
            None => None,
        };
        Ok(ServerOutput {
            net,
            log_file: AlarmLogFile::default(),
        })
    }

    pub fn set_log_prefix(&mut self, prefix: &str) {
        self.log_file.set_prefix(prefix);
    }
}

fn create_send_socket(addr: SocketAddr) -> Result<UdpSocket, ServerError> {
    let (domain, bind) = if addr.is_ipv4() {
        (Domain::IPV4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    } else {
        (Domain::IPV6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)))
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(addr.is_ipv4())?;
    socket.set_nonblocking(true)?;
    socket.bind(&bind.into())?;
    Ok(socket.into())
}

impl AlarmOutput for ServerOutput {
    fn play_sound(&mut self, sound: AlarmSound, once: bool) {
        if once {
            info!("Alarm sound {:?}", sound);
        } else {
            debug!("Alarm sound {:?} (continuous)", sound);
        }
    }

    fn send_net_mesg(&mut self, mesg: &str) -> Result<(), OutputError> {
        match &self.net {
            Some((socket, addr)) => {
                socket.send_to(mesg.as_bytes(), addr)?;
                Ok(())
            }
            None => {
                debug!("No network message address: {}", mesg.trim_end());
                Ok(())
            }
        }
    }

    fn log_alarm(&mut self, record: &AlarmLogRecord) -> Result<(), OutputError> {
        self.log_file.write(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracksentry_core::AlarmState;

    fn record(time_ms: u64, alarm_id: u32) -> AlarmLogRecord {
        AlarmLogRecord {
            time_ms,
            alarm_id,
            config_name: "Intruder".to_string(),
            state: AlarmState::Active,
            track1: Some(7),
            track2: None,
            trigger: "Track in zone".to_string(),
        }
    }

    #[test]
    fn test_log_file_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("alarms");
        let mut log = AlarmLogFile::default();
        log.set_prefix(&prefix.to_string_lossy());

        // 2023-11-14 22:13:20 UTC, then the next day
        log.write(&record(1_700_000_000_000, 1)).unwrap();
        log.write(&record(1_700_000_001_000, 2)).unwrap();
        log.write(&record(1_700_086_400_000, 3)).unwrap();

        let day1 = std::fs::read_to_string(dir.path().join("alarms_20231114.log")).unwrap();
        let lines: Vec<_> = day1.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2023-11-14 22:13:20.000,1,Intruder,"));
        assert!(lines[0].ends_with(",7,,Track in zone"));

        let day2 = std::fs::read_to_string(dir.path().join("alarms_20231115.log")).unwrap();
        assert_eq!(day2.lines().count(), 1);
    }

    #[test]
    fn test_no_prefix_writes_nothing() {
        let mut log = AlarmLogFile::default();
        log.write(&record(1_700_000_000_000, 1)).unwrap();
        assert!(log.current.is_none());
    }

    #[test]
    fn test_net_mesg_reaches_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut output = ServerOutput::new(Some(addr)).unwrap();
        output.send_net_mesg("$RATTM,01*00\r\n").unwrap();

        let mut buf = [0u8; 128];
        listener
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"$RATTM,01*00\r\n");
    }
}

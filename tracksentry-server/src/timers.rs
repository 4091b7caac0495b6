//! Alarm timers
//!
//! ```text
//!   every 1 s  background conditions, alarm timeouts, network messages
//!   every 2 s  alarm sounds
//! ```
//!
//! The configuration is saved when the subsystem shuts down.

use log::{debug, warn};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::error::ServerError;
use crate::Session;

const BACKGROUND_INTERVAL: Duration = Duration::from_secs(1);
const TIMEOUT_INTERVAL: Duration = Duration::from_secs(1);
const SOUND_INTERVAL: Duration = Duration::from_secs(2);
const NET_MESG_INTERVAL: Duration = Duration::from_secs(1);

fn ticker(period: Duration) -> Interval {
    let mut i = interval(period);
    i.set_missed_tick_behavior(MissedTickBehavior::Skip);
    i
}

pub struct AlarmTimers {
    session: Session,
}

impl AlarmTimers {
    pub fn new(session: Session) -> Self {
        AlarmTimers { session }
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        let mut background = ticker(BACKGROUND_INTERVAL);
        let mut timeouts = ticker(TIMEOUT_INTERVAL);
        let mut sounds = ticker(SOUND_INTERVAL);
        let mut net_mesgs = ticker(NET_MESG_INTERVAL);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    debug!("AlarmTimers: shutdown");
                    break;
                },
                _ = background.tick() => self.session.background(),
                _ = timeouts.tick() => self.session.check_alarm_timeouts(),
                _ = sounds.tick() => self.session.play_alarm_sounds(),
                _ = net_mesgs.tick() => self.session.send_net_mesgs(),
            }
        }

        if let Err(e) = self.session.save_config() {
            warn!("Cannot save configuration: {}", e);
        }
        Ok(())
    }
}

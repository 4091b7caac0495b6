//! NMEA 0183 TTM sentences for alarm network messages
//!
//! ```text
//! $RATTM,<id>,<dist>,<brg>,T,<spd>,<crs>,T,<cpa>,<tcpa>,N,<name>,T,,<hhmmss.ss>,A*hh
//! ```
//!
//! Distance and bearing are from the reference position when one is set.
//! Distances are in nautical miles, speed in knots and TCPA in minutes.

use num_derive::FromPrimitive;
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt::Write;

use crate::cpa::CpaResult;
use crate::geo::LatLong;
use crate::track::{FieldType, UniTrack};

const METRES_PER_NM: f64 = 1852.0;
const MPS_TO_KNOTS: f64 = 3600.0 / METRES_PER_NM;

/// Alarm network message format. Values are stored in config files.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, Serialize_repr, Deserialize_repr,
)]
#[repr(u32)]
pub enum NetMesgType {
    #[default]
    None = 0,
    /// TTM carrying the unified track ID
    TtmV1 = 1,
    /// TTM carrying the track descriptor
    TtmV2 = 2,
}

impl NetMesgType {
    /// Decode a stored value. 183 is an older spelling of V1.
    pub fn from_value(v: u32) -> Option<NetMesgType> {
        match v {
            183 => Some(NetMesgType::TtmV1),
            v => num_traits::FromPrimitive::from_u32(v),
        }
    }
}

/// Append `*hh\r\n` to a sentence body that starts with `$`
fn finish(body: &str) -> String {
    let checksum = body
        .bytes()
        .skip_while(|b| *b == b'$')
        .fold(0u8, |acc, b| acc ^ b);
    format!("{body}*{checksum:02X}\r\n")
}

/// UTC time of day as `hhmmss.ss`
fn time_of_day(now_ms: u64) -> String {
    let ms_of_day = now_ms % 86_400_000;
    let secs = ms_of_day / 1000;
    let hundredths = (ms_of_day % 1000) / 10;
    format!(
        "{:02}{:02}{:02}.{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        hundredths
    )
}

/// Build one TTM sentence for an alarming track
pub fn build_ttm(
    mesg_type: NetMesgType,
    track: &UniTrack,
    reference: Option<LatLong>,
    cpa: Option<&CpaResult>,
    alarm_value: u32,
    now_ms: u64,
) -> Option<String> {
    let target = match mesg_type {
        NetMesgType::None => return None,
        NetMesgType::TtmV1 => track.id().to_string(),
        NetMesgType::TtmV2 => track.descriptor(FieldType::Id)?.to_string(),
    };

    let mut body = String::with_capacity(96);
    let _ = write!(body, "$RATTM,{target},");
    match (reference, track.position) {
        (Some(r), Some(p)) => {
            let _ = write!(
                body,
                "{:.3},{:.1},T,",
                r.distance_to(&p) / METRES_PER_NM,
                r.bearing_to(&p)
            );
        }
        _ => body.push_str(",,T,"),
    }
    match track.velocity {
        Some(v) => {
            let _ = write!(body, "{:.2},{:.1},T,", v.speed_mps * MPS_TO_KNOTS, v.course_degs);
        }
        None => body.push_str(",,T,"),
    }
    match cpa {
        Some(c) => {
            let _ = write!(
                body,
                "{:.3},{:.2},",
                c.cpa_metres / METRES_PER_NM,
                c.tcpa_secs / 60.0
            );
        }
        None => body.push_str(",,"),
    }
    let _ = write!(body, "N,{alarm_value},T,,{},A", time_of_day(now_ms));
    Some(finish(&body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // Reference sentence from the GPS world
        let s = finish("$GPGLL,5057.970,N,00146.110,E,142451,A");
        assert_eq!(s, "$GPGLL,5057.970,N,00146.110,E,142451,A*27\r\n");
    }

    #[test]
    fn test_time_of_day() {
        assert_eq!(time_of_day(0), "000000.00");
        // 1970-01-02 13:45:07.89
        assert_eq!(time_of_day(86_400_000 + 49_507_890), "134507.89");
    }

    #[test]
    fn test_mesg_type_values() {
        assert_eq!(NetMesgType::from_value(183), Some(NetMesgType::TtmV1));
        assert_eq!(NetMesgType::from_value(2), Some(NetMesgType::TtmV2));
        assert_eq!(NetMesgType::from_value(3), None);
    }
}

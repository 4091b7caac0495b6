//! Track descriptors
//!
//! A descriptor identifies a track independently of its unified ID, so
//! it can be stored in configuration and re-resolved later:
//!
//! ```text
//! <isFused><srcType><srcIndex>.<fieldType>.<field>[P]
//!
//!   isFused   0 or 1
//!   srcType   R (radar), A (AIS), B (ADS-B), F (fused)
//!   srcIndex  decimal source index
//!   fieldType numeric FieldType
//!   field     decimal, except AA (6 hex digits) and Mode codes (4 octal digits)
//!   P         present when the field identifies the track across sessions
//! ```
//!
//! Example: `0A0.2.235001234P` is the AIS track with MMSI 235001234.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt;
use std::str::FromStr;

use super::TrackType;
use crate::error::Error;

/// Which field of the track the descriptor encodes.
/// Values are stored in configuration files.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, Serialize_repr, Deserialize_repr,
)]
#[repr(u32)]
pub enum FieldType {
    /// Best persistent field for the track type (resolved when building)
    Persistent = 0,
    Id = 1,
    Mmsi = 2,
    Aa = 3,
    Mode3A = 4,
    Mode2 = 5,
    Mode1 = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub is_fused: bool,
    pub source_type: TrackType,
    pub source_index: u32,
    pub field_type: FieldType,
    pub field: u32,
    pub persistent: bool,
}

impl Descriptor {
    pub fn parse(s: &str) -> Result<Self, Error> {
        s.parse()
    }

    /// Same track identity, ignoring the persistence marker
    pub fn matches(&self, other: &Descriptor) -> bool {
        self.is_fused == other.is_fused
            && self.source_type == other.source_type
            && self.source_index == other.source_index
            && self.field_type == other.field_type
            && self.field == other.field
    }
}

fn source_type_char(t: TrackType) -> char {
    match t {
        TrackType::Radar => 'R',
        TrackType::Ais => 'A',
        TrackType::Adsb => 'B',
        TrackType::Fused => 'F',
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}.{}.",
            u8::from(self.is_fused),
            source_type_char(self.source_type),
            self.source_index,
            self.field_type as u32
        )?;
        match self.field_type {
            FieldType::Aa => write!(f, "{:06X}", self.field)?,
            FieldType::Mode3A | FieldType::Mode2 | FieldType::Mode1 => {
                write!(f, "{:04o}", self.field)?
            }
            _ => write!(f, "{}", self.field)?,
        }
        if self.persistent {
            write!(f, "P")?;
        }
        Ok(())
    }
}

impl FromStr for Descriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::InvalidDescriptor(s.to_string());
        let s = s.trim();
        let (body, persistent) = match s.strip_suffix('P') {
            Some(body) => (body, true),
            None => (s, false),
        };

        let mut parts = body.splitn(3, '.');
        let head = parts.next().ok_or_else(bad)?;
        let field_type = parts.next().ok_or_else(bad)?;
        let field = parts.next().ok_or_else(bad)?;

        let mut chars = head.chars();
        let is_fused = match chars.next() {
            Some('0') => false,
            Some('1') => true,
            _ => return Err(bad()),
        };
        let source_type = match chars.next() {
            Some('R') => TrackType::Radar,
            Some('A') => TrackType::Ais,
            Some('B') => TrackType::Adsb,
            Some('F') => TrackType::Fused,
            _ => return Err(bad()),
        };
        let source_index: u32 = chars.as_str().parse().map_err(|_| bad())?;
        let field_type: u32 = field_type.parse().map_err(|_| bad())?;
        let field_type = FieldType::from_u32(field_type).ok_or_else(bad)?;
        if field_type == FieldType::Persistent {
            return Err(bad());
        }
        let field = match field_type {
            FieldType::Aa => u32::from_str_radix(field, 16),
            FieldType::Mode3A | FieldType::Mode2 | FieldType::Mode1 => u32::from_str_radix(field, 8),
            _ => field.parse(),
        }
        .map_err(|_| bad())?;

        Ok(Descriptor {
            is_fused,
            source_type,
            source_index,
            field_type,
            field,
            persistent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let d = Descriptor {
            is_fused: false,
            source_type: TrackType::Ais,
            source_index: 0,
            field_type: FieldType::Mmsi,
            field: 235001234,
            persistent: true,
        };
        assert_eq!(d.to_string(), "0A0.2.235001234P");

        let d = Descriptor {
            is_fused: false,
            source_type: TrackType::Adsb,
            source_index: 1,
            field_type: FieldType::Aa,
            field: 0x4CA2D1,
            persistent: true,
        };
        assert_eq!(d.to_string(), "0B1.3.4CA2D1P");

        let d = Descriptor {
            is_fused: true,
            source_type: TrackType::Radar,
            source_index: 2,
            field_type: FieldType::Mode3A,
            field: 0o7700,
            persistent: false,
        };
        assert_eq!(d.to_string(), "1R2.4.7700");
    }

    #[test]
    fn test_parse() {
        let d = Descriptor::parse("0R3.1.45").unwrap();
        assert!(!d.is_fused);
        assert_eq!(d.source_type, TrackType::Radar);
        assert_eq!(d.source_index, 3);
        assert_eq!(d.field_type, FieldType::Id);
        assert_eq!(d.field, 45);
        assert!(!d.persistent);

        let d = Descriptor::parse("0B0.3.4ca2d1P").unwrap();
        assert_eq!(d.field, 0x4CA2D1);
        assert!(d.persistent);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for s in ["", "0R", "2R0.1.1", "0X0.1.1", "0R0.0.1", "0R0.9.1", "0R0.1.abc", "0R0.4.9"] {
            assert!(Descriptor::parse(s).is_err(), "{s} should not parse");
        }
    }

    #[test]
    fn test_matches_ignores_persistence() {
        let a = Descriptor::parse("0A0.2.123P").unwrap();
        let b = Descriptor::parse("0A0.2.123").unwrap();
        assert!(a.matches(&b));
        assert!(!a.matches(&Descriptor::parse("0A1.2.123").unwrap()));
    }
}

// devices/state.rs
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Device state as reported by the light server.
///
/// The wire carries one string per device that mixes levels, colors and
/// sentinels. It is decoded once at the boundary and everything downstream
/// matches on the variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceState {
    #[default]
    Off,
    On(u32),
    Color(Rgb),
    /// `-2`: the device is busy and refuses requests.
    Locked,
    /// `X`: the device did not answer.
    Unreachable,
    /// `*0` / `*1`: optimistic value awaiting confirmation.
    Tentative(Box<DeviceState>),
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn parse(hex: &str) -> Option<Self> {
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn is_black(&self) -> bool {
        *self == Rgb(0, 0, 0)
    }

    pub fn is_white(&self) -> bool {
        *self == Rgb(0xFF, 0xFF, 0xFF)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }
}

impl DeviceState {
    pub fn decode(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "X" => return DeviceState::Unreachable,
            "-2" => return DeviceState::Locked,
            _ => {}
        }

        if let Some(inner) = raw.strip_prefix('*') {
            return match DeviceState::decode(inner) {
                // a doubled marker is not something the server sends
                DeviceState::Tentative(_) => DeviceState::Unknown(raw.to_string()),
                inner => DeviceState::Tentative(Box::new(inner)),
            };
        }

        if raw.len() == 6 {
            if let Some(rgb) = Rgb::parse(raw) {
                return if rgb.is_black() {
                    DeviceState::Off
                } else {
                    DeviceState::Color(rgb)
                };
            }
        }

        match raw.parse::<i64>() {
            Ok(0) => DeviceState::Off,
            Ok(level) if level > 0 => DeviceState::On(u32::try_from(level).unwrap_or(u32::MAX)),
            _ => match raw.parse::<f64>() {
                Ok(level) if level == 0.0 => DeviceState::Off,
                _ => DeviceState::Unknown(raw.to_string()),
            },
        }
    }

    pub fn encode(&self) -> String {
        match self {
            DeviceState::Off => "0".to_string(),
            DeviceState::On(level) => level.to_string(),
            DeviceState::Color(rgb) => rgb.to_string(),
            DeviceState::Locked => "-2".to_string(),
            DeviceState::Unreachable => "X".to_string(),
            DeviceState::Tentative(inner) => format!("*{}", inner.encode()),
            DeviceState::Unknown(raw) => raw.clone(),
        }
    }

    /// The state with any tentative marker removed.
    pub fn settled(&self) -> &DeviceState {
        match self {
            DeviceState::Tentative(inner) => inner.settled(),
            other => other,
        }
    }

    pub fn is_tentative(&self) -> bool {
        matches!(self, DeviceState::Tentative(_))
    }

    /// Whether the device counts as lit for group aggregation.
    pub fn is_on(&self) -> bool {
        match self.settled() {
            DeviceState::On(_) | DeviceState::Color(_) | DeviceState::Unknown(_) => true,
            _ => false,
        }
    }

    pub fn is_off(&self) -> bool {
        matches!(self.settled(), DeviceState::Off)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for DeviceState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for DeviceState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = crate::snapshot::Loose::deserialize(deserializer)?;
        Ok(DeviceState::decode(&raw.into_text()))
    }
}

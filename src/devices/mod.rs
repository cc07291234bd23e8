// devices/mod.rs
mod state;
mod view;

pub use state::{DeviceState, Rgb};
pub use view::DeviceView;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Which value control a device exposes, as named in the device config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColorType {
    /// Sensors and pseudo devices: no power controls at all.
    Noop,
    #[default]
    OnOff,
    /// Dimmable, `0..=100`.
    Intensity,
    Rgb,
    Argb,
    /// Color bulbs addressed with `0..=255` channels.
    Rgb255,
    Other(String),
}

impl ColorType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "noop" => ColorType::Noop,
            "" | "onoff" => ColorType::OnOff,
            "100" => ColorType::Intensity,
            "rgb" => ColorType::Rgb,
            "argb" => ColorType::Argb,
            "255" => ColorType::Rgb255,
            other => ColorType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ColorType::Noop => "noop",
            ColorType::OnOff => "onoff",
            ColorType::Intensity => "100",
            ColorType::Rgb => "rgb",
            ColorType::Argb => "argb",
            ColorType::Rgb255 => "255",
            ColorType::Other(raw) => raw,
        }
    }

    pub fn has_color_picker(&self) -> bool {
        matches!(self, ColorType::Rgb | ColorType::Argb | ColorType::Rgb255)
    }
}

impl Serialize for ColorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ColorType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = crate::snapshot::Loose::deserialize(deserializer)?;
        Ok(ColorType::parse(&raw.into_text()))
    }
}

// snapshot.rs
use crate::devices::{ColorType, DeviceState, DeviceView};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Parses a light server reply body. A JSON string that itself holds JSON
/// is unwrapped once; any other string is kept as is.
pub fn decode_body(body: &str) -> Result<serde_json::Value, serde_json::Error> {
    match serde_json::from_str(body)? {
        serde_json::Value::String(inner) => {
            Ok(serde_json::from_str(&inner).unwrap_or(serde_json::Value::String(inner)))
        }
        other => Ok(other),
    }
}

/// Full device/group state as returned by `getstate`.
///
/// Every per-device mapping is indexed by device position; a device has no
/// other identity. Mappings the backend leaves out decode as empty and read
/// as defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StateSnapshot {
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub state: Vec<DeviceState>,
    #[serde(default, deserialize_with = "lenient::counts")]
    pub intensity: Vec<u32>,
    #[serde(default, deserialize_with = "lenient::flags")]
    pub mode: Vec<bool>,
    #[serde(default, deserialize_with = "lenient::flags")]
    pub op_forceoff: Vec<bool>,
    #[serde(default, deserialize_with = "lenient::flags")]
    pub op_ignoremode: Vec<bool>,
    #[serde(default, deserialize_with = "lenient::flags")]
    pub op_skiptime: Vec<bool>,
    #[serde(default, deserialize_with = "lenient::counts")]
    pub op_actiondelay: Vec<u32>,
    #[serde(default, deserialize_with = "lenient::texts")]
    pub icon: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub colortype: Vec<ColorType>,
    #[serde(default, deserialize_with = "lenient::flags")]
    pub locked: Vec<bool>,
    /// Comma-separated room names per device.
    #[serde(default, deserialize_with = "lenient::texts")]
    pub deviceroom: Vec<String>,
    /// Comma-separated group names per device.
    #[serde(default, deserialize_with = "lenient::texts")]
    pub devicegroups: Vec<String>,
    #[serde(default, deserialize_with = "lenient::texts")]
    pub name: Vec<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient::texts")]
    pub kind: Vec<String>,
    #[serde(default, deserialize_with = "lenient::texts")]
    pub description: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient::texts")]
    pub groups: Vec<String>,
    /// Backend-computed group states, used only for groups with no known members.
    #[serde(default, deserialize_with = "lenient::texts")]
    pub groupstates: Vec<String>,
    #[serde(default, deserialize_with = "lenient::texts")]
    pub roomgroups: Vec<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub sunrise: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub sunset: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub starttime: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub endtime: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient::texts")]
    pub moduleweb: Vec<String>,
}

#[derive(Error, Debug, PartialEq)]
pub enum SnapshotError {
    #[error("Field `{field}` has {found} entries for {expected} devices")]
    Misaligned {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Undecodable state body: {0}")]
    Decode(String),
}

impl StateSnapshot {
    /// Decodes a `getstate` reply body. Bodies that are a JSON string holding
    /// JSON (double-encoded by the light server) are unwrapped once.
    pub fn from_body(body: &str) -> Result<Self, SnapshotError> {
        let value = decode_body(body).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        let snapshot: StateSnapshot =
            serde_json::from_value(value).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Checks that every per-device mapping present lines up with `state`.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let expected = self.state.len();
        let lengths = [
            ("intensity", self.intensity.len()),
            ("mode", self.mode.len()),
            ("op_forceoff", self.op_forceoff.len()),
            ("op_ignoremode", self.op_ignoremode.len()),
            ("op_skiptime", self.op_skiptime.len()),
            ("op_actiondelay", self.op_actiondelay.len()),
            ("icon", self.icon.len()),
            ("colortype", self.colortype.len()),
            ("locked", self.locked.len()),
            ("deviceroom", self.deviceroom.len()),
            ("devicegroups", self.devicegroups.len()),
            ("name", self.name.len()),
            ("type", self.kind.len()),
            ("description", self.description.len()),
            ("history", self.history.len()),
        ];
        for (field, found) in lengths {
            if found != 0 && found != expected {
                return Err(SnapshotError::Misaligned {
                    field,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Projection of one device, without the global scalar fields.
    pub fn device(&self, index: usize) -> Option<DeviceView> {
        let state = self.state.get(index)?.clone();
        let text = |field: &Vec<String>| field.get(index).cloned().unwrap_or_default();
        let flag = |field: &Vec<bool>| field.get(index).copied().unwrap_or(false);

        Some(DeviceView {
            index,
            state,
            intensity: self.intensity.get(index).copied().unwrap_or(0),
            auto_mode: flag(&self.mode),
            force_off: flag(&self.op_forceoff),
            ignore_mode: flag(&self.op_ignoremode),
            skip_time: flag(&self.op_skiptime),
            action_delay: self.op_actiondelay.get(index).copied().unwrap_or(0),
            icon: self.icon.get(index).cloned().unwrap_or_else(|| "none".to_string()),
            color_type: self.colortype.get(index).cloned().unwrap_or_default(),
            locked: flag(&self.locked),
            rooms: split_list(&text(&self.deviceroom)),
            groups: split_list(&text(&self.devicegroups)),
            name: text(&self.name),
            kind: text(&self.kind),
            description: text(&self.description),
            history: self.history.get(index).cloned().unwrap_or_default(),
        })
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceView> + '_ {
        (0..self.len()).filter_map(|index| self.device(index))
    }

    /// Overwrites one device's state in place, used for optimistic writes.
    pub fn set_state(&mut self, index: usize, state: DeviceState) -> bool {
        match self.state.get_mut(index) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_lowercase())
        .collect()
}

/// Any scalar the light server may send where a string is expected.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Loose {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Null(()),
}

impl Loose {
    pub fn into_text(self) -> String {
        match self {
            Loose::Bool(b) => b.to_string(),
            Loose::Int(n) => n.to_string(),
            Loose::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                (f as i64).to_string()
            }
            Loose::Float(f) => f.to_string(),
            Loose::Text(s) => s,
            Loose::Null(()) => String::new(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Loose::Bool(b) => *b,
            Loose::Int(n) => *n != 0,
            Loose::Float(f) => *f != 0.0,
            Loose::Text(s) => !matches!(s.trim(), "" | "0" | "false" | "False" | "none" | "None"),
            Loose::Null(()) => false,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            Loose::Bool(b) => u32::from(*b),
            Loose::Int(n) => u32::try_from(*n).unwrap_or(0),
            Loose::Float(f) if *f > 0.0 => *f as u32,
            Loose::Text(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

mod lenient {
    use super::Loose;
    use serde::{Deserialize, Deserializer};

    fn entries<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Loose>, D::Error> {
        Ok(Option::<Vec<Loose>>::deserialize(deserializer)?.unwrap_or_default())
    }

    pub fn flags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<bool>, D::Error> {
        Ok(entries(deserializer)?.iter().map(Loose::truthy).collect())
    }

    pub fn counts<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u32>, D::Error> {
        Ok(entries(deserializer)?.iter().map(Loose::count).collect())
    }

    pub fn texts<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(entries(deserializer)?
            .into_iter()
            .map(Loose::into_text)
            .collect())
    }

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(Loose::deserialize(deserializer)?.into_text())
    }
}

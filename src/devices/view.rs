// devices/view.rs
use super::{ColorType, DeviceState};

/// Everything the snapshot says about one device.
///
/// Two views compare equal exactly when the device's card would render the
/// same, which is what the dashboard diffs on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceView {
    pub index: usize,
    pub state: DeviceState,
    pub intensity: u32,
    pub auto_mode: bool,
    pub force_off: bool,
    pub ignore_mode: bool,
    pub skip_time: bool,
    /// Seconds.
    pub action_delay: u32,
    pub icon: String,
    pub color_type: ColorType,
    pub locked: bool,
    pub rooms: Vec<String>,
    pub groups: Vec<String>,
    pub name: String,
    pub kind: String,
    pub description: String,
    pub history: serde_json::Value,
}

impl DeviceView {
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.iter().any(|r| r.eq_ignore_ascii_case(room))
    }
}

// dashboard/render.rs
//! In-memory render state for the dashboard.
//!
//! Every card is keyed by device index (or group/room name) and holds the
//! view it was last drawn from. The HTML fragment is a projection of that
//! view; it is rebuilt whole when the view changes and never patched.
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use crate::devices::{ColorType, DeviceState, DeviceView, Rgb};
use crate::snapshot::StateSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Danger,
    Warning,
    Neutral,
}

impl Tone {
    pub fn class(&self) -> &'static str {
        match self {
            Tone::Success => "success",
            Tone::Danger => "danger",
            Tone::Warning => "warning",
            Tone::Neutral => "secondary",
        }
    }
}

/// Visual state of a device card, derived from its view alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardStyle {
    pub header: Tone,
    pub border: Tone,
    pub striped: bool,
    /// Whether the on/off button pair is shown at all.
    pub power: bool,
    pub on_enabled: bool,
    pub off_enabled: bool,
    /// Mode toggles, color picker and slider.
    pub inputs_enabled: bool,
    pub reconnect: bool,
    pub confirm: bool,
    /// Color picker, with the value it mirrors when the state is a color.
    pub color: Option<Option<Rgb>>,
    pub slider: Option<u32>,
}

impl CardStyle {
    pub fn for_view(view: &DeviceView) -> Self {
        let settled = view.state.settled();
        if *settled == DeviceState::Unreachable {
            return CardStyle {
                header: Tone::Neutral,
                border: Tone::Neutral,
                striped: false,
                power: view.color_type != ColorType::Noop,
                on_enabled: false,
                off_enabled: false,
                inputs_enabled: false,
                reconnect: true,
                confirm: false,
                color: None,
                slider: None,
            };
        }

        let (tone, on_enabled, off_enabled) = match settled {
            DeviceState::Off => (Tone::Danger, true, false),
            DeviceState::Locked => (Tone::Warning, false, false),
            _ => (Tone::Success, false, true),
        };
        let noop = view.color_type == ColorType::Noop;
        let picker = !noop && (matches!(settled, DeviceState::Color(_)) || view.color_type.has_color_picker());
        let color = picker.then(|| match settled {
            DeviceState::Color(rgb) => Some(*rgb),
            _ => None,
        });
        let dimmable = view.color_type == ColorType::Intensity
            || matches!(settled, DeviceState::On(level) if *level > 1);
        let slider = (!noop && !picker && dimmable).then(|| match settled {
            DeviceState::On(level) => *level,
            DeviceState::Off => 0,
            _ => view.intensity,
        });

        CardStyle {
            header: if view.state.is_tentative() { Tone::Warning } else { tone },
            border: tone,
            striped: view.state.is_tentative(),
            power: !noop,
            on_enabled,
            off_enabled,
            inputs_enabled: *settled != DeviceState::Locked,
            reconnect: false,
            confirm: view.state.is_tentative(),
            color,
            slider,
        }
    }
}

/// Whether a confirmed state should be flagged against the value the user
/// asked for.
pub fn requested_mismatch(requested: &str, actual: &DeviceState) -> bool {
    let requested = DeviceState::decode(requested);
    match (actual.settled(), requested.settled()) {
        (DeviceState::Locked, _) => false,
        (DeviceState::Color(rgb), DeviceState::On(1)) if rgb.is_white() => false,
        (DeviceState::Color(rgb), DeviceState::Color(wanted)) if !rgb.is_white() && !wanted.is_white() => false,
        (actual, requested) => actual != requested,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStatus {
    On,
    Off,
    Mixed,
    /// At least one member is unreachable.
    Defective,
    Empty,
}

impl AggregateStatus {
    pub fn of<'a>(states: impl IntoIterator<Item = &'a DeviceState>) -> Self {
        let mut any = false;
        let mut all_on = true;
        let mut all_off = true;
        for state in states {
            if *state.settled() == DeviceState::Unreachable {
                return AggregateStatus::Defective;
            }
            any = true;
            all_on &= state.is_on();
            all_off &= state.is_off();
        }
        match (any, all_on, all_off) {
            (false, _, _) => AggregateStatus::Empty,
            (true, true, _) => AggregateStatus::On,
            (true, _, true) => AggregateStatus::Off,
            _ => AggregateStatus::Mixed,
        }
    }

    pub fn tone(&self) -> Tone {
        match self {
            AggregateStatus::On => Tone::Success,
            AggregateStatus::Off => Tone::Danger,
            AggregateStatus::Mixed => Tone::Warning,
            AggregateStatus::Defective | AggregateStatus::Empty => Tone::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Group,
    Room,
}

#[derive(Debug, Clone)]
pub struct Card {
    pub view: DeviceView,
    pub style: CardStyle,
    pub html: String,
    pub instance: u64,
    pub handlers_bound: bool,
    pub disabled: bool,
    pub mismatch: bool,
}

#[derive(Debug, Clone)]
pub struct AggregateCard {
    pub name: String,
    pub members: Vec<usize>,
    pub status: AggregateStatus,
    pub html: String,
    pub instance: u64,
    pub handlers_bound: bool,
    pub disabled: bool,
}

/// What a reconcile pass touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub devices: Vec<usize>,
    pub removed: Vec<usize>,
    pub groups: Vec<String>,
    pub rooms: Vec<String>,
}

impl RenderReport {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.removed.is_empty() && self.groups.is_empty() && self.rooms.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Renderer {
    cards: BTreeMap<usize, Card>,
    groups: BTreeMap<String, AggregateCard>,
    rooms: BTreeMap<String, AggregateCard>,
    forced: HashSet<usize>,
    expected: BTreeMap<usize, String>,
    next_instance: u64,
    mutations: u64,
    bindings: u64,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn card(&self, index: usize) -> Option<&Card> {
        self.cards.get(&index)
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.values()
    }

    pub fn group(&self, name: &str) -> Option<&AggregateCard> {
        self.groups.get(&name.to_lowercase())
    }

    pub fn room(&self, name: &str) -> Option<&AggregateCard> {
        self.rooms.get(&name.to_lowercase())
    }

    /// Fragment rebuilds and enable/disable toggles so far.
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    /// Handler bindings so far; one per fragment instance.
    pub fn bindings(&self) -> u64 {
        self.bindings
    }

    /// Redraws `index` on the next reconcile even if its view is unchanged.
    pub fn force_redraw(&mut self, index: usize) {
        self.forced.insert(index);
    }

    /// Records the value the user asked for, checked on the next redraw.
    pub fn expect(&mut self, index: usize, requested: impl Into<String>) {
        self.expected.insert(index, requested.into());
        self.forced.insert(index);
    }

    pub fn set_disabled(&mut self, index: usize, disabled: bool) -> bool {
        match self.cards.get_mut(&index) {
            Some(card) if card.disabled != disabled => {
                card.disabled = disabled;
                self.mutations += 1;
                true
            }
            _ => false,
        }
    }

    pub fn set_all_disabled(&mut self, disabled: bool) {
        let indices: Vec<usize> = self.cards.keys().copied().collect();
        for index in indices {
            self.set_disabled(index, disabled);
        }
    }

    pub fn set_group_disabled(&mut self, name: &str, disabled: bool) -> bool {
        match self.groups.get_mut(&name.to_lowercase()) {
            Some(card) if card.disabled != disabled => {
                card.disabled = disabled;
                self.mutations += 1;
                true
            }
            _ => false,
        }
    }

    /// Brings every card in line with `snapshot`.
    pub fn reconcile(&mut self, snapshot: &StateSnapshot) -> RenderReport {
        let mut report = RenderReport::default();

        for view in snapshot.devices() {
            let index = view.index;
            let forced = self.forced.remove(&index);
            let changed = self.cards.get(&index).is_none_or(|card| card.view != view);
            if changed || forced {
                self.redraw_device(view);
                report.devices.push(index);
            }
        }

        let stale: Vec<usize> = self.cards.range(snapshot.len()..).map(|(i, _)| *i).collect();
        for index in stale {
            self.cards.remove(&index);
            self.forced.remove(&index);
            self.expected.remove(&index);
            self.mutations += 1;
            report.removed.push(index);
        }

        report.groups = self.reconcile_aggregates(snapshot, AggregateKind::Group);
        report.rooms = self.reconcile_aggregates(snapshot, AggregateKind::Room);
        self.bind_handlers();
        report
    }

    fn redraw_device(&mut self, view: DeviceView) {
        let index = view.index;
        let mismatch = self
            .expected
            .remove(&index)
            .is_some_and(|requested| requested_mismatch(&requested, &view.state));
        let disabled = self.cards.get(&index).is_some_and(|card| card.disabled);
        let style = CardStyle::for_view(&view);
        self.next_instance += 1;
        let instance = self.next_instance;
        let html = device_html(&view, &style, instance, mismatch);
        self.cards.insert(
            index,
            Card {
                view,
                style,
                html,
                instance,
                handlers_bound: false,
                disabled,
                mismatch,
            },
        );
        self.mutations += 1;
    }

    fn reconcile_aggregates(&mut self, snapshot: &StateSnapshot, kind: AggregateKind) -> Vec<String> {
        let names = match kind {
            AggregateKind::Group => &snapshot.groups,
            AggregateKind::Room => &snapshot.roomgroups,
        };
        let mut touched = Vec::new();
        let mut seen = HashSet::new();

        for (position, raw) in names.iter().enumerate() {
            let name = raw.trim().to_lowercase();
            if name.is_empty() || !seen.insert(name.clone()) {
                continue;
            }
            let members: Vec<usize> = snapshot
                .devices()
                .filter(|view| match kind {
                    AggregateKind::Group => view.in_group(&name),
                    AggregateKind::Room => view.in_room(&name),
                })
                .map(|view| view.index)
                .collect();
            let mut status = AggregateStatus::of(members.iter().filter_map(|i| snapshot.state.get(*i)));
            if status == AggregateStatus::Empty && kind == AggregateKind::Group {
                if let Some(raw_state) = snapshot.groupstates.get(position) {
                    status = AggregateStatus::of([&DeviceState::decode(raw_state)]);
                }
            }

            let cards = match kind {
                AggregateKind::Group => &mut self.groups,
                AggregateKind::Room => &mut self.rooms,
            };
            let unchanged = cards
                .get(&name)
                .is_some_and(|card| card.status == status && card.members == members);
            if unchanged {
                continue;
            }
            let disabled = cards.get(&name).is_some_and(|card| card.disabled);
            self.next_instance += 1;
            let instance = self.next_instance;
            let html = aggregate_html(kind, &name, status, instance);
            cards.insert(
                name.clone(),
                AggregateCard {
                    name: name.clone(),
                    members,
                    status,
                    html,
                    instance,
                    handlers_bound: false,
                    disabled,
                },
            );
            self.mutations += 1;
            touched.push(name);
        }

        let cards = match kind {
            AggregateKind::Group => &mut self.groups,
            AggregateKind::Room => &mut self.rooms,
        };
        let before = cards.len();
        cards.retain(|name, _| seen.contains(name));
        self.mutations += (before - cards.len()) as u64;
        touched
    }

    fn bind_handlers(&mut self) {
        let fragments = self
            .cards
            .values_mut()
            .map(|card| &mut card.handlers_bound)
            .chain(self.groups.values_mut().map(|card| &mut card.handlers_bound))
            .chain(self.rooms.values_mut().map(|card| &mut card.handlers_bound));
        for bound in fragments {
            if !*bound {
                *bound = true;
                self.bindings += 1;
            }
        }
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn disabled_attr(enabled: bool) -> &'static str {
    if enabled { "" } else { " disabled" }
}

fn device_html(view: &DeviceView, style: &CardStyle, instance: u64, mismatch: bool) -> String {
    let mut html = String::new();
    let striped = if style.striped { " progress-bar-striped" } else { "" };
    let _ = write!(
        html,
        r#"<div class="card border-{border}" id="card{index}" data-instance="{instance}"><h5 class="card-header bg-{header}{striped}"><i class="iconi {icon}"></i> {name}</h5><div class="card-body"><h6 class="text-muted">{kind}</h6><p class="c-desc">{description}</p>"#,
        border = style.border.class(),
        index = view.index,
        header = style.header.class(),
        icon = escape(&view.icon),
        name = escape(&view.name),
        kind = escape(&view.kind),
        description = escape(&view.description),
    );

    if mismatch {
        html.push_str(r#"<p class="text-danger c-error">!</p>"#);
    }
    if style.power {
        let _ = write!(
            html,
            r#"<button class="btn btn-success onbuttons"{}>On</button><button class="btn btn-danger offbuttons"{}>Off</button>"#,
            disabled_attr(style.on_enabled),
            disabled_attr(style.off_enabled),
        );
    }
    if style.reconnect {
        html.push_str(r#"<button class="btn btn-secondary reconnect">Reconnect</button>"#);
    }
    if style.confirm {
        let _ = write!(
            html,
            r#"<button class="btn btn-warning confirm" data-state="{}">Confirm</button>"#,
            escape(&view.state.settled().encode()),
        );
    }
    if let Some(color) = style.color {
        let value = color.map(|rgb| format!("#{rgb}")).unwrap_or_else(|| "#FFFFFF".to_string());
        let _ = write!(
            html,
            r#"<input type="color" class="colorpick" value="{value}"{}>"#,
            disabled_attr(style.inputs_enabled),
        );
    }
    if let Some(level) = style.slider {
        let _ = write!(
            html,
            r#"<input type="range" class="sliderpick" min="0" max="100" value="{level}"{}>"#,
            disabled_attr(style.inputs_enabled),
        );
    }
    if style.power && !style.reconnect {
        let (auto, manual) = if view.auto_mode { (" active", "") } else { ("", " active") };
        let _ = write!(
            html,
            r#"<div class="btn-group modes"><button class="btn automode{auto}"{d}>Auto</button><button class="btn manualmode{manual}"{d}>Manual</button></div>"#,
            d = disabled_attr(style.inputs_enabled),
        );
    }
    for (flag, class) in [
        (view.force_off, "forceoff"),
        (view.ignore_mode, "ignoremode"),
        (view.skip_time, "skiptime"),
        (view.locked, "locked"),
    ] {
        if flag {
            let _ = write!(html, r#"<span class="badge {class}"></span>"#);
        }
    }
    if view.action_delay > 0 {
        let _ = write!(html, r#"<span class="badge actiondelay">{} s.</span>"#, view.action_delay);
    }
    html.push_str("</div></div>");
    html
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn aggregate_html(kind: AggregateKind, name: &str, status: AggregateStatus, instance: u64) -> String {
    let prefix = match kind {
        AggregateKind::Group => "g",
        AggregateKind::Room => "r",
    };
    let tone = status.tone().class();
    let buttons = disabled_attr(status != AggregateStatus::Defective);
    format!(
        r#"<div class="{prefix}card card border-{tone}" data-name="{id}" data-instance="{instance}"><h5 class="card-header bg-{tone}">{title}</h5><div class="card-body"><button class="btn btn-success {prefix}onbuttons"{buttons}>On</button><button class="btn btn-danger {prefix}offbuttons"{buttons}>Off</button></div></div>"#,
        id = escape(name),
        title = escape(&capitalize(name)),
    )
}

// dashboard/mod.rs
//! Client side of the gateway: keeps an in-memory snapshot in line with the
//! light server and turns user intents into queries.
pub mod render;
pub mod tracker;
pub mod transport;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::devices::{DeviceState, Rgb};
use crate::error::ClientError;
use crate::snapshot::{StateSnapshot, decode_body};
use render::{AggregateCard, Card, RenderReport, Renderer};
use tracker::{BackgroundSlot, ForegroundSet, PollTicket, StartOutcome};
use transport::{Form, Transport, query};

/// Seconds without an update after which a staleness check polls again.
pub const STALE_AFTER_SECS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Started,
    AlreadyRunning,
    /// The first load has not finished yet.
    NotLoaded,
}

#[derive(Debug, Default)]
pub struct ViewState {
    pub snapshot: Option<StateSnapshot>,
    pub renderer: Renderer,
    pub last_update: Option<DateTime<Utc>>,
    pub loaded: bool,
}

struct Inner<T> {
    transport: T,
    view: Mutex<ViewState>,
    background: BackgroundSlot,
    foreground: ForegroundSet,
    skip_time: AtomicBool,
    renders: broadcast::Sender<RenderReport>,
}

pub struct Dashboard<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Dashboard<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn flag(value: bool) -> String {
    (if value { "true" } else { "false" }).to_string()
}

impl<T: Transport> Inner<T> {
    async fn fetch(&self, form: Form) -> Result<StateSnapshot, ClientError> {
        let body = self.transport.post(form).await?;
        Ok(StateSnapshot::from_body(&body)?)
    }

    async fn apply(&self, snapshot: StateSnapshot) -> RenderReport {
        let report = {
            let mut view = self.view.lock().await;
            let report = view.renderer.reconcile(&snapshot);
            view.snapshot = Some(snapshot);
            view.last_update = Some(Utc::now());
            report
        };
        self.publish(&report);
        report
    }

    fn publish(&self, report: &RenderReport) {
        if !report.is_empty() {
            let _ = self.renders.send(report.clone());
        }
    }

    async fn background_poll(self: Arc<Self>, ticket: PollTicket) {
        let form = query("getstate", &[("isasync", flag(false))]);
        let snapshot = match self.fetch(form).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(poll = ticket.id(), error = %e, "Background poll failed");
                return;
            }
        };
        if !ticket.commit().await {
            debug!(poll = ticket.id(), "Background poll lost its slot");
            return;
        }
        let report = self.apply(snapshot).await;
        debug!(poll = ticket.id(), redrawn = report.devices.len(), "Background poll applied");
    }
}

impl<T: Transport> Dashboard<T> {
    pub fn new(transport: T) -> Self {
        let (renders, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                transport,
                view: Mutex::new(ViewState::default()),
                background: BackgroundSlot::new(),
                foreground: ForegroundSet::new(),
                skip_time: AtomicBool::new(false),
                renders,
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Reports of every reconcile pass that redrew something.
    pub fn subscribe(&self) -> broadcast::Receiver<RenderReport> {
        self.inner.renders.subscribe()
    }

    pub async fn card(&self, index: usize) -> Option<Card> {
        self.inner.view.lock().await.renderer.card(index).cloned()
    }

    pub async fn group(&self, name: &str) -> Option<AggregateCard> {
        self.inner.view.lock().await.renderer.group(name).cloned()
    }

    pub async fn room(&self, name: &str) -> Option<AggregateCard> {
        self.inner.view.lock().await.renderer.room(name).cloned()
    }

    pub async fn snapshot(&self) -> Option<StateSnapshot> {
        self.inner.view.lock().await.snapshot.clone()
    }

    pub async fn mutations(&self) -> u64 {
        self.inner.view.lock().await.renderer.mutations()
    }

    pub async fn background_running(&self) -> bool {
        self.inner.background.is_running().await
    }

    pub async fn join_background(&self) {
        self.inner.background.join().await;
    }

    pub fn pending_foreground(&self) -> usize {
        self.inner.foreground.pending()
    }

    pub async fn wait_idle(&self) {
        self.inner.foreground.wait_idle().await;
    }

    /// Sent along with power and group requests.
    pub fn set_skip_time(&self, skip: bool) {
        self.inner.skip_time.store(skip, Ordering::Relaxed);
    }

    fn skip_time(&self) -> String {
        flag(self.inner.skip_time.load(Ordering::Relaxed))
    }

    /// Fetches and renders everything, then starts a background refresh.
    pub async fn load(&self) -> Result<RenderReport, ClientError> {
        let report = {
            let _guard = self.inner.foreground.begin("load");
            let snapshot = self
                .inner
                .fetch(query("getstate", &[("isasync", flag(true))]))
                .await?;
            let devices = snapshot.len();
            let report = self.inner.apply(snapshot).await;
            self.inner.view.lock().await.loaded = true;
            info!(devices, "Dashboard loaded");
            report
        };
        self.refresh_background().await;
        Ok(report)
    }

    pub async fn refresh_background(&self) -> PollOutcome {
        if !self.inner.view.lock().await.loaded {
            return PollOutcome::NotLoaded;
        }
        let inner = Arc::clone(&self.inner);
        match self
            .inner
            .background
            .start(move |ticket| inner.background_poll(ticket))
            .await
        {
            StartOutcome::Started(_) => PollOutcome::Started,
            StartOutcome::AlreadyRunning(id) => {
                debug!(poll = id, "Background poll already running");
                PollOutcome::AlreadyRunning
            }
        }
    }

    /// Polls in the background when nothing arrived for a while.
    pub async fn check_staleness(&self, now: DateTime<Utc>) -> Option<PollOutcome> {
        {
            let mut view = self.inner.view.lock().await;
            if !view.loaded {
                return None;
            }
            let last = view.last_update.unwrap_or(now);
            if now - last <= Duration::seconds(STALE_AFTER_SECS) {
                return None;
            }
            view.last_update = Some(now);
        }
        Some(self.refresh_background().await)
    }

    async fn ensure_device(&self, devid: usize) -> Result<(), ClientError> {
        let view = self.inner.view.lock().await;
        match &view.snapshot {
            Some(snapshot) if devid < snapshot.len() => Ok(()),
            _ => Err(ClientError::UnknownDevice(devid)),
        }
    }

    async fn cancel_background(&self) {
        if self.inner.background.cancel().await {
            debug!("Background poll cancelled for a user action");
        }
    }

    async fn device_action(
        &self,
        devid: usize,
        label: &'static str,
        form: Form,
        optimistic: Option<DeviceState>,
        requested: Option<String>,
    ) -> Result<RenderReport, ClientError> {
        self.ensure_device(devid).await?;
        self.cancel_background().await;
        let _guard = self.inner.foreground.begin(label);

        let (prior, optimistic) = {
            let mut view = self.inner.view.lock().await;
            let ViewState {
                snapshot, renderer, ..
            } = &mut *view;
            renderer.set_disabled(devid, true);
            match (optimistic, snapshot.as_mut()) {
                (Some(state), Some(snapshot)) => {
                    let prior = snapshot.device(devid).map(|device| device.state);
                    snapshot.set_state(devid, DeviceState::Tentative(Box::new(state)));
                    renderer.force_redraw(devid);
                    (prior, Some(renderer.reconcile(snapshot)))
                }
                _ => (None, None),
            }
        };
        if let Some(report) = optimistic {
            self.inner.publish(&report);
        }

        let result = match self.inner.transport.post(form).await {
            Ok(_) => {
                self.inner
                    .fetch(query("getstate", &[("devid", devid.to_string()), ("isasync", flag(false))]))
                    .await
            }
            Err(e) => Err(e),
        };

        let mut view = self.inner.view.lock().await;
        view.renderer.set_disabled(devid, false);
        match result {
            Ok(snapshot) => {
                if let Some(requested) = requested {
                    view.renderer.expect(devid, requested);
                }
                drop(view);
                Ok(self.inner.apply(snapshot).await)
            }
            Err(e) => {
                warn!(devid, action = label, error = %e, "Device action failed");
                // The tentative write never reached the device.
                let restored = {
                    let ViewState {
                        snapshot, renderer, ..
                    } = &mut *view;
                    match (prior, snapshot.as_mut()) {
                        (Some(prior), Some(snapshot)) => {
                            snapshot.set_state(devid, prior);
                            renderer.force_redraw(devid);
                            Some(renderer.reconcile(snapshot))
                        }
                        _ => None,
                    }
                };
                drop(view);
                if let Some(report) = restored {
                    self.inner.publish(&report);
                }
                Err(e)
            }
        }
    }

    pub async fn set_power(&self, devid: usize, on: bool) -> Result<RenderReport, ClientError> {
        let value = if on { "1" } else { "0" };
        let form = query(
            "setstate",
            &[
                ("devid", devid.to_string()),
                ("value", value.to_string()),
                ("isintensity", "0".to_string()),
                ("skiptime", self.skip_time()),
            ],
        );
        let optimistic = if on { DeviceState::On(1) } else { DeviceState::Off };
        self.device_action(devid, "setstate", form, Some(optimistic), Some(value.to_string()))
            .await
    }

    pub async fn set_intensity(&self, devid: usize, level: u32) -> Result<RenderReport, ClientError> {
        let form = query(
            "setstate",
            &[
                ("devid", devid.to_string()),
                ("value", level.to_string()),
                ("isintensity", "1".to_string()),
                ("skiptime", self.skip_time()),
            ],
        );
        self.device_action(devid, "setstate", form, None, Some(level.to_string()))
            .await
    }

    pub async fn set_color(&self, devid: usize, color: Rgb) -> Result<RenderReport, ClientError> {
        let form = query(
            "setstate",
            &[
                ("devid", devid.to_string()),
                ("value", color.to_string()),
                ("isintensity", "0".to_string()),
                ("skiptime", self.skip_time()),
            ],
        );
        self.device_action(devid, "setstate", form, None, Some(color.to_string()))
            .await
    }

    pub async fn set_mode(&self, devid: usize, auto: bool) -> Result<RenderReport, ClientError> {
        let form = query("setmode", &[("devid", devid.to_string()), ("mode", flag(auto))]);
        self.device_action(devid, "setmode", form, None, None).await
    }

    pub async fn set_lock(&self, devid: usize, locked: bool) -> Result<RenderReport, ClientError> {
        let lock = if locked { "1" } else { "0" };
        let form = query("setlock", &[("devid", devid.to_string()), ("lock", lock.to_string())]);
        self.device_action(devid, "setlock", form, None, None).await
    }

    pub async fn reconnect(&self, devid: usize) -> Result<RenderReport, ClientError> {
        let form = query("reconnect", &[("devid", devid.to_string())]);
        self.device_action(devid, "reconnect", form, None, None).await
    }

    /// Accepts a tentative state as real. `state` may carry the `*` marker.
    pub async fn confirm_state(&self, devid: usize, state: &str) -> Result<RenderReport, ClientError> {
        let state = state.trim_start_matches('*');
        let form = query("confirmstate", &[("devid", devid.to_string()), ("state", state.to_string())]);
        self.device_action(devid, "confirmstate", form, None, None).await
    }

    pub async fn set_group(&self, group: &str, on: bool) -> Result<RenderReport, ClientError> {
        let group = group.trim().to_lowercase();
        let known = self
            .inner
            .view
            .lock()
            .await
            .snapshot
            .as_ref()
            .is_some_and(|s| s.groups.iter().any(|g| g.eq_ignore_ascii_case(&group)));
        if !known {
            return Err(ClientError::UnknownGroup(group));
        }

        self.cancel_background().await;
        let _guard = self.inner.foreground.begin("setgroup");
        self.inner.view.lock().await.renderer.set_group_disabled(&group, true);

        let value = if on { "1" } else { "0" };
        let form = query(
            "setgroup",
            &[
                ("group", group.clone()),
                ("value", value.to_string()),
                ("skiptime", self.skip_time()),
            ],
        );
        let result = match self.inner.transport.post(form).await {
            Ok(_) => self.inner.fetch(query("getstate", &[("isasync", flag(true))])).await,
            Err(e) => Err(e),
        };

        self.inner.view.lock().await.renderer.set_group_disabled(&group, false);
        match result {
            Ok(snapshot) => Ok(self.inner.apply(snapshot).await),
            Err(e) => {
                warn!(group = %group, error = %e, "Group action failed");
                Err(e)
            }
        }
    }

    /// Puts every device back into automatic mode.
    pub async fn set_all_mode_auto(&self) -> Result<RenderReport, ClientError> {
        self.cancel_background().await;
        let _guard = self.inner.foreground.begin("setallmode");
        self.inner.view.lock().await.renderer.set_all_disabled(true);

        let result = match self.inner.transport.post(query("setallmode", &[])).await {
            Ok(_) => self.inner.fetch(query("getstate", &[("isasync", flag(true))])).await,
            Err(e) => Err(e),
        };

        self.inner.view.lock().await.renderer.set_all_disabled(false);
        match result {
            Ok(snapshot) => Ok(self.inner.apply(snapshot).await),
            Err(e) => {
                warn!(error = %e, "Resetting modes failed");
                Err(e)
            }
        }
    }

    pub async fn reload_config(&self) -> Result<(), ClientError> {
        let _guard = self.inner.foreground.begin("reloadconfig");
        self.inner.transport.post(query("reloadconfig", &[])).await?;
        info!("Light server configuration reloaded");
        Ok(())
    }

    pub async fn get_config(&self) -> Result<Value, ClientError> {
        let _guard = self.inner.foreground.begin("getconfig");
        let body = self.inner.transport.post(query("getconfig", &[])).await?;
        Ok(decode_body(&body)?)
    }

    pub async fn set_config(&self, section: &str, data: &Value) -> Result<Value, ClientError> {
        let _guard = self.inner.foreground.begin("setconfig");
        let form = query(
            "setconfig",
            &[("section", section.to_string()), ("configdata", data.to_string())],
        );
        let body = self.inner.transport.post(form).await?;
        Ok(decode_body(&body)?)
    }

    /// HTML of a light server module page.
    pub async fn get_module(&self, module: &str) -> Result<String, ClientError> {
        let _guard = self.inner.foreground.begin("getmodule");
        let body = self
            .inner
            .transport
            .post(query("getmodule", &[("module", module.to_string())]))
            .await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::String(html)) => Ok(html),
            _ => Ok(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::render::{AggregateStatus, Tone};
    use crate::dashboard::transport::field;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// In-memory light server behind the query endpoint.
    #[derive(Default)]
    struct FakeGateway {
        states: StdMutex<Vec<String>>,
        log: Arc<StdMutex<Vec<String>>>,
        forms: StdMutex<Vec<Form>>,
        background_gate: StdMutex<Option<Arc<Notify>>>,
        failing: StdMutex<HashSet<String>>,
        stuck: StdMutex<HashSet<usize>>,
    }

    /// Logs `aborted <label>` if the call is dropped before it finished.
    struct Call {
        label: String,
        log: Arc<StdMutex<Vec<String>>>,
        done: bool,
    }

    impl Drop for Call {
        fn drop(&mut self) {
            if !self.done {
                self.log.lock().unwrap().push(format!("aborted {}", self.label));
            }
        }
    }

    impl FakeGateway {
        fn with_states(states: &[&str]) -> Self {
            let fake = FakeGateway::default();
            *fake.states.lock().unwrap() = states.iter().map(|s| s.to_string()).collect();
            fake
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn last_form(&self, reqtype: &str) -> Option<Form> {
            self.forms
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|form| field(form, "reqtype") == Some(reqtype))
                .cloned()
        }

        fn gate_background(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.background_gate.lock().unwrap() = Some(Arc::clone(&gate));
            gate
        }

        fn snapshot(&self) -> String {
            let states = self.states.lock().unwrap().clone();
            let n = states.len();
            json!({
                "state": states,
                "name": (0..n).map(|i| format!("lamp {i}")).collect::<Vec<_>>(),
                "colortype": vec!["rgb"; n],
                "devicegroups": vec!["all"; n],
                "groups": ["all"],
                "groupstates": ["0"],
            })
            .to_string()
        }
    }

    #[async_trait]
    impl Transport for FakeGateway {
        async fn post(&self, form: Form) -> Result<String, ClientError> {
            let reqtype = field(&form, "reqtype").unwrap_or_default().to_string();
            let label = match (reqtype.as_str(), field(&form, "devid"), field(&form, "isasync")) {
                ("getstate", Some(devid), _) => format!("getstate devid={devid}"),
                ("getstate", None, Some("false")) => "getstate background".to_string(),
                _ => reqtype.clone(),
            };
            self.log.lock().unwrap().push(label.clone());
            self.forms.lock().unwrap().push(form.clone());
            let mut call = Call {
                label: label.clone(),
                log: Arc::clone(&self.log),
                done: false,
            };

            let gate = self.background_gate.lock().unwrap().clone();
            if let (Some(gate), "getstate background") = (gate, label.as_str()) {
                gate.notified().await;
            }
            call.done = true;

            if self.failing.lock().unwrap().contains(&reqtype) {
                return Err(ClientError::Rejected {
                    status: 500,
                    body: "light server error".to_string(),
                });
            }

            let devid = field(&form, "devid").and_then(|d| d.parse::<usize>().ok());
            let write = |value: &str| {
                if let Some(devid) = devid {
                    if !self.stuck.lock().unwrap().contains(&devid) {
                        self.states.lock().unwrap()[devid] = value.to_string();
                    }
                }
            };
            let body = match reqtype.as_str() {
                "getstate" => self.snapshot(),
                "setstate" => {
                    write(field(&form, "value").unwrap_or("0"));
                    "\"ok\"".to_string()
                }
                "confirmstate" => {
                    write(field(&form, "state").unwrap_or("0"));
                    "\"ok\"".to_string()
                }
                "setgroup" => {
                    let value = field(&form, "value").unwrap_or("0").to_string();
                    for state in self.states.lock().unwrap().iter_mut() {
                        *state = value.clone();
                    }
                    "\"ok\"".to_string()
                }
                "getconfig" => json!(json!({"port": 8081}).to_string()).to_string(),
                "getmodule" => json!("<div>presets</div>").to_string(),
                _ => "\"ok\"".to_string(),
            };
            Ok(body)
        }
    }

    #[tokio::test]
    async fn load_renders_then_polls_in_background() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["0", "1"]));
        let report = dashboard.load().await.unwrap();
        assert_eq!(report.devices, vec![0, 1]);
        dashboard.join_background().await;
        assert_eq!(dashboard.transport().log(), vec!["getstate", "getstate background"]);
        assert_eq!(dashboard.pending_foreground(), 0);
    }

    #[tokio::test]
    async fn background_poll_waits_for_first_load() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["0"]));
        assert_eq!(dashboard.refresh_background().await, PollOutcome::NotLoaded);
        assert!(dashboard.transport().log().is_empty());
    }

    #[tokio::test]
    async fn power_on_restyles_after_refetch() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["0"]));
        dashboard.load().await.unwrap();
        dashboard.join_background().await;

        let card = dashboard.card(0).await.unwrap();
        assert_eq!(card.style.header, Tone::Danger);
        assert!(card.style.on_enabled && !card.style.off_enabled);

        dashboard.set_power(0, true).await.unwrap();
        let card = dashboard.card(0).await.unwrap();
        assert_eq!(card.view.state, DeviceState::On(1));
        assert_eq!(card.style.header, Tone::Success);
        assert!(!card.disabled);
        assert!(!card.mismatch);

        let form = dashboard.transport().last_form("setstate").unwrap();
        assert_eq!(field(&form, "devid"), Some("0"));
        assert_eq!(field(&form, "value"), Some("1"));
        let log = dashboard.transport().log();
        assert_eq!(&log[log.len() - 2..], ["setstate", "getstate devid=0"]);
    }

    #[tokio::test]
    async fn user_action_cancels_background_poll_first() {
        let fake = FakeGateway::with_states(&["0"]);
        let _gate = fake.gate_background();
        let dashboard = Dashboard::new(fake);
        dashboard.load().await.unwrap();
        tokio::task::yield_now().await;
        assert!(dashboard.background_running().await);

        dashboard.set_power(0, true).await.unwrap();
        assert!(!dashboard.background_running().await);
        assert_eq!(
            dashboard.transport().log(),
            vec![
                "getstate",
                "getstate background",
                "aborted getstate background",
                "setstate",
                "getstate devid=0",
            ]
        );
    }

    #[tokio::test]
    async fn only_one_background_poll_in_flight() {
        let fake = FakeGateway::with_states(&["0"]);
        let gate = fake.gate_background();
        let dashboard = Dashboard::new(fake);
        dashboard.load().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(dashboard.refresh_background().await, PollOutcome::AlreadyRunning);
        assert_eq!(dashboard.refresh_background().await, PollOutcome::AlreadyRunning);
        let polls = dashboard
            .transport()
            .log()
            .iter()
            .filter(|call| call.as_str() == "getstate background")
            .count();
        assert_eq!(polls, 1);

        gate.notify_one();
        dashboard.join_background().await;
        assert_eq!(dashboard.refresh_background().await, PollOutcome::Started);
    }

    #[tokio::test]
    async fn tentative_state_confirms_without_marker() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["*1"]));
        dashboard.load().await.unwrap();
        dashboard.join_background().await;

        let card = dashboard.card(0).await.unwrap();
        assert!(card.style.striped && card.style.confirm);
        assert!(card.html.contains("confirm"));

        dashboard.confirm_state(0, "*1").await.unwrap();
        let form = dashboard.transport().last_form("confirmstate").unwrap();
        assert_eq!(field(&form, "state"), Some("1"));
        let card = dashboard.card(0).await.unwrap();
        assert!(!card.style.striped);
    }

    #[tokio::test]
    async fn unreachable_device_offers_only_reconnect() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["X"]));
        dashboard.load().await.unwrap();
        dashboard.join_background().await;

        let card = dashboard.card(0).await.unwrap();
        assert!(card.style.reconnect);
        assert!(!card.style.on_enabled && !card.style.off_enabled);
        assert_eq!(card.style.color, None);
        assert!(!card.html.contains("colorpick"));

        dashboard.reconnect(0).await.unwrap();
        assert!(dashboard.transport().last_form("reconnect").is_some());
    }

    #[tokio::test]
    async fn optimistic_write_is_drawn_before_confirmation() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["0"]));
        dashboard.load().await.unwrap();
        dashboard.join_background().await;
        let mut renders = dashboard.subscribe();

        dashboard.set_power(0, true).await.unwrap();
        let optimistic = renders.try_recv().unwrap();
        let confirmed = renders.try_recv().unwrap();
        assert_eq!(optimistic.devices, vec![0]);
        assert_eq!(confirmed.devices, vec![0]);
    }

    #[tokio::test]
    async fn unconfirmed_request_shows_hint() {
        let fake = FakeGateway::with_states(&["0"]);
        fake.stuck.lock().unwrap().insert(0);
        let dashboard = Dashboard::new(fake);
        dashboard.load().await.unwrap();
        dashboard.join_background().await;

        dashboard.set_power(0, true).await.unwrap();
        let card = dashboard.card(0).await.unwrap();
        assert_eq!(card.view.state, DeviceState::Off);
        assert!(card.mismatch);
    }

    #[tokio::test]
    async fn failed_action_re_enables_controls() {
        let fake = FakeGateway::with_states(&["0"]);
        fake.failing.lock().unwrap().insert("setmode".to_string());
        let dashboard = Dashboard::new(fake);
        dashboard.load().await.unwrap();
        dashboard.join_background().await;

        let err = dashboard.set_mode(0, true).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 500, .. }));
        assert!(!dashboard.card(0).await.unwrap().disabled);
        assert_eq!(dashboard.pending_foreground(), 0);
    }

    #[tokio::test]
    async fn rejected_power_change_restores_previous_state() {
        let fake = FakeGateway::with_states(&["0"]);
        fake.failing.lock().unwrap().insert("setstate".to_string());
        let dashboard = Dashboard::new(fake);
        dashboard.load().await.unwrap();
        dashboard.join_background().await;
        let mut renders = dashboard.subscribe();

        let err = dashboard.set_power(0, true).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 500, .. }));

        let card = dashboard.card(0).await.unwrap();
        assert_eq!(card.view.state, DeviceState::Off);
        assert!(!card.style.striped && !card.style.confirm);
        assert!(!card.disabled);
        let snapshot = dashboard.snapshot().await.unwrap();
        assert_eq!(snapshot.device(0).unwrap().state, DeviceState::Off);

        let tentative = renders.try_recv().unwrap();
        let restored = renders.try_recv().unwrap();
        assert_eq!(tentative.devices, vec![0]);
        assert_eq!(restored.devices, vec![0]);
        assert!(!dashboard.transport().log().contains(&"getstate devid=0".to_string()));
    }

    #[tokio::test]
    async fn unknown_targets_are_refused_locally() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["0"]));
        dashboard.load().await.unwrap();
        dashboard.join_background().await;
        let calls = dashboard.transport().log().len();

        assert!(matches!(
            dashboard.set_lock(5, true).await,
            Err(ClientError::UnknownDevice(5))
        ));
        assert!(matches!(
            dashboard.set_group("garage", true).await,
            Err(ClientError::UnknownGroup(_))
        ));
        assert_eq!(dashboard.transport().log().len(), calls);
    }

    #[tokio::test]
    async fn group_action_refreshes_aggregate() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["1", "0"]));
        dashboard.load().await.unwrap();
        dashboard.join_background().await;
        assert_eq!(dashboard.group("all").await.unwrap().status, AggregateStatus::Mixed);

        dashboard.set_skip_time(true);
        dashboard.set_group("All", false).await.unwrap();
        let group = dashboard.group("all").await.unwrap();
        assert_eq!(group.status, AggregateStatus::Off);
        assert!(!group.disabled);
        let form = dashboard.transport().last_form("setgroup").unwrap();
        assert_eq!(field(&form, "group"), Some("all"));
        assert_eq!(field(&form, "skiptime"), Some("true"));
    }

    #[tokio::test]
    async fn staleness_check_polls_after_twenty_seconds() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["0"]));
        dashboard.load().await.unwrap();
        dashboard.join_background().await;

        let now = Utc::now();
        assert_eq!(dashboard.check_staleness(now + Duration::seconds(5)).await, None);
        assert_eq!(
            dashboard.check_staleness(now + Duration::seconds(25)).await,
            Some(PollOutcome::Started)
        );
        dashboard.join_background().await;
        let refreshed = Utc::now() + Duration::seconds(10);
        assert_eq!(dashboard.check_staleness(refreshed).await, None);
    }

    #[tokio::test]
    async fn config_and_module_replies_are_unwrapped() {
        let dashboard = Dashboard::new(FakeGateway::with_states(&["0"]));
        assert_eq!(dashboard.get_config().await.unwrap(), json!({"port": 8081}));
        assert_eq!(dashboard.get_module("preseteditor").await.unwrap(), "<div>presets</div>");

        dashboard.set_config("server", &json!({"port": 9000})).await.unwrap();
        let form = dashboard.transport().last_form("setconfig").unwrap();
        assert_eq!(field(&form, "configdata"), Some(r#"{"port":9000}"#));
        dashboard.reload_config().await.unwrap();
    }
}

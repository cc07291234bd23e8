// commands/mod.rs
use crate::{AppState, configxml, error::AppError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use validator::{Validate, ValidationError};

pub const JSON: &str = "application/json";
pub const HTML: &str = "text/html";

/// Body and content type handed back to the HTTP caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub body: String,
    pub content_type: String,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, state: Arc<AppState>) -> Result<Reply, AppError>;
}

pub trait CommandFactory: Sync {
    fn reqtype(&self) -> &'static str;
    fn create(&self, payload: &Value) -> Result<Box<dyn CommandHandler>, AppError>;
}

inventory::collect!(&'static dyn CommandFactory);

pub fn factory(reqtype: &str) -> Option<&'static dyn CommandFactory> {
    inventory::iter::<&'static dyn CommandFactory>
        .into_iter()
        .find(|f| f.reqtype() == reqtype)
        .copied()
}

pub fn reqtypes() -> Vec<&'static str> {
    let mut names: Vec<_> = inventory::iter::<&'static dyn CommandFactory>
        .into_iter()
        .map(|f| f.reqtype())
        .collect();
    names.sort_unstable();
    names
}

/// Turns a posted form into a ready-to-run command.
pub fn parse(form: HashMap<String, String>) -> Result<(String, Box<dyn CommandHandler>), AppError> {
    if !form.get("request").is_some_and(|r| is_truthy(r)) {
        return Err(AppError::NoRequest);
    }
    let reqtype = form
        .get("reqtype")
        .cloned()
        .ok_or_else(|| AppError::Validation("missing `reqtype`".into()))?;
    let factory = factory(&reqtype).ok_or_else(|| AppError::UnknownOperation(reqtype.clone()))?;

    let payload = Value::Object(
        form.into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect(),
    );
    Ok((reqtype, factory.create(&payload)?))
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim(), "True" | "true" | "1")
}

fn param<T: FromStr>(payload: &Value, key: &str) -> Result<T, AppError> {
    optional(payload, key)?.ok_or_else(|| AppError::Validation(format!("missing `{key}`")))
}

fn optional<T: FromStr>(payload: &Value, key: &str) -> Result<Option<T>, AppError> {
    match payload.get(key).and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Validation(format!("invalid `{key}`: {raw}"))),
    }
}

fn json_text(raw: &str) -> Result<(), ValidationError> {
    serde_json::from_str::<Value>(raw)
        .map(|_| ())
        .map_err(|_| ValidationError::new("json"))
}

#[derive(Debug, Validate)]
struct DeviceParams {
    #[validate(range(max = 999))]
    devid: usize,
}

#[derive(Debug, Validate)]
struct SetStateParams {
    #[validate(range(max = 999))]
    devid: usize,
    #[validate(length(min = 1, max = 8))]
    value: String,
}

#[derive(Debug, Validate)]
struct SetGroupParams {
    #[validate(length(min = 1))]
    group: String,
    value: i64,
}

#[derive(Debug, Validate)]
struct SetLockParams {
    #[validate(range(max = 999))]
    devid: usize,
    #[validate(range(min = 0, max = 1))]
    lock: u8,
}

#[derive(Debug, Validate)]
struct ModuleParams {
    #[validate(length(min = 1))]
    module: String,
}

#[derive(Debug, Validate)]
struct SetConfigParams {
    #[validate(length(min = 1))]
    section: String,
    #[validate(custom(function = "json_text"))]
    configdata: String,
}

#[derive(Debug, Validate)]
struct ConfirmStateParams {
    #[validate(range(max = 999))]
    devid: usize,
    #[validate(length(min = 1, max = 8))]
    state: String,
}

#[derive(Debug, Validate)]
struct SetPresetParams {
    #[validate(length(min = 1))]
    presetname: String,
    #[validate(custom(function = "json_text"))]
    preset: String,
}

#[derive(Debug, Validate)]
struct RunPresetParams {
    #[validate(length(min = 1))]
    preset: String,
}

/// Carries one JSON-encoded list, as sent by the preset and room editors.
#[derive(Debug, Validate)]
struct JsonListParams {
    #[validate(custom(function = "json_text"))]
    list: String,
}

#[derive(Debug, Validate)]
struct DebugLogParams {
    #[validate(length(min = 1))]
    debuglevel: String,
}

fn no_params(_: &Value) -> Result<(), AppError> {
    Ok(())
}

fn getstate_params(payload: &Value) -> Result<(), AppError> {
    if let Some(devid) = optional::<usize>(payload, "devid")? {
        DeviceParams { devid }.validate()?;
    }
    Ok(())
}

fn device_params(payload: &Value) -> Result<(), AppError> {
    Ok(DeviceParams {
        devid: param(payload, "devid")?,
    }
    .validate()?)
}

fn setstate_params(payload: &Value) -> Result<(), AppError> {
    Ok(SetStateParams {
        devid: param(payload, "devid")?,
        value: param(payload, "value")?,
    }
    .validate()?)
}

fn setgroup_params(payload: &Value) -> Result<(), AppError> {
    Ok(SetGroupParams {
        group: param(payload, "group")?,
        value: param(payload, "value")?,
    }
    .validate()?)
}

fn setmode_params(payload: &Value) -> Result<(), AppError> {
    device_params(payload)?;
    param::<String>(payload, "mode")?;
    Ok(())
}

fn setlock_params(payload: &Value) -> Result<(), AppError> {
    Ok(SetLockParams {
        devid: param(payload, "devid")?,
        lock: param(payload, "lock")?,
    }
    .validate()?)
}

fn module_params(payload: &Value) -> Result<(), AppError> {
    Ok(ModuleParams {
        module: param(payload, "module")?,
    }
    .validate()?)
}

fn setconfig_params(payload: &Value) -> Result<(), AppError> {
    Ok(SetConfigParams {
        section: param(payload, "section")?,
        configdata: param(payload, "configdata")?,
    }
    .validate()?)
}

fn confirmstate_params(payload: &Value) -> Result<(), AppError> {
    Ok(ConfirmStateParams {
        devid: param(payload, "devid")?,
        state: param(payload, "state")?,
    }
    .validate()?)
}

fn setpreset_params(payload: &Value) -> Result<(), AppError> {
    Ok(SetPresetParams {
        presetname: param(payload, "presetname")?,
        preset: param(payload, "preset")?,
    }
    .validate()?)
}

fn runpreset_params(payload: &Value) -> Result<(), AppError> {
    Ok(RunPresetParams {
        preset: param(payload, "preset")?,
    }
    .validate()?)
}

fn setpresetview_params(payload: &Value) -> Result<(), AppError> {
    Ok(JsonListParams {
        list: param(payload, "presetlist")?,
    }
    .validate()?)
}

fn setroomgroups_params(payload: &Value) -> Result<(), AppError> {
    Ok(JsonListParams {
        list: param(payload, "rooms")?,
    }
    .validate()?)
}

fn debuglog_params(payload: &Value) -> Result<(), AppError> {
    Ok(DebugLogParams {
        debuglevel: param(payload, "debuglevel")?,
    }
    .validate()?)
}

fn backup_params(payload: &Value) -> Result<(), AppError> {
    param::<i64>(payload, "clientid")?;
    Ok(())
}

/// An operation the light server answers.
pub struct ForwardFactory {
    reqtype: &'static str,
    check: fn(&Value) -> Result<(), AppError>,
    html: bool,
}

pub struct ForwardCommand {
    payload: Value,
    html: bool,
}

impl CommandFactory for ForwardFactory {
    fn reqtype(&self) -> &'static str {
        self.reqtype
    }

    fn create(&self, payload: &Value) -> Result<Box<dyn CommandHandler>, AppError> {
        (self.check)(payload)?;
        Ok(Box::new(ForwardCommand {
            payload: payload.clone(),
            html: self.html,
        }))
    }
}

#[async_trait]
impl CommandHandler for ForwardCommand {
    async fn execute(&self, state: Arc<AppState>) -> Result<Reply, AppError> {
        let data = state.backend.query(self.payload.clone()).await?;
        Ok(self.reply(data))
    }
}

impl ForwardCommand {
    fn reply(&self, data: Value) -> Reply {
        let requested = self
            .payload
            .get("return_type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty());
        let content_type = requested
            .unwrap_or(if self.html { HTML } else { JSON })
            .to_string();

        let body = match data {
            Value::String(html) if self.html => html,
            other => other.to_string(),
        };
        Reply { body, content_type }
    }
}

macro_rules! forward {
    ($name:ident, $reqtype:literal, $check:expr, $html:literal) => {
        static $name: ForwardFactory = ForwardFactory {
            reqtype: $reqtype,
            check: $check,
            html: $html,
        };
        inventory::submit! {
            &$name as &'static dyn CommandFactory
        }
    };
    ($name:ident, $reqtype:literal, $check:expr) => {
        forward!($name, $reqtype, $check, false);
    };
}

forward!(GETSTATE, "getstate", getstate_params);
forward!(SETSTATE, "setstate", setstate_params);
forward!(SETGROUP, "setgroup", setgroup_params);
forward!(SETMODE, "setmode", setmode_params);
forward!(SETLOCK, "setlock", setlock_params);
forward!(GETMODULE, "getmodule", module_params, true);
forward!(GETCONFIG, "getconfig", no_params);
forward!(SETCONFIG, "setconfig", setconfig_params);
forward!(RECONNECT, "reconnect", device_params);
forward!(CONFIRMSTATE, "confirmstate", confirmstate_params);
forward!(SETALLMODE, "setallmode", no_params);
forward!(RELOADCONFIG, "reloadconfig", no_params);
forward!(GETPRESETS, "getpresets", no_params);
forward!(SETPRESET, "setpreset", setpreset_params);
forward!(RUNPRESET, "runpreset", runpreset_params);
forward!(SETPRESETVIEW, "setpresetview", setpresetview_params);
forward!(GETROOMGROUPS, "getroomgroups", no_params);
forward!(SETROOMGROUPS, "setroomgroups", setroomgroups_params);
forward!(GETDEBUGLOG, "getdebuglog", debuglog_params, true);
forward!(DOBACKUP, "dobackup", backup_params);

/// `getconfigxml`: answered locally from the configurables file.
pub struct ConfigXmlFactory;

pub struct ConfigXmlCommand;

impl CommandFactory for ConfigXmlFactory {
    fn reqtype(&self) -> &'static str {
        "getconfigxml"
    }

    fn create(&self, _payload: &Value) -> Result<Box<dyn CommandHandler>, AppError> {
        Ok(Box::new(ConfigXmlCommand))
    }
}

#[async_trait]
impl CommandHandler for ConfigXmlCommand {
    async fn execute(&self, state: Arc<AppState>) -> Result<Reply, AppError> {
        let value = configxml::load_file(&state.settings.server.config_xml, &state.catalog).await?;
        Ok(Reply {
            body: value.to_string(),
            content_type: JSON.to_string(),
        })
    }
}

inventory::submit! {
    &ConfigXmlFactory as &'static dyn CommandFactory
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn error_of(pairs: &[(&str, &str)]) -> AppError {
        match parse(form(pairs)) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        }
    }

    #[test]
    fn every_operation_is_registered() {
        assert_eq!(
            reqtypes(),
            vec![
                "confirmstate",
                "dobackup",
                "getconfig",
                "getconfigxml",
                "getdebuglog",
                "getmodule",
                "getpresets",
                "getroomgroups",
                "getstate",
                "reconnect",
                "reloadconfig",
                "runpreset",
                "setallmode",
                "setconfig",
                "setgroup",
                "setlock",
                "setmode",
                "setpreset",
                "setpresetview",
                "setroomgroups",
                "setstate",
            ]
        );
    }

    #[test]
    fn request_flag_is_required() {
        assert!(matches!(error_of(&[("reqtype", "getstate")]), AppError::NoRequest));
        assert!(matches!(
            error_of(&[("request", "False"), ("reqtype", "getstate")]),
            AppError::NoRequest
        ));
    }

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(matches!(
            error_of(&[("request", "True"), ("reqtype", "selfdestruct")]),
            AppError::UnknownOperation(op) if op == "selfdestruct"
        ));
    }

    #[test]
    fn validates_parameters() {
        assert!(matches!(
            error_of(&[("request", "True"), ("reqtype", "setstate"), ("value", "1")]),
            AppError::Validation(_)
        ));
        assert!(matches!(
            error_of(&[("request", "True"), ("reqtype", "setlock"), ("devid", "0"), ("lock", "2")]),
            AppError::Validation(_)
        ));
        assert!(matches!(
            error_of(&[
                ("request", "True"),
                ("reqtype", "setstate"),
                ("devid", "0"),
                ("value", "123456789")
            ]),
            AppError::Validation(_)
        ));
        assert!(matches!(
            error_of(&[
                ("request", "True"),
                ("reqtype", "setconfig"),
                ("section", "server"),
                ("configdata", "{not json")
            ]),
            AppError::Validation(_)
        ));
        assert!(parse(form(&[
            ("request", "True"),
            ("reqtype", "setconfig"),
            ("section", "server"),
            ("configdata", r#"{"WEBSERVER_PORT": "8081"}"#)
        ]))
        .is_ok());
        assert!(parse(form(&[("request", "True"), ("reqtype", "getstate")])).is_ok());
    }

    #[test]
    fn preset_and_room_operations_check_their_fields() {
        let accepted: [&[(&str, &str)]; 8] = [
            &[("reqtype", "getpresets")],
            &[("reqtype", "setpreset"), ("presetname", "evening"), ("preset", r#""1,0,1""#)],
            &[("reqtype", "runpreset"), ("preset", "evening")],
            &[("reqtype", "setpresetview"), ("presetlist", r#""evening,night""#)],
            &[("reqtype", "getroomgroups")],
            &[("reqtype", "setroomgroups"), ("rooms", r#""kitchen,hall""#)],
            &[("reqtype", "getdebuglog"), ("debuglevel", "1")],
            &[("reqtype", "dobackup"), ("clientid", "3")],
        ];
        for pairs in accepted {
            let mut fields = pairs.to_vec();
            fields.push(("request", "True"));
            assert!(parse(form(&fields)).is_ok(), "{pairs:?} refused");
        }

        let refused: [&[(&str, &str)]; 6] = [
            &[("reqtype", "setpreset"), ("presetname", "evening"), ("preset", "{broken")],
            &[("reqtype", "setpreset"), ("preset", r#""1""#)],
            &[("reqtype", "runpreset"), ("preset", "")],
            &[("reqtype", "setroomgroups"), ("rooms", "kitchen,hall")],
            &[("reqtype", "getdebuglog")],
            &[("reqtype", "dobackup"), ("clientid", "me")],
        ];
        for pairs in refused {
            let mut fields = pairs.to_vec();
            fields.push(("request", "True"));
            assert!(
                matches!(error_of(&fields), AppError::Validation(_)),
                "{pairs:?} accepted"
            );
        }
    }

    #[test]
    fn module_replies_are_raw_html() {
        let command = ForwardCommand {
            payload: json!({"reqtype": "getmodule", "module": "weblog"}),
            html: true,
        };
        assert_eq!(
            command.reply(json!("<div>log</div>")),
            Reply {
                body: "<div>log</div>".into(),
                content_type: HTML.into()
            }
        );
    }

    #[test]
    fn return_type_overrides_content_type() {
        let command = ForwardCommand {
            payload: json!({"reqtype": "getstate", "return_type": "text/plain"}),
            html: false,
        };
        let reply = command.reply(json!({"state": ["0"]}));
        assert_eq!(reply.content_type, "text/plain");
        assert_eq!(reply.body, r#"{"state":["0"]}"#);
    }
}

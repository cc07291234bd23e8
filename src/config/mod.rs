// config/mod.rs
use serde::Deserialize;
use config::Config;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub backend: BackendSettings,
    pub metrics: MetricsSettings,
    pub locale: LocaleSettings,
    /// Logical module name to template name.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub views_dir: PathBuf,
    pub config_xml: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocaleSettings {
    #[serde(default = "default_locale")]
    pub default: String,
    /// Holds one `<locale>.json` catalog per supported locale.
    #[serde(default = "default_catalog_dir")]
    pub catalog_dir: PathBuf,
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_catalog_dir() -> PathBuf {
    PathBuf::from("locales")
}

/// First path segments the gateway serves itself.
pub const RESERVED_PATHS: &[&str] = &[
    "query", "js", "getmodule", "configxml", "ws", "docs", "api-doc", "static",
];

/// A module page lives at `/<name>`, so the name must be a single plain
/// segment that no gateway route already owns.
pub fn is_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !RESERVED_PATHS.contains(&name)
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let settings = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("server.static_dir", "static")?
            .set_default("server.views_dir", "views")?
            .set_default("server.config_xml", "views/configurables.xml")?
            .set_default("backend.query_timeout_secs", 30)?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.port", 9091)?
            .set_default("locale.default", "en")?
            .set_default("locale.catalog_dir", "locales")?
            .set_default("modules.preseteditor", "modules/preseteditor")?
            .set_default("modules.presetselect", "modules/presetselect")?
            .set_default("modules.groupselect", "modules/groupselect")?
            .add_source(config::File::with_name("config/config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let settings: Settings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Refuses module names that cannot be served as a top-level page.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        for name in self.modules.keys() {
            if !is_module_name(name) {
                return Err(config::ConfigError::Message(format!(
                    "module name {name:?} collides with a gateway route or is not a plain path segment"
                )));
            }
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.query_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let modules = ["preseteditor", "presetselect", "groupselect"]
            .into_iter()
            .map(|name| (name.to_string(), format!("modules/{name}")))
            .collect();

        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8081,
                static_dir: PathBuf::from("static"),
                views_dir: PathBuf::from("views"),
                config_xml: PathBuf::from("views/configurables.xml"),
            },
            backend: BackendSettings {
                query_timeout_secs: 30,
            },
            metrics: MetricsSettings {
                enabled: false,
                port: 9091,
            },
            locale: LocaleSettings {
                default: default_locale(),
                catalog_dir: default_catalog_dir(),
            },
            modules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_modules_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn module_names_owned_by_routes_are_refused() {
        for name in ["configxml", "getmodule", "static", "", "a/b", "{id}", "*rest"] {
            let mut settings = Settings::default();
            settings.modules.insert(name.to_string(), "modules/x".to_string());
            assert!(settings.validate().is_err(), "{name:?} accepted");
        }
    }
}

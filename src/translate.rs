// translate.rs
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Locale whose catalog is the identity: page sources are written in it.
pub const SOURCE_LOCALE: &str = "en";

/// Message catalog for one locale. Unknown messages translate to themselves.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    locale: String,
    messages: HashMap<String, String>,
}

impl Catalog {
    pub fn identity() -> Self {
        Self {
            locale: SOURCE_LOCALE.to_string(),
            messages: HashMap::new(),
        }
    }

    pub fn from_messages(locale: &str, messages: HashMap<String, String>) -> Self {
        Self {
            locale: locale.to_string(),
            messages,
        }
    }

    /// Loads `<dir>/<locale>.json`. The source locale needs no file.
    pub fn load(dir: &Path, locale: &str) -> anyhow::Result<Self> {
        if locale == SOURCE_LOCALE {
            return Ok(Self::identity());
        }
        let path = dir.join(format!("{locale}.json"));
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read catalog '{}'", path.display()))?;
        let messages: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("malformed catalog '{}'", path.display()))?;
        info!(locale, entries = messages.len(), "Loaded message catalog");
        Ok(Self::from_messages(locale, messages))
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn gettext<'a>(&'a self, message: &'a str) -> &'a str {
        self.messages
            .get(message)
            .map(String::as_str)
            .unwrap_or(message)
    }
}

// templates.rs
use crate::{error::AppError, translate::Catalog};
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const OPEN: &str = "{{t:";
const CLOSE: &str = "}}";

/// Page and module fragments, keyed by their path under the views directory
/// without extension (`index`, `app`, `modules/groupselect`).
///
/// Translatable text is written as `{{t:Some text}}`.
#[derive(Debug, Clone, Default)]
pub struct Templates {
    sources: HashMap<String, String>,
}

impl Templates {
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let mut templates = Self::default();
        templates
            .load_dir(dir, dir)
            .with_context(|| format!("failed to load views from '{}'", dir.display()))?;
        Ok(templates)
    }

    fn load_dir(&mut self, root: &Path, dir: &Path) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.load_dir(root, &path)?;
                continue;
            }
            let is_view = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("html" | "js")
            );
            if !is_view {
                continue;
            }
            let Ok(relative) = path.with_extension("").strip_prefix(root).map(Path::to_path_buf)
            else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            debug!(%name, "Loaded view");
            self.sources.insert(name, std::fs::read_to_string(&path)?);
        }
        Ok(())
    }

    pub fn insert(&mut self, name: &str, source: &str) {
        self.sources.insert(name.to_string(), source.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn render(&self, name: &str, catalog: &Catalog) -> Result<String, AppError> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| AppError::TemplateNotFound(name.to_string()))?;
        Ok(translate_markers(source, catalog))
    }
}

fn translate_markers(source: &str, catalog: &Catalog) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(catalog.gettext(after[..end].trim()));
        rest = &after[end + CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

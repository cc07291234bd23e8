// configxml.rs
//! Converts the configurables XML document into the JSON shape the settings
//! page consumes.
use crate::{error::AppError, translate::Catalog};
use serde_json::{Map, Number, Value};
use std::path::Path;

const ATTRIBUTE_PREFIX: &str = "attr_";
const TEXT_KEY: &str = "#text";
const TRANSLATABLE_TAG: &str = "tl";

pub async fn load_file(path: &Path, catalog: &Catalog) -> Result<Value, AppError> {
    let xml = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::ConfigXml(format!("{}: {}", path.display(), e)))?;
    to_json(&xml, catalog)
}

pub fn to_json(xml: &str, catalog: &Catalog) -> Result<Value, AppError> {
    let document = roxmltree::Document::parse(xml).map_err(|e| AppError::ConfigXml(e.to_string()))?;
    let root = document.root_element();
    let mut out = Map::new();
    out.insert(root.tag_name().name().to_string(), element_value(root, catalog));
    Ok(Value::Object(out))
}

fn element_value(node: roxmltree::Node<'_, '_>, catalog: &Catalog) -> Value {
    let tag = node.tag_name().name();
    let text: String = node
        .children()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect::<String>()
        .trim()
        .to_string();
    let text_value = if tag == TRANSLATABLE_TAG {
        Value::String(catalog.gettext(&text).to_string())
    } else {
        parse_scalar(&text)
    };

    let has_attributes = node.attributes().next().is_some();
    let has_children = node.children().any(|child| child.is_element());
    if !has_attributes && !has_children {
        return text_value;
    }

    let mut object = Map::new();
    for attribute in node.attributes() {
        object.insert(
            format!("{ATTRIBUTE_PREFIX}{}", attribute.name()),
            parse_scalar(attribute.value()),
        );
    }
    for child in node.children().filter(|child| child.is_element()) {
        let name = child.tag_name().name().to_string();
        let value = element_value(child, catalog);
        match object.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                object.insert(name, value);
            }
        }
    }
    if !text.is_empty() {
        object.insert(TEXT_KEY.to_string(), text_value);
    }
    Value::Object(object)
}

/// Numbers and booleans become JSON scalars; everything else stays text.
fn parse_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    // leading zeros are identifiers (ports, codes), keep them verbatim
    let leading_zero = trimmed.len() > 1 && trimmed.starts_with('0') && !trimmed.starts_with("0.");
    if !leading_zero {
        if let Ok(n) = trimmed.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
            if trimmed.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+')) {
                return Value::Number(n);
            }
        }
    }
    Value::String(raw.to_string())
}

//! Manifest payload normalization
//!
//! The media API has answered with several shapes over time. Each decoder
//! tries the known shapes in a fixed order and maps them onto one record
//! type, so the rest of the proxy only ever sees the normalized form.
//! Items that fit no known shape are skipped rather than failing the list.

use crate::config::Settings;
use crate::error::{ProxyError, Result};
use gallery_cache::extract_hash;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageList {
    pub items: Vec<ImageItem>,
}

fn invalid(what: &str) -> ProxyError {
    ProxyError::InvalidPayload(format!("unrecognised {} payload", what))
}

/// The item list of a payload that is either a bare array or wraps one in `field`
fn list_items(value: Value, field: &str) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove(field) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// A string, or a number rendered as one
fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn normalize_dates(value: Value) -> Result<Vec<String>> {
    let items = match value {
        Value::Object(map) if !map.contains_key("dates") => {
            let mut dates: Vec<String> = map.into_iter().map(|(date, _)| date).collect();
            dates.sort();
            return Ok(dates);
        }
        other => list_items(other, "dates").ok_or_else(|| invalid("dates"))?,
    };

    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(date) if !date.is_empty() => Some(date.clone()),
            Value::Object(record) => {
                scalar_string(record.get("date")).or_else(|| scalar_string(record.get("name")))
            }
            _ => None,
        })
        .collect())
}

pub fn normalize_collections(value: Value) -> Result<Vec<Collection>> {
    let items = list_items(value, "collections").ok_or_else(|| invalid("collections"))?;

    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) if !name.is_empty() => Some(Collection {
                id: name.clone(),
                name: name.clone(),
            }),
            Value::Object(record) => {
                let id = scalar_string(record.get("id"));
                let name = scalar_string(record.get("name"));
                match (id, name) {
                    (Some(id), Some(name)) => Some(Collection { id, name }),
                    (Some(id), None) => Some(Collection {
                        name: id.clone(),
                        id,
                    }),
                    (None, Some(name)) => Some(Collection {
                        id: name.clone(),
                        name,
                    }),
                    (None, None) => None,
                }
            }
            _ => None,
        })
        .collect())
}

/// Normalize an images list and point its media URLs at this proxy
pub fn normalize_images(value: Value, settings: &Settings) -> Result<ImageList> {
    let raw = list_items(value, "items").ok_or_else(|| invalid("images"))?;

    let items = raw
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(fields) => Some(fields),
            _ => None,
        })
        .map(|fields| {
            let mut item = image_item(fields);
            item.public_url = item.public_url.map(|url| rewrite_url(url, settings));
            item.thumbnail_url = item.thumbnail_url.map(|url| rewrite_url(url, settings));
            item
        })
        .collect();

    Ok(ImageList { items })
}

fn take_string(fields: &mut Map<String, Value>, names: &[&str]) -> Option<String> {
    let mut found = None;
    for name in names {
        match fields.remove(*name) {
            Some(Value::String(s)) if found.is_none() && !s.is_empty() => found = Some(s),
            _ => {}
        }
    }
    found
}

fn image_item(mut fields: Map<String, Value>) -> ImageItem {
    ImageItem {
        public_url: take_string(&mut fields, &["public_url", "url", "src"]),
        thumbnail_url: take_string(&mut fields, &["thumbnail_url", "thumbnail"]),
        title: take_string(&mut fields, &["title", "name"]),
        alt: take_string(&mut fields, &["alt"]),
        extra: fields,
    }
}

/// Proxy URL for an origin media URL, or the URL unchanged when it carries no hash
pub fn rewrite_url(url: String, settings: &Settings) -> String {
    match extract_hash(&url) {
        Ok(hash) => {
            let thumb = url.contains("/thumbnail/");
            settings.image_proxy_url(hash.as_str(), thumb)
        }
        Err(_) => url,
    }
}

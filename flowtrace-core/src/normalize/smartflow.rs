//! SmartFlow entry unwrapping.
//!
//! SmartFlow records nest JSON inside string `message` fields, up to two
//! levels deep:
//!
//! ```text
//! { "message": "{ \"timestamp\": ..., \"message\": \"{ \\\"PluginId\\\": ... }\" }" }
//!   outer          first level                     inner level
//! ```
//!
//! Plugin id and log type live on the inner level when it exists.

use serde_json::{Map, Value};

use super::inspect::{is_truthy, scalar_text};
use crate::types::Role;

const PLUGIN_ID_FIELDS: &[&str] = &["PluginId", "pluginId", "plugin_id"];
const LOG_TYPE_FIELDS: &[&str] = &["LogType", "logType", "log_type"];
const GPT_PLUGIN_PREFIX: &str = "EXTCALL_";

/// The unwrapped levels of one SmartFlow entry.
#[derive(Debug)]
pub(crate) struct SmartFlowEntry {
    /// Outer record with the consumed `message` removed
    pub outer: Value,
    pub first: Option<Value>,
    pub inner: Option<Value>,
    /// A `message` looked like JSON but did not parse
    pub malformed: bool,
    /// Innermost message text for display
    pub message: Option<String>,
}

impl SmartFlowEntry {
    pub(crate) fn unwrap(entry: &Map<String, Value>) -> Self {
        let mut outer = entry.clone();
        let mut malformed = false;

        let (first, outer_message) = match outer.get("message") {
            Some(Value::Object(obj)) => (Some(Value::Object(obj.clone())), None),
            Some(Value::String(s)) => match parse_embedded(s) {
                Embedded::Json(v) => (Some(v), None),
                Embedded::Broken => {
                    malformed = true;
                    (None, Some(s.clone()))
                }
                Embedded::Text => (None, Some(s.clone())),
            },
            _ => (None, None),
        };
        if first.is_some() {
            outer.remove("message");
        }

        let mut first = first;
        let mut first_message = None;
        let mut inner = None;
        if let Some(Value::Object(level)) = first.as_mut() {
            let embedded = level.get("message").and_then(Value::as_str).map(str::to_string);
            if let Some(s) = embedded {
                match parse_embedded(&s) {
                    Embedded::Json(v) => {
                        inner = Some(v);
                        level.remove("message");
                    }
                    Embedded::Broken => malformed = true,
                    Embedded::Text => {}
                }
                first_message = Some(s);
            }
        }

        let message = first_message.or(outer_message).or_else(|| {
            first
                .as_ref()
                .filter(|f| is_truthy(f))
                .map(|f| f.to_string())
        });

        Self {
            outer: Value::Object(outer),
            first,
            inner,
            malformed,
            message,
        }
    }

    /// Levels from most to least specific.
    pub(crate) fn levels(&self) -> Vec<&Value> {
        self.inner
            .iter()
            .chain(self.first.iter())
            .chain(std::iter::once(&self.outer))
            .collect()
    }

    /// Plugin id from the most specific level that has one. Entries that
    /// declare `"type": "plugin"` may carry the id in a plain `id` field.
    pub(crate) fn plugin_id(&self) -> Option<String> {
        let levels = self.levels();
        first_field(&levels, PLUGIN_ID_FIELDS).or_else(|| {
            levels.iter().find_map(|level| {
                let declared = level.get("type").and_then(Value::as_str)?;
                if declared.eq_ignore_ascii_case("plugin") {
                    level.get("id").and_then(scalar_text)
                } else {
                    None
                }
            })
        })
    }

    /// Log type, preferring explicit LogType fields; `level` on the first
    /// level is the last resort.
    pub(crate) fn log_type(&self) -> Option<String> {
        first_field(&self.levels(), LOG_TYPE_FIELDS).or_else(|| {
            self.first
                .as_ref()
                .and_then(|f| f.get("level"))
                .and_then(scalar_text)
        })
    }

    /// Any level carries a `SessionData` object.
    pub(crate) fn has_session_data(&self) -> bool {
        self.levels().iter().any(|l| l.get("SessionData").is_some())
    }

    /// GPT agent traffic routed through an `EXTCALL_` plugin.
    pub(crate) fn gpt_turn(&self, plugin_id: Option<&str>, log_type: Option<&str>) -> Option<(Role, String)> {
        let plugin_id = plugin_id?;
        let suffix = plugin_id.strip_prefix(GPT_PLUGIN_PREFIX)?;
        let log_type = log_type?;
        let data = self.inner.as_ref().or(self.first.as_ref())?;

        if log_type == "IpdOut" {
            let text = data
                .get("IpdMsg")
                .and_then(|m| m.get("body"))
                .and_then(|b| b.get("user_message"))
                .and_then(scalar_text)?;
            return Some((Role::User, text));
        }

        if log_type == "IpdIn" || log_type == "PluginTran" {
            let direct = data.get("ai_response").and_then(scalar_text);
            let from_session = || {
                data.get("SessionData")
                    .and_then(Value::as_object)?
                    .iter()
                    .find(|(k, _)| k.contains(".ai_response") && k.contains(suffix))
                    .and_then(|(_, v)| scalar_text(v))
            };
            return direct.or_else(from_session).map(|t| (Role::Assistant, t));
        }

        None
    }
}

enum Embedded {
    Json(Value),
    Broken,
    Text,
}

fn parse_embedded(s: &str) -> Embedded {
    let trimmed = s.trim_start();
    if !trimmed.starts_with('{') {
        return Embedded::Text;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v @ Value::Object(_)) => Embedded::Json(v),
        _ => Embedded::Broken,
    }
}

/// Plugin id declared directly on one object level.
pub(crate) fn plugin_id_field(level: &Value) -> Option<String> {
    first_field(&[level], PLUGIN_ID_FIELDS)
}

fn first_field(levels: &[&Value], fields: &[&str]) -> Option<String> {
    levels
        .iter()
        .find_map(|level| fields.iter().find_map(|f| level.get(*f).and_then(scalar_text)))
}

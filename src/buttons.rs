//! Normalization of the interaction metadata ("buttons") attached to a
//! successful task.
//!
//! The backend has shipped several shapes for this field over time. Each
//! is classified into a [`RawButtons`] variant and reduced to one
//! [`InteractionMetadata`]. Normalization never fails; missing pieces fall
//! back to `0` / `""`.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::types::{Action, CustomId};

/// Canonical interaction metadata of a finished task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionMetadata {
    /// Message id of the result message; `0` when unknown.
    pub msg_id: u64,
    /// Message hash of the result; empty when unknown.
    pub msg_hash: String,
    /// Original button payload, preserved as received.
    pub raw: Option<Value>,
    /// Follow-up actions the backend advertised with a ready-made custom id.
    pub actions: BTreeMap<Action, CustomId>,
}

impl InteractionMetadata {
    pub fn custom_id_for(&self, action: &Action) -> Option<&CustomId> {
        self.actions.get(action)
    }

    /// Serialize into the canonical mapping. Feeding the result back through
    /// [`normalize_buttons`] as the `buttons` field yields an equal value.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("msg_id".into(), Value::from(self.msg_id));
        map.insert("msg_hash".into(), Value::String(self.msg_hash.clone()));
        if let Some(raw) = &self.raw {
            map.insert("buttons".into(), raw.clone());
        }
        for (action, custom_id) in &self.actions {
            map.insert(action.code(), Value::String(custom_id.to_string()));
        }
        Value::Object(map)
    }
}

/// The shapes the `buttons` field arrives in.
#[derive(Debug, Clone, Copy)]
pub enum RawButtons<'a> {
    /// Mapping that already carries `msg_id` and `msg_hash`.
    Canonical(&'a Map<String, Value>),
    /// Older mapping without message identity; identity lives at the top level.
    Legacy(&'a Map<String, Value>),
    /// Ordered list of button descriptors; identity lives at the top level.
    List(&'a [Value]),
    /// Missing, null, or any other JSON type.
    Absent,
}

impl<'a> RawButtons<'a> {
    pub fn classify(payload: &'a Value) -> Self {
        match payload.get("buttons") {
            Some(Value::Object(map)) if map.contains_key("msg_id") && map.contains_key("msg_hash") => {
                RawButtons::Canonical(map)
            }
            Some(Value::Object(map)) => RawButtons::Legacy(map),
            Some(Value::Array(list)) => RawButtons::List(list),
            Some(Value::Null) | None => RawButtons::Absent,
            Some(other) => {
                tracing::warn!(buttons = %other, "Unexpected buttons format, ignoring");
                RawButtons::Absent
            }
        }
    }
}

/// Reduce a decoded status payload to [`InteractionMetadata`].
pub fn normalize_buttons(payload: &Value) -> InteractionMetadata {
    let mut actions = BTreeMap::new();

    let (msg_id, msg_hash, raw) = match RawButtons::classify(payload) {
        RawButtons::Canonical(map) => {
            collect_from_map(map, &mut actions);
            let nested = map.get("buttons").cloned();
            if let Some(nested) = &nested {
                collect_from_value(nested, &mut actions);
            }
            (read_msg_id(map.get("msg_id")), read_msg_hash(map.get("msg_hash")), nested)
        }
        RawButtons::Legacy(map) => {
            collect_from_map(map, &mut actions);
            let (id, hash) = top_level_identity(payload);
            (id, hash, Some(Value::Object(map.clone())))
        }
        RawButtons::List(list) => {
            collect_from_list(list, &mut actions);
            let (id, hash) = top_level_identity(payload);
            (id, hash, Some(Value::Array(list.to_vec())))
        }
        // Defaults to 0 / "" when the top level carries nothing either.
        RawButtons::Absent => {
            let (id, hash) = top_level_identity(payload);
            (id, hash, None)
        }
    };

    InteractionMetadata {
        msg_id,
        msg_hash,
        raw,
        actions,
    }
}

fn top_level_identity(payload: &Value) -> (u64, String) {
    (
        read_msg_id(payload.get("msg_id")),
        read_msg_hash(payload.get("msg_hash")),
    )
}

fn read_msg_id(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn read_msg_hash(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn collect_from_value(value: &Value, actions: &mut BTreeMap<Action, CustomId>) {
    match value {
        Value::Object(map) => collect_from_map(map, actions),
        Value::Array(list) => collect_from_list(list, actions),
        _ => {}
    }
}

fn collect_from_map(map: &Map<String, Value>, actions: &mut BTreeMap<Action, CustomId>) {
    for (key, value) in map {
        if let Some(entry) = action_entry(key, value.as_str()) {
            actions.insert(entry.0, entry.1);
        }
    }
}

fn collect_from_list(list: &[Value], actions: &mut BTreeMap<Action, CustomId>) {
    for descriptor in list {
        let Some(label) = descriptor.get("label").and_then(|v| v.as_str()) else {
            continue;
        };
        let custom_id = descriptor
            .get("customId")
            .or_else(|| descriptor.get("custom_id"))
            .and_then(|v| v.as_str());
        if let Some(entry) = action_entry(label, custom_id) {
            actions.insert(entry.0, entry.1);
        }
    }
}

fn action_entry(code: &str, custom_id: Option<&str>) -> Option<(Action, CustomId)> {
    let action = code.parse::<Action>().ok()?;
    let custom_id = CustomId::parse(custom_id?).ok()?;
    Some((action, custom_id))
}

//! Conversion between [`TaggedPayload`] and Lua values.
//!
//! Integers arrive in Lua as Lua integers (`math.type(x) == "integer"`),
//! fractional numbers as floats. Absent values become `nil`; absent object
//! slots are left out of the table entirely.
//!
//! Going the other way, sequence tables (`{1, 2, 3}`) become arrays and any
//! other table becomes an object with stringified keys. Functions, userdata
//! and threads have no boundary encoding and degrade to `Absent`.

use std::collections::BTreeMap;

use mlua::{Lua, Table, Value};

use crate::bridge::TaggedPayload;

/// Nesting limit when walking Lua tables; deeper (or cyclic) tables are cut off.
const MAX_DEPTH: usize = 64;

/// Convert a tagged payload into a Lua value.
pub fn payload_to_lua(lua: &Lua, payload: &TaggedPayload) -> mlua::Result<Value> {
    match payload {
        TaggedPayload::Absent => Ok(Value::Nil),
        TaggedPayload::Integer(i) => Ok(Value::Integer(*i)),
        TaggedPayload::Float(f) => Ok(Value::Number(*f)),
        TaggedPayload::Boolean(b) => Ok(Value::Boolean(*b)),
        TaggedPayload::String(s) | TaggedPayload::ErrorMessage(s) => {
            lua.create_string(s).map(Value::String)
        }
        TaggedPayload::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, payload_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        TaggedPayload::Object(map) => {
            let table = lua.create_table_with_capacity(0, map.len())?;
            for (key, item) in map.iter().filter(|(_, v)| !v.is_absent()) {
                table.raw_set(lua.create_string(key)?, payload_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}

/// Convert a Lua value into a tagged payload. Never fails.
#[must_use]
pub fn lua_to_payload(value: &Value) -> TaggedPayload {
    to_payload(value, 0)
}

fn to_payload(value: &Value, depth: usize) -> TaggedPayload {
    match value {
        Value::Nil => TaggedPayload::Absent,
        Value::Boolean(b) => TaggedPayload::Boolean(*b),
        Value::Integer(i) => TaggedPayload::Integer(*i),
        Value::Number(f) => TaggedPayload::Float(*f),
        Value::String(s) => TaggedPayload::String(s.to_string_lossy()),
        Value::Table(table) if depth < MAX_DEPTH => table_to_payload(table, depth + 1),
        Value::Table(_) => {
            log::debug!("[socketio] Lua table nested deeper than {MAX_DEPTH}; truncated");
            TaggedPayload::Absent
        }
        other => {
            log::debug!("[socketio] Lua {} has no payload encoding", other.type_name());
            TaggedPayload::Absent
        }
    }
}

fn table_to_payload(table: &Table, depth: usize) -> TaggedPayload {
    let entries: Vec<(Value, Value)> = table
        .clone()
        .pairs::<Value, Value>()
        .filter_map(Result::ok)
        .collect();

    let len = table.raw_len();
    if len > 0 && entries.len() == len {
        let items = (1..=len)
            .map(|i| {
                table
                    .raw_get::<Value>(i)
                    .map_or(TaggedPayload::Absent, |v| to_payload(&v, depth))
            })
            .collect();
        return TaggedPayload::Array(items);
    }

    let map: BTreeMap<String, TaggedPayload> = entries
        .iter()
        .filter_map(|(k, v)| lua_key(k).map(|key| (key, to_payload(v, depth))))
        .collect();
    TaggedPayload::Object(map)
}

/// String form of a table key, or `None` for keys with no textual form.
pub fn lua_key(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.to_string_lossy()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(f) => Some(f.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

//! JSON encode/decode for Lua scripts.
//!
//! Both directions go through [`TaggedPayload`], so scripts see the same
//! number typing as listener callbacks: `json.decode("3")` yields an
//! integer and `json.encode(124.0)` yields `"124"`.
//!
//! ```lua
//! local s, err = json.encode({ room = "lobby", n = 1 })
//! local t, err = json.decode('{"room":"lobby"}')
//! ```
//!
//! Both return `(value, nil)` on success and `(nil, err)` on failure.

use anyhow::{anyhow, Result};
use mlua::{Lua, Value};

use super::payload::{lua_to_payload, payload_to_lua};
use crate::bridge::TaggedPayload;

/// Register the global `json` table.
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua) -> Result<()> {
    let json_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create json table: {e}"))?;

    let encode_fn = lua
        .create_function(|_, value: Value| {
            match serde_json::to_string(&lua_to_payload(&value).to_json()) {
                Ok(s) => Ok((Some(s), None::<String>)),
                Err(e) => Ok((None, Some(format!("Failed to encode JSON: {e}")))),
            }
        })
        .map_err(|e| anyhow!("Failed to create json.encode function: {e}"))?;
    json_table
        .set("encode", encode_fn)
        .map_err(|e| anyhow!("Failed to set json.encode: {e}"))?;

    let decode_fn = lua
        .create_function(|lua, s: String| {
            match serde_json::from_str::<serde_json::Value>(&s) {
                Ok(json) => {
                    let value = payload_to_lua(lua, &TaggedPayload::from(json))?;
                    Ok((Some(value), None::<String>))
                }
                Err(e) => Ok((None::<Value>, Some(format!("Failed to decode JSON: {e}")))),
            }
        })
        .map_err(|e| anyhow!("Failed to create json.decode function: {e}"))?;
    json_table
        .set("decode", decode_fn)
        .map_err(|e| anyhow!("Failed to set json.decode: {e}"))?;

    lua.globals()
        .set("json", json_table)
        .map_err(|e| anyhow!("Failed to register json table globally: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_whole_float_as_integer() {
        let lua = Lua::new();
        register(&lua).unwrap();

        let (s, err): (Option<String>, Option<String>) =
            lua.load("return json.encode({ n = 124.0 })").eval().unwrap();
        assert!(err.is_none());
        assert_eq!(s.unwrap(), r#"{"n":124}"#);
    }

    #[test]
    fn test_decode_keeps_integer_type() {
        let lua = Lua::new();
        register(&lua).unwrap();

        let kind: String = lua
            .load(r#"local t = json.decode('{"count":3}'); return math.type(t.count)"#)
            .eval()
            .unwrap();
        assert_eq!(kind, "integer");
    }

    #[test]
    fn test_decode_invalid_returns_error() {
        let lua = Lua::new();
        register(&lua).unwrap();

        let (value, err): (Value, Option<String>) =
            lua.load(r#"return json.decode("{nope")"#).eval().unwrap();
        assert!(value.is_nil());
        assert!(err.unwrap().contains("Failed to decode JSON"));
    }
}

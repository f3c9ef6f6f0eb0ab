//! `log` table for Lua scripts.
//!
//! `log.info(msg)`, `log.warn(msg)`, `log.error(msg)` and `log.debug(msg)`
//! forward to the `log` crate under the `lua` target, so script output is
//! filtered by `RUST_LOG` like everything else.

use anyhow::{anyhow, Result};
use log::Level;
use mlua::Lua;

const LEVELS: [(&str, Level); 4] = [
    ("info", Level::Info),
    ("warn", Level::Warn),
    ("error", Level::Error),
    ("debug", Level::Debug),
];

/// Register the global `log` table.
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua) -> Result<()> {
    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    for (name, level) in LEVELS {
        let func = lua
            .create_function(move |_, msg: String| {
                log::log!(target: "lua", level, "{msg}");
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        log_table
            .set(name, func)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    lua.globals()
        .set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_functions_callable() {
        let lua = Lua::new();
        register(&lua).unwrap();

        lua.load(
            r#"
            log.info("info")
            log.warn("warn")
            log.error("error")
            log.debug("debug")
        "#,
        )
        .exec()
        .unwrap();
    }

    #[test]
    fn test_non_string_argument_is_error() {
        let lua = Lua::new();
        register(&lua).unwrap();
        assert!(lua.load("log.info({})").exec().is_err());
    }
}

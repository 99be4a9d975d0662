//! Lua sandbox creation
//!
//! Scripts run with a restricted set of standard libraries: no filesystem,
//! process or network access and no way to load external code. Modules such
//! as `log` are registered by the caller after the sandbox is created.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib};

/// Create a restricted Lua sandbox
///
/// This sandbox includes only basic Lua functionality (tables, strings, math,
/// utf8) and does NOT include `io`, `os`, `package` or `debug`.
///
/// # Example
/// ```no_run
/// use sluice_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let doubled: i64 = lua.load("return 21 * 2").eval()?;
/// assert_eq!(doubled, 42);
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
        LuaOptions::default(),
    )?;

    let globals = lua.globals();
    for name in ["require", "dofile", "loadfile", "load", "collectgarbage"] {
        globals.set(name, mlua::Nil)?;
    }

    Ok(lua)
}

//! Script modules
//!
//! A module installs one global table into a script sandbox. The processor
//! collects its modules in a [`ModuleRegistry`] and installs them all before
//! loading the user script.

use mlua::prelude::*;

/// A global table made available to pipeline scripts
///
/// # Example
///
/// ```rust
/// use sluice_lua::ScriptModule;
/// use mlua::prelude::*;
///
/// struct ClockModule;
///
/// impl ScriptModule for ClockModule {
///     fn id(&self) -> &'static str {
///         "clock"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("epoch", lua.create_function(|_, ()| Ok(0))?)?;
///         lua.globals().set(self.id(), table)?;
///         Ok(())
///     }
/// }
/// ```
pub trait ScriptModule: Send + Sync {
    /// Name of the global table, e.g. `"log"` for `log.info(...)`
    fn id(&self) -> &'static str;

    /// Installs the module's table into `lua`
    fn register(&self, lua: &Lua) -> LuaResult<()>;
}

/// Modules to install into a sandbox, at most one per id
pub struct ModuleRegistry {
    modules: Vec<Box<dyn ScriptModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Adds `module`, replacing any module with the same id
    pub fn register<M: ScriptModule + 'static>(&mut self, module: M) {
        let id = module.id();
        self.modules.retain(|m| m.id() != id);
        self.modules.push(Box::new(module));
    }

    pub fn get(&self, id: &str) -> Option<&dyn ScriptModule> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    /// Installs every module into `lua`, stopping at the first failure
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        for module in &self.modules {
            module.register(lua)?;
        }
        Ok(())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestModule(i64);

    impl ScriptModule for TestModule {
        fn id(&self) -> &'static str {
            "test"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            let table = lua.create_table()?;
            table.set("value", self.0)?;
            lua.globals().set(self.id(), table)?;
            Ok(())
        }
    }

    #[test]
    fn test_module_registration() {
        let mut registry = ModuleRegistry::new();
        registry.register(TestModule(42));

        assert!(registry.get("test").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_reregistration_replaces_module() {
        let mut registry = ModuleRegistry::new();
        registry.register(TestModule(1));
        registry.register(TestModule(2));

        let lua = Lua::new();
        registry.register_all(&lua).unwrap();
        let value: i64 = lua.load("return test.value").eval().unwrap();
        assert_eq!(value, 2);
    }
}

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use thiserror::Error;

use super::runtime::QuickJsEngine;
use super::vfs::{VfsError, VirtualFs};

#[derive(Debug, Error)]
pub enum GuestError {
    #[error("No module named '{0}'")]
    ModuleNotFound(String),
    #[error("guest exception: {0}")]
    Exception(String),
    #[error("guest engine error: {0}")]
    Engine(String),
    #[error(transparent)]
    Filesystem(#[from] VfsError),
    #[error("guest returned invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Reference to a module that has been imported into the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleHandle {
    name: String,
}

impl ModuleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An argument passed into a guest function call.
#[derive(Debug, Clone)]
pub enum GuestArg {
    Str(String),
    Json(JsonValue),
    Module(ModuleHandle),
}

impl From<&str> for GuestArg {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<&ModuleHandle> for GuestArg {
    fn from(value: &ModuleHandle) -> Self {
        Self::Module(value.clone())
    }
}

/// The shape of the embedded interpreter the worker depends on.
pub trait GuestInterpreter {
    fn filesystem(&self) -> &VirtualFs;

    fn filesystem_mut(&mut self) -> &mut VirtualFs;

    /// Forget every imported module so the next import re-reads the filesystem.
    fn invalidate_import_cache(&mut self);

    /// Import `module` (`<module>.js` or `<module>/index.js`), serving a cached
    /// module if one exists.
    fn import(&mut self, module: &str) -> Result<ModuleHandle, GuestError>;

    fn run(&self, source: &str) -> Result<(), GuestError>;

    /// Call an exported function and return its result as JSON (`null` for
    /// `undefined`).
    fn call(
        &self,
        module: &ModuleHandle,
        function: &str,
        args: &[GuestArg],
    ) -> Result<JsonValue, GuestError>;
}

/// Constructs interpreters; the worker calls this at most once.
pub trait InterpreterLoader {
    type Interpreter: GuestInterpreter;

    fn load(&self) -> anyhow::Result<Self::Interpreter>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QuickJsLoader;

impl InterpreterLoader for QuickJsLoader {
    type Interpreter = QuickJsInterpreter;

    fn load(&self) -> anyhow::Result<QuickJsInterpreter> {
        QuickJsInterpreter::new()
    }
}

const MODULE_TABLE: &str = "globalThis.__guest_modules";

/// QuickJS with a virtual filesystem and a CommonJS-style importer.
///
/// Module exports live in a table inside the guest; `import_cache` records which
/// names have been evaluated from the filesystem since the last invalidation.
pub struct QuickJsInterpreter {
    engine: QuickJsEngine,
    fs: VirtualFs,
    import_cache: HashMap<String, String>,
}

impl QuickJsInterpreter {
    pub fn new() -> anyhow::Result<Self> {
        let engine = QuickJsEngine::new()?;
        engine.eval(
            &format!("{MODULE_TABLE} = new Map();"),
            "module-table.js",
        )?;
        tracing::debug!(target: "quickjs", "interpreter constructed");
        Ok(Self {
            engine,
            fs: VirtualFs::new(),
            import_cache: HashMap::new(),
        })
    }

    pub fn engine(&self) -> &QuickJsEngine {
        &self.engine
    }

    fn resolve(&self, module: &str) -> Option<String> {
        let base = module.replace('.', "/");
        [format!("{base}.js"), format!("{base}/index.js")]
            .into_iter()
            .find(|candidate| self.fs.path_exists(candidate) && !self.fs.is_dir(candidate))
    }
}

impl GuestInterpreter for QuickJsInterpreter {
    fn filesystem(&self) -> &VirtualFs {
        &self.fs
    }

    fn filesystem_mut(&mut self) -> &mut VirtualFs {
        &mut self.fs
    }

    fn invalidate_import_cache(&mut self) {
        self.import_cache.clear();
    }

    fn import(&mut self, module: &str) -> Result<ModuleHandle, GuestError> {
        if self.import_cache.contains_key(module) {
            return Ok(ModuleHandle {
                name: module.to_string(),
            });
        }

        let path = self
            .resolve(module)
            .ok_or_else(|| GuestError::ModuleNotFound(module.to_string()))?;
        let source = self.fs.read(&path)?;
        let key = serde_json::to_string(module)?;
        let wrapped = format!(
            "(() => {{\n\
             const module = {{ exports: {{}} }};\n\
             (function (module, exports) {{\n{source}\n}})(module, module.exports);\n\
             {MODULE_TABLE}.set({key}, module.exports);\n\
             }})();"
        );
        self.engine.eval(&wrapped, &path)?;

        tracing::debug!(target: "quickjs", module, path = %path, "imported module");
        self.import_cache.insert(module.to_string(), path);
        Ok(ModuleHandle {
            name: module.to_string(),
        })
    }

    fn run(&self, source: &str) -> Result<(), GuestError> {
        self.engine.eval(source, "<run>")
    }

    fn call(
        &self,
        module: &ModuleHandle,
        function: &str,
        args: &[GuestArg],
    ) -> Result<JsonValue, GuestError> {
        let mut rendered = Vec::with_capacity(args.len());
        for arg in args {
            rendered.push(match arg {
                GuestArg::Str(text) => serde_json::to_string(text)?,
                GuestArg::Json(value) => serde_json::to_string(value)?,
                GuestArg::Module(handle) => {
                    format!("{MODULE_TABLE}.get({})", serde_json::to_string(&handle.name)?)
                }
            });
        }

        let script = format!(
            "(() => {{\n\
             const target = {MODULE_TABLE}.get({module});\n\
             if (target === undefined) {{ throw new Error('module ' + {module} + ' is not loaded'); }}\n\
             const result = target[{function}]({args});\n\
             return JSON.stringify(result === undefined ? null : result);\n\
             }})()",
            module = serde_json::to_string(&module.name)?,
            function = serde_json::to_string(function)?,
            args = rendered.join(", "),
        );
        let filename = format!("{}.{function}", module.name);
        let output: String = self.engine.eval_with(&script, &filename)?;
        Ok(serde_json::from_str(&output)?)
    }
}

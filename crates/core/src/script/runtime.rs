use mlua::{Function, Lua, LuaOptions, MultiValue, StdLib, Table, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{ScriptError, ScriptResolver};

/// A sandboxed Lua interpreter bound to a script resolver.
///
/// One runtime is created per conversion job and discarded afterwards, so
/// script state never leaks between jobs. The sandbox excludes the `io`
/// and `os` libraries; scripts interact with the filesystem only through
/// `require`, which is routed through the [`ScriptResolver`].
pub struct ScriptRuntime {
    lua: Lua,
    resolver: Arc<ScriptResolver>,
}

impl ScriptRuntime {
    /// Creates a runtime whose `require` searches `dirs` after the
    /// bundled modules.
    pub fn new(dirs: Vec<PathBuf>) -> Result<Self, ScriptError> {
        let lua = Lua::new_with(
            StdLib::COROUTINE
                | StdLib::TABLE
                | StdLib::STRING
                | StdLib::UTF8
                | StdLib::MATH
                | StdLib::PACKAGE,
            LuaOptions::default(),
        )?;

        let resolver = Arc::new(ScriptResolver::new(dirs));
        install_searcher(&lua, resolver.clone())?;

        Ok(Self { lua, resolver })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn resolver(&self) -> &ScriptResolver {
        &self.resolver
    }

    /// Evaluates a script resolved by name. `Ok(None)` means the resolver
    /// found nothing under that name.
    pub fn eval_named(&self, name: &str) -> Result<Option<Value>, ScriptError> {
        let Some(source) = self.resolver.resolve(name)? else {
            return Ok(None);
        };
        let func = self
            .lua
            .load(&*source)
            .set_name(format!("@{name}"))
            .into_function()?;
        self.call_traced(&func, Vec::new()).map(Some)
    }

    /// Evaluates a script file at an explicit path, bypassing the resolver.
    pub fn eval_file(&self, path: &Path) -> Result<Value, ScriptError> {
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let func = self
            .lua
            .load(&source)
            .set_name(format!("@{name}"))
            .into_function()?;
        self.call_traced(&func, Vec::new())
    }

    /// Compiles a column type expression into a `function(text) -> value`.
    ///
    /// The expression is evaluated with the bundled `types` module as its
    /// environment, so `string`, `int`, `list(int)` and friends resolve
    /// directly.
    pub fn compile_type(&self, src: &str) -> Result<Function, ScriptError> {
        let chunk = format!("local _ENV = require('types')\nreturn ({src})");
        let value: Value = self
            .lua
            .load(&chunk)
            .set_name(format!("=type:{src}"))
            .eval()?;
        match value {
            Value::Function(f) => Ok(f),
            other => Err(ScriptError::new(format!(
                "type script must produce a function, got {}",
                other.type_name()
            ))),
        }
    }

    /// Compiles a validation or post-process body into a
    /// `function(val, row)`.
    pub fn compile_cell_callback(
        &self,
        name: &str,
        body: &str,
    ) -> Result<Function, ScriptError> {
        let chunk = format!("return function(val, row)\n{body}\nend");
        let func: Function = self
            .lua
            .load(&chunk)
            .set_name(format!("={name}"))
            .eval()?;
        Ok(func)
    }

    /// Compiles an overall validation body into a `function(rows)`.
    pub fn compile_rows_callback(
        &self,
        name: &str,
        body: &str,
    ) -> Result<Function, ScriptError> {
        let chunk = format!("return function(rows)\n{body}\nend");
        let func: Function = self
            .lua
            .load(&chunk)
            .set_name(format!("={name}"))
            .eval()?;
        Ok(func)
    }

    /// Calls a function in protected mode, splitting the traceback the
    /// interpreter appends to runtime errors off the message.
    pub fn call_traced(&self, f: &Function, args: Vec<Value>) -> Result<Value, ScriptError> {
        f.call::<Value>(MultiValue::from_iter(args))
            .map_err(traced_error)
    }

    pub fn set_global(&self, name: &str, value: Value) -> Result<(), ScriptError> {
        self.lua.globals().set(name, value)?;
        Ok(())
    }

    /// Replaces `print` with one that appends to the returned buffer.
    pub fn capture_print(&self) -> Result<Arc<Mutex<String>>, ScriptError> {
        let buffer = Arc::new(Mutex::new(String::new()));
        let sink = buffer.clone();
        let print = self.lua.create_function(move |lua, args: MultiValue| {
            let tostring: Function = lua.globals().get("tostring")?;
            let mut line = String::new();
            for (i, value) in args.into_iter().enumerate() {
                if i > 0 {
                    line.push('\t');
                }
                let text: String = tostring.call(value)?;
                line.push_str(&text);
            }
            line.push('\n');
            if let Ok(mut buf) = sink.lock() {
                buf.push_str(&line);
            }
            Ok(())
        })?;
        self.lua.globals().set("print", print)?;
        Ok(buffer)
    }
}

/// Result of a validation script: a string is a specific failure message,
/// nil or false a generic failure, anything else a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Pass,
    Fail(Option<String>),
}

impl ValidationOutcome {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Fail(Some(s.to_string_lossy().to_string())),
            Value::Nil | Value::Boolean(false) => Self::Fail(None),
            _ => Self::Pass,
        }
    }
}

/// Separates an interpreter error into the raised message and the
/// `stack traceback:` block protected calls attach to it.
fn traced_error(e: mlua::Error) -> ScriptError {
    let text = e.to_string();
    let text = text.strip_prefix("runtime error: ").unwrap_or(&text);
    match text.split_once("\nstack traceback:") {
        Some((message, rest)) => ScriptError {
            message: message.trim_end().to_string(),
            traceback: Some(format!("stack traceback:{rest}")),
        },
        None => ScriptError::new(text),
    }
}

fn install_searcher(lua: &Lua, resolver: Arc<ScriptResolver>) -> Result<(), ScriptError> {
    let searcher = lua.create_function(move |lua, name: String| {
        match resolver.resolve(&name) {
            Ok(Some(source)) => {
                let loader = lua
                    .load(&*source)
                    .set_name(format!("@{name}"))
                    .into_function()?;
                Ok(Value::Function(loader))
            }
            Ok(None) => Ok(Value::String(
                lua.create_string(format!("\n\tno script '{name}'"))?,
            )),
            Err(e) => Ok(Value::String(
                lua.create_string(format!("\n\tcould not read '{name}': {e}"))?,
            )),
        }
    })?;

    let package: Table = lua.globals().get("package")?;
    let searchers: Table = package.get("searchers")?;
    searchers.raw_insert(2, searcher)?;
    Ok(())
}

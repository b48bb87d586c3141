//! Rhai script modules
//!
//! A module is a single script. The function named after the implementation type
//! is its constructor: it takes no parameters and returns the instance state.
//! Every other public function is a method and sees that state as `this`.
//!
//! ```rhai
//! fn Counter() { #{ total: 0 } }
//!
//! fn add(n) { this.total += n; this.total }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use hotswap_kernel::{
    DispatchError, DispatchResult, LoadError, LoadResult, ModuleLoader, ServiceImplementation,
};
use parking_lot::Mutex;
use rhai::{AST, CallFnOptions, Dynamic, Engine, EvalAltResult, FnAccess, Map, Scope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Resource limits applied to every script engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_string_size: usize,
    pub allow_loops: bool,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_array_size: 10_000,
            max_map_size: 10_000,
            max_string_size: 1_000_000,
            allow_loops: true,
        }
    }
}

/// Loads Rhai scripts as service implementations
pub struct RhaiModuleLoader {
    engine: Arc<Engine>,
    limits: ScriptLimits,
}

impl RhaiModuleLoader {
    pub fn new() -> Self {
        Self::with_limits(ScriptLimits::default())
    }

    pub fn with_limits(limits: ScriptLimits) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);
        engine.set_max_string_size(limits.max_string_size);
        if !limits.allow_loops {
            engine.set_allow_looping(false);
        }

        engine.on_print(|text| info!(target: "hotswap::script", "{}", text));
        engine.on_debug(|text, source, pos| {
            debug!(target: "hotswap::script", "{} @ {:?} {}", text, source, pos)
        });

        Self {
            engine: Arc::new(engine),
            limits,
        }
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    fn compile(&self, module_path: &Path, source: &str) -> LoadResult<AST> {
        self.engine.compile(source).map_err(|e| LoadError::Syntax {
            path: module_path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

impl Default for RhaiModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for RhaiModuleLoader {
    fn name(&self) -> &str {
        "rhai"
    }

    fn check_syntax(&self, _path: &Path, source: &[u8]) -> Result<(), String> {
        let text = std::str::from_utf8(source).map_err(|e| format!("not valid UTF-8: {}", e))?;
        self.engine.compile(text).map(|_| ()).map_err(|e| e.to_string())
    }

    fn load(
        &self,
        module_path: &Path,
        type_name: &str,
    ) -> LoadResult<Arc<dyn ServiceImplementation>> {
        let source = std::fs::read_to_string(module_path).map_err(|source| LoadError::Io {
            path: module_path.to_path_buf(),
            source,
        })?;
        let ast = self.compile(module_path, &source)?;

        let mut constructor_arities = Vec::new();
        let mut methods: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for f in ast.iter_functions() {
            if f.name == type_name {
                constructor_arities.push(f.params.len());
            } else if f.access != FnAccess::Private {
                methods
                    .entry(f.name.to_string())
                    .or_default()
                    .push(f.params.len());
            }
        }

        if constructor_arities.is_empty() {
            return Err(LoadError::MissingType {
                path: module_path.to_path_buf(),
                type_name: type_name.to_string(),
            });
        }
        if !constructor_arities.contains(&0) {
            return Err(LoadError::Construction {
                type_name: type_name.to_string(),
                message: "constructor must take no parameters".to_string(),
            });
        }

        // Top-level statements run once, together with the constructor.
        let mut scope = Scope::new();
        let state = self
            .engine
            .call_fn_with_options::<Dynamic>(
                CallFnOptions::new().eval_ast(true),
                &mut scope,
                &ast,
                type_name,
                (),
            )
            .map_err(|e| LoadError::Construction {
                type_name: type_name.to_string(),
                message: script_error_message(e),
            })?;

        debug!(
            "Constructed {} from {:?} with methods {:?}",
            type_name,
            module_path,
            methods.keys().collect::<Vec<_>>()
        );

        Ok(Arc::new(RhaiService {
            type_name: type_name.to_string(),
            engine: self.engine.clone(),
            ast: Arc::new(ast),
            methods,
            state: Mutex::new(state),
        }))
    }
}

/// An instance built from a script module
pub struct RhaiService {
    type_name: String,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    /// Method name to accepted parameter counts
    methods: BTreeMap<String, Vec<usize>>,
    state: Mutex<Dynamic>,
}

impl RhaiService {
    /// Current instance state as JSON
    pub fn state(&self) -> Value {
        dynamic_to_json(&self.state.lock())
    }
}

impl ServiceImplementation for RhaiService {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn methods(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn call(&self, method: &str, args: &[Value]) -> DispatchResult<Value> {
        let arities = self
            .methods
            .get(method)
            .ok_or_else(|| DispatchError::NoSuchMethod {
                type_name: self.type_name.clone(),
                method: method.to_string(),
            })?;
        if !arities.contains(&args.len()) {
            return Err(DispatchError::InvalidArguments(format!(
                "{}.{} expects {:?} argument(s), got {}",
                self.type_name,
                method,
                arities,
                args.len()
            )));
        }

        let dynamic_args: Vec<Dynamic> = args.iter().map(json_to_dynamic).collect();
        let mut scope = Scope::new();
        // Calls on one instance are serialized so `this` is never aliased.
        let mut state = self.state.lock();
        let result = self
            .engine
            .call_fn_with_options::<Dynamic>(
                CallFnOptions::new().eval_ast(false).bind_this_ptr(&mut *state),
                &mut scope,
                &self.ast,
                method,
                dynamic_args,
            )
            .map_err(|e| DispatchError::Execution(script_error_message(e)))?;

        Ok(dynamic_to_json(&result))
    }
}

impl std::fmt::Debug for RhaiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RhaiService")
            .field("type_name", &self.type_name)
            .field("methods", &self.methods)
            .finish()
    }
}

/// Message of the innermost error; a thrown value is reported as itself.
fn script_error_message(err: Box<EvalAltResult>) -> String {
    match *err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => script_error_message(inner),
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        other => other.to_string(),
    }
}

/// Convert a JSON value to a Rhai value
pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.clone().into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

/// Convert a Rhai value to JSON; anything without a JSON shape becomes its display string
pub fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Some(b) = value.clone().try_cast::<bool>() {
        Value::Bool(b)
    } else if let Some(i) = value.clone().try_cast::<i64>() {
        serde_json::json!(i)
    } else if let Some(f) = value.clone().try_cast::<f64>() {
        serde_json::json!(f)
    } else if let Some(c) = value.clone().try_cast::<char>() {
        Value::String(c.to_string())
    } else if value.is_string() {
        Value::String(value.to_string())
    } else if value.is_array() {
        let arr = value.clone().cast::<rhai::Array>();
        Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if value.is_map() {
        let map = value.clone().cast::<Map>();
        let mut obj = serde_json::Map::new();
        for (k, v) in map.iter() {
            obj.insert(k.to_string(), dynamic_to_json(v));
        }
        Value::Object(obj)
    } else {
        Value::String(value.to_string())
    }
}

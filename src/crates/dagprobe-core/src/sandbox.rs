//! Locked-down execution of a single node function.
//!
//! Each call builds a fresh engine carrying only the allowlisted builtins and
//! safe modules, evaluates the node's function definition, calls it with the
//! resolved inputs matched against its declared parameters, and discards the
//! namespace. Wall time is measured around the call only.

use crate::builtins;
use crate::graph::DagNode;
use crate::node_result::NodeExecutionResult;
use crate::safety;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Resource limits for one node call.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock deadline per node call.
    pub deadline: Duration,
    /// Interpreter operation ceiling (backstop for the deadline).
    pub max_operations: u64,
    /// Maximum function call nesting.
    pub max_call_levels: usize,
    /// Maximum array length a node may build.
    pub max_array_size: usize,
    /// Maximum object-map size a node may build.
    pub max_map_size: usize,
    /// Maximum string length a node may build.
    pub max_string_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(10),
            max_operations: 5_000_000,
            max_call_levels: 32,
            max_array_size: 1_000_000,
            max_map_size: 100_000,
            max_string_size: 1_000_000,
        }
    }
}

impl SandboxConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }
}

/// Sandbox for executing LLM-authored node functions.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Execute one node against its resolved inputs.
    ///
    /// Never returns an `Err`: every failure mode (safety rejection, missing
    /// argument, raised exception, deadline) is reported inside the
    /// [`NodeExecutionResult`].
    pub fn execute_node(
        &self,
        node: &DagNode,
        resolved_inputs: &BTreeMap<String, Value>,
    ) -> NodeExecutionResult {
        // The scan runs again here: the sandbox does not trust its callers.
        let scan = safety::scan_node_code(&node.code, &node.function_name);
        if !scan.is_clean() {
            let message = scan
                .parse_errors
                .iter()
                .chain(scan.violations.iter())
                .cloned()
                .collect::<Vec<_>>()
                .join("; ");
            return NodeExecutionResult::failure(&node.node_id, message, 0.0);
        }

        let engine = self.build_engine();
        let ast = match engine.compile(&node.code) {
            Ok(ast) => ast,
            Err(err) => {
                return NodeExecutionResult::failure(
                    &node.node_id,
                    format!("code does not parse: {err}"),
                    0.0,
                )
            }
        };

        // Positional match of resolved inputs against declared parameters.
        let mut args: Vec<Dynamic> = Vec::with_capacity(scan.params.len());
        for param in &scan.params {
            let Some(value) = resolved_inputs.get(param) else {
                return NodeExecutionResult::failure(
                    &node.node_id,
                    format!("TypeError: missing argument for parameter {param}"),
                    0.0,
                );
            };
            match rhai::serde::to_dynamic(value) {
                Ok(d) => args.push(d),
                Err(err) => {
                    return NodeExecutionResult::failure(
                        &node.node_id,
                        format!("TypeError: cannot convert input {param}: {err}"),
                        0.0,
                    )
                }
            }
        }
        if let Some(extra) = resolved_inputs
            .keys()
            .find(|key| !scan.params.iter().any(|p| p == *key))
        {
            return NodeExecutionResult::failure(
                &node.node_id,
                format!("TypeError: unexpected argument {extra}"),
                0.0,
            );
        }

        let mut scope = Scope::new();
        let options = CallFnOptions::new().eval_ast(false);
        let started = Instant::now();
        let outcome = engine.call_fn_with_options::<Dynamic>(
            options,
            &mut scope,
            &ast,
            &node.function_name,
            DynArgs(args),
        );
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(output) => match rhai::serde::from_dynamic::<Value>(&output) {
                Ok(value) => {
                    debug!(
                        node_id = %node.node_id,
                        elapsed_ms,
                        "node executed"
                    );
                    NodeExecutionResult::success(&node.node_id, value, elapsed_ms)
                }
                Err(err) => NodeExecutionResult::failure(
                    &node.node_id,
                    format!("TypeError: output not serializable: {err}"),
                    elapsed_ms,
                ),
            },
            Err(err) => {
                let message = format_eval_error(&err);
                debug!(node_id = %node.node_id, error = %message, "node raised");
                NodeExecutionResult::failure(&node.node_id, message, elapsed_ms)
            }
        }
    }

    /// Build a fresh locked engine. The returned engine (and everything
    /// evaluated on it) is dropped after the call.
    fn build_engine(&self) -> Engine {
        use rhai::packages::{
            ArithmeticPackage, BasicArrayPackage, BasicIteratorPackage, BasicMapPackage,
            BasicMathPackage, BasicStringPackage, CorePackage, LogicPackage, MoreStringPackage,
            Package,
        };

        let mut engine = Engine::new_raw();
        engine.register_global_module(CorePackage::new().as_shared_module());
        engine.register_global_module(ArithmeticPackage::new().as_shared_module());
        engine.register_global_module(LogicPackage::new().as_shared_module());
        engine.register_global_module(BasicIteratorPackage::new().as_shared_module());
        engine.register_global_module(BasicArrayPackage::new().as_shared_module());
        engine.register_global_module(BasicMapPackage::new().as_shared_module());
        engine.register_global_module(BasicMathPackage::new().as_shared_module());
        engine.register_global_module(BasicStringPackage::new().as_shared_module());
        engine.register_global_module(MoreStringPackage::new().as_shared_module());

        builtins::register_builtins(&mut engine);
        builtins::register_modules(&mut engine);

        engine.disable_symbol("eval");
        engine.set_max_operations(self.config.max_operations);
        engine.set_max_call_levels(self.config.max_call_levels);
        engine.set_max_array_size(self.config.max_array_size);
        engine.set_max_map_size(self.config.max_map_size);
        engine.set_max_string_size(self.config.max_string_size);
        engine.set_max_expr_depths(64, 64);

        // Script functions are pure and cannot see the caller's scope, so the
        // literal constants resolve through the variable hook instead.
        engine.on_var(|name, _, _| {
            Ok(match name {
                "True" => Some(Dynamic::TRUE),
                "False" => Some(Dynamic::FALSE),
                "None" => Some(Dynamic::UNIT),
                _ => None,
            })
        });

        let deadline = Instant::now() + self.config.deadline;
        engine.on_progress(move |_| {
            if Instant::now() > deadline {
                Some(Dynamic::from("node deadline exceeded"))
            } else {
                None
            }
        });

        engine
    }
}

/// Argument pack for calling a script function with a runtime-sized list.
struct DynArgs(Vec<Dynamic>);

impl rhai::FuncArgs for DynArgs {
    fn parse<ARGS: Extend<Dynamic>>(self, args: &mut ARGS) {
        args.extend(self.0);
    }
}

/// Render an interpreter error in `<exception class>: <message>` shape.
fn format_eval_error(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => format_eval_error(inner),
        EvalAltResult::ErrorRuntime(token, _) => {
            let text = token.to_string();
            // `throw ValueError("...")` already carries its class prefix.
            if text.splitn(2, ": ").count() == 2 {
                text
            } else {
                format!("Exception: {text}")
            }
        }
        EvalAltResult::ErrorTerminated(_, _) => "Timeout: node deadline exceeded".to_string(),
        EvalAltResult::ErrorTooManyOperations(_) => {
            "Timeout: operation limit exceeded".to_string()
        }
        EvalAltResult::ErrorArithmetic(msg, _) => {
            if msg.to_lowercase().contains("zero") {
                format!("ZeroDivisionError: {msg}")
            } else {
                format!("ArithmeticError: {msg}")
            }
        }
        EvalAltResult::ErrorFunctionNotFound(name, _) => {
            format!("NameError: function not found: {name}")
        }
        EvalAltResult::ErrorVariableNotFound(name, _) => {
            format!("NameError: variable not found: {name}")
        }
        EvalAltResult::ErrorPropertyNotFound(name, _) => format!("AttributeError: {name}"),
        EvalAltResult::ErrorIndexNotFound(index, _) => format!("KeyError: {index}"),
        EvalAltResult::ErrorArrayBounds(len, index, _) => {
            format!("IndexError: index {index} out of range for length {len}")
        }
        EvalAltResult::ErrorStringBounds(len, index, _) => {
            format!("IndexError: string index {index} out of range for length {len}")
        }
        other => format!("Exception: {other}"),
    }
}

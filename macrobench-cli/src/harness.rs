//! Entry points over the orchestrator
//!
//! [`Harness`] accepts a benchmark either as a bare macro or as a hook map,
//! merges configured defaults under the caller's options and returns one
//! record per mode. [`Harness::apply`] is the same surface driven from a
//! stack: options map on top, benchmark below it.

use crate::error::{BenchError, SerializationError};
use crate::options::{RunSpec, ValidationError};
use crate::orchestrator::Orchestrator;
use macrobench_core::{BenchConfiguration, Macro, StackMachine, Value};
use macrobench_report::{BENCH_CONFIGURATION_KEY, RunResult};

/// Convert parsed JSON into a script value. Integral numbers become longs,
/// other numbers doubles.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Long(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Value::from(k.as_str()), json_to_value(v)))
                .collect(),
        ),
    }
}

/// A result record as a script map. The benchmark configuration is attached
/// as the submitted macros rather than their snapshot text.
pub fn result_to_value(result: &RunResult) -> Result<Value, SerializationError> {
    let json = serde_json::to_value(result)?;
    let Value::Map(entries) = json_to_value(&json) else {
        return Ok(Value::Null);
    };
    let entries = entries
        .into_iter()
        .map(|(k, v)| {
            if k.as_str() == Some(BENCH_CONFIGURATION_KEY) {
                (k, result.bench_configuration.to_value())
            } else {
                (k, v)
            }
        })
        .collect();
    Ok(Value::Map(entries))
}

/// Benchmark front end.
pub struct Harness {
    orchestrator: Orchestrator,
    defaults: Vec<(Value, Value)>,
}

impl Harness {
    /// Harness with no configured defaults.
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            defaults: Vec::new(),
        }
    }

    /// Option entries applied before every caller's options.
    pub fn with_defaults(mut self, defaults: Vec<(Value, Value)>) -> Self {
        self.defaults = defaults;
        self
    }

    /// The orchestrator runs are delegated to.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Validate `options` on top of the defaults.
    pub fn plan(&self, options: &Value) -> Result<RunSpec, ValidationError> {
        let entries = options
            .as_map()
            .ok_or_else(|| ValidationError::InvalidOptionType {
                key: "options".to_string(),
                expected: "a map",
                got: options.type_name(),
            })?;
        RunSpec::from_entries(
            self.defaults
                .iter()
                .chain(entries.iter())
                .map(|(k, v)| (k, v)),
        )
    }

    /// Benchmark a single macro with no hooks.
    pub fn run_macro(&self, code: Macro, options: &Value) -> Result<Vec<RunResult>, BenchError> {
        self.run(&BenchConfiguration::from_macro(code), options)
    }

    /// Benchmark a hook map (`macro` plus optional hooks).
    pub fn run_hooks(&self, hooks: &Value, options: &Value) -> Result<Vec<RunResult>, BenchError> {
        let bench = BenchConfiguration::from_value(hooks).map_err(ValidationError::from)?;
        self.run(&bench, options)
    }

    /// Options are validated before anything touches the filesystem.
    pub fn run(
        &self,
        bench: &BenchConfiguration,
        options: &Value,
    ) -> Result<Vec<RunResult>, BenchError> {
        let spec = self.plan(options)?;
        self.orchestrator.run(&spec, bench)
    }

    /// Pop the options map, then a macro or hook map; push the list of
    /// result records.
    pub fn apply(&self, stack: &mut dyn StackMachine) -> Result<(), BenchError> {
        let options = stack.pop()?;
        let spec = self.plan(&options)?;
        let input = stack.pop()?;
        let bench = BenchConfiguration::from_value(&input).map_err(ValidationError::from)?;
        let results = self.orchestrator.run(&spec, &bench)?;
        let values = results
            .iter()
            .map(result_to_value)
            .collect::<Result<Vec<_>, _>>()?;
        stack.push(Value::List(values));
        Ok(())
    }
}

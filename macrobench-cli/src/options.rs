//! Option translation
//!
//! A free-form options map (the shape a script or a JSON document provides) is
//! checked against a closed set of keys and turned into an immutable [`RunSpec`].
//! Every rejection happens here, before any file is written or process launched.

use macrobench_core::{BenchConfigError, HeapLimits, ProfilerKind, Value, parse_heap_size};
use macrobench_ipc::{BenchMode, TrialPlan, WarmupMode};
use macrobench_report::TimeUnit;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Every key an options map may contain.
pub const OPTION_KEYS: [&str; 17] = [
    "forks",
    "measurementBatchSize",
    "measurementIterations",
    "measurementTime",
    "mode",
    "operationsPerInvocation",
    "profilers",
    "shouldDoGC",
    "syncIterations",
    "threads",
    "timeUnit",
    "warmupBatchSize",
    "warmupForks",
    "warmupIterations",
    "warmupMode",
    "warmupTime",
    "mem",
];

/// Why an options map or a benchmark definition was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Key outside the closed option set
    #[error("unknown option {key}, expected one of [{}]", OPTION_KEYS.join(", "))]
    UnknownOption {
        /// Offending key
        key: String,
    },

    /// Value of the wrong type
    #[error("option {key} expects {expected}, got {got}")]
    InvalidOptionType {
        /// Option key
        key: String,
        /// Accepted shape
        expected: &'static str,
        /// Type found
        got: &'static str,
    },

    /// Integer outside the 32-bit range
    #[error("option {key} value {value} does not fit a 32-bit integer")]
    OptionOutOfRange {
        /// Option key
        key: String,
        /// Value given
        value: i64,
    },

    /// Recognized but refused
    #[error("option {key} is not supported: {reason}")]
    UnsupportedOption {
        /// Option key
        key: String,
        /// Why it is refused
        reason: &'static str,
    },

    /// Right type, unusable value
    #[error("option {key} has invalid value {value}: {reason}")]
    InvalidOptionValue {
        /// Option key
        key: String,
        /// Value given, as text
        value: String,
        /// What was wrong with it
        reason: String,
    },

    /// Benchmark input that is not a macro or hook map
    #[error("invalid benchmark definition: {0}")]
    InvalidBenchConfiguration(#[from] BenchConfigError),
}

/// Requested measurement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Operations per unit of time
    Throughput,
    /// Time per operation
    AverageTime,
    /// Sampled invocation times
    SampleTime,
    /// One batch per iteration
    SingleShotTime,
    /// Every concrete mode, one result each
    All,
}

impl Mode {
    /// Accepts full names and short labels (`thrpt`, `avgt`, `sample`, `ss`, `all`).
    pub fn parse(text: &str) -> Option<Mode> {
        if text == "All" || text == "all" {
            return Some(Mode::All);
        }
        BenchMode::ALL
            .into_iter()
            .find(|mode| mode.name() == text || mode.label() == text)
            .map(Mode::from)
    }

    /// The modes a worker actually runs, in reporting order.
    pub fn concrete_modes(self) -> Vec<BenchMode> {
        match self {
            Mode::Throughput => vec![BenchMode::Throughput],
            Mode::AverageTime => vec![BenchMode::AverageTime],
            Mode::SampleTime => vec![BenchMode::SampleTime],
            Mode::SingleShotTime => vec![BenchMode::SingleShotTime],
            Mode::All => BenchMode::ALL.to_vec(),
        }
    }
}

impl From<BenchMode> for Mode {
    fn from(mode: BenchMode) -> Self {
        match mode {
            BenchMode::Throughput => Mode::Throughput,
            BenchMode::AverageTime => Mode::AverageTime,
            BenchMode::SampleTime => Mode::SampleTime,
            BenchMode::SingleShotTime => Mode::SingleShotTime,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::All => f.write_str("All"),
            Mode::Throughput => f.write_str(BenchMode::Throughput.name()),
            Mode::AverageTime => f.write_str(BenchMode::AverageTime.name()),
            Mode::SampleTime => f.write_str(BenchMode::SampleTime.name()),
            Mode::SingleShotTime => f.write_str(BenchMode::SingleShotTime.name()),
        }
    }
}

fn parse_warmup_mode(text: &str) -> Option<WarmupMode> {
    match text {
        "INDI" | "Individual" => Some(WarmupMode::Individual),
        "BULK" | "Bulk" => Some(WarmupMode::Bulk),
        "BULK_INDI" | "BulkIndividual" => Some(WarmupMode::BulkIndividual),
        _ => None,
    }
}

fn warmup_mode_name(mode: WarmupMode) -> &'static str {
    match mode {
        WarmupMode::Individual => "INDI",
        WarmupMode::Bulk => "BULK",
        WarmupMode::BulkIndividual => "BULK_INDI",
    }
}

/// Parse a compact duration: a non-negative number followed by `ns`, `us`,
/// `ms`, `s`, `m`/`min`, `h`/`hr` or `d`/`day`. A bare number is seconds.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }
    let split = text
        .find(|c: char| c.is_alphabetic() || c == 'µ')
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration number {number:?}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("duration must be non-negative, got {number}"));
    }
    let nanos_per_unit: f64 = match unit.trim() {
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        "" | "s" => 1e9,
        "m" | "min" => 60e9,
        "h" | "hr" => 3_600e9,
        "d" | "day" => 86_400e9,
        other => return Err(format!("unknown duration unit {other:?}")),
    };
    Ok(Duration::from_nanos((value * nanos_per_unit) as u64))
}

/// Compact text for a duration, in the largest unit that divides it evenly.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    const UNITS: [(u128, &str); 7] = [
        (86_400_000_000_000, "d"),
        (3_600_000_000_000, "h"),
        (60_000_000_000, "m"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "us"),
        (1, "ns"),
    ];
    UNITS
        .iter()
        .find(|(size, _)| nanos % size == 0)
        .map(|(size, unit)| format!("{}{}", nanos / size, unit))
        .unwrap_or_else(|| format!("{nanos}ns"))
}

/// Validated, immutable description of one benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    forks: u32,
    warmup_forks: u32,
    measurement_iterations: u32,
    warmup_iterations: u32,
    measurement_batch_size: u32,
    warmup_batch_size: u32,
    operations_per_invocation: u32,
    measurement_time: Duration,
    warmup_time: Duration,
    mode: Mode,
    time_unit: TimeUnit,
    warmup_mode: WarmupMode,
    profilers: Vec<String>,
    should_do_gc: bool,
    sync_iterations: bool,
    memory: Option<String>,
}

impl Default for RunSpec {
    fn default() -> Self {
        Self {
            forks: 5,
            warmup_forks: 0,
            measurement_iterations: 5,
            warmup_iterations: 5,
            measurement_batch_size: 1,
            warmup_batch_size: 1,
            operations_per_invocation: 1,
            measurement_time: Duration::from_secs(10),
            warmup_time: Duration::from_secs(10),
            mode: Mode::Throughput,
            time_unit: TimeUnit::Seconds,
            warmup_mode: WarmupMode::Individual,
            profilers: Vec::new(),
            should_do_gc: false,
            sync_iterations: true,
            memory: None,
        }
    }
}

fn expect_long(key: &str, value: &Value) -> Result<i64, ValidationError> {
    match value {
        Value::Long(n) => Ok(*n),
        other => Err(type_error(key, "an integer", other)),
    }
}

fn expect_str<'v>(key: &str, value: &'v Value) -> Result<&'v str, ValidationError> {
    value.as_str().ok_or_else(|| type_error(key, "a string", value))
}

fn expect_bool(key: &str, value: &Value) -> Result<bool, ValidationError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(type_error(key, "a boolean", other)),
    }
}

fn type_error(key: &str, expected: &'static str, got: &Value) -> ValidationError {
    ValidationError::InvalidOptionType {
        key: key.to_string(),
        expected,
        got: got.type_name(),
    }
}

fn invalid(key: &str, value: impl fmt::Display, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidOptionValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Integer option that must fit i32 and be at least `min`.
fn bounded(key: &str, value: &Value, min: u32) -> Result<u32, ValidationError> {
    let raw = expect_long(key, value)?;
    let fitted = i32::try_from(raw).map_err(|_| ValidationError::OptionOutOfRange {
        key: key.to_string(),
        value: raw,
    })?;
    if fitted < min as i32 {
        return Err(invalid(key, fitted, format!("must be at least {min}")));
    }
    Ok(fitted as u32)
}

fn duration_option(key: &str, value: &Value) -> Result<Duration, ValidationError> {
    let text = expect_str(key, value)?;
    parse_duration(text).map_err(|reason| invalid(key, text, reason))
}

impl RunSpec {
    /// Translate an options map (a `Value::Map`) into a run specification.
    pub fn translate(options: &Value) -> Result<Self, ValidationError> {
        let entries = options
            .as_map()
            .ok_or_else(|| type_error("options", "a map", options))?;
        Self::from_entries(entries.iter().map(|(k, v)| (k, v)))
    }

    /// Translate key/value pairs, applied in order; a later key overrides an
    /// earlier one.
    pub fn from_entries<'a, I>(entries: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (&'a Value, &'a Value)>,
    {
        let mut spec = RunSpec::default();
        for (key, value) in entries {
            let Some(key) = key.as_str() else {
                return Err(ValidationError::UnknownOption {
                    key: key.to_string(),
                });
            };
            spec.apply(key, value)?;
        }
        Ok(spec)
    }

    fn apply(&mut self, key: &str, value: &Value) -> Result<(), ValidationError> {
        match key {
            "forks" => self.forks = bounded(key, value, 0)?,
            "warmupForks" => self.warmup_forks = bounded(key, value, 0)?,
            "measurementIterations" => self.measurement_iterations = bounded(key, value, 1)?,
            "warmupIterations" => self.warmup_iterations = bounded(key, value, 0)?,
            "measurementBatchSize" => self.measurement_batch_size = bounded(key, value, 1)?,
            "warmupBatchSize" => self.warmup_batch_size = bounded(key, value, 1)?,
            "operationsPerInvocation" => self.operations_per_invocation = bounded(key, value, 1)?,
            "measurementTime" => self.measurement_time = duration_option(key, value)?,
            "warmupTime" => self.warmup_time = duration_option(key, value)?,
            "mode" => {
                let text = expect_str(key, value)?;
                self.mode = Mode::parse(text).ok_or_else(|| invalid(key, text, "unknown mode"))?;
            }
            "timeUnit" => {
                let text = expect_str(key, value)?;
                self.time_unit = text.parse().map_err(|reason: String| invalid(key, text, reason))?;
            }
            "warmupMode" => {
                let text = expect_str(key, value)?;
                self.warmup_mode =
                    parse_warmup_mode(text).ok_or_else(|| invalid(key, text, "unknown warmup mode"))?;
            }
            "profilers" => {
                let Value::List(items) = value else {
                    return Err(type_error(key, "a list of strings", value));
                };
                let mut profilers = Vec::with_capacity(items.len());
                for item in items {
                    let name = item
                        .as_str()
                        .ok_or_else(|| type_error(key, "a list of strings", item))?;
                    if ProfilerKind::from_name(name).is_none() {
                        return Err(invalid(
                            key,
                            name,
                            format!("unknown profiler, known: {}", ProfilerKind::NAMES.join(", ")),
                        ));
                    }
                    profilers.push(name.to_string());
                }
                self.profilers = profilers;
            }
            "shouldDoGC" => self.should_do_gc = expect_bool(key, value)?,
            "syncIterations" => self.sync_iterations = expect_bool(key, value)?,
            "threads" => {
                return Err(ValidationError::UnsupportedOption {
                    key: key.to_string(),
                    reason: "stacks are single-threaded, benchmarks always run with 1 thread",
                });
            }
            "mem" => {
                let text = expect_str(key, value)?;
                parse_heap_size(text).map_err(|e| invalid(key, text, e.to_string()))?;
                self.memory = Some(text.to_string());
            }
            other => {
                return Err(ValidationError::UnknownOption {
                    key: other.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Measurement forks; zero runs in-process.
    pub fn forks(&self) -> u32 {
        self.forks
    }

    /// Forks whose results are discarded.
    pub fn warmup_forks(&self) -> u32 {
        self.warmup_forks
    }

    /// Measured iterations per mode and fork.
    pub fn measurement_iterations(&self) -> u32 {
        self.measurement_iterations
    }

    /// Warmup iterations per mode and fork.
    pub fn warmup_iterations(&self) -> u32 {
        self.warmup_iterations
    }

    /// Invocations per measured batch.
    pub fn measurement_batch_size(&self) -> u32 {
        self.measurement_batch_size
    }

    /// Invocations per warmup batch.
    pub fn warmup_batch_size(&self) -> u32 {
        self.warmup_batch_size
    }

    /// Operations one invocation counts for.
    pub fn operations_per_invocation(&self) -> u32 {
        self.operations_per_invocation
    }

    /// Time budget of a measured iteration.
    pub fn measurement_time(&self) -> Duration {
        self.measurement_time
    }

    /// Time budget of a warmup iteration.
    pub fn warmup_time(&self) -> Duration {
        self.warmup_time
    }

    /// Requested mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Unit scores are reported in.
    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// How warmups interleave with modes.
    pub fn warmup_mode(&self) -> WarmupMode {
        self.warmup_mode
    }

    /// Warmup mode under its option spelling.
    pub fn warmup_mode_name(&self) -> &'static str {
        warmup_mode_name(self.warmup_mode)
    }

    /// Profiler names, validated.
    pub fn profilers(&self) -> &[String] {
        &self.profilers
    }

    /// Reclaim stack capacity between iterations.
    pub fn should_do_gc(&self) -> bool {
        self.should_do_gc
    }

    /// Accepted and reported only.
    pub fn sync_iterations(&self) -> bool {
        self.sync_iterations
    }

    /// Always one: the stack machine is single-threaded.
    pub fn threads(&self) -> u32 {
        1
    }

    /// Heap size requested through `mem`.
    pub fn memory(&self) -> Option<&str> {
        self.memory.as_deref()
    }

    /// Heap limits for worker processes; min and max are both `mem`.
    pub fn heap(&self) -> HeapLimits {
        self.memory.as_deref().map(HeapLimits::fixed).unwrap_or_default()
    }

    /// Extra flags every worker is launched with.
    pub fn launch_flags(&self) -> Vec<String> {
        self.heap().to_args()
    }

    /// What each worker is asked to run.
    pub fn trial_plan(&self) -> TrialPlan {
        TrialPlan {
            modes: self.mode.concrete_modes(),
            warmup_mode: self.warmup_mode,
            warmup_iterations: self.warmup_iterations,
            warmup_time_ns: self.warmup_time.as_nanos() as u64,
            warmup_batch_size: self.warmup_batch_size,
            measurement_iterations: self.measurement_iterations,
            measurement_time_ns: self.measurement_time.as_nanos() as u64,
            measurement_batch_size: self.measurement_batch_size,
            operations_per_invocation: self.operations_per_invocation,
            should_do_gc: self.should_do_gc,
            profilers: self.profilers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::from(k), v))
                .collect(),
        )
    }

    fn translate(entries: Vec<(&str, Value)>) -> Result<RunSpec, ValidationError> {
        RunSpec::translate(&map(entries))
    }

    #[test]
    fn test_defaults() {
        let spec = translate(Vec::new()).unwrap();
        assert_eq!(spec, RunSpec::default());
        assert_eq!(spec.forks(), 5);
        assert_eq!(spec.measurement_time(), Duration::from_secs(10));
        assert_eq!(spec.time_unit(), TimeUnit::Seconds);
        assert_eq!(spec.threads(), 1);
        assert!(spec.launch_flags().is_empty());
    }

    #[test]
    fn test_full_translation() {
        let spec = translate(vec![
            ("forks", Value::Long(1)),
            ("warmupForks", Value::Long(2)),
            ("measurementIterations", Value::Long(3)),
            ("warmupIterations", Value::Long(0)),
            ("measurementTime", Value::from("500ms")),
            ("warmupTime", Value::from("2s")),
            ("mode", Value::from("avgt")),
            ("timeUnit", Value::from("MICROSECONDS")),
            ("warmupMode", Value::from("BULK_INDI")),
            ("profilers", Value::List(vec![Value::from("gc"), Value::from("stack")])),
            ("shouldDoGC", Value::Bool(true)),
            ("syncIterations", Value::Bool(false)),
            ("operationsPerInvocation", Value::Long(10)),
        ])
        .unwrap();
        assert_eq!(spec.forks(), 1);
        assert_eq!(spec.warmup_forks(), 2);
        assert_eq!(spec.measurement_iterations(), 3);
        assert_eq!(spec.warmup_iterations(), 0);
        assert_eq!(spec.measurement_time(), Duration::from_millis(500));
        assert_eq!(spec.mode(), Mode::AverageTime);
        assert_eq!(spec.time_unit(), TimeUnit::Microseconds);
        assert_eq!(spec.warmup_mode(), WarmupMode::BulkIndividual);
        assert_eq!(spec.profilers(), ["gc", "stack"]);
        assert!(spec.should_do_gc());
        assert!(!spec.sync_iterations());

        let plan = spec.trial_plan();
        assert_eq!(plan.modes, vec![BenchMode::AverageTime]);
        assert_eq!(plan.measurement_time_ns, 500_000_000);
        assert_eq!(plan.operations_per_invocation, 10);
    }

    #[test]
    fn test_unknown_key() {
        let err = translate(vec![("iterations", Value::Long(3))]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownOption {
                key: "iterations".into()
            }
        );
    }

    #[test]
    fn test_non_string_key() {
        let options = Value::Map(vec![(Value::Long(1), Value::Long(1))]);
        assert!(matches!(
            RunSpec::translate(&options),
            Err(ValidationError::UnknownOption { .. })
        ));
    }

    #[test]
    fn test_threads_always_rejected() {
        for value in [Value::Long(1), Value::Long(4), Value::from("x")] {
            assert!(matches!(
                translate(vec![("threads", value)]),
                Err(ValidationError::UnsupportedOption { .. })
            ));
        }
    }

    #[test]
    fn test_wrong_types() {
        assert!(matches!(
            translate(vec![("forks", Value::from("1"))]),
            Err(ValidationError::InvalidOptionType { .. })
        ));
        assert!(matches!(
            translate(vec![("forks", Value::Double(1.0))]),
            Err(ValidationError::InvalidOptionType { .. })
        ));
        assert!(matches!(
            translate(vec![("shouldDoGC", Value::Long(1))]),
            Err(ValidationError::InvalidOptionType { .. })
        ));
        assert!(matches!(
            translate(vec![("profilers", Value::from("gc"))]),
            Err(ValidationError::InvalidOptionType { .. })
        ));
    }

    #[test]
    fn test_profiler_list_with_non_string() {
        let err = translate(vec![(
            "profilers",
            Value::List(vec![Value::from("gc"), Value::Long(123)]),
        )])
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidOptionType {
                key: "profilers".into(),
                expected: "a list of strings",
                got: "long",
            }
        );
    }

    #[test]
    fn test_unknown_profiler() {
        assert!(matches!(
            translate(vec![("profilers", Value::List(vec![Value::from("perfasm")]))]),
            Err(ValidationError::InvalidOptionValue { .. })
        ));
    }

    #[test]
    fn test_out_of_range() {
        let err = translate(vec![("forks", Value::Long(i64::from(i32::MAX) + 1))]).unwrap_err();
        assert!(matches!(err, ValidationError::OptionOutOfRange { .. }));
        let err = translate(vec![("forks", Value::Long(-1))]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidOptionValue { .. }));
        let err = translate(vec![("measurementIterations", Value::Long(0))]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidOptionValue { .. }));
    }

    #[test]
    fn test_invalid_values() {
        for (key, text) in [
            ("mode", "fast"),
            ("timeUnit", "seconds"),
            ("warmupMode", "SOMETIMES"),
            ("measurementTime", "ten seconds"),
            ("mem", "lots"),
        ] {
            assert!(
                matches!(
                    translate(vec![(key, Value::from(text))]),
                    Err(ValidationError::InvalidOptionValue { .. })
                ),
                "{key}={text}"
            );
        }
    }

    #[test]
    fn test_mem_becomes_heap_flags() {
        let spec = translate(vec![("mem", Value::from("256m"))]).unwrap();
        assert_eq!(spec.memory(), Some("256m"));
        assert_eq!(spec.launch_flags(), ["--heap-min=256m", "--heap-max=256m"]);
    }

    #[test]
    fn test_mode_all_expands() {
        let spec = translate(vec![("mode", Value::from("All"))]).unwrap();
        assert_eq!(spec.trial_plan().modes, BenchMode::ALL.to_vec());
        assert_eq!(Mode::parse("ss"), Some(Mode::SingleShotTime));
        assert_eq!(Mode::parse("SampleTime"), Some(Mode::SampleTime));
    }

    #[test]
    fn test_later_entry_wins() {
        let a = Value::from("forks");
        let one = Value::Long(1);
        let two = Value::Long(2);
        let spec = RunSpec::from_entries([(&a, &one), (&a, &two)]).unwrap();
        assert_eq!(spec.forks(), 2);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("100us"), Ok(Duration::from_micros(100)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("3"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("1 hr"), Ok(Duration::from_secs(3600)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("5 fortnights").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(10)), "10s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}

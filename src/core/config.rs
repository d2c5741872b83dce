//! Pipeline configuration
//!
//! A [`Config`] is immutable once built: the builder validates everything
//! synchronously (bad paths, zero rotation sizes, unparseable levels) so a
//! misconfigured pipeline fails at startup instead of silently dropping
//! records at runtime. `Config::from_env` is the settings boundary for
//! processes configured through the environment.

use crate::core::dispatch::DispatchQueue;
use crate::core::encoder::{EncodePolicy, Envelope};
use crate::core::error::{LogError, Result};
use crate::core::field::FieldValue;
use crate::core::level::{EscalationPolicy, Level};
use crate::core::record::RecordData;
use crate::core::registry::Registry;
use crate::core::router::{Router, RouterSettings};
use crate::sinks::Sink;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// How a freshly-built config interacts with the registry default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultPolicy {
    /// Stay private; records reach this config only through its own `Logs`.
    NonDefault,
    /// Become the process default unless one is already attached.
    #[default]
    SetIfUnset,
    /// Become the process default, replacing any current one.
    TakeOver,
}

impl std::str::FromStr for DefaultPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "non-default" | "nondefault" => Ok(DefaultPolicy::NonDefault),
            "set-if-unset" | "setifunset" => Ok(DefaultPolicy::SetIfUnset),
            "take-over" | "takeover" => Ok(DefaultPolicy::TakeOver),
            _ => Err(format!("Invalid default policy: '{}'", s)),
        }
    }
}

pub struct Config {
    router: Router,
    queue: Option<Arc<DispatchQueue>>,
    escalation: EscalationPolicy,
    encode_policy: EncodePolicy,
    hostname: String,
    pid: u32,
    seq: Option<AtomicU64>,
    capture_callers: bool,
    registry: Arc<Registry>,
    registered: bool,
    closed: AtomicBool,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a config entirely from `LOGSPOOL_*` environment variables.
    /// Unset variables fall back to the builder defaults; malformed values
    /// are configuration errors.
    pub fn from_env() -> Result<Arc<Config>> {
        Self::builder().apply_env()?.build()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn escalation(&self) -> &EscalationPolicy {
        &self.escalation
    }

    pub(crate) fn enabled(&self, name: &str, level: Level) -> bool {
        !self.closed.load(Ordering::Acquire) && self.router.enabled(name, level)
    }

    /// Final delivery for one finalized record: escalation, enablement,
    /// decorators, field assembly, routing.
    pub(crate) fn deliver(&self, data: RecordData) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let level = data.final_level(&self.escalation);
        if !self.router.enabled(data.name(), level) {
            return;
        }
        let name = data.name().to_string();
        let seq = self
            .seq
            .as_ref()
            .map(|counter| counter.fetch_add(1, Ordering::Relaxed));
        let fields = data.into_fields(level, &self.hostname, self.pid, self.capture_callers, seq);
        let envelope = Arc::new(Envelope::new(
            name.clone(),
            level,
            fields,
            self.encode_policy,
        ));
        self.router.resolve(&name, level).push(&envelope);
    }

    /// Drain the dispatch queue, close every sink, and detach from the
    /// registry if this config was the process default. Idempotent.
    pub fn shutdown(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.registered {
            self.registry.detach(self);
        }
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
        self.router.close();
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        // Arc-based shutdown has normally run; this covers configs that
        // were never shared.
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(queue) = &self.queue {
                queue.shutdown();
            }
            self.router.close();
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("hostname", &self.hostname)
            .field("pid", &self.pid)
            .field("encode_policy", &self.encode_policy)
            .finish()
    }
}

pub struct ConfigBuilder {
    min_level: Level,
    name_levels: HashMap<String, Level>,
    default_sink: Option<Arc<Sink>>,
    default_file: Option<PathBuf>,
    file_routes: HashMap<String, PathBuf>,
    sink_overrides: HashMap<String, Arc<Sink>>,
    severe_file: Option<PathBuf>,
    severe_sink: Option<Arc<Sink>>,
    rotate_bytes: Option<u64>,
    async_mode: bool,
    threads: usize,
    escalation: EscalationPolicy,
    encode_policy: EncodePolicy,
    hostname: Option<String>,
    seq_numbers: bool,
    capture_callers: bool,
    default_policy: DefaultPolicy,
    registry: Option<Arc<Registry>>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            min_level: Level::Info,
            name_levels: HashMap::new(),
            default_sink: None,
            default_file: None,
            file_routes: HashMap::new(),
            sink_overrides: HashMap::new(),
            severe_file: None,
            severe_sink: None,
            rotate_bytes: None,
            async_mode: false,
            threads: 1,
            escalation: EscalationPolicy::default(),
            encode_policy: EncodePolicy::default(),
            hostname: None,
            seq_numbers: false,
            capture_callers: false,
            default_policy: DefaultPolicy::SetIfUnset,
            registry: None,
        }
    }
}

impl ConfigBuilder {
    #[must_use]
    pub fn min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    #[must_use]
    pub fn name_level(mut self, name: impl Into<String>, level: Level) -> Self {
        self.name_levels.insert(name.into(), level);
        self
    }

    #[must_use]
    pub fn default_sink(mut self, sink: Arc<Sink>) -> Self {
        self.default_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn default_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn file_route(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.file_routes.insert(name.into(), path.into());
        self
    }

    #[must_use]
    pub fn sink_override(mut self, name: impl Into<String>, sink: Arc<Sink>) -> Self {
        self.sink_overrides.insert(name.into(), sink);
        self
    }

    #[must_use]
    pub fn severe_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.severe_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn severe_sink(mut self, sink: Arc<Sink>) -> Self {
        self.severe_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn rotate_bytes(mut self, max: u64) -> Self {
        self.rotate_bytes = Some(max);
        self
    }

    #[must_use]
    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.async_mode = enabled;
        self
    }

    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn escalation(mut self, policy: EscalationPolicy) -> Self {
        self.escalation = policy;
        self
    }

    #[must_use]
    pub fn encode_policy(mut self, policy: EncodePolicy) -> Self {
        self.encode_policy = policy;
        self
    }

    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[must_use]
    pub fn seq_numbers(mut self, enabled: bool) -> Self {
        self.seq_numbers = enabled;
        self
    }

    #[must_use]
    pub fn capture_callers(mut self, enabled: bool) -> Self {
        self.capture_callers = enabled;
        self
    }

    #[must_use]
    pub fn default_policy(mut self, policy: DefaultPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Target registry; defaults to the process-global one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overlay `LOGSPOOL_*` environment variables onto this builder.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(v) = env_var("LOGSPOOL_MIN_LEVEL") {
            self.min_level = parse_env("LOGSPOOL_MIN_LEVEL", &v)?;
        }
        if let Some(v) = env_var("LOGSPOOL_ASYNC") {
            self.async_mode = env_bool(&v);
        }
        if let Some(v) = env_var("LOGSPOOL_THREADS") {
            self.threads = parse_env("LOGSPOOL_THREADS", &v)?;
        }
        if let Some(v) = env_var("LOGSPOOL_DEFAULT_FILE") {
            self.default_file = Some(PathBuf::from(v));
        }
        if let Some(v) = env_var("LOGSPOOL_SEVERE_FILE") {
            self.severe_file = Some(PathBuf::from(v));
        }
        if let Some(v) = env_var("LOGSPOOL_ROUTES") {
            for route in v.split(',').filter(|s| !s.is_empty()) {
                let (name, path) = route.split_once('=').ok_or_else(|| {
                    LogError::config(
                        "LOGSPOOL_ROUTES",
                        format!("expected 'name=path', got '{}'", route),
                    )
                })?;
                self.file_routes
                    .insert(name.trim().to_string(), PathBuf::from(path.trim()));
            }
        }
        if let Some(v) = env_var("LOGSPOOL_ROTATE_BYTES") {
            self.rotate_bytes = Some(parse_env("LOGSPOOL_ROTATE_BYTES", &v)?);
        }
        if let Some(v) = env_var("LOGSPOOL_SEQ") {
            self.seq_numbers = env_bool(&v);
        }
        if let Some(v) = env_var("LOGSPOOL_CALLERS") {
            self.capture_callers = env_bool(&v);
        }
        if let Some(v) = env_var("LOGSPOOL_ESCALATION") {
            self.escalation.enabled = env_bool(&v);
        }
        if let Some(v) = env_var("LOGSPOOL_JSON") {
            self.encode_policy = parse_env("LOGSPOOL_JSON", &v)?;
        }
        if let Some(v) = env_var("LOGSPOOL_HOSTNAME") {
            self.hostname = Some(v);
        }
        if let Some(v) = env_var("LOGSPOOL_DEFAULT_POLICY") {
            self.default_policy = parse_env("LOGSPOOL_DEFAULT_POLICY", &v)?;
        }
        // An environment-driven config with no destination at all falls
        // back to the console; records must land somewhere visible.
        if self.default_file.is_none() && self.default_sink.is_none() {
            self.default_sink = Some(Sink::console(crate::sinks::ConsoleSink::stdout()));
        }
        Ok(self)
    }

    pub fn build(self) -> Result<Arc<Config>> {
        if self.threads == 0 {
            return Err(LogError::config("threads", "thread count must be positive"));
        }
        if self.rotate_bytes == Some(0) {
            return Err(LogError::config(
                "rotation",
                "rotation size must be positive",
            ));
        }
        for path in self
            .default_file
            .iter()
            .chain(self.severe_file.iter())
            .chain(self.file_routes.values())
        {
            crate::sinks::FileSink::validate_path(path)?;
        }

        let queue = if self.async_mode {
            Some(Arc::new(DispatchQueue::new(self.threads)))
        } else {
            None
        };
        let router = Router::new(
            RouterSettings {
                min_level: self.min_level,
                name_levels: self.name_levels,
                default_sink: self.default_sink,
                default_file: self.default_file,
                file_routes: self.file_routes,
                sink_overrides: self.sink_overrides,
                severe_file: self.severe_file,
                severe_sink: self.severe_sink,
                rotate_bytes: self.rotate_bytes,
            },
            queue.clone(),
        );

        let registry = self.registry.unwrap_or_else(Registry::global);
        let registered = self.default_policy != DefaultPolicy::NonDefault;
        let config = Arc::new(Config {
            router,
            queue,
            escalation: self.escalation,
            encode_policy: self.encode_policy,
            hostname: self.hostname.unwrap_or_else(detect_hostname),
            pid: std::process::id(),
            seq: self.seq_numbers.then(|| AtomicU64::new(0)),
            capture_callers: self.capture_callers,
            registry: Arc::clone(&registry),
            registered,
            closed: AtomicBool::new(false),
        });

        if registered {
            registry.attach(&config, self.default_policy);
        }
        Ok(config)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| LogError::config(name, format!("cannot parse '{}': {}", value, e)))
}

/// Hostname override chain: explicit config, `HOSTNAME`, the kernel, a
/// fixed fallback.
fn detect_hostname() -> String {
    if let Some(name) = env_var("HOSTNAME") {
        return name;
    }
    if let Ok(raw) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    "localhost".to_string()
}

/// A value decorated onto every record by the engine rather than the
/// caller: currently the sequence number and the caller location.
pub(crate) fn caller_field(location: &'static std::panic::Location<'static>) -> FieldValue {
    FieldValue::Map(vec![
        (
            "file".to_string(),
            FieldValue::Str(location.file().to_string()),
        ),
        (
            "line".to_string(),
            FieldValue::Uint(u64::from(location.line())),
        ),
    ])
}

//! Record factories and the record builder
//!
//! [`Logs`] is a cheap, cloneable factory bound to a name; [`Record`] is
//! the single-threaded builder it hands out. A record accumulates message
//! fragments, fields, and errors, and finalizes exactly once when it goes
//! out of scope. Enablement, escalation, and field assembly all happen at
//! close time: a record opened below the threshold still delivers if an
//! attached error escalates it past the threshold.

use crate::core::config::caller_field;
use crate::core::field::{ErrorInfo, FieldMap, FieldValue};
use crate::core::level::{EscalationPolicy, Level};
use crate::core::registry::Registry;
use chrono::{DateTime, SecondsFormat, Utc};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::Arc;

/// Keys the engine owns; colliding user fields are prefixed with `_`.
const RESERVED_KEYS: &[&str] = &[
    "v", "name", "msg", "level", "time", "pid", "hostname", "seq", "caller",
];

thread_local! {
    /// Names of the records currently open on this thread, innermost last.
    static CONTEXT: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

fn current_context() -> Option<String> {
    CONTEXT.with(|stack| stack.borrow().last().cloned())
}

/// Named record factory. Clone freely and share across threads; each
/// `Record` it produces is used from one thread.
#[derive(Clone)]
pub struct Logs {
    name: String,
    registry: Arc<Registry>,
}

impl Logs {
    /// Factory bound to the process-global registry.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: Registry::global(),
        }
    }

    /// Factory bound to an explicit registry; used by tests and embedded
    /// pipelines.
    pub fn with_registry(name: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            name: name.into(),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a record at `level` would currently be delivered. Advisory
    /// only: escalation can still raise a record past the threshold, and
    /// records closed before any config attaches are queued regardless.
    pub fn enabled(&self, level: Level) -> bool {
        self.registry.enabled(&self.name, level)
    }

    /// A factory bound to the name of the record currently open on this
    /// thread; falls back to this factory when none is open or the names
    /// already match. Lets a helper logging inside another component's
    /// record keep its output under that component's name.
    pub fn contextual(&self) -> Logs {
        match current_context() {
            Some(name) if name != self.name => Logs {
                name,
                registry: Arc::clone(&self.registry),
            },
            _ => self.clone(),
        }
    }

    #[track_caller]
    pub fn record(&self, level: Level) -> Record {
        CONTEXT.with(|stack| stack.borrow_mut().push(self.name.clone()));
        Record {
            data: Some(RecordData {
                name: self.name.clone(),
                level,
                time: Utc::now(),
                caller: Location::caller(),
                entries: Vec::new(),
            }),
            registry: Arc::clone(&self.registry),
            _thread_bound: PhantomData,
        }
    }

    #[track_caller]
    pub fn trace(&self) -> Record {
        self.record(Level::Trace)
    }

    #[track_caller]
    pub fn debug(&self) -> Record {
        self.record(Level::Debug)
    }

    #[track_caller]
    pub fn info(&self) -> Record {
        self.record(Level::Info)
    }

    #[track_caller]
    pub fn warn(&self) -> Record {
        self.record(Level::Warn)
    }

    #[track_caller]
    pub fn error(&self) -> Record {
        self.record(Level::Error)
    }

    #[track_caller]
    pub fn fatal(&self) -> Record {
        self.record(Level::Fatal)
    }
}

impl std::fmt::Debug for Logs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logs").field("name", &self.name).finish()
    }
}

enum Entry {
    Msg(String),
    Field(String, FieldValue),
    /// Evaluated at close, and only when the record is actually delivered.
    Lazy(String, Box<dyn FnOnce() -> FieldValue + Send>),
    Error(ErrorInfo),
}

/// One in-flight log record. Delivered on drop; `discard` cancels.
pub struct Record {
    data: Option<RecordData>,
    registry: Arc<Registry>,
    /// Pinned to the opening thread so the context stack stays balanced.
    _thread_bound: PhantomData<*mut ()>,
}

impl Record {
    /// Append a message fragment. Fragments are joined with spaces at
    /// close; a fragment already contained in the accumulated message is
    /// skipped, so layered helpers can attach the same context twice
    /// without stuttering output.
    pub fn msg(mut self, fragment: impl Into<String>) -> Self {
        if let Some(data) = self.data.as_mut() {
            data.entries.push(Entry::Msg(fragment.into()));
        }
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        if let Some(data) = self.data.as_mut() {
            data.entries.push(Entry::Field(key.into(), value.into()));
        }
        self
    }

    /// Add the field only when the value is present.
    pub fn add_if_some<V: Into<FieldValue>>(
        self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> Self {
        match value {
            Some(v) => self.field(key, v),
            None => self,
        }
    }

    /// Add a field computed at close time, and only if the record is
    /// delivered. Use for values that are expensive to render.
    pub fn field_with(
        mut self,
        key: impl Into<String>,
        f: impl FnOnce() -> FieldValue + Send + 'static,
    ) -> Self {
        if let Some(data) = self.data.as_mut() {
            data.entries.push(Entry::Lazy(key.into(), Box::new(f)));
        }
        self
    }

    /// Attach an error: captured as a structured field and fed to the
    /// escalation policy at close.
    pub fn err<E: std::error::Error + ?Sized>(mut self, err: &E) -> Self {
        if let Some(data) = self.data.as_mut() {
            data.entries.push(Entry::Error(ErrorInfo::from_error(err)));
        }
        self
    }

    /// Drop the record without delivering it.
    pub fn discard(mut self) {
        self.data = None;
    }

    /// Deliver now instead of at scope exit.
    pub fn emit(self) {
        drop(self);
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        CONTEXT.with(|stack| {
            stack.borrow_mut().pop();
        });
        if let Some(data) = self.data.take() {
            self.registry.dispatch(data);
        }
    }
}

/// The finalized, not-yet-encoded form of a record. This is what waits in
/// the registry's pending queue before a config attaches.
pub struct RecordData {
    name: String,
    level: Level,
    time: DateTime<Utc>,
    caller: &'static Location<'static>,
    entries: Vec<Entry>,
}

impl RecordData {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// The record's level after escalation over every attached error.
    pub fn final_level(&self, policy: &EscalationPolicy) -> Level {
        let mut level = self.level;
        for entry in &self.entries {
            if let Entry::Error(info) = entry {
                level = policy.escalate(level, &info.kind);
            }
        }
        level
    }

    /// Assemble the encoded field mapping: reserved keys first, then
    /// decorators, then user fields in insertion order.
    pub fn into_fields(
        self,
        level: Level,
        hostname: &str,
        pid: u32,
        include_caller: bool,
        seq: Option<u64>,
    ) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("name", FieldValue::Str(self.name));
        fields.insert("hostname", FieldValue::Str(hostname.to_string()));
        fields.insert("pid", FieldValue::Uint(u64::from(pid)));
        fields.insert("level", FieldValue::Int(level.value()));
        fields.insert(
            "time",
            FieldValue::Str(self.time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        let mut message = String::new();
        let mut user = Vec::new();
        let mut error_count = 0u32;
        for entry in self.entries {
            match entry {
                Entry::Msg(fragment) => {
                    if fragment.is_empty() || message.contains(&fragment) {
                        continue;
                    }
                    if !message.is_empty() {
                        message.push(' ');
                    }
                    message.push_str(&fragment);
                }
                Entry::Field(key, value) => user.push((namespaced(key), value)),
                Entry::Lazy(key, f) => user.push((namespaced(key), f())),
                Entry::Error(info) => {
                    error_count += 1;
                    let key = if error_count == 1 {
                        "err".to_string()
                    } else {
                        format!("err{}", error_count)
                    };
                    user.push((key, FieldValue::Error(info)));
                }
            }
        }
        fields.insert("msg", FieldValue::Str(message));
        fields.insert("v", FieldValue::Int(0));

        if let Some(seq) = seq {
            fields.insert("seq", FieldValue::Uint(seq));
        }
        if include_caller {
            fields.insert("caller", caller_field(self.caller));
        }
        for (key, value) in user {
            fields.set(key, value);
        }
        fields
    }
}

fn namespaced(key: String) -> String {
    if RESERVED_KEYS.contains(&key.as_str()) {
        format!("_{}", key)
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(logs: &Logs, build: impl FnOnce(Record) -> Record) -> RecordData {
        let mut record = build(logs.info());
        record.data.take().unwrap()
    }

    fn logs() -> Logs {
        Logs::with_registry("svc", Registry::new(16))
    }

    #[test]
    fn test_reserved_keys_present() {
        let fields = data(&logs(), |r| r.msg("hello")).into_fields(
            Level::Info,
            "host-1",
            42,
            false,
            None,
        );
        assert_eq!(fields.get("name"), Some(&FieldValue::Str("svc".into())));
        assert_eq!(fields.get("level"), Some(&FieldValue::Int(30)));
        assert_eq!(fields.get("pid"), Some(&FieldValue::Uint(42)));
        assert_eq!(fields.get("msg"), Some(&FieldValue::Str("hello".into())));
        assert_eq!(fields.get("v"), Some(&FieldValue::Int(0)));
        assert!(fields.get("time").is_some());
        assert!(fields.get("hostname").is_some());
    }

    #[test]
    fn test_msg_fragments_join_and_dedup() {
        let fields = data(&logs(), |r| {
            r.msg("connecting to db")
                .msg("db") // contained in the first fragment
                .msg("retry 3")
        })
        .into_fields(Level::Info, "h", 1, false, None);
        assert_eq!(
            fields.get("msg"),
            Some(&FieldValue::Str("connecting to db retry 3".into()))
        );
    }

    #[test]
    fn test_user_field_collision_namespaced() {
        let fields = data(&logs(), |r| {
            r.field("level", "custom").field("port", 8080)
        })
        .into_fields(Level::Info, "h", 1, false, None);
        assert_eq!(fields.get("level"), Some(&FieldValue::Int(30)));
        assert_eq!(fields.get("_level"), Some(&FieldValue::Str("custom".into())));
        assert_eq!(fields.get("port"), Some(&FieldValue::Int(8080)));
    }

    #[test]
    fn test_duplicate_user_key_last_wins() {
        let fields = data(&logs(), |r| r.field("k", 1).field("k", 2))
            .into_fields(Level::Info, "h", 1, false, None);
        assert_eq!(fields.get("k"), Some(&FieldValue::Int(2)));
        assert_eq!(fields.len(), 8);
    }

    #[test]
    fn test_add_if_some() {
        let fields = data(&logs(), |r| {
            r.add_if_some("present", Some(5)).add_if_some("absent", None::<i64>)
        })
        .into_fields(Level::Info, "h", 1, false, None);
        assert_eq!(fields.get("present"), Some(&FieldValue::Int(5)));
        assert!(fields.get("absent").is_none());
    }

    #[test]
    fn test_errors_escalate_and_number() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let io2 = std::io::Error::new(std::io::ErrorKind::Other, "also gone");
        let d = data(&logs(), |r| r.err(&io).err(&io2));
        assert_eq!(d.final_level(&EscalationPolicy::default()), Level::Error);

        let fields = d.into_fields(Level::Error, "h", 1, false, None);
        assert!(matches!(fields.get("err"), Some(FieldValue::Error(_))));
        assert!(matches!(fields.get("err2"), Some(FieldValue::Error(_))));
    }

    #[test]
    fn test_seq_and_caller_decorators() {
        let fields = data(&logs(), |r| r.msg("x")).into_fields(
            Level::Info,
            "h",
            1,
            true,
            Some(7),
        );
        assert_eq!(fields.get("seq"), Some(&FieldValue::Uint(7)));
        match fields.get("caller") {
            Some(FieldValue::Map(entries)) => {
                assert!(entries.iter().any(|(k, _)| k == "file"));
                assert!(entries.iter().any(|(k, _)| k == "line"));
            }
            other => panic!("unexpected caller field: {:?}", other),
        }
    }

    #[test]
    fn test_lazy_field_evaluated_at_assembly() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let evaluated = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&evaluated);
        let d = data(&logs(), |r| {
            r.field_with("expensive", move || {
                flag.store(true, Ordering::Release);
                FieldValue::Int(99)
            })
        });
        assert!(!evaluated.load(Ordering::Acquire));
        let fields = d.into_fields(Level::Info, "h", 1, false, None);
        assert!(evaluated.load(Ordering::Acquire));
        assert_eq!(fields.get("expensive"), Some(&FieldValue::Int(99)));
    }

    #[test]
    fn test_contextual_binds_to_open_record_name() {
        let registry = Registry::new(64);
        let foo = Logs::with_registry("foo", Arc::clone(&registry));
        let bar = Logs::with_registry("bar", Arc::clone(&registry));

        let outer = foo.error().msg("outer");
        let ctx = bar.contextual();
        assert_eq!(ctx.name(), "foo");
        ctx.fatal().msg("inner").emit();
        drop(outer);

        assert_eq!(registry.pending_len(), 2);
    }

    #[test]
    fn test_contextual_without_open_record_is_self() {
        assert_eq!(logs().contextual().name(), "svc");
    }

    #[test]
    fn test_context_restored_when_records_close() {
        let registry = Registry::new(64);
        let a = Logs::with_registry("a", Arc::clone(&registry));
        let b = Logs::with_registry("b", Arc::clone(&registry));
        {
            let _outer = a.info().msg("outer");
            {
                let _inner = b.info().msg("inner");
                assert_eq!(a.contextual().name(), "b");
            }
            assert_eq!(b.contextual().name(), "a");
        }
        assert_eq!(b.contextual().name(), "b");
    }

    #[test]
    fn test_discard_skips_delivery() {
        let registry = Registry::new(16);
        let logs = Logs::with_registry("svc", Arc::clone(&registry));
        logs.info().msg("kept");
        logs.info().msg("dropped").discard();
        assert_eq!(registry.pending_len(), 1);
    }
}

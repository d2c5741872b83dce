//! Config registry and deferred delegation
//!
//! Records are routinely produced before any configuration exists (early
//! startup, library code running ahead of `main`'s wiring). Instead of
//! dropping them, the registry queues the finalized records and replays
//! them through the first config that attaches. If the pending queue
//! crosses its threshold before that happens, a default config is
//! synthesized from the environment so the backlog cannot grow without
//! bound.

use crate::core::config::{Config, DefaultPolicy};
use crate::core::diag;
use crate::core::level::Level;
use crate::core::record::RecordData;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub const DEFAULT_PENDING_LIMIT: usize = 500;

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

pub struct Registry {
    config: RwLock<Option<Arc<Config>>>,
    pending: Mutex<Vec<RecordData>>,
    threshold: usize,
    /// Set after a failed synthesis so a broken environment does not
    /// retry on every record.
    synthesis_failed: AtomicBool,
    overflow_reported: AtomicBool,
}

impl Registry {
    pub fn new(threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(None),
            pending: Mutex::new(Vec::new()),
            threshold: threshold.max(1),
            synthesis_failed: AtomicBool::new(false),
            overflow_reported: AtomicBool::new(false),
        })
    }

    /// The process-wide default registry. Its pending threshold can be
    /// tuned with `LOGSPOOL_PENDING_LIMIT`.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| {
            let threshold = std::env::var("LOGSPOOL_PENDING_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PENDING_LIMIT);
            Registry::new(threshold)
        }))
    }

    pub fn current(&self) -> Option<Arc<Config>> {
        self.config.read().clone()
    }

    pub(crate) fn enabled(&self, name: &str, level: Level) -> bool {
        match self.current() {
            Some(config) => config.enabled(name, level),
            // No config yet: the record will be queued, so it is "on".
            None => true,
        }
    }

    /// Attach a config per its default policy. On a successful attach the
    /// pending backlog replays through the new config, oldest first.
    ///
    /// The pending lock is held across the config swap and the backlog
    /// take: `dispatch` re-checks the current config under the same lock,
    /// so a record cannot slip into the queue after the drain and sit
    /// there unreplayed.
    pub(crate) fn attach(&self, config: &Arc<Config>, policy: DefaultPolicy) {
        let mut pending = self.pending.lock();
        {
            let mut current = self.config.write();
            match policy {
                DefaultPolicy::NonDefault => return,
                DefaultPolicy::SetIfUnset => {
                    if current.is_some() {
                        return;
                    }
                    *current = Some(Arc::clone(config));
                }
                DefaultPolicy::TakeOver => {
                    *current = Some(Arc::clone(config));
                }
            }
        }
        let backlog: Vec<RecordData> = std::mem::take(&mut *pending);
        drop(pending);
        if !backlog.is_empty() {
            diag::diag(format!("replaying {} queued records", backlog.len()));
            for data in backlog {
                config.deliver(data);
            }
        }
    }

    /// Remove the config if it is the current default.
    pub(crate) fn detach(&self, config: &Arc<Config>) {
        let mut current = self.config.write();
        if current
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, config))
        {
            *current = None;
        }
    }

    /// Close path for finalized records: deliver through the current
    /// config, or queue until one attaches. Once synthesis has failed the
    /// queue is capped at the threshold, dropping the oldest records.
    pub(crate) fn dispatch(self: &Arc<Self>, data: RecordData) {
        let should_synthesize = {
            let mut pending = self.pending.lock();
            // Checked under the pending lock; `attach` swaps the config
            // in and drains the queue under the same lock.
            if let Some(config) = self.current() {
                drop(pending);
                config.deliver(data);
                return;
            }
            pending.push(data);
            if self.synthesis_failed.load(Ordering::Acquire) {
                if pending.len() > self.threshold {
                    let excess = pending.len() - self.threshold;
                    pending.drain(..excess);
                    if !self.overflow_reported.swap(true, Ordering::AcqRel) {
                        diag::diag_error(format!(
                            "pending queue capped at {} records; dropping oldest",
                            self.threshold
                        ));
                    }
                }
                false
            } else {
                pending.len() >= self.threshold
            }
        };
        if should_synthesize {
            self.synthesize_default();
        }
    }

    fn synthesize_default(self: &Arc<Self>) {
        diag::diag_error(format!(
            "no config attached after {} records; building default from environment",
            self.threshold
        ));
        let result = Config::builder()
            .registry(Arc::clone(self))
            .default_policy(DefaultPolicy::SetIfUnset)
            .apply_env()
            .and_then(|builder| builder.build());
        if let Err(e) = result {
            self.synthesis_failed.store(true, Ordering::Release);
            diag::diag_failure("synthesizing default config", &e);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Logs;
    use tempfile::TempDir;

    /// Serializes the tests that mutate process environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_pending_records_replay_on_attach() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let registry = Registry::new(100);
        let logs = Logs::with_registry("early", Arc::clone(&registry));

        logs.info().msg("before config one").emit();
        logs.info().msg("before config two").emit();
        assert_eq!(registry.pending_len(), 2);

        let config = Config::builder()
            .registry(Arc::clone(&registry))
            .default_file(&path)
            .build()
            .unwrap();

        assert_eq!(registry.pending_len(), 0);
        config.shutdown();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("before config one"));
        assert!(lines[1].contains("before config two"));
    }

    #[test]
    fn test_set_if_unset_first_writer_wins() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(100);
        let first = Config::builder()
            .registry(Arc::clone(&registry))
            .default_file(dir.path().join("first.log"))
            .build()
            .unwrap();
        let second = Config::builder()
            .registry(Arc::clone(&registry))
            .default_file(dir.path().join("second.log"))
            .build()
            .unwrap();

        assert!(Arc::ptr_eq(&registry.current().unwrap(), &first));
        second.shutdown();
        first.shutdown();
    }

    #[test]
    fn test_take_over_replaces() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(100);
        let first = Config::builder()
            .registry(Arc::clone(&registry))
            .default_file(dir.path().join("first.log"))
            .build()
            .unwrap();
        let second = Config::builder()
            .registry(Arc::clone(&registry))
            .default_policy(DefaultPolicy::TakeOver)
            .default_file(dir.path().join("second.log"))
            .build()
            .unwrap();

        assert!(Arc::ptr_eq(&registry.current().unwrap(), &second));
        second.shutdown();
        first.shutdown();
    }

    #[test]
    fn test_detach_on_shutdown() {
        let registry = Registry::new(100);
        let config = Config::builder()
            .registry(Arc::clone(&registry))
            .build()
            .unwrap();
        assert!(registry.current().is_some());
        config.shutdown();
        assert!(registry.current().is_none());
    }

    #[test]
    fn test_threshold_synthesizes_default() {
        let _env = ENV_LOCK.lock();
        let dir = TempDir::new().unwrap();
        std::env::set_var("LOGSPOOL_DEFAULT_FILE", dir.path().join("auto.log"));
        let registry = Registry::new(3);
        let logs = Logs::with_registry("burst", Arc::clone(&registry));

        for i in 0..3 {
            logs.warn().msg(format!("burst {}", i)).emit();
        }
        std::env::remove_var("LOGSPOOL_DEFAULT_FILE");

        let config = registry.current().expect("default config synthesized");
        assert_eq!(registry.pending_len(), 0);
        config.shutdown();

        let content = std::fs::read_to_string(dir.path().join("auto.log")).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_pending_capped_after_failed_synthesis() {
        let _env = ENV_LOCK.lock();
        // Zero rotation size makes the synthesized build fail.
        std::env::set_var("LOGSPOOL_ROTATE_BYTES", "0");
        let registry = Registry::new(3);
        let logs = Logs::with_registry("orphan", Arc::clone(&registry));

        for i in 0..20 {
            logs.warn().msg(format!("orphan {}", i)).emit();
        }
        std::env::remove_var("LOGSPOOL_ROTATE_BYTES");

        assert!(registry.current().is_none());
        assert!(registry.pending_len() <= 3);
    }

    #[test]
    fn test_no_record_stranded_across_attach() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let registry = Registry::new(10_000);

        let producer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let logs = Logs::with_registry("race", registry);
                for i in 0..300 {
                    logs.info().msg(format!("record {}", i)).emit();
                    if i % 16 == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };
        std::thread::yield_now();
        let config = Config::builder()
            .registry(Arc::clone(&registry))
            .default_file(&path)
            .build()
            .unwrap();
        producer.join().unwrap();
        config.shutdown();

        // Every record was either replayed on attach or delivered
        // directly; none may be left behind in the queue.
        assert_eq!(registry.pending_len(), 0);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 300);
    }
}

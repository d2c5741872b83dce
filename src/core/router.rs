//! Record routing
//!
//! Resolution is a pure function of `(name, level)` over immutable
//! settings, memoized for the lifetime of the configuration. Precedence
//! for the primary destination:
//!
//! 1. a per-name sink override, combined with a same-name file route when
//!    both exist;
//! 2. a per-name file route;
//! 3. the default sink and/or default file.
//!
//! File routes are materialized lazily and shared: two names routed to the
//! same path write through one sink. Records at or above `Error`
//! additionally go to the severe destination, which is built on first
//! severe record and prepended so a failing primary cannot starve it.

use crate::core::diag;
use crate::core::dispatch::DispatchQueue;
use crate::core::level::Level;
use crate::sinks::{FileSink, RotatingSink, Sink};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Immutable routing table, fixed at configuration build time.
#[derive(Default)]
pub struct RouterSettings {
    pub min_level: Level,
    pub name_levels: HashMap<String, Level>,
    pub default_sink: Option<Arc<Sink>>,
    pub default_file: Option<PathBuf>,
    pub file_routes: HashMap<String, PathBuf>,
    pub sink_overrides: HashMap<String, Arc<Sink>>,
    pub severe_file: Option<PathBuf>,
    pub severe_sink: Option<Arc<Sink>>,
    /// When set, lazily-created file sinks rotate at this size.
    pub rotate_bytes: Option<u64>,
}

pub struct Router {
    settings: RouterSettings,
    /// Present in async mode; primaries and the severe channel are
    /// wrapped through it.
    queue: Option<Arc<DispatchQueue>>,
    files: Mutex<HashMap<PathBuf, Arc<Sink>>>,
    severe: Mutex<Option<Arc<Sink>>>,
    cache: RwLock<HashMap<(String, Level), Arc<Sink>>>,
}

impl Router {
    pub fn new(settings: RouterSettings, queue: Option<Arc<DispatchQueue>>) -> Self {
        Self {
            settings,
            queue,
            files: Mutex::new(HashMap::new()),
            severe: Mutex::new(None),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Whether records from `name` at `level` are delivered at all.
    pub fn enabled(&self, name: &str, level: Level) -> bool {
        let threshold = self
            .settings
            .name_levels
            .get(name)
            .copied()
            .unwrap_or(self.settings.min_level);
        level >= threshold
    }

    /// Resolve the destination for `(name, level)`. Deterministic and
    /// cached; the severe channel is part of the cached composition.
    pub fn resolve(&self, name: &str, level: Level) -> Arc<Sink> {
        let key = (name.to_string(), level);
        if let Some(sink) = self.cache.read().get(&key) {
            return Arc::clone(sink);
        }

        let resolved = self.build(name, level);
        let mut cache = self.cache.write();
        // Keep whichever resolution won the race; both are identical.
        Arc::clone(cache.entry(key).or_insert(resolved))
    }

    fn build(&self, name: &str, level: Level) -> Arc<Sink> {
        let file_route = self
            .settings
            .file_routes
            .get(name)
            .map(|path| self.file_sink(path));

        let primary = match (self.settings.sink_overrides.get(name), file_route) {
            (Some(over), Some(file)) => over.and(&file),
            (Some(over), None) => Arc::clone(over),
            (None, Some(file)) => file,
            (None, None) => self.default_sink(),
        };

        let primary = self.maybe_async(&primary);

        if level.is_severe() {
            self.severe_sink().and(&primary)
        } else {
            primary
        }
    }

    fn default_sink(&self) -> Arc<Sink> {
        let base = self
            .settings
            .default_sink
            .clone()
            .unwrap_or_else(Sink::null);
        match &self.settings.default_file {
            Some(path) => base.and(&self.file_sink(path)),
            None => base,
        }
    }

    /// Severe destination, built on the first severe record.
    fn severe_sink(&self) -> Arc<Sink> {
        let mut guard = self.severe.lock();
        if let Some(sink) = guard.as_ref() {
            return Arc::clone(sink);
        }
        let base = self
            .settings
            .severe_sink
            .clone()
            .unwrap_or_else(Sink::null);
        let combined = match &self.settings.severe_file {
            Some(path) => base.and(&self.file_sink(path)),
            None => base,
        };
        let combined = self.maybe_async(&combined);
        *guard = Some(Arc::clone(&combined));
        combined
    }

    fn maybe_async(&self, sink: &Arc<Sink>) -> Arc<Sink> {
        match &self.queue {
            Some(queue) => sink.into_async(queue),
            None => Arc::clone(sink),
        }
    }

    /// One file sink per path, shared across routes for the lifetime of
    /// this router.
    fn file_sink(&self, path: &Path) -> Arc<Sink> {
        let mut files = self.files.lock();
        if let Some(sink) = files.get(path) {
            return Arc::clone(sink);
        }
        let sink = match self.settings.rotate_bytes {
            Some(max) => match RotatingSink::new(path, max, self.queue.clone()) {
                Ok(rotating) => Sink::rotating(rotating),
                Err(e) => {
                    diag::diag_failure(
                        &format!("creating rotating sink for '{}'", path.display()),
                        &e,
                    );
                    Sink::null()
                }
            },
            None => Sink::file(FileSink::new(path)),
        };
        files.insert(path.to_path_buf(), Arc::clone(&sink));
        sink
    }

    /// Close every sink this router opened or was handed.
    pub fn close(&self) {
        for sink in self.files.lock().values() {
            sink.close();
        }
        if let Some(sink) = self.severe.lock().as_ref() {
            sink.close();
        }
        if let Some(sink) = &self.settings.default_sink {
            sink.close();
        }
        for sink in self.settings.sink_overrides.values() {
            sink.close();
        }
        if let Some(sink) = &self.settings.severe_sink {
            sink.close();
        }
    }
}

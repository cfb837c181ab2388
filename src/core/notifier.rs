//! Entry point for observing files.
//!
//! A file gets a watcher when its first listener is added and loses it when
//! its last listener is removed, when every context holding its listeners is
//! gone, or when the file is closed explicitly.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::ConfigurationError;
use crate::ExecutionContext;
use crate::Listener;
use crate::ListenerRegistry;
use crate::NotifyConfig;
use crate::ObservableKey;
use crate::ObserveOptions;
use crate::Result;
use crate::StorageEngine;
use crate::VersionWatcher;
use crate::WatchedFileConfig;
use crate::WatcherConfig;
use crate::WatcherHandle;

/// One open file with its registrations and running watcher
struct WatchedFile {
    config: WatchedFileConfig,
    registry: Arc<ListenerRegistry>,
    watcher: WatcherHandle,
}

impl WatchedFile {
    fn stop(self) {
        if !self.watcher.stop() {
            warn!(path = %self.config.path, "Watcher did not confirm stop");
        }
    }

    /// Rejects a second identity for the same path
    fn check_identity(
        &self,
        file: &WatchedFileConfig,
    ) -> Result<()> {
        if self.config.encryption_key != file.encryption_key {
            return Err(ConfigurationError::KeyMismatch {
                path: file.path.clone(),
            }
            .into());
        }
        let field = if self.config.mode != file.mode {
            "open mode"
        } else if self.config.durability != file.durability {
            "durability"
        } else {
            return Ok(());
        };
        Err(ConfigurationError::IdentityMismatch {
            path: file.path.clone(),
            field,
        }
        .into())
    }
}

type WatchedFiles = Mutex<HashMap<String, WatchedFile>>;

pub struct NotificationCenter {
    engine: Arc<dyn StorageEngine>,
    config: WatcherConfig,
    files: Arc<WatchedFiles>,
}

impl NotificationCenter {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        config: WatcherConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            config,
            files: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn from_config(
        engine: Arc<dyn StorageEngine>,
        config: &NotifyConfig,
    ) -> Result<Self> {
        Self::new(engine, config.watcher.clone())
    }

    /// Registers `listener` for `observable` inside `file`.
    ///
    /// The first registration on a file opens it and starts its watcher, so
    /// an invalid file identity is reported here. Must be called from
    /// `context`.
    pub fn observe(
        &self,
        file: &WatchedFileConfig,
        observable: ObservableKey,
        context: &Arc<dyn ExecutionContext>,
        listener: Listener,
        options: ObserveOptions,
    ) -> Result<()> {
        file.validate()?;
        context.check_affinity()?;

        let mut files = self.files.lock();
        if let Some(watched) = files.get(&file.path) {
            watched.check_identity(file)?;
            return watched.registry.add(observable, context, listener, options);
        }

        let registry = Arc::new(ListenerRegistry::new(file.path.clone()));
        let watcher = VersionWatcher::start(self.engine.as_ref(), file, registry.clone(), &self.config)?;

        let shared = Arc::downgrade(&self.files);
        let path = file.path.clone();
        let owner = Arc::downgrade(&registry);
        registry.set_empty_hook(move || reap(&shared, &path, &owner));
        let watched = WatchedFile {
            config: file.clone(),
            registry,
            watcher,
        };

        if let Err(e) = watched.registry.add(observable, context, listener, options) {
            drop(files);
            watched.stop();
            return Err(e);
        }

        info!(path = %file.path, "Watching file");
        files.insert(file.path.clone(), watched);
        Ok(())
    }

    /// Unregisters `listener`; stops the file's watcher once nothing is left
    /// to observe. A no-op for unknown files and listeners.
    pub fn remove(
        &self,
        path: &str,
        observable: &ObservableKey,
        context: &Arc<dyn ExecutionContext>,
        listener: &Listener,
    ) -> Result<()> {
        self.release(path, |registry| registry.remove(observable, context, listener))
    }

    /// Unregisters every listener `context` holds on `observable`. Idempotent.
    pub fn remove_all(
        &self,
        path: &str,
        observable: &ObservableKey,
        context: &Arc<dyn ExecutionContext>,
    ) -> Result<()> {
        self.release(path, |registry| registry.remove_all(observable, context))
    }

    /// Stops watching `path` regardless of its registrations.
    ///
    /// Returns whether the file was being watched.
    pub fn close(
        &self,
        path: &str,
    ) -> bool {
        let Some(watched) = self.files.lock().remove(path) else {
            return false;
        };
        debug!(path, observables = watched.registry.observable_count(), "Closing watched file");
        watched.stop();
        true
    }

    pub fn is_watching(
        &self,
        path: &str,
    ) -> bool {
        self.files.lock().contains_key(path)
    }

    /// Registry of a watched file, e.g. to install a fault hook
    pub fn registry(
        &self,
        path: &str,
    ) -> Option<Arc<ListenerRegistry>> {
        self.files.lock().get(path).map(|w| w.registry.clone())
    }

    pub fn watched_files(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    /// Stops every watcher
    pub fn shutdown(&self) {
        let files: Vec<WatchedFile> = self.files.lock().drain().map(|(_, w)| w).collect();
        if files.is_empty() {
            return;
        }
        info!(files = files.len(), "Shutting down notification center");
        for watched in files {
            watched.stop();
        }
    }

    fn release<F>(
        &self,
        path: &str,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(&ListenerRegistry) -> Result<()>,
    {
        let mut files = self.files.lock();
        let Some(watched) = files.get(path) else {
            return Ok(());
        };
        f(&watched.registry)?;

        if !watched.registry.is_empty() {
            return Ok(());
        }
        let Some(watched) = files.remove(path) else {
            return Ok(());
        };
        drop(files);

        info!(path, "Last listener removed, closing watched file");
        watched.stop();
        Ok(())
    }
}

/// Closes `path` once pruning has emptied its registry
fn reap(
    files: &Weak<WatchedFiles>,
    path: &str,
    registry: &Weak<ListenerRegistry>,
) {
    let (Some(shared), Some(registry)) = (files.upgrade(), registry.upgrade()) else {
        return;
    };
    let mut files = shared.lock();
    let current = files
        .get(path)
        .is_some_and(|w| Arc::ptr_eq(&w.registry, &registry) && w.registry.is_empty());
    if !current {
        return;
    }
    let Some(watched) = files.remove(path) else {
        return;
    };
    drop(files);

    info!(path, "Every listener context is gone, closing watched file");
    // On the watcher's own thread the loop exits after this cycle
    if !watched.watcher.stop() {
        debug!(path, "Watcher stops after its current cycle");
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for NotificationCenter {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("watched_files", &self.watched_files())
            .finish_non_exhaustive()
    }
}

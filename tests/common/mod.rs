use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use snapwatch::ChangeNotification;
use snapwatch::Listener;
use snapwatch::MemStorage;
use snapwatch::MemStorageConfig;
use snapwatch::NotificationCenter;
use snapwatch::RowId;
use snapwatch::WatcherConfig;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub type Received = Arc<Mutex<Vec<ChangeNotification>>>;

/// Engine plus a notification center watching it
pub struct TestContext {
    pub storage: Arc<MemStorage>,
    pub center: Arc<NotificationCenter>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_storage(MemStorageConfig::default())
    }

    /// Engine keeping only the newest `retained_versions` unpinned snapshots
    pub fn with_retention(retained_versions: usize) -> Self {
        Self::with_storage(MemStorageConfig { retained_versions })
    }

    fn with_storage(config: MemStorageConfig) -> Self {
        let storage = Arc::new(MemStorage::new(config).expect("valid storage config"));
        let center = NotificationCenter::new(storage.clone(), WatcherConfig::default()).expect("valid watcher config");
        Self {
            storage,
            center: Arc::new(center),
        }
    }

    /// Creates `Person(name, age)` with row 1 = ("Ann", 30) in `path`
    pub fn seed_person(
        &self,
        path: &str,
    ) {
        self.storage
            .write(path, |tx| {
                tx.create_table("Person", &["name", "age"])?;
                tx.put_row("Person", RowId(1), vec!["Ann".into(), 30.into()])
            })
            .expect("seed commit");
    }
}

pub fn recording_listener() -> (Listener, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let listener = Listener::from_fn(move |n| sink.lock().push(n.clone()));
    (listener, received)
}

pub fn wait_until<F>(
    timeout: Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

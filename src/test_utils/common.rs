use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;

use crate::ChangeNotification;
use crate::Listener;

/// Listener that keeps every notification it receives
pub fn recording_listener() -> (Listener, Arc<Mutex<Vec<ChangeNotification>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let listener = Listener::from_fn(move |n| sink.lock().push(n.clone()));
    (listener, received)
}

/// Polls `condition` until it holds or `timeout` elapses
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

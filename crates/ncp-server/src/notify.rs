// crates/ncp-server/src/notify.rs
// Notifier capability: how background components reach the upstream client
// without holding a reference to the server

use serde_json::Value;

/// Sends a one-way JSON-RPC notification upstream. The server hands an
/// implementation to the scheduler and the indexer; neither owns the server.
pub trait Notifier: Send + Sync {
    fn notify(&self, method: &str, params: Option<Value>);
}

/// Discards notifications. Stands in where nothing upstream is listening.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _method: &str, _params: Option<Value>) {}
}

/// Records notifications in memory, for assertions.
#[cfg(test)]
pub struct RecordingNotifier {
    pub sent: std::sync::Mutex<Vec<(String, Option<Value>)>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, method: &str, params: Option<Value>) {
        self.sent
            .lock()
            .unwrap()
            .push((method.to_string(), params));
    }
}

use std::collections::HashMap;

use crate::types::LogEntry;

/// The applied key-value state machine. Entries reach it only after commit,
/// in strict log order.
#[derive(Default)]
pub struct KvStore {
    data: HashMap<String, String>,
}

impl KvStore {
    pub fn new() -> KvStore {
        KvStore {
            data: HashMap::new(),
        }
    }

    /// Apply one committed entry: bind the entry's key to its value.
    pub fn apply(&mut self, entry: &LogEntry) {
        self.data.insert(entry.key.clone(), entry.value.clone());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

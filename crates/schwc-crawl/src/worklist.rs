use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use schwc_core::HomologationKey;

/// Ordered homologation keys still to be searched.
///
/// Keys leave the worklist only when their search succeeds. Whatever is left
/// after a run is the next run's starting point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Worklist {
    keys: VecDeque<HomologationKey>,
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HomologationKey> {
        self.keys.iter()
    }

    pub fn contains(&self, key: &HomologationKey) -> bool {
        self.keys.contains(key)
    }

    pub fn push(&mut self, key: HomologationKey) {
        self.keys.push_back(key);
    }

    /// Remove the first occurrence of `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &HomologationKey) -> bool {
        match self.keys.iter().position(|k| k == key) {
            Some(i) => {
                self.keys.remove(i);
                true
            }
            None => false,
        }
    }

    /// Keys as plain strings, in order.
    pub fn to_strings(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.as_str().to_string()).collect()
    }
}

impl FromIterator<HomologationKey> for Worklist {
    fn from_iter<I: IntoIterator<Item = HomologationKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<HomologationKey>> for Worklist {
    fn from(keys: Vec<HomologationKey>) -> Self {
        Self { keys: keys.into() }
    }
}

/// Cooperative cancellation flag, checked by the crawl loop between items.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

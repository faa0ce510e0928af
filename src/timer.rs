use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::session::TimerKey;

/// Wake-up delivered back into the session's command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    pub generation: u64,
}

/// Keyed one-shot timers. Arming a key again replaces the earlier timer.
pub struct TimerService {
    armed: HashMap<TimerKey, (u64, AbortHandle)>,
    next_generation: u64,
}

impl TimerService {
    pub fn new() -> Self {
        TimerService {
            armed: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn arm(&mut self, key: TimerKey, delay: Duration, tx: mpsc::UnboundedSender<TimerFired>) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let fired = TimerFired {
            key: key.clone(),
            generation,
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // the receiver is gone once the session stops
            let _ = tx.send(fired);
        });
        if let Some((_, previous)) = self.armed.insert(key, (generation, task.abort_handle())) {
            previous.abort();
        }
    }

    /// Forgets a timer that has fired. Returns `false` for a wake-up that was
    /// superseded by a later `arm` of the same key.
    pub fn fired(&mut self, fired: &TimerFired) -> bool {
        match self.armed.get(&fired.key) {
            Some((generation, _)) if *generation == fired.generation => {
                self.armed.remove(&fired.key);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.armed.drain() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

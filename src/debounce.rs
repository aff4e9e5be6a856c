//! Keyed debouncing of user input
//!
//! Each key is an independent channel: scheduling on one key cancels only the
//! effect previously scheduled on that same key. Effects run on the Tokio
//! runtime after the quiet period, so `schedule` must be called from within a
//! runtime context.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

type Tickets<K> = Arc<Mutex<HashMap<K, u64>>>;

pub struct Debouncer<K> {
    delay: Duration,
    /// Latest ticket per key; a timer only fires if it still holds the latest
    tickets: Tickets<K>,
    timers: HashMap<K, JoinHandle<()>>,
    next_ticket: u64,
}

fn lock<K>(tickets: &Tickets<K>) -> MutexGuard<'_, HashMap<K, u64>> {
    // Effects never panic while holding the lock, but recover anyway
    tickets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            tickets: Arc::new(Mutex::new(HashMap::new())),
            timers: HashMap::new(),
            next_ticket: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `effect` once `delay` passes without another call for `key`
    ///
    /// A newer call for the same key cancels this one outright.
    pub fn schedule<F>(&mut self, key: K, effect: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.next_ticket += 1;
        let ticket = self.next_ticket;

        if let Some(previous) = self.timers.remove(&key) {
            previous.abort();
        }
        // Timers that already fired for other keys
        self.timers.retain(|_, timer| !timer.is_finished());
        lock(&self.tickets).insert(key.clone(), ticket);

        let tickets = Arc::clone(&self.tickets);
        let delay = self.delay;
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut latest = lock(&tickets);
                if latest.get(&timer_key) != Some(&ticket) {
                    return;
                }
                latest.remove(&timer_key);
            }
            effect();
        });
        self.timers.insert(key, handle);
    }

    /// Whether an effect is waiting to fire for `key`
    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.tickets).contains_key(key)
    }

    /// Number of keys with an effect still waiting to fire
    pub fn pending_count(&self) -> usize {
        lock(&self.tickets).len()
    }

    /// Drop the scheduled effect for `key`, if any
    pub fn cancel(&mut self, key: &K) {
        lock(&self.tickets).remove(key);
        if let Some(timer) = self.timers.remove(key) {
            timer.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        lock(&self.tickets).clear();
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.abort();
        }
    }
}

impl<K> std::fmt::Debug for Debouncer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &lock(&self.tickets).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::{self, Instant};

    const DELAY: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_last_call_wins() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY);
        let start = Instant::now();

        for (i, gap) in [0u64, 200, 300, 400].into_iter().enumerate() {
            time::sleep(Duration::from_millis(gap)).await;
            let tx = tx.clone();
            debouncer.schedule("prompt", move || {
                let _ = tx.send((i, Instant::now()));
            });
        }

        let (index, fired_at) = rx.recv().await.unwrap();
        assert_eq!(index, 3);
        // last call at 900ms, plus the quiet period
        assert_eq!(fired_at - start, Duration::from_millis(1900));

        // nothing else fires later
        assert!(time::timeout(Duration::from_secs(10), rx.recv()).await.is_err());
        assert!(!debouncer.is_pending(&"prompt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY);

        let prompt_tx = tx.clone();
        debouncer.schedule("prompt", move || {
            let _ = prompt_tx.send("prompt");
        });
        time::sleep(Duration::from_millis(500)).await;
        let color_tx = tx.clone();
        debouncer.schedule("color", move || {
            let _ = color_tx.send("color");
        });

        assert_eq!(rx.recv().await, Some("prompt"));
        assert_eq!(rx.recv().await, Some("color"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_timers_are_pruned() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY);

        let prompt_tx = tx.clone();
        debouncer.schedule("prompt", move || {
            let _ = prompt_tx.send("prompt");
        });
        assert_eq!(rx.recv().await, Some("prompt"));
        tokio::task::yield_now().await;
        assert_eq!(debouncer.pending_count(), 0);
        assert!(format!("{debouncer:?}").contains("pending: 0"));

        let color_tx = tx.clone();
        debouncer.schedule("color", move || {
            let _ = color_tx.send("color");
        });
        assert_eq!(debouncer.timers.len(), 1);
        assert!(debouncer.timers.contains_key("color"));
        assert_eq!(debouncer.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let mut debouncer = Debouncer::new(DELAY);

        let effect_tx = tx.clone();
        debouncer.schedule(1u8, move || {
            let _ = effect_tx.send(());
        });
        assert!(debouncer.is_pending(&1));

        debouncer.cancel(&1);
        assert!(!debouncer.is_pending(&1));
        assert!(time::timeout(Duration::from_secs(5), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_timers() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        {
            let mut debouncer = Debouncer::new(DELAY);
            debouncer.schedule("title", move || {
                let _ = tx.send(());
            });
        }
        // sender was owned by the aborted task, so the channel closes
        assert_eq!(rx.recv().await, None);
    }
}

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::broadcast;

/// Per-key duplicate-work suppression.
///
/// The first caller for a key becomes the leader and runs the work; callers
/// arriving while it is in flight wait on the leader's published result
/// instead of duplicating it. The slot map is guarded by a plain mutex that
/// is never held across an await.
pub struct SingleFlight<T: Clone + Send + 'static> {
  inflight: Mutex<HashMap<String, broadcast::Sender<T>>>,
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
  pub fn new() -> Self {
    Self {
      inflight: Mutex::new(HashMap::new()),
    }
  }

  pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
  {
    let mut work = Some(work);
    loop {
      let existing = {
        let inflight = self.inflight.lock().expect("single-flight mutex poisoned");
        inflight.get(key).map(|tx| tx.subscribe())
      };

      let mut rx = match existing {
        Some(rx) => rx,
        None => {
          let became_leader = {
            let mut inflight = self.inflight.lock().expect("single-flight mutex poisoned");
            if inflight.contains_key(key) {
              false
            } else {
              let (tx, _) = broadcast::channel(1);
              inflight.insert(key.to_string(), tx);
              true
            }
          };

          if !became_leader {
            continue;
          }

          // Leader path. The guard clears the slot even if the work
          // future is dropped mid-flight, so waiters wake and take over.
          let guard = SlotGuard { flight: self, key };
          let work = work.take().expect("leader selected twice for one call");
          let result = work().await;
          guard.publish(result.clone());
          return result;
        }
      };

      match rx.recv().await {
        Ok(result) => return result,
        // Leader vanished without publishing; loop to claim the slot.
        Err(_) => continue,
      }
    }
  }
}

impl<T: Clone + Send + 'static> Default for SingleFlight<T> {
  fn default() -> Self {
    Self::new()
  }
}

struct SlotGuard<'a, T: Clone + Send + 'static> {
  flight: &'a SingleFlight<T>,
  key: &'a str,
}

impl<T: Clone + Send + 'static> SlotGuard<'_, T> {
  fn publish(self, result: T) {
    if let Some(tx) = self.remove() {
      // No waiters is fine; send only fails when every receiver is gone.
      let _ = tx.send(result);
    }
    std::mem::forget(self);
  }

  fn remove(&self) -> Option<broadcast::Sender<T>> {
    self
      .flight
      .inflight
      .lock()
      .expect("single-flight mutex poisoned")
      .remove(self.key)
  }
}

impl<T: Clone + Send + 'static> Drop for SlotGuard<'_, T> {
  fn drop(&mut self) {
    self.remove();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn concurrent_callers_share_one_execution() {
    let flight = Arc::new(SingleFlight::<u32>::new());
    let calls = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
      let flight = flight.clone();
      let calls = calls.clone();
      handles.push(tokio::spawn(async move {
        flight
          .run("key", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            42
          })
          .await
      }));
    }

    for handle in handles {
      assert_eq!(handle.await.unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn distinct_keys_run_independently() {
    let flight = Arc::new(SingleFlight::<&'static str>::new());
    let a = flight.run("a", || async { "a" });
    let b = flight.run("b", || async { "b" });
    let (a, b) = tokio::join!(a, b);
    assert_eq!((a, b), ("a", "b"));
  }

  #[tokio::test]
  async fn slot_clears_after_completion() {
    let flight = SingleFlight::<u32>::new();
    assert_eq!(flight.run("key", || async { 1 }).await, 1);
    // A later caller becomes a fresh leader rather than waiting forever.
    assert_eq!(flight.run("key", || async { 2 }).await, 2);
  }

  #[tokio::test]
  async fn waiters_recover_when_leader_is_dropped() {
    let flight = Arc::new(SingleFlight::<u32>::new());

    let leader = {
      let flight = flight.clone();
      tokio::spawn(async move {
        flight
          .run("key", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            1
          })
          .await
      })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    leader.abort();

    let value = tokio::time::timeout(
      Duration::from_secs(1),
      flight.run("key", || async { 2 }),
    )
    .await
    .expect("waiter should take over after leader abort");
    assert_eq!(value, 2);
  }
}

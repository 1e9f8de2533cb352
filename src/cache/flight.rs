//! Single-flight coordination for `get_or_set`.
//!
//! The first caller for a key becomes the leader and runs the computation;
//! callers arriving while it runs subscribe to the leader's result instead of
//! starting their own. Subscribing and finishing both happen under the same
//! lock, so every follower that found the flight receives its outcome. If the
//! leader is dropped before finishing, a waiting follower takes over and runs
//! its own computation.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::{CacheError, Result};
use crate::store::CacheValue;

type Outcome = Result<CacheValue>;

#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    calls: Mutex<HashMap<String, broadcast::Sender<Outcome>>>,
}

enum Role {
    Leader,
    Follower(broadcast::Receiver<Outcome>),
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs `compute` unless a computation for `key` is already in flight, in
    /// which case its outcome is awaited and shared.
    pub(crate) async fn run<F, Fut>(&self, key: &str, compute: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        loop {
            let role = {
                let mut calls = self.calls.lock();
                match calls.get(key) {
                    Some(sender) => Role::Follower(sender.subscribe()),
                    None => {
                        let (sender, _) = broadcast::channel(1);
                        calls.insert(key.to_string(), sender);
                        Role::Leader
                    }
                }
            };

            match role {
                Role::Follower(mut receiver) => match receiver.recv().await {
                    Ok(outcome) => return outcome,
                    // Leader dropped without an outcome; compete to lead again
                    Err(RecvError::Closed) => continue,
                    Err(RecvError::Lagged(_)) => {
                        return Err(CacheError::Cancelled(format!(
                            "outcome for '{}' was lost",
                            key
                        )))
                    }
                },
                Role::Leader => {
                    let mut guard = FlightGuard {
                        flight: self,
                        key,
                        done: false,
                    };
                    let outcome = compute().await;
                    guard.finish(outcome.clone());
                    return outcome;
                }
            }
        }
    }

    /// Number of keys currently being computed.
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Clears the flight when the leader finishes or is dropped mid-computation.
/// Dropping the sender wakes followers with a closed-channel error.
struct FlightGuard<'a> {
    flight: &'a SingleFlight,
    key: &'a str,
    done: bool,
}

impl FlightGuard<'_> {
    fn finish(&mut self, outcome: Outcome) {
        self.done = true;
        let sender = self.flight.calls.lock().remove(self.key);
        if let Some(sender) = sender {
            // Zero followers is fine
            let _ = sender.send(outcome);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.flight.calls.lock().remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!("computed"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), json!("computed"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_follower() {
        let flight = Arc::new(SingleFlight::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(CacheError::factory(anyhow::anyhow!("backend down")))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = flight
            .run("k", || async { Ok(json!("should not run")) })
            .await;

        assert!(matches!(follower, Err(CacheError::Factory(_))));
        assert!(matches!(leader.await.unwrap(), Err(CacheError::Factory(_))));
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_follower_takes_over_from_abandoned_leader() {
        let flight = Arc::new(SingleFlight::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(json!(1))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.run("k", || async { Ok(json!(2)) }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        let outcome = follower.await.unwrap();
        assert_eq!(outcome.unwrap(), json!(2));
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let flight = SingleFlight::new();
        let a = flight.run("a", || async { Ok(json!("a")) }).await.unwrap();
        let b = flight.run("b", || async { Ok(json!("b")) }).await.unwrap();
        assert_eq!(a, json!("a"));
        assert_eq!(b, json!("b"));
    }

    #[tokio::test]
    async fn test_only_one_follower_takes_over() {
        let flight = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(json!("never"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut followers = Vec::new();
        for _ in 0..5 {
            let flight = Arc::clone(&flight);
            let runs = Arc::clone(&runs);
            followers.push(tokio::spawn(async move {
                flight
                    .run("k", || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(json!("retry"))
                    })
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        for follower in followers {
            assert_eq!(follower.await.unwrap().unwrap(), json!("retry"));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }
}

//! Per-address connection cache. At most one live connection exists per
//! device address; concurrent callers share the single in-flight connect.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Result;

/// Anything a manager can cache must report whether it is still usable
pub trait Liveness {
    fn is_alive(&self) -> bool;
}

type Slot<C> = Arc<tokio::sync::Mutex<Option<Arc<C>>>>;

pub struct ConnectionManager<C> {
    slots: Mutex<HashMap<String, Slot<C>>>,
}

impl<C> Default for ConnectionManager<C> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<C: Liveness + Send + Sync> ConnectionManager<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Slot<C> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Return the live cached connection for `key`, or run `connect` and
    /// cache its result. The slot stays locked while connecting, so a second
    /// caller waits for and then reuses the first caller's connection.
    pub async fn get_or_connect<F, Fut>(&self, key: &str, connect: F) -> Result<Arc<C>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        if let Some(existing) = guard.as_ref()
            && existing.is_alive()
        {
            return Ok(existing.clone());
        }

        if guard.take().is_some() {
            debug!(key, "dropping dead connection");
        }

        match connect().await {
            Ok(connection) => {
                let connection = Arc::new(connection);
                *guard = Some(connection.clone());
                Ok(connection)
            }
            Err(e) => {
                drop(guard);
                self.release_if_unused(key, &slot);
                Err(e)
            }
        }
    }

    /// Forget an empty slot nobody else is waiting on
    fn release_if_unused(&self, key: &str, slot: &Slot<C>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map plus the caller's
        if let Some(current) = slots.get(key)
            && Arc::ptr_eq(current, slot)
            && Arc::strong_count(slot) == 2
        {
            slots.remove(key);
        }
    }

    /// The cached connection for `key`, if it is still alive
    pub async fn cached(&self, key: &str) -> Option<Arc<C>> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.get(key).cloned()
        }?;
        let guard = slot.lock().await;
        guard.as_ref().filter(|c| c.is_alive()).cloned()
    }

    pub async fn evict(&self, key: &str) -> Option<Arc<C>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.remove(key)
        }?;
        let mut guard = slot.lock().await;
        guard.take()
    }

    /// Addresses with a cached or in-flight connection
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControlError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeConn {
        alive: AtomicBool,
    }

    impl Liveness for FakeConn {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_concurrent_connect_opens_once() {
        let manager = Arc::new(ConnectionManager::<FakeConn>::new());
        let opened = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let manager = manager.clone();
            let opened = opened.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .get_or_connect("192.168.1.10", || async move {
                        opened.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(FakeConn {
                            alive: AtomicBool::new(true),
                        })
                    })
                    .await
                    .unwrap()
            }));
        }

        let a = handles.remove(0).await.unwrap();
        let b = handles.remove(0).await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_dead_connection_is_replaced() {
        let manager = ConnectionManager::<FakeConn>::new();
        let first = manager
            .get_or_connect("tv", || async {
                Ok(FakeConn {
                    alive: AtomicBool::new(true),
                })
            })
            .await
            .unwrap();
        first.alive.store(false, Ordering::SeqCst);
        assert!(manager.cached("tv").await.is_none());

        let second = manager
            .get_or_connect("tv", || async {
                Ok(FakeConn {
                    alive: AtomicBool::new(true),
                })
            })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(manager.cached("tv").await.is_some());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_cached() {
        let manager = ConnectionManager::<FakeConn>::new();
        let result = manager
            .get_or_connect("tv", || async {
                Err(ControlError::Unreachable("tv".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(manager.cached("tv").await.is_none());
        assert!(manager.is_empty());
        assert!(manager.evict("tv").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_addresses_leave_no_slots() {
        let manager = ConnectionManager::<FakeConn>::new();
        for i in 0..10 {
            let host = format!("10.0.0.{}", i);
            let result = manager
                .get_or_connect(&host, || async {
                    Err(ControlError::Unreachable("tv".to_string()))
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(manager.len(), 0);

        manager
            .get_or_connect("10.0.0.1", || async {
                Ok(FakeConn {
                    alive: AtomicBool::new(true),
                })
            })
            .await
            .unwrap();
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_waiter_retries_after_failed_connect() {
        let manager = Arc::new(ConnectionManager::<FakeConn>::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let connect = |manager: Arc<ConnectionManager<FakeConn>>, attempts: Arc<AtomicUsize>| async move {
            manager
                .get_or_connect("tv", || async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    if n == 0 {
                        Err(ControlError::Unreachable("tv".to_string()))
                    } else {
                        Ok(FakeConn {
                            alive: AtomicBool::new(true),
                        })
                    }
                })
                .await
        };

        let (first, second) = tokio::join!(
            connect(manager.clone(), attempts.clone()),
            connect(manager.clone(), attempts.clone())
        );
        assert!(first.is_err());
        assert!(second.is_ok());
        assert_eq!(manager.len(), 1);
        assert!(manager.cached("tv").await.is_some());
    }
}

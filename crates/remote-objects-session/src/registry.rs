//! Session namespaces with idle expiry.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use remote_objects_core::Uid;
use tokio::time::Instant;

/// Registry error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session registry is poisoned")]
    Poisoned,
}

struct Tables<N> {
    namespaces: HashMap<Uid, Arc<Mutex<N>>>,
    deadlines: HashMap<Uid, Instant>,
}

/// Namespaces keyed by uid, each with an expiry deadline.
///
/// Both tables sit behind one lock so they never disagree. Expired sessions
/// are only removed by [`SessionRegistry::sweep`]; there is no timer.
pub struct SessionRegistry<N> {
    ttl: Duration,
    tables: Mutex<Tables<N>>,
}

impl<N> SessionRegistry<N> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tables: Mutex::new(Tables {
                namespaces: HashMap::new(),
                deadlines: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables<N>>, RegistryError> {
        self.tables.lock().map_err(|_| RegistryError::Poisoned)
    }

    /// Push the deadline of `uid` to now + TTL and return its namespace,
    /// creating it with `create` on first sight.
    ///
    /// # Errors
    /// Returns error if the registry lock is poisoned.
    pub fn touch(
        &self,
        uid: &Uid,
        create: impl FnOnce() -> N,
    ) -> Result<Arc<Mutex<N>>, RegistryError> {
        let mut tables = self.tables()?;
        tables.deadlines.insert(uid.clone(), Instant::now() + self.ttl);

        let namespace = tables
            .namespaces
            .entry(uid.clone())
            .or_insert_with(|| {
                tracing::info!(%uid, "Session created");
                Arc::new(Mutex::new(create()))
            });
        Ok(Arc::clone(namespace))
    }

    /// Evict every session whose deadline has passed.
    ///
    /// # Errors
    /// Returns error if the registry lock is poisoned.
    pub fn sweep(&self) -> Result<usize, RegistryError> {
        let now = Instant::now();
        let mut tables = self.tables()?;

        let expired: Vec<Uid> = tables
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(uid, _)| uid.clone())
            .collect();

        for uid in &expired {
            tables.deadlines.remove(uid);
            tables.namespaces.remove(uid);
            tracing::info!(%uid, "Session expired");
        }
        Ok(expired.len())
    }

    /// Evict `uid` immediately. Returns whether it existed.
    ///
    /// # Errors
    /// Returns error if the registry lock is poisoned.
    pub fn destroy(&self, uid: &Uid) -> Result<bool, RegistryError> {
        let mut tables = self.tables()?;
        tables.deadlines.remove(uid);
        let existed = tables.namespaces.remove(uid).is_some();
        if existed {
            tracing::info!(%uid, "Session destroyed");
        }
        Ok(existed)
    }

    #[must_use]
    pub fn contains(&self, uid: &Uid) -> bool {
        self.tables()
            .is_ok_and(|tables| tables.namespaces.contains_key(uid))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables().map_or(0, |tables| tables.namespaces.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn test_expiry_after_ttl() {
        let registry = SessionRegistry::new(TTL);
        let uid = Uid::from("a");
        registry.touch(&uid, || 0_u32).unwrap();

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(registry.sweep().unwrap(), 0);
        assert!(registry.contains(&uid));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(registry.sweep().unwrap(), 1);
        assert!(!registry.contains(&uid));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_extends_deadline() {
        let registry = SessionRegistry::new(TTL);
        let uid = Uid::from("a");
        registry.touch(&uid, || 0_u32).unwrap();

        tokio::time::advance(TTL / 2).await;
        registry.touch(&uid, || unreachable!()).unwrap();

        tokio::time::advance(TTL / 2 + Duration::from_secs(1)).await;
        assert_eq!(registry.sweep().unwrap(), 0);
        assert!(registry.contains(&uid));
    }

    #[tokio::test]
    async fn test_namespace_is_shared_until_destroyed() {
        let registry = SessionRegistry::new(TTL);
        let uid = Uid::from("a");

        let first = registry.touch(&uid, || 1_u32).unwrap();
        *first.lock().unwrap() = 7;
        let second = registry.touch(&uid, || 1_u32).unwrap();
        assert_eq!(*second.lock().unwrap(), 7);

        assert!(registry.destroy(&uid).unwrap());
        assert!(!registry.destroy(&uid).unwrap());

        let fresh = registry.touch(&uid, || 1_u32).unwrap();
        assert_eq!(*fresh.lock().unwrap(), 1);
        assert_eq!(registry.len(), 1);
    }
}

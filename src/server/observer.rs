use std::sync::Arc;

use async_trait::async_trait;

use crate::BoxError;

use super::server::HttpServer;

/// Lifecycle participant notified when the server starts and stops.
///
/// Both notifications may suspend and may fail. The server runs all observers
/// concurrently, waits for every one of them, and aggregates failures instead
/// of short-circuiting on the first.
#[async_trait]
pub trait ServerObserver: Send + Sync {
    async fn on_start(&self, server: &HttpServer) -> Result<(), BoxError>;

    async fn on_stop(&self, server: &HttpServer) -> Result<(), BoxError>;
}

/// Insertion-ordered set of observers; the attach order is the notification
/// fan-out order. Attaching the same observer twice is refused.
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn ServerObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when this exact observer is already present.
    pub fn insert(&mut self, observer: Arc<dyn ServerObserver>) -> bool {
        if self.contains(&observer) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    pub fn contains(&self, observer: &Arc<dyn ServerObserver>) -> bool {
        self.observers.iter().any(|existing| Arc::ptr_eq(existing, observer))
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn ServerObserver>> {
        self.observers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullObserver;

    #[async_trait]
    impl ServerObserver for NullObserver {
        async fn on_start(&self, _server: &HttpServer) -> Result<(), BoxError> {
            Ok(())
        }
        async fn on_stop(&self, _server: &HttpServer) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[test]
    fn preserves_insertion_order() {
        let first: Arc<dyn ServerObserver> = Arc::new(NullObserver);
        let second: Arc<dyn ServerObserver> = Arc::new(NullObserver);

        let mut set = ObserverSet::new();
        assert!(set.insert(first.clone()));
        assert!(set.insert(second.clone()));

        let snapshot = set.snapshot();
        assert!(Arc::ptr_eq(&snapshot[0], &first));
        assert!(Arc::ptr_eq(&snapshot[1], &second));
    }

    #[test]
    fn refuses_the_same_observer_twice() {
        let observer: Arc<dyn ServerObserver> = Arc::new(NullObserver);

        let mut set = ObserverSet::new();
        assert!(set.insert(observer.clone()));
        assert!(!set.insert(observer));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn distinct_observers_of_the_same_type_are_accepted() {
        let mut set = ObserverSet::new();
        assert!(set.insert(Arc::new(NullObserver)));
        assert!(set.insert(Arc::new(NullObserver)));
        assert_eq!(set.len(), 2);
    }
}

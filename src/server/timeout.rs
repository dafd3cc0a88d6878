use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::client::ClientId;

use super::registry::SharedState;

/// Deadline bookkeeping for live connections.
///
/// Maps each client to its earliest deadline, a wall-clock second, and yields
/// expired clients in nondecreasing deadline order. Clients schedule their own
/// deadlines through [`TimeoutHandle`]; the server sweeps the wheel on every
/// tick and closes whoever overslept.
pub(crate) struct TimeoutWheel {
    deadlines: HashMap<ClientId, u64>,
    order: BTreeSet<(u64, ClientId)>,
}

impl TimeoutWheel {
    pub(crate) fn new() -> Self {
        Self { deadlines: HashMap::new(), order: BTreeSet::new() }
    }

    /// Adds a deadline, replacing any existing one for the same client.
    pub(crate) fn insert(&mut self, id: ClientId, deadline: u64) {
        if let Some(old) = self.deadlines.insert(id, deadline) {
            self.order.remove(&(old, id));
        }
        self.order.insert((deadline, id));
    }

    /// Moves an existing deadline; does nothing for unknown clients.
    pub(crate) fn update(&mut self, id: ClientId, deadline: u64) {
        if self.deadlines.contains_key(&id) {
            self.insert(id, deadline);
        }
    }

    pub(crate) fn remove(&mut self, id: ClientId) {
        if let Some(deadline) = self.deadlines.remove(&id) {
            self.order.remove(&(deadline, id));
        }
    }

    /// Removes and returns every client whose deadline is at or before `now`,
    /// earliest first. Deadlines inserted while the batch is being processed
    /// belong to the next sweep, never to the batch that is already out.
    pub(crate) fn extract(&mut self, now: u64) -> Vec<ClientId> {
        let mut expired = Vec::new();
        while let Some(&(deadline, id)) = self.order.first() {
            if deadline > now {
                break;
            }
            self.order.pop_first();
            self.deadlines.remove(&id);
            expired.push(id);
        }
        expired
    }

    pub(crate) fn contains(&self, id: ClientId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.deadlines.len()
    }
}

/// Handle through which clients schedule their own idle deadlines.
///
/// Deadlines are wall-clock seconds, normally `handle.now() + budget`. The
/// wheel itself stays with the server; a client only ever touches its own
/// entry and the entry dies with the client's registration.
#[derive(Clone)]
pub struct TimeoutHandle {
    shared: Arc<Mutex<SharedState>>,
}

impl TimeoutHandle {
    pub(crate) fn new(shared: Arc<Mutex<SharedState>>) -> Self {
        Self { shared }
    }

    pub fn insert(&self, id: ClientId, deadline: u64) {
        self.lock().wheel.insert(id, deadline);
    }

    pub fn update(&self, id: ClientId, deadline: u64) {
        self.lock().wheel.update(id, deadline);
    }

    pub fn remove(&self, id: ClientId) {
        self.lock().wheel.remove(id);
    }

    /// Current wall-clock time in whole seconds.
    pub fn now(&self) -> u64 {
        now_seconds()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ClientId> {
        (0..n).map(|_| ClientId::next()).collect()
    }

    #[test]
    fn extract_yields_in_deadline_order() {
        let mut wheel = TimeoutWheel::new();
        let id = ids(3);
        wheel.insert(id[0], 30);
        wheel.insert(id[1], 10);
        wheel.insert(id[2], 20);

        assert_eq!(wheel.extract(30), vec![id[1], id[2], id[0]]);
        assert_eq!(wheel.len(), 0);
    }

    #[test]
    fn extract_includes_the_boundary_second() {
        let mut wheel = TimeoutWheel::new();
        let id = ids(2);
        wheel.insert(id[0], 10);
        wheel.insert(id[1], 11);

        assert_eq!(wheel.extract(10), vec![id[0]]);
        assert!(wheel.contains(id[1]));
    }

    #[test]
    fn ties_are_all_extracted() {
        let mut wheel = TimeoutWheel::new();
        let id = ids(2);
        wheel.insert(id[0], 7);
        wheel.insert(id[1], 7);

        let expired = wheel.extract(7);
        assert_eq!(expired.len(), 2);
        assert!(expired.contains(&id[0]) && expired.contains(&id[1]));
    }

    #[test]
    fn insert_replaces_an_existing_deadline() {
        let mut wheel = TimeoutWheel::new();
        let id = ClientId::next();
        wheel.insert(id, 10);
        wheel.insert(id, 50);

        assert_eq!(wheel.extract(10), Vec::<ClientId>::new());
        assert_eq!(wheel.extract(50), vec![id]);
        assert_eq!(wheel.len(), 0);
    }

    #[test]
    fn update_ignores_unknown_clients() {
        let mut wheel = TimeoutWheel::new();
        wheel.update(ClientId::next(), 5);
        assert_eq!(wheel.len(), 0);
    }

    #[test]
    fn remove_clears_the_deadline() {
        let mut wheel = TimeoutWheel::new();
        let id = ClientId::next();
        wheel.insert(id, 5);
        wheel.remove(id);

        assert!(!wheel.contains(id));
        assert_eq!(wheel.extract(5), Vec::<ClientId>::new());
    }

    #[test]
    fn reinsert_after_extraction_waits_for_the_next_sweep() {
        let mut wheel = TimeoutWheel::new();
        let id = ClientId::next();
        wheel.insert(id, 5);

        assert_eq!(wheel.extract(5), vec![id]);

        // A deferred client goes back in one second ahead.
        wheel.insert(id, 6);
        assert_eq!(wheel.extract(5), Vec::<ClientId>::new());
        assert_eq!(wheel.extract(6), vec![id]);
    }
}

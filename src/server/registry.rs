use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{Client, ClientId};

use super::admission::NetworkKey;
use super::timeout::TimeoutWheel;

/// Outcome of the admission checks for a newly accepted client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdmissionOutcome {
    Admitted,
    /// The global connection limit is exhausted; nothing was counted.
    GlobalLimit,
    /// The remote's network block is at its limit. The global count was
    /// already taken and is returned when the admission record is released.
    PerIpLimit,
    /// The client's close notification arrived before admission ran.
    AlreadyClosed,
}

#[derive(Default)]
struct Admission {
    counted: bool,
    network: Option<NetworkKey>,
}

/// Bookkeeping for live clients: the id map, the global connection count and
/// the per-network counts backing the admission checks.
///
/// Every tracked client owns an admission record stating exactly what was
/// counted for it, so a close notification releases no more and no less,
/// including for clients turned away before registration.
pub(crate) struct ClientRegistry {
    clients: HashMap<ClientId, Arc<dyn Client>>,
    admissions: HashMap<ClientId, Admission>,
    per_network: HashMap<NetworkKey, usize>,
    client_count: usize,
}

impl ClientRegistry {
    pub(crate) fn new() -> Self {
        Self {
            clients: HashMap::new(),
            admissions: HashMap::new(),
            per_network: HashMap::new(),
            client_count: 0,
        }
    }

    /// Opens the admission record for a client about to be admitted. The
    /// client's close callback releases it.
    pub(crate) fn track(&mut self, id: ClientId) {
        self.admissions.insert(id, Admission::default());
    }

    /// Runs the admission checks and, on success, registers the client.
    ///
    /// Comparisons use the pre-increment counts: with a limit of N the Nth
    /// client is admitted and the (N+1)th rejected. A limit of zero does not
    /// limit. A per-IP rejection leaves the global count incremented until
    /// the record is released.
    pub(crate) fn admit(
        &mut self,
        client: Arc<dyn Client>,
        network: Option<NetworkKey>,
        connection_limit: usize,
        per_ip_limit: usize,
    ) -> AdmissionOutcome {
        let id = client.id();
        if !self.admissions.contains_key(&id) {
            return AdmissionOutcome::AlreadyClosed;
        }

        if connection_limit != 0 && self.client_count == connection_limit {
            return AdmissionOutcome::GlobalLimit;
        }
        self.client_count += 1;
        if let Some(record) = self.admissions.get_mut(&id) {
            record.counted = true;
        }

        if let Some(key) = network {
            let connections = self.per_network.get(&key).copied().unwrap_or(0);
            if per_ip_limit != 0 && connections == per_ip_limit {
                return AdmissionOutcome::PerIpLimit;
            }
            self.per_network.insert(key, connections + 1);
            if let Some(record) = self.admissions.get_mut(&id) {
                record.network = Some(key);
            }
        }

        self.clients.insert(id, client);
        AdmissionOutcome::Admitted
    }

    /// Releases whatever `admit` counted for `id`. Idempotent, and safe for
    /// clients that never made it past the limits.
    pub(crate) fn release(&mut self, id: ClientId) -> bool {
        let Some(record) = self.admissions.remove(&id) else {
            return false;
        };
        self.clients.remove(&id);
        if record.counted {
            self.client_count -= 1;
        }
        if let Some(key) = record.network {
            match self.per_network.get_mut(&key) {
                Some(count) if *count > 1 => *count -= 1,
                _ => {
                    self.per_network.remove(&key);
                }
            }
        }
        true
    }

    pub(crate) fn get(&self, id: ClientId) -> Option<&Arc<dyn Client>> {
        self.clients.get(&id)
    }

    pub(crate) fn clients(&self) -> impl Iterator<Item = &Arc<dyn Client>> {
        self.clients.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn client_count(&self) -> usize {
        self.client_count
    }

    #[cfg(test)]
    pub(crate) fn network_count(&self, key: NetworkKey) -> usize {
        self.per_network.get(&key).copied().unwrap_or(0)
    }
}

/// Registry and timeout wheel behind the server's single state lock. The
/// admission check and the timeout sweep serialize here, which is what keeps
/// the counts and the wheel membership consistent with each other.
pub(crate) struct SharedState {
    pub(crate) registry: ClientRegistry,
    pub(crate) wheel: TimeoutWheel,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self { registry: ClientRegistry::new(), wheel: TimeoutWheel::new() }
    }

    /// Deregisters a closed client everywhere.
    pub(crate) fn release(&mut self, id: ClientId) {
        self.registry.release(id);
        self.wheel.remove(id);
    }
}

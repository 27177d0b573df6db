use crate::pressure::{SpacePressure, SpacePressureThresholds};
use crate::report::{OwnerUsage, SpaceReport};
use graphstats_lru::LruIndex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Identifier of a registered space owner.
pub type OwnerId = u64;

struct OwnerEntry {
    name: String,
    granted: u64,
}

struct State {
    granted: u64,
    owners: HashMap<OwnerId, OwnerEntry>,
    /// Owners ordered by their last successful request, oldest first.
    recency: LruIndex<OwnerId, ()>,
}

struct Inner {
    budget: u64,
    thresholds: SpacePressureThresholds,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request(&self, owner: OwnerId, bytes: u64) -> bool {
        let mut guard = self.state();
        let state = &mut *guard;
        let granted_total = state.granted;
        let Some(entry) = state.owners.get_mut(&owner) else {
            tracing::warn!(
                target: "graphstats.space",
                owner,
                bytes,
                "space request from unregistered owner"
            );
            return false;
        };
        if bytes == 0 {
            return true;
        }

        let Some(next_total) = granted_total.checked_add(bytes) else {
            return false;
        };
        if next_total > self.budget {
            tracing::debug!(
                target: "graphstats.space",
                owner,
                name = %entry.name,
                bytes,
                granted = granted_total,
                budget = self.budget,
                "space request denied"
            );
            return false;
        }

        entry.granted += bytes;
        state.granted = next_total;
        state.recency.put(owner, ());
        true
    }

    fn release(&self, owner: OwnerId, bytes: u64) {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(entry) = state.owners.get_mut(&owner) else {
            return;
        };
        let released = if bytes > entry.granted {
            tracing::warn!(
                target: "graphstats.space",
                owner,
                name = %entry.name,
                bytes,
                granted = entry.granted,
                "owner released more space than it was granted"
            );
            entry.granted
        } else {
            bytes
        };
        entry.granted -= released;
        state.granted -= released;
    }

    fn release_all(&self, owner: OwnerId) -> u64 {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(entry) = state.owners.get_mut(&owner) else {
            return 0;
        };
        let released = std::mem::take(&mut entry.granted);
        state.granted -= released;
        released
    }

    fn granted_to(&self, owner: OwnerId) -> u64 {
        self.state()
            .owners
            .get(&owner)
            .map(|entry| entry.granted)
            .unwrap_or(0)
    }

    fn unregister(&self, owner: OwnerId) {
        let mut guard = self.state();
        let state = &mut *guard;
        if let Some(entry) = state.owners.remove(&owner) {
            state.granted -= entry.granted;
        }
        state.recency.remove(&owner);
    }
}

/// Arbiter of one global in-memory budget, shared by reference counting.
///
/// Cloning is cheap and every clone meters the same budget.
#[derive(Clone)]
pub struct SpaceManager {
    inner: Arc<Inner>,
}

impl SpaceManager {
    pub fn new(budget_bytes: u64) -> Self {
        Self::with_thresholds(budget_bytes, SpacePressureThresholds::default())
    }

    pub fn with_thresholds(budget_bytes: u64, thresholds: SpacePressureThresholds) -> Self {
        Self {
            inner: Arc::new(Inner {
                budget: budget_bytes,
                thresholds,
                next_id: AtomicU64::new(1),
                state: Mutex::new(State {
                    granted: 0,
                    owners: HashMap::new(),
                    recency: LruIndex::new(),
                }),
            }),
        }
    }

    pub fn budget(&self) -> u64 {
        self.inner.budget
    }

    /// Registers a new owner. Space can only be granted to registered owners.
    pub fn register(&self, name: impl Into<String>) -> SpaceRegistration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        self.inner.state().owners.insert(
            id,
            OwnerEntry {
                name: name.clone(),
                granted: 0,
            },
        );
        SpaceRegistration {
            handle: SpaceHandle {
                owner: id,
                manager: Arc::downgrade(&self.inner),
            },
            name,
        }
    }

    /// Whether `bytes` more could be granted right now.
    ///
    /// This is only a hint: another owner may take the space before a
    /// following [`SpaceManager::request`]. Use `request` when the answer must
    /// hold.
    pub fn is_available(&self, bytes: u64) -> bool {
        let state = self.inner.state();
        state
            .granted
            .checked_add(bytes)
            .is_some_and(|total| total <= self.inner.budget)
    }

    /// Grants `bytes` to `owner`, or denies without side effects.
    pub fn request(&self, owner: OwnerId, bytes: u64) -> bool {
        self.inner.request(owner, bytes)
    }

    /// Returns `bytes` previously granted to `owner`.
    pub fn release(&self, owner: OwnerId, bytes: u64) {
        self.inner.release(owner, bytes)
    }

    /// Returns everything granted to `owner`, reporting how much that was.
    pub fn release_all(&self, owner: OwnerId) -> u64 {
        self.inner.release_all(owner)
    }

    /// Sum of all outstanding grants.
    pub fn granted(&self) -> u64 {
        self.inner.state().granted
    }

    pub fn granted_to(&self, owner: OwnerId) -> u64 {
        self.inner.granted_to(owner)
    }

    pub fn available(&self) -> u64 {
        self.inner.budget.saturating_sub(self.granted())
    }

    /// Owners currently holding space, least recently granted first.
    ///
    /// `exclude` is typically the owner looking for room, which should not be
    /// asked to give up its own cache.
    pub fn eviction_candidates(&self, exclude: Option<OwnerId>) -> Vec<OwnerId> {
        let state = self.inner.state();
        state
            .recency
            .iter()
            .map(|(owner, _)| *owner)
            .filter(|owner| Some(*owner) != exclude)
            .filter(|owner| {
                state
                    .owners
                    .get(owner)
                    .is_some_and(|entry| entry.granted > 0)
            })
            .collect()
    }

    pub fn pressure(&self) -> SpacePressure {
        self.pressure_for(self.granted())
    }

    /// Snapshot of the budget and every owner's share.
    pub fn report(&self) -> SpaceReport {
        let (granted, mut owners) = {
            let state = self.inner.state();
            let owners: Vec<OwnerUsage> = state
                .owners
                .iter()
                .map(|(&id, entry)| OwnerUsage {
                    id,
                    name: entry.name.clone(),
                    granted_bytes: entry.granted,
                })
                .collect();
            (state.granted, owners)
        };

        owners.sort_by(|a, b| {
            b.granted_bytes
                .cmp(&a.granted_bytes)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });

        SpaceReport {
            budget_bytes: self.inner.budget,
            granted_bytes: granted,
            pressure: self.pressure_for(granted),
            owners,
        }
    }

    fn pressure_for(&self, granted: u64) -> SpacePressure {
        let budget = self.inner.budget.max(1);
        let ratio = (granted as f64) / (budget as f64);
        self.inner.thresholds.level_for_ratio(ratio)
    }
}

impl std::fmt::Debug for SpaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("SpaceManager")
            .field("budget", &self.inner.budget)
            .field("granted", &state.granted)
            .field("owners", &state.owners.len())
            .finish()
    }
}

/// Owner-scoped access to a [`SpaceManager`].
///
/// Handles are cheap to clone and are what a cache holds to reserve space
/// block by block. Once the manager is gone, requests are denied and releases
/// are no-ops.
#[derive(Clone)]
pub struct SpaceHandle {
    owner: OwnerId,
    manager: Weak<Inner>,
}

impl SpaceHandle {
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn request(&self, bytes: u64) -> bool {
        match self.manager.upgrade() {
            Some(manager) => manager.request(self.owner, bytes),
            None => false,
        }
    }

    pub fn release(&self, bytes: u64) {
        if let Some(manager) = self.manager.upgrade() {
            manager.release(self.owner, bytes);
        }
    }

    pub fn release_all(&self) -> u64 {
        match self.manager.upgrade() {
            Some(manager) => manager.release_all(self.owner),
            None => 0,
        }
    }

    pub fn granted(&self) -> u64 {
        match self.manager.upgrade() {
            Some(manager) => manager.granted_to(self.owner),
            None => 0,
        }
    }

    pub fn is_available(&self, bytes: u64) -> bool {
        match self.manager.upgrade() {
            Some(manager) => {
                let state = manager.state();
                state
                    .granted
                    .checked_add(bytes)
                    .is_some_and(|total| total <= manager.budget)
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for SpaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceHandle")
            .field("owner", &self.owner)
            .field("granted", &self.granted())
            .finish()
    }
}

/// Registration kept by the owning component; dropping it releases all of
/// the owner's space and unregisters it.
pub struct SpaceRegistration {
    handle: SpaceHandle,
    name: String,
}

impl SpaceRegistration {
    pub fn id(&self) -> OwnerId {
        self.handle.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> SpaceHandle {
        self.handle.clone()
    }
}

impl std::fmt::Debug for SpaceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceRegistration")
            .field("id", &self.handle.owner)
            .field("name", &self.name)
            .field("granted", &self.handle.granted())
            .finish()
    }
}

impl Drop for SpaceRegistration {
    fn drop(&mut self) {
        if let Some(manager) = self.handle.manager.upgrade() {
            manager.unregister(self.handle.owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_until_budget_then_denies() {
        let manager = SpaceManager::new(100);
        let a = manager.register("a");
        assert!(manager.request(a.id(), 60));
        assert!(manager.request(a.id(), 40));
        assert!(!manager.request(a.id(), 1));
        assert_eq!(manager.granted(), 100);
        assert!(!manager.is_available(1));
        assert!(manager.is_available(0));
    }

    #[test]
    fn denial_has_no_side_effects() {
        let manager = SpaceManager::new(100);
        let a = manager.register("a");
        let b = manager.register("b");
        assert!(manager.request(a.id(), 90));
        assert!(!manager.request(b.id(), 20));
        assert_eq!(manager.granted_to(b.id()), 0);
        assert_eq!(manager.granted(), 90);
        assert_eq!(manager.eviction_candidates(None), vec![a.id()]);
    }

    #[test]
    fn unregistered_owner_is_denied() {
        let manager = SpaceManager::new(100);
        assert!(!manager.request(12345, 1));
        assert_eq!(manager.granted(), 0);
    }

    #[test]
    fn over_release_is_clamped_to_grant() {
        let manager = SpaceManager::new(100);
        let a = manager.register("a");
        let b = manager.register("b");
        assert!(manager.request(a.id(), 30));
        assert!(manager.request(b.id(), 30));
        manager.release(a.id(), 50);
        assert_eq!(manager.granted_to(a.id()), 0);
        assert_eq!(manager.granted(), 30);
    }

    #[test]
    fn dropping_registration_returns_its_space() {
        let manager = SpaceManager::new(100);
        let a = manager.register("a");
        let handle = a.handle();
        assert!(handle.request(70));
        drop(a);
        assert_eq!(manager.granted(), 0);
        assert!(!handle.request(1));
        assert!(manager.report().owners.is_empty());
    }
}

use std::collections::HashMap;

/// A single resource class an execution backend consumes admission slots
/// from. `JobsTotal` is consumed by every job regardless of backend; the
/// others are additive, declared by whichever backend runs the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    JobsTotal,
    Threads,
    Processes,
    Cluster,
}

/// Capacity for a single class; `None` means unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Capacity(pub Option<u64>);

impl Capacity {
    pub const UNBOUNDED: Capacity = Capacity(None);

    pub fn bounded(n: u64) -> Self {
        Capacity(Some(n))
    }
}

/// Counted-semaphore registry of admission slots, one counter per
/// [`ResourceClass`]. Owned exclusively by the scheduler thread; no internal
/// locking.
#[derive(Debug)]
pub struct ResourceLedger {
    capacity: HashMap<ResourceClass, Option<u64>>,
    remaining: HashMap<ResourceClass, Option<u64>>,
}

impl ResourceLedger {
    pub fn new(
        jobs_total: Capacity,
        threads: Capacity,
        processes: Capacity,
        cluster: Capacity,
    ) -> Self {
        let mut capacity = HashMap::new();
        capacity.insert(ResourceClass::JobsTotal, jobs_total.0);
        capacity.insert(ResourceClass::Threads, threads.0);
        capacity.insert(ResourceClass::Processes, processes.0);
        capacity.insert(ResourceClass::Cluster, cluster.0);
        let remaining = capacity.clone();
        Self { capacity, remaining }
    }

    /// True iff at least `n` slots remain in `class`.
    pub fn has(&self, class: ResourceClass, n: u64) -> bool {
        match self.remaining.get(&class).copied().flatten() {
            Some(remaining) => remaining >= n,
            None => true,
        }
    }

    /// Attempt to acquire `n` slots across every listed class, all-or-nothing.
    /// Returns `true` and decrements every class on success; on failure no
    /// class is touched.
    pub fn acquire_all(&mut self, classes: &[ResourceClass], n: u64) -> bool {
        if !classes.iter().all(|c| self.has(*c, n)) {
            return false;
        }
        for class in classes {
            if let Some(remaining) = self.remaining.get_mut(class) {
                if let Some(r) = remaining {
                    *r -= n;
                }
            }
        }
        true
    }

    /// Release `n` slots back to every listed class. Always succeeds.
    pub fn release_all(&mut self, classes: &[ResourceClass], n: u64) {
        for class in classes {
            if let Some(remaining) = self.remaining.get_mut(class) {
                let cap = self.capacity.get(class).copied().flatten();
                if let Some(r) = remaining {
                    *r = cap.map(|c| (*r + n).min(c)).unwrap_or(*r + n);
                }
            }
        }
    }

    /// Remaining slots for a class, or `None` if unbounded.
    pub fn remaining(&self, class: ResourceClass) -> Option<u64> {
        self.remaining.get(&class).copied().flatten()
    }

    /// Capacity configured for a class, or `None` if unbounded.
    pub fn capacity(&self, class: ResourceClass) -> Option<u64> {
        self.capacity.get(&class).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trip() {
        let mut ledger = ResourceLedger::new(
            Capacity::bounded(2),
            Capacity::UNBOUNDED,
            Capacity::UNBOUNDED,
            Capacity::UNBOUNDED,
        );
        assert!(ledger.acquire_all(&[ResourceClass::JobsTotal], 1));
        assert_eq!(ledger.remaining(ResourceClass::JobsTotal), Some(1));
        assert!(ledger.acquire_all(&[ResourceClass::JobsTotal], 1));
        assert_eq!(ledger.remaining(ResourceClass::JobsTotal), Some(0));
        assert!(!ledger.acquire_all(&[ResourceClass::JobsTotal], 1));
        ledger.release_all(&[ResourceClass::JobsTotal], 1);
        assert_eq!(ledger.remaining(ResourceClass::JobsTotal), Some(1));
    }

    #[test]
    fn conjunction_is_all_or_nothing() {
        let mut ledger = ResourceLedger::new(
            Capacity::UNBOUNDED,
            Capacity::UNBOUNDED,
            Capacity::UNBOUNDED,
            Capacity::bounded(0),
        );
        let classes = [ResourceClass::JobsTotal, ResourceClass::Cluster];
        assert!(!ledger.acquire_all(&classes, 1));
        // jobs_total must be untouched since cluster had no slots.
        assert_eq!(ledger.remaining(ResourceClass::JobsTotal), None);
    }

    #[test]
    fn unbounded_never_depletes() {
        let mut ledger = ResourceLedger::new(
            Capacity::UNBOUNDED,
            Capacity::UNBOUNDED,
            Capacity::UNBOUNDED,
            Capacity::UNBOUNDED,
        );
        for _ in 0..10_000 {
            assert!(ledger.acquire_all(&[ResourceClass::Threads], 1));
        }
        assert_eq!(ledger.remaining(ResourceClass::Threads), None);
    }

    #[test]
    fn release_does_not_exceed_capacity() {
        let mut ledger = ResourceLedger::new(
            Capacity::bounded(1),
            Capacity::UNBOUNDED,
            Capacity::UNBOUNDED,
            Capacity::UNBOUNDED,
        );
        ledger.release_all(&[ResourceClass::JobsTotal], 5);
        assert_eq!(ledger.remaining(ResourceClass::JobsTotal), Some(1));
    }
}

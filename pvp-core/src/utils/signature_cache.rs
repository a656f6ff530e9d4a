use std::collections::{HashSet, VecDeque};

/// Bounded set of transaction signatures already handled, with FIFO eviction.
///
/// This is a best-effort, process-local dedup layer. Correctness never
/// depends on it: the store-level existence and duplicate checks are what
/// make event replay safe. The cache only saves the round-trips.
pub struct SignatureCache {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl SignatureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record a signature. Returns false if it was already present.
    pub fn insert(&mut self, signature: &str) -> bool {
        if self.seen.contains(signature) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.order.push_back(signature.to_string());
        self.seen.insert(signature.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduplicates_signatures() {
        let mut cache = SignatureCache::new(10);
        assert!(cache.insert("sig-a"));
        assert!(!cache.insert("sig-a"));
        assert!(cache.insert("sig-b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut cache = SignatureCache::new(3);
        assert!(cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(cache.insert("c"));
        assert!(cache.insert("d")); // evicts "a"
        assert_eq!(cache.len(), 3);
        assert!(cache.insert("a")); // "a" was forgotten
        assert!(!cache.insert("c"));
    }
}

use crate::models::ExperimentId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of experiment identifiers
///
/// Ids are handed out in increasing order and never reused by one generator.
/// Share a single generator between everything that builds experiments.
#[derive(Debug)]
pub struct ExperimentIdGenerator {
    next: AtomicU64,
}

impl Default for ExperimentIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: ExperimentId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> ExperimentId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_increase() {
        let ids = ExperimentIdGenerator::starting_at(7);
        assert_eq!(ids.next_id(), 7);
        assert_eq!(ids.next_id(), 8);
    }

    #[tokio::test]
    async fn test_ids_unique_across_tasks() {
        let ids = Arc::new(ExperimentIdGenerator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = ids.clone();
            handles.push(tokio::spawn(async move {
                (0..100).map(|_| ids.next_id()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 800);
    }
}

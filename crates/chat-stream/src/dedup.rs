use std::collections::HashSet;

use crate::chunk::Chunk;

/// Remembers the `chunk_id`s applied during one submission.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<u64>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the chunk should be applied, recording its id.
    /// Chunks without an id always pass.
    pub fn admit(&mut self, chunk: &Chunk) -> bool {
        match chunk.sequence_id() {
            Some(id) => self.seen.insert(id),
            None => true,
        }
    }

    /// Forgets every recorded id.
    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::AgentNotice;

    #[test]
    fn repeated_id_is_rejected() {
        let mut dedup = Deduplicator::new();
        assert!(dedup.admit(&Chunk::token("a").with_sequence_id(1)));
        assert!(!dedup.admit(&Chunk::token("a").with_sequence_id(1)));
        assert!(dedup.admit(&Chunk::token("b").with_sequence_id(2)));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn chunks_without_id_always_pass() {
        let mut dedup = Deduplicator::new();
        assert!(dedup.admit(&Chunk::token("a")));
        assert!(dedup.admit(&Chunk::token("a")));
        let notice = Chunk::error(AgentNotice::new("x", "y", true));
        assert!(dedup.admit(&notice));
        assert!(dedup.admit(&notice));
        assert!(dedup.is_empty());
    }

    #[test]
    fn id_zero_participates() {
        let mut dedup = Deduplicator::new();
        assert!(dedup.admit(&Chunk::token("a").with_sequence_id(0)));
        assert!(!dedup.admit(&Chunk::token("a").with_sequence_id(0)));
    }

    #[test]
    fn clear_forgets_ids() {
        let mut dedup = Deduplicator::new();
        dedup.admit(&Chunk::token("a").with_sequence_id(5));
        dedup.clear();
        assert!(dedup.admit(&Chunk::token("a").with_sequence_id(5)));
    }
}

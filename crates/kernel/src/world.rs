use blockview_common::BlockPos;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A record produced by every mutation that changed the world.
///
/// Render collaborators drain these to learn which blocks need meshing
/// without diffing the whole set each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// A block appeared at the given position.
    BlockInserted { position: BlockPos },
}

/// The local copy of the shared world.
///
/// Mutated only by the synchronization layer applying update events; render
/// and simulation code read it. Uses a BTreeSet so iteration order is stable
/// for a given version on every platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldModel {
    blocks: BTreeSet<BlockPos>,
    /// Bumped once per insert that changed the block set.
    version: u64,
    /// Pending change records, not part of the persisted shape.
    #[serde(skip)]
    event_log: Vec<WorldEvent>,
}

impl WorldModel {
    /// Create an empty world at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block. Inserting at an occupied position is not an error and
    /// leaves the world unchanged. Returns true if the block was new.
    pub fn insert_block(&mut self, position: BlockPos) -> bool {
        let fresh = self.blocks.insert(position);
        if fresh {
            self.version += 1;
            self.event_log.push(WorldEvent::BlockInserted { position });
            tracing::trace!(%position, version = self.version, "block inserted");
        }
        fresh
    }

    pub fn contains(&self, position: BlockPos) -> bool {
        self.blocks.contains(&position)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Monotonic change counter. Two reads at the same version see the same
    /// blocks in the same order.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All blocks in canonical (x, y, z) order.
    pub fn blocks(&self) -> impl ExactSizeIterator<Item = BlockPos> + '_ {
        self.blocks.iter().copied()
    }

    /// Drain and return the change log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Read-only access to the change log.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    /// Deterministic hash of the observable block set.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        for p in &self.blocks {
            mix(&mut h, &p.x.to_le_bytes());
            mix(&mut h, &p.y.to_le_bytes());
            mix(&mut h, &p.z.to_le_bytes());
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_starts_empty() {
        let w = WorldModel::new();
        assert!(w.is_empty());
        assert_eq!(w.version(), 0);
        assert_eq!(w.block_count(), 0);
    }

    #[test]
    fn insert_is_idempotent() {
        let mut once = WorldModel::new();
        once.insert_block(BlockPos::new(1, 0, 0));

        let mut twice = WorldModel::new();
        assert!(twice.insert_block(BlockPos::new(1, 0, 0)));
        assert!(!twice.insert_block(BlockPos::new(1, 0, 0)));

        assert_eq!(once.block_count(), twice.block_count());
        assert_eq!(once.version(), twice.version());
        assert_eq!(once.state_hash(), twice.state_hash());
        assert_eq!(twice.events().len(), 1);
    }

    #[test]
    fn iteration_is_canonical() {
        let mut w = WorldModel::new();
        for p in [
            BlockPos::new(3, 0, 0),
            BlockPos::new(-1, 2, 0),
            BlockPos::new(0, 0, 0),
        ] {
            w.insert_block(p);
        }
        let blocks: Vec<_> = w.blocks().collect();
        let mut sorted = blocks.clone();
        sorted.sort();
        assert_eq!(blocks, sorted);
    }

    #[test]
    fn drain_events_clears_log() {
        let mut w = WorldModel::new();
        w.insert_block(BlockPos::ORIGIN);
        w.insert_block(BlockPos::new(0, 1, 0));
        let events = w.drain_events();
        assert_eq!(
            events,
            vec![
                WorldEvent::BlockInserted {
                    position: BlockPos::ORIGIN
                },
                WorldEvent::BlockInserted {
                    position: BlockPos::new(0, 1, 0)
                },
            ]
        );
        assert!(w.events().is_empty());
        assert_eq!(w.block_count(), 2);
    }

    #[test]
    fn state_hash_independent_of_insert_order() {
        let mut a = WorldModel::new();
        a.insert_block(BlockPos::new(1, 0, 0));
        a.insert_block(BlockPos::new(0, 1, 0));

        let mut b = WorldModel::new();
        b.insert_block(BlockPos::new(0, 1, 0));
        b.insert_block(BlockPos::new(1, 0, 0));

        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn serde_skips_event_log() {
        let mut w = WorldModel::new();
        w.insert_block(BlockPos::new(2, 2, 2));
        let json = serde_json::to_string(&w).unwrap();
        let back: WorldModel = serde_json::from_str(&json).unwrap();
        assert!(back.contains(BlockPos::new(2, 2, 2)));
        assert_eq!(back.version(), 1);
        assert!(back.events().is_empty());
    }
}

use blockview_common::{BlockFace, BlockPos};
use std::collections::BTreeSet;

/// Why the authority refused a placement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("existing block does not exist")]
    MissingExisting,
    #[error("adjacent block already exists")]
    Occupied,
    #[error("adjacent position is outside the world")]
    OutOfRange,
}

/// The authority's copy of the world. Starts with one block at the origin.
#[derive(Debug, Clone)]
pub struct AuthorityWorld {
    blocks: BTreeSet<BlockPos>,
}

impl Default for AuthorityWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorityWorld {
    pub fn new() -> Self {
        Self {
            blocks: BTreeSet::from([BlockPos::ORIGIN]),
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockPos> + '_ {
        self.blocks.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        self.blocks.contains(&pos)
    }

    /// Place a block unconditionally. Returns false if it was already there.
    pub fn place(&mut self, pos: BlockPos) -> bool {
        self.blocks.insert(pos)
    }

    /// Place a block touching `existing` across `face`.
    pub fn add_adjacent_block(
        &mut self,
        existing: BlockPos,
        face: BlockFace,
    ) -> Result<BlockPos, PlacementError> {
        if !self.blocks.contains(&existing) {
            return Err(PlacementError::MissingExisting);
        }
        let adjacent = existing.adjacent(face).ok_or(PlacementError::OutOfRange)?;
        if !self.blocks.insert(adjacent) {
            return Err(PlacementError::Occupied);
        }
        Ok(adjacent)
    }
}

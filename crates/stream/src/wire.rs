//! Deserialized message shapes exchanged with the world authority.
//!
//! The byte-level encoding lives in the transport; these are the typed forms
//! it hands over.

use blockview_common::{BlockFace, BlockPos};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One incremental change pushed by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldUpdate {
    /// The message carried no update. Applying it does nothing.
    NotSet,
    /// A block was placed.
    BlockAdded(BlockAdded),
    /// A kind this client does not know about yet.
    Unrecognized { tag: u32 },
}

impl WorldUpdate {
    pub fn block_added(position: BlockPos) -> Self {
        Self::BlockAdded(BlockAdded {
            position: Some(position),
        })
    }
}

/// Payload of [`WorldUpdate::BlockAdded`].
///
/// The position is optional on the wire; a missing one means the origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAdded {
    #[serde(default)]
    pub position: Option<BlockPos>,
}

impl BlockAdded {
    pub fn position_or_origin(&self) -> BlockPos {
        self.position.unwrap_or(BlockPos::ORIGIN)
    }
}

/// Coarse world metadata from the side stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub total_blocks: u64,
    /// Connected clients keyed by the authority's stream key.
    #[serde(default)]
    pub clients: BTreeMap<String, String>,
}

/// Sent when opening the update stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientData {
    pub name: String,
    /// Ask the authority to replay every existing block before live updates.
    pub send_existing_state: bool,
}

/// Outbound world mutation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldAction {
    /// Place a block next to `existing` across `face`.
    AddAdjacentBlock { existing: BlockPos, face: BlockFace },
}

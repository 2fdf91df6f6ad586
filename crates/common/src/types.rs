use glam::IVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Integer lattice coordinate of a block.
///
/// Ordered lexicographically on (x, y, z) so that block sets iterate in the
/// same order on every platform.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const ORIGIN: Self = Self::new(0, 0, 0);

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The neighbouring position across `face`, or None past the edge of
    /// the i32 lattice.
    pub fn adjacent(self, face: BlockFace) -> Option<Self> {
        let n = face.normal();
        Some(Self::new(
            self.x.checked_add(n.x)?,
            self.y.checked_add(n.y)?,
            self.z.checked_add(n.z)?,
        ))
    }

    pub fn as_ivec3(self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }
}

impl From<IVec3> for BlockPos {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<BlockPos> for IVec3 {
    fn from(p: BlockPos) -> Self {
        p.as_ivec3()
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One of the six axis-aligned faces of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockFace {
    PosX,
    PosY,
    PosZ,
    NegX,
    NegY,
    NegZ,
}

impl BlockFace {
    pub const ALL: [Self; 6] = [
        Self::PosX,
        Self::PosY,
        Self::PosZ,
        Self::NegX,
        Self::NegY,
        Self::NegZ,
    ];

    /// Unit offset pointing out of this face.
    pub fn normal(self) -> IVec3 {
        match self {
            Self::PosX => IVec3::X,
            Self::PosY => IVec3::Y,
            Self::PosZ => IVec3::Z,
            Self::NegX => IVec3::NEG_X,
            Self::NegY => IVec3::NEG_Y,
            Self::NegZ => IVec3::NEG_Z,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::PosX => Self::NegX,
            Self::PosY => Self::NegY,
            Self::PosZ => Self::NegZ,
            Self::NegX => Self::PosX,
            Self::NegY => Self::PosY,
            Self::NegZ => Self::PosZ,
        }
    }
}

/// Identifier a client presents when it opens an update stream.
///
/// A new id is minted for every session; the authority uses it to attribute
/// the stream to this viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

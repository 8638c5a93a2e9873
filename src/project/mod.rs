//! Project model: the document tree, its string pools, and the domain
//! overlay of tracks, clips, sequences and sample blocks.

pub mod model;
pub mod tree;

pub use model::{Clip, Project, ProjectBuilder, Sequence, WaveBlock, WaveTrack};
pub use tree::{NameId, NamePool, NodeId, ProjectTree, TreeAttribute, TreeNode, ValueId, ValuePool};

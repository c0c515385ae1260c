//! Identifier remapping and hierarchy replay

pub mod tree;
pub mod uid_mapper;

pub use tree::{DirectoryTree, DirectoryTreeBuilder, TreeError, TreeNode, TREE_DEPTH_MAX};
pub use uid_mapper::{MapperError, UidMapper, UID_MAPPER_FILE};

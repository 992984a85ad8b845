//! Package specification ("spin file") model and parser.
//!
//! A packages file is turned into an [`OpStack`]: an ordered list of
//! [`OpBlock`]s, each holding a run of mutually compatible [`Operation`]s.
//! Package managers apply one block at a time, so every block is guaranteed
//! to contain a single operation variant with a single `ignore_safety` value.
//!
//! # Format
//!
//! ```text
//! # comment
//! Unstable = https://example.com/eopkg-index.xml.xz   <- repository
//! ~@system.base                                       <- group, ignore safety
//! @system.devel                                       <- group
//! nano                                                <- package
//! ```

pub mod parser;

use std::fmt;

pub use parser::{parse_file, Parser};

/// A single action requested by the packages file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Enable a repository on the target.
    Repo { name: String, uri: String },
    /// Install a group or component.
    Group { name: String, ignore_safety: bool },
    /// Install a single package.
    Package { name: String, ignore_safety: bool },
}

/// Discriminant of an [`Operation`], used for dispatch and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Repo,
    Group,
    Package,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Repo => "repo",
            OperationKind::Group => "group",
            OperationKind::Package => "package",
        };
        f.write_str(name)
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Repo { .. } => OperationKind::Repo,
            Operation::Group { .. } => OperationKind::Group,
            Operation::Package { .. } => OperationKind::Package,
        }
    }

    /// Name of the repo, group or package this operation targets.
    pub fn name(&self) -> &str {
        match self {
            Operation::Repo { name, .. }
            | Operation::Group { name, .. }
            | Operation::Package { name, .. } => name,
        }
    }

    /// Whether dependency safety checks are bypassed. Always false for repos.
    pub fn ignore_safety(&self) -> bool {
        match self {
            Operation::Repo { .. } => false,
            Operation::Group { ignore_safety, .. } | Operation::Package { ignore_safety, .. } => {
                *ignore_safety
            }
        }
    }

    /// Whether `self` may share a block with `other`.
    ///
    /// Repos never stack, not even with other repos. Groups and packages
    /// stack with the same variant when their `ignore_safety` flags agree.
    pub fn compatible(&self, other: &Operation) -> bool {
        match (self, other) {
            (Operation::Repo { .. }, _) | (_, Operation::Repo { .. }) => false,
            (
                Operation::Group { ignore_safety: a, .. },
                Operation::Group { ignore_safety: b, .. },
            ) => a == b,
            (
                Operation::Package { ignore_safety: a, .. },
                Operation::Package { ignore_safety: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

/// A non-empty run of mutually compatible operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpBlock {
    ops: Vec<Operation>,
}

impl OpBlock {
    fn new(first: Operation) -> Self {
        Self { ops: vec![first] }
    }

    /// Push `op` if it is compatible with the first element.
    ///
    /// Hands the operation back when it belongs to a new block.
    fn try_push(&mut self, op: Operation) -> Result<(), Operation> {
        if op.compatible(&self.ops[0]) {
            self.ops.push(op);
            Ok(())
        } else {
            Err(op)
        }
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn kind(&self) -> OperationKind {
        self.ops[0].kind()
    }

    pub fn ignore_safety(&self) -> bool {
        self.ops[0].ignore_safety()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Names of every operation in the block, in file order.
    pub fn names(&self) -> Vec<&str> {
        self.ops.iter().map(Operation::name).collect()
    }
}

/// Ordered list of blocks, in packages-file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpStack {
    blocks: Vec<OpBlock>,
}

impl OpStack {
    pub fn blocks(&self) -> &[OpBlock] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total number of operations across all blocks.
    pub fn operation_count(&self) -> usize {
        self.blocks.iter().map(OpBlock::len).sum()
    }
}

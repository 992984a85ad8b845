//! Line-oriented parser for packages files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{OpBlock, OpStack, Operation};
use crate::error::{SpinError, SpinResult};

/// Parses packages files into an [`OpStack`].
///
/// The marker characters are public so that callers can adapt the grammar,
/// but the defaults match the documented spin format.
#[derive(Debug, Clone)]
pub struct Parser {
    /// Lines starting with this are ignored.
    pub comment_marker: char,
    /// Separates a repository name from its URI.
    pub repo_split_marker: char,
    /// Leading marker that sets `ignore_safety` for the line.
    pub safety_marker: char,
    /// Leading marker (after any safety marker) for a group install.
    pub group_marker: char,
}

impl Default for Parser {
    fn default() -> Self {
        Self {
            comment_marker: '#',
            repo_split_marker: '=',
            safety_marker: '~',
            group_marker: '@',
        }
    }
}

/// Parse the packages file at `path` with the default grammar.
pub fn parse_file(path: &Path) -> SpinResult<OpStack> {
    Parser::default().parse(path)
}

impl Parser {
    pub fn parse(&self, path: &Path) -> SpinResult<OpStack> {
        let file = File::open(path)?;
        self.parse_reader(BufReader::new(file))
    }

    pub fn parse_str(&self, content: &str) -> SpinResult<OpStack> {
        self.parse_reader(content.as_bytes())
    }

    pub fn parse_reader<R: BufRead>(&self, reader: R) -> SpinResult<OpStack> {
        let mut builder = StackBuilder::default();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if let Some(op) = self.parse_line(line.trim(), index + 1)? {
                builder.push(op);
            }
        }

        Ok(builder.finish())
    }

    /// Parse a single trimmed line. Returns `None` for blank and comment lines.
    fn parse_line(&self, line: &str, lineno: usize) -> SpinResult<Option<Operation>> {
        if line.is_empty() || line.starts_with(self.comment_marker) {
            return Ok(None);
        }

        // Repo lines bypass the safety and group markers entirely
        if let Some((name, uri)) = line.split_once(self.repo_split_marker) {
            let name = name.trim();
            let uri = uri.trim();
            if uri.is_empty() {
                return Err(SpinError::MissingRepoValue {
                    name: name.to_string(),
                    line: lineno,
                });
            }
            return Ok(Some(Operation::Repo {
                name: name.to_string(),
                uri: uri.to_string(),
            }));
        }

        let (ignore_safety, rest) = match line.strip_prefix(self.safety_marker) {
            Some(rest) => (true, rest),
            None => (false, line),
        };

        let (is_group, rest) = match rest.strip_prefix(self.group_marker) {
            Some(rest) => (true, rest),
            None => (false, rest),
        };

        let name = rest.trim();
        if name.is_empty() {
            return Err(SpinError::MissingName { line: lineno });
        }
        let name = name.to_string();

        Ok(Some(if is_group {
            Operation::Group {
                name,
                ignore_safety,
            }
        } else {
            Operation::Package {
                name,
                ignore_safety,
            }
        }))
    }
}

/// Accumulates operations into blocks as they are parsed.
#[derive(Default)]
struct StackBuilder {
    stack: OpStack,
    current: Option<OpBlock>,
}

impl StackBuilder {
    fn push(&mut self, op: Operation) {
        let Some(block) = self.current.as_mut() else {
            self.current = Some(OpBlock::new(op));
            return;
        };

        if let Err(op) = block.try_push(op) {
            if let Some(closed) = self.current.replace(OpBlock::new(op)) {
                self.stack.blocks.push(closed);
            }
        }
    }

    /// Close the in-progress block. An input with no operations yields no blocks.
    fn finish(mut self) -> OpStack {
        if let Some(block) = self.current.take() {
            self.stack.blocks.push(block);
        }
        self.stack
    }
}

//! Turns remote paths into ordered operation sequences.
//!
//! Every sequence produced here is balanced: each `EnterDirectory` is matched by
//! a later `LeaveDirectory`, so the receiver ends up in the directory it started in.

use crate::error::Result;
use crate::protocol::operation::{Operation, validate_name};

/// A local file and the slash-delimited path it should get below the upload base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    pub local: std::path::PathBuf,
    pub remote: String,
}

impl FileMapping {
    pub fn new(local: impl Into<std::path::PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }
}

/// Modes used when building sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modes {
    pub dir_mode: u32,
    /// `None` sends each file's local permission bits
    pub file_mode: Option<u32>,
}

impl Default for Modes {
    fn default() -> Self {
        Self {
            dir_mode: crate::protocol::operation::DEFAULT_DIR_MODE,
            file_mode: None,
        }
    }
}

/// Splits a slash-delimited path, dropping empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Number of leading segments two directory lists have in common.
///
/// Compares whole segments, so `a` and `a2` never match.
pub fn common_prefix_len<A: AsRef<str>, B: AsRef<str>>(open: &[A], wanted: &[B]) -> usize {
    open.iter()
        .zip(wanted)
        .take_while(|(a, b)| a.as_ref() == b.as_ref())
        .count()
}

/// Sequence that creates every directory of `path` below the receiver's root and
/// returns to the root.
///
/// An empty path (or one consisting only of slashes) yields no operations.
pub fn create_path_sequence(path: &str, dir_mode: u32) -> Result<Vec<Operation>> {
    let parts = segments(path);
    let mut ops = Vec::with_capacity(parts.len() * 2);
    for segment in &parts {
        validate_name(segment)?;
        ops.push(Operation::enter(*segment, dir_mode));
    }
    ops.extend(std::iter::repeat_n(Operation::LeaveDirectory, parts.len()));
    Ok(ops)
}

/// Moves the open directory stack to `wanted`, emitting leave operations for
/// directories above the common prefix (innermost first) and enter operations
/// for the new ones.
pub fn transition(
    open: &mut Vec<String>,
    wanted: &[&str],
    dir_mode: u32,
    ops: &mut Vec<Operation>,
) -> Result<()> {
    let common = common_prefix_len(open.as_slice(), wanted);
    while open.len() > common {
        open.pop();
        ops.push(Operation::LeaveDirectory);
    }
    for segment in &wanted[common..] {
        validate_name(segment)?;
        ops.push(Operation::enter(*segment, dir_mode));
        open.push((*segment).to_string());
    }
    Ok(())
}

/// Sequence that uploads `mappings` in the given order.
///
/// Input order is preserved; mappings do not need to be sorted by directory.
/// Directories are re-entered when a later mapping returns to them.
pub fn upload_sequence(mappings: &[FileMapping], modes: Modes) -> Result<Vec<Operation>> {
    let mut ops = Vec::with_capacity(mappings.len() * 2);
    let mut open: Vec<String> = Vec::new();
    for mapping in mappings {
        let parts = segments(&mapping.remote);
        let Some((name, dirs)) = parts.split_last() else {
            return Err(crate::Error::InvalidName(mapping.remote.clone()));
        };
        transition(&mut open, dirs, modes.dir_mode, &mut ops)?;
        validate_name(name)?;
        ops.push(Operation::TransferFile {
            mode: modes.file_mode,
            name: (*name).to_string(),
            source: mapping.local.clone(),
        });
    }
    transition(&mut open, &[], modes.dir_mode, &mut ops)?;
    Ok(ops)
}

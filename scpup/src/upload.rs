//! Upload orchestrator: the path-creation pass followed by the upload pass.
//!
//! Each pass runs its own receiver (`scp -rt ...`) and closes it on every
//! exit path. Cancellation is checked only before the first pass and between
//! the passes; a pass that started always runs to completion or failure.

use anyhow::{Context, anyhow};
use remote::protocol::{Modes, Operation, builder, operation};
use remote::session::ScpSession;
use remote::transport::RemoteShell;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::artifacts::ArtifactGroup;
use crate::target::RemoteTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// `None` sends each file's local permission bits
    pub file_mode: Option<u32>,
    pub dir_mode: u32,
    pub chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            file_mode: None,
            dir_mode: operation::DEFAULT_DIR_MODE,
            chunk_size: operation::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow!("chunk size must be greater than zero"));
        }
        if self.dir_mode > 0o7777 {
            return Err(anyhow!("directory mode {:o} is out of range", self.dir_mode));
        }
        if let Some(mode) = self.file_mode.filter(|mode| *mode > 0o7777) {
            return Err(anyhow!("file mode {:o} is out of range", mode));
        }
        Ok(())
    }

    fn modes(&self) -> Modes {
        Modes {
            dir_mode: self.dir_mode,
            file_mode: self.file_mode,
        }
    }
}

/// Files uploaded for one artifact group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub label: String,
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub files_uploaded: usize,
    pub bytes_uploaded: u64,
    pub directories_created: usize,
    pub groups: Vec<GroupReport>,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        let mut groups = self.groups;
        groups.extend(other.groups);
        Self {
            files_uploaded: self.files_uploaded + other.files_uploaded,
            bytes_uploaded: self.bytes_uploaded + other.bytes_uploaded,
            directories_created: self.directories_created + other.directories_created,
            groups,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files uploaded: {}\n\
            bytes uploaded: {}\n\
            base directories created: {}",
            self.files_uploaded,
            bytesize::ByteSize(self.bytes_uploaded),
            self.directories_created,
        )?;
        for group in &self.groups {
            write!(f, "\n  {}: {} files", group.label, group.files)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(Summary),
    /// cancellation was observed at a pass boundary; the summary covers the
    /// passes that ran
    Cancelled(Summary),
}

#[instrument(skip(shell), level = "debug")]
async fn create_base_path<S: RemoteShell>(
    shell: &S,
    base_path: &str,
    settings: &Settings,
) -> anyhow::Result<usize> {
    let ops = builder::create_path_sequence(base_path, settings.dir_mode)
        .with_context(|| format!("invalid remote base path {base_path:?}"))?;
    let command = remote::scp_sink_command("");
    let mut session = ScpSession::open(shell, &command, settings.chunk_size)
        .await
        .with_context(|| format!("failed to start {command:?}"))?;
    let result = session.run(&ops).await;
    session
        .finish(result)
        .await
        .with_context(|| format!("failed to create remote directory {base_path:?}"))?;
    Ok(ops.len() / 2)
}

async fn upload_groups<C: remote::transport::ExecChannel>(
    session: &mut ScpSession<C>,
    sequences: &[(&ArtifactGroup, Vec<Operation>)],
    summary: &mut Summary,
) -> remote::Result<()> {
    for (group, ops) in sequences {
        let bytes = session.run(ops).await?;
        let files = group.mappings.len();
        tracing::info!("Uploaded [{}] files for [{}] pattern", files, group.label);
        *summary = std::mem::take(summary)
            + Summary {
                files_uploaded: files,
                bytes_uploaded: bytes,
                directories_created: 0,
                groups: vec![GroupReport {
                    label: group.label.clone(),
                    files,
                    bytes,
                }],
            };
    }
    Ok(())
}

/// Runs both passes for `groups` against `target`.
///
/// Operation sequences are built before the upload receiver starts, so a name
/// that cannot be sent fails the job before any file goes out.
#[instrument(skip(shell, groups, cancel), fields(host = %target.host_port()))]
pub async fn upload<S: RemoteShell>(
    shell: &S,
    target: &RemoteTarget,
    groups: &[ArtifactGroup],
    settings: &Settings,
    cancel: &CancellationToken,
) -> anyhow::Result<Outcome> {
    settings.validate()?;
    let mut summary = Summary::default();
    if cancel.is_cancelled() {
        tracing::info!("Upload cancelled before it started");
        return Ok(Outcome::Cancelled(summary));
    }
    if !target.base_path.is_empty() {
        summary.directories_created = create_base_path(shell, &target.base_path, settings).await?;
    }
    if cancel.is_cancelled() {
        tracing::info!("Upload cancelled after creating {:?}", target.base_path);
        return Ok(Outcome::Cancelled(summary));
    }
    let mut sequences = Vec::with_capacity(groups.len());
    for group in groups {
        let ops = builder::upload_sequence(&group.mappings, settings.modes())
            .with_context(|| format!("cannot upload files of {:?}", group.label))?;
        sequences.push((group, ops));
    }
    if target.base_path.is_empty() {
        tracing::info!("Starting upload via SCP on host [{}]", target.host_port());
    } else {
        tracing::info!(
            "Starting upload via SCP to [{}] on host [{}]",
            target.base_path,
            target.host_port()
        );
    }
    let command = remote::scp_sink_command(&target.base_path);
    let mut session = ScpSession::open(shell, &command, settings.chunk_size)
        .await
        .with_context(|| format!("failed to start {command:?}"))?;
    let result = upload_groups(&mut session, &sequences, &mut summary).await;
    session.finish(result).await.with_context(|| {
        format!(
            "upload to {:?} on {} failed",
            target.base_path,
            target.host_port()
        )
    })?;
    Ok(Outcome::Completed(summary))
}

//! `scpup` uploads build artifacts to a remote host over the scp protocol.
//!
//! An upload is described by a [`target::RemoteTarget`] and a list of
//! [`artifacts::ArtifactRule`]s. [`upload::upload`] runs it in two passes over
//! any [`remote::transport::RemoteShell`]; [`job::UploadJob`] runs it in the
//! background with cancellation.

pub mod artifacts;
pub mod job;
pub mod target;
pub mod upload;

pub use artifacts::{ArtifactGroup, ArtifactRule};
pub use job::{JobHandle, JobStatus, UploadJob};
pub use target::RemoteTarget;
pub use upload::{Outcome, Settings, Summary};

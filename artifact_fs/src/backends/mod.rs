//! Filesystem backend implementations.

pub mod local;
pub mod object;

#[cfg(any(feature = "sftp", feature = "smb"))]
mod worker;

#[cfg(feature = "sftp")]
pub mod sftp;

#[cfg(feature = "smb")]
pub mod smb;

//! Uniform filesystem access across storage backends.
//!
//! This crate gives the artifact pipeline one interface for reading, writing,
//! listing and describing files wherever they live:
//!
//! - Local disk ([`LocalFs`])
//! - Object stores: S3, GCS, in-memory ([`ObjectStoreFs`])
//! - SFTP servers with password, key or agent auth (`SftpFs`, behind the
//!   `sftp` feature)
//! - SMB shares reached through libsmbclient (`SmbFs`, behind the `smb`
//!   feature)
//!
//! # Architecture
//!
//! Every backend implements the [`Filesystem`] trait. Listing accepts glob
//! patterns (`*`, `**`, `?`, classes, alternatives); the [`resolver`] splits a
//! pattern into its literal prefix and glob remainder and enumerates the way
//! the backend's [`Layout`] calls for. Flat key spaces are listed from the
//! prefix page by page, hierarchical ones are walked. A list items cap bounds
//! enumeration and marks the result truncated instead of failing.
//!
//! [`connect`] turns a [`StorageLocation`] (from config or a URL) into an
//! adapter.
//!
//! # Usage
//!
//! ```rust,no_run
//! use artifact_fs::{connect, Filesystem, StorageLocation};
//!
//! # async fn example() -> Result<(), artifact_fs::FsError> {
//! let location = StorageLocation::from_url("s3://my-bucket/exports")?;
//! let fs = connect(&location).await?;
//!
//! let listing = fs.read_dir("json/**/*.json").await?;
//! for entry in &listing.entries {
//!     println!("{} {}", entry.full_path, entry.size);
//! }
//! if listing.truncated {
//!     println!("more matches available");
//! }
//! # Ok(())
//! # }
//! ```

mod backends;
mod connection;
mod error;
mod file_info;
pub mod glob;
pub mod resolver;
mod traits;

pub use backends::{
    local::LocalFs,
    object::{GcsOptions, ObjectStoreFs, S3Options, DEFAULT_MAX_LIST_ITEMS, MULTIPART_THRESHOLD},
};
#[cfg(feature = "sftp")]
pub use backends::sftp::SftpFs;
#[cfg(feature = "smb")]
pub use backends::smb::SmbFs;
pub use connection::{connect, ConnectionConfig, SftpOptions, SmbOptions, StorageLocation};
pub use error::{FsError, FsResult};
pub use file_info::{FileInfo, Listing};
pub use resolver::{list, ListOptions};
pub use traits::{ByteStream, ContentLength, Filesystem, Layout, WriteBody};

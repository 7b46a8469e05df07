//! Client-side SFTP (version 3) engine.
//!
//! This crate implements the request/response core of an SFTP client: it
//! rides on top of a single full-duplex byte stream (typically the
//! stdin/stdout of an `ssh -s sftp` subsystem, but anything implementing
//! [`tokio::io::AsyncRead`] and [`tokio::io::AsyncWrite`] works) and
//! presents a file-system-style API with correct concurrency.
//!
//! Every operation is an independent request identified by a 32-bit id;
//! replies arrive out of order on the same stream. The engine multiplexes
//! any number of concurrent callers over one writer and one reader task,
//! pipelines large reads and writes into bounded windows of chunked
//! sub-requests, pools packet buffers, and guarantees exactly-once close of
//! file and directory handles.
//!
//! The SSH transport itself is out of scope: authentication, channel setup
//! and teardown belong to whatever produced the byte stream. A lost
//! connection is terminal for the session; there is no reconnect or retry.
//!
//! # Example
//!
//! ```no_run
//! use sftp_mux::{Sftp, SftpOptions};
//!
//! # async fn example(
//! #     stdout: tokio::process::ChildStdout,
//! #     stdin: tokio::process::ChildStdin,
//! # ) -> Result<(), sftp_mux::Error> {
//! let sftp = Sftp::new(stdout, stdin, SftpOptions::new()).await?;
//!
//! let file = sftp.open("/etc/hostname").await?;
//! let mut buf = [0u8; 256];
//! let n = file.read_at(&mut buf, 0).await?;
//! println!("{}", String::from_utf8_lossy(&buf[..n]));
//! file.close().await?;
//!
//! sftp.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links,
    rust_2018_idioms,
    unreachable_pub
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(unix))]
compile_error!("This crate can only be used on unix");

mod client;
mod conn;
mod dir;
mod error;
mod file;
mod handle;
mod metadata;
mod options;
mod pool;
mod protocol;

pub use client::Sftp;
pub use conn::Extensions;
pub use dir::{Dir, DirEntry};
pub use error::{Error, StatusCode, StatusError};
pub use file::{File, OpenOptions};
pub use metadata::{FileType, MetaData, MetaDataBuilder, Permissions};
pub use options::SftpOptions;
pub use protocol::StatVfs;

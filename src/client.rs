//! The SFTP session: construction, teardown, and the stateless path
//! operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use crate::conn::{self, Conn, Extensions};
use crate::dir::{Dir, DirEntry};
use crate::error::Error;
use crate::file::{File, OpenOptions};
use crate::metadata::{FileType, MetaData, MetaDataBuilder, Permissions};
use crate::options::SftpOptions;
use crate::protocol::constants::{EXT_HARDLINK, EXT_STATVFS};
use crate::protocol::packet::{Request, StatVfs};

/// A file-oriented channel to a remote host, multiplexing any number of
/// concurrent operations over one full-duplex byte stream (typically the
/// stdin/stdout of an `sftp` subsystem).
#[derive(Debug)]
pub struct Sftp {
    conn: Arc<Conn>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Sftp {
    /// Negotiate the protocol on the given stream halves and start the
    /// session.
    ///
    /// The handshake refuses any server version other than 3. This future
    /// has no built-in timeout; bound it with [`tokio::time::timeout`] when
    /// the peer is untrusted.
    pub async fn new<R, W>(reader: R, writer: W, options: SftpOptions) -> Result<Self, Error>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (conn, tasks) = conn::connect(Box::new(reader), Box::new(writer), &options).await?;
        Ok(Self {
            conn,
            tasks: Mutex::new(tasks),
        })
    }

    pub(crate) fn conn(&self) -> &Arc<Conn> {
        &self.conn
    }

    /// Extensions the server announced during the handshake.
    pub fn extensions(&self) -> &Extensions {
        self.conn.extensions()
    }

    /// Maximum bytes a single READ request asks for.
    pub fn max_read_len(&self) -> u32 {
        self.conn.limits().max_data_len
    }

    /// Maximum bytes a single WRITE request carries.
    pub fn max_write_len(&self) -> u32 {
        self.conn.limits().max_data_len
    }

    /// Wait until the session reaches its terminal state and return the
    /// error that ended it.
    pub async fn wait(&self) -> Arc<Error> {
        self.conn.closed().cancelled().await;
        self.conn
            .terminal()
            .expect("closed token fires only after the terminal error is set")
    }

    /// Shut the session down. Every in-flight operation completes with a
    /// connection-lost error; a lost connection is terminal, there is no
    /// reconnect.
    pub async fn close(self) -> Result<(), Error> {
        self.conn.disconnect(Error::ConnectionLost);
        for task in self.tasks.lock().drain(..) {
            task.abort();
            let _ = task.await;
        }
        Ok(())
    }

    /// Return a new [`OpenOptions`] builder.
    pub fn options(&self) -> OpenOptions<'_> {
        OpenOptions::new(self)
    }

    /// Open a file in read-only mode.
    pub async fn open(&self, path: impl AsRef<Path>) -> Result<File, Error> {
        self.options().read(true).open(path).await
    }

    /// Open a file in write-only mode, creating it if missing and
    /// truncating it otherwise.
    pub async fn create(&self, path: impl AsRef<Path>) -> Result<File, Error> {
        self.options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await
    }

    /// Open a directory for iteration.
    pub async fn open_dir(&self, path: impl AsRef<Path>) -> Result<Dir, Error> {
        let path = path.as_ref();
        let raw = self
            .round_status_handle(&Request::Opendir { path })
            .await
            .map_err(|err| err.with_path("opendir", path.to_string_lossy()))?;
        Ok(Dir::new(Arc::clone(&self.conn), raw, path))
    }

    /// Read a whole directory: open, drain, close.
    pub async fn read_dir(&self, path: impl AsRef<Path>) -> Result<Vec<DirEntry>, Error> {
        let mut dir = self.open_dir(path).await?;
        let entries = dir.read_dir(0).await?;
        dir.close().await?;
        Ok(entries)
    }

    /// Query metadata, following symlinks (STAT).
    pub async fn metadata(&self, path: impl AsRef<Path>) -> Result<MetaData, Error> {
        let path = path.as_ref();
        self.round_attrs(&Request::Stat { path })
            .await
            .map_err(|err| err.with_path("stat", path.to_string_lossy()))
    }

    /// Query metadata without following symlinks (LSTAT).
    pub async fn symlink_metadata(&self, path: impl AsRef<Path>) -> Result<MetaData, Error> {
        let path = path.as_ref();
        self.round_attrs(&Request::Lstat { path })
            .await
            .map_err(|err| err.with_path("lstat", path.to_string_lossy()))
    }

    /// Apply the attributes carried by `metadata` to `path` (SETSTAT).
    pub async fn set_metadata(
        &self,
        path: impl AsRef<Path>,
        metadata: MetaData,
    ) -> Result<(), Error> {
        let path = path.as_ref();
        let attrs = metadata.into_inner();
        self.round_status(&Request::Setstat { path, attrs: &attrs })
            .await
            .map_err(|err| err.with_path("setstat", path.to_string_lossy()))
    }

    /// Change permission bits.
    pub async fn set_permissions(
        &self,
        path: impl AsRef<Path>,
        perm: Permissions,
    ) -> Result<(), Error> {
        let path = path.as_ref();
        let attrs = MetaDataBuilder::new().permissions(perm).create().into_inner();
        self.round_status(&Request::Setstat { path, attrs: &attrs })
            .await
            .map_err(|err| err.with_path("chmod", path.to_string_lossy()))
    }

    /// Change the owner.
    pub async fn set_owner(&self, path: impl AsRef<Path>, uid: u32, gid: u32) -> Result<(), Error> {
        let path = path.as_ref();
        let attrs = MetaDataBuilder::new().id((uid, gid)).create().into_inner();
        self.round_status(&Request::Setstat { path, attrs: &attrs })
            .await
            .map_err(|err| err.with_path("chown", path.to_string_lossy()))
    }

    /// Change access and modification times, seconds since the epoch.
    pub async fn set_times(
        &self,
        path: impl AsRef<Path>,
        atime: u32,
        mtime: u32,
    ) -> Result<(), Error> {
        let path = path.as_ref();
        let attrs = MetaDataBuilder::new().times(atime, mtime).create().into_inner();
        self.round_status(&Request::Setstat { path, attrs: &attrs })
            .await
            .map_err(|err| err.with_path("chtimes", path.to_string_lossy()))
    }

    /// Truncate or extend a file to `size`.
    pub async fn truncate(&self, path: impl AsRef<Path>, size: u64) -> Result<(), Error> {
        let path = path.as_ref();
        let attrs = MetaDataBuilder::new().len(size).create().into_inner();
        self.round_status(&Request::Setstat { path, attrs: &attrs })
            .await
            .map_err(|err| err.with_path("truncate", path.to_string_lossy()))
    }

    /// Create a new, empty directory.
    pub async fn create_dir(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        self.mkdir(path)
            .await
            .map_err(|err| err.with_path("mkdir", path.to_string_lossy()))
    }

    /// Create a directory and all of its missing parents. Already-existing
    /// directories along the way are fine; calling this twice is a no-op.
    pub async fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        self.create_dir_all_inner(path)
            .await
            .map_err(|err| err.with_path("mkdir", path.to_string_lossy()))
    }

    fn create_dir_all_inner<'a>(
        &'a self,
        path: &'a Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send + 'a>> {
        Box::pin(async move {
            // Fast path: already a directory.
            if let Ok(meta) = self.round_attrs(&Request::Stat { path }).await {
                return match meta.file_type() {
                    Some(typ) if typ.is_dir() => Ok(()),
                    _ => Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "path exists and is not a directory",
                    ))),
                };
            }

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    self.create_dir_all_inner(parent).await?;
                }
            }

            match self.mkdir(path).await {
                Ok(()) => Ok(()),
                // Lost the race to another creator; a directory is fine.
                Err(err) => match self.round_attrs(&Request::Stat { path }).await {
                    Ok(meta) if meta.file_type().map_or(false, FileType::is_dir) => Ok(()),
                    _ => Err(err),
                },
            }
        })
    }

    /// Remove an existing, empty directory.
    pub async fn remove_dir(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        self.round_status(&Request::Rmdir { path })
            .await
            .map_err(|err| err.with_path("rmdir", path.to_string_lossy()))
    }

    /// Remove a file.
    pub async fn remove_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        self.round_status(&Request::Remove { path })
            .await
            .map_err(|err| err.with_path("remove", path.to_string_lossy()))
    }

    /// Remove a file or an empty directory, whichever `path` is.
    ///
    /// Tries REMOVE first, falls back to RMDIR; if both fail, a STAT
    /// decides which of the two errors describes the entry.
    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();

        let file_err = match self.round_status(&Request::Remove { path }).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        let dir_err = match self.round_status(&Request::Rmdir { path }).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        // When both attempts fail the same way there is nothing to
        // arbitrate; only differing errors are worth the extra STAT.
        let err = if file_err.status_code() == dir_err.status_code() {
            file_err
        } else {
            match self.round_attrs(&Request::Stat { path }).await {
                Ok(meta) if meta.file_type().map_or(false, FileType::is_dir) => dir_err,
                _ => file_err,
            }
        };
        Err(err.with_path("remove", path.to_string_lossy()))
    }

    /// Rename `from` to `to`.
    ///
    /// When the server advertises posix-rename@openssh.com the rename is
    /// atomic and replaces an existing destination; otherwise the plain
    /// RENAME is used and the outcome with an existing destination is
    /// server-defined.
    pub async fn rename(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let oldpath = from.as_ref();
        let newpath = to.as_ref();

        let req = if self.conn.extensions().posix_rename {
            Request::PosixRename { oldpath, newpath }
        } else {
            Request::Rename { oldpath, newpath }
        };
        self.round_status(&req)
            .await
            .map_err(|err| err.with_path("rename", oldpath.to_string_lossy()))
    }

    /// Create a symlink at `link` pointing at `target`.
    pub async fn symlink(
        &self,
        target: impl AsRef<Path>,
        link: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let target = target.as_ref();
        let link = link.as_ref();
        self.round_status(&Request::Symlink { target, link })
            .await
            .map_err(|err| err.with_path("symlink", link.to_string_lossy()))
    }

    /// Create a hard link at `link` for `target`. Requires the
    /// hardlink@openssh.com extension.
    pub async fn hard_link(
        &self,
        target: impl AsRef<Path>,
        link: impl AsRef<Path>,
    ) -> Result<(), Error> {
        if !self.conn.extensions().hardlink {
            return Err(Error::UnsupportedExtension(EXT_HARDLINK));
        }
        let oldpath = target.as_ref();
        let newpath = link.as_ref();
        self.round_status(&Request::Hardlink { oldpath, newpath })
            .await
            .map_err(|err| err.with_path("hardlink", newpath.to_string_lossy()))
    }

    /// Read the target of a symlink.
    pub async fn read_link(&self, path: impl AsRef<Path>) -> Result<PathBuf, Error> {
        let path = path.as_ref();
        self.round_single_name(&Request::Readlink { path })
            .await
            .map_err(|err| err.with_path("readlink", path.to_string_lossy()))
    }

    /// Canonicalize a path on the server (REALPATH).
    pub async fn canonicalize(&self, path: impl AsRef<Path>) -> Result<PathBuf, Error> {
        let path = path.as_ref();
        self.round_single_name(&Request::Realpath { path })
            .await
            .map_err(|err| err.with_path("realpath", path.to_string_lossy()))
    }

    /// Filesystem statistics for the filesystem holding `path`. Requires
    /// the statvfs@openssh.com extension.
    pub async fn statvfs(&self, path: impl AsRef<Path>) -> Result<StatVfs, Error> {
        if !self.conn.extensions().statvfs {
            return Err(Error::UnsupportedExtension(EXT_STATVFS));
        }
        let path = path.as_ref();
        let res = async {
            let pkt = self.conn.round_trip(&Request::Statvfs { path }, None).await?;
            self.conn.finish_statvfs(pkt)
        }
        .await;
        res.map_err(|err| err.with_path("statvfs", path.to_string_lossy()))
    }

    /// Read the entire contents of a remote file.
    ///
    /// The file is stat'ed optimistically to pre-allocate; servers that
    /// cannot stat the file still work, at the cost of growing reads.
    pub async fn read(&self, path: impl AsRef<Path>) -> Result<BytesMut, Error> {
        let path = path.as_ref();
        let file = self.open(path).await?;

        let hint = match file.metadata().await {
            Ok(meta) => meta.len().unwrap_or(0) as usize,
            Err(_) => 0,
        };
        let chunk = self.max_read_len() as usize;

        let mut out = BytesMut::new();
        out.resize(hint, 0);
        let mut filled = 0usize;
        loop {
            if filled == out.len() {
                // Always keep headroom so end of file shows up as a short
                // read rather than an exactly-full buffer.
                out.resize(filled + chunk, 0);
            }
            let want = out.len() - filled;
            let n = file.read_at(&mut out[filled..], filled as u64).await?;
            filled += n;
            if n < want {
                break;
            }
        }
        out.truncate(filled);

        file.close().await?;
        Ok(out)
    }

    /// Write `contents` to a remote file, creating it if missing and
    /// truncating it otherwise.
    pub async fn write(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> Result<(), Error> {
        let file = self.create(path).await?;
        file.write_at(contents.as_ref(), 0).await?;
        file.close().await
    }

    async fn mkdir(&self, path: &Path) -> Result<(), Error> {
        let attrs = crate::protocol::attrs::FileAttrs::new();
        self.round_status(&Request::Mkdir { path, attrs: &attrs })
            .await
    }

    async fn round_status(&self, req: &Request<'_>) -> Result<(), Error> {
        let pkt = self.conn.round_trip(req, None).await?;
        self.conn.finish_status(pkt)
    }

    async fn round_attrs(&self, req: &Request<'_>) -> Result<MetaData, Error> {
        let pkt = self.conn.round_trip(req, None).await?;
        self.conn.finish_attrs(pkt).map(MetaData::new)
    }

    async fn round_status_handle(&self, req: &Request<'_>) -> Result<Box<[u8]>, Error> {
        let pkt = self.conn.round_trip(req, None).await?;
        self.conn.finish_handle(pkt)
    }

    async fn round_single_name(&self, req: &Request<'_>) -> Result<PathBuf, Error> {
        let pkt = self.conn.round_trip(req, None).await?;
        let mut entries = self.conn.finish_name(pkt)?;
        if entries.len() != 1 {
            return Err(Error::BadMessage("expected exactly one name entry"));
        }
        Ok(PathBuf::from(entries.remove(0).filename))
    }
}

impl Drop for Sftp {
    fn drop(&mut self) {
        self.conn.disconnect(Error::ConnectionLost);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

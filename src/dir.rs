//! Directory handles and lazy entry iteration.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use crate::conn::Conn;
use crate::error::Error;
use crate::handle::RemoteHandle;
use crate::metadata::{FileType, MetaData};
use crate::protocol::packet::{NameEntry, Request};

/// One directory entry, as reported by the server. `.` and `..` are
/// included when the server sends them.
#[derive(Debug, Clone)]
pub struct DirEntry {
    filename: String,
    longname: String,
    metadata: MetaData,
}

impl DirEntry {
    fn new(entry: NameEntry) -> Self {
        Self {
            filename: entry.filename,
            longname: entry.longname,
            metadata: MetaData::new(entry.attrs),
        }
    }

    /// The bare file name of the entry, without any leading path.
    pub fn file_name(&self) -> &str {
        &self.filename
    }

    /// The server's `ls -l`-style presentation of the entry.
    pub fn long_name(&self) -> &str {
        &self.longname
    }

    /// Metadata the server attached to the entry.
    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    /// The entry's file type, when the server reported a mode.
    pub fn file_type(&self) -> Option<FileType> {
        self.metadata.file_type()
    }
}

/// An open remote directory.
///
/// Entries are produced lazily: each READDIR request over-fetches a batch
/// that is buffered here, and iteration is restartable: entries not yet
/// yielded stay buffered for the next call.
#[derive(Debug)]
pub struct Dir {
    handle: RemoteHandle,
    path: Box<Path>,
    pending: VecDeque<DirEntry>,
    eof: bool,
}

impl Dir {
    pub(crate) fn new(conn: Arc<Conn>, raw: Box<[u8]>, path: &Path) -> Self {
        Self {
            handle: RemoteHandle::new(conn, raw),
            path: path.into(),
            pending: VecDeque::new(),
            eof: false,
        }
    }

    fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// The remote path this directory was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The next entry, or `None` once the directory is exhausted.
    pub async fn next_entry(&mut self) -> Result<Option<DirEntry>, Error> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Ok(Some(entry));
            }
            if self.eof {
                return Ok(None);
            }
            self.fetch_more()
                .await
                .map_err(|err| err.with_path("readdir", self.path.to_string_lossy()))?;
        }
    }

    /// Read up to `n` entries, issuing READDIR requests as needed.
    ///
    /// With `n <= 0` every remaining entry is returned and end of file is
    /// not an error. With `n > 0`, an exhausted directory yields the
    /// end-of-file sentinel.
    pub async fn read_dir(&mut self, n: isize) -> Result<Vec<DirEntry>, Error> {
        let want = if n <= 0 { usize::MAX } else { n as usize };
        let mut out = Vec::new();

        while out.len() < want {
            match self.next_entry().await? {
                Some(entry) => out.push(entry),
                None => break,
            }
        }

        if n > 0 && out.is_empty() {
            return Err(Error::Eof);
        }
        Ok(out)
    }

    /// Close the directory, sending the single CLOSE request. A second
    /// close returns [`Error::HandleClosed`].
    pub async fn close(&self) -> Result<(), Error> {
        self.handle
            .close()
            .await
            .map_err(|err| err.with_path("close", self.path_str()))
    }

    async fn fetch_more(&mut self) -> Result<(), Error> {
        let raw = self.handle.get()?;
        let conn = self.handle.conn();

        let res = async {
            let pkt = conn
                .round_trip(
                    &Request::Readdir { handle: &raw },
                    Some(self.handle.closed_token()),
                )
                .await?;
            conn.finish_name(pkt)
        }
        .await;

        match res {
            Ok(entries) => {
                if entries.is_empty() {
                    // Zero entries without an EOF status: treat as done
                    // rather than spinning on READDIR forever.
                    self.eof = true;
                } else {
                    self.pending.extend(entries.into_iter().map(DirEntry::new));
                }
                Ok(())
            }
            Err(Error::Eof) => {
                self.eof = true;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl Drop for Dir {
    fn drop(&mut self) {
        self.handle.close_in_background();
    }
}

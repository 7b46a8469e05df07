//! Packet marshalling and unmarshalling.
//!
//! Requests marshal into a caller-supplied scratch buffer; a WRITE's data
//! body is never copied into the scratch, it is returned as a separate
//! payload slice that aliases caller memory (and therefore must not be
//! returned to any buffer pool). Responses are parsed out of one pooled
//! frame buffer which the decoder borrows until the body has been consumed.

use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::attrs::FileAttrs;
use super::constants::*;
use super::wire::{self, SliceReader};
use crate::error::{Error, StatusCode, StatusError};

/// One client request, borrowing paths, handles and write bodies from the
/// caller.
#[derive(Debug)]
pub(crate) enum Request<'a> {
    Open {
        path: &'a Path,
        pflags: u32,
        attrs: &'a FileAttrs,
    },
    Close {
        handle: &'a [u8],
    },
    Read {
        handle: &'a [u8],
        offset: u64,
        len: u32,
    },
    Write {
        handle: &'a [u8],
        offset: u64,
        data: &'a [u8],
    },
    Lstat {
        path: &'a Path,
    },
    Fstat {
        handle: &'a [u8],
    },
    Setstat {
        path: &'a Path,
        attrs: &'a FileAttrs,
    },
    Fsetstat {
        handle: &'a [u8],
        attrs: &'a FileAttrs,
    },
    Opendir {
        path: &'a Path,
    },
    Readdir {
        handle: &'a [u8],
    },
    Remove {
        path: &'a Path,
    },
    Mkdir {
        path: &'a Path,
        attrs: &'a FileAttrs,
    },
    Rmdir {
        path: &'a Path,
    },
    Realpath {
        path: &'a Path,
    },
    Stat {
        path: &'a Path,
    },
    Rename {
        oldpath: &'a Path,
        newpath: &'a Path,
    },
    Readlink {
        path: &'a Path,
    },
    Symlink {
        target: &'a Path,
        link: &'a Path,
    },
    PosixRename {
        oldpath: &'a Path,
        newpath: &'a Path,
    },
    Hardlink {
        oldpath: &'a Path,
        newpath: &'a Path,
    },
    Fsync {
        handle: &'a [u8],
    },
    Statvfs {
        path: &'a Path,
    },
}

fn put_path(buf: &mut Vec<u8>, path: &Path) {
    wire::put_bytes(buf, path.as_os_str().as_bytes());
}

impl<'a> Request<'a> {
    pub(crate) fn packet_type(&self) -> u8 {
        match self {
            Request::Open { .. } => SSH_FXP_OPEN,
            Request::Close { .. } => SSH_FXP_CLOSE,
            Request::Read { .. } => SSH_FXP_READ,
            Request::Write { .. } => SSH_FXP_WRITE,
            Request::Lstat { .. } => SSH_FXP_LSTAT,
            Request::Fstat { .. } => SSH_FXP_FSTAT,
            Request::Setstat { .. } => SSH_FXP_SETSTAT,
            Request::Fsetstat { .. } => SSH_FXP_FSETSTAT,
            Request::Opendir { .. } => SSH_FXP_OPENDIR,
            Request::Readdir { .. } => SSH_FXP_READDIR,
            Request::Remove { .. } => SSH_FXP_REMOVE,
            Request::Mkdir { .. } => SSH_FXP_MKDIR,
            Request::Rmdir { .. } => SSH_FXP_RMDIR,
            Request::Realpath { .. } => SSH_FXP_REALPATH,
            Request::Stat { .. } => SSH_FXP_STAT,
            Request::Rename { .. } => SSH_FXP_RENAME,
            Request::Readlink { .. } => SSH_FXP_READLINK,
            Request::Symlink { .. } => SSH_FXP_SYMLINK,
            Request::PosixRename { .. }
            | Request::Hardlink { .. }
            | Request::Fsync { .. }
            | Request::Statvfs { .. } => SSH_FXP_EXTENDED,
        }
    }

    /// Marshal into `scratch`, returning the payload that must follow the
    /// scratch bytes on the wire.
    ///
    /// The frame length prefix written into `scratch` accounts for the
    /// payload; the payload itself aliases caller memory.
    pub(crate) fn marshal(&self, request_id: u32, scratch: &mut Vec<u8>) -> Option<&'a [u8]> {
        scratch.clear();
        wire::put_u32(scratch, 0); // length, patched below
        wire::put_u8(scratch, self.packet_type());
        wire::put_u32(scratch, request_id);

        let mut payload = None;
        match *self {
            Request::Open {
                path,
                pflags,
                attrs,
            } => {
                put_path(scratch, path);
                wire::put_u32(scratch, pflags);
                attrs.encode(scratch);
            }
            Request::Close { handle }
            | Request::Fstat { handle }
            | Request::Readdir { handle } => {
                wire::put_bytes(scratch, handle);
            }
            Request::Read {
                handle,
                offset,
                len,
            } => {
                wire::put_bytes(scratch, handle);
                wire::put_u64(scratch, offset);
                wire::put_u32(scratch, len);
            }
            Request::Write {
                handle,
                offset,
                data,
            } => {
                wire::put_bytes(scratch, handle);
                wire::put_u64(scratch, offset);
                wire::put_u32(scratch, data.len() as u32);
                payload = Some(data);
            }
            Request::Lstat { path }
            | Request::Opendir { path }
            | Request::Remove { path }
            | Request::Rmdir { path }
            | Request::Realpath { path }
            | Request::Stat { path }
            | Request::Readlink { path } => {
                put_path(scratch, path);
            }
            Request::Setstat { path, attrs } => {
                put_path(scratch, path);
                attrs.encode(scratch);
            }
            Request::Fsetstat { handle, attrs } => {
                wire::put_bytes(scratch, handle);
                attrs.encode(scratch);
            }
            Request::Mkdir { path, attrs } => {
                put_path(scratch, path);
                attrs.encode(scratch);
            }
            Request::Rename { oldpath, newpath } => {
                put_path(scratch, oldpath);
                put_path(scratch, newpath);
            }
            Request::Symlink { target, link } => {
                // draft-02 field order: linkpath first, then targetpath.
                put_path(scratch, link);
                put_path(scratch, target);
            }
            Request::PosixRename { oldpath, newpath } => {
                wire::put_str(scratch, EXT_POSIX_RENAME);
                put_path(scratch, oldpath);
                put_path(scratch, newpath);
            }
            Request::Hardlink { oldpath, newpath } => {
                wire::put_str(scratch, EXT_HARDLINK);
                put_path(scratch, oldpath);
                put_path(scratch, newpath);
            }
            Request::Fsync { handle } => {
                wire::put_str(scratch, EXT_FSYNC);
                wire::put_bytes(scratch, handle);
            }
            Request::Statvfs { path } => {
                wire::put_str(scratch, EXT_STATVFS);
                put_path(scratch, path);
            }
        }

        let body_len = scratch.len() - 4 + payload.map_or(0, <[u8]>::len);
        scratch[..4].copy_from_slice(&(body_len as u32).to_be_bytes());
        payload
    }
}

/// Marshal the version-negotiation INIT packet. It carries no request id.
pub(crate) fn marshal_init(version: u32, scratch: &mut Vec<u8>) {
    scratch.clear();
    wire::put_u32(scratch, 5);
    wire::put_u8(scratch, SSH_FXP_INIT);
    wire::put_u32(scratch, version);
}

/// The VERSION reply: negotiated version plus advertised extensions.
#[derive(Debug)]
pub(crate) struct ServerVersion {
    pub(crate) version: u32,
    pub(crate) extensions: Vec<(String, String)>,
}

/// Parse a VERSION packet body (everything after the length prefix).
pub(crate) fn parse_version(body: &[u8]) -> Result<ServerVersion, Error> {
    let mut r = SliceReader::new(body);
    let typ = r.read_u8()?;
    if typ != SSH_FXP_VERSION {
        return Err(Error::UnexpectedPacket { actual: typ });
    }
    let version = r.read_u32()?;
    let mut extensions = Vec::new();
    while r.remaining() > 0 {
        let name = r.read_string()?;
        let data = r.read_string()?;
        extensions.push((name, data));
    }
    Ok(ServerVersion {
        version,
        extensions,
    })
}

/// One parsed inbound frame.
///
/// `buf` is the pooled frame buffer; `body()` is the borrowed view of the
/// bytes after the packet type and request id. The buffer must be handed
/// back to the pool once the body has been decoded or skipped.
#[derive(Debug)]
pub(crate) struct RawPacket {
    pub(crate) typ: u8,
    pub(crate) request_id: u32,
    buf: Vec<u8>,
    len: usize,
}

impl RawPacket {
    /// Parse the fixed prologue of a frame already read off the stream.
    /// `len` is the frame length from the length prefix.
    pub(crate) fn parse(buf: Vec<u8>, len: usize) -> Result<Self, Error> {
        if len < 5 {
            return Err(Error::BadMessage("frame shorter than type + request id"));
        }
        let mut r = SliceReader::new(&buf[..5]);
        let typ = r.read_u8()?;
        let request_id = r.read_u32()?;
        Ok(Self {
            typ,
            request_id,
            buf,
            len,
        })
    }

    pub(crate) fn body(&self) -> &[u8] {
        &self.buf[5..self.len]
    }

    /// Reclaim the pooled frame buffer.
    pub(crate) fn into_buf(self) -> Vec<u8> {
        self.buf
    }
}

/// Decoded STATUS body.
#[derive(Debug)]
pub(crate) struct Status {
    pub(crate) code: StatusCode,
    pub(crate) message: String,
}

impl Status {
    /// Turn this status into the error it denotes, or `Ok` for SSH_FX_OK.
    pub(crate) fn into_result(self) -> Result<(), Error> {
        match self.code {
            StatusCode::Ok => Ok(()),
            StatusCode::Eof => Err(Error::Eof),
            code => Err(Error::Status(StatusError {
                code,
                message: self.message,
            })),
        }
    }
}

pub(crate) fn parse_status(body: &[u8]) -> Result<Status, Error> {
    let mut r = SliceReader::new(body);
    let code = StatusCode::from_wire(r.read_u32()?);
    // Some servers omit the message and language tag; tolerate that.
    let message = if r.remaining() > 0 {
        r.read_string()?
    } else {
        String::new()
    };
    Ok(Status { code, message })
}

pub(crate) fn parse_handle(body: &[u8]) -> Result<Box<[u8]>, Error> {
    let mut r = SliceReader::new(body);
    Ok(r.read_bytes()?.into())
}

/// The borrowed data view of a DATA body.
pub(crate) fn parse_data(body: &[u8]) -> Result<&[u8], Error> {
    let mut r = SliceReader::new(body);
    r.read_bytes()
}

/// One entry of a NAME body.
#[derive(Debug, Clone)]
pub(crate) struct NameEntry {
    pub(crate) filename: String,
    pub(crate) longname: String,
    pub(crate) attrs: FileAttrs,
}

pub(crate) fn parse_name(body: &[u8]) -> Result<Vec<NameEntry>, Error> {
    let mut r = SliceReader::new(body);
    let count = r.read_u32()?;
    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let filename = r.read_string()?;
        let longname = r.read_string()?;
        let attrs = FileAttrs::decode(&mut r)?;
        entries.push(NameEntry {
            filename,
            longname,
            attrs,
        });
    }
    Ok(entries)
}

pub(crate) fn parse_attrs(body: &[u8]) -> Result<FileAttrs, Error> {
    let mut r = SliceReader::new(body);
    FileAttrs::decode(&mut r)
}

/// Filesystem statistics from the statvfs@openssh.com extended reply.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatVfs {
    /// File system block size.
    pub bsize: u64,
    /// Fundamental file system block size.
    pub frsize: u64,
    /// Number of blocks, in `frsize` units.
    pub blocks: u64,
    /// Free blocks in the file system.
    pub bfree: u64,
    /// Free blocks available to the unprivileged user.
    pub bavail: u64,
    /// Total file inodes.
    pub files: u64,
    /// Free file inodes.
    pub ffree: u64,
    /// Free file inodes available to the unprivileged user.
    pub favail: u64,
    /// File system id.
    pub fsid: u64,
    /// Mount flags.
    pub flag: u64,
    /// Maximum filename length.
    pub namemax: u64,
}

pub(crate) fn parse_statvfs(body: &[u8]) -> Result<StatVfs, Error> {
    let mut r = SliceReader::new(body);
    Ok(StatVfs {
        bsize: r.read_u64()?,
        frsize: r.read_u64()?,
        blocks: r.read_u64()?,
        bfree: r.read_u64()?,
        bavail: r.read_u64()?,
        files: r.read_u64()?,
        ffree: r.read_u64()?,
        favail: r.read_u64()?,
        fsid: r.read_u64()?,
        flag: r.read_u64()?,
        namemax: r.read_u64()?,
    })
}

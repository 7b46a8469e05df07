//! The attribute block shared by OPEN, SETSTAT, FSETSTAT, MKDIR and the
//! ATTRS / NAME responses: a flags word followed by the optional fields the
//! flags announce, in fixed order.

use super::constants::*;
use super::wire::{self, SliceReader};
use crate::error::Error;

/// File attributes as they appear on the wire.
///
/// Every field is optional; absence means the server did not report it (on
/// decode) or the client does not want to change it (on encode).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct FileAttrs {
    pub(crate) size: Option<u64>,
    pub(crate) uid_gid: Option<(u32, u32)>,
    pub(crate) permissions: Option<u32>,
    pub(crate) times: Option<(u32, u32)>,
    pub(crate) extended: Vec<(String, String)>,
}

impl FileAttrs {
    pub(crate) const fn new() -> Self {
        Self {
            size: None,
            uid_gid: None,
            permissions: None,
            times: None,
            extended: Vec::new(),
        }
    }

    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.size.is_some() {
            flags |= SSH_FILEXFER_ATTR_SIZE;
        }
        if self.uid_gid.is_some() {
            flags |= SSH_FILEXFER_ATTR_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= SSH_FILEXFER_ATTR_PERMISSIONS;
        }
        if self.times.is_some() {
            flags |= SSH_FILEXFER_ATTR_ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= SSH_FILEXFER_ATTR_EXTENDED;
        }
        flags
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        wire::put_u32(buf, self.flags());
        if let Some(size) = self.size {
            wire::put_u64(buf, size);
        }
        if let Some((uid, gid)) = self.uid_gid {
            wire::put_u32(buf, uid);
            wire::put_u32(buf, gid);
        }
        if let Some(perm) = self.permissions {
            wire::put_u32(buf, perm);
        }
        if let Some((atime, mtime)) = self.times {
            wire::put_u32(buf, atime);
            wire::put_u32(buf, mtime);
        }
        if !self.extended.is_empty() {
            wire::put_u32(buf, self.extended.len() as u32);
            for (name, value) in &self.extended {
                wire::put_str(buf, name);
                wire::put_str(buf, value);
            }
        }
    }

    pub(crate) fn decode(r: &mut SliceReader<'_>) -> Result<Self, Error> {
        let flags = r.read_u32()?;
        let mut attrs = FileAttrs::new();

        if flags & SSH_FILEXFER_ATTR_SIZE != 0 {
            attrs.size = Some(r.read_u64()?);
        }
        if flags & SSH_FILEXFER_ATTR_UIDGID != 0 {
            attrs.uid_gid = Some((r.read_u32()?, r.read_u32()?));
        }
        if flags & SSH_FILEXFER_ATTR_PERMISSIONS != 0 {
            attrs.permissions = Some(r.read_u32()?);
        }
        if flags & SSH_FILEXFER_ATTR_ACMODTIME != 0 {
            attrs.times = Some((r.read_u32()?, r.read_u32()?));
        }
        if flags & SSH_FILEXFER_ATTR_EXTENDED != 0 {
            let count = r.read_u32()?;
            for _ in 0..count {
                let name = r.read_string()?;
                let value = r.read_string()?;
                attrs.extended.push((name, value));
            }
        }

        Ok(attrs)
    }
}

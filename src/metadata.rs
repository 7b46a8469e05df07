//! File metadata as the engine presents it: a thin typed view over the wire
//! attribute block, plus the portable-POSIX mode-bit translation.

use bitflags::bitflags;

use crate::protocol::attrs::FileAttrs;
use crate::protocol::constants::*;

/// The type of a remote file, decoded from the mode-type bits of the
/// permissions word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FileType {
    /// Unix domain socket.
    Socket,
    /// Symbolic link.
    Symlink,
    /// Regular file.
    Regular,
    /// Block device.
    BlockDevice,
    /// Directory.
    Directory,
    /// Character device.
    CharDevice,
    /// Named pipe.
    Fifo,
    /// The server sent mode-type bits this crate does not recognize.
    Unknown,
}

impl FileType {
    /// Decode from a full mode word.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFSOCK => FileType::Socket,
            S_IFLNK => FileType::Symlink,
            S_IFREG => FileType::Regular,
            S_IFBLK => FileType::BlockDevice,
            S_IFDIR => FileType::Directory,
            S_IFCHR => FileType::CharDevice,
            S_IFIFO => FileType::Fifo,
            _ => FileType::Unknown,
        }
    }

    /// The mode-type bits for this file type, zero for [`FileType::Unknown`].
    pub fn to_mode_bits(self) -> u32 {
        match self {
            FileType::Socket => S_IFSOCK,
            FileType::Symlink => S_IFLNK,
            FileType::Regular => S_IFREG,
            FileType::BlockDevice => S_IFBLK,
            FileType::Directory => S_IFDIR,
            FileType::CharDevice => S_IFCHR,
            FileType::Fifo => S_IFIFO,
            FileType::Unknown => 0,
        }
    }

    /// True for [`FileType::Directory`].
    pub fn is_dir(self) -> bool {
        self == FileType::Directory
    }

    /// True for [`FileType::Regular`].
    pub fn is_file(self) -> bool {
        self == FileType::Regular
    }

    /// True for [`FileType::Symlink`].
    pub fn is_symlink(self) -> bool {
        self == FileType::Symlink
    }
}

bitflags! {
    /// The twelve permission bits of a mode word: set-uid, set-gid, sticky,
    /// and the three rwx triplets.
    pub struct Permissions: u32 {
        /// Set-user-id on execution.
        const SET_UID = 0o4000;
        /// Set-group-id on execution.
        const SET_GID = 0o2000;
        /// Sticky bit.
        const STICKY = 0o1000;

        /// Read by owner.
        const OWNER_READ = 0o400;
        /// Write by owner.
        const OWNER_WRITE = 0o200;
        /// Execute by owner.
        const OWNER_EXEC = 0o100;

        /// Read by group.
        const GROUP_READ = 0o040;
        /// Write by group.
        const GROUP_WRITE = 0o020;
        /// Execute by group.
        const GROUP_EXEC = 0o010;

        /// Read by others.
        const OTHER_READ = 0o004;
        /// Write by others.
        const OTHER_WRITE = 0o002;
        /// Execute by others.
        const OTHER_EXEC = 0o001;
    }
}

impl Permissions {
    /// Decode from a full mode word, discarding the type bits.
    pub fn from_mode(mode: u32) -> Self {
        Permissions::from_bits_truncate(mode)
    }

    /// True if any write bit is set.
    pub fn any_write(self) -> bool {
        self.intersects(
            Permissions::OWNER_WRITE | Permissions::GROUP_WRITE | Permissions::OTHER_WRITE,
        )
    }
}

/// Metadata about a remote file.
///
/// Every accessor returns `None` when the server did not report the field;
/// version-3 servers routinely omit fields on READDIR entries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetaData(FileAttrs);

impl MetaData {
    pub(crate) fn new(attrs: FileAttrs) -> Self {
        Self(attrs)
    }

    pub(crate) fn into_inner(self) -> FileAttrs {
        self.0
    }

    /// Size of the file in bytes.
    pub fn len(&self) -> Option<u64> {
        self.0.size
    }

    pub fn is_empty(&self) -> Option<bool> {
        self.0.size.map(|size| size == 0)
    }

    /// User id of the owner.
    pub fn uid(&self) -> Option<u32> {
        self.0.uid_gid.map(|(uid, _gid)| uid)
    }

    /// Group id of the owner.
    pub fn gid(&self) -> Option<u32> {
        self.0.uid_gid.map(|(_uid, gid)| gid)
    }

    /// Permission bits, without the type bits.
    pub fn permissions(&self) -> Option<Permissions> {
        self.0.permissions.map(Permissions::from_mode)
    }

    /// File type, decoded from the mode word.
    pub fn file_type(&self) -> Option<FileType> {
        self.0.permissions.map(FileType::from_mode)
    }

    /// Last access time, seconds since the epoch.
    pub fn accessed(&self) -> Option<u32> {
        self.0.times.map(|(atime, _mtime)| atime)
    }

    /// Last modification time, seconds since the epoch.
    pub fn modified(&self) -> Option<u32> {
        self.0.times.map(|(_atime, mtime)| mtime)
    }

    /// Extended attribute pairs, as sent by the server.
    pub fn extended(&self) -> &[(String, String)] {
        &self.0.extended
    }
}

/// Builder of [`MetaData`], used with the setstat family.
#[derive(Debug, Default, Clone)]
pub struct MetaDataBuilder(FileAttrs);

impl MetaDataBuilder {
    /// Create a builder.
    pub const fn new() -> Self {
        Self(FileAttrs::new())
    }

    /// Reset builder back to default.
    pub fn reset(&mut self) -> &mut Self {
        self.0 = FileAttrs::new();
        self
    }

    /// Set the size to truncate or extend to.
    pub fn len(&mut self, len: u64) -> &mut Self {
        self.0.size = Some(len);
        self
    }

    /// Set owner ids.
    pub fn id(&mut self, (uid, gid): (u32, u32)) -> &mut Self {
        self.0.uid_gid = Some((uid, gid));
        self
    }

    /// Set permission bits.
    pub fn permissions(&mut self, perm: Permissions) -> &mut Self {
        self.0.permissions = Some(perm.bits());
        self
    }

    /// Set access and modification times, seconds since the epoch.
    pub fn times(&mut self, atime: u32, mtime: u32) -> &mut Self {
        self.0.times = Some((atime, mtime));
        self
    }

    /// Create a [`MetaData`].
    pub fn create(&self) -> MetaData {
        MetaData(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_bit_pattern_decodes() {
        for (mode, typ) in [
            (0o140755, FileType::Socket),
            (0o120777, FileType::Symlink),
            (0o100644, FileType::Regular),
            (0o060660, FileType::BlockDevice),
            (0o040755, FileType::Directory),
            (0o020666, FileType::CharDevice),
            (0o010600, FileType::Fifo),
            (0o000644, FileType::Unknown),
        ] {
            assert_eq!(FileType::from_mode(mode), typ, "mode {mode:o}");
        }
    }

    #[test]
    fn type_bits_round_trip() {
        for typ in [
            FileType::Socket,
            FileType::Symlink,
            FileType::Regular,
            FileType::BlockDevice,
            FileType::Directory,
            FileType::CharDevice,
            FileType::Fifo,
        ] {
            assert_eq!(FileType::from_mode(typ.to_mode_bits() | 0o644), typ);
        }
    }

    #[test]
    fn permissions_strip_type_bits() {
        let perm = Permissions::from_mode(0o100644);
        assert_eq!(perm.bits(), 0o644);
        assert!(perm.contains(Permissions::OWNER_READ | Permissions::OWNER_WRITE));
        assert!(!perm.contains(Permissions::OWNER_EXEC));
        assert!(perm.any_write());
    }

    #[test]
    fn special_bits_survive() {
        let perm = Permissions::from_mode(0o104755);
        assert!(perm.contains(Permissions::SET_UID));
        assert!(!perm.contains(Permissions::SET_GID));
        assert!(!perm.contains(Permissions::STICKY));
    }

    #[test]
    fn builder_produces_partial_attrs() {
        let meta = MetaDataBuilder::new()
            .permissions(Permissions::from_mode(0o600))
            .times(10, 20)
            .create();

        assert_eq!(meta.permissions().unwrap().bits(), 0o600);
        assert_eq!(meta.accessed(), Some(10));
        assert_eq!(meta.modified(), Some(20));
        assert_eq!(meta.len(), None);
        assert_eq!(meta.uid(), None);
    }
}

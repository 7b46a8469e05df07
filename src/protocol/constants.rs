//! Wire constants of SFTP version 3 (draft-ietf-secsh-filexfer-02) plus the
//! OpenSSH extensions this crate understands.

pub(crate) const SFTP_VERSION: u32 = 3;

// Client-originated packet types.
pub(crate) const SSH_FXP_INIT: u8 = 1;
pub(crate) const SSH_FXP_OPEN: u8 = 3;
pub(crate) const SSH_FXP_CLOSE: u8 = 4;
pub(crate) const SSH_FXP_READ: u8 = 5;
pub(crate) const SSH_FXP_WRITE: u8 = 6;
pub(crate) const SSH_FXP_LSTAT: u8 = 7;
pub(crate) const SSH_FXP_FSTAT: u8 = 8;
pub(crate) const SSH_FXP_SETSTAT: u8 = 9;
pub(crate) const SSH_FXP_FSETSTAT: u8 = 10;
pub(crate) const SSH_FXP_OPENDIR: u8 = 11;
pub(crate) const SSH_FXP_READDIR: u8 = 12;
pub(crate) const SSH_FXP_REMOVE: u8 = 13;
pub(crate) const SSH_FXP_MKDIR: u8 = 14;
pub(crate) const SSH_FXP_RMDIR: u8 = 15;
pub(crate) const SSH_FXP_REALPATH: u8 = 16;
pub(crate) const SSH_FXP_STAT: u8 = 17;
pub(crate) const SSH_FXP_RENAME: u8 = 18;
pub(crate) const SSH_FXP_READLINK: u8 = 19;
pub(crate) const SSH_FXP_SYMLINK: u8 = 20;
pub(crate) const SSH_FXP_EXTENDED: u8 = 200;

// Server-originated packet types.
pub(crate) const SSH_FXP_VERSION: u8 = 2;
pub(crate) const SSH_FXP_STATUS: u8 = 101;
pub(crate) const SSH_FXP_HANDLE: u8 = 102;
pub(crate) const SSH_FXP_DATA: u8 = 103;
pub(crate) const SSH_FXP_NAME: u8 = 104;
pub(crate) const SSH_FXP_ATTRS: u8 = 105;
pub(crate) const SSH_FXP_EXTENDED_REPLY: u8 = 201;

// Status codes carried by SSH_FXP_STATUS.
pub(crate) const SSH_FX_OK: u32 = 0;
pub(crate) const SSH_FX_EOF: u32 = 1;
pub(crate) const SSH_FX_NO_SUCH_FILE: u32 = 2;
pub(crate) const SSH_FX_PERMISSION_DENIED: u32 = 3;
pub(crate) const SSH_FX_FAILURE: u32 = 4;
pub(crate) const SSH_FX_BAD_MESSAGE: u32 = 5;
pub(crate) const SSH_FX_NO_CONNECTION: u32 = 6;
pub(crate) const SSH_FX_CONNECTION_LOST: u32 = 7;
pub(crate) const SSH_FX_OP_UNSUPPORTED: u32 = 8;

// Open pflags.
pub(crate) const SSH_FXF_READ: u32 = 0x0000_0001;
pub(crate) const SSH_FXF_WRITE: u32 = 0x0000_0002;
pub(crate) const SSH_FXF_APPEND: u32 = 0x0000_0004;
pub(crate) const SSH_FXF_CREAT: u32 = 0x0000_0008;
pub(crate) const SSH_FXF_TRUNC: u32 = 0x0000_0010;
pub(crate) const SSH_FXF_EXCL: u32 = 0x0000_0020;

// Attribute flags.
pub(crate) const SSH_FILEXFER_ATTR_SIZE: u32 = 0x0000_0001;
pub(crate) const SSH_FILEXFER_ATTR_UIDGID: u32 = 0x0000_0002;
pub(crate) const SSH_FILEXFER_ATTR_PERMISSIONS: u32 = 0x0000_0004;
pub(crate) const SSH_FILEXFER_ATTR_ACMODTIME: u32 = 0x0000_0008;
pub(crate) const SSH_FILEXFER_ATTR_EXTENDED: u32 = 0x8000_0000;

// Portable-POSIX mode-type bits (upper nibble of st_mode).
pub(crate) const S_IFMT: u32 = 0o170000;
pub(crate) const S_IFSOCK: u32 = 0o140000;
pub(crate) const S_IFLNK: u32 = 0o120000;
pub(crate) const S_IFREG: u32 = 0o100000;
pub(crate) const S_IFBLK: u32 = 0o060000;
pub(crate) const S_IFDIR: u32 = 0o040000;
pub(crate) const S_IFCHR: u32 = 0o020000;
pub(crate) const S_IFIFO: u32 = 0o010000;

// Extensions advertised in SSH_FXP_VERSION and invoked via SSH_FXP_EXTENDED.
pub(crate) const EXT_POSIX_RENAME: &str = "posix-rename@openssh.com";
pub(crate) const EXT_HARDLINK: &str = "hardlink@openssh.com";
pub(crate) const EXT_FSYNC: &str = "fsync@openssh.com";
pub(crate) const EXT_STATVFS: &str = "statvfs@openssh.com";

use std::num::{NonZeroU16, NonZeroU32};

/// Fixed per-packet overhead on top of a READ/WRITE data body: type, request
/// id, handle string (up to 256 bytes on non-OpenSSH servers), offset and
/// length fields, with headroom.
pub(crate) const PACKET_OVERHEAD: u32 = 1024;

pub(crate) const DEFAULT_MAX_DATA_LEN: u32 = 32 * 1024;
pub(crate) const DEFAULT_MAX_INFLIGHT: u16 = 64;

/// Options when creating an [`super::Sftp`]. Immutable after the session is
/// constructed.
///
/// The limits can only be raised above their defaults, never lowered: a
/// request for a smaller value than the default is ignored. Raising
/// `max_data_len` raises `max_packet_len` along with it so a maximal data
/// packet always fits.
#[derive(Debug, Copy, Clone, Default)]
pub struct SftpOptions {
    max_inflight: Option<NonZeroU16>,
    max_data_len: Option<NonZeroU32>,
    max_packet_len: Option<NonZeroU32>,
}

impl SftpOptions {
    /// Create a new [`SftpOptions`] with every knob at its default.
    pub const fn new() -> Self {
        Self {
            max_inflight: None,
            max_data_len: None,
            max_packet_len: None,
        }
    }

    /// Set the upper bound on concurrently outstanding requests, the
    /// engine's primary backpressure knob. Unlike the length limits below
    /// it can be set to any non-zero value.
    ///
    /// It is set to 64 by default.
    #[must_use]
    pub const fn max_inflight(mut self, max_inflight: NonZeroU16) -> Self {
        self.max_inflight = Some(max_inflight);
        self
    }

    /// Set the upper bound on a single READ/WRITE data body. Transfers
    /// larger than this are split into pipelined sub-requests.
    ///
    /// It is set to 32768 by default, the largest body all common servers
    /// accept.
    #[must_use]
    pub const fn max_data_len(mut self, max_data_len: NonZeroU32) -> Self {
        self.max_data_len = Some(max_data_len);
        self
    }

    /// Set the upper bound on any single packet. Inbound frames larger than
    /// this are treated as a protocol error.
    #[must_use]
    pub const fn max_packet_len(mut self, max_packet_len: NonZeroU32) -> Self {
        self.max_packet_len = Some(max_packet_len);
        self
    }

    pub(crate) fn get_max_inflight(&self) -> u16 {
        self.max_inflight
            .map(NonZeroU16::get)
            .unwrap_or(DEFAULT_MAX_INFLIGHT)
    }

    pub(crate) fn get_max_data_len(&self) -> u32 {
        match self.max_data_len.map(NonZeroU32::get) {
            Some(v) if v > DEFAULT_MAX_DATA_LEN => v,
            _ => DEFAULT_MAX_DATA_LEN,
        }
    }

    pub(crate) fn get_max_packet_len(&self) -> u32 {
        let floor = self.get_max_data_len().saturating_add(PACKET_OVERHEAD);
        match self.max_packet_len.map(NonZeroU32::get) {
            Some(v) if v > floor => v,
            _ => floor,
        }
    }
}

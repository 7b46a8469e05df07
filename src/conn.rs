//! The connection core: one writer task draining a queue of whole frames,
//! one reader task, a monotonically allocated request id per dispatch, and
//! an in-flight map routing each reply to the slot its caller is waiting on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::options::SftpOptions;
use crate::pool::{self, BufferPool, Reply, SlotGuard, SlotPool};
use crate::protocol::attrs::FileAttrs;
use crate::protocol::constants::*;
use crate::protocol::packet::{self, NameEntry, RawPacket, Request, StatVfs};

pub(crate) type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A server hello longer than this is not a version negotiation, it is
/// garbage on the stream.
const MAX_HELLO_LEN: u32 = 4096;

/// Extensions announced by the server in its VERSION packet.
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    pub(crate) posix_rename: bool,
    pub(crate) hardlink: bool,
    pub(crate) fsync: bool,
    pub(crate) statvfs: bool,
    map: HashMap<String, String>,
}

impl Extensions {
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let map: HashMap<_, _> = pairs.into_iter().collect();
        Self {
            posix_rename: map.contains_key(EXT_POSIX_RENAME),
            hardlink: map.contains_key(EXT_HARDLINK),
            fsync: map.contains_key(EXT_FSYNC),
            statvfs: map.contains_key(EXT_STATVFS),
            map,
        }
    }

    /// Whether the server announced `name`.
    pub fn supports(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// The data string the server announced for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }
}

/// Negotiated limits, fixed at session construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub(crate) max_inflight: usize,
    pub(crate) max_data_len: u32,
    pub(crate) max_packet_len: u32,
}

#[derive(Debug)]
pub(crate) struct Conn {
    next_id: AtomicU32,
    inflight: Mutex<HashMap<u32, mpsc::Sender<Reply>>>,

    /// Whole frames for the writer task. A frame is marshalled completely
    /// before it is enqueued, so a cancelled dispatch can never leave the
    /// wire mid-packet.
    writer_tx: mpsc::Sender<Vec<u8>>,

    /// Cancelled exactly once, by `disconnect`.
    closed: CancellationToken,
    terminal: OnceCell<Arc<Error>>,

    bufs: BufferPool,
    slots: SlotPool,
    limits: Limits,
    extensions: Extensions,
}

impl Conn {
    fn new(writer_tx: mpsc::Sender<Vec<u8>>, limits: Limits, extensions: Extensions) -> Self {
        let bufs = BufferPool::new(limits.max_packet_len as usize, limits.max_inflight);
        let slots = SlotPool::new(limits.max_inflight, bufs.clone());
        Self {
            next_id: AtomicU32::new(1),
            inflight: Mutex::new(HashMap::with_capacity(limits.max_inflight)),
            writer_tx,
            closed: CancellationToken::new(),
            terminal: OnceCell::new(),
            bufs,
            slots,
            limits,
            extensions,
        }
    }

    pub(crate) fn limits(&self) -> Limits {
        self.limits
    }

    pub(crate) fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// The token cancelled when the connection reaches its terminal state.
    pub(crate) fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// The terminal error, once the reader has shut down.
    pub(crate) fn terminal(&self) -> Option<Arc<Error>> {
        self.terminal.get().cloned()
    }

    pub(crate) fn reclaim(&self, buf: Vec<u8>) {
        self.bufs.put(buf);
    }

    /// Borrow a pooled buffer for scratch use; hand it back with
    /// [`Conn::reclaim`].
    pub(crate) fn scratch(&self) -> Vec<u8> {
        self.bufs.get()
    }

    /// Send one request and register its reply slot.
    ///
    /// Acquiring the slot suspends while max-in-flight requests are
    /// outstanding. The frame (header plus any payload) is enqueued whole;
    /// the writer task keeps it contiguous on the wire. The per-handle
    /// close signal is checked right before the in-flight insert, so a
    /// close strictly happens-before the rejection of any later dispatch
    /// on that handle.
    pub(crate) async fn dispatch(
        &self,
        req: &Request<'_>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(u32, SlotGuard), Error> {
        let slot = self.slots.get().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut frame = self.bufs.get();
        if let Some(payload) = req.marshal(id, &mut frame) {
            // The payload aliases caller memory; completing the frame here
            // keeps the enqueue-then-write path atomic under cancellation.
            frame.extend_from_slice(payload);
        }

        if self.closed.is_cancelled() {
            self.bufs.put(frame);
            return Err(Error::ConnectionLost);
        }
        if cancel.map_or(false, CancellationToken::is_cancelled) {
            self.bufs.put(frame);
            return Err(Error::HandleClosed);
        }

        self.inflight.lock().insert(id, slot.sender());
        trace!("dispatch id={id} type={}", req.packet_type());

        match self.writer_tx.send(frame).await {
            Ok(()) => Ok((id, slot)),
            // Writer gone: the connection is done for. The in-flight entry
            // is cleaned up by the disconnect broadcast.
            Err(err) => {
                self.bufs.put(err.0);
                Err(Error::ConnectionLost)
            }
        }
    }

    /// Wait for the reply to `id`.
    ///
    /// A delivered reply wins over a concurrently cancelled handle. If the
    /// enclosing future is dropped instead, the slot guard sanitizes the
    /// rendezvous so the late reply is absorbed.
    pub(crate) async fn recv(
        &self,
        id: u32,
        slot: &mut SlotGuard,
        cancel: Option<&CancellationToken>,
    ) -> Result<RawPacket, Error> {
        let reply = if let Some(token) = cancel {
            tokio::select! {
                biased;
                reply = slot.recv() => reply,
                _ = token.cancelled() => return Err(Error::HandleClosed),
                _ = self.closed.cancelled() => return Err(Error::ConnectionLost),
            }
        } else {
            tokio::select! {
                biased;
                reply = slot.recv() => reply,
                _ = self.closed.cancelled() => return Err(Error::ConnectionLost),
            }
        };

        match reply {
            Reply::Packet(pkt) => {
                if pkt.request_id != id {
                    let actual = pkt.request_id;
                    self.bufs.put(pkt.into_buf());
                    return Err(Error::IdMismatch {
                        expected: id,
                        actual,
                    });
                }
                Ok(pkt)
            }
            Reply::Lost => Err(Error::ConnectionLost),
        }
    }

    /// Dispatch one request and wait for its reply.
    pub(crate) async fn round_trip(
        &self,
        req: &Request<'_>,
        cancel: Option<&CancellationToken>,
    ) -> Result<RawPacket, Error> {
        let (id, mut slot) = self.dispatch(req, cancel).await?;
        self.recv(id, &mut slot, cancel).await
    }

    /// Tear the connection down: no new dispatches, terminal error recorded,
    /// closed broadcast fired, and connection-lost delivered to every
    /// in-flight slot.
    pub(crate) fn disconnect(&self, err: Error) {
        if self.terminal.set(Arc::new(err)).is_err() {
            return;
        }
        debug!(
            "sftp connection terminated: {}",
            self.terminal.get().expect("just set")
        );

        self.slots.close();
        self.closed.cancel();

        let pending: Vec<_> = self.inflight.lock().drain().collect();
        for (_id, tx) in pending {
            pool::deliver(&tx, Reply::Lost, &self.bufs);
        }
    }

    // Reply finishing: decode one typed response out of a raw packet and
    // hand the frame buffer back to the pool.

    fn status_error(&self, pkt: RawPacket) -> Error {
        let res = packet::parse_status(pkt.body());
        self.bufs.put(pkt.into_buf());
        match res {
            // An OK where a data-bearing reply was required is a protocol
            // violation, not a success.
            Ok(status) => match status.into_result() {
                Ok(()) => Error::BadMessage("ok status where data was required"),
                Err(err) => err,
            },
            Err(err) => err,
        }
    }

    pub(crate) fn finish_status(&self, pkt: RawPacket) -> Result<(), Error> {
        match pkt.typ {
            SSH_FXP_STATUS => {
                let res = packet::parse_status(pkt.body());
                self.bufs.put(pkt.into_buf());
                res?.into_result()
            }
            actual => {
                self.bufs.put(pkt.into_buf());
                Err(Error::UnexpectedPacket { actual })
            }
        }
    }

    pub(crate) fn finish_handle(&self, pkt: RawPacket) -> Result<Box<[u8]>, Error> {
        match pkt.typ {
            SSH_FXP_HANDLE => {
                let res = packet::parse_handle(pkt.body());
                self.bufs.put(pkt.into_buf());
                res
            }
            SSH_FXP_STATUS => Err(self.status_error(pkt)),
            actual => {
                self.bufs.put(pkt.into_buf());
                Err(Error::UnexpectedPacket { actual })
            }
        }
    }

    pub(crate) fn finish_attrs(&self, pkt: RawPacket) -> Result<FileAttrs, Error> {
        match pkt.typ {
            SSH_FXP_ATTRS => {
                let res = packet::parse_attrs(pkt.body());
                self.bufs.put(pkt.into_buf());
                res
            }
            SSH_FXP_STATUS => Err(self.status_error(pkt)),
            actual => {
                self.bufs.put(pkt.into_buf());
                Err(Error::UnexpectedPacket { actual })
            }
        }
    }

    pub(crate) fn finish_name(&self, pkt: RawPacket) -> Result<Vec<NameEntry>, Error> {
        match pkt.typ {
            SSH_FXP_NAME => {
                let res = packet::parse_name(pkt.body());
                self.bufs.put(pkt.into_buf());
                res
            }
            SSH_FXP_STATUS => Err(self.status_error(pkt)),
            actual => {
                self.bufs.put(pkt.into_buf());
                Err(Error::UnexpectedPacket { actual })
            }
        }
    }

    pub(crate) fn finish_statvfs(&self, pkt: RawPacket) -> Result<StatVfs, Error> {
        match pkt.typ {
            SSH_FXP_EXTENDED_REPLY => {
                let res = packet::parse_statvfs(pkt.body());
                self.bufs.put(pkt.into_buf());
                res
            }
            SSH_FXP_STATUS => Err(self.status_error(pkt)),
            actual => {
                self.bufs.put(pkt.into_buf());
                Err(Error::UnexpectedPacket { actual })
            }
        }
    }
}

/// Negotiate the protocol version, then start the writer and reader tasks.
///
/// Not cancel safe: dropping this future mid-handshake leaves the stream in
/// an undefined state. Bound it with a timeout where needed.
pub(crate) async fn connect(
    mut reader: BoxReader,
    mut writer: BoxWriter,
    options: &SftpOptions,
) -> Result<(Arc<Conn>, Vec<JoinHandle<()>>), Error> {
    let limits = Limits {
        max_inflight: usize::from(options.get_max_inflight()),
        max_data_len: options.get_max_data_len(),
        max_packet_len: options.get_max_packet_len(),
    };

    let mut scratch = Vec::new();
    packet::marshal_init(SFTP_VERSION, &mut scratch);
    writer.write_all(&scratch).await?;
    writer.flush().await?;

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);
    if !(5..=MAX_HELLO_LEN).contains(&len) {
        return Err(Error::BadMessage("version packet has unreasonable length"));
    }
    let mut body = vec![0; len as usize];
    reader.read_exact(&mut body).await?;

    let hello = packet::parse_version(&body)?;
    if hello.version != SFTP_VERSION {
        return Err(Error::UnsupportedVersion {
            version: hello.version,
        });
    }
    let extensions = Extensions::from_pairs(hello.extensions);
    debug!(
        "negotiated sftp v{} with {} extension(s)",
        SFTP_VERSION,
        extensions.map.len()
    );

    let (writer_tx, writer_rx) = mpsc::channel(limits.max_inflight);
    let conn = Arc::new(Conn::new(writer_tx, limits, extensions));
    let tasks = vec![
        tokio::spawn(write_loop(Arc::clone(&conn), writer, writer_rx)),
        tokio::spawn(recv_loop(Arc::clone(&conn), reader)),
    ];

    Ok((conn, tasks))
}

/// The single writer: drain whole frames off the queue, grouping flushes
/// when more frames are already waiting.
async fn write_loop(conn: Arc<Conn>, mut writer: BoxWriter, mut rx: mpsc::Receiver<Vec<u8>>) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
            _ = conn.closed.cancelled() => return,
        };

        let mut next = Some(frame);
        while let Some(frame) = next {
            let res = writer.write_all(&frame).await;
            conn.bufs.put(frame);
            if let Err(err) = res {
                conn.disconnect(Error::Io(err));
                return;
            }
            next = rx.try_recv().ok();
        }

        if let Err(err) = writer.flush().await {
            conn.disconnect(Error::Io(err));
            return;
        }
    }
}

/// The single long-running reader: parse frames, route them by request id,
/// tear the connection down on the first read or protocol error.
async fn recv_loop(conn: Arc<Conn>, mut reader: BoxReader) {
    let err = loop {
        let mut len_bytes = [0u8; 4];
        if let Err(err) = reader.read_exact(&mut len_bytes).await {
            break Error::Io(err);
        }
        let len = u32::from_be_bytes(len_bytes);
        if len < 5 {
            break Error::BadMessage("frame shorter than type + request id");
        }
        if len > conn.limits.max_packet_len {
            break Error::PacketTooLong {
                len,
                limit: conn.limits.max_packet_len,
            };
        }

        let mut buf = conn.bufs.get();
        buf.resize(len as usize, 0);
        if let Err(err) = reader.read_exact(&mut buf).await {
            break Error::Io(err);
        }

        let pkt = match RawPacket::parse(buf, len as usize) {
            Ok(pkt) => pkt,
            Err(err) => break err,
        };
        trace!("recv id={} type={}", pkt.request_id, pkt.typ);

        let tx = conn.inflight.lock().remove(&pkt.request_id);
        match tx {
            Some(tx) => pool::deliver(&tx, Reply::Packet(pkt), &conn.bufs),
            None => {
                conn.bufs.put(pkt.into_buf());
                break Error::BadMessage("reply for a request id that is not in flight");
            }
        }
    };

    conn.disconnect(err);
}

//! One-shot lifecycle for server-assigned file and directory handles.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::conn::Conn;
use crate::error::Error;
use crate::protocol::packet::Request;

/// A server handle string plus its close state.
///
/// The handle cell is taken exactly once: the winner of a close race sends
/// the single CLOSE request, every later operation observes the empty cell
/// and fails with [`Error::HandleClosed`]. The `closed` token is cancelled
/// right after the swap so in-flight operations on this handle return
/// promptly; their late replies are absorbed by the slot machinery.
#[derive(Debug)]
pub(crate) struct RemoteHandle {
    conn: Arc<Conn>,
    raw: Mutex<Option<Arc<[u8]>>>,
    closed: CancellationToken,
}

impl RemoteHandle {
    pub(crate) fn new(conn: Arc<Conn>, raw: Box<[u8]>) -> Self {
        Self {
            conn,
            raw: Mutex::new(Some(raw.into())),
            closed: CancellationToken::new(),
        }
    }

    pub(crate) fn conn(&self) -> &Arc<Conn> {
        &self.conn
    }

    /// The per-handle close signal, one of the two cancellation dimensions
    /// every operation selects on.
    pub(crate) fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    /// The handle string, or the closed error once `close` has won.
    pub(crate) fn get(&self) -> Result<Arc<[u8]>, Error> {
        self.raw.lock().clone().ok_or(Error::HandleClosed)
    }

    /// Close the handle. Exactly one caller sends the CLOSE request; it is
    /// deliberately not bound to the handle's own close signal, so it runs
    /// to completion even though `closed` fires first.
    pub(crate) async fn close(&self) -> Result<(), Error> {
        let raw = self.raw.lock().take().ok_or(Error::HandleClosed)?;
        self.closed.cancel();

        let pkt = self
            .conn
            .round_trip(&Request::Close { handle: &raw }, None)
            .await?;
        self.conn.finish_status(pkt)
    }

    /// Best-effort close for `Drop` impls: fire the CLOSE from a background
    /// task when a runtime is available, otherwise just poison the cell.
    pub(crate) fn close_in_background(&self) {
        let Some(raw) = self.raw.lock().take() else {
            return;
        };
        self.closed.cancel();

        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let conn = Arc::clone(&self.conn);
            rt.spawn(async move {
                if let Ok(pkt) = conn.round_trip(&Request::Close { handle: &raw }, None).await {
                    let _ = conn.finish_status(pkt);
                }
            });
        }
    }
}

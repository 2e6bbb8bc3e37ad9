//! The sending half of a TCP connection.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::stream::DeadlineManager;
use super::TcpSegment;

/// Gap between (re)transmissions of the outstanding segment, and between
/// persist probes while the remote window is zero.
pub(crate) const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// The outgoing chunk currently in flight.
///
/// The buffer holds either pending application bytes or a pending FIN,
/// never both: `write` and `close` each wait for the previous deposit to
/// drain before making theirs.
pub(crate) struct WriteBuffer {
    /// Sequence number of the start of the buffer. With `send_eof` set it
    /// is the position of the FIN, or one past it once `sent_eof` is set.
    sequence: u32,
    buffer: Vec<u8>,
    send_eof: bool,
    sent_eof: bool,
}

impl WriteBuffer {
    pub(crate) fn new(sequence: u32) -> WriteBuffer {
        WriteBuffer {
            sequence,
            buffer: Vec::new(),
            send_eof: false,
            sent_eof: false,
        }
    }

    /// Deposit outgoing data. The buffer must be drained.
    fn set_data(&mut self, data: Vec<u8>) {
        debug_assert!(self.buffer.is_empty() && !self.send_eof);
        self.buffer = data;
    }

    /// Deposit the EOF. The buffer must be drained.
    fn set_eof(&mut self) {
        debug_assert!(self.buffer.is_empty());
        self.send_eof = true;
    }

    /// Absorb an acknowledgment, advancing the sequence.
    fn handle(&mut self, ack: u32) {
        let offset = ack.wrapping_sub(self.sequence);

        // "Less than" in circular arithmetic: acks beyond the in-flight
        // range are stale or forged, ignore them.
        if offset > self.remaining() {
            return;
        }

        if offset == self.remaining() {
            self.sequence = self.sequence.wrapping_add(self.remaining());
            self.sent_eof = self.send_eof;
            self.buffer.clear();
        } else {
            self.sequence = self.sequence.wrapping_add(offset);
            self.buffer.drain(..offset as usize);
        }
    }

    /// The next segment to transmit, at most `max_size` bytes.
    ///
    /// Only valid while `remaining() > 0`.
    fn segment(&self, max_size: u16) -> TcpSegment {
        debug_assert!(self.remaining() > 0);
        if self.send_eof {
            return TcpSegment {
                start: self.sequence,
                data: Vec::new(),
                fin: true,
            };
        }
        let len = self.buffer.len().min(usize::from(max_size));
        TcpSegment {
            start: self.sequence,
            data: self.buffer[..len].to_vec(),
            fin: false,
        }
    }

    /// Sequence increments still unacknowledged; a pending FIN counts one.
    fn remaining(&self) -> u32 {
        if self.send_eof && !self.sent_eof {
            return 1;
        }
        self.buffer.len() as u32
    }

    fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// Retransmit/persist timing for one connection.
///
/// `send` emits a segment now and again every interval until cancelled;
/// `schedule` starts emitting only after the first interval, which is the
/// persist-probe shape. The channel holds a single segment; if the
/// connection loop is not draining it, rescheduled segments simply drop.
struct SendTimer {
    tx: mpsc::Sender<TcpSegment>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SendTimer {
    fn new() -> (SendTimer, mpsc::Receiver<TcpSegment>) {
        let (tx, rx) = mpsc::channel(1);
        let timer = SendTimer {
            tx,
            task: Mutex::new(None),
        };
        (timer, rx)
    }

    fn cancel(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    fn send(&self, segment: TcpSegment) {
        let tx = self.tx.clone();
        self.replace(tokio::spawn(async move {
            loop {
                let _ = tx.try_send(segment.clone());
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }));
    }

    fn schedule(&self, segment: TcpSegment) {
        let tx = self.tx.clone();
        self.replace(tokio::spawn(async move {
            loop {
                tokio::time::sleep(RETRY_INTERVAL).await;
                let _ = tx.try_send(segment.clone());
            }
        }));
    }

    fn replace(&self, task: JoinHandle<()>) {
        if let Some(old) = self.task.lock().replace(task) {
            old.abort();
        }
    }
}

impl Drop for SendTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct SendState {
    buffer: WriteBuffer,
    window: u16,
    fail: Option<Error>,
    notify: CancellationToken,
}

impl SendState {
    fn wake(&mut self) {
        std::mem::replace(&mut self.notify, CancellationToken::new()).cancel();
    }
}

/// The send side: write buffer, retransmit/persist timer, and write
/// deadline.
pub(crate) struct TcpSend {
    mss: u16,
    write_lock: tokio::sync::Mutex<()>,
    state: Mutex<SendState>,
    timer: SendTimer,
    deadline: DeadlineManager,
}

impl TcpSend {
    /// Create the send side along with the channel of desired outgoing
    /// segments. Not draining the channel causes segments to be dropped
    /// until the next timer fire.
    pub(crate) fn new(sequence: u32, window: u16, mss: u16)
                      -> (TcpSend, mpsc::Receiver<TcpSegment>) {
        let (timer, next) = SendTimer::new();
        let send = TcpSend {
            mss,
            write_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SendState {
                buffer: WriteBuffer::new(sequence),
                window,
                fail: None,
                notify: CancellationToken::new(),
            }),
            timer,
            deadline: DeadlineManager::new(),
        };
        (send, next)
    }

    /// Write all of `data`, blocking until it is acknowledged.
    pub(crate) async fn write(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.write_or_close(Some(data)).await
    }

    /// Queue the EOF and block until it is acknowledged.
    pub(crate) async fn close(&self) -> Result<()> {
        self.write_or_close(None).await.map(|_| ())
    }

    async fn write_or_close(&self, data: Option<&[u8]>) -> Result<usize> {
        let _writer = self.write_lock.lock().await;

        if data.is_some() && self.deadline.fired().is_cancelled() {
            return Err(Error::Timeout("write"));
        }

        let notify = {
            let mut state = self.state.lock();
            if state.buffer.send_eof {
                return Err(Error::AlreadyClosed);
            }
            if let Some(err) = &state.fail {
                return Err(err.clone());
            }
            match data {
                Some(data) => state.buffer.set_data(data.to_vec()),
                None => state.buffer.set_eof(),
            }
            self.send_next(&mut state);
            state.notify.clone()
        };

        let fired = self.deadline.fired();
        tokio::select! {
            _ = notify.cancelled() => {}
            _ = fired.cancelled() => return Err(Error::Timeout("write")),
        }

        let state = self.state.lock();
        if let Some(err) = &state.fail {
            return Err(err.clone());
        }
        Ok(data.map_or(0, <[u8]>::len))
    }

    /// Absorb an acknowledgment and window update from the peer.
    pub(crate) fn handle(&self, ack: u32, window: u16) {
        let mut state = self.state.lock();
        state.buffer.handle(ack);
        state.window = window;
        self.send_next(&mut state);
        if state.buffer.remaining() == 0 {
            state.wake();
        }
    }

    /// Record a failure; pending and future writes see it.
    pub(crate) fn fail(&self, err: Error) {
        self.timer.cancel();
        let mut state = self.state.lock();
        state.fail = Some(err);
        state.wake();
    }

    /// The first sequence number not yet acknowledged.
    pub(crate) fn seq(&self) -> u32 {
        self.state.lock().buffer.sequence()
    }

    /// Whether the EOF went out and nothing more will be sent.
    pub(crate) fn done(&self) -> bool {
        let state = self.state.lock();
        state.buffer.sent_eof || state.fail.is_some()
    }

    pub(crate) fn set_deadline(&self, deadline: Option<Instant>) {
        self.deadline.set(deadline);
    }

    /// Kick the timer for whatever the buffer holds.
    ///
    /// With a closed remote window this degrades to a one-byte persist
    /// probe so the connection cannot deadlock on a lost window update.
    fn send_next(&self, state: &mut SendState) {
        self.timer.cancel();

        if state.buffer.remaining() == 0 {
            return;
        }

        if state.window == 0 {
            self.timer.schedule(state.buffer.segment(1));
            return;
        }

        let max = state.window.min(self.mss);
        self.timer.send(state.buffer.segment(max));
    }
}

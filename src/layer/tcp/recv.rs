//! The receiving half of a TCP connection.

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::stream::DeadlineManager;
use super::TcpSegment;

/// Where the sender's FIN sits relative to the assembler window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinState {
    /// No FIN has been seen (or it did not fit the window yet).
    None,
    /// The FIN sits this many bytes past the next expected byte.
    At(usize),
    /// The FIN has been consumed; the sequence is finished.
    Consumed,
}

/// Reorders raw segments into the byte stream.
///
/// The window is a fixed ring of bytes starting at the next expected
/// sequence number, with a parallel bitmap marking which positions have
/// arrived. Out-of-window bytes are dropped: behind the window they are
/// retransmissions of consumed data, ahead of it they exceed what was
/// advertised. Duplicate bytes overwrite idempotently.
pub(crate) struct TcpAssembler {
    sequence: u32,
    window: Vec<u8>,
    mask: Vec<bool>,
    fin: FinState,
}

impl TcpAssembler {
    pub(crate) fn new(sequence: u32, capacity: usize) -> TcpAssembler {
        TcpAssembler {
            sequence,
            window: vec![0; capacity],
            mask: vec![false; capacity],
            fin: FinState::None,
        }
    }

    /// Merge a segment's bytes into the window.
    ///
    /// All positions are computed modulo 2³², so a segment that partially
    /// overlaps already-consumed data contributes exactly its fresh bytes.
    /// A FIN whose end-of-data offset does not fit the window is ignored
    /// here; the sender retransmits it and a later call records it once
    /// the window has slid far enough.
    pub(crate) fn add_segment(&mut self, segment: &TcpSegment) {
        if self.fin == FinState::Consumed {
            return;
        }

        let rel = segment.start.wrapping_sub(self.sequence);
        for (index, &byte) in segment.data.iter().enumerate() {
            let offset = rel.wrapping_add(index as u32) as usize;
            if offset < self.window.len() {
                self.window[offset] = byte;
                self.mask[offset] = true;
            }
        }

        if segment.fin {
            let end = rel.wrapping_add(segment.data.len() as u32) as usize;
            if end <= self.window.len() {
                self.fin = FinState::At(end);
            }
        }
    }

    /// Remove up to `limit` bytes of the contiguous received prefix,
    /// advancing the window. The second result is true exactly when this
    /// call consumed the FIN.
    pub(crate) fn skim(&mut self, limit: usize) -> (Vec<u8>, bool) {
        if self.fin == FinState::Consumed {
            return (Vec::new(), false);
        }

        let mut run = self.mask.iter().take_while(|&&bit| bit).count();
        if let FinState::At(fin) = self.fin {
            run = run.min(fin);
        }
        let take = run.min(limit);
        let out = self.window[..take].to_vec();

        let eof = match self.fin {
            FinState::At(fin) => take == fin,
            _ => false,
        };

        self.window.copy_within(take.., 0);
        self.mask.copy_within(take.., 0);
        let len = self.mask.len();
        self.mask[len - take..].fill(false);

        if eof {
            self.sequence = self.sequence.wrapping_add(take as u32 + 1);
            self.fin = FinState::Consumed;
        } else {
            self.sequence = self.sequence.wrapping_add(take as u32);
            if let FinState::At(fin) = &mut self.fin {
                *fin -= take;
            }
        }
        (out, eof)
    }

    /// The next expected byte, which is also the number to acknowledge.
    pub(crate) fn seq(&self) -> u32 {
        self.sequence
    }

    pub(crate) fn finished(&self) -> bool {
        self.fin == FinState::Consumed
    }
}

struct RecvState {
    assembler: TcpAssembler,
    buffer: Vec<u8>,
    eof: bool,
    fail: Option<Error>,
    notify: CancellationToken,
    window_open: CancellationToken,
    window_was_closed: bool,
}

impl RecvState {
    fn wake(&mut self) {
        std::mem::replace(&mut self.notify, CancellationToken::new()).cancel();
    }

    /// Move contiguous assembler bytes into the delivery buffer, bounded
    /// by the free capacity.
    fn skim_into_buffer(&mut self, buffer_max: usize) {
        let free = buffer_max.saturating_sub(self.buffer.len());
        let (bytes, eof) = self.assembler.skim(free);
        self.buffer.extend_from_slice(&bytes);
        if eof {
            self.eof = true;
        }
        if self.buffer.len() >= buffer_max {
            self.window_was_closed = true;
        }
    }
}

/// The receive side: assembler, bounded delivery buffer, flow-control
/// window, and read deadline.
pub(crate) struct TcpRecv {
    buffer_max: usize,
    state: Mutex<RecvState>,
    deadline: DeadlineManager,
}

impl TcpRecv {
    pub(crate) fn new(sequence: u32, buffer_max: usize) -> TcpRecv {
        TcpRecv {
            buffer_max,
            state: Mutex::new(RecvState {
                assembler: TcpAssembler::new(sequence, buffer_max),
                buffer: Vec::new(),
                eof: false,
                fail: None,
                notify: CancellationToken::new(),
                window_open: CancellationToken::new(),
                window_was_closed: false,
            }),
            deadline: DeadlineManager::new(),
        }
    }

    /// Read some bytes, blocking until data, EOF, failure, or deadline.
    ///
    /// `Ok(0)` is end of stream, and only ever returned with an empty
    /// delivery buffer.
    pub(crate) async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let fired = self.deadline.fired();
            if fired.is_cancelled() {
                return Err(Error::Timeout("read"));
            }

            let notify = {
                let mut state = self.state.lock();
                if !state.buffer.is_empty() {
                    let n = state.buffer.len().min(buf.len());
                    buf[..n].copy_from_slice(&state.buffer[..n]);
                    state.buffer.drain(..n);

                    // Reading freed delivery space; slide the window and
                    // tell the peer if it had closed entirely.
                    state.skim_into_buffer(self.buffer_max);
                    if state.window_was_closed && state.buffer.len() < self.buffer_max {
                        state.window_was_closed = false;
                        std::mem::replace(&mut state.window_open, CancellationToken::new())
                            .cancel();
                    }
                    return Ok(n);
                }
                if state.eof {
                    return Ok(0);
                }
                if let Some(err) = &state.fail {
                    return Err(err.clone());
                }
                state.notify.clone()
            };

            tokio::select! {
                _ = notify.cancelled() => {}
                _ = fired.cancelled() => return Err(Error::Timeout("read")),
            }
        }
    }

    /// Feed one incoming segment through the assembler.
    pub(crate) fn handle(&self, segment: &TcpSegment) {
        let mut state = self.state.lock();
        state.assembler.add_segment(segment);
        state.skim_into_buffer(self.buffer_max);
        state.wake();
    }

    /// Record a failure; readers see it once the buffer drains.
    pub(crate) fn fail(&self, err: Error) {
        let mut state = self.state.lock();
        state.fail = Some(err);
        state.wake();
    }

    /// The acknowledgment number to advertise.
    pub(crate) fn ack(&self) -> u32 {
        self.state.lock().assembler.seq()
    }

    /// Free delivery capacity, clamped to a window field.
    pub(crate) fn window(&self) -> u16 {
        let state = self.state.lock();
        self.buffer_max.saturating_sub(state.buffer.len()).min(0xffff) as u16
    }

    /// A signal that fires once when the window reopens from zero.
    pub(crate) fn window_open(&self) -> CancellationToken {
        self.state.lock().window_open.clone()
    }

    pub(crate) fn set_deadline(&self, deadline: Option<Instant>) {
        self.deadline.set(deadline);
    }

    /// Whether nothing more will arrive: FIN consumed or failed.
    pub(crate) fn done(&self) -> bool {
        let state = self.state.lock();
        state.assembler.finished() || state.fail.is_some()
    }
}

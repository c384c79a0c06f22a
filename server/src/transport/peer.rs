//! Per-peer transport state: handshake progress, sequence dedup bitmap,
//! reliable outbox, and heartbeat bookkeeping (§4.3).

use std::collections::VecDeque;
use std::net::SocketAddr;

use protocol::{Frame, PeerId};

use crate::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Handshaking,
    Live,
    Draining,
    Closed,
}

/// A frame awaiting acknowledgment, resent on `reliable_resend_interval_ms`
/// up to `max_reliable_resends` (§4.3, §5's "Cancellation and timeouts").
#[derive(Debug, Clone)]
struct OutboxEntry {
    frame: Frame,
    first_sent_at: f64,
    last_sent_at: f64,
    resends: u32,
}

/// The 32-bit sliding dedup window over the preceding sequence numbers
/// (§4.3): bit `i` set means `last_seq - i` has been observed.
#[derive(Debug, Clone, Copy, Default)]
struct SequenceWindow {
    last_seq: Option<u32>,
    bitmap: u32,
}

impl SequenceWindow {
    /// Returns `true` if `seq` is new (should be delivered), `false` if it is
    /// a duplicate and must be dropped silently.
    fn observe(&mut self, seq: u32) -> bool {
        let Some(last) = self.last_seq else {
            self.last_seq = Some(seq);
            self.bitmap = 0;
            return true;
        };

        if seq > last {
            let shift = seq - last;
            self.bitmap = if shift >= 32 { 0 } else { (self.bitmap << shift) | (1 << (shift - 1)) };
            self.last_seq = Some(seq);
            true
        } else {
            let back = last - seq;
            if back == 0 || back > 32 {
                // Exact repeat of the newest seq, or too old to track: treat
                // as a duplicate rather than risk replaying ancient frames.
                false
            } else {
                let bit = 1u32 << (back - 1);
                let seen = self.bitmap & bit != 0;
                self.bitmap |= bit;
                !seen
            }
        }
    }
}

pub struct Peer {
    pub peer_id: PeerId,
    pub address: SocketAddr,
    pub state: PeerState,
    pub connect_username: String,
    inbound_window: SequenceWindow,
    next_outbound_seq: u32,
    outbox: VecDeque<OutboxEntry>,
    pub last_recv_at: f64,
    pub last_ping_sent_at: f64,
    pub pings_missed: u32,
    pub rtt_estimate_ms: f64,
    pub draining_since: Option<f64>,
}

impl Peer {
    pub fn new(peer_id: PeerId, address: SocketAddr, username: String, now: f64) -> Self {
        Self {
            peer_id,
            address,
            state: PeerState::Handshaking,
            connect_username: username,
            inbound_window: SequenceWindow::default(),
            next_outbound_seq: 0,
            outbox: VecDeque::new(),
            last_recv_at: now,
            last_ping_sent_at: now,
            pings_missed: 0,
            rtt_estimate_ms: 0.0,
            draining_since: None,
        }
    }

    /// Returns `true` if `seq` has not been seen before and should be
    /// dispatched to the simulation (§4.3's "duplicates dropped silently").
    pub fn accept_inbound(&mut self, seq: u32, now: f64) -> bool {
        self.last_recv_at = now;
        self.inbound_window.observe(seq)
    }

    pub fn next_sequence(&mut self) -> u32 {
        let seq = self.next_outbound_seq;
        self.next_outbound_seq = self.next_outbound_seq.wrapping_add(1);
        seq
    }

    /// Queues `frame` for resend if it is reliable (§4.3); unreliable frames
    /// are fire-and-forget and never enter the outbox.
    pub fn track_outbound(&mut self, frame: Frame, now: f64) {
        if frame.payload.is_reliable() {
            self.outbox.push_back(OutboxEntry {
                frame,
                first_sent_at: now,
                last_sent_at: now,
                resends: 0,
            });
        }
    }

    /// Retires the outbox entry matching `acked_seq`, if any.
    pub fn acknowledge(&mut self, acked_seq: u32) {
        self.outbox.retain(|e| e.frame.header.sequence != acked_seq);
    }

    /// Returns frames due for resend and advances their resend counters;
    /// returns the peer as dead (too many resends) via the bool flag.
    pub fn due_resends(&mut self, now: f64, settings: &Settings) -> (Vec<Frame>, bool) {
        let mut due = Vec::new();
        let mut dead = false;
        let interval = settings.reliable_resend_interval_ms as f64 / 1_000.0;
        for entry in self.outbox.iter_mut() {
            if now - entry.last_sent_at < interval {
                continue;
            }
            if entry.resends >= settings.max_reliable_resends {
                dead = true;
                continue;
            }
            entry.resends += 1;
            entry.last_sent_at = now;
            due.push(entry.frame.clone());
        }
        (due, dead)
    }

    pub fn enter_draining(&mut self, now: f64) {
        if self.state != PeerState::Draining && self.state != PeerState::Closed {
            self.state = PeerState::Draining;
            self.draining_since = Some(now);
        }
    }

    pub fn is_drain_complete(&self, now: f64, rtt_ms: f64) -> bool {
        match self.draining_since {
            Some(since) => now - since >= (rtt_ms / 1_000.0).max(0.0),
            None => false,
        }
    }

    pub fn update_rtt(&mut self, sample_ms: f64) {
        const ALPHA: f64 = 1.0 / 8.0;
        self.rtt_estimate_ms = if self.rtt_estimate_ms == 0.0 {
            sample_ms
        } else {
            self.rtt_estimate_ms * (1.0 - ALPHA) + sample_ms * ALPHA
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_sequence_is_rejected() {
        let mut window = SequenceWindow::default();
        assert!(window.observe(10));
        assert!(!window.observe(10));
    }

    #[test]
    fn out_of_order_within_window_is_accepted_once() {
        let mut window = SequenceWindow::default();
        assert!(window.observe(10));
        assert!(window.observe(12));
        assert!(window.observe(11));
        assert!(!window.observe(11));
    }

    #[test]
    fn gap_larger_than_window_resets_bitmap() {
        let mut window = SequenceWindow::default();
        assert!(window.observe(1));
        assert!(window.observe(1000));
        // 999 is far enough behind 1000 that it's outside the 32-bit window.
        assert!(!window.observe(999));
    }
}

//! Heartbeat and reliable-resend sweeps run once per tick over every live
//! peer (§4.3's "Heartbeats" and "Reliability").

use protocol::{Frame, FrameHeader, Payload};

use crate::config::Settings;
use crate::transport::peer::{Peer, PeerState};

/// The outcome of a heartbeat/resend sweep for one peer.
pub enum SweepAction {
    /// Nothing due.
    None,
    /// Send these frames (resends and/or a heartbeat ping).
    Send(Vec<Frame>),
    /// The peer missed too many heartbeats or exhausted its resend budget.
    Dead,
}

/// Runs the per-tick heartbeat/resend sweep for a single peer (§4.8 step 7).
pub fn sweep_peer(peer: &mut Peer, now: f64, settings: &Settings) -> SweepAction {
    if peer.state == PeerState::Closed {
        return SweepAction::None;
    }

    let (mut due, resends_exhausted) = peer.due_resends(now, settings);
    if resends_exhausted {
        return SweepAction::Dead;
    }

    // A missed ping is only counted once per `heartbeat_interval_ms`, gated
    // on when we last sent one rather than `last_recv_at` — the peer being
    // quiet stays true on every tick until it speaks again, so reusing
    // `last_recv_at` here would count a fresh miss on every single tick.
    let heartbeat_interval = settings.heartbeat_interval_ms as f64 / 1_000.0;
    if now - peer.last_ping_sent_at >= heartbeat_interval {
        peer.last_ping_sent_at = now;
        if now - peer.last_recv_at >= heartbeat_interval {
            peer.pings_missed += 1;
            if peer.pings_missed >= 2 {
                return SweepAction::Dead;
            }
        }
        let seq = peer.next_sequence();
        let ping = Frame {
            header: FrameHeader {
                message_type: Payload::Ping { ping_id: seq }.message_type(),
                sequence: seq,
                timestamp_ms: (now * 1_000.0) as u64,
                peer_id: peer.peer_id,
            },
            payload: Payload::Ping { ping_id: seq },
        };
        due.push(ping);
    }

    if due.is_empty() {
        SweepAction::None
    } else {
        SweepAction::Send(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::PeerId;

    fn peer() -> Peer {
        Peer::new(PeerId(1), "127.0.0.1:1".parse().unwrap(), "alice".into(), 0.0)
    }

    #[test]
    fn no_sweep_action_when_recently_heard_from() {
        let mut p = peer();
        let settings = Settings::default();
        let action = sweep_peer(&mut p, 0.1, &settings);
        assert!(matches!(action, SweepAction::None));
    }

    #[test]
    fn ping_sent_after_heartbeat_interval_elapses() {
        let mut p = peer();
        let mut settings = Settings::default();
        settings.heartbeat_interval_ms = 1_000;
        let action = sweep_peer(&mut p, 2.0, &settings);
        assert!(matches!(action, SweepAction::Send(_)));
    }

    #[test]
    fn two_missed_pings_kill_the_peer() {
        let mut p = peer();
        let mut settings = Settings::default();
        settings.heartbeat_interval_ms = 1_000;
        sweep_peer(&mut p, 2.0, &settings);
        let action = sweep_peer(&mut p, 4.0, &settings);
        assert!(matches!(action, SweepAction::Dead));
    }

    /// A quiet peer swept every tick (not every full heartbeat interval)
    /// should only accrue one missed ping per `heartbeat_interval_ms`, not
    /// one per tick.
    #[test]
    fn pings_missed_accrues_once_per_interval_not_once_per_tick() {
        let mut p = peer();
        let mut settings = Settings::default();
        settings.heartbeat_interval_ms = 1_000;

        let mut now = 0.0;
        for _ in 0..9 {
            now += 0.1;
            let action = sweep_peer(&mut p, now, &settings);
            assert!(matches!(action, SweepAction::None), "no ping due before the first interval elapses");
        }
        assert_eq!(p.pings_missed, 0);

        now = 1.1;
        let action = sweep_peer(&mut p, now, &settings);
        assert!(matches!(action, SweepAction::Send(_)));
        assert_eq!(p.pings_missed, 1, "first interval elapsed: exactly one missed ping");

        for _ in 0..5 {
            now += 0.1;
            let action = sweep_peer(&mut p, now, &settings);
            assert!(
                matches!(action, SweepAction::None),
                "ticking within the same interval must not send another ping or count another miss"
            );
            assert_eq!(p.pings_missed, 1, "pings_missed must not climb every tick");
        }

        now = 2.2;
        let action = sweep_peer(&mut p, now, &settings);
        assert!(matches!(action, SweepAction::Dead), "second missed interval should kill the peer");
    }
}

//! Datagram transport (C3): per-peer handshake, sequencing/dedup,
//! reliability, and heartbeats layered over a UDP socket driven by
//! dedicated I/O worker threads (§4.3, §5).

mod peer;
mod reliability;
mod socket;

pub use peer::{Peer, PeerState};
pub use reliability::{sweep_peer, SweepAction};
pub use socket::{IoWorkers, OutboundDatagram, RawDatagram};

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};

use protocol::{decode_frame, encode_frame, Frame, FrameHeader, Payload, PeerId};

use crate::config::Settings;
use crate::error::CoreError;

/// A frame that survived handshake/dedup/reliability bookkeeping and is
/// ready for the simulation worker to dispatch to C4/C7/control handling
/// (§4.8 step 1).
pub struct InboundFrame {
    pub peer_id: PeerId,
    pub payload: Payload,
}

/// A peer that just cleared the version/capacity checks, handed to the
/// scheduler so it can spawn the backing entity and reply with `Accept`
/// (§4.8 step 1 routes `Connect` to a "control handler", this is it).
pub struct NewConnection {
    pub peer_id: PeerId,
    pub username: String,
}

pub struct Transport {
    io: IoWorkers,
    peers: HashMap<PeerId, Peer>,
    by_address: HashMap<SocketAddr, PeerId>,
    malformed_counts: HashMap<SocketAddr, u32>,
    next_peer_id_seed: u128,
    pending_connections: Vec<NewConnection>,
}

impl Transport {
    pub fn bind(port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        let io = IoWorkers::spawn(socket)?;
        Ok(Self {
            io,
            peers: HashMap::new(),
            by_address: HashMap::new(),
            malformed_counts: HashMap::new(),
            next_peer_id_seed: 1,
            pending_connections: Vec::new(),
        })
    }

    /// Drains the peers that completed handshake since the last call, for
    /// the scheduler to spawn an entity for and `Accept`.
    pub fn take_new_connections(&mut self) -> Vec<NewConnection> {
        std::mem::take(&mut self.pending_connections)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.io.local_addr
    }

    pub fn peer(&self, peer_id: PeerId) -> Option<&Peer> {
        self.peers.get(&peer_id)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn live_peer_ids(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|(_, p)| p.state == PeerState::Live)
            .map(|(&id, _)| id)
            .collect()
    }

    /// §4.8 step 1: drains up to `max_frames_per_tick` datagrams, decodes
    /// them, runs handshake/dedup, and returns the frames ready for
    /// dispatch. Malformed frames and protocol violations are reported as
    /// `CoreError`s rather than silently dropped, so the caller can log and
    /// count them toward `malformed_frame_threshold`.
    pub fn drain_inbound(&mut self, now: f64, settings: &Settings) -> (Vec<InboundFrame>, Vec<CoreError>) {
        let mut accepted = Vec::new();
        let mut errors = Vec::new();

        for _ in 0..settings.max_frames_per_tick {
            let Ok(datagram) = self.io.inbound_rx.try_recv() else {
                break;
            };
            match self.handle_datagram(datagram.from, &datagram.bytes, now, settings) {
                Ok(Some(frame)) => accepted.push(frame),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        (accepted, errors)
    }

    fn handle_datagram(
        &mut self,
        from: SocketAddr,
        bytes: &[u8],
        now: f64,
        settings: &Settings,
    ) -> Result<Option<InboundFrame>, CoreError> {
        let decoded = decode_frame(bytes, settings.binary_compression);
        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                let count = self.note_malformed(from);
                let peer_id = self.by_address.get(&from).copied().unwrap_or(PeerId(0));
                if count >= settings.malformed_frame_threshold {
                    if let Some(&id) = self.by_address.get(&from) {
                        self.close_peer(id);
                    }
                }
                return Err(CoreError::MalformedFrame {
                    peer_id,
                    detail: format!("{e:?}"),
                });
            }
        };

        if let Payload::Connect { username, version } = &frame.payload {
            return self.handle_connect(from, username.clone(), *version, now, settings).map(|_| None);
        }

        let Some(&peer_id) = self.by_address.get(&from) else {
            return Err(CoreError::ProtocolViolation {
                peer_id: PeerId(0),
                reason: "frame from unhandshaked address".into(),
            });
        };

        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return Ok(None);
        };

        if !peer.accept_inbound(frame.header.sequence, now) {
            return Ok(None);
        }

        if let Payload::ClientReliableAck { acked_seq } = &frame.payload {
            peer.acknowledge(*acked_seq);
            return Ok(None);
        }
        if let Payload::Pong { .. } = &frame.payload {
            let rtt = (now - peer.last_recv_at).max(0.0) * 1_000.0;
            peer.update_rtt(rtt);
            peer.pings_missed = 0;
            return Ok(None);
        }

        Ok(Some(InboundFrame {
            peer_id,
            payload: frame.payload,
        }))
    }

    fn note_malformed(&mut self, from: SocketAddr) -> u32 {
        let count = self.malformed_counts.entry(from).or_insert(0);
        *count += 1;
        *count
    }

    fn handle_connect(
        &mut self,
        from: SocketAddr,
        username: String,
        version: u16,
        now: f64,
        settings: &Settings,
    ) -> Result<(), CoreError> {
        if version != protocol::PROTOCOL_VERSION {
            self.send_unkeyed(
                from,
                Payload::Reject {
                    reason: format!("protocol version {version} unsupported"),
                },
                now,
            );
            return Ok(());
        }
        if self.peers.len() as u32 >= settings.max_players {
            self.send_unkeyed(
                from,
                Payload::Reject {
                    reason: "server full".into(),
                },
                now,
            );
            return Err(CoreError::CapacityExceeded {
                reason: "max_players reached".into(),
            });
        }

        let peer_id = PeerId(self.next_peer_id_seed);
        self.next_peer_id_seed += 1;
        let mut peer = Peer::new(peer_id, from, username.clone(), now);
        peer.state = PeerState::Live;
        self.by_address.insert(from, peer_id);
        self.peers.insert(peer_id, peer);
        self.pending_connections.push(NewConnection { peer_id, username });
        Ok(())
    }

    /// Encodes and enqueues `payload` to `peer_id`, tracking it for resend
    /// if reliable. Silently drops the send if the peer is unknown.
    pub fn send(&mut self, peer_id: PeerId, payload: Payload, now: f64, settings: &Settings) {
        let Some(peer) = self.peers.get_mut(&peer_id) else { return };
        let seq = peer.next_sequence();
        let frame = Frame {
            header: FrameHeader {
                message_type: payload.message_type(),
                sequence: seq,
                timestamp_ms: (now * 1_000.0) as u64,
                peer_id,
            },
            payload,
        };
        enqueue_encoded(&self.io, peer, &frame, now, settings);
    }

    fn send_unkeyed(&self, to: SocketAddr, payload: Payload, now: f64) {
        let frame = Frame {
            header: FrameHeader {
                message_type: payload.message_type(),
                sequence: 0,
                timestamp_ms: (now * 1_000.0) as u64,
                peer_id: PeerId(0),
            },
            payload,
        };
        if let Ok(bytes) = encode_frame(&frame, false) {
            let _ = self.io.outbound_tx.send(OutboundDatagram {
                to,
                bytes: bytes.to_vec(),
            });
        }
    }

    /// §4.8 step 7: resend/heartbeat sweep plus purge of peers that timed
    /// out or exhausted their resend budget.
    pub fn sweep_and_purge(&mut self, now: f64, settings: &Settings) -> Vec<PeerId> {
        let mut dead = Vec::new();
        let ids: Vec<PeerId> = self.peers.keys().copied().collect();
        for id in ids {
            let action = {
                let peer = self.peers.get_mut(&id).expect("id drawn from self.peers");
                sweep_peer(peer, now, settings)
            };
            match action {
                SweepAction::None => {}
                SweepAction::Send(frames) => {
                    let peer = self.peers.get_mut(&id).expect("id drawn from self.peers");
                    for frame in frames {
                        enqueue_encoded(&self.io, peer, &frame, now, settings);
                    }
                }
                SweepAction::Dead => dead.push(id),
            }
        }
        for id in &dead {
            self.close_peer(*id);
        }
        dead
    }

    pub fn begin_drain(&mut self, peer_id: PeerId, now: f64) {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.enter_draining(now);
        }
    }

    pub fn close_peer(&mut self, peer_id: PeerId) {
        if let Some(peer) = self.peers.remove(&peer_id) {
            self.by_address.remove(&peer.address);
        }
    }
}

fn enqueue_encoded(io: &IoWorkers, peer: &mut Peer, frame: &Frame, now: f64, settings: &Settings) {
    match encode_frame(frame, settings.binary_compression) {
        Ok(bytes) => {
            peer.track_outbound(frame.clone(), now);
            let _ = io.outbound_tx.send(OutboundDatagram {
                to: peer.address,
                bytes: bytes.to_vec(),
            });
        }
        Err(e) => {
            tracing::warn!(peer_id = %peer.peer_id, error = ?e, "failed to encode outbound frame");
        }
    }
}

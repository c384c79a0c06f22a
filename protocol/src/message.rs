use bytes::{Bytes, BytesMut};

use crate::codec::{Decode, Encode};
use crate::error::CodecError;
use crate::ids::{AoiId, BodyId, EntityId, PeerId};
use crate::wire::{Quatf, Vec3f};

/// The kind of kinematic bound a sanity challenge is auditing (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Position = 0,
    Velocity = 1,
    Acceleration = 2,
    Collision = 3,
}

impl CheckKind {
    fn from_u8(v: u8) -> Result<Self, CodecError> {
        Ok(match v {
            0 => Self::Position,
            1 => Self::Velocity,
            2 => Self::Acceleration,
            3 => Self::Collision,
            _ => return Err(CodecError::UnknownMessageType(v as u16)),
        })
    }
}

impl Encode for CheckKind {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        (*self as u8).encode(buf)
    }
}

impl Decode for CheckKind {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        CheckKind::from_u8(u8::decode(buf)?)
    }
}

/// Whether an entity is entering or leaving the receiving peer's view set
/// this tick, or carries no membership change (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AoiEvent {
    None = 0,
    Enter = 1,
    Leave = 2,
}

impl Encode for AoiEvent {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        (*self as u8).encode(buf)
    }
}

impl Decode for AoiEvent {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(match u8::decode(buf)? {
            1 => Self::Enter,
            2 => Self::Leave,
            _ => Self::None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player = 0,
    Npc = 1,
}

impl Encode for EntityKind {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        (*self as u8).encode(buf)
    }
}

impl Decode for EntityKind {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(match u8::decode(buf)? {
            1 => Self::Npc,
            _ => Self::Player,
        })
    }
}

/// A single entity's replicated kinematic state, as carried inside
/// `ServerStateUpdate`/`NPCUpdate` (§6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec3f,
    pub velocity: Vec3f,
    pub rotation: Quatf,
    pub nearest_body_id: BodyId,
    pub aoi_event: AoiEvent,
}

impl Encode for EntityState {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.id.encode(buf)?;
        self.kind.encode(buf)?;
        self.position.encode(buf)?;
        self.velocity.encode(buf)?;
        self.rotation.encode(buf)?;
        self.nearest_body_id.encode(buf)?;
        self.aoi_event.encode(buf)
    }
}

impl Decode for EntityState {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            id: EntityId::decode(buf)?,
            kind: EntityKind::decode(buf)?,
            position: Vec3f::decode(buf)?,
            velocity: Vec3f::decode(buf)?,
            rotation: Quatf::decode(buf)?,
            nearest_body_id: BodyId::decode(buf)?,
            aoi_event: AoiEvent::decode(buf)?,
        })
    }
}

/// A compact per-AOI summary row, as carried inside `AOIUpdate` (§6, §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct AoiSummary {
    pub id: AoiId,
    pub name: String,
    pub center: Vec3f,
    pub radius: f32,
    pub capacity: u32,
    pub player_count: u32,
    pub npc_count: u32,
    pub load: f32,
    pub update_hz: f32,
}

impl Encode for AoiSummary {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.id.encode(buf)?;
        self.name.encode(buf)?;
        self.center.encode(buf)?;
        self.radius.encode(buf)?;
        self.capacity.encode(buf)?;
        self.player_count.encode(buf)?;
        self.npc_count.encode(buf)?;
        self.load.encode(buf)?;
        self.update_hz.encode(buf)
    }
}

impl Decode for AoiSummary {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            id: AoiId::decode(buf)?,
            name: String::decode(buf)?,
            center: Vec3f::decode(buf)?,
            radius: f32::decode(buf)?,
            capacity: u32::decode(buf)?,
            player_count: u32::decode(buf)?,
            npc_count: u32::decode(buf)?,
            load: f32::decode(buf)?,
            update_hz: f32::decode(buf)?,
        })
    }
}

/// A celestial body's per-tick computed state, as carried inside
/// `CelestialUpdate` (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CelestialBodyState {
    pub id: BodyId,
    pub position: Vec3f,
    pub velocity: Vec3f,
    pub orbit_progress: f32,
}

impl Encode for CelestialBodyState {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.id.encode(buf)?;
        self.position.encode(buf)?;
        self.velocity.encode(buf)?;
        self.orbit_progress.encode(buf)
    }
}

impl Decode for CelestialBodyState {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            id: BodyId::decode(buf)?,
            position: Vec3f::decode(buf)?,
            velocity: Vec3f::decode(buf)?,
            orbit_progress: f32::decode(buf)?,
        })
    }
}

/// The tagged union of every wire message payload, keyed by the `type` codes
/// in §6's table. Decoding produces this sum type, consumed by exhaustive
/// branching in the dispatch layer rather than any class-based polymorphism
/// (§9).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// 0, C->S
    Connect { username: String, version: u16 },
    /// 1, either
    Disconnect { reason: String },
    /// 2, either
    Ping { ping_id: u32 },
    /// 3, either
    Pong { ping_id: u32 },
    /// 4, C->S
    ClientStateUpdate {
        position: Vec3f,
        velocity: Vec3f,
        rotation: Quatf,
        input_sequence: u32,
    },
    /// 5, S->C
    Accept {
        peer_id: PeerId,
        server_time_ms: u64,
        initial_position: Vec3f,
        initial_velocity: Vec3f,
        initial_rotation: Quatf,
    },
    /// 6, S->C
    Reject { reason: String },
    /// 7, S->C
    ServerStateUpdate {
        aoi_id: AoiId,
        server_time_ms: u64,
        entities: Vec<EntityState>,
    },
    /// 8, S->C
    PhysicsUpdate {
        gravity: Vec3f,
        time_scale: f32,
        nearest_body_id: BodyId,
        distance: f32,
    },
    /// 9, S->C
    NpcUpdate { npcs: Vec<EntityState> },
    /// 10, S->C
    AoiUpdate {
        summaries: Vec<AoiSummary>,
        current_aoi_id: Option<AoiId>,
    },
    /// 11, S->C
    CelestialUpdate {
        bodies: Vec<CelestialBodyState>,
        sim_time: f64,
    },
    /// 12, S->C
    SanityCheck {
        check_id: u32,
        kind: CheckKind,
        expected: Vec3f,
        tolerance: f32,
    },
    /// 13, S->C
    ServerReliableAck { acked_seq: u32 },
    /// 14, C->S
    ClientReliableAck { acked_seq: u32 },
}

impl Payload {
    /// The §6 wire type code for this payload's variant.
    pub fn message_type(&self) -> u16 {
        match self {
            Payload::Connect { .. } => 0,
            Payload::Disconnect { .. } => 1,
            Payload::Ping { .. } => 2,
            Payload::Pong { .. } => 3,
            Payload::ClientStateUpdate { .. } => 4,
            Payload::Accept { .. } => 5,
            Payload::Reject { .. } => 6,
            Payload::ServerStateUpdate { .. } => 7,
            Payload::PhysicsUpdate { .. } => 8,
            Payload::NpcUpdate { .. } => 9,
            Payload::AoiUpdate { .. } => 10,
            Payload::CelestialUpdate { .. } => 11,
            Payload::SanityCheck { .. } => 12,
            Payload::ServerReliableAck { .. } => 13,
            Payload::ClientReliableAck { .. } => 14,
        }
    }

    /// Whether this message type is retransmitted until acked (§4.3):
    /// connect/accept/reject, sanity checks, and the explicit acks
    /// themselves. State updates and snapshots are unreliable; their loss is
    /// absorbed by the next tick rather than retried.
    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            Payload::Connect { .. }
                | Payload::Disconnect { .. }
                | Payload::Accept { .. }
                | Payload::Reject { .. }
                | Payload::SanityCheck { .. }
                | Payload::ServerReliableAck { .. }
                | Payload::ClientReliableAck { .. }
        )
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        match self {
            Payload::Connect { username, version } => {
                username.encode(buf)?;
                version.encode(buf)
            }
            Payload::Disconnect { reason } => reason.encode(buf),
            Payload::Ping { ping_id } => ping_id.encode(buf),
            Payload::Pong { ping_id } => ping_id.encode(buf),
            Payload::ClientStateUpdate {
                position,
                velocity,
                rotation,
                input_sequence,
            } => {
                position.encode(buf)?;
                velocity.encode(buf)?;
                rotation.encode(buf)?;
                input_sequence.encode(buf)
            }
            Payload::Accept {
                peer_id,
                server_time_ms,
                initial_position,
                initial_velocity,
                initial_rotation,
            } => {
                peer_id.encode(buf)?;
                server_time_ms.encode(buf)?;
                initial_position.encode(buf)?;
                initial_velocity.encode(buf)?;
                initial_rotation.encode(buf)
            }
            Payload::Reject { reason } => reason.encode(buf),
            Payload::ServerStateUpdate {
                aoi_id,
                server_time_ms,
                entities,
            } => {
                aoi_id.encode(buf)?;
                server_time_ms.encode(buf)?;
                entities.encode(buf)
            }
            Payload::PhysicsUpdate {
                gravity,
                time_scale,
                nearest_body_id,
                distance,
            } => {
                gravity.encode(buf)?;
                time_scale.encode(buf)?;
                nearest_body_id.encode(buf)?;
                distance.encode(buf)
            }
            Payload::NpcUpdate { npcs } => npcs.encode(buf),
            Payload::AoiUpdate {
                summaries,
                current_aoi_id,
            } => {
                summaries.encode(buf)?;
                current_aoi_id.encode(buf)
            }
            Payload::CelestialUpdate { bodies, sim_time } => {
                bodies.encode(buf)?;
                sim_time.encode(buf)
            }
            Payload::SanityCheck {
                check_id,
                kind,
                expected,
                tolerance,
            } => {
                check_id.encode(buf)?;
                kind.encode(buf)?;
                expected.encode(buf)?;
                tolerance.encode(buf)
            }
            Payload::ServerReliableAck { acked_seq } => acked_seq.encode(buf),
            Payload::ClientReliableAck { acked_seq } => acked_seq.encode(buf),
        }
    }

    fn decode_body(message_type: u16, buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(match message_type {
            0 => Payload::Connect {
                username: String::decode(buf)?,
                version: u16::decode(buf)?,
            },
            1 => Payload::Disconnect {
                reason: String::decode(buf)?,
            },
            2 => Payload::Ping {
                ping_id: u32::decode(buf)?,
            },
            3 => Payload::Pong {
                ping_id: u32::decode(buf)?,
            },
            4 => Payload::ClientStateUpdate {
                position: Vec3f::decode(buf)?,
                velocity: Vec3f::decode(buf)?,
                rotation: Quatf::decode(buf)?,
                input_sequence: u32::decode(buf)?,
            },
            5 => Payload::Accept {
                peer_id: PeerId::decode(buf)?,
                server_time_ms: u64::decode(buf)?,
                initial_position: Vec3f::decode(buf)?,
                initial_velocity: Vec3f::decode(buf)?,
                initial_rotation: Quatf::decode(buf)?,
            },
            6 => Payload::Reject {
                reason: String::decode(buf)?,
            },
            7 => Payload::ServerStateUpdate {
                aoi_id: AoiId::decode(buf)?,
                server_time_ms: u64::decode(buf)?,
                entities: Vec::<EntityState>::decode(buf)?,
            },
            8 => Payload::PhysicsUpdate {
                gravity: Vec3f::decode(buf)?,
                time_scale: f32::decode(buf)?,
                nearest_body_id: BodyId::decode(buf)?,
                distance: f32::decode(buf)?,
            },
            9 => Payload::NpcUpdate {
                npcs: Vec::<EntityState>::decode(buf)?,
            },
            10 => Payload::AoiUpdate {
                summaries: Vec::<AoiSummary>::decode(buf)?,
                current_aoi_id: Option::<AoiId>::decode(buf)?,
            },
            11 => Payload::CelestialUpdate {
                bodies: Vec::<CelestialBodyState>::decode(buf)?,
                sim_time: f64::decode(buf)?,
            },
            12 => Payload::SanityCheck {
                check_id: u32::decode(buf)?,
                kind: CheckKind::decode(buf)?,
                expected: Vec3f::decode(buf)?,
                tolerance: f32::decode(buf)?,
            },
            13 => Payload::ServerReliableAck {
                acked_seq: u32::decode(buf)?,
            },
            14 => Payload::ClientReliableAck {
                acked_seq: u32::decode(buf)?,
            },
            other => return Err(CodecError::UnknownMessageType(other)),
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.encode_body(buf)
    }

    pub(crate) fn decode(message_type: u16, buf: &mut Bytes) -> Result<Self, CodecError> {
        Self::decode_body(message_type, buf)
    }
}

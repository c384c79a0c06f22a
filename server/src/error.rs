use protocol::PeerId;
use thiserror::Error;

/// The error kinds of §7, uniform across every component. Recovery is local
/// to the offending peer wherever possible: one peer's bad behavior never
/// affects another peer's stream or the tick cadence (§7's recovery
/// policy).
#[derive(Debug, Error)]
pub enum CoreError {
    /// The frame could not be decoded. The frame is dropped and the peer's
    /// error counter increments; past `malformed_frame_threshold` the peer
    /// is disconnected.
    #[error("peer {peer_id}: malformed frame ({detail})")]
    MalformedFrame { peer_id: PeerId, detail: String },

    /// A decoded frame is invalid in the peer's current state, e.g. a
    /// `ClientStateUpdate` before `Accept`. The peer is disconnected.
    #[error("peer {peer_id}: protocol violation: {reason}")]
    ProtocolViolation { peer_id: PeerId, reason: String },

    /// Admission failed; surfaces to the client as `Reject`.
    #[error("capacity exceeded: {reason}")]
    CapacityExceeded { reason: String },

    /// A kinematic bound was breached. The update is rejected and an audit
    /// record logged; repeated violations disconnect the peer.
    #[error("peer {peer_id}: sanity violation: {reason}")]
    SanityViolation { peer_id: PeerId, reason: String },

    /// A heartbeat or sanity challenge exceeded its deadline.
    #[error("peer {peer_id}: timeout ({reason})")]
    Timeout { peer_id: PeerId, reason: String },

    /// A socket send returned a retryable error.
    #[error("transient io error: {0}")]
    TransientIo(String),

    /// An admin mutation was invalid. Rejected at the admin boundary;
    /// runtime state is unaffected.
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

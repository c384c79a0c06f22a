//! Sanity checker (C7): synchronous kinematic bounds (enforced inline by
//! `entity::apply_client_update`) plus the asynchronous challenge/response
//! audit (§4.7).
//!
//! The wire protocol has no dedicated `CheckResponse` message; a client
//! proves a `SanityCheck` by simply continuing to send `ClientStateUpdate`s
//! that match the challenged value within tolerance, since position,
//! velocity, and acceleration-derived checks are already carried by that
//! message. `record_response` is called from the same place
//! `apply_client_update` is, using the freshly applied state as the
//! response.

use std::collections::HashMap;

use math::Vec3;
use protocol::{CheckKind, PeerId};

use crate::config::Settings;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy)]
struct PendingCheck {
    check_id: u32,
    kind: CheckKind,
    expected: Vec3,
    tolerance: f64,
    issued_at: f64,
}

#[derive(Debug, Clone, Default)]
struct PeerAudit {
    pending: Option<PendingCheck>,
    failures: Vec<f64>,
}

/// Either a challenge to send, or nothing this tick.
#[derive(Debug, Clone, Copy)]
pub struct IssuedChallenge {
    pub peer_id: PeerId,
    pub check_id: u32,
    pub kind: CheckKind,
    pub expected: Vec3,
    pub tolerance: f32,
}

pub struct SanityChecker {
    audits: HashMap<PeerId, PeerAudit>,
    next_check_id: u32,
    sample_cursor: usize,
}

impl Default for SanityChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl SanityChecker {
    pub fn new() -> Self {
        Self {
            audits: HashMap::new(),
            next_check_id: 1,
            sample_cursor: 0,
        }
    }

    pub fn register_peer(&mut self, peer_id: PeerId) {
        self.audits.entry(peer_id).or_default();
    }

    pub fn remove_peer(&mut self, peer_id: PeerId) {
        self.audits.remove(&peer_id);
    }

    /// §4.8 step 6: samples `1/sanity_sample_period` of the given peers and
    /// issues a challenge to each one sampled that doesn't already have a
    /// challenge outstanding. `expected_for` supplies the current known
    /// value for the sampled check kind (position/velocity/acceleration/
    /// collision), so the caller owns reading from the entity store.
    pub fn issue_audits(
        &mut self,
        peers: &[PeerId],
        now: f64,
        settings: &Settings,
        mut expected_for: impl FnMut(PeerId, CheckKind) -> Option<Vec3>,
    ) -> Vec<IssuedChallenge> {
        if peers.is_empty() || settings.sanity_sample_period == 0 {
            return Vec::new();
        }
        let mut issued = Vec::new();
        let step = settings.sanity_sample_period as usize;
        let mut i = self.sample_cursor;
        while i < peers.len() {
            let peer_id = peers[i];
            i += step;
            let audit = self.audits.entry(peer_id).or_default();
            if audit.pending.is_some() {
                continue;
            }
            let kind = pick_kind(self.next_check_id);
            let Some(expected) = expected_for(peer_id, kind) else {
                continue;
            };
            let check_id = self.next_check_id;
            self.next_check_id += 1;
            audit.pending = Some(PendingCheck {
                check_id,
                kind,
                expected,
                tolerance: 1e-2,
                issued_at: now,
            });
            issued.push(IssuedChallenge {
                peer_id,
                check_id,
                kind,
                expected,
                tolerance: 1e-2,
            });
        }
        self.sample_cursor = if peers.is_empty() {
            0
        } else {
            (self.sample_cursor + 1) % peers.len().max(1)
        };
        issued
    }

    /// Compares the peer's freshly-applied state against any outstanding
    /// challenge of a matching kind, recording pass/fail. Called from the
    /// tick's dispatch of `ClientStateUpdate` right after
    /// `entity::apply_client_update` succeeds.
    pub fn record_response(
        &mut self,
        peer_id: PeerId,
        position: Vec3,
        velocity: Vec3,
        now: f64,
    ) {
        let Some(audit) = self.audits.get_mut(&peer_id) else { return };
        let Some(pending) = audit.pending else { return };
        if now - pending.issued_at > 5.0 {
            // Too late; `sweep_timeouts` will count it as a failure.
            return;
        }
        let actual = match pending.kind {
            CheckKind::Position => position,
            CheckKind::Velocity | CheckKind::Acceleration | CheckKind::Collision => velocity,
        };
        let within_tolerance = actual.distance(pending.expected) <= pending.tolerance;
        if !within_tolerance {
            audit.failures.push(now);
        }
        audit.pending = None;
    }

    /// Called once per tick: any challenge older than 5s with no response is
    /// a failure. Returns peers whose failure count within
    /// `sanity_failure_window_ms` now meets or exceeds
    /// `sanity_max_failures`, and should be disconnected (§4.7, §7).
    pub fn sweep_timeouts(&mut self, now: f64, settings: &Settings) -> Vec<CoreError> {
        let window = settings.sanity_failure_window_ms as f64 / 1_000.0;
        let mut errors = Vec::new();
        for (&peer_id, audit) in self.audits.iter_mut() {
            if let Some(pending) = audit.pending {
                if now - pending.issued_at > 5.0 {
                    audit.failures.push(now);
                    audit.pending = None;
                }
            }
            audit.failures.retain(|&t| now - t <= window);
            if audit.failures.len() as u32 >= settings.sanity_max_failures {
                errors.push(CoreError::SanityViolation {
                    peer_id,
                    reason: format!(
                        "{} sanity failures within {}ms",
                        audit.failures.len(),
                        settings.sanity_failure_window_ms
                    ),
                });
            }
        }
        errors
    }
}

/// Rotates deterministically through the four check kinds by challenge id,
/// rather than by RNG, so audits are reproducible in tests.
fn pick_kind(check_id: u32) -> CheckKind {
    match check_id % 4 {
        0 => CheckKind::Position,
        1 => CheckKind::Velocity,
        2 => CheckKind::Acceleration,
        _ => CheckKind::Collision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.sanity_sample_period = 1;
        s.sanity_max_failures = 2;
        s.sanity_failure_window_ms = 60_000;
        s
    }

    #[test]
    fn matching_response_within_tolerance_records_no_failure() {
        let mut checker = SanityChecker::new();
        let settings = settings();
        let peer = PeerId(1);
        let issued = checker.issue_audits(&[peer], 0.0, &settings, |_, _| Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(issued.len(), 1);

        checker.record_response(peer, Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, 0.1);
        let errors = checker.sweep_timeouts(0.1, &settings);
        assert!(errors.is_empty());
    }

    #[test]
    fn timeout_without_response_counts_as_failure() {
        let mut checker = SanityChecker::new();
        let settings = settings();
        let peer = PeerId(1);
        checker.issue_audits(&[peer], 0.0, &settings, |_, _| Some(Vec3::ZERO));

        let errors = checker.sweep_timeouts(10.0, &settings);
        assert!(errors.is_empty(), "one failure alone should not yet disconnect");

        checker.issue_audits(&[peer], 20.0, &settings, |_, _| Some(Vec3::ZERO));
        let errors = checker.sweep_timeouts(30.0, &settings);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn failures_outside_window_expire() {
        let mut checker = SanityChecker::new();
        let mut settings = settings();
        settings.sanity_failure_window_ms = 5_000;
        let peer = PeerId(1);
        checker.issue_audits(&[peer], 0.0, &settings, |_, _| Some(Vec3::ZERO));
        checker.sweep_timeouts(10.0, &settings);

        checker.issue_audits(&[peer], 20.0, &settings, |_, _| Some(Vec3::ZERO));
        let errors = checker.sweep_timeouts(30.0, &settings);
        assert!(errors.is_empty());
    }
}

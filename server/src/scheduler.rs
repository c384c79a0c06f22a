//! Tick scheduler (C8): drives the fixed-rate loop that composes C4–C7 and
//! fans outbound replication out through C3 (§4.8).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use protocol::{AoiEvent, BodyId, CheckKind, EntityState, Payload, PeerId};

use crate::admin::ShutdownFlag;
use crate::aoi::AoiPartitioner;
use crate::celestial::CelestialSimulator;
use crate::config::Settings;
use crate::entity::{ClientUpdate, EntityStore};
use crate::error::CoreError;
use crate::npc::NpcAutopilot;
use crate::persistence;
use crate::sanity::SanityChecker;
use crate::transport::{InboundFrame, Transport};

/// Per-tick counters exposed to the admin surface (§4.8 step 8).
#[derive(Debug, Clone, Copy, Default)]
pub struct TickStats {
    pub tick_index: u64,
    pub frames_processed: u32,
    pub errors: u32,
    pub peers_disconnected: u32,
    pub snapshots_sent: u32,
    pub tick_duration_ms: f64,
    pub overran_budget: bool,
}

pub struct Server {
    pub settings: Settings,
    pub transport: Transport,
    pub entities: EntityStore,
    pub celestial: CelestialSimulator,
    pub aois: AoiPartitioner,
    pub sanity: SanityChecker,
    pub npcs: NpcAutopilot,
    pub shutdown: ShutdownFlag,
    snapshot_path: PathBuf,
    sim_clock: f64,
    tick_index: u64,
    last_tick_stats: TickStats,
}

impl Server {
    pub fn new(settings: Settings, transport: Transport) -> Self {
        Self::with_snapshot_path(settings, transport, PathBuf::from("snapshot.bin"))
    }

    pub fn with_snapshot_path(settings: Settings, transport: Transport, snapshot_path: PathBuf) -> Self {
        Self {
            settings,
            transport,
            entities: EntityStore::new(),
            celestial: CelestialSimulator::new(),
            aois: AoiPartitioner::new(),
            sanity: SanityChecker::new(),
            npcs: NpcAutopilot::new(),
            shutdown: ShutdownFlag::new(),
            snapshot_path,
            sim_clock: 0.0,
            tick_index: 0,
            last_tick_stats: TickStats::default(),
        }
    }

    pub fn tick_stats(&self) -> TickStats {
        self.last_tick_stats
    }

    fn save_snapshot(&self) {
        if let Err(e) =
            persistence::save_to_file(&self.snapshot_path, &self.celestial, &self.aois, &self.settings)
        {
            tracing::warn!(error = %e, path = %self.snapshot_path.display(), "snapshot save failed");
        }
    }

    /// Runs the fixed-rate loop until `self.shutdown` is set (by a signal
    /// handler or `admin::emergency_stop`). Blocking; intended to be called
    /// from `main`. Autosaves on `autosave_interval_s` and once more on the
    /// way out (§5's "Top-level shutdown drains the send queue... then
    /// closes").
    pub fn run(&mut self) {
        let tick_period = Duration::from_secs_f64(1.0 / self.settings.tick_hz.max(1.0));
        let autosave_interval = Duration::from_secs(self.settings.autosave_interval_s.max(1));
        let mut last_tick = Instant::now();
        let mut last_autosave = Instant::now();

        while !self.shutdown.is_set() {
            let now = Instant::now();
            let elapsed = now.duration_since(last_tick).as_secs_f64();
            last_tick = now;

            let max_dt = 2.0 / self.settings.tick_hz.max(1.0);
            let overran = elapsed > tick_period.as_secs_f64() * 1.5;
            let dt = elapsed.min(max_dt);
            if overran {
                tracing::warn!(elapsed_ms = elapsed * 1_000.0, "tick overran its budget, dt capped");
            }

            let stats = self.step(dt, overran);
            self.last_tick_stats = stats;

            if last_autosave.elapsed() >= autosave_interval {
                self.save_snapshot();
                last_autosave = Instant::now();
            }

            let spent = now.elapsed();
            if spent < tick_period {
                std::thread::sleep(tick_period - spent);
            }
        }

        tracing::info!("shutdown signal received, saving final snapshot");
        self.save_snapshot();
    }

    /// One full tick, in the canonical §4.8 order. Exposed separately from
    /// `run` so tests can drive individual ticks deterministically.
    pub fn step(&mut self, dt: f64, overran: bool) -> TickStats {
        self.tick_index += 1;
        let tick_started = Instant::now();
        self.sim_clock += dt;
        let now = self.sim_clock;

        // Step 1: drain transport inbound, dispatch to C4 / C7 / control.
        let (frames, mut errors) = self.transport.drain_inbound(now, &self.settings);
        let frames_processed = frames.len() as u32;
        let mut protocol_disconnects = 0u32;
        for frame in frames {
            if let Err(e) = self.dispatch(frame, now) {
                if let CoreError::ProtocolViolation { peer_id, reason } = &e {
                    self.disconnect_peer(*peer_id, reason.clone(), now);
                    protocol_disconnects += 1;
                }
                errors.push(e);
            }
        }
        for new_connection in self.transport.take_new_connections() {
            if let Err(e) = self.accept_connection(new_connection, now) {
                errors.push(e);
            }
        }

        // Step 2: apply admin mutation queue.
        let pending_errors = self.celestial.apply_pending();
        errors.extend(pending_errors);

        // Step 3: advance celestial simulator.
        self.celestial.advance(dt, self.settings.sim_speed);

        // Step 3.5 (supplemented): advance NPC autopilot through the same
        // kinematic path players use.
        let body_refs = self.celestial.body_refs();
        self.npcs.step(&mut self.entities, &body_refs, dt, &self.settings);

        // Step 4: rebuild AOI assignments and update rates.
        self.aois.reassign(&mut self.entities, &self.celestial, &self.settings);

        // Step 5: snapshot every AOI whose rate is due this tick.
        let snapshots_sent = self.broadcast_due_snapshots(now);

        // Step 6: issue sanity audits.
        let live_peers = self.transport.live_peer_ids();
        let entities_ref = &self.entities;
        let issued = self.sanity.issue_audits(&live_peers, now, &self.settings, |peer_id, kind| {
            let entity_id = entities_ref.entity_for_peer(peer_id)?;
            let entity = entities_ref.get(entity_id)?;
            Some(match kind {
                CheckKind::Position => entity.position,
                CheckKind::Velocity | CheckKind::Acceleration | CheckKind::Collision => entity.velocity,
            })
        });
        for challenge in issued {
            self.transport.send(
                challenge.peer_id,
                Payload::SanityCheck {
                    check_id: challenge.check_id,
                    kind: challenge.kind,
                    expected: challenge.expected.into(),
                    tolerance: challenge.tolerance,
                },
                now,
                &self.settings,
            );
        }
        let audit_failures = self.sanity.sweep_timeouts(now, &self.settings);
        let mut sanity_disconnects = 0u32;
        for failure in audit_failures {
            if let CoreError::SanityViolation { peer_id, reason } = &failure {
                self.disconnect_peer(*peer_id, reason.clone(), now);
                sanity_disconnects += 1;
            }
            errors.push(failure);
        }

        // Step 7: purge timed-out peers; heartbeats where due.
        let dead = self.transport.sweep_and_purge(now, &self.settings);
        for peer_id in &dead {
            if let Some(entity_id) = self.entities.entity_for_peer(*peer_id) {
                self.entities.despawn(entity_id);
            }
            self.sanity.remove_peer(*peer_id);
        }

        let error_count = errors.len() as u32;
        for error in &errors {
            tracing::warn!(error = %error, "tick recorded a recoverable error");
        }

        TickStats {
            tick_index: self.tick_index,
            frames_processed,
            errors: error_count,
            peers_disconnected: dead.len() as u32 + sanity_disconnects + protocol_disconnects,
            snapshots_sent,
            tick_duration_ms: tick_started.elapsed().as_secs_f64() * 1_000.0,
            overran_budget: overran,
        }
    }

    /// Spawns the entity backing a freshly handshaked peer and replies with
    /// `Accept`, carrying its assigned id and initial state (§6's `Accept`
    /// message; spec scenario "Connect and first snapshot").
    fn accept_connection(
        &mut self,
        new_connection: crate::transport::NewConnection,
        now: f64,
    ) -> Result<(), CoreError> {
        let crate::transport::NewConnection { peer_id, username } = new_connection;
        let Some(peer) = self.transport.peer(peer_id) else {
            return Ok(());
        };
        let address = peer.address;
        let position = math::Vec3::ZERO;
        let velocity = math::Vec3::ZERO;
        let rotation = math::Quat::IDENTITY;
        let auth_token_fingerprint = fingerprint_username(&username);

        let entity_id = self.entities.spawn_player(
            peer_id,
            address,
            auth_token_fingerprint,
            position,
            velocity,
            rotation,
            now,
            &self.settings,
        )?;
        self.sanity.register_peer(peer_id);

        self.transport.send(
            peer_id,
            Payload::Accept {
                peer_id,
                server_time_ms: (now * 1_000.0) as u64,
                initial_position: position.into(),
                initial_velocity: velocity.into(),
                initial_rotation: rotation.into(),
            },
            now,
            &self.settings,
        );
        let _ = entity_id;
        Ok(())
    }

    /// Sends `Disconnect`, then tears down every piece of per-peer state
    /// this core owns (§7: "Peer is disconnected with reason"), shared by
    /// the `ProtocolViolation` and `SanityViolation` disconnect paths.
    fn disconnect_peer(&mut self, peer_id: PeerId, reason: String, now: f64) {
        self.transport
            .send(peer_id, Payload::Disconnect { reason }, now, &self.settings);
        self.transport.close_peer(peer_id);
        if let Some(entity_id) = self.entities.entity_for_peer(peer_id) {
            self.entities.despawn(entity_id);
        }
        self.sanity.remove_peer(peer_id);
    }

    fn dispatch(&mut self, frame: InboundFrame, now: f64) -> Result<(), CoreError> {
        match frame.payload {
            Payload::ClientStateUpdate {
                position,
                velocity,
                rotation,
                input_sequence,
            } => {
                let update = ClientUpdate {
                    position: position.into(),
                    velocity: velocity.into(),
                    rotation: rotation.into(),
                    input_sequence,
                };
                let body_refs = self.celestial.body_refs();
                self.entities
                    .apply_client_update(frame.peer_id, update, now, &body_refs, &self.settings)?;
                if let Some(entity_id) = self.entities.entity_for_peer(frame.peer_id) {
                    if let Some(entity) = self.entities.get(entity_id) {
                        self.sanity
                            .record_response(frame.peer_id, entity.position, entity.velocity, now);
                    }
                }
                Ok(())
            }
            Payload::Disconnect { .. } => {
                self.transport.begin_drain(frame.peer_id, now);
                Ok(())
            }
            Payload::Ping { ping_id } => {
                self.transport
                    .send(frame.peer_id, Payload::Pong { ping_id }, now, &self.settings);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// §4.8 step 5, phase-staggered by AOI id: builds a `ServerStateUpdate`
    /// for every AOI due this tick and hands it to the transport for each
    /// member peer.
    fn broadcast_due_snapshots(&mut self, now: f64) -> u32 {
        let mut sent = 0;
        let aoi_ids: Vec<protocol::AoiId> = self.aois.list().iter().map(|a| a.id).collect();
        let tick_index = self.tick_index;
        let tick_hz = self.settings.tick_hz;

        for aoi_id in aoi_ids {
            if !self.aois.is_due(aoi_id, tick_hz, tick_index) {
                continue;
            }
            let members: Vec<protocol::EntityId> = self.aois.members_of(aoi_id).to_vec();
            let mut entity_states = self.entities.snapshot(&members);
            let (summaries, _) = self.aois.snapshot(Some(aoi_id));

            // §4.6(c): membership changes surface as explicit enter/leave
            // events in the next snapshot rather than a silent appear/vanish.
            for (entity_id, event) in self.aois.take_pending_events(aoi_id) {
                match event {
                    AoiEvent::Enter => {
                        if let Some(state) = entity_states.iter_mut().find(|s| s.id == entity_id) {
                            state.aoi_event = AoiEvent::Enter;
                        }
                    }
                    AoiEvent::Leave => {
                        if let Some(entity) = self.entities.get(entity_id) {
                            entity_states.push(EntityState {
                                id: entity.id,
                                kind: entity.kind.into(),
                                position: entity.position.into(),
                                velocity: entity.velocity.into(),
                                rotation: entity.rotation.into(),
                                nearest_body_id: entity.nearest_body_id.unwrap_or(BodyId(0)),
                                aoi_event: AoiEvent::Leave,
                            });
                        }
                    }
                    AoiEvent::None => {}
                }
            }

            for &member_id in &members {
                let Some(entity) = self.entities.get(member_id) else { continue };
                let Some(player) = &entity.player else { continue };
                self.transport.send(
                    player.peer_id,
                    Payload::ServerStateUpdate {
                        aoi_id,
                        server_time_ms: (now * 1_000.0) as u64,
                        entities: entity_states.clone(),
                    },
                    now,
                    &self.settings,
                );
                self.transport.send(
                    player.peer_id,
                    Payload::AoiUpdate {
                        summaries: summaries.clone(),
                        current_aoi_id: Some(aoi_id),
                    },
                    now,
                    &self.settings,
                );
                sent += 1;
            }
        }

        let celestial_snapshot = self.celestial.snapshot();
        if !celestial_snapshot.is_empty() {
            for peer_id in self.transport.live_peer_ids() {
                self.transport.send(
                    peer_id,
                    Payload::CelestialUpdate {
                        bodies: celestial_snapshot.clone(),
                        sim_time: self.celestial.sim_time(),
                    },
                    now,
                    &self.settings,
                );
            }
        }

        sent
    }
}

/// A stable per-session fingerprint derived from the connecting username,
/// standing in for a real auth token check ahead of an external auth
/// service (§3's `auth_token_fingerprint`, deliberately opaque to this
/// core).
fn fingerprint_username(username: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    username.hash(&mut hasher);
    hasher.finish()
}

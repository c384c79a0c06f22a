//! End-to-end coverage of the scenarios this core must satisfy: a live UDP
//! round trip through `Transport`+`Server` for the handshake and
//! sanity-violation scenarios, and direct calls into the individual
//! components for the ones that are really about a single module's math.

#[cfg(test)]
mod scenarios {
    use std::net::{SocketAddr, UdpSocket};
    use std::time::{Duration, Instant};

    use math::{propagate, OrbitalElements, Quat, Vec3};
    use protocol::{decode_frame, encode_frame, AoiEvent, Frame, FrameHeader, Payload, PeerId};
    use server::aoi::{AoiPartitioner, AoiSpec};
    use server::celestial::{BodySpec, BodyType, CelestialSimulator};
    use server::config::Settings;
    use server::entity::{ClientUpdate, EntityStore};
    use server::scheduler::Server;
    use server::transport::Transport;

    /// Seeds a 12-body system (one star, eleven minor bodies) directly into
    /// `sim`, matching spec scenario 1's "seeded solar system of 12 bodies".
    fn seed_solar_system(sim: &mut CelestialSimulator) {
        let sun = sim
            .seed_body(BodySpec {
                name: "Sol".into(),
                body_type: BodyType::Star,
                mass: 1.989e30,
                radius: 6.957e8,
                elements: None,
                parent_id: None,
                color: [255, 220, 120],
            })
            .expect("seed sun");

        let planet_names = [
            "Mercury", "Venus", "Earth", "Mars", "Jupiter", "Saturn", "Uranus", "Neptune", "Ceres",
            "Pallas", "Vesta",
        ];
        for (i, name) in planet_names.iter().enumerate() {
            let a = 5.8e10 * (1.0 + i as f64);
            sim.seed_body(BodySpec {
                name: (*name).into(),
                body_type: BodyType::Planet,
                mass: 5.97e24,
                radius: 6.371e6,
                elements: Some(OrbitalElements {
                    semi_major_axis: a,
                    eccentricity: 0.01 + i as f64 * 0.001,
                    inclination: 0.0,
                    raan: 0.0,
                    arg_periapsis: 0.0,
                    mean_anomaly_epoch: 0.1 * i as f64,
                }),
                parent_id: Some(sun),
                color: [200, 200, 200],
            })
            .expect("seed planet");
        }
    }

    fn send_frame(socket: &UdpSocket, to: SocketAddr, payload: Payload, peer_id: PeerId, seq: u32) {
        let frame = Frame {
            header: FrameHeader {
                message_type: payload.message_type(),
                sequence: seq,
                timestamp_ms: 0,
                peer_id,
            },
            payload,
        };
        let bytes = encode_frame(&frame, false).expect("encode test frame");
        socket.send_to(&bytes, to).expect("send test frame");
    }

    /// Polls the client socket for up to `timeout` looking for a frame whose
    /// payload matches `want`. Returns the first one found.
    fn recv_until(socket: &UdpSocket, timeout: Duration, want: impl Fn(&Payload) -> bool) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; protocol::MAX_FRAME_BYTES];
        socket.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        while Instant::now() < deadline {
            match socket.recv_from(&mut buf) {
                Ok((n, _)) => {
                    if let Ok(frame) = decode_frame(&buf[..n], false) {
                        if want(&frame.payload) {
                            return Some(frame);
                        }
                    }
                }
                Err(_) => continue,
            }
        }
        None
    }

    fn run_ticks(server: &mut Server, count: u32) {
        for _ in 0..count {
            server.step(1.0 / server.settings.tick_hz, false);
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn connect_and_first_snapshot() {
        let mut settings = Settings::default();
        settings.udp_port = 0;
        let transport = Transport::bind(0).expect("bind server transport");
        let addr = transport.local_addr();
        let mut server = Server::new(settings, transport);
        seed_solar_system(&mut server.celestial);
        server.aois.add_aoi(AoiSpec {
            name: "Earth orbit".into(),
            center: Vec3::ZERO,
            radius: 5_000.0,
            capacity: 64,
            follows: None,
        });

        let client = UdpSocket::bind("127.0.0.1:0").expect("bind client socket");
        send_frame(&client, addr, Payload::Connect { username: "A".into(), version: protocol::PROTOCOL_VERSION }, PeerId(0), 0);

        run_ticks(&mut server, 2);

        let accept = recv_until(&client, Duration::from_secs(2), |p| matches!(p, Payload::Accept { .. }));
        assert!(accept.is_some(), "expected an Accept frame after Connect");

        let celestial = recv_until(&client, Duration::from_secs(2), |p| matches!(p, Payload::CelestialUpdate { .. }));
        match celestial.map(|f| f.payload) {
            Some(Payload::CelestialUpdate { bodies, .. }) => {
                assert_eq!(bodies.len(), 12, "expected the seeded 12-body solar system");
            }
            _ => panic!("expected a CelestialUpdate within two ticks"),
        }
    }

    #[test]
    fn deterministic_kepler_quarter_period() {
        let elements = OrbitalElements {
            semi_major_axis: 1.5e11,
            eccentricity: 0.0167,
            inclination: 0.0,
            raan: 0.0,
            arg_periapsis: 0.0,
            mean_anomaly_epoch: 0.0,
        };
        let mu = math::G * 1.989e30;
        let period = elements.period(mu);

        let state = propagate(&elements, 1.989e30, period / 4.0).expect("propagate");
        let expected_y = elements.semi_major_axis * (1.0 - elements.eccentricity.powi(2)).sqrt();

        assert!(state.position.x.abs() / elements.semi_major_axis < 1e-3, "x should be ~0 at quarter period");
        assert!(
            ((state.position.y - expected_y) / expected_y).abs() < 1e-4,
            "y should match a*sqrt(1-e^2) to 1e-4 relative, got {} vs {}",
            state.position.y,
            expected_y
        );
    }

    #[test]
    fn duplicate_client_update_is_applied_once() {
        let settings = Settings::default();
        let mut store = EntityStore::new();
        let peer_id = PeerId(1);
        let entity_id = store
            .spawn_player(peer_id, "127.0.0.1:1".parse().unwrap(), 0, Vec3::ZERO, Vec3::ZERO, Quat::IDENTITY, 0.0, &settings)
            .expect("spawn player");

        let update = ClientUpdate {
            position: Vec3::new(10.0, 0.0, 0.0),
            velocity: Vec3::new(1.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            input_sequence: 42,
        };
        let bodies = [];
        store.apply_client_update(peer_id, update, 1.0, &bodies, &settings).expect("first apply");
        let second = store.apply_client_update(peer_id, update, 1.1, &bodies, &settings);
        assert!(second.is_err(), "a repeated sequence number must be rejected");

        let entity = store.get(entity_id).expect("entity exists");
        assert_eq!(entity.last_input_sequence, 42);
    }

    #[test]
    fn entity_migrates_between_aois_as_it_crosses_the_boundary() {
        let settings = Settings::default();
        let mut store = EntityStore::new();
        let celestial = CelestialSimulator::new();
        let mut aois = AoiPartitioner::new();

        let x = aois.add_aoi(AoiSpec {
            name: "X".into(),
            center: Vec3::ZERO,
            radius: 1_000.0,
            capacity: 16,
            follows: None,
        });
        let y = aois.add_aoi(AoiSpec {
            name: "Y".into(),
            center: Vec3::new(1_800.0, 0.0, 0.0),
            radius: 1_000.0,
            capacity: 16,
            follows: None,
        });

        let peer_id = PeerId(7);
        let entity_id = store
            .spawn_player(
                peer_id,
                "127.0.0.1:2".parse().unwrap(),
                0,
                Vec3::new(500.0, 0.0, 0.0),
                Vec3::ZERO,
                Quat::IDENTITY,
                0.0,
                &settings,
            )
            .expect("spawn player");

        aois.reassign(&mut store, &celestial, &settings);
        assert_eq!(store.get(entity_id).unwrap().aoi_id, Some(x));

        let update = ClientUpdate {
            position: Vec3::new(900.0, 0.0, 0.0),
            velocity: Vec3::new(400.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            input_sequence: 1,
        };
        let bodies = [];
        store.apply_client_update(peer_id, update, 1.0, &bodies, &settings).unwrap();
        aois.reassign(&mut store, &celestial, &settings);

        let update2 = ClientUpdate {
            position: Vec3::new(1_300.0, 0.0, 0.0),
            velocity: Vec3::new(400.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            input_sequence: 2,
        };
        store.apply_client_update(peer_id, update2, 2.0, &bodies, &settings).unwrap();
        aois.reassign(&mut store, &celestial, &settings);

        assert_eq!(store.get(entity_id).unwrap().aoi_id, Some(y), "entity should have migrated into Y");

        let left_x = aois.take_pending_events(x);
        assert!(
            left_x.iter().any(|(id, ev)| *id == entity_id && *ev == AoiEvent::Leave),
            "peers remaining in X should see a leave event for the migrated entity"
        );
        let entered_y = aois.take_pending_events(y);
        assert!(
            entered_y.iter().any(|(id, ev)| *id == entity_id && *ev == AoiEvent::Enter),
            "peers in Y should see an enter event for the migrated entity"
        );
    }

    /// Drives the real challenge/response audit directly: the wire protocol
    /// has no `CheckResponse` message, so a cheating client is one whose
    /// reported state keeps missing the value a `SanityCheck` challenge
    /// snapshotted. Three missed challenges within the failure window should
    /// get the peer disconnected by the scheduler's step 6/7 handling.
    #[test]
    fn sanity_failure_disconnects_peer() {
        let mut settings = Settings::default();
        settings.udp_port = 0;
        settings.sanity_sample_period = 1;
        settings.sanity_max_failures = 3;
        settings.sanity_failure_window_ms = 60_000;
        let transport = Transport::bind(0).expect("bind server transport");
        let addr = transport.local_addr();
        let mut server = Server::new(settings, transport);

        let client = UdpSocket::bind("127.0.0.1:0").expect("bind client socket");
        send_frame(&client, addr, Payload::Connect { username: "cheater".into(), version: protocol::PROTOCOL_VERSION }, PeerId(0), 0);
        run_ticks(&mut server, 2);
        let accept = recv_until(&client, Duration::from_secs(2), |p| matches!(p, Payload::Accept { .. }));
        let Some(Frame { payload: Payload::Accept { peer_id, .. }, .. }) = accept else {
            panic!("expected Accept before exercising sanity checks");
        };

        let bogus = Vec3::new(1.0e6, 0.0, 0.0);
        for i in 0..3 {
            let t = i as f64;
            let issued = server
                .sanity
                .issue_audits(&[peer_id], t, &server.settings, |_, _| Some(Vec3::ZERO));
            assert_eq!(issued.len(), 1, "expected a fresh challenge each round");
            server.sanity.record_response(peer_id, bogus, bogus, t);
        }

        run_ticks(&mut server, 2);

        let disconnect = recv_until(&client, Duration::from_secs(2), |p| matches!(p, Payload::Disconnect { .. }));
        assert!(
            disconnect.is_some(),
            "expected the server to disconnect a peer that fails three sanity challenges"
        );
    }

    #[test]
    fn frozen_celestial_state_never_changes() {
        let mut sim = CelestialSimulator::new();
        seed_solar_system(&mut sim);
        sim.advance(100.0, 1.0);
        sim.set_frozen(true);

        let snapshot_before = sim.snapshot();
        for _ in 0..50 {
            sim.advance(10.0, 1.0);
        }
        let snapshot_after = sim.snapshot();

        assert_eq!(snapshot_before.len(), snapshot_after.len());
        for (before, after) in snapshot_before.iter().zip(snapshot_after.iter()) {
            assert_eq!(before.position, after.position, "frozen body moved");
        }
    }
}

//! Authoritative simulation core for the space MMO server: entity state,
//! celestial mechanics, AOI replication, sanity checking, and the transport
//! and tick scheduler that bind them together (§2).

pub mod admin;
pub mod aoi;
pub mod celestial;
pub mod config;
pub mod entity;
pub mod error;
pub mod npc;
pub mod persistence;
pub mod sanity;
pub mod scheduler;
pub mod transport;

pub use config::{load_config, Args, Settings};
pub use error::CoreError;
pub use scheduler::{Server, TickStats};

use std::path::PathBuf;

use crate::celestial::BodySpec;
use crate::aoi::AoiSpec;

/// Builds a `Server` ready to `run()`: binds the UDP transport, applies any
/// CLI overrides, and restores a persisted snapshot when one is present
/// (§6's "loaded at boot when present").
pub fn build_server(mut settings: Settings, args: &Args) -> anyhow::Result<Server> {
    if let Some(bind) = args.bind {
        settings.udp_port = bind;
    }
    settings.validate().map_err(anyhow::Error::msg)?;

    let snapshot_path = args.snapshot.clone().unwrap_or_else(|| PathBuf::from("snapshot.bin"));
    let transport = transport::Transport::bind(settings.udp_port)?;
    let mut server = Server::with_snapshot_path(settings, transport, snapshot_path.clone());

    if let Some(loaded) = persistence::load_from_file(&snapshot_path)? {
        restore_snapshot(&mut server, loaded);
    }

    Ok(server)
}

fn restore_snapshot(server: &mut Server, loaded: persistence::LoadedSnapshot) {
    for (id, spec): (protocol::BodyId, BodySpec) in loaded.bodies {
        if let Err(e) = server.celestial.seed_body_with_id(id, spec) {
            tracing::warn!(body_id = id.0, error = %e, "dropping snapshot body that failed to restore");
        }
    }
    for (id, spec): (protocol::AoiId, AoiSpec) in loaded.aois {
        server.aois.add_aoi_with_id(id, spec);
    }
    server.settings = loaded.settings;
}

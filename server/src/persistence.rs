//! Persisted snapshot (§6): the celestial forest, AOI definitions, and
//! server settings, written on explicit save or the auto-save interval and
//! loaded at boot when present. Uses the wire codec's `Encode`/`Decode`
//! traits directly rather than a second serializer (§6: "Format is a
//! length-prefixed binary identical to the wire codec").

use std::io;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use protocol::{CodecError, Decode, Encode};

use crate::aoi::{Aoi, AoiPartitioner, AoiSpec};
use crate::celestial::{BodySpec, CelestialBody, CelestialSimulator};
use crate::config::Settings;

const SNAPSHOT_MAGIC: u32 = 0x534d_4d4f; // "SMMO"
const SNAPSHOT_VERSION: u16 = 1;

fn encode_body(body: &CelestialBody, buf: &mut BytesMut) -> Result<(), CodecError> {
    body.id.encode(buf)?;
    body.name.encode(buf)?;
    (body.body_type as u8).encode(buf)?;
    body.mass.encode(buf)?;
    body.radius.encode(buf)?;
    body.parent_id.encode(buf)?;
    if let Some(elements) = &body.elements {
        true.encode(buf)?;
        elements.semi_major_axis.encode(buf)?;
        elements.eccentricity.encode(buf)?;
        elements.inclination.encode(buf)?;
        elements.raan.encode(buf)?;
        elements.arg_periapsis.encode(buf)?;
        elements.mean_anomaly_epoch.encode(buf)?;
    } else {
        false.encode(buf)?;
    }
    body.color[0].encode(buf)?;
    body.color[1].encode(buf)?;
    body.color[2].encode(buf)
}

fn decode_body_spec(buf: &mut Bytes) -> Result<(protocol::BodyId, BodySpec), CodecError> {
    use crate::celestial::BodyType;
    use math::OrbitalElements;

    let id = protocol::BodyId::decode(buf)?;
    let name = String::decode(buf)?;
    let body_type = match u8::decode(buf)? {
        0 => BodyType::Star,
        1 => BodyType::Planet,
        2 => BodyType::Moon,
        3 => BodyType::Asteroid,
        4 => BodyType::Comet,
        5 => BodyType::Station,
        other => return Err(CodecError::UnknownMessageType(other as u16)),
    };
    let mass = f64::decode(buf)?;
    let radius = f64::decode(buf)?;
    let parent_id = Option::<protocol::BodyId>::decode(buf)?;
    let has_elements = bool::decode(buf)?;
    let elements = if has_elements {
        Some(OrbitalElements {
            semi_major_axis: f64::decode(buf)?,
            eccentricity: f64::decode(buf)?,
            inclination: f64::decode(buf)?,
            raan: f64::decode(buf)?,
            arg_periapsis: f64::decode(buf)?,
            mean_anomaly_epoch: f64::decode(buf)?,
        })
    } else {
        None
    };
    let r = u8::decode(buf)?;
    let g = u8::decode(buf)?;
    let b = u8::decode(buf)?;

    Ok((
        id,
        BodySpec {
            name,
            body_type,
            mass,
            radius,
            elements,
            parent_id,
            color: [r, g, b],
        },
    ))
}

/// Full `f64` precision, unlike the wire codec's `Vec3f`: a persisted AOI
/// center should not lose precision a save/load cycle didn't need to cost.
fn encode_vec3_f64(v: math::Vec3, buf: &mut BytesMut) -> Result<(), CodecError> {
    v.x.encode(buf)?;
    v.y.encode(buf)?;
    v.z.encode(buf)
}

fn decode_vec3_f64(buf: &mut Bytes) -> Result<math::Vec3, CodecError> {
    Ok(math::Vec3::new(f64::decode(buf)?, f64::decode(buf)?, f64::decode(buf)?))
}

fn encode_aoi(aoi: &Aoi, buf: &mut BytesMut) -> Result<(), CodecError> {
    aoi.id.encode(buf)?;
    aoi.name.encode(buf)?;
    encode_vec3_f64(aoi.center, buf)?;
    aoi.radius.encode(buf)?;
    aoi.capacity.encode(buf)?;
    aoi.follows.encode(buf)
}

fn decode_aoi_spec(buf: &mut Bytes) -> Result<(protocol::AoiId, AoiSpec), CodecError> {
    let id = protocol::AoiId::decode(buf)?;
    let name = String::decode(buf)?;
    let center = decode_vec3_f64(buf)?;
    let radius = f64::decode(buf)?;
    let capacity = u32::decode(buf)?;
    let follows = Option::<protocol::BodyId>::decode(buf)?;
    Ok((
        id,
        AoiSpec {
            name,
            center,
            radius,
            capacity,
            follows,
        },
    ))
}

/// Serializes the celestial forest, every AOI definition, and the current
/// settings into a single buffer.
pub fn save(
    celestial: &CelestialSimulator,
    aois: &AoiPartitioner,
    settings: &Settings,
) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    SNAPSHOT_MAGIC.encode(&mut buf)?;
    SNAPSHOT_VERSION.encode(&mut buf)?;

    let bodies = celestial.bodies_in_topological_order();
    (bodies.len() as u32).encode(&mut buf)?;
    for body in bodies {
        encode_body(body, &mut buf)?;
    }

    let aoi_list = aois.list();
    (aoi_list.len() as u32).encode(&mut buf)?;
    for aoi in aoi_list {
        encode_aoi(aoi, &mut buf)?;
    }

    let settings_toml = toml::to_string(settings).map_err(|_| CodecError::InvalidUtf8)?;
    settings_toml.encode(&mut buf)?;

    Ok(buf.freeze())
}

pub struct LoadedSnapshot {
    pub bodies: Vec<(protocol::BodyId, BodySpec)>,
    pub aois: Vec<(protocol::AoiId, AoiSpec)>,
    pub settings: Settings,
}

pub fn load_bytes(mut bytes: Bytes) -> Result<LoadedSnapshot, CodecError> {
    let magic = u32::decode(&mut bytes)?;
    if magic != SNAPSHOT_MAGIC {
        return Err(CodecError::InvalidUtf8);
    }
    let version = u16::decode(&mut bytes)?;
    if version != SNAPSHOT_VERSION {
        return Err(CodecError::UnknownMessageType(version));
    }

    let body_count = u32::decode(&mut bytes)?;
    let mut bodies = Vec::with_capacity(body_count as usize);
    for _ in 0..body_count {
        bodies.push(decode_body_spec(&mut bytes)?);
    }

    let aoi_count = u32::decode(&mut bytes)?;
    let mut aois = Vec::with_capacity(aoi_count as usize);
    for _ in 0..aoi_count {
        aois.push(decode_aoi_spec(&mut bytes)?);
    }

    let settings_toml = String::decode(&mut bytes)?;
    let settings: Settings = toml::from_str(&settings_toml).map_err(|_| CodecError::InvalidUtf8)?;

    Ok(LoadedSnapshot { bodies, aois, settings })
}

pub fn save_to_file(
    path: &Path,
    celestial: &CelestialSimulator,
    aois: &AoiPartitioner,
    settings: &Settings,
) -> io::Result<()> {
    let bytes = save(celestial, aois, settings).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, bytes)
}

pub fn load_from_file(path: &Path) -> io::Result<Option<LoadedSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(path)?;
    let snapshot =
        load_bytes(Bytes::from(raw)).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(snapshot))
}

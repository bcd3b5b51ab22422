//! The per-force groups: `research`, `launches`, `production` and `entities`.
//!
//! A force entry mixes two kinds of keys. `research` and `launches` hold
//! force-wide state, every other key names a surface holding that force's
//! prototype statistics and entity counts on it.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use super::{
    ENTITY_COUNT, Error, FORCE_PROTOTYPE_CONSUMPTION, FORCE_PROTOTYPE_PRODUCTION,
    FORCE_RESEARCH_PROGRESS, Group, ITEMS_LAUNCHED, ROCKETS_LAUNCHED, deserialize, top_level,
};
use crate::{metric::Family, snapshot::Snapshot};

const RESEARCH: &str = "research";
const LAUNCHES: &str = "launches";

/// Prototype kinds that are produced and consumed as materials.
const MATERIAL_KINDS: [&str; 2] = ["item", "fluid"];

type Forces = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Deserialize)]
struct Research {
    progress: f64,
}

#[derive(Debug, Deserialize)]
struct Launches {
    count: f64,
    items: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct Prototype {
    #[serde(rename = "type")]
    kind: String,
    production: f64,
    consumption: f64,
}

#[derive(Debug, Deserialize)]
struct SurfacePrototypes {
    prototypes: BTreeMap<String, Prototype>,
}

#[derive(Debug, Deserialize)]
struct SurfaceEntities {
    entities: BTreeMap<String, f64>,
}

fn forces(snapshot: &Snapshot, group: Group) -> Result<Forces, Error> {
    top_level(snapshot, group, "forces")
}

/// Deserialize the force-wide entry `key` of `force`.
fn force_entry<'a, T>(
    group: Group,
    force_name: &str,
    force: &'a BTreeMap<String, Value>,
    key: &str,
) -> Result<T, Error>
where
    T: Deserialize<'a>,
{
    let path = format!("forces.{force_name}.{key}");
    let value = force.get(key).ok_or_else(|| Error::MissingField {
        group,
        path: path.clone(),
    })?;
    deserialize(group, &path, value)
}

/// Iterate the surface entries of `force`, skipping force-wide keys.
fn surfaces(force: &BTreeMap<String, Value>) -> impl Iterator<Item = (&String, &Value)> {
    force
        .iter()
        .filter(|(key, _)| key.as_str() != RESEARCH && key.as_str() != LAUNCHES)
}

pub(super) fn research(snapshot: &Snapshot) -> Result<Vec<Family>, Error> {
    let forces = forces(snapshot, Group::Research)?;

    let mut progress = FORCE_RESEARCH_PROGRESS.builder();
    for (name, force) in &forces {
        let research: Research = force_entry(Group::Research, name, force, RESEARCH)?;
        progress.push([name.as_str()], research.progress);
    }
    Ok(vec![progress.build()])
}

pub(super) fn launches(snapshot: &Snapshot) -> Result<Vec<Family>, Error> {
    let forces = forces(snapshot, Group::Launches)?;

    let mut rockets = ROCKETS_LAUNCHED.builder();
    let mut items = ITEMS_LAUNCHED.builder();
    for (name, force) in &forces {
        let launches: Launches = force_entry(Group::Launches, name, force, LAUNCHES)?;
        rockets.push([name.as_str()], launches.count);
        for (item, launched) in &launches.items {
            items.push([name.as_str(), item.as_str()], *launched);
        }
    }
    Ok(vec![rockets.build(), items.build()])
}

pub(super) fn production(snapshot: &Snapshot) -> Result<Vec<Family>, Error> {
    let forces = forces(snapshot, Group::Production)?;

    let mut consumption = FORCE_PROTOTYPE_CONSUMPTION.builder();
    let mut production = FORCE_PROTOTYPE_PRODUCTION.builder();
    for (force_name, force) in &forces {
        for (surface_name, surface) in surfaces(force) {
            let path = format!("forces.{force_name}.{surface_name}");
            let surface: SurfacePrototypes = deserialize(Group::Production, &path, surface)?;
            for (prototype_name, prototype) in &surface.prototypes {
                if !MATERIAL_KINDS.contains(&prototype.kind.as_str()) {
                    trace!(
                        "skipping {prototype_name} of non-material kind {}",
                        prototype.kind
                    );
                    continue;
                }
                let labels = [
                    force_name.as_str(),
                    prototype_name.as_str(),
                    surface_name.as_str(),
                    prototype.kind.as_str(),
                ];
                consumption.push(labels, prototype.consumption);
                production.push(labels, prototype.production);
            }
        }
    }
    Ok(vec![consumption.build(), production.build()])
}

pub(super) fn entities(snapshot: &Snapshot) -> Result<Vec<Family>, Error> {
    let forces = forces(snapshot, Group::Entities)?;

    let mut count = ENTITY_COUNT.builder();
    for (force_name, force) in &forces {
        for (surface_name, surface) in surfaces(force) {
            let path = format!("forces.{force_name}.{surface_name}");
            let surface: SurfaceEntities = deserialize(Group::Entities, &path, surface)?;
            for (entity, live) in &surface.entities {
                count.push(
                    [force_name.as_str(), entity.as_str(), surface_name.as_str()],
                    *live,
                );
            }
        }
    }
    Ok(vec![count.build()])
}

//! The `time` group: game clock and per-surface day length.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{
    Error, GAME_TICK, GAME_TICK_PAUSED, GAME_TICKS_PLAYED, Group, SURFACE_TICKS_PER_DAY,
    deserialize, top_level,
};
use crate::{
    metric::{Family, flag},
    snapshot::Snapshot,
};

/// Each clock reading is optional, absent readings emit no sample.
#[derive(Debug, Deserialize)]
struct Clock {
    tick: Option<f64>,
    ticks_played: Option<f64>,
    paused: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Surface {
    ticks_per_day: f64,
}

pub(super) fn translate(snapshot: &Snapshot) -> Result<Vec<Family>, Error> {
    let time = snapshot
        .pointer(&["game", "time"])
        .ok_or_else(|| Error::MissingField {
            group: Group::Time,
            path: "game.time".to_string(),
        })?;
    let clock: Clock = deserialize(Group::Time, "game.time", time)?;
    let surfaces: BTreeMap<String, Surface> = top_level(snapshot, Group::Time, "surfaces")?;

    let mut tick = GAME_TICK.builder();
    if let Some(value) = clock.tick {
        tick.push([], value);
    }
    let mut played = GAME_TICKS_PLAYED.builder();
    if let Some(value) = clock.ticks_played {
        played.push([], value);
    }
    let mut paused = GAME_TICK_PAUSED.builder();
    if let Some(value) = clock.paused {
        paused.push([], flag(value));
    }

    let mut ticks_per_day = SURFACE_TICKS_PER_DAY.builder();
    for (name, surface) in &surfaces {
        ticks_per_day.push([name.as_str()], surface.ticks_per_day);
    }

    Ok(vec![
        tick.build(),
        played.build(),
        paused.build(),
        ticks_per_day.build(),
    ])
}

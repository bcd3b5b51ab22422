//! The `player` group: connection state of every known player.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{Error, Group, PLAYER_CONNECTED, top_level};
use crate::{
    metric::{Family, flag},
    snapshot::Snapshot,
};

#[derive(Debug, Deserialize)]
struct Player {
    connected: bool,
}

pub(super) fn translate(snapshot: &Snapshot) -> Result<Vec<Family>, Error> {
    let players: BTreeMap<String, Player> = top_level(snapshot, Group::Player, "players")?;

    let mut connected = PLAYER_CONNECTED.builder();
    for (username, player) in &players {
        connected.push([username.as_str()], flag(player.connected));
    }
    Ok(vec![connected.build()])
}

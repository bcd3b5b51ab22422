//! Translate a [`Snapshot`] into metric families.
//!
//! Translation is split into metric groups, one per logical area of game
//! state. Each group reads only its own part of the snapshot and fails on its
//! own: a group whose sub-tree is missing a field or has the wrong shape is
//! logged and omitted, the remaining groups are still emitted.
//!
//! Map keys are visited in sorted order so translating the same snapshot twice
//! yields identical output.
//!
//! ## Metrics
//!
//! | group        | families |
//! |--------------|----------|
//! | `time`       | `factorio_game_tick`, `factorio_game_ticks_played`, `factorio_game_tick_paused`, `factorio_surface_ticks_per_day{surface}` |
//! | `player`     | `factorio_player_connected{username}` |
//! | `launches`   | `factorio_rockets_launched{force}`, `factorio_items_launched{force,name}` |
//! | `research`   | `factorio_force_research_progress{force}` |
//! | `production` | `factorio_force_prototype_consumption{force,prototype,surface,type}`, `factorio_force_prototype_production{force,prototype,surface,type}` |
//! | `entities`   | `factorio_entity_count{force,name,surface}` |
//! | `pollution`  | `factorio_surface_pollution_total{surface}`, `factorio_pollution_consumption{source,surface}`, `factorio_pollution_production{source,surface}` |

mod forces;
mod player;
mod pollution;
mod time;

use std::{fmt, str::FromStr};

use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    metric::{Descriptor, Family, Kind},
    snapshot::Snapshot,
};

/// Errors produced while translating one metric group.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A key the group requires is absent from the snapshot.
    #[error("{group} group: snapshot is missing `{path}`")]
    MissingField {
        /// The group whose translation failed.
        group: Group,
        /// Dotted path of the absent key.
        path: String,
    },
    /// A sub-tree is present but does not have the expected shape, including
    /// nested fields that are absent.
    #[error("{group} group: unexpected shape at `{path}`: {source}")]
    Malformed {
        /// The group whose translation failed.
        group: Group,
        /// Dotted path of the offending sub-tree.
        path: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// A requested group name did not match any [`Group`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown metric group: {0}")]
pub struct UnknownGroup(pub String);

/// A logical metric group, exposed on its own endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    /// Game and surface clocks.
    Time,
    /// Player connection state.
    Player,
    /// Rocket and item launches per force.
    Launches,
    /// Research progress per force.
    Research,
    /// Prototype production and consumption per force and surface.
    Production,
    /// Entity counts per force and surface.
    Entities,
    /// Pollution per surface and source.
    Pollution,
}

impl Group {
    /// Every group, in exposition order.
    pub const ALL: [Self; 7] = [
        Self::Time,
        Self::Player,
        Self::Launches,
        Self::Research,
        Self::Production,
        Self::Entities,
        Self::Pollution,
    ];

    /// The group's name, as used in endpoint paths and log fields.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Player => "player",
            Self::Launches => "launches",
            Self::Research => "research",
            Self::Production => "production",
            Self::Entities => "entities",
            Self::Pollution => "pollution",
        }
    }

    /// Translate this group's part of `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an error if a key this group needs is missing or malformed.
    pub fn translate(self, snapshot: &Snapshot) -> Result<Vec<Family>, Error> {
        match self {
            Self::Time => time::translate(snapshot),
            Self::Player => player::translate(snapshot),
            Self::Launches => forces::launches(snapshot),
            Self::Research => forces::research(snapshot),
            Self::Production => forces::production(snapshot),
            Self::Entities => forces::entities(snapshot),
            Self::Pollution => pollution::translate(snapshot),
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Group {
    type Err = UnknownGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|group| group.name() == s)
            .ok_or_else(|| UnknownGroup(s.to_string()))
    }
}

/// Translate `groups` of `snapshot`, isolating failures per group.
///
/// A group that fails is logged, counted in
/// `exporter_translation_failures_total` and contributes no families.
#[must_use]
pub fn translate(snapshot: &Snapshot, groups: &[Group]) -> Vec<Family> {
    let mut families = Vec::new();
    for group in groups {
        match group.translate(snapshot) {
            Ok(mut translated) => {
                debug!("translated {} families for {group} group", translated.len());
                families.append(&mut translated);
            }
            Err(err) => {
                warn!("dropping metric group from scrape: {err}");
                counter!("exporter_translation_failures_total", "group" => group.name())
                    .increment(1);
            }
        }
    }
    families
}

/// Deserialize the sub-tree at `path`.
fn deserialize<'a, T>(group: Group, path: &str, value: &'a Value) -> Result<T, Error>
where
    T: Deserialize<'a>,
{
    T::deserialize(value).map_err(|source| Error::Malformed {
        group,
        path: path.to_string(),
        source,
    })
}

/// Deserialize an optional top-level map. An absent or null key is empty.
fn top_level<'a, T>(snapshot: &'a Snapshot, group: Group, key: &str) -> Result<T, Error>
where
    T: Deserialize<'a> + Default,
{
    match snapshot.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => deserialize(group, key, value),
    }
}

/// The current tick of the game.
pub static GAME_TICK: Descriptor<0> = Descriptor {
    name: "factorio_game_tick",
    help: "The current tick of the running Factorio game.",
    kind: Kind::Gauge,
    label_keys: [],
};

/// Ticks executed by the game.
pub static GAME_TICKS_PLAYED: Descriptor<0> = Descriptor {
    name: "factorio_game_ticks_played",
    help: "The number of ticks executed of the running Factorio game.",
    kind: Kind::Gauge,
    label_keys: [],
};

/// Whether the game is paused.
pub static GAME_TICK_PAUSED: Descriptor<0> = Descriptor {
    name: "factorio_game_tick_paused",
    help: "Whether or not the game is currently paused.",
    kind: Kind::Gauge,
    label_keys: [],
};

/// Day length of each surface.
pub static SURFACE_TICKS_PER_DAY: Descriptor<1> = Descriptor {
    name: "factorio_surface_ticks_per_day",
    help: "The total number of ticks per day across the surface.",
    kind: Kind::Gauge,
    label_keys: ["surface"],
};

/// Connection state of each known player.
pub static PLAYER_CONNECTED: Descriptor<1> = Descriptor {
    name: "factorio_player_connected",
    help: "The current connection state of the player.",
    kind: Kind::Gauge,
    label_keys: ["username"],
};

/// Rockets launched per force.
pub static ROCKETS_LAUNCHED: Descriptor<1> = Descriptor {
    name: "factorio_rockets_launched",
    help: "The total number of rockets launched.",
    kind: Kind::Gauge,
    label_keys: ["force"],
};

/// Items launched per force.
pub static ITEMS_LAUNCHED: Descriptor<2> = Descriptor {
    name: "factorio_items_launched",
    help: "The total number of items launched in rockets.",
    kind: Kind::Gauge,
    label_keys: ["force", "name"],
};

/// Progress of the current research per force.
pub static FORCE_RESEARCH_PROGRESS: Descriptor<1> = Descriptor {
    name: "factorio_force_research_progress",
    help: "The current research progress percentage (0-1) for a force.",
    kind: Kind::Gauge,
    label_keys: ["force"],
};

/// Consumption of each prototype.
pub static FORCE_PROTOTYPE_CONSUMPTION: Descriptor<4> = Descriptor {
    name: "factorio_force_prototype_consumption",
    help: "The total consumption of a given prototype for a force.",
    kind: Kind::Counter,
    label_keys: ["force", "prototype", "surface", "type"],
};

/// Production of each prototype.
pub static FORCE_PROTOTYPE_PRODUCTION: Descriptor<4> = Descriptor {
    name: "factorio_force_prototype_production",
    help: "The total production of a given prototype for a force.",
    kind: Kind::Counter,
    label_keys: ["force", "prototype", "surface", "type"],
};

/// Live entity counts.
pub static ENTITY_COUNT: Descriptor<3> = Descriptor {
    name: "factorio_entity_count",
    help: "The total number of entities.",
    kind: Kind::Gauge,
    label_keys: ["force", "name", "surface"],
};

/// Total pollution of each surface.
pub static SURFACE_POLLUTION_TOTAL: Descriptor<1> = Descriptor {
    name: "factorio_surface_pollution_total",
    help: "The total pollution across the surface.",
    kind: Kind::Gauge,
    label_keys: ["surface"],
};

/// Pollution absorbed by each source.
pub static POLLUTION_CONSUMPTION: Descriptor<2> = Descriptor {
    name: "factorio_pollution_consumption",
    help: "The current pollution consumption total for a given source on a surface.",
    kind: Kind::Gauge,
    label_keys: ["source", "surface"],
};

/// Pollution emitted by each source.
pub static POLLUTION_PRODUCTION: Descriptor<2> = Descriptor {
    name: "factorio_pollution_production",
    help: "The current pollution production total for a given source on a surface.",
    kind: Kind::Gauge,
    label_keys: ["source", "surface"],
};

#[cfg(test)]
pub(crate) mod tests {
    use proptest::prelude::*;
    use serde_json::{Map, json};

    use super::*;

    /// A snapshot exercising every group.
    pub(crate) const FULL: &str = r#"{
        "game": {"time": {"tick": 1200, "ticks_played": 1500, "paused": false}},
        "players": {"alice": {"connected": true}, "bob": {"connected": false}},
        "forces": {
            "player": {
                "research": {"progress": 0.25},
                "launches": {"count": 3, "items": {"satellite": 2}},
                "nauvis": {
                    "prototypes": {
                        "iron-plate": {"type": "item", "production": 500, "consumption": 120.5},
                        "water": {"type": "fluid", "production": 9000, "consumption": 8000},
                        "signal-A": {"type": "virtual", "production": 1, "consumption": 1}
                    },
                    "entities": {"assembling-machine-1": 12, "inserter": 40}
                }
            }
        },
        "surfaces": {"nauvis": {"ticks_per_day": 25000, "pollution": {"total": 1234.5}}},
        "pollution": {"nauvis": {"assembling-machine-1": 80.0, "tree-01": -3.5}}
    }"#;

    pub(crate) fn full() -> Snapshot {
        Snapshot::from_slice(FULL.as_bytes()).expect("fixture is valid")
    }

    fn family<'a>(families: &'a [Family], name: &str) -> Option<&'a Family> {
        families.iter().find(|f| f.name == name)
    }

    #[test]
    fn group_names_round_trip() {
        for group in Group::ALL {
            assert_eq!(group.name().parse::<Group>(), Ok(group));
        }
        assert_eq!(
            "bogus".parse::<Group>(),
            Err(UnknownGroup("bogus".to_string()))
        );
    }

    #[test]
    fn full_snapshot_translates_every_group() {
        let families = translate(&full(), &Group::ALL);

        let tick = family(&families, "factorio_game_tick").expect("tick missing");
        assert_eq!(tick.value(&[]), Some(1200.0));
        let paused = family(&families, "factorio_game_tick_paused").expect("paused missing");
        assert_eq!(paused.value(&[]), Some(0.0));
        let day = family(&families, "factorio_surface_ticks_per_day").expect("day missing");
        assert_eq!(day.value(&["nauvis"]), Some(25_000.0));

        let players = family(&families, "factorio_player_connected").expect("players missing");
        assert_eq!(players.value(&["alice"]), Some(1.0));
        assert_eq!(players.value(&["bob"]), Some(0.0));

        let rockets = family(&families, "factorio_rockets_launched").expect("rockets missing");
        assert_eq!(rockets.value(&["player"]), Some(3.0));
        let items = family(&families, "factorio_items_launched").expect("items missing");
        assert_eq!(items.value(&["player", "satellite"]), Some(2.0));

        let research =
            family(&families, "factorio_force_research_progress").expect("research missing");
        assert_eq!(research.value(&["player"]), Some(0.25));

        let production =
            family(&families, "factorio_force_prototype_production").expect("production missing");
        assert_eq!(production.kind, Kind::Counter);
        assert_eq!(
            production.value(&["player", "iron-plate", "nauvis", "item"]),
            Some(500.0)
        );
        assert_eq!(
            production.value(&["player", "water", "nauvis", "fluid"]),
            Some(9000.0)
        );
        // Virtual signals are not materials.
        assert_eq!(production.samples.len(), 2);
        let consumption = family(&families, "factorio_force_prototype_consumption")
            .expect("consumption missing");
        assert_eq!(
            consumption.value(&["player", "iron-plate", "nauvis", "item"]),
            Some(120.5)
        );
        // The research entry is never mistaken for a surface.
        assert!(
            production
                .samples
                .iter()
                .all(|s| s.labels[2] != "research" && s.labels[2] != "launches")
        );

        let entities = family(&families, "factorio_entity_count").expect("entities missing");
        assert_eq!(
            entities.value(&["player", "inserter", "nauvis"]),
            Some(40.0)
        );

        let total =
            family(&families, "factorio_surface_pollution_total").expect("pollution missing");
        assert_eq!(total.value(&["nauvis"]), Some(1234.5));
        let produced =
            family(&families, "factorio_pollution_production").expect("production missing");
        assert_eq!(
            produced.value(&["assembling-machine-1", "nauvis"]),
            Some(80.0)
        );
        let consumed =
            family(&families, "factorio_pollution_consumption").expect("consumption missing");
        assert_eq!(consumed.value(&["tree-01", "nauvis"]), Some(3.5));
        assert_eq!(consumed.samples.len(), 1);
    }

    #[test]
    fn minimal_snapshot_emits_only_tick() {
        let snapshot = Snapshot::from_slice(
            br#"{"game":{"time":{"tick":42}}, "players":{}, "forces":{}, "surfaces":{}, "pollution":{}}"#,
        )
        .expect("valid snapshot");
        let families = translate(&snapshot, &Group::ALL);

        let populated: Vec<_> = families.iter().filter(|f| !f.samples.is_empty()).collect();
        assert_eq!(populated.len(), 1);
        assert_eq!(populated[0].name, "factorio_game_tick");
        assert_eq!(populated[0].value(&[]), Some(42.0));
    }

    #[test]
    fn missing_game_fails_only_time_group() {
        let mut root: Map<String, Value> =
            serde_json::from_str(FULL).expect("fixture is valid");
        root.remove("game");
        let snapshot = Snapshot::from_slice(&serde_json::to_vec(&root).expect("serializable"))
            .expect("valid snapshot");

        assert!(matches!(
            Group::Time.translate(&snapshot),
            Err(Error::MissingField { group: Group::Time, .. })
        ));
        let families = translate(&snapshot, &Group::ALL);
        assert!(family(&families, "factorio_game_tick").is_none());
        assert!(family(&families, "factorio_surface_ticks_per_day").is_none());
        assert!(family(&families, "factorio_player_connected").is_some());
        assert!(family(&families, "factorio_entity_count").is_some());
    }

    #[test]
    fn malformed_player_fails_only_player_group() {
        let mut root: Map<String, Value> =
            serde_json::from_str(FULL).expect("fixture is valid");
        root.insert("players".to_string(), json!({"alice": {"online": true}}));
        let snapshot = Snapshot::from_slice(&serde_json::to_vec(&root).expect("serializable"))
            .expect("valid snapshot");

        assert!(matches!(
            Group::Player.translate(&snapshot),
            Err(Error::Malformed { group: Group::Player, .. })
        ));
        let families = translate(&snapshot, &Group::ALL);
        assert!(family(&families, "factorio_player_connected").is_none());
        assert!(family(&families, "factorio_game_tick").is_some());
        assert_eq!(
            families.len(),
            translate(&full(), &Group::ALL).len() - 1
        );
    }

    #[test]
    fn force_without_research_fails_only_research_group() {
        let mut root: Map<String, Value> =
            serde_json::from_str(FULL).expect("fixture is valid");
        root["forces"]["player"]
            .as_object_mut()
            .expect("force is an object")
            .remove("research");
        let snapshot = Snapshot::from_slice(&serde_json::to_vec(&root).expect("serializable"))
            .expect("valid snapshot");

        assert!(Group::Research.translate(&snapshot).is_err());
        assert!(Group::Production.translate(&snapshot).is_ok());
        assert!(Group::Launches.translate(&snapshot).is_ok());
        assert!(Group::Entities.translate(&snapshot).is_ok());
    }

    fn label() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,8}"
    }

    fn surface() -> impl Strategy<Value = String> {
        label().prop_map(|name| format!("surface-{name}"))
    }

    fn prototype() -> impl Strategy<Value = Value> {
        (
            prop::sample::select(vec!["item", "fluid", "virtual"]),
            0.0..1e9_f64,
            0.0..1e9_f64,
        )
            .prop_map(|(kind, production, consumption)| {
                json!({"type": kind, "production": production, "consumption": consumption})
            })
    }

    fn force() -> impl Strategy<Value = Value> {
        (
            0.0..=1.0_f64,
            0_u32..100,
            prop::collection::btree_map(label(), 0_u32..1_000, 0..3),
            prop::collection::btree_map(
                surface(),
                (
                    prop::collection::btree_map(label(), prototype(), 0..4),
                    prop::collection::btree_map(label(), 0_u32..10_000, 0..4),
                ),
                0..3,
            ),
        )
            .prop_map(|(progress, count, items, surfaces)| {
                let mut force = Map::new();
                force.insert("research".to_string(), json!({"progress": progress}));
                force.insert(
                    "launches".to_string(),
                    json!({"count": count, "items": items}),
                );
                for (name, (prototypes, entities)) in surfaces {
                    force.insert(
                        name,
                        json!({"prototypes": prototypes, "entities": entities}),
                    );
                }
                Value::Object(force)
            })
    }

    prop_compose! {
        fn snapshot()(
            tick in any::<u32>(),
            paused in any::<bool>(),
            players in prop::collection::btree_map(label(), any::<bool>(), 0..5),
            forces in prop::collection::btree_map(label(), force(), 0..3),
            surfaces in prop::collection::btree_map(surface(), (1_u32..100_000, 0.0..1e7_f64), 0..3),
            pollution in prop::collection::btree_map(
                surface(),
                prop::collection::btree_map(label(), -1e4..1e4_f64, 0..4),
                0..3,
            ),
        ) -> Map<String, Value> {
            let players: Map<String, Value> = players
                .into_iter()
                .map(|(name, connected)| (name, json!({"connected": connected})))
                .collect();
            let surfaces: Map<String, Value> = surfaces
                .into_iter()
                .map(|(name, (day, total))| {
                    (name, json!({"ticks_per_day": day, "pollution": {"total": total}}))
                })
                .collect();
            let mut root = Map::new();
            root.insert("game".to_string(), json!({"time": {"tick": tick, "ticks_played": tick, "paused": paused}}));
            root.insert("players".to_string(), Value::Object(players));
            root.insert("forces".to_string(), json!(forces));
            root.insert("surfaces".to_string(), Value::Object(surfaces));
            root.insert("pollution".to_string(), json!(pollution));
            root
        }
    }

    fn parse(root: &Map<String, Value>) -> Snapshot {
        Snapshot::from_slice(&serde_json::to_vec(root).expect("serializable"))
            .expect("valid snapshot")
    }

    proptest! {
        #[test]
        fn label_arity_matches_declaration(root in snapshot()) {
            let families = translate(&parse(&root), &Group::ALL);
            for family in &families {
                for sample in &family.samples {
                    prop_assert_eq!(sample.labels.len(), family.label_keys.len());
                }
            }
        }

        #[test]
        fn every_group_succeeds_on_well_formed_snapshots(root in snapshot()) {
            let snapshot = parse(&root);
            for group in Group::ALL {
                prop_assert!(group.translate(&snapshot).is_ok(), "{} failed", group);
            }
        }

        #[test]
        fn translation_is_idempotent(root in snapshot()) {
            let snapshot = parse(&root);
            prop_assert_eq!(
                translate(&snapshot, &Group::ALL),
                translate(&snapshot, &Group::ALL)
            );
        }

        #[test]
        fn missing_players_leaves_other_groups_untouched(root in snapshot()) {
            let with = translate(&parse(&root), &Group::ALL);
            let mut without_players = root.clone();
            without_players.remove("players");
            let without = translate(&parse(&without_players), &Group::ALL);

            let connected = family(&without, "factorio_player_connected");
            prop_assert!(connected.is_none_or(|f| f.samples.is_empty()));

            let others = |families: &[Family]| -> Vec<Family> {
                families
                    .iter()
                    .filter(|f| f.name != "factorio_player_connected")
                    .cloned()
                    .collect()
            };
            prop_assert_eq!(others(&with), others(&without));
        }

        #[test]
        fn only_materials_are_counted(root in snapshot()) {
            let families = translate(&parse(&root), &Group::ALL);
            let production = family(&families, "factorio_force_prototype_production")
                .expect("production family always present");
            let consumption = family(&families, "factorio_force_prototype_consumption")
                .expect("consumption family always present");
            prop_assert_eq!(production.samples.len(), consumption.samples.len());
            for sample in &production.samples {
                prop_assert!(sample.labels[3] == "item" || sample.labels[3] == "fluid");
            }
        }
    }
}

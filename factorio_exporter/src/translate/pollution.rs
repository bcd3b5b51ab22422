//! The `pollution` group.
//!
//! Sources report a net figure: positive values are emissions and land in
//! the production family, negative values are absorption and land, as a
//! magnitude, in the consumption family.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{
    Error, Group, POLLUTION_CONSUMPTION, POLLUTION_PRODUCTION, SURFACE_POLLUTION_TOTAL, top_level,
};
use crate::{metric::Family, snapshot::Snapshot};

#[derive(Debug, Deserialize)]
struct Total {
    total: f64,
}

#[derive(Debug, Deserialize)]
struct Surface {
    pollution: Total,
}

pub(super) fn translate(snapshot: &Snapshot) -> Result<Vec<Family>, Error> {
    let surfaces: BTreeMap<String, Surface> = top_level(snapshot, Group::Pollution, "surfaces")?;
    let sources: BTreeMap<String, BTreeMap<String, f64>> =
        top_level(snapshot, Group::Pollution, "pollution")?;

    let mut total = SURFACE_POLLUTION_TOTAL.builder();
    for (name, surface) in &surfaces {
        total.push([name.as_str()], surface.pollution.total);
    }

    let mut consumption = POLLUTION_CONSUMPTION.builder();
    let mut production = POLLUTION_PRODUCTION.builder();
    for (surface, by_source) in &sources {
        for (source, net) in by_source {
            let labels = [source.as_str(), surface.as_str()];
            if *net < 0.0 {
                consumption.push(labels, -net);
            } else {
                production.push(labels, *net);
            }
        }
    }

    Ok(vec![total.build(), consumption.build(), production.build()])
}

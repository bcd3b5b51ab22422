//! The Factorio Prometheus exporter.
//!
//! This library supports the `factorio-exporter` binary found elsewhere in
//! this project. A scrape of the metrics endpoint acquires one snapshot of
//! game state, either by executing a script over RCON or by reading a JSON
//! file written by the game, and translates the nested snapshot into flat,
//! labeled Prometheus metric families.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![warn(unreachable_pub)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]

pub mod channel;
pub mod collector;
pub mod commander;
pub mod config;
pub mod exposition;
pub mod metric;
pub mod pacer;
pub mod server;
pub mod signals;
pub mod snapshot;
pub mod source;
pub mod translate;

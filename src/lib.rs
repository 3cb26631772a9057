#![deny(unreachable_pub)]
pub mod config;
pub mod grid;
pub mod runner;

mod helpers;
pub use helpers::{floor_to_tick, format_decimals, round_to_decimals, EPSILON};

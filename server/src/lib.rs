//! Capture-the-flag game mode server library.
//!
//! This module exposes the mode's components for use in tests and binaries.

pub mod capture_zone;
pub mod config;
pub mod engine;
pub mod flag;
pub mod game_loop;
pub mod path_animation;
pub mod player;
pub mod projectile;
pub mod raycast;
pub mod sim_world;
pub mod spawn_validator;
pub mod state;
pub mod ws;

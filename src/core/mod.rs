//! Core types: tile addressing, view state, coordinate math and configuration.

pub mod animation;
pub mod config;
pub mod constants;
pub mod coords;
pub mod geo;
pub mod view;

//! parallax command line host.

pub mod commands;
pub mod plan;
pub mod render;

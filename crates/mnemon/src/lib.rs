//! mnemon: the agent lifecycle and data ingestion control plane.
//!
//! This crate is the composition root. It builds every subsystem exactly
//! once - schema registry and store, governance client, trust and
//! contradiction engines, alert system, training trigger, agent factory,
//! lifecycle manager, ingestion pipeline - and hands `Arc` handles
//! downward. There is no global mutable state; everything reachable from
//! the outside goes through [`api::ControlPlane`].

pub mod api;
pub mod cli;
pub mod config;
pub mod runtime;

pub use api::{ApiError, ControlPlane};
pub use config::Config;

//! GymGate: an access-gated gateway for a local fitness dashboard.
//!
//! Four listeners share one credential and one session registry:
//!
//! - a bootstrap HTTP gate (setup, login, static assets, `/ws_token`);
//! - a WebSocket endpoint broadcasting audio-cue events to browsers;
//! - a loopback event bridge local processes push events into;
//! - a Basic-Auth reverse proxy guarding an opaque upstream service.

pub mod bridge;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod hub;
pub mod pages;
pub mod proxy;
pub mod routes;
pub mod session;
pub mod ws;

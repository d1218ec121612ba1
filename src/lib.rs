//! Conclave Core: a trust- and policy-governed multi-agent orchestration
//! fabric.
//!
//! Five tightly coupled subsystems share a common data model (agent
//! identity, trust, role, position): the agent [`registry`] and
//! [`dispatch`] queue admit and schedule work under tier-gated
//! [`governance`]; the [`crawl`] coordinator runs a role-specialized
//! worker pool over a priority frontier; and [`oscillator`], [`drift`],
//! and [`swarm`] drive shared mode and spatial dynamics through
//! physics-inspired coupled equations. [`kernel`] and [`mission`] give
//! each node and each mission squad their own governance envelope.

pub mod bus;
pub mod crawl;
pub mod dispatch;
pub mod drift;
pub mod error;
pub mod events;
pub mod geometry;
pub mod governance;
pub mod kernel;
pub mod mission;
pub mod oscillator;
pub mod payload;
pub mod registry;
pub mod swarm;
pub mod trust;

pub use error::{FleetError, FleetResult};

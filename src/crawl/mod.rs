//! Crawl subsystem (spec §4.4): URL frontier, crawl agents, role-braid
//! coordination, and the backend-agnostic step contract.

pub mod agent;
pub mod coordinator;
pub mod frontier;
pub mod runner;
pub mod url;

pub use agent::{CrawlAgent, CrawlAgentStatus, Role};
pub use coordinator::{CrawlCoordinator, RoleSwitchRequest, DEFAULT_MIN_SAFETY_SCORE};
pub use frontier::{EntryStatus, Frontier, FrontierEntry, PHI};
pub use runner::{
    heuristic_detector, step, Backend, Decision, DetectorFn, FormField, FormMetadata, GovernanceResult,
    InteractiveElement, PageObservation, SentinelScan, StepOutcome, TrajectoryPoint, TRAJECTORY_DIMENSIONS,
};

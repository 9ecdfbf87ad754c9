//! Plugin subsystems layered on top of the core control plane.
//!
//! Each module implements one piece of the audit-automation surface: the
//! contract engine (in its two shapes), inline suppression, the sandbox and
//! branch execution scopes, the phase orchestrator, the enforcement gate,
//! and the standalone workspace serializer.

pub mod branches;
pub mod contract_loader;
pub mod contracts;
pub mod enforce;
pub mod ignore;
pub mod orchestrator;
pub mod sandbox;
pub mod serialize;

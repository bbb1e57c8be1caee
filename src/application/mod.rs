//! Application layer - Use cases that coordinate domain services.
//!
//! The lifecycle orchestrator drives manifests, removal, extraction and the
//! registry for one product at a time.

mod lifecycle;

pub use lifecycle::{
    Action, LifecycleContext, LifecycleOptions, LifecycleOrchestrator, LifecycleReport,
};

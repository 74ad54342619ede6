//! Stackhand cloud capability boundary.
//!
//! Defines the narrow, mockable interface to actual cloud operations
//! (image registry, infrastructure stacks, service state, logs) consumed by
//! `stackhand-core`. Real adapters wrap the AWS APIs; tests use the
//! in-memory fakes.

pub mod capability;
pub mod error;
pub mod fakes;

pub use capability::{
    CloudCapability, ImageRef, LogLine, ServiceEvent, ServiceState, StackDescription, StackEvent,
    StackId, TaskHealth, TaskObservation, TaskStopInfo,
};
pub use error::{CapabilityError, CapabilityResult};

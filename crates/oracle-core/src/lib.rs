//! oracle-core — shared types, wire format, and configuration.
//! All other oracle crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{
    Capabilities, PeerId, WireError, WorkPayload, WorkRequest, WorkResponse, WorkType, WorkerCategory,
};

//! airctrl-core - Core types for air purifier and humidifier control
//!
//! This crate provides the data model shared by the protocol, conversion and
//! client crates: device identity, the normalized capability vocabulary,
//! snapshots, handle states and the model error taxonomy.

pub mod error;
pub mod models;

pub use error::{ModelError, ModelResult};
pub use models::*;

//! Concrete adapter implementations for ports.

pub mod artifact_codec;
pub mod csv_adapter;
pub mod file_config_adapter;

//! Core domain types and logic.

pub mod candle;
pub mod error;
pub mod indicator;
pub mod snapshot;
pub mod orchestrator;
pub mod condition;
pub mod condition_parser;
pub mod condition_eval;
pub mod strategy;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod circuit_breaker;
pub mod backtest;
pub mod metrics;
pub mod optimizer;
pub mod walk_forward;
pub mod signal;
pub mod universe;
pub mod config_validation;

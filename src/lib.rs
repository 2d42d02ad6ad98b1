//! stratbench: strategy backtesting, optimization and signal screening.
//!
//! Hexagonal layout: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], and the command-line surface in
//! [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;

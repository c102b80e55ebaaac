//! hydra-engine: autonomous multi-strategy trading controller
//!
//! This library provides the core components for:
//! - Periodic trading cycles across a fixed symbol set
//! - Market snapshots, indicators and regime classification
//! - Bandit strategy selection with per-regime learning
//! - Pre-trade risk gating and a persisted kill switch
//! - Trade ledger with reconciliation against the broker
//! - Adaptive capital allocation across strategies
//! - Named event bus with an optional cross-process relay
//! - Structured logging and Prometheus metrics

pub mod brain;
pub mod broker;
pub mod bus;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod market;
pub mod retry;
pub mod risk;
pub mod store;
pub mod strategy;
pub mod telemetry;

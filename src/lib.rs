//! Multi-factor market risk scoring.
//!
//! Per-domain measurements (DEX activity, whale flows, exchange flows) are
//! scored by [`signals::FactorScorer`], summed and classified into a
//! [`core::RiskLevel`], and fed to [`alerts::state::AlertStateMachine`],
//! which records level transitions and hands qualifying ones to
//! [`alerts::sink::AlertSink`]s.

pub mod alerts;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod evaluation;
pub mod notifications;
pub mod signals;

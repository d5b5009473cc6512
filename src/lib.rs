//! press2play
//!
//! A press-to-play kiosk controller for Falcon Player (FPP) appliances.
//!
//! This library provides:
//! - The reconciliation engine keeping volume and indicator consistent with playback
//! - FPP REST status polling and MQTT event feed
//! - Debounced GPIO button input and breathing PWM indicator
//! - HTTP control surface for FPP scripts and operators
//! - Liveness watchdog and usage log

// =============================================================================
// Lints - Enforce code quality and consistency
// =============================================================================

// Deny truly dangerous patterns (these will fail the build)
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod engine;
pub mod provisioning;
pub mod usage_log;
pub mod watchdog;

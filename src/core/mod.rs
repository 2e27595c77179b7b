//! Core module containing the build-and-verify cycle
//!
//! This module provides:
//! - Device discovery over the serial port list
//! - External toolchain execution and build classification
//! - Serial test-summary monitoring
//! - Dependency staging around the build
//! - Run sequencing and the persisted status record

pub mod build;
pub mod cancel;
pub mod classify;
pub mod codec;
pub mod command;
pub mod device;
pub mod monitor;
pub mod orchestrator;
pub mod staging;
pub mod status;

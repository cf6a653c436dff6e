//! # Calibration Rig Library
//!
//! Automation for a dissolved-oxygen sensor calibration rig: a NESLAB RTE
//! water bath sets the temperature, an Alicat mix controller bubbles an
//! N2/O2 blend through the bath, and a YSI probe provides reference
//! readings. A calibration run steps the rig through a CSV sequence of
//! setpoints and logs every device to a timestamped CSV.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: Device drivers behind the [`hardware::Transport`] seam, plus the
//!   serial, simulated and scripted transports.
//! - **`calibration`**: Setpoint loading and validation, status checks, equilibration,
//!   data logging and the run loop.
//! - **`config`**: Layered configuration (defaults, TOML, environment) via `figment`.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: The crate-wide [`error::RigError`].
//! - **`validation`**: Small reusable value checks.

pub mod calibration;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod validation;

pub use error::{RigError, RigResult};

//!
//! # aruco-pose-publisher
//!
//! Finds square fiducial markers in a camera feed, estimates the pose of a marker relative to
//! the camera, and publishes it over NetworkTables.
//!
//! The pose loop lives in [tracker]; [session] wires a [config::Config] up to real devices.
//!

#![deny(
    unused_must_use,
    clippy::infinite_iter,
    clippy::unconditional_recursion,
    clippy::while_immutable_condition
)]

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate serde;

pub mod calibration;
pub mod cameras;
pub mod config;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod messages;
pub mod pose;
pub mod publisher;
pub mod session;
pub mod synthetic;
pub mod tracker;
pub mod utils;
pub mod view;

pub use error::{Error, Result};

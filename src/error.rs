use std::path::PathBuf;

use snafu::prelude::*;

/// The pose publisher's error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read config {}: {source}", path.display()))]
    FailedToReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Invalid config {}: {source}", path.display()))]
    InvalidConfig {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to serialize config: {source}"))]
    SerializeConfig { source: toml::ser::Error },
    #[snafu(display("Failed to write config {}: {source}", path.display()))]
    FailedToWriteConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to read calibration {}: {source}", path.display()))]
    FailedToReadCalibration {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Malformed calibration {}: {reason}", path.display()))]
    MalformedCalibration { path: PathBuf, reason: String },
    #[snafu(display("Invalid calibration: {reason}"))]
    InvalidCalibration { reason: String },

    #[snafu(display("No capture device found (tried {})", candidates.join(", ")))]
    NoCameraFound { candidates: Vec<String> },
    #[snafu(display("The pose loop has no capture device attached"))]
    NotAttached,
    #[snafu(display("Failed to open capture device {device}: {reason}"))]
    FailedToOpenCamera { device: String, reason: String },
    #[snafu(display("Failed to read frame: {reason}"))]
    FailedToReadFrame { reason: String },
    #[snafu(display("The {backend} backend was not compiled in (enable the `{backend}` feature)"))]
    BackendUnavailable { backend: String },

    #[snafu(display("Failed to read dictionary {}: {source}", path.display()))]
    FailedToReadDictionary {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Invalid dictionary: {reason}"))]
    InvalidDictionary { reason: String },
    #[snafu(display("Dictionary {name} is not available for the {detector} detector"))]
    DictionaryUnavailable { name: String, detector: String },

    #[snafu(display("Marker detection failed: {reason}"))]
    DetectionFailed { reason: String },
    #[snafu(display("Degenerate pose: {reason}"))]
    DegeneratePose { reason: String },

    #[snafu(display("Debug window failed: {reason}"))]
    DisplayFailed { reason: String },

    #[snafu(display("Invalid NetworkTables server address: {address}"))]
    InvalidServerAddress { address: String },
    #[snafu(context(false), display("NetworkTables error: {source}"))]
    Nt { source: minint::NtError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;


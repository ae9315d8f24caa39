//! AIX Audio Library
//!
//! Paced PCM output for AIX paud and UMS audio devices.

#![allow(dead_code)]

pub mod audio;
pub mod backend;
pub mod decode;
pub mod driver;
pub mod error;
pub mod player;
pub mod signal;

pub use audio::{AudioSpec, OutputConfig, SampleFormat, Session};
pub use driver::{AudioDriver, Bootstrap};
pub use error::{OutputError, StartReason};

//! copper-raw: Belle II COPPER raw-data block codec
//!
//! This crate navigates, validates, reduces and packs the pre-format
//! (version 1) data blocks produced by COPPER readout boards, and reads and
//! writes raw block files.

pub mod common;
pub mod config;
pub mod format;
pub mod generator;
pub mod rawfile;

pub use common::error::{CopperError, CopperResult, Corruption};

//! COPPER raw-data block codec
//!
//! - [`layout`]: word positions, sizes and magic constants
//! - [`navigator`]: [`PreRawCopper`] view over pre-format buffers
//! - [`validator`]: integrity checks on [`PreRawCopper`]
//! - [`reducer`]: pre-format to reduced-format conversion
//! - [`reduced`]: [`PostRawCopper`] view over reduced buffers
//! - [`packer`]: synthesis of checksum-valid blocks

pub mod checksum;
pub mod dump;
pub mod layout;
pub mod navigator;
pub mod packer;
pub mod reduced;
pub mod reducer;
pub mod validator;

pub use dump::BlockDump;
pub use layout::{RawHeader, RawTrailer, NUM_FINESSE};
pub use navigator::{BlockIndex, PreRawCopper};
pub use packer::{pack_detector_buf, PackedBlock, PackerInfo};
pub use reduced::PostRawCopper;
pub use reducer::{Reducer, ReducerConfig};
pub use validator::check_b2lhslb_magic;

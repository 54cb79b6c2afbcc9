//! Synthetic COPPER block source for testing
//!
//! Generates consecutive events with random detector payloads and wraps
//! them through the packer, so every block is checksum-valid.
//!
//! Payload length per channel: Normal(mean, sigma), at least one word.
//! Trigger time advances by a random number of ctime ticks per event and
//! carries into the Unix time once per second.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use tracing::debug;

use crate::common::error::{CopperError, CopperResult};
use crate::format::layout::NUM_FINESSE;
use crate::format::packer::{pack_detector_buf, PackedBlock, PackerInfo};

/// ctime ticks per second (127.216 MHz system clock)
pub const CTIME_TICKS_PER_SEC: u32 = 127_216_000;

/// Largest generated payload per channel
pub const MAX_PAYLOAD_NWORDS: usize = 4096;

/// Fixed B2L latency added to the trigger ctime
const B2L_CTIME_LATENCY: u32 = 64;

/// Generator configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub exp: u32,
    pub run: u32,
    pub subrun: u32,
    pub node_id: u32,
    /// Enabled FINESSE slots A..D
    pub channels: [bool; NUM_FINESSE],
    pub mean_payload_words: f64,
    pub sigma_payload_words: f64,
    pub seed: u64,
    /// Event number of the first block
    pub first_event: u32,
    /// Unix time of the first block (current time if unset)
    pub start_utime: Option<u32>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            exp: 1,
            run: 5,
            subrun: 0,
            node_id: 0x0100_0001,
            channels: [true, true, false, false],
            mean_payload_words: 64.0,
            sigma_payload_words: 8.0,
            seed: 42,
            first_event: 1,
            start_utime: None,
        }
    }
}

impl GeneratorSettings {
    /// Combined run/subrun field of the exp/run word
    pub fn run_subrun(&self) -> u32 {
        (self.run << 8) | (self.subrun & 0xFF)
    }
}

/// Produces consecutive pre-format blocks
pub struct BlockGenerator {
    settings: GeneratorSettings,
    rng: StdRng,
    payload_dist: Normal<f64>,
    eve_num: u32,
    tt_ctime: u32,
    tt_utime: u32,
    generated: u64,
}

impl BlockGenerator {
    pub fn new(settings: GeneratorSettings) -> CopperResult<Self> {
        let payload_dist = Normal::new(settings.mean_payload_words, settings.sigma_payload_words)
            .map_err(|e| CopperError::config(format!("invalid payload distribution: {}", e)))?;
        let tt_utime = settings
            .start_utime
            .unwrap_or_else(|| chrono::Utc::now().timestamp() as u32);

        Ok(Self {
            rng: StdRng::seed_from_u64(settings.seed),
            payload_dist,
            eve_num: settings.first_event,
            tt_ctime: 0,
            tt_utime,
            generated: 0,
            settings,
        })
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Number of blocks generated so far
    pub fn generated(&self) -> u64 {
        self.generated
    }

    fn payload_nwords(&mut self) -> usize {
        let sample = self.payload_dist.sample(&mut self.rng).round();
        sample.clamp(1.0, MAX_PAYLOAD_NWORDS as f64) as usize
    }

    fn advance_time(&mut self) {
        self.tt_ctime += self.rng.gen_range(1_000..100_000);
        if self.tt_ctime >= CTIME_TICKS_PER_SEC {
            self.tt_ctime -= CTIME_TICKS_PER_SEC;
            self.tt_utime = self.tt_utime.wrapping_add(1);
        }
    }

    /// Metadata of the next event
    fn next_info(&mut self) -> PackerInfo {
        self.advance_time();
        PackerInfo {
            exp_num: self.settings.exp,
            run_subrun_num: self.settings.run_subrun(),
            eve_num: self.eve_num,
            tt_ctime: self.tt_ctime,
            tt_utime: self.tt_utime,
            node_id: self.settings.node_id,
            b2l_ctime: self.tt_ctime + B2L_CTIME_LATENCY,
        }
    }

    /// Generate the next block
    pub fn next_block(&mut self) -> PackedBlock {
        let info = self.next_info();

        let mut payloads: [Vec<u32>; NUM_FINESSE] = Default::default();
        for ch in 0..NUM_FINESSE {
            if self.settings.channels[ch] {
                let nwords = self.payload_nwords();
                payloads[ch] = (0..nwords).map(|_| self.rng.gen::<u32>()).collect();
            }
        }

        let block = pack_detector_buf(
            [
                payloads[0].as_slice(),
                payloads[1].as_slice(),
                payloads[2].as_slice(),
                payloads[3].as_slice(),
            ],
            &info,
        );

        debug!(
            eve = info.eve_num,
            nwords = block.nwords(),
            "Generated COPPER block"
        );

        self.eve_num = self.eve_num.wrapping_add(1);
        self.generated += 1;
        block
    }

    /// Generate `count` blocks as one concatenated buffer
    pub fn generate(&mut self, count: usize) -> Vec<u32> {
        let mut words = Vec::new();
        for _ in 0..count {
            words.extend_from_slice(self.next_block().as_slice());
        }
        words
    }
}

impl Iterator for BlockGenerator {
    type Item = PackedBlock;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_block())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::navigator::PreRawCopper;

    fn settings() -> GeneratorSettings {
        GeneratorSettings {
            start_utime: Some(0x6000_0000),
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_default() {
        let settings = GeneratorSettings::default();
        assert_eq!(settings.exp, 1);
        assert_eq!(settings.run_subrun(), 5 << 8);
        assert_eq!(settings.channels, [true, true, false, false]);
        assert!(settings.start_utime.is_none());
    }

    #[test]
    fn test_invalid_sigma() {
        let settings = GeneratorSettings {
            sigma_payload_words: -1.0,
            ..settings()
        };
        assert!(matches!(
            BlockGenerator::new(settings),
            Err(CopperError::Config(_))
        ));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = BlockGenerator::new(settings()).unwrap().generate(5);
        let b = BlockGenerator::new(settings()).unwrap().generate(5);
        assert_eq!(a, b);

        let other = GeneratorSettings {
            seed: 7,
            ..settings()
        };
        let c = BlockGenerator::new(other).unwrap().generate(5);
        assert_ne!(a, c);
    }

    #[test]
    fn test_generated_blocks_validate() {
        let mut generator = BlockGenerator::new(settings()).unwrap();
        let words = generator.generate(10);
        assert_eq!(generator.generated(), 10);

        let raw = PreRawCopper::new(&words, 10, 1).unwrap();
        for n in 0..raw.num_blocks() {
            raw.validate_block(n, true).unwrap();
            assert_eq!(raw.eve_no(n).unwrap(), n as u32 + 1);
            assert!(raw.finesse_nwords(n, 0).unwrap() > 8);
            assert!(raw.finesse_nwords(n, 1).unwrap() > 8);
            assert_eq!(raw.finesse_nwords(n, 2).unwrap(), 0);
        }
    }

    #[test]
    fn test_utime_carry() {
        let mut generator = BlockGenerator::new(settings()).unwrap();
        generator.tt_ctime = CTIME_TICKS_PER_SEC - 1;
        generator.advance_time();
        assert_eq!(generator.tt_utime, 0x6000_0001);
        assert!(generator.tt_ctime < CTIME_TICKS_PER_SEC);
    }
}

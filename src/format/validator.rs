//! Integrity checks on pre-format COPPER blocks
//!
//! Every failed check is fatal for the block: it returns
//! [`CopperError::Corrupted`] with a dump of the block and is logged at
//! `error` level where it is detected. Nothing here repairs data.

use tracing::debug;

use super::checksum::{crc16_words, xor_checksum, CRC16_INIT};
use super::layout::{b2l, copper, raw_header, raw_trailer, NUM_FINESSE};
use super::navigator::PreRawCopper;
use crate::common::error::{ChannelWords, CopperResult, Corruption};

/// Check the HSLB header/trailer magic pair of one FINESSE buffer
pub fn check_b2lhslb_magic(finesse: &[u32]) -> Result<(), Corruption> {
    let header = finesse.first().copied().unwrap_or(0);
    let trailer = finesse
        .len()
        .checked_sub(b2l::SIZE_B2LHSLB_TRAILER)
        .map(|pos| finesse[pos + b2l::POS_CHKSUM_B2LHSLB])
        .unwrap_or(0);

    if header & b2l::B2LHSLB_MAGIC_MASK == b2l::B2LHSLB_HEADER_MAGIC
        && trailer & b2l::B2LHSLB_MAGIC_MASK == b2l::B2LHSLB_TRAILER_MAGIC
    {
        Ok(())
    } else {
        Err(Corruption::B2lHslbMagic { header, trailer })
    }
}

impl<'a> PreRawCopper<'a> {
    /// Compare the four COPPER magic words; a mismatch is not an error here
    pub fn check_copper_magic(&self, n: usize) -> CopperResult<bool> {
        Ok(
            self.magic_driver_header(n)? == copper::COPPER_MAGIC_DRIVER_HEADER
                && self.magic_fpga_header(n)? == copper::COPPER_MAGIC_FPGA_HEADER
                && self.magic_fpga_trailer(n)? == copper::COPPER_MAGIC_FPGA_TRAILER
                && self.magic_driver_trailer(n)? == copper::COPPER_MAGIC_DRIVER_TRAILER,
        )
    }

    /// Like [`check_copper_magic`](Self::check_copper_magic), but a mismatch is corruption
    pub fn require_copper_magic(&self, n: usize) -> CopperResult<()> {
        if self.check_copper_magic(n)? {
            return Ok(());
        }
        Err(self.corrupted(
            n,
            Corruption::CopperMagic {
                driver_header: self.magic_driver_header(n)?,
                fpga_header: self.magic_fpga_header(n)?,
                fpga_trailer: self.magic_fpga_trailer(n)?,
                driver_trailer: self.magic_driver_trailer(n)?,
            },
        ))
    }

    /// Collect one B2L-FEE header word from every FINESSE slot
    fn fee_header_words(&self, n: usize, pos: usize) -> CopperResult<ChannelWords> {
        let mut words = ChannelWords::default();
        for ch in 0..NUM_FINESSE {
            words.0[ch] = self.fee_header_word(n, ch, pos)?;
        }
        Ok(words)
    }

    /// Event tag shared by all populated FINESSE buffers
    pub fn b2lfee_32bit_event_number(&self, n: usize) -> CopperResult<u32> {
        let tags = self.fee_header_words(n, b2l::POS_TT_TAG)?;
        let mut populated = tags.0.iter().flatten();

        let first = match populated.next() {
            Some(&tag) => tag,
            None => return Err(self.corrupted(n, Corruption::NoFinesseData)),
        };
        if populated.any(|&tag| tag != first) {
            return Err(self.corrupted(n, Corruption::EventTagMismatch { tags }));
        }
        Ok(first)
    }

    /// FEE event tag must agree across channels and with the RawHeader
    pub fn check_event_number_consistency(&self, n: usize) -> CopperResult<u32> {
        let fee = self.b2lfee_32bit_event_number(n)?;
        let header = self.eve_no(n)?;
        if fee != header {
            return Err(self.corrupted(n, Corruption::HeaderEventMismatch { header, fee }));
        }
        Ok(fee)
    }

    /// ctime/trigger-type and utime words must agree across channels
    pub fn check_utime_ctime_trgtype(&self, n: usize) -> CopperResult<()> {
        let ctime_trgtype = self.fee_header_words(n, b2l::POS_TT_CTIME_TYPE)?;
        let utime = self.fee_header_words(n, b2l::POS_TT_UTIME)?;

        let consistent = |words: &ChannelWords| {
            let mut populated = words.0.iter().flatten();
            match populated.next() {
                Some(first) => populated.all(|w| w == first),
                None => true,
            }
        };

        if !consistent(&ctime_trgtype) || !consistent(&utime) {
            return Err(self.corrupted(
                n,
                Corruption::TimeMismatch {
                    ctime_trgtype,
                    utime,
                },
            ));
        }
        Ok(())
    }

    /// HSLB magic pair of FINESSE buffer `ch`; empty slots pass
    pub fn check_b2lhslb_magic(&self, n: usize, ch: usize) -> CopperResult<()> {
        let finesse = self.finesse_buffer(n, ch)?;
        if finesse.is_empty() {
            return Ok(());
        }
        check_b2lhslb_magic(finesse).map_err(|kind| self.corrupted(n, kind))
    }

    /// Recompute the B2L CRC-16 of FINESSE buffer `ch` and compare it with the FEE trailer
    ///
    /// Covers the FEE header and the payload. Empty slots pass.
    pub fn check_crc16(&self, n: usize, ch: usize) -> CopperResult<()> {
        let finesse = self.finesse_buffer(n, ch)?;
        if finesse.is_empty() {
            return Ok(());
        }
        if finesse.len() < b2l::OVERHEAD_NWORDS {
            return Err(self.corrupted(
                n,
                Corruption::FinesseTooSmall {
                    channel: ch,
                    nwords: finesse.len(),
                    minimum: b2l::OVERHEAD_NWORDS,
                },
            ));
        }

        let fee_trailer = finesse.len() - b2l::SIZE_B2LHSLB_TRAILER - b2l::SIZE_B2LFEE_TRAILER;
        let calculated = crc16_words(CRC16_INIT, &finesse[b2l::SIZE_B2LHSLB_HEADER..fee_trailer]);
        let stored = (finesse[fee_trailer + b2l::POS_CHKSUM_B2LFEE] & 0xFFFF) as u16;

        if stored != calculated {
            return Err(self.corrupted(
                n,
                Corruption::Crc16Mismatch {
                    channel: ch,
                    stored,
                    calculated,
                },
            ));
        }
        Ok(())
    }

    /// XOR of the COPPER header through the FPGA trailer
    pub fn calc_driver_checksum(&self, n: usize) -> CopperResult<u32> {
        // Bounds are guaranteed once the magic words are readable.
        self.require_copper_magic(n)?;
        let block = self.block(n)?;
        let end = block.len() - raw_trailer::RAWTRAILER_NWORDS - copper::SIZE_COPPER_DRIVER_TRAILER;
        Ok(xor_checksum(&block[raw_header::RAWHEADER_NWORDS..end]))
    }

    pub fn check_driver_checksum(&self, n: usize) -> CopperResult<()> {
        let calculated = self.calc_driver_checksum(n)?;
        let stored = self.driver_checksum(n)?;
        if stored != calculated {
            return Err(self.corrupted(n, Corruption::DriverChecksum { stored, calculated }));
        }
        Ok(())
    }

    /// XOR of every block word before the RawTrailer
    pub fn calc_block_checksum(&self, n: usize) -> CopperResult<u32> {
        let block = self.block(n)?;
        let end = block.len().saturating_sub(raw_trailer::RAWTRAILER_NWORDS);
        Ok(xor_checksum(&block[..end]))
    }

    pub fn check_block_checksum(&self, n: usize) -> CopperResult<()> {
        let calculated = self.calc_block_checksum(n)?;
        let stored = self.raw_trailer(n)?.chksum;
        if stored != calculated {
            return Err(self.corrupted(n, Corruption::BlockChecksum { stored, calculated }));
        }
        Ok(())
    }

    /// Declared length must match both the FINESSE lengths and the COPPER data length
    pub fn check_block_length(&self, n: usize) -> CopperResult<()> {
        let declared = self.block_nwords(n)?;
        let finesse_total = self
            .finesse_nwords_all(n)?
            .iter()
            .fold(0usize, |acc, &nw| acc.saturating_add(nw));

        let structural = finesse_total.saturating_add(
            raw_header::RAWHEADER_NWORDS
                + copper::SIZE_COPPER_HEADER
                + copper::SIZE_COPPER_TRAILER
                + raw_trailer::RAWTRAILER_NWORDS,
        );
        if declared != structural {
            return Err(self.corrupted(
                n,
                Corruption::LengthMismatch {
                    declared,
                    calculated: structural,
                },
            ));
        }

        let from_copper = (self.copper_data_length(n)? as usize).saturating_add(
            raw_header::RAWHEADER_NWORDS
                + copper::SIZE_COPPER_DRIVER_HEADER
                + copper::SIZE_COPPER_DRIVER_TRAILER
                + raw_trailer::RAWTRAILER_NWORDS,
        );
        if declared != from_copper {
            return Err(self.corrupted(
                n,
                Corruption::LengthMismatch {
                    declared,
                    calculated: from_copper,
                },
            ));
        }
        Ok(())
    }

    /// RawHeader version word must carry the 0x7F7F magic
    pub fn check_header_magic(&self, n: usize) -> CopperResult<()> {
        let header = self.raw_header(n)?;
        if !header.has_magic() {
            return Err(self.corrupted(
                n,
                Corruption::HeaderMagic {
                    word: header.version_hdr_nwords,
                },
            ));
        }
        Ok(())
    }

    pub fn check_term_word(&self, n: usize) -> CopperResult<()> {
        let trailer = self.raw_trailer(n)?;
        if !trailer.has_term_word() {
            return Err(self.corrupted(
                n,
                Corruption::TermWord {
                    word: trailer.term_word,
                },
            ));
        }
        Ok(())
    }

    /// Run every structural check on block `n`; the first failure is returned
    ///
    /// CRC-16 verification of each channel is included when `check_crc` is set.
    pub fn validate_block(&self, n: usize, check_crc: bool) -> CopperResult<()> {
        self.check_header_magic(n)?;
        self.check_term_word(n)?;
        self.check_block_checksum(n)?;
        self.require_copper_magic(n)?;
        self.check_block_length(n)?;
        self.check_driver_checksum(n)?;
        for ch in 0..NUM_FINESSE {
            self.check_b2lhslb_magic(n, ch)?;
        }
        let eve = self.check_event_number_consistency(n)?;
        self.check_utime_ctime_trgtype(n)?;
        if check_crc {
            for ch in 0..NUM_FINESSE {
                self.check_crc16(n, ch)?;
            }
        }
        debug!(block = n, eve = eve, crc = check_crc, "Block validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::packer::{pack_detector_buf, PackerInfo};

    fn info() -> PackerInfo {
        PackerInfo {
            exp_num: 2,
            run_subrun_num: (17 << 8) | 1,
            eve_num: 1000,
            tt_ctime: 0x55_5555,
            tt_utime: 0x6100_0000,
            node_id: 0x0300_0001,
            b2l_ctime: 0x11_2233,
        }
    }

    fn packed(channels: [&[u32]; 4]) -> Vec<u32> {
        pack_detector_buf(channels, &info()).into_words()
    }

    fn fee_pos(raw: &PreRawCopper, ch: usize, pos: usize) -> usize {
        raw.finesse_offset(0, ch).unwrap() + b2l::SIZE_B2LHSLB_HEADER + pos
    }

    #[test]
    fn test_packed_block_validates() {
        let words = packed([&[1, 2, 3], &[4, 5], &[], &[6]]);
        let raw = PreRawCopper::single(&words).unwrap();
        raw.validate_block(0, true).unwrap();
        assert!(raw.check_copper_magic(0).unwrap());
        assert_eq!(raw.b2lfee_32bit_event_number(0).unwrap(), 1000);
    }

    #[test]
    fn test_magic_flip_is_not_fatal_in_check() {
        let mut words = packed([&[1, 2, 3], &[], &[], &[]]);
        words[raw_header::RAWHEADER_NWORDS + copper::POS_MAGIC_COPPER_2] ^= 1;
        let raw = PreRawCopper::single(&words).unwrap();
        assert!(!raw.check_copper_magic(0).unwrap());

        let err = raw.require_copper_magic(0).unwrap_err();
        assert!(matches!(
            err.corruption(),
            Some(Corruption::CopperMagic {
                fpga_header: 0xFFFF_FAFB,
                ..
            })
        ));
        assert!(raw.finesse_nwords(0, 0).is_err());
    }

    #[test]
    fn test_b2lhslb_magic_free_function() {
        assert!(check_b2lhslb_magic(&[0xFFAA_0001, 0, 0xFF55_0000]).is_ok());
        assert_eq!(
            check_b2lhslb_magic(&[0xFFAB_0001, 0, 0xFF55_0000]),
            Err(Corruption::B2lHslbMagic {
                header: 0xFFAB_0001,
                trailer: 0xFF55_0000
            })
        );
        assert!(check_b2lhslb_magic(&[]).is_err());
    }

    #[test]
    fn test_event_tag_conflict_reports_both_values() {
        let mut words = packed([&[1], &[2], &[], &[]]);
        let raw = PreRawCopper::single(&words).unwrap();
        let pos = fee_pos(&raw, 1, b2l::POS_TT_TAG);
        words[pos] = 1001;

        let raw = PreRawCopper::single(&words).unwrap();
        let err = raw.b2lfee_32bit_event_number(0).unwrap_err();
        match err.corruption() {
            Some(Corruption::EventTagMismatch { tags }) => {
                assert_eq!(tags.0, [Some(1000), Some(1001), None, None]);
            }
            other => panic!("unexpected corruption: {:?}", other),
        }
        assert!(err.dump().is_some_and(|d| d.len() == words.len()));
    }

    #[test]
    fn test_header_event_mismatch() {
        let mut words = packed([&[1], &[], &[], &[]]);
        words[raw_header::POS_EVE_NO] = 999;
        let raw = PreRawCopper::single(&words).unwrap();
        assert!(matches!(
            raw.check_event_number_consistency(0).unwrap_err().corruption(),
            Some(Corruption::HeaderEventMismatch {
                header: 999,
                fee: 1000
            })
        ));
    }

    #[test]
    fn test_time_mismatch() {
        let mut words = packed([&[], &[1], &[2], &[]]);
        let raw = PreRawCopper::single(&words).unwrap();
        let pos = fee_pos(&raw, 2, b2l::POS_TT_UTIME);
        words[pos] += 1;

        let raw = PreRawCopper::single(&words).unwrap();
        assert!(matches!(
            raw.check_utime_ctime_trgtype(0).unwrap_err().corruption(),
            Some(Corruption::TimeMismatch { .. })
        ));
    }

    #[test]
    fn test_crc16_detects_payload_change() {
        let mut words = packed([&[0xAA, 0xBB], &[], &[], &[]]);
        let raw = PreRawCopper::single(&words).unwrap();
        raw.check_crc16(0, 0).unwrap();
        let pos = fee_pos(&raw, 0, b2l::SIZE_B2LFEE_HEADER);
        words[pos] = 0xAC;

        let raw = PreRawCopper::single(&words).unwrap();
        assert!(matches!(
            raw.check_crc16(0, 0).unwrap_err().corruption(),
            Some(Corruption::Crc16Mismatch { channel: 0, .. })
        ));
    }

    #[test]
    fn test_checksums_detect_single_word_flip() {
        let mut words = packed([&[7, 8, 9], &[], &[], &[]]);
        let raw = PreRawCopper::single(&words).unwrap();
        let pos = raw.finesse_offset(0, 0).unwrap() + 7;
        words[pos] ^= 0x0100_0000;

        let raw = PreRawCopper::single(&words).unwrap();
        assert!(matches!(
            raw.check_block_checksum(0).unwrap_err().corruption(),
            Some(Corruption::BlockChecksum { .. })
        ));
        assert!(matches!(
            raw.check_driver_checksum(0).unwrap_err().corruption(),
            Some(Corruption::DriverChecksum { .. })
        ));
    }

    #[test]
    fn test_block_length_mismatch() {
        let mut words = packed([&[1, 2], &[], &[], &[]]);
        words[raw_header::RAWHEADER_NWORDS + copper::POS_DATA_LENGTH] += 1;
        let raw = PreRawCopper::single(&words).unwrap();
        assert!(matches!(
            raw.check_block_length(0).unwrap_err().corruption(),
            Some(Corruption::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_header_magic_and_term_word() {
        let mut words = packed([&[1], &[], &[], &[]]);
        let last = words.len() - 1;
        words[last] = 0;
        words[raw_header::POS_VERSION_HDRNWORDS] = 0x1234_810C;
        let raw = PreRawCopper::single(&words).unwrap();
        assert!(matches!(
            raw.check_header_magic(0).unwrap_err().corruption(),
            Some(Corruption::HeaderMagic { word: 0x1234_810C })
        ));
        assert!(matches!(
            raw.check_term_word(0).unwrap_err().corruption(),
            Some(Corruption::TermWord { word: 0 })
        ));
    }

    #[test]
    fn test_no_finesse_data() {
        let words = packed([&[], &[], &[], &[]]);
        let raw = PreRawCopper::single(&words).unwrap();
        assert!(matches!(
            raw.b2lfee_32bit_event_number(0).unwrap_err().corruption(),
            Some(Corruption::NoFinesseData)
        ));
        raw.check_utime_ctime_trgtype(0).unwrap();
    }
}

//! Synthesis of checksum-valid pre-format COPPER blocks
//!
//! [`pack_detector_buf`] wraps up to four detector payloads in the full
//! RawHeader / COPPER / B2L framing. The resulting block passes every
//! check in the validator, including the per-channel CRC-16.

use tracing::debug;

use super::checksum::{crc16_words, xor_checksum, CRC16_INIT};
use super::layout::{
    b2l, copper, ctime_word, exp_run_word, raw_header, raw_trailer, version_word, NUM_FINESSE,
};

/// Metadata stamped into a packed block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackerInfo {
    pub exp_num: u32,
    /// Run number << 8 | subrun number
    pub run_subrun_num: u32,
    pub eve_num: u32,
    pub tt_ctime: u32,
    pub tt_utime: u32,
    pub node_id: u32,
    pub b2l_ctime: u32,
}

/// An owned, fully stamped data block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBlock {
    words: Vec<u32>,
}

impl PackedBlock {
    pub fn as_slice(&self) -> &[u32] {
        &self.words
    }

    pub fn nwords(&self) -> usize {
        self.words.len()
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }
}

impl AsRef<[u32]> for PackedBlock {
    fn as_ref(&self) -> &[u32] {
        &self.words
    }
}

/// FINESSE buffer length for a payload of `nwords` (0 stays 0)
fn finesse_nwords(nwords: usize) -> usize {
    if nwords == 0 {
        0
    } else {
        nwords + b2l::OVERHEAD_NWORDS
    }
}

/// Build a pre-format block from up to four detector payloads
///
/// An empty slice leaves its FINESSE slot unused.
pub fn pack_detector_buf(detector: [&[u32]; NUM_FINESSE], info: &PackerInfo) -> PackedBlock {
    let finesse: [usize; NUM_FINESSE] = detector.map(|buf| finesse_nwords(buf.len()));
    let finesse_total: usize = finesse.iter().sum();

    let length_nwords = raw_header::RAWHEADER_NWORDS
        + copper::SIZE_COPPER_HEADER
        + finesse_total
        + copper::SIZE_COPPER_TRAILER
        + raw_trailer::RAWTRAILER_NWORDS;

    let mut buf = vec![0u32; length_nwords];
    let exp_run = exp_run_word(info.exp_num, info.run_subrun_num);
    let tt_ctime = ctime_word(info.tt_ctime);

    // RawHeader
    buf[raw_header::POS_NWORDS] = length_nwords as u32;
    buf[raw_header::POS_VERSION_HDRNWORDS] = version_word(true);
    buf[raw_header::POS_EXP_RUN_NO] = exp_run;
    buf[raw_header::POS_EVE_NO] = info.eve_num;
    buf[raw_header::POS_TTCTIME_TRGTYPE] = tt_ctime;
    buf[raw_header::POS_TTUTIME] = info.tt_utime;
    buf[raw_header::POS_NODE_ID] = info.node_id;

    let mut offset = raw_header::RAWHEADER_NWORDS + copper::SIZE_COPPER_HEADER;
    for (ch, &nwords) in finesse.iter().enumerate() {
        buf[raw_header::POS_OFFSET_FINESSE[ch]] = offset as u32;
        offset += nwords;
    }

    // COPPER header
    let mut pos = raw_header::RAWHEADER_NWORDS;
    buf[pos + copper::POS_MAGIC_COPPER_1] = copper::COPPER_MAGIC_DRIVER_HEADER;
    buf[pos + copper::POS_MAGIC_COPPER_2] = copper::COPPER_MAGIC_FPGA_HEADER;
    buf[pos + copper::POS_EVE_NUM_COPPER] = info.eve_num;
    for (ch, &nwords) in finesse.iter().enumerate() {
        buf[pos + copper::POS_CH_DATA_LENGTH[ch]] = nwords as u32;
    }
    buf[pos + copper::POS_DATA_LENGTH] = (finesse_total
        + (copper::SIZE_COPPER_HEADER - copper::SIZE_COPPER_DRIVER_HEADER)
        + (copper::SIZE_COPPER_TRAILER - copper::SIZE_COPPER_DRIVER_TRAILER))
        as u32;
    pos += copper::SIZE_COPPER_HEADER;

    // FINESSE buffers
    for payload in detector.iter().filter(|buf| !buf.is_empty()) {
        buf[pos + b2l::POS_MAGIC_B2LHSLB] = b2l::B2LHSLB_HEADER_MAGIC | (info.eve_num & 0xFFFF);
        pos += b2l::SIZE_B2LHSLB_HEADER;
        let crc_start = pos;

        buf[pos + b2l::POS_TT_CTIME_TYPE] = tt_ctime;
        buf[pos + b2l::POS_TT_TAG] = info.eve_num;
        buf[pos + b2l::POS_TT_UTIME] = info.tt_utime;
        buf[pos + b2l::POS_EXP_RUN] = exp_run;
        buf[pos + b2l::POS_B2L_CTIME] = ctime_word(info.b2l_ctime);
        pos += b2l::SIZE_B2LFEE_HEADER;

        buf[pos..pos + payload.len()].copy_from_slice(payload);
        pos += payload.len();

        let crc16 = crc16_words(CRC16_INIT, &buf[crc_start..pos]);
        buf[pos + b2l::POS_CHKSUM_B2LFEE] = ((info.eve_num & 0xFFFF) << 16) | crc16 as u32;
        pos += b2l::SIZE_B2LFEE_TRAILER;

        buf[pos + b2l::POS_CHKSUM_B2LHSLB] = b2l::B2LHSLB_TRAILER_MAGIC;
        pos += b2l::SIZE_B2LHSLB_TRAILER;
    }

    // COPPER trailer
    buf[pos + copper::POS_MAGIC_COPPER_3] = copper::COPPER_MAGIC_FPGA_TRAILER;
    buf[pos + copper::POS_MAGIC_COPPER_4] = copper::COPPER_MAGIC_DRIVER_TRAILER;
    buf[pos + copper::POS_CHKSUM_COPPER] =
        xor_checksum(&buf[raw_header::RAWHEADER_NWORDS..pos + copper::POS_CHKSUM_COPPER]);
    pos += copper::SIZE_COPPER_TRAILER;

    // RawTrailer
    buf[pos + raw_trailer::POS_CHKSUM] = xor_checksum(&buf[..pos]);
    buf[pos + raw_trailer::POS_TERM_WORD] = raw_trailer::MAGIC_WORD_TERM_TRAILER;

    debug!(
        eve = info.eve_num,
        nwords = length_nwords,
        finesse = ?finesse,
        "Packed COPPER block"
    );

    PackedBlock { words: buf }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::navigator::PreRawCopper;

    fn scenario_info() -> PackerInfo {
        PackerInfo {
            exp_num: 1,
            run_subrun_num: 5 << 8,
            eve_num: 42,
            tt_ctime: 0,
            tt_utime: 0,
            node_id: 0x1234,
            b2l_ctime: 0,
        }
    }

    #[test]
    fn test_single_channel_block_layout() {
        let block = pack_detector_buf([&[0xAA, 0xBB, 0xCC], &[], &[], &[]], &scenario_info());
        let words = block.as_slice();

        assert_eq!(block.nwords(), 41);
        assert_eq!(words[raw_header::POS_NWORDS], 41);
        assert_eq!(words[raw_header::POS_VERSION_HDRNWORDS], 0x7F7F_810C);
        assert_eq!(words[raw_header::POS_EXP_RUN_NO], (1 << 22) | (5 << 8));
        assert_eq!(words[raw_header::POS_EVE_NO], 42);
        assert_eq!(words[raw_header::POS_NODE_ID], 0x1234);
        assert_eq!(words[raw_header::POS_OFFSET_1ST_FINESSE], 25);
        assert_eq!(words[raw_header::POS_OFFSET_2ND_FINESSE], 36);
        assert_eq!(words[raw_header::POS_OFFSET_4TH_FINESSE], 36);
        assert_eq!(words[25], 0xFFAA_002A);
        assert_eq!(words[34] >> 16, 42);
        assert_eq!(words[35], 0xFF55_0000);
        assert_eq!(words[40], raw_trailer::MAGIC_WORD_TERM_TRAILER);
    }

    #[test]
    fn test_copper_data_length() {
        let block = pack_detector_buf([&[1; 4], &[], &[2; 2], &[]], &scenario_info());
        let words = block.as_slice();
        let hdr = raw_header::RAWHEADER_NWORDS;
        assert_eq!(words[hdr + copper::POS_CH_A_DATA_LENGTH], 12);
        assert_eq!(words[hdr + copper::POS_CH_B_DATA_LENGTH], 0);
        assert_eq!(words[hdr + copper::POS_CH_C_DATA_LENGTH], 10);
        assert_eq!(words[hdr + copper::POS_DATA_LENGTH], 12 + 10 + 6 + 1);
    }

    #[test]
    fn test_empty_block_is_minimal() {
        let block = pack_detector_buf([&[], &[], &[], &[]], &scenario_info());
        assert_eq!(block.nwords(), crate::format::layout::MIN_COPPER_BLOCK_NWORDS);
        let raw = PreRawCopper::single(block.as_slice()).unwrap();
        raw.check_block_checksum(0).unwrap();
        raw.check_driver_checksum(0).unwrap();
    }

    #[test]
    fn test_ctime_fields_masked() {
        let info = PackerInfo {
            tt_ctime: 0xFFFF_FFFF,
            b2l_ctime: 0x0800_0003,
            ..scenario_info()
        };
        let block = pack_detector_buf([&[9], &[], &[], &[]], &info);
        let raw = PreRawCopper::single(block.as_slice()).unwrap();
        assert_eq!(raw.tt_ctime(0).unwrap(), 0x07FF_FFFF);
        assert_eq!(
            raw.fee_header_word(0, 0, b2l::POS_B2L_CTIME).unwrap(),
            Some(0x30)
        );
    }

    #[test]
    fn test_into_words() {
        let block = pack_detector_buf([&[], &[], &[], &[5]], &scenario_info());
        let n = block.nwords();
        let words = block.into_words();
        assert_eq!(words.len(), n);
    }
}

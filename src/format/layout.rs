//! Word layout of a COPPER data block (pre-format, version 1)
//!
//! Block structure:
//! ```text
//! ┌──────────────────────────────┐
//! │ RawHeader            12 words│
//! ├──────────────────────────────┤
//! │ COPPER header        13 words│  driver header (7) + FPGA header (6)
//! ├──────────────────────────────┤
//! │ FINESSE A..D     (variable)  │  HSLB hdr, FEE hdr, payload, FEE trl, HSLB trl
//! ├──────────────────────────────┤
//! │ COPPER trailer        3 words│  FPGA trailer (1) + driver trailer (2)
//! ├──────────────────────────────┤
//! │ RawTrailer            2 words│  XOR checksum, terminal word
//! └──────────────────────────────┘
//! ```
//!
//! All words are little-endian `u32`.


/// Format version written into the RawHeader
pub const DATA_FORMAT_VERSION: u32 = 1;

/// Number of FINESSE slots on one COPPER board
pub const NUM_FINESSE: usize = 4;

/// RawHeader word positions and bit fields
pub mod raw_header {
    pub const POS_NWORDS: usize = 0;
    pub const POS_VERSION_HDRNWORDS: usize = 1;
    pub const POS_EXP_RUN_NO: usize = 2;
    pub const POS_EVE_NO: usize = 3;
    pub const POS_TTCTIME_TRGTYPE: usize = 4;
    pub const POS_TTUTIME: usize = 5;
    pub const POS_NODE_ID: usize = 6;
    pub const POS_TRUNC_MASK_DATATYPE: usize = 7;
    pub const POS_OFFSET_1ST_FINESSE: usize = 8;
    pub const POS_OFFSET_2ND_FINESSE: usize = 9;
    pub const POS_OFFSET_3RD_FINESSE: usize = 10;
    pub const POS_OFFSET_4TH_FINESSE: usize = 11;
    pub const RAWHEADER_NWORDS: usize = 12;

    pub const POS_OFFSET_FINESSE: [usize; 4] = [
        POS_OFFSET_1ST_FINESSE,
        POS_OFFSET_2ND_FINESSE,
        POS_OFFSET_3RD_FINESSE,
        POS_OFFSET_4TH_FINESSE,
    ];

    // Version/header-length word
    pub const MAGIC_WORD: u32 = 0x7F7F_0000;
    pub const MAGIC_MASK: u32 = 0xFFFF_0000;
    pub const FORMAT_VERSION_SHIFT: u32 = 8;
    pub const FORMAT_VERSION_MASK: u32 = 0x0000_FF00;
    pub const HDR_NWORDS_MASK: u32 = 0x0000_00FF;
    /// Set while the block still carries the full B2L/COPPER framing
    pub const PRE_FORMAT_BIT: u32 = 0x0000_8000;

    // Exp/run word
    pub const EXP_SHIFT: u32 = 22;
    pub const EXP_MASK: u32 = 0x3FF;
    pub const RUN_SHIFT: u32 = 8;
    pub const RUN_MASK: u32 = 0x3FFF;
    pub const SUBRUN_MASK: u32 = 0xFF;
    pub const RUN_SUBRUN_MASK: u32 = 0x003F_FFFF;

    // ctime/trigger-type word
    pub const CTIME_SHIFT: u32 = 4;
    pub const CTIME_MASK: u32 = 0x07FF_FFFF;
    pub const TRGTYPE_MASK: u32 = 0xF;

    pub const TRUNC_MASK_SHIFT: u32 = 31;
    pub const DATATYPE_MASK: u32 = 0x7FFF_FFFF;
}

/// RawTrailer word positions
pub mod raw_trailer {
    pub const POS_CHKSUM: usize = 0;
    pub const POS_TERM_WORD: usize = 1;
    pub const RAWTRAILER_NWORDS: usize = 2;

    pub const MAGIC_WORD_TERM_TRAILER: u32 = 0x7FFF_0006;
}

/// COPPER driver/FPGA header and trailer
pub mod copper {
    // Header
    pub const POS_MAGIC_COPPER_1: usize = 0;
    pub const POS_EVE_NUM_COPPER: usize = 1;
    pub const POS_SUBSYSTEM_ID: usize = 2;
    pub const POS_CRATE_ID: usize = 3;
    pub const POS_SLOT_ID: usize = 4;
    pub const POS_MAGIC_COPPER_2: usize = 7;
    pub const POS_DATA_LENGTH: usize = 8;
    pub const POS_CH_A_DATA_LENGTH: usize = 9;
    pub const POS_CH_B_DATA_LENGTH: usize = 10;
    pub const POS_CH_C_DATA_LENGTH: usize = 11;
    pub const POS_CH_D_DATA_LENGTH: usize = 12;
    pub const SIZE_COPPER_HEADER: usize = 13;

    pub const POS_CH_DATA_LENGTH: [usize; 4] = [
        POS_CH_A_DATA_LENGTH,
        POS_CH_B_DATA_LENGTH,
        POS_CH_C_DATA_LENGTH,
        POS_CH_D_DATA_LENGTH,
    ];

    // Trailer
    pub const POS_MAGIC_COPPER_3: usize = 0;
    pub const POS_CHKSUM_COPPER: usize = 1;
    pub const POS_MAGIC_COPPER_4: usize = 2;
    pub const SIZE_COPPER_TRAILER: usize = 3;

    pub const SIZE_COPPER_DRIVER_HEADER: usize = 7;
    pub const SIZE_COPPER_DRIVER_TRAILER: usize = 2;

    pub const COPPER_MAGIC_DRIVER_HEADER: u32 = 0x7FFF_0008;
    pub const COPPER_MAGIC_FPGA_HEADER: u32 = 0xFFFF_FAFA;
    pub const COPPER_MAGIC_FPGA_TRAILER: u32 = 0xFFFF_F5F5;
    pub const COPPER_MAGIC_DRIVER_TRAILER: u32 = 0x7FFF_0009;
}

/// Belle2Link framing inside a pre-format FINESSE buffer
pub mod b2l {
    // HSLB header
    pub const POS_MAGIC_B2LHSLB: usize = 0;
    pub const SIZE_B2LHSLB_HEADER: usize = 1;

    // FEE header
    pub const POS_TT_CTIME_TYPE: usize = 0;
    pub const POS_TT_TAG: usize = 1;
    pub const POS_TT_UTIME: usize = 2;
    pub const POS_EXP_RUN: usize = 3;
    pub const POS_B2L_CTIME: usize = 4;
    pub const SIZE_B2LFEE_HEADER: usize = 5;

    // FEE trailer
    pub const POS_CHKSUM_B2LFEE: usize = 0;
    pub const SIZE_B2LFEE_TRAILER: usize = 1;

    // HSLB trailer
    pub const POS_CHKSUM_B2LHSLB: usize = 0;
    pub const SIZE_B2LHSLB_TRAILER: usize = 1;

    pub const B2LHSLB_HEADER_MAGIC: u32 = 0xFFAA_0000;
    pub const B2LHSLB_TRAILER_MAGIC: u32 = 0xFF55_0000;
    pub const B2LHSLB_MAGIC_MASK: u32 = 0xFFFF_0000;

    /// Framing words around the detector payload of one FINESSE buffer
    pub const OVERHEAD_NWORDS: usize =
        SIZE_B2LHSLB_HEADER + SIZE_B2LFEE_HEADER + SIZE_B2LFEE_TRAILER + SIZE_B2LHSLB_TRAILER;
}

/// Belle2Link framing after reduction
pub mod reduced {
    pub const SIZE_B2LHSLB_HEADER: usize = 1;
    pub const SIZE_B2LFEE_HEADER: usize = 1;
    pub const SIZE_B2LFEE_TRAILER: usize = 1;
    pub const SIZE_B2LHSLB_TRAILER: usize = 0;

    pub const OVERHEAD_NWORDS: usize =
        SIZE_B2LHSLB_HEADER + SIZE_B2LFEE_HEADER + SIZE_B2LFEE_TRAILER + SIZE_B2LHSLB_TRAILER;

    /// Words removed from each populated FINESSE buffer by reduction
    pub const REDUCTION_NWORDS: usize = super::b2l::OVERHEAD_NWORDS - OVERHEAD_NWORDS;
}

/// Node IDs of synchronization blocks that carry no FINESSE structure
pub mod node {
    /// "TTD" + board number
    pub const FTSW_ID: u32 = 0x5454_4400;
    pub const FTSW_ID_MASK: u32 = 0xFFFF_FF00;
    /// "TLU0"
    pub const TLU_ID: u32 = 0x544C_5530;
}

/// Smallest pre-format COPPER block (no FINESSE data)
pub const MIN_COPPER_BLOCK_NWORDS: usize = raw_header::RAWHEADER_NWORDS
    + copper::SIZE_COPPER_HEADER
    + copper::SIZE_COPPER_TRAILER
    + raw_trailer::RAWTRAILER_NWORDS;

/// Parsed RawHeader of one data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub nwords: u32,
    pub version_hdr_nwords: u32,
    pub exp_run: u32,
    pub eve_no: u32,
    pub ttctime_trgtype: u32,
    pub ttutime: u32,
    pub node_id: u32,
    pub trunc_mask_datatype: u32,
    pub finesse_offsets: [u32; NUM_FINESSE],
}

impl RawHeader {
    /// Parse from the first words of a block
    pub fn from_words(words: &[u32]) -> Option<Self> {
        use raw_header::*;

        if words.len() < RAWHEADER_NWORDS {
            return None;
        }

        Some(Self {
            nwords: words[POS_NWORDS],
            version_hdr_nwords: words[POS_VERSION_HDRNWORDS],
            exp_run: words[POS_EXP_RUN_NO],
            eve_no: words[POS_EVE_NO],
            ttctime_trgtype: words[POS_TTCTIME_TRGTYPE],
            ttutime: words[POS_TTUTIME],
            node_id: words[POS_NODE_ID],
            trunc_mask_datatype: words[POS_TRUNC_MASK_DATATYPE],
            finesse_offsets: POS_OFFSET_FINESSE.map(|pos| words[pos]),
        })
    }

    pub fn exp_no(&self) -> u32 {
        (self.exp_run >> raw_header::EXP_SHIFT) & raw_header::EXP_MASK
    }

    pub fn run_no(&self) -> u32 {
        (self.exp_run >> raw_header::RUN_SHIFT) & raw_header::RUN_MASK
    }

    pub fn subrun_no(&self) -> u32 {
        self.exp_run & raw_header::SUBRUN_MASK
    }

    /// Combined run/subrun number (lower 22 bits of the exp/run word)
    pub fn run_subrun_no(&self) -> u32 {
        self.exp_run & raw_header::RUN_SUBRUN_MASK
    }

    pub fn tt_ctime(&self) -> u32 {
        (self.ttctime_trgtype >> raw_header::CTIME_SHIFT) & raw_header::CTIME_MASK
    }

    pub fn trg_type(&self) -> u32 {
        self.ttctime_trgtype & raw_header::TRGTYPE_MASK
    }

    pub fn header_nwords(&self) -> u32 {
        self.version_hdr_nwords & raw_header::HDR_NWORDS_MASK
    }

    /// Format version without the pre-format flag
    pub fn format_version(&self) -> u32 {
        ((self.version_hdr_nwords & raw_header::FORMAT_VERSION_MASK)
            >> raw_header::FORMAT_VERSION_SHIFT)
            & 0x7F
    }

    pub fn is_pre_format(&self) -> bool {
        self.version_hdr_nwords & raw_header::PRE_FORMAT_BIT != 0
    }

    pub fn has_magic(&self) -> bool {
        self.version_hdr_nwords & raw_header::MAGIC_MASK == raw_header::MAGIC_WORD
    }

    pub fn is_truncated(&self) -> bool {
        (self.trunc_mask_datatype >> raw_header::TRUNC_MASK_SHIFT) != 0
    }

    pub fn data_type(&self) -> u32 {
        self.trunc_mask_datatype & raw_header::DATATYPE_MASK
    }

    pub fn is_ftsw(&self) -> bool {
        self.node_id & node::FTSW_ID_MASK == node::FTSW_ID
    }

    pub fn is_tlu(&self) -> bool {
        self.node_id == node::TLU_ID
    }
}

/// Parsed RawTrailer of one data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTrailer {
    pub chksum: u32,
    pub term_word: u32,
}

impl RawTrailer {
    /// Parse from the last words of a block
    pub fn from_block(block: &[u32]) -> Option<Self> {
        let start = block.len().checked_sub(raw_trailer::RAWTRAILER_NWORDS)?;
        let trl = &block[start..];
        Some(Self {
            chksum: trl[raw_trailer::POS_CHKSUM],
            term_word: trl[raw_trailer::POS_TERM_WORD],
        })
    }

    pub fn has_term_word(&self) -> bool {
        self.term_word == raw_trailer::MAGIC_WORD_TERM_TRAILER
    }
}

/// Compose the RawHeader version word
pub fn version_word(pre_format: bool) -> u32 {
    let mut word = raw_header::MAGIC_WORD
        | ((DATA_FORMAT_VERSION << raw_header::FORMAT_VERSION_SHIFT)
            & raw_header::FORMAT_VERSION_MASK)
        | raw_header::RAWHEADER_NWORDS as u32;
    if pre_format {
        word |= raw_header::PRE_FORMAT_BIT;
    }
    word
}

/// Compose the exp/run word
pub fn exp_run_word(exp_num: u32, run_subrun_num: u32) -> u32 {
    (exp_num << raw_header::EXP_SHIFT) | (run_subrun_num & raw_header::RUN_SUBRUN_MASK)
}

/// Compose a ctime word (27-bit ctime shifted above the 4-bit type field)
pub fn ctime_word(ctime: u32) -> u32 {
    (ctime & raw_header::CTIME_MASK) << raw_header::CTIME_SHIFT
}

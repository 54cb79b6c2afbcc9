//! copper_tool - inspection and conversion tool for COPPER raw-data files
//!
//! Usage:
//!   copper_tool info <file> [--json]            - One summary line per block
//!   copper_tool validate <file> [--crc]         - Run all integrity checks
//!   copper_tool reduce <file> [--output <path>] - Write the reduced format
//!   copper_tool generate --output <path>        - Write synthesized blocks
//!   copper_tool dump <file> --block <n>         - Hex dump of one block

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use copper_raw::common::{Cli, Commands, CommonArgs};
use copper_raw::config::{Config, DumpSettings};
use copper_raw::format::dump::format_words;
use copper_raw::format::{PostRawCopper, PreRawCopper, RawHeader, Reducer, NUM_FINESSE};
use copper_raw::generator::BlockGenerator;
use copper_raw::rawfile::{RawFileReader, RawFileWriter};
use copper_raw::CopperError;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("copper_raw=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.common)?;

    match cli.command {
        Commands::Info { file, json } => show_info(&file, json),
        Commands::Validate { file, crc } => validate_file(&file, crc, &config.dump),
        Commands::Reduce { file, output } => reduce_file(&file, output, &config),
        Commands::Generate {
            output,
            events,
            seed,
        } => generate_file(&output, events, seed, &config),
        Commands::Dump { file, block } => dump_block(&file, block, &config.dump),
    }
}

fn load_config(common: &CommonArgs) -> Result<Config> {
    match &common.config_file {
        Some(path) => {
            let config = Config::load(path).with_context(|| format!("loading {}", path))?;
            info!(path = %path, "Loaded configuration");
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Kind of block, judged from the RawHeader
fn block_kind(header: &RawHeader) -> &'static str {
    if header.is_ftsw() {
        "ftsw"
    } else if header.is_tlu() {
        "tlu"
    } else if header.is_pre_format() {
        "copper"
    } else {
        "reduced"
    }
}

fn format_utime(utime: u32) -> String {
    chrono::DateTime::from_timestamp(utime as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// FINESSE lengths of a single-block buffer, `None` for synchronization blocks
fn finesse_lengths(words: &[u32], header: &RawHeader) -> Result<Option<[usize; NUM_FINESSE]>> {
    if header.is_ftsw() || header.is_tlu() {
        return Ok(None);
    }
    let mut lengths = [0usize; NUM_FINESSE];
    if header.is_pre_format() {
        let raw = PreRawCopper::single(words)?;
        lengths = raw.finesse_nwords_all(0)?;
    } else {
        let post = PostRawCopper::single(words)?;
        for (ch, len) in lengths.iter_mut().enumerate() {
            *len = post.finesse_nwords(0, ch)?;
        }
    }
    Ok(Some(lengths))
}

#[derive(Serialize)]
struct BlockSummary {
    block: usize,
    kind: &'static str,
    nwords: u32,
    exp: u32,
    run: u32,
    subrun: u32,
    eve: u32,
    node_id: String,
    trg_type: u32,
    ctime: u32,
    utime: u32,
    time: String,
    finesse_nwords: Option<[usize; NUM_FINESSE]>,
}

fn show_info(path: &Path, json: bool) -> Result<()> {
    let reader = RawFileReader::open(path)?;
    if !json {
        println!("File: {}", path.display());
        println!();
    }

    let mut count = 0usize;
    for (n, block) in reader.enumerate() {
        let words = block?;
        let raw = PreRawCopper::single(&words)?;
        let header = raw.raw_header(0)?;

        let summary = BlockSummary {
            block: n,
            kind: block_kind(&header),
            nwords: header.nwords,
            exp: header.exp_no(),
            run: header.run_no(),
            subrun: header.subrun_no(),
            eve: header.eve_no,
            node_id: format!("0x{:08x}", header.node_id),
            trg_type: header.trg_type(),
            ctime: header.tt_ctime(),
            utime: header.ttutime,
            time: format_utime(header.ttutime),
            finesse_nwords: finesse_lengths(&words, &header)?,
        };

        if json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            let finesse = match summary.finesse_nwords {
                Some(lens) => format!("{:?}", lens),
                None => "-".to_string(),
            };
            println!(
                "#{:<6} {:<8} nwords {:>6}  exp {:>4} run {:>5}.{:<3} eve {:>10}  node {}  {}  finesse {}",
                summary.block,
                summary.kind,
                summary.nwords,
                summary.exp,
                summary.run,
                summary.subrun,
                summary.eve,
                summary.node_id,
                summary.time,
                finesse
            );
        }
        count += 1;
    }

    if !json {
        println!();
        println!("Blocks: {}", count);
    }
    Ok(())
}

/// Run every check that applies to the block's format
fn check_block(words: &[u32], crc: bool) -> std::result::Result<(), CopperError> {
    let raw = PreRawCopper::single(words)?;
    let header = raw.raw_header(0)?;

    if header.is_ftsw() || header.is_tlu() {
        raw.check_header_magic(0)?;
        raw.check_term_word(0)?;
        raw.check_block_checksum(0)
    } else if header.is_pre_format() {
        raw.validate_block(0, crc)
    } else {
        raw.check_header_magic(0)?;
        raw.check_term_word(0)?;
        let post = PostRawCopper::single(words)?;
        post.check_block_checksum(0)?;
        if crc {
            for ch in 0..NUM_FINESSE {
                post.check_crc16(0, ch)?;
            }
        }
        Ok(())
    }
}

fn print_corruption(err: &CopperError, dump: &DumpSettings) {
    eprintln!("\x1b[31m✗ {}\x1b[0m", err);
    if let Some(block_dump) = err.dump() {
        eprintln!(
            "{}",
            block_dump.render(dump.words_per_line, dump.word_limit())
        );
    }
}

fn validate_file(path: &Path, crc: bool, dump: &DumpSettings) -> Result<()> {
    println!("Validating: {}", path.display());

    let mut valid = 0usize;
    for (n, block) in RawFileReader::open(path)?.enumerate() {
        let result = block.and_then(|words| check_block(&words, crc));
        if let Err(e) = result {
            print_corruption(&e, dump);
            bail!("block {} of {} failed validation", n, path.display());
        }
        valid += 1;
    }

    println!("\x1b[32m✓ {} blocks valid\x1b[0m", valid);
    Ok(())
}

fn reduce_file(path: &Path, output: Option<PathBuf>, config: &Config) -> Result<()> {
    let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.reduced", path.display())));
    let reducer = Reducer::new(config.reducer_config());
    let mut writer = RawFileWriter::create(&output)?;

    let mut words_in = 0usize;
    for (n, block) in RawFileReader::open(path)?.enumerate() {
        let words = block?;
        words_in += words.len();
        let reduced = match reducer.copy_reduced_data(&words, 1, 1) {
            Ok(reduced) => reduced,
            Err(e) => {
                print_corruption(&e, &config.dump);
                bail!("block {} of {} could not be reduced", n, path.display());
            }
        };
        writer.write_block(&reduced)?;
    }

    let blocks = writer.blocks_written();
    let words_out = writer.words_written();
    writer.flush()?;

    info!(
        input = %path.display(),
        output = %output.display(),
        blocks = blocks,
        words_in = words_in,
        words_out = words_out,
        "Reduction complete"
    );
    println!(
        "Reduced {} blocks: {} -> {} words ({})",
        blocks,
        words_in,
        words_out,
        output.display()
    );
    Ok(())
}

fn generate_file(output: &Path, events: usize, seed: Option<u64>, config: &Config) -> Result<()> {
    let mut settings = config.generator.clone();
    if let Some(seed) = seed {
        settings.seed = seed;
    }

    let generator = BlockGenerator::new(settings)?;
    let mut writer = RawFileWriter::create(output)?;
    for block in generator.take(events) {
        writer.write_block(block.as_slice())?;
    }
    let words = writer.words_written();
    writer.flush()?;

    println!(
        "Generated {} events ({} words) into {}",
        events,
        words,
        output.display()
    );
    Ok(())
}

fn dump_block(path: &Path, index: usize, dump: &DumpSettings) -> Result<()> {
    let mut reader = RawFileReader::open(path)?;
    let mut found = None;
    for n in 0..=index {
        match reader.read_block()? {
            Some(words) if n == index => found = Some(words),
            Some(_) => {}
            None => break,
        }
    }
    let words = match found {
        Some(words) => words,
        None => bail!(
            "{} holds only {} blocks",
            path.display(),
            reader.blocks_read()
        ),
    };

    let raw = PreRawCopper::single(&words)?;
    let header = raw.raw_header(0)?;
    println!(
        "Block {}: {} words, {} eve {} node 0x{:08x} ({})",
        index,
        header.nwords,
        block_kind(&header),
        header.eve_no,
        header.node_id,
        format_utime(header.ttutime)
    );
    print!(
        "{}",
        format_words(&words, 0, dump.words_per_line, dump.word_limit())
    );
    Ok(())
}

// SPDX-License-Identifier: MIT
use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use rac::{
    config::DEFAULT_NODE_CAPACITY, CancellationToken, ChunkSize, CodecId, DRange, DecodeConfig,
    EncodeConfig, ErrorKind, FileSource, IndexLocation, MemorySource, RacError, RacWriter,
    ResourceDictionaryStore,
};

/// Encode and decode RAC (Random Access Compression) files
///
/// Reads from INPUT (or standard input) and writes to standard output.
#[derive(Parser, Debug)]
#[command(name = "ractool", version)]
#[command(group(ArgGroup::new("mode").required(true).args(["encode", "decode"])))]
struct Cli {
    /// Compress the input into a RAC file
    #[arg(long)]
    encode: bool,

    /// Decompress a RAC file
    #[arg(long)]
    decode: bool,

    /// Turn logging off; errors are still reported
    #[arg(long)]
    quiet: bool,

    /// Print a JSON summary to standard error when done
    #[arg(long)]
    stats: bool,

    /// DSpace range to decode, "i..j" with either bound optional
    #[arg(long, value_name = "i..j", conflicts_with = "encode")]
    drange: Option<DRange>,

    /// Decode on the calling thread only
    #[arg(long, conflicts_with = "encode")]
    singlethreaded: bool,

    /// Parallel decode workers (default: RACTOOL_WORKERS or one per core)
    #[arg(long, conflicts_with_all = ["encode", "singlethreaded"])]
    workers: Option<usize>,

    /// Compression codec: zlib, lz4 or zstd
    #[arg(long, default_value_t = EncodeConfig::default().codec, conflicts_with = "decode")]
    codec: CodecId,

    /// Chunk size in DSpace, e.g. 64k (default 64k when no chunk size is given)
    #[arg(long, value_parser = parse_size, conflicts_with = "decode")]
    dchunksize: Option<u64>,

    /// Chunk size in CSpace; only zlib supports it
    #[arg(long, value_parser = parse_size, conflicts_with = "decode")]
    cchunksize: Option<u64>,

    /// Align chunks to pages of this many CSpace bytes (0 disables)
    #[arg(long, value_parser = parse_size, default_value = "0", conflicts_with = "decode")]
    cpagesize: u64,

    /// Where to place the index: start or end
    #[arg(long, default_value = "start", conflicts_with = "decode")]
    indexlocation: IndexLocation,

    /// Comma-separated resource dictionary files
    #[arg(long, value_delimiter = ',', conflicts_with = "decode")]
    resources: Vec<PathBuf>,

    /// Maximum entries per index node
    #[arg(long, default_value_t = DEFAULT_NODE_CAPACITY, conflicts_with = "decode")]
    nodecapacity: usize,

    /// Input file; standard input when omitted
    input: Option<PathBuf>,
}

fn parse_size(text: &str) -> Result<u64, RacError> {
    rac::parse_byte_size(text)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let result = if cli.encode {
        run_encode(&cli)
    } else {
        run_decode(&cli)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            if cli.quiet {
                eprintln!("ractool: {:#}", e);
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_tracing(quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Distinct exit codes per error kind
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<RacError>().map(RacError::kind) {
        Some(ErrorKind::Config | ErrorKind::Range) => 2,
        Some(ErrorKind::Format) => 3,
        Some(ErrorKind::Io) => 4,
        Some(ErrorKind::Cancelled) => 130,
        None => 1,
    }
}

fn run_encode(cli: &Cli) -> anyhow::Result<()> {
    let config = EncodeConfig {
        codec: cli.codec,
        chunk_size: ChunkSize {
            dspace: cli.dchunksize,
            cspace: cli.cchunksize,
        },
        page_size: cli.cpagesize,
        index_location: cli.indexlocation,
        node_capacity: cli.nodecapacity,
    };
    let resources = ResourceDictionaryStore::load_files(&cli.resources)?;
    // Capability checks happen here, before the input is read
    let writer = RacWriter::new(config, &resources)?;

    let input = read_input(cli.input.as_deref())?;
    debug!("Read {} input bytes", input.len());

    let summary = writer.encode(&input, BufWriter::new(io::stdout().lock()))?;
    if cli.stats {
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn run_decode(cli: &Cli) -> anyhow::Result<()> {
    let mut config = DecodeConfig::from_env();
    if let Some(range) = cli.drange {
        config.range = range;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.single_threaded = cli.singlethreaded;

    let request = config.request();
    let cancel = CancellationToken::new();
    let mut sink = BufWriter::new(io::stdout().lock());
    let summary = match &cli.input {
        Some(path) => {
            let source = FileSource::open(path)
                .map_err(RacError::Io)
                .with_context(|| format!("cannot open {}", path.display()))?;
            cancel_on_interrupt(cancel.clone());
            rac::decode(source, &request, &mut sink, &cancel)?
        }
        None => {
            let source = MemorySource::from(read_input(None)?);
            cancel_on_interrupt(cancel.clone());
            rac::decode(source, &request, &mut sink, &cancel)?
        }
    };
    if cli.stats {
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

/// Cancel `token` on the first Ctrl-C
///
/// Decoding then stops after the chunks already in flight and exits with 130.
fn cancel_on_interrupt(token: CancellationToken) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("Ctrl-C will not cancel decoding: {}", e);
            return;
        }
    };
    std::thread::spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; stopping after in-flight chunks");
                token.cancel();
            }
        })
    });
}

/// Read a whole input file, or standard input
fn read_input(path: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    match path {
        Some(path) => {
            File::open(path)
                .and_then(|mut file| file.read_to_end(&mut data))
                .map_err(RacError::Io)
                .with_context(|| format!("cannot read {}", path.display()))?;
        }
        None => {
            io::stdin()
                .lock()
                .read_to_end(&mut data)
                .map_err(RacError::Io)
                .context("cannot read standard input")?;
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_default_follows_encode_config() {
        let cli = Cli::try_parse_from(["ractool", "--encode"]).unwrap();
        assert_eq!(cli.codec, EncodeConfig::default().codec);
    }

    #[test]
    fn test_encode_and_decode_are_exclusive() {
        assert!(Cli::try_parse_from(["ractool"]).is_err());
        assert!(Cli::try_parse_from(["ractool", "--encode", "--decode"]).is_err());
        assert!(Cli::try_parse_from(["ractool", "--decode", "--codec", "lz4"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let code = |e: RacError| exit_code(&anyhow::Error::new(e));
        assert_eq!(code(RacError::Cancelled), 130);
        assert_eq!(code(RacError::Io(io::Error::other("disk"))), 4);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}

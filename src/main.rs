use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::warn;

use audio_stego::audio::{ChannelPolicy, CoverFile, StegoFile};
use audio_stego::bitstream::{
    BitVecReader, ByteWriterBits, HammingIn, HammingOut, InBits, LimitedIn, LimitedOut, OutBits,
};
use audio_stego::bitvec::BitVector;
use audio_stego::method;
use audio_stego::params::Params;

#[derive(Parser)]
#[command(name = "stego", version, about = "Hide payloads in PCM audio files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed a message into a cover file, producing a stego file
    Embed(EmbedArgs),
    /// Recover a message from a stego file
    Extract(ExtractArgs),
    /// Print file details and per-method embedding capacities
    Info(InfoArgs),
}

#[derive(Args)]
struct EmbedArgs {
    /// Cover audio file
    #[arg(long = "cf", value_name = "FILE")]
    coverfile: PathBuf,

    /// Stego audio file to write
    #[arg(long = "sf", value_name = "FILE")]
    stegofile: PathBuf,

    /// Hiding method
    #[arg(short = 'm', long = "method")]
    method: String,

    /// Message file; stdin when omitted
    #[arg(long = "mf", value_name = "FILE")]
    msgfile: Option<PathBuf>,

    /// Stego key: comma separated name=value method parameters
    #[arg(short = 'k', long = "key", default_value = "")]
    key: String,

    /// Payload limit in bytes, or in bits with a `b` suffix
    #[arg(short = 'l', long = "limit", value_parser = parse_limit)]
    limit: Option<u64>,

    /// Protect the payload with Hamming(7,4) error correction
    #[arg(short = 'e', long = "ecc")]
    ecc: bool,
}

#[derive(Args)]
struct ExtractArgs {
    /// Stego audio file
    #[arg(long = "sf", value_name = "FILE")]
    stegofile: PathBuf,

    /// Hiding method
    #[arg(short = 'm', long = "method")]
    method: String,

    /// Message file to write; stdout when omitted
    #[arg(long = "mf", value_name = "FILE")]
    msgfile: Option<PathBuf>,

    /// Stego key: comma separated name=value method parameters
    #[arg(short = 'k', long = "key", default_value = "")]
    key: String,

    /// Payload limit in bytes, or in bits with a `b` suffix
    #[arg(short = 'l', long = "limit", value_parser = parse_limit)]
    limit: Option<u64>,

    /// Decode Hamming(7,4) error correction
    #[arg(short = 'e', long = "ecc")]
    ecc: bool,
}

#[derive(Args)]
struct InfoArgs {
    /// Audio file to inspect
    file: PathBuf,

    /// Stego key: comma separated name=value method parameters
    #[arg(short = 'k', long = "key", default_value = "")]
    key: String,
}

/// Parse the `-l` limit: a byte count, or a bit count with a `b` suffix.
fn parse_limit(raw: &str) -> Result<u64, String> {
    let (digits, in_bits) = match raw.strip_suffix('b') {
        Some(digits) => (digits, true),
        None => (raw, false),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("expected a positive number, got {raw:?}"))?;
    if in_bits {
        Ok(n)
    } else {
        n.checked_mul(8).ok_or_else(|| "length too big".to_string())
    }
}

fn main() -> ExitCode {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    match Cli::parse().command {
        Command::Embed(args) => embed_command(args),
        Command::Extract(args) => extract_command(args),
        Command::Info(args) => info_command(args),
    }
}

fn read_message(path: Option<&Path>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    match path {
        Some(path) => {
            File::open(path)
                .with_context(|| format!("unable to open file {}", path.display()))?
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {}", path.display()))?;
        }
        None => {
            io::stdin()
                .lock()
                .read_to_end(&mut data)
                .context("failed to read the message from stdin")?;
        }
    }
    Ok(data)
}

/// Payload bits that fit a cover of the given wire capacity.
fn payload_budget(capacity: i64, ecc: bool) -> u64 {
    let capacity = capacity.max(0) as u64;
    if ecc {
        // Hamming(7,4) expands every 4 payload bits to 7 on the wire
        capacity / 7 * 4
    } else {
        capacity
    }
}

fn embed_command(args: EmbedArgs) -> Result<()> {
    let message = read_message(args.msgfile.as_deref())?;

    let cover = CoverFile::open(&args.coverfile)?;
    let audio = cover.params();

    let mut params = Params::parse_key(&args.key)?;
    params.insert("samplerate", audio.samplerate);
    params.insert("bit_depth", audio.bit_depth());
    params.dump();
    let policy = ChannelPolicy::from_params(&params)?;

    let method = method::create(&args.method, &params)?;

    let payload = BitVector::from_bytes(&message);
    let mut limit = args
        .limit
        .unwrap_or(payload.len() as u64)
        .min(payload.len() as u64);
    let mut wire_capacity = method.capacity(audio.frames as u64);
    if policy == ChannelPolicy::Each {
        wire_capacity = wire_capacity.saturating_mul(audio.channels as i64);
    }
    let budget = payload_budget(wire_capacity, args.ecc);
    if limit > budget {
        warn!("the message is {limit} bits but the cover fits {budget}, truncating");
        limit = budget;
    }

    let mut bits: Box<dyn InBits> = Box::new(BitVecReader::new(payload));
    bits = Box::new(LimitedIn::new(bits, limit));
    if args.ecc {
        bits = Box::new(HammingIn::new(bits));
    }

    cover.embed(&args.stegofile, method.make_embedder(bits), policy)
}

fn extract_command(args: ExtractArgs) -> Result<()> {
    let stego = StegoFile::open(&args.stegofile)?;
    let audio = stego.params();

    let mut params = Params::parse_key(&args.key)?;
    params.insert("samplerate", audio.samplerate);
    params.insert("bit_depth", audio.bit_depth());
    params.dump();
    let policy = ChannelPolicy::from_params(&params)?;

    let method = method::create(&args.method, &params)?;

    let writer: Box<dyn Write> = match &args.msgfile {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(
            || format!("unable to open file {}", path.display()),
        )?)),
        None => Box::new(io::stdout().lock()),
    };

    let mut output: Box<dyn OutBits> = Box::new(ByteWriterBits::new(writer));
    if let Some(limit) = args.limit {
        output = Box::new(LimitedOut::new(output, limit));
    }
    if args.ecc {
        output = Box::new(HammingOut::new(output));
    }

    stego.extract(method.make_extractor(), output.as_mut(), policy)?;
    output.finish().context("failed to write the message")
}

fn info_command(args: InfoArgs) -> Result<()> {
    let file = StegoFile::open(&args.file)?;
    let audio = file.params();

    let mut params = Params::parse_key(&args.key)?;
    params.insert("samplerate", audio.samplerate);
    params.insert("bit_depth", audio.bit_depth());

    let encoding = if audio.float_samples { "float" } else { "PCM" };
    let duration = audio.frames as f64 / audio.samplerate as f64;
    println!("{:<10}: {}", "Filename", args.file.display());
    println!("{:<10}: {}", "Channels", audio.channels);
    println!("{:<10}: {} Hz", "Samplerate", audio.samplerate);
    println!(
        "{:<10}: {}-bit {}",
        "Encoding", audio.bits_per_sample, encoding
    );
    println!(
        "{:<10}: {} samples = {:.2} seconds",
        "Duration", audio.frames, duration
    );

    println!("\nEmbedding capacity (bits):");
    for name in method::list_methods() {
        match method::create(name, &params) {
            Ok(method) => println!("{name:<10}: {}", method.capacity(audio.frames as u64)),
            Err(_) => println!("{name:<10}: -"),
        }
    }
    Ok(())
}

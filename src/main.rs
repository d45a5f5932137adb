//! `fastx-upload` command line tool

mod logging;

use clap::{ArgAction, Args, Parser, Subcommand};
use fastx_upload::config::{ApiConfig, ConfigFile};
use fastx_upload::io::{DataSource, Transcoder};
use fastx_upload::upload::http::HttpSession;
use fastx_upload::upload::remote::RestSamplesResource;
use fastx_upload::upload::{AwsCliStore, CancelToken};
use fastx_upload::{DirectMode, Result, UploadConfig, UploadError, UploadInput, UploadOrchestrator};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Resolution of the upload progress bar
const PROGRESS_STEPS: u64 = 10_000;

#[derive(Parser)]
#[command(name = "fastx-upload", version)]
#[command(about = "Validate, normalize and upload FASTA/FASTQ files")]
#[command(after_help = "EXAMPLES:
  # Upload two single-end files and one pair
  fastx-upload upload reads.fq.gz contigs.fa --pair S1_R1.fq.gz S1_R2.fq.gz

  # Check a file locally and write the canonical stream
  fastx-upload validate reads.fq.bz2 -o reads.fq.gz

  # Validate from stdin without recompressing
  zcat reads.fq.gz | fastx-upload validate --no-recompress -")]
struct Cli {
    /// Log upload stages with timestamps
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file with [upload] and [api] tables
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// API key (basic-auth username)
    #[arg(long, global = true, env = "FASTX_UPLOAD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the samples API
    #[arg(long, global = true, env = "FASTX_UPLOAD_API_BASE")]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and upload files and read pairs
    Upload(UploadArgs),

    /// Validate a file (or pair) locally and write the canonical stream
    Validate(ValidateArgs),
}

/// Options shared by both subcommands
#[derive(Args)]
struct StreamArgs {
    /// Keep the canonical output uncompressed
    #[arg(long)]
    no_recompress: bool,

    /// Accept IUPAC ambiguity codes in sequences
    #[arg(long)]
    allow_iupac: bool,
}

#[derive(Args)]
struct UploadArgs {
    /// Maximum number of concurrent direct uploads
    #[arg(long, value_name = "N", conflicts_with = "no_threads")]
    max_threads: Option<usize>,

    /// Upload files one at a time
    #[arg(long)]
    no_threads: bool,

    /// Parallel part uploads for multipart transfers
    #[arg(long, value_name = "N")]
    multipart_concurrency: Option<usize>,

    /// Skip the extension check on input filenames
    #[arg(long)]
    no_filename_check: bool,

    /// Use the presigned form flow for direct uploads
    #[arg(long)]
    presigned: bool,

    /// Paired-end files, interleaved into one upload (repeatable)
    #[arg(long, num_args = 2, value_names = ["R1", "R2"], action = ArgAction::Append)]
    pair: Vec<PathBuf>,

    #[command(flatten)]
    stream: StreamArgs,

    /// Single-end files to upload
    files: Vec<PathBuf>,
}

#[derive(Args)]
struct ValidateArgs {
    #[command(flatten)]
    stream: StreamArgs,

    /// Output path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Input file, or `-` for stdin
    input: String,

    /// Mate file for paired-end input
    mate: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };

    match cli.command {
        Commands::Upload(args) => {
            let api = ApiConfig::resolve(cli.api_base, cli.api_key, Some(&file.api))?;
            upload(args, file.upload, api)
        }
        Commands::Validate(args) => validate(args, file.upload),
    }
}

fn apply_stream_args(config: UploadConfig, args: &StreamArgs) -> UploadConfig {
    let mut config = config;
    if args.no_recompress {
        config = config.with_recompress(false);
    }
    if args.allow_iupac {
        config = config.with_iupac(true);
    }
    config
}

fn upload(args: UploadArgs, config: UploadConfig, api: ApiConfig) -> Result<()> {
    let mut config = apply_stream_args(config, &args.stream);
    if args.no_threads {
        config = config.with_max_threads(1);
    } else if let Some(threads) = args.max_threads {
        config = config.with_max_threads(threads);
    }
    if let Some(concurrency) = args.multipart_concurrency {
        config = config.with_multipart_concurrency(concurrency);
    }
    if args.no_filename_check {
        config = config.with_filename_checks(false);
    }
    if args.presigned {
        config = config.with_direct_mode(DirectMode::Presigned);
    }

    let mut inputs: Vec<UploadInput> = args.files.iter().map(UploadInput::single).collect();
    inputs.extend(
        args.pair
            .chunks_exact(2)
            .map(|pair| UploadInput::paired(&pair[0], &pair[1])),
    );
    if inputs.is_empty() {
        return Err(UploadError::Config("No files to upload".into()));
    }

    let session = Arc::new(HttpSession::new(api)?);
    let resource = Arc::new(RestSamplesResource::new(session.clone()));
    let bar = progress_bar(ProgressDrawTarget::stderr());
    let listener = bar.clone();

    let mut orchestrator =
        UploadOrchestrator::new(resource, session, Arc::new(AwsCliStore::new()), config)
            .with_progress(move |fraction| show_fraction(&listener, fraction));
    install_interrupt_handler(orchestrator.cancel_token())?;

    let outcome = orchestrator.upload(inputs);
    match &outcome {
        Ok(_) => bar.finish_with_message("Complete."),
        Err(_) => bar.abandon(),
    }

    for receipt in outcome? {
        println!("{}\t{}\t{}", receipt.filename, receipt.size_class, receipt.remote_id);
    }
    Ok(())
}

/// Upload progress bar drawing to `target`
fn progress_bar(target: ProgressDrawTarget) -> ProgressBar {
    let style = ProgressStyle::with_template("Uploading: [{bar:20}] {percent}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    let bar = ProgressBar::with_draw_target(Some(PROGRESS_STEPS), target);
    bar.set_style(style);
    bar
}

fn show_fraction(bar: &ProgressBar, fraction: f64) {
    let position = (fraction.clamp(0.0, 1.0) * PROGRESS_STEPS as f64).round() as u64;
    bar.set_position(position);
}

/// Cancel the batch on Ctrl-C or SIGTERM so workers and child processes stop
fn install_interrupt_handler(cancel: CancelToken) -> Result<()> {
    ctrlc::set_handler(move || {
        warn!("Interrupted, cancelling uploads");
        cancel.cancel();
    })
    .map_err(|e| UploadError::Config(format!("Cannot install signal handler: {}", e)))
}

fn validate(args: ValidateArgs, config: UploadConfig) -> Result<()> {
    let config = apply_stream_args(config, &args.stream);
    config.validate()?;

    let reads = DataSource::from_arg(&args.input);
    let mates = args.mate.as_deref().map(DataSource::from_arg);
    let mut transcoder = Transcoder::open(&reads, mates.as_ref(), &config.transcode_options())?;
    info!(
        "Validating {} ({}{})",
        transcoder.name(),
        transcoder.format(),
        if transcoder.is_paired() { ", paired" } else { "" }
    );

    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    let mut out = BufWriter::new(out);
    io::copy(&mut transcoder, &mut out).map_err(UploadError::from_io)?;
    out.flush()?;

    for warning in transcoder.warnings() {
        eprintln!("Warning: {}: {}", warning.source, warning.message);
    }
    eprintln!(
        "{}: {} {} record(s), {} bytes in, {} bytes out",
        transcoder.name(),
        transcoder.records_read(),
        transcoder.format(),
        transcoder.source_bytes_read(),
        transcoder.total_written()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_progress_tracks_fraction() {
        let bar = progress_bar(ProgressDrawTarget::hidden());
        show_fraction(&bar, 0.0);
        assert_eq!(bar.position(), 0);
        show_fraction(&bar, 0.25);
        assert_eq!(bar.position(), PROGRESS_STEPS / 4);
        show_fraction(&bar, 1.5);
        assert_eq!(bar.position(), PROGRESS_STEPS);
        assert_eq!(bar.length(), Some(PROGRESS_STEPS));
    }

    #[cfg(unix)]
    #[test]
    fn test_sigterm_cancels_batch() {
        let cancel = CancelToken::new();
        install_interrupt_handler(cancel.clone()).unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !cancel.is_cancelled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(cancel.is_cancelled());
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use reel_batch::batch::{BatchError, BatchRequest, CancelFlag, run_batch};
use reel_batch::config::Config;
use reel_batch::fetch::Fetcher;
use reel_batch::init;
use reel_batch::platform;
use reel_batch::report::{BatchReport, persist_downloads, render_summary};
use reel_batch::retrieval::YtDlp;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Download every Facebook reel/video link found in a block of text.
#[derive(Debug, Parser)]
#[command(name = "reel-batch", version)]
struct Cli {
    /// Text file with links (one per line is typical). Reads stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Maximum number of unique links to process.
    #[arg(short = 'n', long)]
    max_items: Option<usize>,

    /// Directory receiving the downloaded files and the archive.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Skip building the combined zip archive.
    #[arg(long)]
    no_archive: bool,

    /// Number of downloads in flight at once.
    #[arg(short, long)]
    jobs: Option<usize>,

    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Also write a JSON report to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Open the output directory in the file manager when done.
    #[arg(long)]
    open: bool,
}

async fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read input: {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

/// First Ctrl-C stops new items from starting; the second one resolves so the
/// caller can drop the batch, which kills running downloads.
async fn wait_for_interrupts(cancel: CancelFlag) {
    if tokio::signal::ctrl_c().await.is_err() {
        return std::future::pending().await;
    }
    eprintln!(
        "[WARN] Interrupted; letting the current download finish and skipping the rest (Ctrl-C again to abort)"
    );
    cancel.cancel();
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut cfg = Config::load_or_default(&cli.config).await?;
    if let Some(out) = cli.out {
        cfg.output_dir = out;
    }
    if let Some(jobs) = cli.jobs {
        cfg.jobs = jobs;
    }
    if let Some(max_items) = cli.max_items {
        cfg.max_items = max_items;
    }
    cfg.validate()?;

    init::ensure_directories(&[cfg.output_dir.as_path()]).await?;
    if !init::check_program(&cfg.ytdlp_path).await {
        eprintln!(
            "[WARNING] {} not found or not runnable. Please install yt-dlp.",
            cfg.ytdlp_path.display()
        );
    }
    if cfg.probe_duration && !init::check_program(&cfg.ffprobe_path).await {
        eprintln!("[WARNING] ffprobe not found; unknown durations will be reported as 0.");
        cfg.probe_duration = false;
    }

    let raw_text = read_input(cli.input.as_ref()).await?;
    let request = BatchRequest::new(raw_text)
        .max_items(cfg.max_items)
        .jobs(cfg.jobs)
        .build_archive(!cli.no_archive)
        .archive_name(cfg.archive_name.clone());

    let fetcher = Fetcher::from_config(Arc::new(YtDlp::from_config(&cfg)), &cfg);
    let cancel = CancelFlag::new();
    let batch = tokio::select! {
        result = run_batch(&fetcher, &request, &cancel) => Some(result),
        _ = wait_for_interrupts(cancel.clone()) => None,
    };
    let Some(batch) = batch else {
        eprintln!("[WARN] Aborted; in-flight downloads were stopped and nothing was saved");
        std::process::exit(130);
    };
    let result = match batch {
        Ok(result) => result,
        Err(BatchError::ExtractionEmpty) => {
            eprintln!("[WARN] No supported Facebook video links found in the input.");
            std::process::exit(2);
        }
        Err(err) => return Err(err.into()),
    };

    let saved = persist_downloads(&result, &cfg.output_dir).await;
    let report = BatchReport::from_result(&result).with_save_failures(saved.failures);
    print!("{}", render_summary(&report));
    if let Some(path) = &cli.report {
        report.write_json(path).await?;
    }
    if cli.open {
        if let Err(err) = platform::open_folder(&cfg.output_dir) {
            eprintln!("[WARN] Could not open {}: {}", cfg.output_dir.display(), err);
        }
    }

    let all_failed = result.success_count() == 0;
    drop(result);
    if all_failed {
        std::process::exit(1);
    }
    Ok(())
}

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true, default_value = "config.json")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index, resolve and download every configured course.
    Run(RunArgs),
    /// Print the section/chapter index of one course as JSON.
    Index(IndexArgs),
    /// Index one course and resolve its download links into a manifest.
    Resolve(ResolveArgs),
    /// Download the chapters listed in an existing manifest.
    Download(DownloadArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Only process the course at this position in `courses` (0-based).
    #[arg(long)]
    pub course: Option<usize>,

    /// Stop after writing the manifest, even when downloads are enabled.
    #[arg(long)]
    pub skip_download: bool,
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// Position of the course in `courses` (0-based).
    #[arg(long, default_value_t = 0)]
    pub course: usize,

    /// Write the index to this file instead of stdout.
    #[arg(long)]
    pub out: Option<String>,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Position of the course in `courses` (0-based).
    #[arg(long, default_value_t = 0)]
    pub course: usize,

    /// Manifest output path (default: `application.download_list_path`).
    #[arg(long)]
    pub manifest: Option<String>,

    /// Failure list output path (default: `application.failed_list_path`).
    #[arg(long)]
    pub failed: Option<String>,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Manifest produced by `resolve` or `run`.
    #[arg(long)]
    pub manifest: String,

    /// Course folder name under the output directory.
    #[arg(long)]
    pub course_title: String,

    /// Output directory (default: `application.output_dir`).
    #[arg(long)]
    pub out: Option<String>,

    /// Maximum concurrent downloads (default: `application.download_concurrency`).
    #[arg(long)]
    pub concurrency: Option<usize>,
}

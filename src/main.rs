use std::path::Path;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use coursegrab::cli::{Cli, Command};
use coursegrab::config::Config;
use coursegrab::render::webdriver::WebDriverLauncher;

#[tokio::main]
async fn main() -> ExitCode {
    match try_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load(Path::new(&cli.config)).context("load config")?;
    coursegrab::logging::init(config.application.logfile.as_deref()).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Run(args) => {
            let launcher = WebDriverLauncher::from_config(&config)?;
            let summary = coursegrab::pipeline::run(&config, &launcher, args)
                .await
                .context("run")?;
            if !summary.aborted.is_empty() {
                eprintln!(
                    "{} of {} course(s) aborted: {}",
                    summary.aborted.len(),
                    summary.courses,
                    summary.aborted.join(", ")
                );
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Index(args) => {
            let launcher = WebDriverLauncher::from_config(&config)?;
            coursegrab::pipeline::index(&config, &launcher, args)
                .await
                .context("index")?;
        }
        Command::Resolve(args) => {
            let launcher = WebDriverLauncher::from_config(&config)?;
            coursegrab::pipeline::resolve(&config, &launcher, args)
                .await
                .context("resolve")?;
        }
        Command::Download(args) => {
            let report = coursegrab::pipeline::download(&config, args)
                .await
                .context("download")?;
            println!(
                "downloaded {}, skipped {}, failed {}",
                report.downloaded, report.skipped, report.failed
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

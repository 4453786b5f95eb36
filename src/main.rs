use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;

use ficsync::calibre::CalibreDb;
use ficsync::catalog::Catalog;
use ficsync::cli::{Cli, Command, DownloadArgs};
use ficsync::config::Settings;
use ficsync::converter::FanFicFare;
use ficsync::provider::CommandProvider;
use ficsync::session::Session;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    ficsync::logging::init(cli.verbose).context("init logging")?;

    match cli.command {
        Command::Download(args) => download(args).await.context("download")?,
    }

    Ok(())
}

async fn download(args: DownloadArgs) -> anyhow::Result<()> {
    let settings = Settings::load(args)?;
    tracing::debug!(?settings, "resolved settings");

    let provider = Arc::new(CommandProvider::new(
        settings.url_provider.clone(),
        settings.inbox.clone(),
    ));
    let converter = Arc::new(FanFicFare::new(
        settings.fanficfare_bin.clone(),
        settings.fanficfare_config.clone(),
    ));
    let catalog = settings.library.clone().map(|library| {
        Arc::new(CalibreDb::new(settings.calibredb_bin.clone(), library)) as Arc<dyn Catalog>
    });

    let session = Session::new(settings, provider, converter, catalog);
    let mut stdin = std::io::BufReader::new(std::io::stdin());
    let report = session.run(&mut stdin).await?;

    if !report.failed.is_empty() {
        tracing::warn!(
            count = report.failed.len(),
            "some works could not be synced; they are queued in the retry file"
        );
    }
    Ok(())
}

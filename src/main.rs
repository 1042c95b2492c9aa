use clap::Parser;
use std::io;
use std::path::PathBuf;
use tokio::runtime;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use libzipdrop::config::StoreConfig;
use libzipdrop::s3::S3Store;
use libzipdrop::{Job, RunOpts};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(flatten)]
    job: Job,
    /// RON file with region/endpoint/profile settings.
    #[clap(short, long, value_parser, value_name = "FILE")]
    config: Option<PathBuf>,
    #[clap(long)]
    region: Option<String>,
    /// S3 compatible endpoint, e.g. http://localhost:9000
    #[clap(long)]
    endpoint: Option<String>,
    /// Profile from the shared AWS credentials file.
    #[clap(long)]
    profile: Option<String>,
    /// Check the archive against the directory before uploading.
    #[clap(long)]
    verify: bool,
}

fn setup_logging() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("hyper=WARN".parse()?),
        )
        .with(fmt::Layer::new().with_ansi(false).with_writer(io::stderr));
    tracing::subscriber::set_global_default(subscriber)?;
    LogTracer::init()?;
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    setup_logging()?;
    let job = cli.job;
    log::info!("{:?}", job);

    let file_config = match &cli.config {
        Some(path) => StoreConfig::from_path(path.clone())?,
        None => StoreConfig::default(),
    };
    let config = file_config.merge(StoreConfig {
        region: cli.region,
        endpoint: cli.endpoint,
        profile: cli.profile,
    });

    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let cwd = std::env::current_dir()?;
    let opts = RunOpts { verify: cli.verify };
    runtime.block_on(async {
        let store = S3Store::new(&config)?;
        let report = job.run(&cwd, &store, &opts).await?;
        log::info!(
            "uploaded {} ({} bytes) to s3://{}/{}",
            report.archive.display(),
            report.bytes_uploaded,
            report.bucket,
            report.key
        );
        Ok::<(), anyhow::Error>(())
    })
}

use std::path::PathBuf;
use std::time::Duration;

use bosch_gateway_client::{Credentials, Gateway, GatewayConfig};

use clap::Parser;

use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("Impossible to read `{path}`: {source}")]
    DataFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("`{0}` must contain the host, the access key and the password, one per line")]
    MissingField(PathBuf),
    #[error(transparent)]
    Gateway(#[from] bosch_gateway_client::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// File containing the gateway host, the access key, and the password,
    /// one per line.
    #[arg(short, long, default_value = "data_file.txt")]
    data_file: PathBuf,

    /// JSON configuration file, used in place of the data file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interpret the host as a serial number and connect over XMPP.
    #[arg(long, default_value_t = false)]
    xmpp: bool,

    /// Request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Restrict the scan to the given paths.
    #[arg(short, long)]
    path: Vec<String>,
}

fn load_config(cli: &Cli) -> Result<GatewayConfig, Error> {
    if let Some(config) = &cli.config {
        return Ok(GatewayConfig::from_json_file(config)?);
    }

    let content = std::fs::read_to_string(&cli.data_file).map_err(|source| Error::DataFile {
        path: cli.data_file.clone(),
        source,
    })?;

    let mut lines = content.lines().map(str::trim).filter(|line| !line.is_empty());
    let (Some(host), Some(access_key), Some(password)) = (lines.next(), lines.next(), lines.next())
    else {
        return Err(Error::MissingField(cli.data_file.clone()));
    };

    let credentials = Credentials::access_key(access_key, password);
    Ok(if cli.xmpp {
        GatewayConfig::xmpp(host, credentials)
    } else {
        GatewayConfig::http(host, credentials)
    })
}

async fn run(cli: Cli) -> Result<(), Error> {
    let gateway = Gateway::new(load_config(&cli)?)?;
    if let Some(timeout) = cli.timeout {
        gateway.set_timeout(Duration::from_secs(timeout));
    }

    gateway.connect().await?;

    match gateway.check_connection().await? {
        Some(uuid) => info!("Connected to the gateway with UUID {uuid}"),
        None => warn!("The gateway did not report its UUID"),
    }

    let scans = if cli.path.is_empty() {
        gateway.rawscan().await?
    } else {
        let paths = cli.path.iter().map(String::as_str).collect::<Vec<_>>();
        gateway.smallscan(&paths).await?
    };

    gateway.close().await;

    println!("{}", serde_json::to_string_pretty(&scans)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

// jdremote: list devices and run single API calls through the MyJD relay or a local instance.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use jdremote_client::{
    config, ApiExecutor, CloudConnector, Config, DeviceSelector, LocalConnector,
};
use jdremote_core::{Payload, SessionSnapshot};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jdremote", version)]
#[command(about = "Remote control for download managers through the MyJD relay", long_about = None)]
#[command(after_help = "Credentials are read from JDREMOTE_EMAIL and JDREMOTE_PASSWORD.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML) instead of the default search path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Keep the relay session in this file between runs
    #[arg(short, long, global = true)]
    session: Option<PathBuf>,

    /// Talk to the instance on this machine instead of the relay
    #[arg(short, long, global = true)]
    local: bool,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// List devices
    Devices,

    /// Run one API call on a device
    Call {
        /// Device name, required unless --local
        #[arg(short, long)]
        device: Option<String>,

        /// API path, e.g. /downloadsV2/queryLinks
        path: String,

        /// Call parameters; JSON when they parse, plain strings otherwise
        params: Vec<String>,
    },
}

/// Command-line params are JSON when they parse, plain strings otherwise.
fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_payload(payload: Option<Payload>) -> anyhow::Result<()> {
    match payload {
        Some(Payload::Json(v)) => println!("{}", serde_json::to_string_pretty(&v)?),
        Some(Payload::Binary(b)) => println!("<{} bytes>", b.len()),
        None => bail!("no answer from device"),
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(p) => {
            let mut c = Config::from_file(p)?;
            c.apply_env(|k| std::env::var(k).ok());
            Ok(c)
        }
        None => Ok(config::load()),
    }
}

fn credentials() -> anyhow::Result<(String, String)> {
    let email = std::env::var("JDREMOTE_EMAIL").context("JDREMOTE_EMAIL is not set")?;
    let password = std::env::var("JDREMOTE_PASSWORD").context("JDREMOTE_PASSWORD is not set")?;
    Ok((email, password))
}

fn read_session(path: &Path) -> anyhow::Result<Option<SessionSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot read session file {}", path.display()))?;
    let snapshot = SessionSnapshot::from_bytes(&bytes)
        .with_context(|| format!("invalid session file {}", path.display()))?;
    Ok(Some(snapshot))
}

fn write_session(path: &Path, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
    use std::io::Write;

    let bytes = snapshot.to_bytes()?;
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut f = opts
        .open(path)
        .with_context(|| format!("cannot write session file {}", path.display()))?;
    f.write_all(&bytes)?;
    Ok(())
}

fn run_local(cfg: &Config, command: &Commands) -> anyhow::Result<()> {
    let connector = LocalConnector::new(cfg)?;
    if !connector.is_reachable() {
        bail!("no local instance at {}", connector.base_url());
    }
    let mut device = connector.device();
    match command {
        Commands::Devices => {
            let d = device.descriptor();
            println!("{}\t{}\t{}", d.name, d.id, d.kind);
            Ok(())
        }
        Commands::Call { path, params, .. } => {
            let params: Vec<Value> = params.iter().map(|p| parse_param(p)).collect();
            print_payload(device.execute(path, &params, false)?)
        }
    }
}

fn run_cloud(cfg: Config, session: Option<&Path>, command: &Commands) -> anyhow::Result<()> {
    if let Commands::Call { device: None, .. } = command {
        bail!("call needs --device <name> unless --local is given");
    }
    let connector = CloudConnector::new(cfg)?;
    let restored = match session.map(read_session).transpose()?.flatten() {
        Some(snapshot) => {
            connector.restore(&snapshot)?;
            connector.is_connected()
        }
        None => false,
    };
    if restored {
        tracing::info!("resumed saved session");
        connector.refresh_devices().context("saved session no longer valid")?;
    } else {
        let (email, password) = credentials()?;
        connector.connect(&email, &password).context("login failed")?;
    }

    let result = match command {
        Commands::Devices => {
            for d in connector.list_devices() {
                println!("{}\t{}\t{}", d.name, d.id, d.kind);
            }
            Ok(())
        }
        Commands::Call { device, path, params } => {
            let name = device.as_deref().unwrap_or_default();
            let params: Vec<Value> = params.iter().map(|p| parse_param(p)).collect();
            connector
                .get_device(DeviceSelector::Name(name))
                .and_then(|mut device| device.execute(path, &params, false))
                .map_err(anyhow::Error::from)
                .and_then(print_payload)
        }
    };

    if let Some(path) = session {
        write_session(path, &connector.snapshot())?;
    }
    result
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = load_config(cli.config.as_deref())?;
    if cli.local {
        run_local(&cfg, &cli.command)
    } else {
        run_cloud(cfg, cli.session.as_deref(), &cli.command)
    }
}

//! authsocket CLI client
//!
//! Manages a local identity key and talks to an authsocket server:
//! sends single events or listens for `message` broadcasts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use authsocket::{AuthSocketClient, Config, Identity, WebSocketTransport, WireFormat};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// authsocket: authenticated event sessions from the command line
#[derive(Parser)]
#[command(name = "authsocket-client")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to identity file (default: ~/.authsocket/identity.key)
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Envelope encoding (json or binary); must match the server
    #[arg(short, long, default_value = "json")]
    format: WireFormat,

    /// Seconds allowed for connecting and for the handshake
    #[arg(long, default_value = "10")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity keypair
    Init {
        /// Force overwrite existing identity
        #[arg(short, long)]
        force: bool,
    },

    /// Display your public key
    Identity,

    /// Connect, send one event and disconnect
    Send {
        /// Server URL, e.g. ws://127.0.0.1:8765
        url: String,

        /// Event name
        event: String,

        /// Event data as JSON; anything else is sent as a string
        data: String,
    },

    /// Connect and print incoming events until interrupted
    Listen {
        /// Server URL, e.g. ws://127.0.0.1:8765
        url: String,

        /// Event name to print
        #[arg(short, long, default_value = "message")]
        event: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("authsocket=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let key_file = KeyFile::new(cli.identity)?;
    let config = Config::default()
        .with_wire_format(cli.format)
        .with_handshake_timeout(Duration::from_secs(cli.timeout_secs));

    match cli.command {
        Commands::Init { force } => cmd_init(&key_file, force),
        Commands::Identity => cmd_identity(&key_file),
        Commands::Send { url, event, data } => cmd_send(&key_file, config, &url, &event, data).await,
        Commands::Listen { url, event } => cmd_listen(&key_file, config, &url, &event).await,
    }
}

/// Raw identity key file: 32-byte seed followed by the 32-byte public key
struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => dirs::home_dir()
                .context("Could not determine home directory; pass --identity")?
                .join(".authsocket")
                .join("identity.key"),
        };
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn load(&self) -> Result<Identity> {
        let bytes = fs::read(&self.path).with_context(|| {
            format!(
                "No identity at {}; run 'authsocket-client init' first",
                self.path.display()
            )
        })?;
        Identity::from_bytes(&bytes)
            .with_context(|| format!("Invalid identity file {}", self.path.display()))
    }

    fn store(&self, identity: &Identity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        fs::write(&self.path, identity.to_bytes().as_slice())
            .with_context(|| format!("Could not write {}", self.path.display()))?;

        // Owner-only on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

fn cmd_init(key_file: &KeyFile, force: bool) -> Result<()> {
    if key_file.exists() && !force {
        bail!(
            "Identity already exists at {}. Use --force to overwrite.",
            key_file.path().display()
        );
    }

    let identity = Identity::generate();
    key_file.store(&identity)?;

    println!("Public key: {}", identity.public_key());
    println!("Saved to:   {}", key_file.path().display());
    Ok(())
}

fn cmd_identity(key_file: &KeyFile) -> Result<()> {
    println!("{}", key_file.load()?.public_key());
    Ok(())
}

/// Open a WebSocket and authenticate
async fn connect(
    key_file: &KeyFile,
    config: Config,
    url: &str,
    cancel: &CancellationToken,
) -> Result<AuthSocketClient> {
    let identity = key_file.load()?;

    let transport = WebSocketTransport::connect_with_timeout(url, config.handshake_timeout)
        .await
        .with_context(|| format!("Could not connect to {}", url))?;

    let client = AuthSocketClient::with_config(transport, identity, config);
    client
        .connect(cancel)
        .await
        .with_context(|| format!("Handshake with {} failed", url))?;

    eprintln!("Authenticated as {}", client.public_key());
    Ok(client)
}

async fn cmd_send(
    key_file: &KeyFile,
    config: Config,
    url: &str,
    event: &str,
    data: String,
) -> Result<()> {
    let data = serde_json::from_str::<Value>(&data).unwrap_or(Value::String(data));

    let cancel = CancellationToken::new();
    let client = connect(key_file, config, url, &cancel).await?;

    let sent = client.emit(event, &data).await;
    client.close().await;
    sent.context("Could not send event")?;

    println!("Sent '{}'", event);
    Ok(())
}

async fn cmd_listen(key_file: &KeyFile, config: Config, url: &str, event: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let client = connect(key_file, config, url, &cancel).await?;

    client.on(event, |data| match (data.get("from"), data.get("text")) {
        (Some(Value::String(from)), Some(Value::String(text))) => println!("[{}] {}", from, text),
        _ => println!("{}", data),
    });
    eprintln!("Listening for '{}' events (Ctrl+C to quit)", event);

    let Some(session) = client.session() else {
        bail!("Connection closed before listening started");
    };

    tokio::select! {
        _ = session.closed() => bail!("Server closed the connection"),
        _ = tokio::signal::ctrl_c() => {}
    }

    client.close().await;
    Ok(())
}

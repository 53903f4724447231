use clap::Parser;
use client::config::{ClientConfig, DEFAULT_SERVER_URL};
use client::identity::{FileIdentityStore, Identity, IdentityStore, MemoryIdentityStore};
use client::network::Client;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the server
    #[arg(short = 's', long, default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Player name (1-8 of A-Z a-z 0-9 + - ! _ .)
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// File remembering the last name that joined
    #[arg(long)]
    identity_file: Option<PathBuf>,

    /// Reconnect attempts before giving up
    #[arg(long, default_value = "3")]
    reconnect_attempts: u32,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, default_value = "3000")]
    reconnect_delay_ms: u64,

    /// Maximum fauna shown at once (0 for no limit)
    #[arg(long, default_value = "1")]
    max_fauna: usize,

    /// World updates per second
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        let mut config = ClientConfig {
            server_url: self.server,
            tick_rate: self.tick_rate,
            identity_file: self.identity_file,
            ..Default::default()
        };
        config.connection.max_reconnect_attempts = self.reconnect_attempts;
        config.connection.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        config.world.max_fauna = (self.max_fauna > 0).then_some(self.max_fauna);
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    // Validate before anything touches the network
    let identity = args.name.as_deref().map(Identity::parse).transpose()?;
    let config = args.into_config();

    let store: Box<dyn IdentityStore> = match &config.identity_file {
        Some(path) => Box::new(FileIdentityStore::new(path)),
        None => Box::new(MemoryIdentityStore::new()),
    };

    info!("Starting client...");
    info!("Connecting to: {}", config.server_url);
    info!("Commands: /move X Y, /till, /food, /refresh, /status, /logout, /quit; other text is chat");

    let mut client = Client::new(config, store)?;
    client.run(identity).await?;

    Ok(())
}

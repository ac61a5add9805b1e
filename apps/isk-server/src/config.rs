use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;

use crate::auth::TokenAuthority;
use crate::channel::DEFAULT_CHANNEL_DEPTH;

#[derive(Debug, Parser)]
#[command(
    name = "isk-server",
    author,
    version,
    about = "Real-time sync server for ISK slideshow displays"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "ISK_LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    pub listen_addr: String,

    /// Redis URI for display records. Displays are kept in memory when unset.
    #[arg(long, env = "ISK_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Outbound frames buffered per connection before frames are dropped.
    #[arg(long, env = "ISK_CHANNEL_DEPTH", default_value_t = DEFAULT_CHANNEL_DEPTH)]
    pub channel_depth: usize,

    /// API tokens as `<sha256>=<user>:<role>+<role>`, comma separated.
    #[arg(long, env = "ISK_API_TOKENS", default_value = "", hide_env_values = true)]
    pub api_tokens: String,

    /// Name of the event created at startup and made current.
    #[arg(long, env = "ISK_EVENT_NAME", default_value = "ISK")]
    pub event_name: String,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Talk to a running server the way a remote-control UI does
    Remote {
        /// Server websocket URL (e.g., ws://localhost:3000/ws)
        #[arg(short, long, default_value = "ws://localhost:3000/ws")]
        url: String,

        #[command(subcommand)]
        command: RemoteCommand,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum RemoteCommand {
    /// Print the display roster
    Roster {
        /// Any known display id
        #[arg(long)]
        display_id: u64,
    },

    /// Ask a display to jump to a slide
    Goto {
        #[arg(long)]
        display_id: u64,
        #[arg(long)]
        group_id: u64,
        #[arg(long)]
        slide_id: u64,
    },

    /// Report a slide as shown, pretending to be the display
    Current {
        #[arg(long)]
        display_id: u64,
        #[arg(long)]
        group_id: u64,
        #[arg(long)]
        slide_id: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub redis_url: Option<String>,
    pub channel_depth: usize,
    pub tokens: TokenAuthority,
    pub event_name: String,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.channel_depth == 0 {
            anyhow::bail!("channel depth must be at least 1");
        }
        let tokens = TokenAuthority::parse(&cli.api_tokens).context("invalid ISK_API_TOKENS")?;
        Ok(ServerConfig {
            listen_addr,
            redis_url: cli.redis_url.filter(|url| !url.trim().is_empty()),
            channel_depth: cli.channel_depth,
            tokens,
            event_name: cli.event_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_token;

    #[test]
    fn defaults_produce_a_config() {
        let cli = Cli::parse_from(["isk-server"]);
        let config = ServerConfig::try_from(cli).unwrap();
        assert_eq!(config.listen_addr.port(), 3000);
        assert_eq!(config.channel_depth, DEFAULT_CHANNEL_DEPTH);
        assert!(config.tokens.is_empty());
    }

    #[test]
    fn flags_override_defaults() {
        let tokens = format!("{}=ops:override", hash_token("t"));
        let cli = Cli::parse_from([
            "isk-server",
            "--listen-addr",
            "0.0.0.0:8080",
            "--channel-depth",
            "8",
            "--api-tokens",
            tokens.as_str(),
            "--redis-url",
            "",
        ]);
        let config = ServerConfig::try_from(cli).unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.channel_depth, 8);
        assert!(config.tokens.authenticate("t").is_some());
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        let cli = Cli::parse_from(["isk-server", "--listen-addr", "nowhere"]);
        assert!(ServerConfig::try_from(cli).is_err());
        let cli = Cli::parse_from(["isk-server", "--channel-depth", "0"]);
        assert!(ServerConfig::try_from(cli).is_err());
    }

    #[test]
    fn remote_subcommand_parses() {
        let cli = Cli::parse_from([
            "isk-server",
            "remote",
            "goto",
            "--display-id",
            "1",
            "--group-id",
            "2",
            "--slide-id",
            "3",
        ]);
        match cli.command {
            Some(Commands::Remote { url, command }) => {
                assert_eq!(url, "ws://localhost:3000/ws");
                assert!(matches!(command, RemoteCommand::Goto { slide_id: 3, .. }));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}

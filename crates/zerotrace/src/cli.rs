//! Command-line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zerotrace_vpn::{Protocol, SMART_CONNECT_ID};

/// ZeroTrace - VPN session driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Client config (.toml or .json)
    #[arg(long, global = true, env = "ZEROTRACE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the configured transport protocol (wireguard, openvpn)
    ///
    /// Only selects the session transport; catalog entries keep the
    /// protocol they were configured with.
    #[arg(long, global = true)]
    pub protocol: Option<Protocol>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available servers
    Servers {
        /// Only show servers whose name contains this text
        #[arg(long, short)]
        search: Option<String>,
    },
    /// List supported protocols
    Protocols,
    /// Connect and print live stats until the duration elapses or Ctrl-C
    Connect {
        /// Server id
        #[arg(long, short, default_value = SMART_CONNECT_ID)]
        server: String,

        /// Seconds to stay connected (until Ctrl-C when omitted)
        #[arg(long, short)]
        duration: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_connect_defaults_to_smart_connect() {
        let args = Args::parse_from(["zerotrace", "connect"]);

        match args.command {
            Commands::Connect { server, duration } => {
                assert_eq!(server, SMART_CONNECT_ID);
                assert!(duration.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = Args::parse_from([
            "zerotrace",
            "servers",
            "--search",
            "ger",
            "--protocol",
            "openvpn",
            "-v",
        ]);

        assert!(args.verbose);
        assert_eq!(args.protocol, Some(Protocol::OpenVpn));
        assert!(matches!(args.command, Commands::Servers { search: Some(q) } if q == "ger"));
    }

    #[test]
    fn test_protocol_help_names_transport() {
        let command = Args::command();
        let protocol = command
            .get_arguments()
            .find(|arg| arg.get_id() == "protocol")
            .unwrap();

        let help = protocol.get_long_help().unwrap().to_string();
        assert!(help.contains("transport"));
        assert!(help.contains("catalog entries keep"));
    }

    #[test]
    fn test_rejects_unknown_protocol() {
        assert!(Args::try_parse_from(["zerotrace", "--protocol", "ipsec", "protocols"]).is_err());
    }
}

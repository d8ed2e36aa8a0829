//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Certificate DN authentication against a DN-keyed directory
#[derive(Parser, Debug)]
#[command(name = "dice-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "DICE_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "DICE_AUTH_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "DICE_AUTH_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "DICE_AUTH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "DICE_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the authentication server (default)
    Serve,

    /// Print the canonical form of one or more DNs
    Canonicalize {
        /// Raw DNs, slash or comma delimited
        #[arg(required = true)]
        dns: Vec<String>,
    },

    /// Look a DN up in the configured directory and print the identity
    Lookup {
        /// Subject DN
        #[arg(required = true)]
        dn: String,

        /// Issuer DN
        #[arg(long)]
        issuer: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_server_mode() {
        let cli = Cli::try_parse_from(["dice-auth"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn canonicalize_takes_many_dns() {
        let cli = Cli::try_parse_from(["dice-auth", "canonicalize", "/CN=a", "cn=b,o=c"]).unwrap();
        match cli.command {
            Some(Command::Canonicalize { dns }) => assert_eq!(dns, vec!["/CN=a", "cn=b,o=c"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn lookup_accepts_issuer_and_global_flags() {
        let cli = Cli::try_parse_from([
            "dice-auth",
            "lookup",
            "/CN=a",
            "--issuer",
            "/CN=ca",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Some(Command::Lookup { dn, issuer }) => {
                assert_eq!(dn, "/CN=a");
                assert_eq!(issuer.as_deref(), Some("/CN=ca"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn canonicalize_requires_a_dn() {
        assert!(Cli::try_parse_from(["dice-auth", "canonicalize"]).is_err());
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dumont")]
#[command(about = "Deploy compose-style container groups and keep them converged")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, env = "DUMONT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding persisted group state
    #[arg(long, env = "DUMONT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API for the management UI
    Serve {
        /// Listen address, `HOST:PORT` or just `HOST`
        #[arg(short, long, env = "DUMONT_BIND")]
        bind: Option<String>,

        /// Directory with the built UI to serve at `/`
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },

    /// Save a group spec and deploy it
    Deploy {
        /// Group name
        name: String,

        /// Compose YAML file, `-` for stdin
        #[arg(default_value = "-")]
        file: String,
    },

    /// Re-apply the stored spec of a group
    Redeploy {
        /// Group name
        name: String,
    },

    /// List containers
    Ps {
        /// Only containers belonging to this group
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Stop a container
    Stop {
        /// Container id
        id: String,
    },

    /// Stop (if running) and remove a container
    Rm {
        /// Container id
        id: String,
    },

    /// Rename a container
    Rename {
        /// Container id
        id: String,

        /// New container name
        new_name: String,
    },

    /// List groups, or show one group in detail
    Groups {
        /// Group name
        name: Option<String>,
    },

    /// Remove every container of a group and forget the group
    Down {
        /// Group name
        name: String,
    },

    /// Print the SHA-256 digest to put in `auth.users.password_sha256`
    HashPassword {
        /// Password, read from stdin when omitted
        password: Option<String>,
    },
}

/// Split a `--bind` value into host and optional port
pub fn parse_bind(bind: &str) -> Result<(String, Option<u16>), String> {
    match bind.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
            let port = port
                .parse::<u16>()
                .map_err(|e| format!("invalid port in '{}': {}", bind, e))?;
            Ok((host.trim_matches(['[', ']']).to_string(), Some(port)))
        }
        _ => Ok((bind.to_string(), None)),
    }
}

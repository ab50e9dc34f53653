//! Command-line argument parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "image-courier")]
#[command(about = "Pull, push, tag and remove container images without a container runtime")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Proxy URL for registry traffic
    #[arg(
        long = "proxy",
        short = 'x',
        global = true,
        help = "Proxy URL (e.g. http://127.0.0.1:7890, socks5://127.0.0.1:1080)"
    )]
    pub proxy: Option<String>,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet output
    #[arg(long = "quiet", short = 'q', global = true, conflicts_with = "verbose", help = "Only print errors")]
    pub quiet: bool,

    /// Skip TLS verification
    #[arg(
        long = "skip-tls",
        short = 'k',
        global = true,
        help = "Skip TLS certificate verification"
    )]
    pub skip_tls: bool,

    /// Timeout in seconds for network operations
    #[arg(
        long = "timeout",
        short = 't',
        global = true,
        default_value = "7200",
        help = "Timeout for network operations in seconds"
    )]
    pub timeout: u64,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pull an image from a registry into the local store
    Pull {
        /// Image reference, e.g. nginx:1.25 or registry.local:5000/team/app:v1
        image: String,
    },

    /// Push a locally stored image to its registry
    Push {
        image: String,
    },

    /// Copy a stored image under a new reference
    Tag {
        source: String,
        target: String,
    },

    /// Remove an image from the local store
    #[command(alias = "remove")]
    Rm {
        image: String,
    },

    /// List images in the local store
    #[command(alias = "ls")]
    List,

    /// Verify and store credentials for a registry
    Login {
        #[arg(default_value = "docker.io")]
        registry: String,

        #[arg(long = "username", short = 'u', help = "Username for registry authentication")]
        username: String,

        #[arg(long = "password", short = 'p', help = "Password for registry authentication")]
        password: String,
    },

    /// Forget stored credentials for a registry
    Logout {
        #[arg(default_value = "docker.io")]
        registry: String,
    },

    /// Show or change the stored proxy settings
    Proxy {
        /// Registry host the proxy applies to; the default proxy when omitted
        #[arg(long = "registry", short = 'r')]
        registry: Option<String>,

        /// New proxy URL
        url: Option<String>,

        /// Clear the selected proxy
        #[arg(long = "unset", conflicts_with = "url")]
        unset: bool,
    },
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

//! pocket-tunnel CLI
//!
//! Drives the background service over its localhost IPC port:
//! - Tunnel control (start, stop, validate, reset)
//! - Local server control (serve, stop-server, logs, ls)
//! - Service inspection (status, watch, ping, version, shutdown)

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pt_cli::commands;
use pt_cli::ipc::{default_ipc_address, ServiceClient};
use pt_cli::output::{print_error, print_info, print_success, print_warning};
use pt_core::Permission;

#[derive(Parser)]
#[command(name = "ptctl")]
#[command(author, version, about = "Control the pocket-tunnel background service")]
#[command(propagate_version = true)]
struct Cli {
    /// Service IPC address
    #[arg(short, long, global = true, env = "PT_IPC_ADDRESS", default_value_t = default_ipc_address())]
    address: String,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show service, tunnel and server status
    Status,

    /// Start the tunnel
    Start {
        /// Base64 tunnel token
        #[arg(short, long, env = "PT_TUNNEL_TOKEN", hide_env_values = true)]
        token: String,
        /// Local origin to forward to (defaults to the running local server)
        #[arg(short, long)]
        origin: Option<String>,
        /// Number of redundant edge connections (0 uses the default)
        #[arg(long, default_value_t = 0)]
        ha_connections: u32,
        /// Request post-quantum key agreement
        #[arg(long)]
        post_quantum: bool,
    },

    /// Stop the tunnel
    Stop,

    /// Check a tunnel token without starting anything
    Validate {
        /// Base64 tunnel token
        token: String,
    },

    /// Stop the tunnel and reset the engine's registration state
    Reset,

    /// Serve a directory over HTTP on localhost
    Serve {
        /// Directory to serve
        dir: PathBuf,
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },

    /// Stop the local server
    StopServer,

    /// Show requests captured by the local server
    Logs {
        /// Clear the request log instead of printing it
        #[arg(long)]
        clear: bool,
        /// Show remote address, content type and body
        #[arg(short, long)]
        long: bool,
    },

    /// List a directory as the service sees it
    Ls {
        /// Directory to list
        #[arg(default_value = ".")]
        path: String,
    },

    /// Stream service events
    Watch {
        /// Exit after printing this many events
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Query or request a host permission
    Permission {
        #[command(subcommand)]
        action: PermissionAction,
    },

    /// Check that the service answers
    Ping,

    /// Show CLI and service versions
    Version,

    /// Stop the background coordinator, the tunnel and the server
    Shutdown,
}

#[derive(Subcommand)]
enum PermissionAction {
    /// Show the current status of a permission
    Check { permission: PermissionArg },
    /// Ask the host to grant a permission
    Request { permission: PermissionArg },
}

#[derive(Clone, Copy, ValueEnum)]
enum PermissionArg {
    Notifications,
    BackgroundExecution,
    StorageAccess,
}

impl From<PermissionArg> for Permission {
    fn from(arg: PermissionArg) -> Self {
        match arg {
            PermissionArg::Notifications => Permission::Notifications,
            PermissionArg::BackgroundExecution => Permission::BackgroundExecution,
            PermissionArg::StorageAccess => Permission::StorageAccess,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut client = ServiceClient::with_address(cli.address);

    match cli.command {
        Commands::Status => {
            commands::status_command(&mut client).await?;
        }

        Commands::Start {
            token,
            origin,
            ha_connections,
            post_quantum,
        } => {
            commands::start_command(
                &mut client,
                &token,
                origin.as_deref(),
                ha_connections,
                post_quantum,
            )
            .await?;
        }

        Commands::Stop => {
            commands::stop_command(&mut client).await?;
        }

        Commands::Validate { token } => {
            commands::validate_command(&mut client, &token).await?;
        }

        Commands::Reset => {
            commands::reset_command(&mut client).await?;
        }

        Commands::Serve { dir, port } => {
            commands::serve_command(&mut client, &dir, port).await?;
        }

        Commands::StopServer => {
            commands::stop_server_command(&mut client).await?;
        }

        Commands::Logs { clear, long } => {
            commands::logs_command(&mut client, clear, long).await?;
        }

        Commands::Ls { path } => {
            commands::list_command(&mut client, &path).await?;
        }

        Commands::Watch { limit } => {
            commands::watch_command(&mut client, limit).await?;
        }

        Commands::Permission { action } => {
            let (permission, status) = match action {
                PermissionAction::Check { permission } => {
                    let permission = Permission::from(permission);
                    (permission, client.check_permission(permission).await?)
                }
                PermissionAction::Request { permission } => {
                    let permission = Permission::from(permission);
                    (permission, client.request_permission(permission).await?)
                }
            };
            println!("{:?}: {:?}", permission, status);
        }

        Commands::Ping => match client.ping().await {
            Ok(true) => print_success(&format!("Service is up at {}", client.address())),
            Ok(false) => {
                print_warning("Service answered with an unexpected response");
                anyhow::bail!("Ping failed");
            }
            Err(e) => {
                print_error(&format!("{}", e));
                return Err(e);
            }
        },

        Commands::Version => {
            println!("ptctl {}", env!("CARGO_PKG_VERSION"));
            match client.version().await {
                Ok(version) => println!("service {}", version),
                Err(e) => print_warning(&format!("Service version unavailable: {}", e)),
            }
        }

        Commands::Shutdown => {
            print_info("Stopping background service...");
            match client.stop_service().await {
                Ok(()) => print_success("Service stopped"),
                Err(e) => {
                    if e.to_string().contains("Is it running") {
                        print_warning("Service is not running");
                    } else {
                        print_error(&format!("Failed to stop service: {}", e));
                        return Err(e);
                    }
                }
            }
        }
    }

    Ok(())
}

//! Tunnel command implementations

use anyhow::Result;

use pt_core::TunnelRequest;

use crate::ipc::ServiceClient;
use crate::output::{print_error, print_info, print_success, print_warning};

/// Execute the start command
///
/// Without an explicit origin the tunnel forwards to the running local
/// server.
pub async fn start_command(
    client: &mut ServiceClient,
    token: &str,
    origin: Option<&str>,
    ha_connections: u32,
    post_quantum: bool,
) -> Result<()> {
    let origin_url = match origin {
        Some(origin) => origin.to_string(),
        None => {
            let url = client.server_url().await?;
            if url.is_empty() {
                print_error("No origin given and the local server is not running");
                anyhow::bail!("Pass --origin or start the server with: ptctl serve <dir>");
            }
            print_info(&format!("Forwarding to local server at {}", url));
            url
        }
    };

    let request = TunnelRequest {
        token: token.to_string(),
        origin_url,
        ha_connections,
        enable_post_quantum: post_quantum,
    };

    match client.start_tunnel(request).await {
        Ok(()) => {
            print_success("Tunnel starting");
            print_info("Follow progress with: ptctl watch");
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to start tunnel: {}", e));
            Err(e)
        }
    }
}

/// Execute the stop command
pub async fn stop_command(client: &mut ServiceClient) -> Result<()> {
    if !client.is_running().await? {
        print_warning("Tunnel is not running");
    }
    client.stop_tunnel().await?;
    print_success("Tunnel stopped");
    Ok(())
}

/// Execute the validate command
pub async fn validate_command(client: &mut ServiceClient, token: &str) -> Result<()> {
    match client.validate_token(token).await {
        Ok(tunnel_id) => {
            print_success("Token is valid");
            println!("Tunnel ID: {}", tunnel_id);
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Token rejected: {}", e));
            Err(e)
        }
    }
}

/// Execute the reset command
pub async fn reset_command(client: &mut ServiceClient) -> Result<()> {
    client.force_reset().await?;
    print_success("Tunnel stopped and engine registrations reset");
    Ok(())
}

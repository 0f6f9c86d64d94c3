//! Local server command implementations

use std::path::Path;

use anyhow::{Context, Result};

use pt_core::ServerRequest;

use crate::ipc::ServiceClient;
use crate::output::{format_directory, format_request_logs, print_error, print_success};

/// Execute the serve command
pub async fn serve_command(client: &mut ServiceClient, dir: &Path, port: u16) -> Result<()> {
    // The service resolves paths against its own working directory
    let root_dir = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read the current directory")?
            .join(dir)
    };

    let request = ServerRequest {
        root_dir: root_dir.clone(),
        port,
    };

    match client.start_server(request).await {
        Ok(()) => {
            let url = client.server_url().await?;
            print_success(&format!("Serving {} at {}", root_dir.display(), url));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to start server: {}", e));
            Err(e)
        }
    }
}

/// Execute the stop-server command
pub async fn stop_server_command(client: &mut ServiceClient) -> Result<()> {
    client.stop_server().await?;
    print_success("Server stopped");
    Ok(())
}

/// Execute the logs command
pub async fn logs_command(client: &mut ServiceClient, clear: bool, long: bool) -> Result<()> {
    if clear {
        client.clear_request_logs().await?;
        print_success("Request log cleared");
        return Ok(());
    }

    let entries = client.request_logs().await?;
    println!("{}", format_request_logs(&entries, long));
    Ok(())
}

/// Execute the ls command
pub async fn list_command(client: &mut ServiceClient, path: &str) -> Result<()> {
    match client.list_directory(path).await {
        Ok(entries) => {
            println!("{}", format_directory(&entries));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to list {}: {}", path, e));
            Err(e)
        }
    }
}

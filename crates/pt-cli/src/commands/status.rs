//! Status command implementation

use anyhow::Result;

use crate::ipc::ServiceClient;
use crate::output::{format_status, print_error, StatusReport};

/// Execute the status command
///
/// Only queries are issued, so an idle service stays idle.
pub async fn status_command(client: &mut ServiceClient) -> Result<()> {
    let report = match gather(client).await {
        Ok(report) => report,
        Err(e) => {
            print_error(&format!("Failed to get service status: {}", e));
            print_error("Is the service running? Try: pt-service");
            return Err(e);
        }
    };

    print!("{}", format_status(&report));
    Ok(())
}

async fn gather(client: &mut ServiceClient) -> Result<StatusReport> {
    let service_running = client.is_service_running().await?;
    let version = client.version().await?;
    let status = client.status().await?;

    Ok(StatusReport {
        address: client.address().to_string(),
        version,
        service_running,
        status,
    })
}

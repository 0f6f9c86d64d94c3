//! Watch command implementation

use anyhow::Result;

use crate::ipc::ServiceClient;
use crate::output::{describe_tracking, format_event, print_info, print_warning};

/// Execute the watch command
///
/// Prints the resync burst and then every live event until interrupted, the
/// service disconnects, or `limit` events have been printed.
pub async fn watch_command(client: &mut ServiceClient, limit: Option<usize>) -> Result<()> {
    client.connect().await?;
    print_info(&format!("Watching events from {} (Ctrl+C to stop)", client.address()));

    let mut printed = 0usize;
    loop {
        if limit.is_some_and(|limit| printed >= limit) {
            return Ok(());
        }

        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            next = client.next_event() => next?,
        };

        let Some((envelope, tracked)) = next else {
            print_warning("Service closed the connection");
            return Ok(());
        };

        if let Some(notice) = describe_tracking(&tracked) {
            print_warning(&notice);
        }
        println!("{}", format_event(&envelope));
        printed += 1;
    }
}

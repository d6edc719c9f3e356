//! List the tools a server advertises.

use toolwire_mcp::ClientManager;

/// Start `server` and print its tool descriptors as JSON.
pub async fn handle_tools(manager: &ClientManager, server: &str) -> anyhow::Result<()> {
    let client = manager.get_client(server).await?;
    let tools = client.tools().await;
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

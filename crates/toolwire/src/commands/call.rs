//! Call a single tool.

use anyhow::Context;
use serde_json::Value;
use toolwire_mcp::ClientManager;

/// Call `tool` on `server` and print the unwrapped output as JSON.
pub async fn handle_call(
    manager: &ClientManager,
    server: &str,
    tool: &str,
    args: Option<&str>,
) -> anyhow::Result<()> {
    let arguments = parse_arguments(args)?;
    let output = manager
        .call_tool(server, tool, arguments)
        .await
        .with_context(|| format!("{server}/{tool} failed"))?;

    println!("{}", serde_json::to_string_pretty(&output.into_value())?);
    Ok(())
}

/// Tool arguments must be a JSON object; none means `{}`.
fn parse_arguments(args: Option<&str>) -> anyhow::Result<Value> {
    let Some(args) = args else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(args).context("--args is not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("--args must be a JSON object");
    }
    Ok(value)
}

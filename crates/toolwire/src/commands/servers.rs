//! List configured logical servers.

use toolwire_mcp::McpSettings;

/// Print each logical server with the endpoint it resolves to.
pub fn handle_servers(settings: &McpSettings) -> anyhow::Result<()> {
    for line in server_lines(settings)? {
        println!("{line}");
    }
    Ok(())
}

fn server_lines(settings: &McpSettings) -> anyhow::Result<Vec<String>> {
    let names = settings.server_names();
    let width = names.iter().map(String::len).max().unwrap_or(0);

    names
        .iter()
        .map(|name| {
            let endpoint = settings.endpoint(name)?;
            Ok(format!("{name:<width$}  {endpoint}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use toolwire_mcp::TransportMode;

    #[test]
    fn test_server_lines_container_mode() {
        let settings = McpSettings {
            transport: TransportMode::Container,
            project_root: PathBuf::from("/srv/app"),
            ..McpSettings::default()
        };

        let lines = server_lines(&settings).unwrap();
        assert_eq!(
            lines,
            [
                "job-analysis      container toolwire-job-analysis: python -u server.py",
                "monitoring        container toolwire-monitoring: python -u server.py",
                "template-builder  container toolwire-template-builder: python -u server.py",
            ]
        );
    }
}

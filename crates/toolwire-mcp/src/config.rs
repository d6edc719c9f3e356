//! Worker configuration.
//!
//! Maps logical server names to concrete launch instructions. Loading order
//! (later sources override earlier):
//! 1. Built-in defaults
//! 2. JSON file from `TOOLWIRE_CONFIG`, else `./toolwire.json` if present
//! 3. `TOOLWIRE_*` environment variables (and `DOCKER_HOST`)

use crate::error::{McpError, McpResult};
use crate::transport::{resolve_interpreter, ContainerExecConfig, LocalProcessConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Logical servers that always exist.
pub const DEFAULT_SERVERS: &[&str] = &["job-analysis", "template-builder", "monitoring"];

/// Default project config file name.
pub const CONFIG_FILE_NAME: &str = "toolwire.json";

/// Entry script inside each worker directory.
const SERVER_SCRIPT: &str = "server.py";

/// Environment variable names.
pub mod env {
    pub const CONFIG: &str = "TOOLWIRE_CONFIG";
    pub const TRANSPORT: &str = "TOOLWIRE_TRANSPORT";
    pub const PROJECT_ROOT: &str = "TOOLWIRE_PROJECT_ROOT";
    pub const SERVERS_DIR: &str = "TOOLWIRE_SERVERS_DIR";
    pub const PYTHON: &str = "TOOLWIRE_PYTHON";
    pub const CONTAINER_PREFIX: &str = "TOOLWIRE_CONTAINER_PREFIX";
    pub const CONTAINER_FRAME_STDIN: &str = "TOOLWIRE_CONTAINER_FRAME_STDIN";
    pub const DOCKER_HOST: &str = "DOCKER_HOST";
    pub const REQUEST_TIMEOUT_SECS: &str = "TOOLWIRE_REQUEST_TIMEOUT_SECS";
}

/// How workers are reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Spawn a local subprocess (development).
    #[default]
    Local,
    /// Exec into a running container (production).
    Container,
}

impl FromStr for TransportMode {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "container" | "docker" => Ok(Self::Container),
            other => Err(McpError::config(format!(
                "unknown transport '{other}', expected 'local' or 'container'"
            ))),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Per-server overrides. Unset fields fall back to the global settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerOverride {
    /// Transport for this server only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportMode>,
    /// Local: program and arguments, replacing `<python> <script>`.
    /// Container: the exec command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Local: script path, relative to the project root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    /// Container name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Local: process cwd. Container: exec working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Extra environment for the worker.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// Concrete launch instructions for one logical server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEndpoint {
    Local(LocalProcessConfig),
    Container(ContainerExecConfig),
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(config) => {
                write!(f, "local: {}", config.program.display())?;
                for arg in &config.args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
            Self::Container(config) => {
                write!(f, "container {}: {}", config.container, config.command.join(" "))
            }
        }
    }
}

/// Worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpSettings {
    pub transport: TransportMode,
    /// Root for relative paths and virtualenv lookup.
    pub project_root: PathBuf,
    /// Directory holding `<name>/server.py`. Defaults to
    /// `<project_root>/mcp-servers`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers_dir: Option<PathBuf>,
    /// Explicit interpreter for local workers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<PathBuf>,
    /// Container name is `<prefix><server name>`.
    pub container_prefix: String,
    pub container_command: Vec<String>,
    pub container_working_dir: String,
    /// Wrap container stdin writes in stream-type-0 frames.
    pub frame_stdin: bool,
    /// Container engine endpoint; `None` uses the local socket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_host: Option<String>,
    /// Per-request timeout in seconds; `0` waits indefinitely.
    pub request_timeout_secs: u64,
    /// Per-server overrides. Names listed here are servers too.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub servers: BTreeMap<String, ServerOverride>,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            transport: TransportMode::Local,
            project_root: PathBuf::from("."),
            servers_dir: None,
            python: None,
            container_prefix: "toolwire-".to_string(),
            container_command: vec![
                "python".to_string(),
                "-u".to_string(),
                SERVER_SCRIPT.to_string(),
            ],
            container_working_dir: "/app".to_string(),
            frame_stdin: true,
            docker_host: None,
            request_timeout_secs: 0,
            servers: BTreeMap::new(),
        }
    }
}

impl McpSettings {
    /// Load settings from the config file and the process environment.
    pub async fn load() -> McpResult<Self> {
        let path = match std::env::var_os(env::CONFIG) {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let local = PathBuf::from(CONFIG_FILE_NAME);
                local.exists().then_some(local)
            }
        };

        let mut settings = match path {
            Some(path) => Self::load_file(&path).await?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Load settings from a JSON file. Missing keys keep their defaults.
    pub async fn load_file(path: &Path) -> McpResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            McpError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let settings = serde_json::from_str(&content).map_err(|e| {
            McpError::config(format!("invalid config {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Loaded worker configuration");
        Ok(settings)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> McpResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(env::TRANSPORT) {
            self.transport = value.parse()?;
        }
        if let Some(value) = get(env::PROJECT_ROOT) {
            self.project_root = PathBuf::from(value);
        }
        if let Some(value) = get(env::SERVERS_DIR) {
            self.servers_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = get(env::PYTHON) {
            self.python = Some(PathBuf::from(value));
        }
        if let Some(value) = get(env::CONTAINER_PREFIX) {
            self.container_prefix = value;
        }
        if let Some(value) = get(env::CONTAINER_FRAME_STDIN) {
            self.frame_stdin = parse_bool(env::CONTAINER_FRAME_STDIN, &value)?;
        }
        if let Some(value) = get(env::DOCKER_HOST) {
            self.docker_host = Some(value);
        }
        if let Some(value) = get(env::REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = value.trim().parse().map_err(|_| {
                McpError::config(format!(
                    "{} must be a whole number of seconds, got '{value}'",
                    env::REQUEST_TIMEOUT_SECS
                ))
            })?;
        }
        Ok(())
    }

    /// Per-request timeout, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Every known logical server name, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = DEFAULT_SERVERS.iter().map(|s| s.to_string()).collect();
        for name in self.servers.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    pub fn is_known(&self, name: &str) -> bool {
        DEFAULT_SERVERS.contains(&name) || self.servers.contains_key(name)
    }

    /// Directory that holds one subdirectory per worker.
    pub fn servers_dir(&self) -> PathBuf {
        self.servers_dir_under(&self.project_root)
    }

    fn servers_dir_under(&self, root: &Path) -> PathBuf {
        match &self.servers_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join("mcp-servers"),
        }
    }

    /// The project root as an absolute path.
    ///
    /// Local workers run with their own working directory, so every path
    /// handed to them is anchored here first.
    pub fn absolute_project_root(&self) -> McpResult<PathBuf> {
        if self.project_root.is_absolute() {
            return Ok(self.project_root.clone());
        }
        let cwd = std::env::current_dir()
            .map_err(|e| McpError::config(format!("cannot resolve project root: {e}")))?;
        Ok(normalize(&cwd.join(&self.project_root)))
    }

    /// Resolve launch instructions for a logical server.
    pub fn endpoint(&self, name: &str) -> McpResult<ServerEndpoint> {
        if !self.is_known(name) {
            return Err(McpError::ServerNotFound(name.to_string()));
        }

        let overrides = self.servers.get(name).cloned().unwrap_or_default();
        match overrides.transport.unwrap_or(self.transport) {
            TransportMode::Local => self.local_endpoint(name, overrides),
            TransportMode::Container => self.container_endpoint(name, overrides),
        }
    }

    fn local_endpoint(&self, name: &str, overrides: ServerOverride) -> McpResult<ServerEndpoint> {
        let root = self.absolute_project_root()?;
        let server_dir = self.servers_dir_under(&root).join(name);

        let mut config = match overrides.command {
            Some(command) => {
                let (program, args) = command.split_first().ok_or_else(|| {
                    McpError::config(format!("empty command for server '{name}'"))
                })?;
                LocalProcessConfig::new(program).with_args(args.iter().cloned())
            }
            None => {
                let script = match overrides.script {
                    Some(script) if script.is_absolute() => script,
                    Some(script) => root.join(script),
                    None => server_dir.join(SERVER_SCRIPT),
                };
                let explicit = self.python.as_deref().map(|python| anchor(&root, python));
                let python = resolve_interpreter(&root, explicit.as_deref());
                LocalProcessConfig::new(python)
                    .with_args(["-u".to_string(), script.display().to_string()])
            }
        };

        config.cwd = Some(match overrides.working_dir {
            Some(dir) => normalize(&root.join(dir)),
            None => server_dir,
        });
        config.env = overrides.env;
        config
            .env
            .entry("PYTHONUNBUFFERED".to_string())
            .or_insert_with(|| "1".to_string());

        Ok(ServerEndpoint::Local(config))
    }

    fn container_endpoint(
        &self,
        name: &str,
        overrides: ServerOverride,
    ) -> McpResult<ServerEndpoint> {
        let container = overrides
            .container
            .unwrap_or_else(|| format!("{}{name}", self.container_prefix));
        let command = overrides
            .command
            .unwrap_or_else(|| self.container_command.clone());
        if command.is_empty() {
            return Err(McpError::config(format!("empty command for server '{name}'")));
        }

        let mut config = ContainerExecConfig::new(container, command)
            .with_working_dir(
                overrides
                    .working_dir
                    .unwrap_or_else(|| self.container_working_dir.clone()),
            )
            .with_frame_stdin(self.frame_stdin);
        config.env = overrides.env;

        Ok(ServerEndpoint::Container(config))
    }
}

/// Anchor a relative path with a directory part at `root`. Bare program
/// names stay as they are so they are looked up on `PATH`.
fn anchor(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.components().count() < 2 {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Drop `.` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn parse_bool(key: &str, value: &str) -> McpResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(McpError::config(format!(
            "{key} must be true or false, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = McpSettings::default();
        assert_eq!(settings.transport, TransportMode::Local);
        assert_eq!(settings.container_prefix, "toolwire-");
        assert!(settings.frame_stdin);
        assert!(settings.request_timeout().is_none());
        assert_eq!(
            settings.server_names(),
            vec!["job-analysis", "monitoring", "template-builder"]
        );
    }

    #[test]
    fn test_transport_mode_parse() {
        assert_eq!("local".parse::<TransportMode>().unwrap(), TransportMode::Local);
        assert_eq!(
            " Container ".parse::<TransportMode>().unwrap(),
            TransportMode::Container
        );
        assert!(matches!(
            "ssh".parse::<TransportMode>(),
            Err(McpError::Config(_))
        ));
    }

    #[test]
    fn test_apply_env() {
        let mut settings = McpSettings::default();
        settings
            .apply_env(lookup(&[
                (env::TRANSPORT, "container"),
                (env::CONTAINER_PREFIX, "prod-"),
                (env::CONTAINER_FRAME_STDIN, "false"),
                (env::DOCKER_HOST, "tcp://10.0.0.5:2375"),
                (env::REQUEST_TIMEOUT_SECS, "30"),
                (env::PYTHON, ""),
            ]))
            .unwrap();

        assert_eq!(settings.transport, TransportMode::Container);
        assert_eq!(settings.container_prefix, "prod-");
        assert!(!settings.frame_stdin);
        assert_eq!(settings.docker_host.as_deref(), Some("tcp://10.0.0.5:2375"));
        assert_eq!(settings.request_timeout(), Some(Duration::from_secs(30)));
        assert!(settings.python.is_none());
    }

    #[test]
    fn test_apply_env_rejects_bad_values() {
        let mut settings = McpSettings::default();
        assert!(settings
            .apply_env(lookup(&[(env::REQUEST_TIMEOUT_SECS, "soon")]))
            .is_err());
        assert!(settings
            .apply_env(lookup(&[(env::CONTAINER_FRAME_STDIN, "maybe")]))
            .is_err());
        assert!(settings
            .apply_env(lookup(&[(env::TRANSPORT, "carrier-pigeon")]))
            .is_err());
    }

    #[test]
    fn test_unknown_server() {
        let settings = McpSettings::default();
        assert!(matches!(
            settings.endpoint("billing"),
            Err(McpError::ServerNotFound(name)) if name == "billing"
        ));
    }

    #[test]
    fn test_local_endpoint() {
        let dir = TempDir::new().unwrap();
        let settings = McpSettings {
            project_root: dir.path().to_path_buf(),
            python: Some(PathBuf::from("/usr/bin/python3")),
            ..Default::default()
        };

        let ServerEndpoint::Local(config) = settings.endpoint("job-analysis").unwrap() else {
            panic!("expected a local endpoint");
        };
        let server_dir = dir.path().join("mcp-servers").join("job-analysis");
        assert_eq!(config.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(
            config.args,
            vec!["-u".to_string(), server_dir.join("server.py").display().to_string()]
        );
        assert_eq!(config.cwd, Some(server_dir));
        assert_eq!(config.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_local_endpoint_uses_project_venv() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".venv/bin")).unwrap();
        std::fs::write(dir.path().join(".venv/bin/python3"), "").unwrap();

        let settings = McpSettings {
            project_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let ServerEndpoint::Local(config) = settings.endpoint("monitoring").unwrap() else {
            panic!("expected a local endpoint");
        };
        assert_eq!(config.program, dir.path().join(".venv/bin/python3"));
    }

    #[test]
    fn test_local_endpoint_anchors_relative_root() {
        let settings = McpSettings {
            python: Some(PathBuf::from("python3")),
            ..Default::default()
        };
        assert_eq!(settings.project_root, PathBuf::from("."));

        let ServerEndpoint::Local(config) = settings.endpoint("job-analysis").unwrap() else {
            panic!("expected a local endpoint");
        };
        let server_dir = std::env::current_dir()
            .unwrap()
            .join("mcp-servers")
            .join("job-analysis");
        let script = PathBuf::from(&config.args[1]);
        assert!(script.is_absolute());
        assert_eq!(script, server_dir.join("server.py"));
        assert_eq!(config.cwd, Some(server_dir));
        // A bare interpreter name is still looked up on PATH.
        assert_eq!(config.program, PathBuf::from("python3"));
    }

    #[test]
    fn test_relative_interpreter_is_anchored_at_root() {
        let settings = McpSettings {
            project_root: PathBuf::from("app"),
            python: Some(PathBuf::from("env/bin/python3")),
            ..Default::default()
        };
        let ServerEndpoint::Local(config) = settings.endpoint("monitoring").unwrap() else {
            panic!("expected a local endpoint");
        };
        let root = std::env::current_dir().unwrap().join("app");
        assert_eq!(config.program, root.join("env/bin/python3"));
        assert_eq!(
            config.cwd,
            Some(root.join("mcp-servers").join("monitoring"))
        );
    }

    #[test]
    fn test_container_endpoint() {
        let settings = McpSettings {
            transport: TransportMode::Container,
            ..Default::default()
        };
        let ServerEndpoint::Container(config) = settings.endpoint("template-builder").unwrap()
        else {
            panic!("expected a container endpoint");
        };
        assert_eq!(config.container, "toolwire-template-builder");
        assert_eq!(config.command, vec!["python", "-u", "server.py"]);
        assert_eq!(config.working_dir.as_deref(), Some("/app"));
        assert!(config.frame_stdin);
    }

    #[test]
    fn test_per_server_override() {
        let mut settings = McpSettings::default();
        settings.servers.insert(
            "monitoring".to_string(),
            ServerOverride {
                transport: Some(TransportMode::Container),
                container: Some("risk-scorer".to_string()),
                ..Default::default()
            },
        );
        settings.servers.insert(
            "echo".to_string(),
            ServerOverride {
                command: Some(vec!["/bin/cat".to_string()]),
                ..Default::default()
            },
        );

        let ServerEndpoint::Container(config) = settings.endpoint("monitoring").unwrap() else {
            panic!("expected a container endpoint");
        };
        assert_eq!(config.container, "risk-scorer");

        assert!(settings.server_names().contains(&"echo".to_string()));
        let ServerEndpoint::Local(config) = settings.endpoint("echo").unwrap() else {
            panic!("expected a local endpoint");
        };
        assert_eq!(config.program, PathBuf::from("/bin/cat"));
        assert!(config.args.is_empty());
    }

    #[test]
    fn test_empty_command_is_config_error() {
        let mut settings = McpSettings::default();
        settings.servers.insert(
            "broken".to_string(),
            ServerOverride {
                command: Some(Vec::new()),
                ..Default::default()
            },
        );
        assert!(matches!(
            settings.endpoint("broken"),
            Err(McpError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_load_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("toolwire.json");
        std::fs::write(
            &path,
            r#"{"transport": "container", "containerPrefix": "stage-", "servers": {"extra": {}}}"#,
        )
        .unwrap();

        let settings = McpSettings::load_file(&path).await.unwrap();
        assert_eq!(settings.transport, TransportMode::Container);
        assert_eq!(settings.container_prefix, "stage-");
        assert_eq!(settings.container_working_dir, "/app");
        assert!(settings.is_known("extra"));
    }

    #[tokio::test]
    async fn test_load_file_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("toolwire.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            McpSettings::load_file(&path).await,
            Err(McpError::Config(_))
        ));
    }

    #[test]
    fn test_endpoint_display() {
        let settings = McpSettings {
            transport: TransportMode::Container,
            ..Default::default()
        };
        assert_eq!(
            settings.endpoint("monitoring").unwrap().to_string(),
            "container toolwire-monitoring: python -u server.py"
        );
    }
}

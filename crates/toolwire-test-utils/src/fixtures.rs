//! Test fixtures for creating reproducible test environments.
//!
//! Provides temporary project directories laid out the way toolwire expects
//! them, canned MCP payloads, and a shell stub that speaks just enough MCP
//! to drive a real subprocess end to end.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary project with configurable file structure.
///
/// Creates a temporary directory that is automatically cleaned up
/// when the built project is dropped.
///
/// # Example
///
/// ```rust
/// use toolwire_test_utils::fixtures::TestProject;
///
/// let project = TestProject::new()
///     .with_worker("monitoring", "print('hi')")
///     .with_venv()
///     .build();
///
/// assert!(project.path().join("mcp-servers/monitoring/server.py").exists());
/// assert!(project.path().join(".venv/bin/python3").exists());
/// ```
pub struct TestProject {
    temp_dir: TempDir,
    /// Files to create (path relative to root -> contents, executable).
    files: HashMap<PathBuf, (String, bool)>,
}

impl TestProject {
    /// Create a new test project builder.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            files: HashMap::new(),
        }
    }

    /// Add a file to the project. Parent directories are created automatically.
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.files
            .insert(path.as_ref().to_path_buf(), (contents.into(), false));
        self
    }

    /// Add an executable file to the project.
    pub fn with_executable(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.files
            .insert(path.as_ref().to_path_buf(), (contents.into(), true));
        self
    }

    /// Add `mcp-servers/<name>/server.py`.
    pub fn with_worker(self, name: &str, script: &str) -> Self {
        self.with_file(format!("mcp-servers/{name}/server.py"), script)
    }

    /// Add a project-local virtualenv interpreter.
    pub fn with_venv(self) -> Self {
        self.with_executable(".venv/bin/python3", "#!/bin/sh\nexec python3 \"$@\"\n")
    }

    /// Add a `toolwire.json` configuration file.
    pub fn with_config(self, config: &str) -> Self {
        self.with_file("toolwire.json", config)
    }

    /// Build the project, creating all files on disk.
    pub fn build(self) -> BuiltTestProject {
        let root = self.temp_dir.path();

        for (path, (contents, executable)) in &self.files {
            let full_path = root.join(path);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent).unwrap_or_else(|e| {
                    panic!(
                        "Failed to create parent directory for {}: {}",
                        full_path.display(),
                        e
                    )
                });
            }
            fs::write(&full_path, contents)
                .unwrap_or_else(|e| panic!("Failed to write file {}: {}", full_path.display(), e));
            if *executable {
                make_executable(&full_path);
            }
        }

        BuiltTestProject {
            temp_dir: self.temp_dir,
        }
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// A built test project with files created on disk.
pub struct BuiltTestProject {
    temp_dir: TempDir,
}

impl BuiltTestProject {
    /// Get the root path of the project.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get the full path to a file in the project.
    pub fn file_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.temp_dir.path().join(relative)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .unwrap_or_else(|e| panic!("Failed to stat {}: {}", path.display(), e))
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
        .unwrap_or_else(|e| panic!("Failed to chmod {}: {}", path.display(), e));
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}

/// A successful `initialize` result.
pub fn initialize_result(server_name: &str) -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {"tools": {"listChanged": false}},
        "serverInfo": {"name": server_name, "version": "0.1.0"}
    })
}

/// A tool descriptor as returned by `tools/list`.
pub fn tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {"type": "object", "properties": {}}
    })
}

/// A `tools/call` result wrapping `text` in one text content part.
pub fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}]})
}

/// A `tools/call` result carrying `value` serialized as JSON text.
pub fn json_text_result(value: &Value) -> Value {
    text_result(&value.to_string())
}

/// A JSON-RPC success response.
pub fn response(id: u64, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// A JSON-RPC error response.
pub fn error_response(id: u64, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

/// A POSIX shell worker that answers a fixed request sequence.
///
/// Expects, in order: `initialize` (id 1), `notifications/initialized`,
/// `tools/list` (id 2), then one `tools/call` (id 3) which it answers with
/// `call_result`. Emits a `WARNING:` line on stderr after the handshake and
/// exits once stdin closes.
pub fn stub_worker_script(call_result: &Value) -> String {
    let init = response(1, initialize_result("stub-worker")).to_string();
    let tools = response(
        2,
        json!({"tools": [tool("validate_dependencies", "Validate package versions")]}),
    )
    .to_string();
    let call = response(3, call_result.clone()).to_string();

    format!(
        r#"#!/bin/sh
read -r _init
printf '%s\n' '{init}'
read -r _initialized
read -r _list
echo 'WARNING: stub worker running without a database' >&2
printf '%s\n' '{tools}'
read -r _call
printf '%s\n' '{call}'
while read -r _rest; do :; done
"#
    )
}

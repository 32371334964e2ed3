// Module: Loader
// Reads the YAML adapter config and JSON event payloads from disk.

use crate::protocol::AdapterConfig;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AdapterConfig> {
    let content = fs::read_to_string(path).context("Failed to read adapter config file")?;
    let config = serde_yaml::from_str(&content).context("Failed to parse adapter config YAML")?;
    Ok(config)
}

pub fn load_event<P: AsRef<Path>>(path: P) -> Result<Value> {
    let content = fs::read_to_string(path).context("Failed to read event file")?;
    let event = serde_json::from_str(&content).context("Failed to parse event JSON")?;
    Ok(event)
}

/// One canned response for dry-run runs: `[{"status": 200, "body": {...}}, ...]`.
#[derive(serde::Deserialize)]
struct MockResponse {
    status: u16,
    #[serde(default)]
    body: Value,
}

pub fn load_mock_responses<P: AsRef<Path>>(path: P) -> Result<Vec<(u16, String)>> {
    let content = fs::read_to_string(path).context("Failed to read mock responses file")?;
    let mocks: Vec<MockResponse> =
        serde_json::from_str(&content).context("Failed to parse mock responses JSON")?;
    Ok(mocks
        .into_iter()
        .map(|mock| {
            let body = match mock.body {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (mock.status, body)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_roundtrip() {
        let dir = std::env::temp_dir().join(format!("adapter-loader-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("adapter.yaml");
        fs::write(
            &path,
            r#"
metadata: { name: test-adapter }
api: { baseUrl: "https://api.example.com" }
steps:
  - name: announce
    log: { message: "up" }
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.metadata.name, "test-adapter");
        assert_eq!(config.steps.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_invalid_yaml_fails() {
        let dir = std::env::temp_dir().join(format!("adapter-loader-bad-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.yaml");
        fs::write(&path, "metadata: [unclosed").unwrap();

        assert!(load_config(&path).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_event_missing_file_fails() {
        assert!(load_event("/nonexistent/event.json").is_err());
    }

    #[test]
    fn test_load_mock_responses() {
        let dir = std::env::temp_dir().join(format!("adapter-mocks-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("mocks.json");
        fs::write(
            &path,
            r#"[
  {"status": 200, "body": {"status": {"phase": "Ready"}}},
  {"status": 404}
]"#,
        )
        .unwrap();

        let mocks = load_mock_responses(&path).unwrap();
        assert_eq!(mocks.len(), 2);
        assert_eq!(mocks[0].0, 200);
        assert!(mocks[0].1.contains("Ready"));
        assert_eq!(mocks[1], (404, String::new()));

        fs::remove_dir_all(&dir).ok();
    }
}

use std::path::PathBuf;
use std::time::Duration;

use log::info;
use uuid::Uuid;

use crate::error::{ControlError, ControlResult};
use crate::process::run_shell;

/// Where a topology description comes from.
/// Exactly one of the fields must be set.
#[derive(Debug, Clone, Default)]
pub struct TopologySource {
    pub file: Option<PathBuf>,
    pub content: Option<String>,
    pub script: Option<String>,
}

impl TopologySource {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn from_script(script: impl Into<String>) -> Self {
        Self {
            script: Some(script.into()),
            ..Default::default()
        }
    }
}

/// Turn a topology source into a file path the scheduler can consume.
///
/// Inline content is written to a file in a fresh temp directory; a
/// generator script runs through the shell with its stdout captured as the
/// content. A supplied file path is returned as is.
pub async fn materialize(source: &TopologySource, timeout: Duration) -> ControlResult<PathBuf> {
    let count = [
        source.file.is_some(),
        source.content.is_some(),
        source.script.is_some(),
    ]
    .iter()
    .filter(|x| **x)
    .count();
    if count != 1 {
        return Err(ControlError::TopologyFailed(
            "either topology file path, content or script has to be set".to_string(),
        ));
    }

    if let Some(file) = &source.file {
        return Ok(file.clone());
    }

    let content = match &source.script {
        Some(script) => {
            info!("executing topology script {script:?}");
            let out = run_shell(script, timeout).await?;
            if out.exit_code != 0 {
                return Err(ControlError::TopologyFailed(format!(
                    "topology script {script:?} failed with exit code {}; stderr: {:?}",
                    out.exit_code, out.stderr
                )));
            }
            out.stdout
        }
        None => source.content.clone().unwrap_or_default(),
    };

    let dir = std::env::temp_dir().join(format!("bosun-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("topology.yaml");
    std::fs::write(&path, content)?;
    info!("temp topology file {} created", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exactly_one_source() {
        let empty = TopologySource::default();
        assert!(materialize(&empty, Duration::from_secs(5)).await.is_err());

        let both = TopologySource {
            file: Some(PathBuf::from("a.yaml")),
            content: Some("collections: []".to_string()),
            script: None,
        };
        assert!(materialize(&both, Duration::from_secs(5)).await.is_err());
    }

    #[tokio::test]
    async fn test_content_written_to_temp_file() {
        let source = TopologySource::from_content("name: test\ncollections: []\n");
        let path = materialize(&source, Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "name: test\ncollections: []\n"
        );
    }

    #[tokio::test]
    async fn test_script_output_captured() {
        let source = TopologySource::from_script("printf 'name: scripted'");
        let path = materialize(&source, Duration::from_secs(5)).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "name: scripted");

        let failing = TopologySource::from_script("exit 7");
        assert!(materialize(&failing, Duration::from_secs(5)).await.is_err());
    }
}

use std::path::{Path, PathBuf};

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::id::SessionId;

/// One partition/session pair the controller can reattach to after a
/// restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreEntry {
    pub partition_id: String,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreData {
    pub entries: Vec<RestoreEntry>,
}

/// The restore file of one restore id. Written atomically so a crash
/// mid-write never leaves a torn file behind.
#[derive(Debug, Clone)]
pub struct RestoreFile {
    dir: PathBuf,
    id: String,
}

impl RestoreFile {
    pub fn new(dir: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            id: id.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("restore_{}.json", self.id))
    }

    pub fn read(&self) -> ControlResult<RestoreData> {
        let path = self.path();
        if !path.exists() {
            return Ok(RestoreData::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            ControlError::RuntimeError(format!(
                "failed to parse restore file {}: {e}",
                path.display()
            ))
        })
    }

    pub fn write(&self, data: &RestoreData) -> ControlResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| ControlError::RuntimeError(format!("failed to serialize restore: {e}")))?;
        let tmp = self.dir.join(format!("restore_{}.json.tmp", self.id));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, self.path())?;
        info!(
            "updated restore file {:?} with {} entries",
            self.path(),
            data.entries.len()
        );
        Ok(())
    }
}

/// Append a timestamped session/topology record to the partition's
/// history file. History is informational only; failures are surfaced to
/// the caller for logging but never fail a request.
pub fn append_history(
    dir: &Path,
    partition_id: &str,
    session_id: &SessionId,
    topology_path: &Path,
) -> ControlResult<()> {
    use std::io::Write;

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{partition_id}.history"));
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(
        file,
        "{} {session_id} {}",
        Utc::now().to_rfc3339(),
        topology_path.display()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bosun-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let file = RestoreFile::new(temp_dir(), "fresh");
        assert_eq!(file.read().unwrap(), RestoreData::default());
    }

    #[test]
    fn test_write_read_round_trip() {
        let file = RestoreFile::new(temp_dir(), "rt");
        let data = RestoreData {
            entries: vec![RestoreEntry {
                partition_id: "physics_1".to_string(),
                session_id: SessionId::random(),
            }],
        };
        file.write(&data).unwrap();
        assert_eq!(file.read().unwrap(), data);

        // Overwrites replace the previous contents.
        file.write(&RestoreData::default()).unwrap();
        assert_eq!(file.read().unwrap(), RestoreData::default());
    }

    #[test]
    fn test_history_appends() {
        let dir = temp_dir();
        let session_id = SessionId::random();
        append_history(&dir, "p1", &session_id, Path::new("/tmp/topo.yaml")).unwrap();
        append_history(&dir, "p1", &session_id, Path::new("/tmp/topo2.yaml")).unwrap();
        let content = std::fs::read_to_string(dir.join("p1.history")).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains(&session_id.to_string()));
    }
}

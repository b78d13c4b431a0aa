//! Per-sgroup audit logs, one JSON object per line.
//!
//! Actions done through the API go to `<log_dir>/<id>.jsonl`, changes of flattened subjects go to
//! `<log_dir>/<id>-sync.jsonl`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sgroups::{GroupId, LoggedUser, Mright, Result, SgroupsError};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A logged action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub when: String,
    pub who: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Action specific data, merged in the JSON object
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Changes applied to the flattened subjects of one mright
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub when: String,
    pub mright: Mright,
    pub new_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub added: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub removed: Vec<String>,
}

/// End of a log file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgroupLogs {
    /// false when older lines were skipped
    pub whole_file: bool,
    pub logs: Vec<Value>,
}

fn now_string(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct AuditLogger {
    log_dir: PathBuf,
    file_lock: Arc<Mutex<()>>,
}

impl AuditLogger {
    pub fn new(log_dir: impl AsRef<Path>) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&log_dir)?;
        info!("Audit logs are written to: {:?}", log_dir);
        Ok(Self {
            log_dir,
            file_lock: Arc::new(Mutex::new(())),
        })
    }

    fn log_file(&self, id: &GroupId, suffix: &str) -> PathBuf {
        let id = id.as_str().replace('/', "_");
        self.log_dir.join(format!("{}{}.jsonl", id, suffix))
    }

    async fn append_line(&self, path: &Path, line: String) -> Result<()> {
        let _lock = self.file_lock.lock().await;
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn append_log(&self, id: &GroupId, entry: &AuditEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        self.append_line(&self.log_file(id, ""), line).await?;
        debug!("audit {:?}: {} by {}", id.as_str(), entry.action, entry.who);
        Ok(())
    }

    /// `data` must be a JSON object (or null)
    pub async fn log_action(
        &self,
        id: &GroupId,
        who: &LoggedUser,
        action: &str,
        msg: Option<&str>,
        data: Value,
    ) -> Result<()> {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        let entry = AuditEntry {
            action: action.to_string(),
            when: now_string(Utc::now()),
            who: who.to_string(),
            msg: msg.map(|s| s.to_string()),
            data,
        };
        self.append_log(id, &entry).await
    }

    pub async fn log_sync(
        &self,
        id: &GroupId,
        mright: Mright,
        new_count: usize,
        added: Vec<String>,
        removed: Vec<String>,
    ) -> Result<()> {
        let entry = SyncEntry {
            when: now_string(Utc::now()),
            mright,
            new_count,
            added,
            removed,
        };
        let line = serde_json::to_string(&entry)?;
        self.append_line(&self.log_file(id, "-sync"), line).await
    }

    /// Last `bytes` bytes of the logs of an sgroup, without the partial first line
    pub async fn read_logs(&self, id: &GroupId, bytes: u64, sync: bool) -> Result<SgroupLogs> {
        let path = self.log_file(id, if sync { "-sync" } else { "" });
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SgroupLogs {
                    whole_file: true,
                    logs: Vec::new(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        let whole_file = bytes >= size;
        if !whole_file {
            file.seek(SeekFrom::Start(size - bytes)).await?;
        }
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).await?;
        let content = String::from_utf8_lossy(&buffer);

        let content = if whole_file {
            &content[..]
        } else {
            content.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
        };
        let logs = content
            .split_terminator('\n')
            .map(serde_json::from_str)
            .collect::<std::result::Result<Vec<Value>, _>>()
            .map_err(SgroupsError::from)?;
        Ok(SgroupLogs { whole_file, logs })
    }
}

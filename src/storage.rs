use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::jobs::JobId;
use crate::pipeline::AnalysisResult;

/// Opaque handle to a stored result snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(String);

impl ResultRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable home for completed job results.
///
/// Stores are shared by every worker and the request layer, so methods take
/// `&self`.
pub trait ResultStore: Send + Sync {
    fn save(&self, id: JobId, result: &AnalysisResult) -> Result<ResultRef>;

    /// `Ok(None)` when the artifact is gone.
    fn load(&self, result_ref: &ResultRef) -> Result<Option<AnalysisResult>>;

    /// Removing an artifact that no longer exists is not an error.
    fn remove(&self, result_ref: &ResultRef) -> Result<()>;
}

/// One pretty-printed JSON file per job: `<dir>/results_<id>.json`.
pub struct FilesystemResultStore {
    dir: PathBuf,
}

impl FilesystemResultStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create results dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, result_ref: &ResultRef) -> Result<PathBuf> {
        let name = result_ref.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(anyhow!("invalid result reference '{}'", name));
        }
        Ok(self.dir.join(name))
    }
}

impl ResultStore for FilesystemResultStore {
    fn save(&self, id: JobId, result: &AnalysisResult) -> Result<ResultRef> {
        let result_ref = ResultRef::new(format!("results_{}.json", id));
        let path = self.path_for(&result_ref)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(result).context("serialize result")?;
        std::fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("move result into place at {}", path.display()))?;
        Ok(result_ref)
    }

    fn load(&self, result_ref: &ResultRef) -> Result<Option<AnalysisResult>> {
        let path = self.path_for(result_ref)?;
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        let result = serde_json::from_slice(&raw)
            .with_context(|| format!("parse result {}", path.display()))?;
        Ok(Some(result))
    }

    fn remove(&self, result_ref: &ResultRef) -> Result<()> {
        let path = self.path_for(result_ref)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }
}

#[derive(Default)]
pub struct InMemoryResultStore {
    results: Mutex<HashMap<ResultRef, AnalysisResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for InMemoryResultStore {
    fn save(&self, id: JobId, result: &AnalysisResult) -> Result<ResultRef> {
        let result_ref = ResultRef::new(format!("mem:{}", id));
        self.results
            .lock()
            .map_err(|_| anyhow!("result store lock poisoned"))?
            .insert(result_ref.clone(), result.clone());
        Ok(result_ref)
    }

    fn load(&self, result_ref: &ResultRef) -> Result<Option<AnalysisResult>> {
        Ok(self
            .results
            .lock()
            .map_err(|_| anyhow!("result store lock poisoned"))?
            .get(result_ref)
            .cloned())
    }

    fn remove(&self, result_ref: &ResultRef) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| anyhow!("result store lock poisoned"))?
            .remove(result_ref);
        Ok(())
    }
}

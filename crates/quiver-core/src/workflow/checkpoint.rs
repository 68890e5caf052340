//! One JSON checkpoint per suspended workflow.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::state::WorkflowState;

/// A checkpoint held out of the live set while one resume runs.
///
/// Hand it back with [`CheckpointStore::consume`] once the resume succeeded,
/// or [`CheckpointStore::release`] to make the workflow resumable again.
#[derive(Debug)]
pub struct ClaimedCheckpoint {
    workflow_id: String,
    live: PathBuf,
    claimed: PathBuf,
}

impl ClaimedCheckpoint {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }
}

/// Persists suspended workflows at `<state>/checkpoints/<id>.json`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("checkpoints"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for `workflow_id`, or `None` for ids that are not plain tokens.
    fn path_for(&self, workflow_id: &str) -> Option<PathBuf> {
        let valid = !workflow_id.is_empty()
            && workflow_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.dir.join(format!("{}.json", workflow_id)))
    }

    /// Write the checkpoint atomically, replacing any previous one.
    pub fn save(&self, state: &WorkflowState) -> anyhow::Result<()> {
        let path = self
            .path_for(&state.workflow_id)
            .ok_or_else(|| anyhow::anyhow!("Invalid workflow id: {}", state.workflow_id))?;
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create checkpoint directory: {}", self.dir.display())
        })?;
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state).context("Failed to serialize checkpoint")?;
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("Failed to write checkpoint: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to rename checkpoint: {}", path.display()))?;
        tracing::debug!(workflow_id = %state.workflow_id, path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    pub fn load(&self, workflow_id: &str) -> anyhow::Result<Option<WorkflowState>> {
        let Some(path) = self.path_for(workflow_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
        let state = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?;
        Ok(Some(state))
    }

    /// Take the checkpoint for `workflow_id` by renaming it aside.
    ///
    /// Returns `None` when no live checkpoint exists, including when another
    /// resume already holds it. The rename is atomic, so one caller wins.
    pub fn claim(
        &self,
        workflow_id: &str,
    ) -> anyhow::Result<Option<(ClaimedCheckpoint, WorkflowState)>> {
        let Some(live) = self.path_for(workflow_id) else {
            return Ok(None);
        };
        let claimed = live.with_extension("json.claimed");
        match fs::rename(&live, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to claim checkpoint: {}", live.display()));
            }
        }
        let claim = ClaimedCheckpoint {
            workflow_id: workflow_id.to_string(),
            live,
            claimed,
        };

        let parsed = fs::read(&claim.claimed)
            .with_context(|| format!("Failed to read checkpoint: {}", claim.claimed.display()))
            .and_then(|bytes| {
                serde_json::from_slice::<WorkflowState>(&bytes).with_context(|| {
                    format!("Failed to parse checkpoint: {}", claim.claimed.display())
                })
            });
        match parsed {
            Ok(state) => {
                tracing::debug!(workflow_id, "Checkpoint claimed");
                Ok(Some((claim, state)))
            }
            Err(err) => {
                self.release(claim)?;
                Err(err)
            }
        }
    }

    /// Whether a resume currently holds the checkpoint for `workflow_id`.
    pub fn is_claimed(&self, workflow_id: &str) -> bool {
        self.path_for(workflow_id)
            .is_some_and(|p| p.with_extension("json.claimed").exists())
    }

    /// Put a claimed checkpoint back so the workflow can be resumed again.
    pub fn release(&self, claim: ClaimedCheckpoint) -> anyhow::Result<()> {
        fs::rename(&claim.claimed, &claim.live).with_context(|| {
            format!("Failed to restore checkpoint: {}", claim.live.display())
        })?;
        tracing::debug!(workflow_id = %claim.workflow_id, "Checkpoint released");
        Ok(())
    }

    /// Drop a claimed checkpoint after its resume finished.
    pub fn consume(&self, claim: ClaimedCheckpoint) -> anyhow::Result<()> {
        fs::remove_file(&claim.claimed).with_context(|| {
            format!("Failed to delete checkpoint: {}", claim.claimed.display())
        })
    }

    /// Every live checkpoint, oldest first. Unreadable files are skipped.
    pub fn list(&self) -> anyhow::Result<Vec<WorkflowState>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut states = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read checkpoints: {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %format!("{:#}", err), "Skipping unreadable checkpoint")
                }
            }
        }
        states.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{InstallRequest, Stage};
    use tempfile::TempDir;

    #[test]
    fn save_load_consume() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());
        let mut state = WorkflowState::new(InstallRequest::new("github:org/repo"));
        state.stage = Stage::AwaitingDecision;

        store.save(&state).unwrap();
        let loaded = store.load(&state.workflow_id).unwrap().unwrap();
        assert_eq!(loaded.stage, Stage::AwaitingDecision);
        assert_eq!(store.list().unwrap().len(), 1);

        let (claim, _) = store.claim(&state.workflow_id).unwrap().unwrap();
        store.consume(claim).unwrap();
        assert!(store.load(&state.workflow_id).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn claim_is_exclusive_until_released() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());
        let mut state = WorkflowState::new(InstallRequest::new("github:org/repo"));
        state.stage = Stage::AwaitingDecision;
        store.save(&state).unwrap();
        let id = state.workflow_id.clone();

        let (claim, claimed_state) = store.claim(&id).unwrap().unwrap();
        assert_eq!(claimed_state.workflow_id, id);
        assert!(store.claim(&id).unwrap().is_none());
        assert!(store.is_claimed(&id));
        assert!(store.list().unwrap().is_empty());

        store.release(claim).unwrap();
        assert!(!store.is_claimed(&id));
        assert!(store.load(&id).unwrap().is_some());

        let (claim, _) = store.claim(&id).unwrap().unwrap();
        store.consume(claim).unwrap();
        assert!(store.load(&id).unwrap().is_none());
        assert!(!store.is_claimed(&id));
    }

    #[test]
    fn unparsable_claim_is_put_back() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("broken.json"), "{").unwrap();

        assert!(store.claim("broken").is_err());
        assert!(store.dir().join("broken.json").exists());
        assert!(!store.is_claimed("broken"));
    }

    #[test]
    fn path_like_ids_are_unknown() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());
        assert!(store.load("../registry").unwrap().is_none());
        assert!(store.load("").unwrap().is_none());
    }

    #[test]
    fn corrupt_checkpoint_is_skipped_by_list() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("broken.json"), "{").unwrap();
        let state = WorkflowState::new(InstallRequest::new("x"));
        store.save(&state).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store.load("broken").is_err());
    }
}

//! In-memory remote file service for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{RemoteError, RemoteFileService};
use crate::models::RemoteFileMetadata;

#[derive(Default)]
struct State {
    files: BTreeMap<String, (RemoteFileMetadata, Vec<u8>)>,
    fail_put: HashSet<String>,
    fail_delete: HashSet<String>,
    fail_get: HashSet<String>,
    fail_list: bool,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add(&self, filename: &str, owner: &str, blob: &[u8]) {
        let meta = RemoteFileMetadata {
            filename: filename.to_string(),
            size_bytes: blob.len() as u64,
            mime_type: crate::models::FileKind::from_filename(filename)
                .mime_type()
                .to_string(),
            authorized_user_ids: ["owner".to_string()].into_iter().collect(),
            owner_feature_id: owner.to_string(),
        };
        self.state()
            .files
            .insert(filename.to_string(), (meta, blob.to_vec()));
    }

    pub fn has(&self, filename: &str) -> bool {
        self.state().files.contains_key(filename)
    }

    pub fn blob(&self, filename: &str) -> Option<Vec<u8>> {
        self.state().files.get(filename).map(|(_, b)| b.clone())
    }

    pub fn filenames(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    pub fn fail_put(&self, filename: &str) {
        self.state().fail_put.insert(filename.to_string());
    }

    pub fn fail_delete(&self, filename: &str) {
        self.state().fail_delete.insert(filename.to_string());
    }

    pub fn fail_get(&self, filename: &str) {
        self.state().fail_get.insert(filename.to_string());
    }

    pub fn fail_list(&self, fail: bool) {
        self.state().fail_list = fail;
    }

    pub fn heal(&self) {
        let mut state = self.state();
        state.fail_put.clear();
        state.fail_delete.clear();
        state.fail_get.clear();
        state.fail_list = false;
    }

    /// Mutating calls made so far, e.g. `put:a.gpx`, `delete:b.gpx`.
    pub fn mutations(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with("put:") || c.starts_with("delete:"))
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

#[async_trait]
impl RemoteFileService for FakeRemote {
    async fn list_metadata(
        &self,
        owner_feature_id: Option<&str>,
    ) -> Result<Vec<RemoteFileMetadata>, RemoteError> {
        let mut state = self.state();
        state.calls.push("list".to_string());
        if state.fail_list {
            return Err(RemoteError::ServerError("listing unavailable".into()));
        }
        Ok(state
            .files
            .values()
            .map(|(meta, _)| meta.clone())
            .filter(|meta| owner_feature_id.map_or(true, |id| meta.owner_feature_id == id))
            .collect())
    }

    async fn get_blob(&self, filename: &str) -> Result<Vec<u8>, RemoteError> {
        let mut state = self.state();
        state.calls.push(format!("get:{filename}"));
        if state.fail_get.contains(filename) {
            return Err(RemoteError::ServerError("download interrupted".into()));
        }
        state
            .files
            .get(filename)
            .map(|(_, blob)| blob.clone())
            .ok_or_else(|| RemoteError::NotFound(filename.to_string()))
    }

    async fn put_blob(&self, meta: &RemoteFileMetadata, blob: &[u8]) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.push(format!("put:{}", meta.filename));
        if state.fail_put.contains(&meta.filename) {
            return Err(RemoteError::ServerError("upload rejected".into()));
        }
        state
            .files
            .insert(meta.filename.clone(), (meta.clone(), blob.to_vec()));
        Ok(())
    }

    async fn delete_blob(&self, filename: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.push(format!("delete:{filename}"));
        if state.fail_delete.contains(filename) {
            return Err(RemoteError::ServerError("delete rejected".into()));
        }
        match state.files.remove(filename) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(filename.to_string())),
        }
    }
}

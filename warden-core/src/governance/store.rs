//! Storage backends for governed tool descriptors
//!
//! Every mutation goes through [`ToolStore::update`], which applies the
//! closure to a copy of the record under the store's write lock and commits
//! it only when the closure succeeds. Concurrent lifecycle operations on the
//! same tool are therefore totally ordered, and a failed transition leaves
//! the stored record untouched.

use super::descriptor::{AuditEntry, ToolDescriptor, ToolId, ToolStatus};
use super::tier::ToolTier;
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;

/// Atomic read-modify-write applied by [`ToolStore::update`]
pub type ToolMutation = Box<dyn FnOnce(&mut ToolDescriptor) -> Result<()> + Send>;

/// Optional filters for listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFilter {
    /// Only tools in this status
    pub status: Option<ToolStatus>,
    /// Only tools of this tier
    pub tier: Option<ToolTier>,
}

impl ToolFilter {
    /// Match everything
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to a status
    pub fn with_status(mut self, status: ToolStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to a tier
    pub fn with_tier(mut self, tier: ToolTier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Check a descriptor against this filter
    pub fn matches(&self, tool: &ToolDescriptor) -> bool {
        self.status.is_none_or(|s| tool.status == s) && self.tier.is_none_or(|t| tool.tier == t)
    }
}

/// Trait for tool descriptor storage backends
#[async_trait]
pub trait ToolStore: Send + Sync {
    /// Insert a new descriptor; fails with `DuplicateName` if the name is taken
    async fn insert(&self, tool: ToolDescriptor) -> Result<()>;

    /// Get a descriptor by id
    async fn get(&self, id: ToolId) -> Result<Option<ToolDescriptor>>;

    /// Get a descriptor by name (case-insensitive)
    async fn find_by_name(&self, name: &str) -> Result<Option<ToolDescriptor>>;

    /// List descriptors matching a filter, oldest proposal first
    async fn list(&self, filter: &ToolFilter) -> Result<Vec<ToolDescriptor>>;

    /// Apply a mutation atomically and return the committed record
    async fn update(&self, id: ToolId, mutation: ToolMutation) -> Result<ToolDescriptor>;
}

/// Indexed descriptor table shared by the built-in backends
#[derive(Debug, Default, Clone)]
struct ToolTable {
    tools: BTreeMap<ToolId, ToolDescriptor>,
    names: HashMap<String, ToolId>,
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ToolTable {
    fn from_tools(tools: Vec<ToolDescriptor>) -> Result<Self> {
        let mut table = Self::default();
        for tool in tools {
            table.insert(tool)?;
        }
        Ok(table)
    }

    fn insert(&mut self, tool: ToolDescriptor) -> Result<()> {
        let key = name_key(&tool.name);
        if self.names.contains_key(&key) {
            return Err(WardenError::DuplicateName(tool.name));
        }
        if self.tools.contains_key(&tool.id) {
            return Err(WardenError::Storage(format!("tool id {} already stored", tool.id)));
        }
        self.names.insert(key, tool.id);
        self.tools.insert(tool.id, tool);
        Ok(())
    }

    fn find_by_name(&self, name: &str) -> Option<&ToolDescriptor> {
        self.names
            .get(&name_key(name))
            .and_then(|id| self.tools.get(id))
    }

    fn list(&self, filter: &ToolFilter) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .tools
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tools.sort_by(|a, b| {
            a.proposed_at
                .cmp(&b.proposed_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        tools
    }

    /// Returns the committed record and the one it replaced
    fn update(
        &mut self,
        id: ToolId,
        mutation: ToolMutation,
    ) -> Result<(ToolDescriptor, ToolDescriptor)> {
        let slot = self
            .tools
            .get_mut(&id)
            .ok_or_else(|| WardenError::NotFound(format!("tool {}", id)))?;

        let mut next = slot.clone();
        mutation(&mut next)?;

        if next.id != slot.id || name_key(&next.name) != name_key(&slot.name) {
            return Err(WardenError::Validation(
                "tool id and name are immutable".to_string(),
            ));
        }

        let previous = std::mem::replace(slot, next.clone());
        Ok((next, previous))
    }

    fn restore(&mut self, previous: ToolDescriptor) {
        self.tools.insert(previous.id, previous);
    }

    fn remove(&mut self, id: ToolId) {
        if let Some(tool) = self.tools.remove(&id) {
            self.names.remove(&name_key(&tool.name));
        }
    }
}

/// In-memory tool store
#[derive(Clone, Default)]
pub struct InMemoryToolStore {
    table: Arc<RwLock<ToolTable>>,
}

impl InMemoryToolStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolStore for InMemoryToolStore {
    async fn insert(&self, tool: ToolDescriptor) -> Result<()> {
        self.table.write().await.insert(tool)
    }

    async fn get(&self, id: ToolId) -> Result<Option<ToolDescriptor>> {
        Ok(self.table.read().await.tools.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ToolDescriptor>> {
        Ok(self.table.read().await.find_by_name(name).cloned())
    }

    async fn list(&self, filter: &ToolFilter) -> Result<Vec<ToolDescriptor>> {
        Ok(self.table.read().await.list(filter))
    }

    async fn update(&self, id: ToolId, mutation: ToolMutation) -> Result<ToolDescriptor> {
        let (next, _) = self.table.write().await.update(id, mutation)?;
        Ok(next)
    }
}

/// On-disk snapshot layout. Audit trails live in the sidecar log, so
/// `tools` carries empty `audit_log`s.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    #[serde(default)]
    revision: u64,
    tools: Vec<ToolDescriptor>,
}

const SNAPSHOT_VERSION: u32 = 2;

/// One line of the append-only audit log
#[derive(Debug, Serialize, Deserialize)]
struct AuditRecord {
    tool_id: ToolId,
    entry: AuditEntry,
}

/// In-memory view of the files plus how far it has read them
#[derive(Debug, Default)]
struct FileState {
    table: ToolTable,
    revision: u64,
    audit_offset: u64,
}

/// JSON file tool store.
///
/// Three files share the snapshot's stem:
///
/// - `tools.json` holds every descriptor without its audit trail, plus a
///   revision counter bumped on each commit
/// - `tools.audit.jsonl` is an append-only log of audit entries, one JSON
///   object per line
/// - `tools.json.lock` is an advisory lock taken exclusively around every
///   mutation and shared while opening
///
/// A mutation takes the lock, catches up on whatever other processes
/// committed since (a changed revision reloads the snapshot, new audit
/// lines are tailed), applies the closure, appends the new audit lines and
/// rewrites the snapshot via temp file and rename. If either write fails the
/// in-memory change is rolled back, the audit log is truncated to where it
/// was, and the error is returned.
///
/// Reads are served from memory and reflect this process's commits plus
/// everything seen at the last open or mutation.
#[derive(Clone)]
pub struct FileToolStore {
    path: PathBuf,
    audit_path: PathBuf,
    lock_path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

impl FileToolStore {
    /// Open the snapshot at `path`, starting empty if it does not exist
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Storage`] if the files exist but cannot be read
    /// or parsed, or hold duplicate names.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = Self {
            audit_path: path.with_extension("audit.jsonl"),
            lock_path: path.with_extension("json.lock"),
            path,
            state: Arc::new(RwLock::new(FileState::default())),
        };

        {
            let mut state = store.state.write().await;
            let _lock = store.acquire_lock(false).await?;
            store.refresh(&mut state).await?;
            tracing::debug!(
                path = %store.path.display(),
                tools = state.table.tools.len(),
                revision = state.revision,
                "Opened tool store"
            );
        }

        Ok(store)
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the append-only audit log
    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    async fn acquire_lock(&self, exclusive: bool) -> Result<std::fs::File> {
        let path = self.lock_path.clone();
        let locked = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)?;
            if exclusive {
                file.lock()?;
            } else {
                file.lock_shared()?;
            }
            Ok(file)
        })
        .await
        .map_err(|e| WardenError::Storage(format!("store lock task failed: {}", e)))?;

        locked.map_err(|e| {
            WardenError::Storage(format!(
                "failed to lock {}: {}",
                self.lock_path.display(),
                e
            ))
        })
    }

    async fn read_snapshot(&self) -> Result<Option<Snapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WardenError::Storage(format!(
                    "failed to read tool snapshot {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            WardenError::Storage(format!(
                "failed to parse tool snapshot {}: {}",
                self.path.display(),
                e
            ))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(WardenError::Storage(format!(
                "unsupported snapshot version {} in {}",
                snapshot.version,
                self.path.display()
            )));
        }
        Ok(Some(snapshot))
    }

    /// Catch up with commits made through other handles. Caller holds the
    /// file lock.
    async fn refresh(&self, state: &mut FileState) -> Result<()> {
        let snapshot = self.read_snapshot().await?;
        let revision = snapshot.as_ref().map_or(0, |s| s.revision);

        if revision != state.revision {
            let tools = snapshot.map(|s| s.tools).unwrap_or_default();
            let mut table = ToolTable::from_tools(tools)
                .map_err(|e| WardenError::Storage(format!("corrupt tool snapshot: {}", e)))?;
            for (id, tool) in table.tools.iter_mut() {
                if let Some(known) = state.table.tools.get_mut(id) {
                    tool.audit_log = std::mem::take(&mut known.audit_log);
                }
            }
            tracing::debug!(from = state.revision, to = revision, "Reloaded tool snapshot");
            state.table = table;
            state.revision = revision;
        }

        self.tail_audit(state).await
    }

    async fn tail_audit(&self, state: &mut FileState) -> Result<()> {
        let mut file = match tokio::fs::File::open(&self.audit_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                state.audit_offset = 0;
                return Ok(());
            }
            Err(e) => {
                return Err(WardenError::Storage(format!(
                    "failed to open audit log {}: {}",
                    self.audit_path.display(),
                    e
                )));
            }
        };

        let len = file.metadata().await?.len();
        if len < state.audit_offset {
            tracing::warn!(
                path = %self.audit_path.display(),
                offset = state.audit_offset,
                len,
                "Audit log shrank, reading from the start"
            );
            state.audit_offset = 0;
            for tool in state.table.tools.values_mut() {
                tool.audit_log.clear();
            }
        }
        if len == state.audit_offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(state.audit_offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        // a trailing line without newline is still being written
        let complete = buf.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        let mut applied = 0usize;
        for line in buf[..complete].split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_slice(line).map_err(|e| {
                WardenError::Storage(format!(
                    "corrupt audit log {}: {}",
                    self.audit_path.display(),
                    e
                ))
            })?;
            match state.table.tools.get_mut(&record.tool_id) {
                Some(tool) => {
                    tool.audit_log.push(record.entry);
                    applied += 1;
                }
                None => tracing::warn!(tool_id = %record.tool_id, "Audit entry for unknown tool skipped"),
            }
        }

        state.audit_offset += complete as u64;
        tracing::trace!(entries = applied, offset = state.audit_offset, "Tailed audit log");
        Ok(())
    }

    /// Append audit lines, returning the new offset
    async fn append_audit(&self, offset: u64, records: &[AuditRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(offset);
        }

        let mut bytes = Vec::new();
        for record in records {
            serde_json::to_writer(&mut bytes, record)?;
            bytes.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)
            .await
            .map_err(|e| {
                WardenError::Storage(format!(
                    "failed to open audit log {}: {}",
                    self.audit_path.display(),
                    e
                ))
            })?;
        file.write_all(&bytes).await.map_err(|e| {
            WardenError::Storage(format!(
                "failed to append to {}: {}",
                self.audit_path.display(),
                e
            ))
        })?;
        file.flush().await?;
        Ok(offset + bytes.len() as u64)
    }

    async fn truncate_audit(&self, offset: u64) {
        let truncated = match tokio::fs::OpenOptions::new().write(true).open(&self.audit_path).await {
            Ok(file) => file.set_len(offset).await,
            Err(e) => Err(e),
        };
        if let Err(e) = truncated {
            tracing::error!(
                path = %self.audit_path.display(),
                offset,
                error = %e,
                "Failed to roll back audit log"
            );
        }
    }

    async fn write_snapshot(&self, table: &ToolTable, revision: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                WardenError::Storage(format!(
                    "failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let tools = table
            .list(&ToolFilter::any())
            .into_iter()
            .map(|mut tool| {
                tool.audit_log = Vec::new();
                tool
            })
            .collect();
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            revision,
            tools,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            WardenError::Storage(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            WardenError::Storage(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Write one committed change. On error nothing new is left on disk.
    async fn commit(&self, state: &mut FileState, records: &[AuditRecord]) -> Result<()> {
        let offset = self.append_audit(state.audit_offset, records).await?;
        let revision = state.revision + 1;
        if let Err(e) = self.write_snapshot(&state.table, revision).await {
            if offset != state.audit_offset {
                self.truncate_audit(state.audit_offset).await;
            }
            return Err(e);
        }
        state.audit_offset = offset;
        state.revision = revision;
        Ok(())
    }
}

fn new_audit_records(id: ToolId, next: &ToolDescriptor, previous_len: usize) -> Vec<AuditRecord> {
    next.audit_log
        .get(previous_len..)
        .unwrap_or_default()
        .iter()
        .map(|entry| AuditRecord {
            tool_id: id,
            entry: entry.clone(),
        })
        .collect()
}

#[async_trait]
impl ToolStore for FileToolStore {
    async fn insert(&self, tool: ToolDescriptor) -> Result<()> {
        let mut state = self.state.write().await;
        let _lock = self.acquire_lock(true).await?;
        self.refresh(&mut state).await?;

        let id = tool.id;
        let records = new_audit_records(id, &tool, 0);
        state.table.insert(tool)?;
        if let Err(e) = self.commit(&mut state, &records).await {
            state.table.remove(id);
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, id: ToolId) -> Result<Option<ToolDescriptor>> {
        Ok(self.state.read().await.table.tools.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ToolDescriptor>> {
        Ok(self.state.read().await.table.find_by_name(name).cloned())
    }

    async fn list(&self, filter: &ToolFilter) -> Result<Vec<ToolDescriptor>> {
        Ok(self.state.read().await.table.list(filter))
    }

    async fn update(&self, id: ToolId, mutation: ToolMutation) -> Result<ToolDescriptor> {
        let mut state = self.state.write().await;
        let _lock = self.acquire_lock(true).await?;
        self.refresh(&mut state).await?;

        let (next, previous) = state.table.update(id, mutation)?;
        let records = new_audit_records(id, &next, previous.audit_log.len());
        if let Err(e) = self.commit(&mut state, &records).await {
            state.table.restore(previous);
            return Err(e);
        }
        Ok(next)
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;
    use crate::config::GovernanceConfig;
    use crate::governance::descriptor::{AuditOutcome, ToolProposal};
    use crate::governance::CallerTier;
    use tempfile::tempdir;

    fn tool(name: &str, tier: ToolTier) -> ToolDescriptor {
        let proposal = ToolProposal::new(name, "A tool used in store tests", "npx tool-server", tier);
        ToolDescriptor::propose(proposal, "tester", &GovernanceConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_name_case_insensitive() {
        let store = InMemoryToolStore::new();
        store.insert(tool("Search", ToolTier::PreApproved)).await.unwrap();
        let err = store
            .insert(tool("search", ToolTier::Restricted))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::DuplicateName(_)));
        assert!(store.find_by_name("SEARCH").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_mutation_is_not_committed() {
        let store = InMemoryToolStore::new();
        let t = tool("files", ToolTier::Forbidden);
        let id = t.id;
        store.insert(t).await.unwrap();

        let err = store
            .update(id, Box::new(|t| t.approve("admin", None)))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::InvalidTransition(_)));
        assert_eq!(store.get(id).await.unwrap().unwrap().status, ToolStatus::Proposed);
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let store = InMemoryToolStore::new();
        let err = store
            .update(ToolId::new(), Box::new(|_| Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let store = InMemoryToolStore::new();
        let a = tool("alpha", ToolTier::PreApproved);
        let a_id = a.id;
        store.insert(a).await.unwrap();
        store.insert(tool("beta", ToolTier::Restricted)).await.unwrap();
        store
            .update(a_id, Box::new(|t| t.approve("admin", None)))
            .await
            .unwrap();

        assert_eq!(store.list(&ToolFilter::any()).await.unwrap().len(), 2);
        let approved = store
            .list(&ToolFilter::any().with_status(ToolStatus::Approved))
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].name, "alpha");
        let restricted = store
            .list(&ToolFilter::any().with_tier(ToolTier::Restricted))
            .await
            .unwrap();
        assert_eq!(restricted[0].name, "beta");
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("tools.json");

        let id = {
            let store = FileToolStore::open(&path).await.unwrap();
            let t = tool("persisted", ToolTier::PreApproved);
            let id = t.id;
            store.insert(t).await.unwrap();
            store
                .update(id, Box::new(|t| t.approve("admin", Some("vote-9".into()))))
                .await
                .unwrap();
            id
        };

        let reopened = FileToolStore::open(&path).await.unwrap();
        let loaded = reopened.get(id).await.unwrap().expect("tool persisted");
        assert_eq!(loaded.status, ToolStatus::Approved);
        assert_eq!(loaded.approval.unwrap().reference.as_deref(), Some("vote-9"));
        assert!(reopened
            .insert(tool("PERSISTED", ToolTier::PreApproved))
            .await
            .is_err());
    }

    fn entry(caller: &str) -> AuditEntry {
        AuditEntry {
            caller_id: caller.to_string(),
            caller_tier: CallerTier::Task,
            timestamp: chrono::Utc::now(),
            input_fingerprint: "0123456789abcdef".to_string(),
            capability: "run".to_string(),
            outcome: AuditOutcome::Success,
            latency_ms: 3,
        }
    }

    #[tokio::test]
    async fn test_file_store_handles_see_each_others_commits() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tools.json");
        let first = FileToolStore::open(&path).await.unwrap();
        let second = FileToolStore::open(&path).await.unwrap();

        let t = tool("shared", ToolTier::PreApproved);
        let id = t.id;
        first.insert(t).await.unwrap();
        second
            .update(id, Box::new(|t| t.approve("admin", None)))
            .await
            .unwrap();

        // the first handle still holds the proposed record in memory
        let err = first
            .update(id, Box::new(|t| t.reject("admin", "too late")))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::InvalidTransition(_)));
        assert_eq!(first.get(id).await.unwrap().unwrap().status, ToolStatus::Approved);

        assert!(matches!(
            second.insert(tool("SHARED", ToolTier::Restricted)).await,
            Err(WardenError::DuplicateName(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_interleaved_invocations_keep_every_entry() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tools.json");
        let first = FileToolStore::open(&path).await.unwrap();
        let second = FileToolStore::open(&path).await.unwrap();

        let t = tool("counted", ToolTier::PreApproved);
        let id = t.id;
        first.insert(t).await.unwrap();

        for round in 0..5 {
            let store = if round % 2 == 0 { &first } else { &second };
            let caller = format!("agent-{}", round);
            store
                .update(id, Box::new(move |t| {
                    t.record_invocation(entry(&caller), 3);
                    Ok(())
                }))
                .await
                .unwrap();
        }

        let last = first
            .update(id, Box::new(|t| {
                t.record_invocation(entry("agent-5"), 3);
                Ok(())
            }))
            .await
            .unwrap();
        assert_eq!(last.usage_count, 6);
        let callers: Vec<&str> = last.audit_log.iter().map(|e| e.caller_id.as_str()).collect();
        assert_eq!(
            callers,
            vec!["agent-0", "agent-1", "agent-2", "agent-3", "agent-4", "agent-5"]
        );
    }

    #[tokio::test]
    async fn test_audit_log_lives_beside_snapshot() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tools.json");

        let id = {
            let store = FileToolStore::open(&path).await.unwrap();
            let t = tool("audited", ToolTier::PreApproved);
            let id = t.id;
            store.insert(t).await.unwrap();
            for caller in ["a", "b"] {
                store
                    .update(id, Box::new(move |t| {
                        t.record_invocation(entry(caller), 3);
                        Ok(())
                    }))
                    .await
                    .unwrap();
            }
            assert_eq!(store.audit_path(), dir.path().join("tools.audit.jsonl"));
            id
        };

        let snapshot: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(snapshot["revision"], 3);
        assert_eq!(snapshot["tools"][0]["usage_count"], 2);
        assert_eq!(snapshot["tools"][0]["audit_log"], serde_json::json!([]));

        let log = std::fs::read_to_string(dir.path().join("tools.audit.jsonl")).unwrap();
        assert_eq!(log.lines().count(), 2);

        let reopened = FileToolStore::open(&path).await.unwrap();
        let loaded = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.audit_log.len(), 2);
        assert_eq!(loaded.audit_log[1].caller_id, "b");
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_rolls_back_audit_line() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tools.json");
        let store = FileToolStore::open(&path).await.unwrap();
        let t = tool("fragile", ToolTier::PreApproved);
        let id = t.id;
        store.insert(t).await.unwrap();

        // a directory squatting on the temp path makes the snapshot write fail
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();
        let err = store
            .update(id, Box::new(|t| {
                t.record_invocation(entry("agent"), 3);
                Ok(())
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Storage(_)));

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 0);
        assert!(stored.audit_log.is_empty());
        let log = std::fs::read_to_string(store.audit_path()).unwrap_or_default();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tools.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        assert!(matches!(
            FileToolStore::open(&path).await,
            Err(WardenError::Storage(_))
        ));
    }
}

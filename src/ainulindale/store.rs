//! Persistence Capability
//!
//! The engine treats storage as an opaque key-value capability: boards,
//! placed entities, connections, rulefiles, and settings are saved and
//! loaded by id, and reads after writes are strongly consistent. Real
//! deployments inject their own [`BoardStore`]; [`MemoryStore`] backs
//! tests and demos.
//!
//! Entity saves are debounced: board mutations mark entities dirty on the
//! [`DebouncedSaver`], which coalesces writes within the debounce window
//! and flushes everything still pending when the board stops.

use crate::ainulindale::board::{BoardSnapshot, Connection, Entity};
use crate::ainulindale::rulefile::Rulefile;
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Failures reported by the storage backend.
#[derive(Debug, Clone)]
pub enum StoreError {
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(msg) => write!(f, "Store backend error: {}", msg),
        }
    }
}

impl Error for StoreError {}

/// Opaque CRUD over boards, entities, connections, rulefiles, settings.
#[async_trait]
pub trait BoardStore: Send + Sync {
    async fn load_board(&self, board_id: &str) -> Result<Option<BoardSnapshot>, StoreError>;

    async fn save_board(&self, snapshot: &BoardSnapshot) -> Result<(), StoreError>;

    async fn save_entity(
        &self,
        board_id: &str,
        hex_key: &str,
        entity: &Entity,
    ) -> Result<(), StoreError>;

    async fn save_connection(
        &self,
        board_id: &str,
        connection: &Connection,
    ) -> Result<(), StoreError>;

    async fn load_rulefiles(&self) -> Result<Vec<Rulefile>, StoreError>;

    async fn save_rulefile(&self, rulefile: &Rulefile) -> Result<(), StoreError>;

    async fn load_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn save_setting(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    boards: HashMap<String, BoardSnapshot>,
    entities: HashMap<String, (String, Entity)>,
    connections: HashMap<String, Connection>,
    rulefiles: HashMap<String, Rulefile>,
    settings: HashMap<String, serde_json::Value>,
    entity_saves: u64,
}

/// In-memory [`BoardStore`] for tests and demos.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entity saves performed, for asserting debounce behavior.
    pub fn entity_save_count(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).entity_saves
    }

    /// Last saved copy of an entity, if any.
    pub fn saved_entity(&self, entity_id: &str) -> Option<Entity> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entities.get(entity_id).map(|(_, e)| e.clone())
    }
}

#[async_trait]
impl BoardStore for MemoryStore {
    async fn load_board(&self, board_id: &str) -> Result<Option<BoardSnapshot>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.boards.get(board_id).cloned())
    }

    async fn save_board(&self, snapshot: &BoardSnapshot) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.boards.insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn save_entity(
        &self,
        _board_id: &str,
        hex_key: &str,
        entity: &Entity,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entities.insert(
            entity.id().to_string(),
            (hex_key.to_string(), entity.clone()),
        );
        state.entity_saves += 1;
        Ok(())
    }

    async fn save_connection(
        &self,
        _board_id: &str,
        connection: &Connection,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .connections
            .insert(connection.id.clone(), connection.clone());
        Ok(())
    }

    async fn load_rulefiles(&self) -> Result<Vec<Rulefile>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut rulefiles: Vec<Rulefile> = state.rulefiles.values().cloned().collect();
        rulefiles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rulefiles)
    }

    async fn save_rulefile(&self, rulefile: &Rulefile) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .rulefiles
            .insert(rulefile.id.clone(), rulefile.clone());
        Ok(())
    }

    async fn load_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.settings.get(key).cloned())
    }

    async fn save_setting(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.settings.insert(key.to_string(), value);
        Ok(())
    }
}

struct PendingSave {
    hex_key: String,
    entity: Entity,
    seq: u64,
}

/// Coalesces entity saves within a debounce window.
pub struct DebouncedSaver {
    store: Arc<dyn BoardStore>,
    board_id: String,
    delay: Duration,
    pending: Mutex<HashMap<String, PendingSave>>,
    next_seq: AtomicU64,
}

impl DebouncedSaver {
    pub fn new(store: Arc<dyn BoardStore>, board_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            store,
            board_id: board_id.into(),
            delay,
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Record a dirty entity; it is written after the debounce window
    /// unless a newer mark supersedes it first.
    pub fn mark_dirty(self: &Arc<Self>, hex_key: impl Into<String>, entity: Entity) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entity_id = entity.id().to_string();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(
                entity_id.clone(),
                PendingSave {
                    hex_key: hex_key.into(),
                    entity,
                    seq,
                },
            );
        }

        let saver = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(saver.delay).await;
            let due = {
                let mut pending = saver.pending.lock().unwrap_or_else(|e| e.into_inner());
                match pending.get(&entity_id) {
                    // Only the newest mark for an entity writes.
                    Some(p) if p.seq == seq => pending.remove(&entity_id),
                    _ => None,
                }
            };
            if let Some(save) = due {
                if let Err(e) = saver
                    .store
                    .save_entity(&saver.board_id, &save.hex_key, &save.entity)
                    .await
                {
                    log::error!("store: debounced save of {} failed: {}", save.entity.id(), e);
                }
            }
        });
    }

    /// Write every pending save immediately (board stop).
    pub async fn flush(&self) {
        let due: Vec<PendingSave> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().map(|(_, save)| save).collect()
        };
        for save in due {
            if let Err(e) = self
                .store
                .save_entity(&self.board_id, &save.hex_key, &save.entity)
                .await
            {
                log::error!("store: flush of {} failed: {}", save.entity.id(), e);
            }
        }
    }

    /// Number of saves still waiting for their window.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ainulindale::board::AgentEntity;

    fn agent(id: &str, cost: f64) -> Entity {
        let mut agent = AgentEntity::new(id, id);
        agent.cost = cost;
        Entity::Agent(agent)
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let snapshot = BoardSnapshot {
            id: "b1".to_string(),
            name: "Board".to_string(),
            radius: 2,
            placements: Vec::new(),
            connections: Vec::new(),
        };
        store.save_board(&snapshot).await.unwrap();
        let loaded = store.load_board("b1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Board");
        assert!(store.load_board("missing").await.unwrap().is_none());

        store
            .save_setting("theme", serde_json::json!("dark"))
            .await
            .unwrap();
        assert_eq!(
            store.load_setting("theme").await.unwrap().unwrap(),
            serde_json::json!("dark")
        );
    }

    #[tokio::test]
    async fn test_debounce_coalesces_rapid_marks() {
        let store = Arc::new(MemoryStore::new());
        let saver = Arc::new(DebouncedSaver::new(
            store.clone(),
            "b1",
            Duration::from_millis(50),
        ));

        saver.mark_dirty("0,0", agent("a1", 1.0));
        saver.mark_dirty("0,0", agent("a1", 2.0));
        saver.mark_dirty("0,0", agent("a1", 3.0));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.entity_save_count(), 1);
        let saved = store.saved_entity("a1").unwrap();
        assert!((saved.cost() - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_flush_writes_pending_immediately() {
        let store = Arc::new(MemoryStore::new());
        let saver = Arc::new(DebouncedSaver::new(
            store.clone(),
            "b1",
            Duration::from_secs(60), // window far longer than the test
        ));
        saver.mark_dirty("0,0", agent("a1", 1.0));
        saver.mark_dirty("1,0", agent("a2", 2.0));
        assert_eq!(saver.pending_count(), 2);

        saver.flush().await;
        assert_eq!(saver.pending_count(), 0);
        assert_eq!(store.entity_save_count(), 2);
        assert!(store.saved_entity("a2").is_some());
    }
}

// Per-session conversation memory


use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::MemoryConfig;

/// One answered exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

impl ConversationTurn {
    #[inline]
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Ordered turns of a single session, oldest first.
///
/// With a limit set, appending beyond it evicts the oldest turn so prompts stay bounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
    max_turns: Option<usize>,
}

impl ConversationMemory {
    #[inline]
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns.min(32)),
            max_turns: Some(max_turns.max(1)),
        }
    }

    #[inline]
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[inline]
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.max_turns)
    }

    #[inline]
    pub fn append(&mut self, turn: ConversationTurn) {
        if let Some(limit) = self.max_turns {
            while self.turns.len() >= limit {
                self.turns.pop_front();
            }
        }
        self.turns.push_back(turn);
    }

    /// Copy of the stored turns, most recent last
    #[inline]
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[inline]
    pub fn max_turns(&self) -> Option<usize> {
        self.max_turns
    }
}

/// Serialize turns as `Human:`/`AI:` lines for the prompt's history slot
#[inline]
pub fn format_history(turns: &[ConversationTurn]) -> String {
    let mut history = String::new();
    for turn in turns {
        if !history.is_empty() {
            history.push('\n');
        }
        let _ = write!(history, "Human: {}\nAI: {}", turn.question, turn.answer);
    }
    history
}

pub type SharedMemory = Arc<Mutex<ConversationMemory>>;

#[derive(Debug)]
struct SessionEntry {
    memory: SharedMemory,
    last_used: AtomicU64,
}

/// Memories keyed by session id.
///
/// Each session sits behind its own mutex; callers hold it for a whole answer so turns
/// within one session are appended in order while other sessions run in parallel.
/// Once `max_sessions` is reached, starting a new session drops the least recently used one.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    clock: AtomicU64,
    max_turns: Option<usize>,
    max_sessions: Option<usize>,
}

impl SessionStore {
    #[inline]
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            sessions: RwLock::default(),
            clock: AtomicU64::new(0),
            max_turns: Some(config.max_turns),
            max_sessions: Some(config.max_sessions.max(1)),
        }
    }

    #[inline]
    pub fn unbounded() -> Self {
        Self {
            sessions: RwLock::default(),
            clock: AtomicU64::new(0),
            max_turns: None,
            max_sessions: None,
        }
    }

    fn fresh_memory(&self) -> ConversationMemory {
        self.max_turns
            .map_or_else(ConversationMemory::unbounded, ConversationMemory::new)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Memory for `session_id`, created empty on first use
    #[inline]
    pub async fn session(&self, session_id: &str) -> SharedMemory {
        let cached = self.sessions.read().await.get(session_id).map(|entry| {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            Arc::clone(&entry.memory)
        });
        if let Some(existing) = cached {
            return existing;
        }

        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(session_id) {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            return Arc::clone(&entry.memory);
        }

        if let Some(limit) = self.max_sessions {
            while sessions.len() >= limit {
                let oldest = sessions
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                    .map(|(id, _)| id.clone());
                let Some(oldest) = oldest else { break };
                debug!("Dropping least recently used session {}", oldest);
                sessions.remove(&oldest);
            }
        }

        debug!("Starting conversation memory for session {}", session_id);
        let memory = Arc::new(Mutex::new(self.fresh_memory()));
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                memory: Arc::clone(&memory),
                last_used: AtomicU64::new(self.tick()),
            },
        );
        memory
    }

    /// Empty a session's memory, returning whether it existed
    #[inline]
    pub async fn clear_session(&self, session_id: &str) -> bool {
        let existing = self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| Arc::clone(&entry.memory));
        match existing {
            Some(memory) => {
                memory.lock().await.clear();
                true
            }
            None => false,
        }
    }

    #[inline]
    pub async fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    #[inline]
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[inline]
    pub async fn contains_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }
}

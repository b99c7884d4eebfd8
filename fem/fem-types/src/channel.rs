//! Communication channel for persisting and distributing model state.
//!
//! Objects write themselves as a sequence of [`Payload`]s keyed by a
//! database tag and a commit tag. Integer payloads ([`Payload::Id`]) carry
//! small metadata slots (tags, counts, the change stamp, a format version);
//! float payloads ([`Payload::Vector`]) carry numeric state, and
//! [`Payload::Document`] carries a JSON-encoded object graph for full
//! topology transfers. The receiving side pops payloads in the order they
//! were sent.
//!
//! [`MemoryChannel`] keeps everything in memory, but round-trips every
//! payload through JSON so the same code path a wire transport would use is
//! exercised.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::FemError;

/// Format version written into the first metadata slot of every object.
pub const FORMAT_VERSION: i64 = 1;

/// One unit of data exchanged over a [`Channel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Integer metadata.
    Id(Vec<i64>),
    /// Floating point data.
    Vector(Vec<f64>),
    /// JSON document.
    Document(String),
}

impl Payload {
    /// Unwrap an integer payload.
    pub fn into_id(self) -> crate::Result<Vec<i64>> {
        match self {
            Self::Id(id) => Ok(id),
            _ => Err(FemError::serialization("expected ID payload")),
        }
    }

    /// Unwrap a float payload.
    pub fn into_vector(self) -> crate::Result<Vec<f64>> {
        match self {
            Self::Vector(v) => Ok(v),
            _ => Err(FemError::serialization("expected vector payload")),
        }
    }

    /// Encode `value` as a document payload.
    pub fn document<T: Serialize>(value: &T) -> crate::Result<Self> {
        serde_json::to_string(value)
            .map(Self::Document)
            .map_err(|e| FemError::serialization(e.to_string()))
    }

    /// Decode a document payload.
    pub fn into_document<T: serde::de::DeserializeOwned>(self) -> crate::Result<T> {
        match self {
            Self::Document(text) => {
                serde_json::from_str(&text).map_err(|e| FemError::serialization(e.to_string()))
            }
            _ => Err(FemError::serialization("expected document payload")),
        }
    }
}

/// Paired send / receive transport.
pub trait Channel {
    /// Queue a payload under `(db_tag, commit_tag)`.
    fn send(&mut self, db_tag: i32, commit_tag: i32, payload: &Payload) -> crate::Result<()>;

    /// Pop the oldest payload queued under `(db_tag, commit_tag)`.
    fn recv(&mut self, db_tag: i32, commit_tag: i32) -> crate::Result<Payload>;
}

/// In-memory channel storing JSON-encoded payloads.
#[derive(Debug, Default, Clone)]
pub struct MemoryChannel {
    queues: HashMap<(i32, i32), VecDeque<String>>,
}

impl MemoryChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads waiting to be received.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, db_tag: i32, commit_tag: i32, payload: &Payload) -> crate::Result<()> {
        let encoded =
            serde_json::to_string(payload).map_err(|e| FemError::serialization(e.to_string()))?;
        self.queues
            .entry((db_tag, commit_tag))
            .or_default()
            .push_back(encoded);
        Ok(())
    }

    fn recv(&mut self, db_tag: i32, commit_tag: i32) -> crate::Result<Payload> {
        let encoded = self
            .queues
            .get_mut(&(db_tag, commit_tag))
            .and_then(VecDeque::pop_front)
            .ok_or(FemError::ChannelEmpty { db_tag, commit_tag })?;
        serde_json::from_str(&encoded).map_err(|e| FemError::serialization(e.to_string()))
    }
}

/// Check the version slot of a received metadata vector.
pub fn check_version(id: &[i64]) -> crate::Result<()> {
    match id.first() {
        Some(&found) if found == FORMAT_VERSION => Ok(()),
        Some(&found) => Err(FemError::VersionMismatch {
            expected: FORMAT_VERSION,
            found,
        }),
        None => Err(FemError::serialization("empty metadata payload")),
    }
}

/// Read a metadata slot, failing if the vector is too short.
pub fn slot(id: &[i64], index: usize) -> crate::Result<i64> {
    id.get(index)
        .copied()
        .ok_or_else(|| FemError::serialization(format!("metadata slot {index} missing")))
}

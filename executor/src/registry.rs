//! Kind-keyed decoders that turn persisted task payloads back into live tasks.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{RegistryError, Task};

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Task>, serde_json::Error>;

/// A task payload tagged with the registry key needed to decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedTask {
    pub kind: String,
    #[serde(with = "hex::serde")]
    pub raw: Vec<u8>,
}

#[derive(Default)]
pub struct TaskRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `kind`, which must match what `T::kind` returns.
    pub fn register<T>(&mut self, kind: &'static str) -> &mut Self
    where
        T: Task + DeserializeOwned,
    {
        self.decoders.insert(kind, decode::<T>);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn wrap_task(&self, task: &dyn Task) -> Result<WrappedTask, RegistryError> {
        let kind = task.kind();
        if !self.contains(kind) {
            return Err(RegistryError::NotRegistered(kind.to_string()));
        }
        let raw = task.encode_task().map_err(|e| RegistryError::Codec {
            kind: kind.to_string(),
            reason: e.to_string(),
        })?;
        Ok(WrappedTask {
            kind: kind.to_string(),
            raw,
        })
    }

    pub fn unwrap_task(&self, wrapped: &WrappedTask) -> Result<Box<dyn Task>, RegistryError> {
        let decode = self
            .decoders
            .get(wrapped.kind.as_str())
            .ok_or_else(|| RegistryError::NotRegistered(wrapped.kind.clone()))?;
        decode(&wrapped.raw).map_err(|e| RegistryError::Codec {
            kind: wrapped.kind.clone(),
            reason: e.to_string(),
        })
    }
}

fn decode<T>(raw: &[u8]) -> Result<Box<dyn Task>, serde_json::Error>
where
    T: Task + DeserializeOwned,
{
    Ok(Box::new(serde_json::from_slice::<T>(raw)?))
}

//! Shared key/hash-map store used as the job registry.
//!
//! Workers never share memory; everything they need to know about another
//! stage goes through a [`SharedState`] implementation.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryStore;

#[async_trait]
pub trait SharedState: Send + Sync {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Remove one field of the hash at `key`. Missing fields are not an error.
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;

    /// Remove the whole hash stored at `key`. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

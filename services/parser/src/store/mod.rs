//! Persistence capability consumed by the resolver
//!
//! Find-by-natural-key plus stage-new for each dimension, stage for facts,
//! and an atomic commit of everything staged since the last commit.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::model::{Chapter, Country, Subchapter, Value, Variable};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub chapters: i64,
    pub subchapters: i64,
    pub variables: i64,
    pub countries: i64,
    pub values: i64,
}

#[async_trait]
pub trait AmecoStore: Send {
    async fn find_chapter(&mut self, name: &str) -> Result<Option<Chapter>>;
    async fn stage_chapter(&mut self, chapter: &Chapter) -> Result<()>;

    async fn find_subchapter(&mut self, chapter_id: Uuid, name: &str) -> Result<Option<Subchapter>>;
    async fn stage_subchapter(&mut self, subchapter: &Subchapter) -> Result<()>;

    async fn find_variable(&mut self, code: &str) -> Result<Option<Variable>>;
    async fn stage_variable(&mut self, variable: &Variable) -> Result<()>;

    async fn find_country(&mut self, code: &str) -> Result<Option<Country>>;
    async fn stage_country(&mut self, country: &Country) -> Result<()>;

    /// Stage a fact. Returns `false` if a fact with the same natural key
    /// already exists; nothing is staged in that case.
    async fn stage_value(&mut self, value: &Value) -> Result<bool>;

    /// Apply everything staged since the last commit, all or nothing
    async fn commit(&mut self) -> Result<()>;

    /// Discard everything staged since the last commit
    async fn rollback(&mut self);

    async fn counts(&mut self) -> Result<TableCounts>;
}

//! Get-or-create resolution of one mapped row
//!
//! Each row is its own unit of work: dimensions and facts are staged, then
//! committed together. On any failure the store is rolled back and the error
//! is returned to the caller.

use crate::model::{Chapter, Country, MappedRow, Subchapter, Value, Variable};
use crate::store::AmecoStore;
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Facts written by one row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowWrite {
    pub values_inserted: usize,
    pub values_existing: usize,
}

/// Natural key -> id maps, valid for the lifetime of one resolver
#[derive(Debug, Default, Clone)]
struct DimensionCache {
    chapters: HashMap<String, Uuid>,
    subchapters: HashMap<(Uuid, String), Uuid>,
    variables: HashMap<String, Uuid>,
    countries: HashMap<String, Uuid>,
}

impl DimensionCache {
    fn merge(&mut self, other: DimensionCache) {
        self.chapters.extend(other.chapters);
        self.subchapters.extend(other.subchapters);
        self.variables.extend(other.variables);
        self.countries.extend(other.countries);
    }
}

pub struct EntityResolver<S> {
    store: S,
    cache: DimensionCache,
}

impl<S: AmecoStore> EntityResolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: DimensionCache::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Persist one row. Nothing from the row remains staged on error.
    pub async fn resolve(&mut self, row: &MappedRow) -> Result<RowWrite> {
        let mut seen = DimensionCache::default();
        match self.stage_row(row, &mut seen).await {
            Ok(write) => {
                self.cache.merge(seen);
                Ok(write)
            }
            Err(e) => {
                self.store.rollback().await;
                Err(e)
            }
        }
    }

    async fn stage_row(&mut self, row: &MappedRow, seen: &mut DimensionCache) -> Result<RowWrite> {
        let chapter_id = self.chapter_id(&row.chapter_name, seen).await?;
        let subchapter_id = self
            .subchapter_id(chapter_id, &row.subchapter_name, seen)
            .await?;
        let variable_id = self.variable_id(row, subchapter_id, seen).await?;
        let country_id = self
            .country_id(&row.country_code, &row.country_name, seen)
            .await?;

        let mut write = RowWrite::default();
        for yv in &row.values {
            let value = Value::yearly(variable_id, country_id, yv.year, yv.amount.clone());
            if self.store.stage_value(&value).await? {
                write.values_inserted += 1;
            } else {
                write.values_existing += 1;
            }
        }

        self.store
            .commit()
            .await
            .with_context(|| format!("commit failed for variable '{}'", row.variable_code))?;

        debug!(
            variable = %row.variable_code,
            country = %row.country_code,
            inserted = write.values_inserted,
            existing = write.values_existing,
            "row committed"
        );
        Ok(write)
    }

    async fn chapter_id(&mut self, name: &str, seen: &mut DimensionCache) -> Result<Uuid> {
        if let Some(&id) = self.cache.chapters.get(name) {
            return Ok(id);
        }
        let id = match self.store.find_chapter(name).await? {
            Some(existing) => existing.id,
            None => {
                let chapter = Chapter::new(name);
                self.store.stage_chapter(&chapter).await?;
                debug!(chapter = name, "new chapter");
                chapter.id
            }
        };
        seen.chapters.insert(name.to_string(), id);
        Ok(id)
    }

    async fn subchapter_id(
        &mut self,
        chapter_id: Uuid,
        name: &str,
        seen: &mut DimensionCache,
    ) -> Result<Uuid> {
        let key = (chapter_id, name.to_string());
        if let Some(&id) = self.cache.subchapters.get(&key) {
            return Ok(id);
        }
        let id = match self.store.find_subchapter(chapter_id, name).await? {
            Some(existing) => existing.id,
            None => {
                let subchapter = Subchapter::new(chapter_id, name);
                self.store.stage_subchapter(&subchapter).await?;
                debug!(subchapter = name, "new subchapter");
                subchapter.id
            }
        };
        seen.subchapters.insert(key, id);
        Ok(id)
    }

    /// Existing variables are reused as-is; name and unit are never updated
    async fn variable_id(
        &mut self,
        row: &MappedRow,
        subchapter_id: Uuid,
        seen: &mut DimensionCache,
    ) -> Result<Uuid> {
        if let Some(&id) = self.cache.variables.get(&row.variable_code) {
            return Ok(id);
        }
        let id = match self.store.find_variable(&row.variable_code).await? {
            Some(existing) => existing.id,
            None => {
                let variable = Variable {
                    id: Uuid::new_v4(),
                    code: row.variable_code.clone(),
                    name: row.variable_name.clone(),
                    unit_code: row.unit_code.clone(),
                    unit_description: row.unit_description.clone(),
                    subchapter_id,
                    trn_code: row.trn.clone(),
                    agg_code: row.agg.clone(),
                    ref_code: row.reference.clone(),
                };
                self.store.stage_variable(&variable).await?;
                debug!(variable = %variable.code, "new variable");
                variable.id
            }
        };
        seen.variables.insert(row.variable_code.clone(), id);
        Ok(id)
    }

    async fn country_id(&mut self, code: &str, name: &str, seen: &mut DimensionCache) -> Result<Uuid> {
        if let Some(&id) = self.cache.countries.get(code) {
            return Ok(id);
        }
        let id = match self.store.find_country(code).await? {
            Some(existing) => existing.id,
            None => {
                let country = Country::new(code, name);
                self.store.stage_country(&country).await?;
                debug!(country = code, "new country");
                country.id
            }
        };
        seen.countries.insert(code.to_string(), id);
        Ok(id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! In-memory store for dry runs and tests
//!
//! Staged rows sit in a pending buffer until `commit`, which validates
//! natural-key uniqueness and references before applying them all at once.

use super::{AmecoStore, TableCounts};
use crate::model::{Chapter, Country, Subchapter, Value, Variable};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

type ValueKey = (Uuid, Uuid, i32, Option<i32>);

#[derive(Debug, Default, Clone)]
struct Tables {
    chapters: Vec<Chapter>,
    subchapters: Vec<Subchapter>,
    variables: Vec<Variable>,
    countries: Vec<Country>,
    values: Vec<Value>,
}

impl Tables {
    fn clear(&mut self) {
        *self = Tables::default();
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: Tables,
    pending: Tables,
    value_keys: HashSet<ValueKey>,
    rejected_variables: HashSet<String>,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any commit containing a variable with this code fail.
    /// Used to exercise the rollback path.
    pub fn reject_variable(&mut self, code: &str) {
        self.rejected_variables.insert(code.to_string());
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.committed.chapters
    }

    pub fn subchapters(&self) -> &[Subchapter] {
        &self.committed.subchapters
    }

    pub fn variables(&self) -> &[Variable] {
        &self.committed.variables
    }

    pub fn countries(&self) -> &[Country] {
        &self.committed.countries
    }

    pub fn values(&self) -> &[Value] {
        &self.committed.values
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    fn has_pending(&self) -> bool {
        let p = &self.pending;
        !(p.chapters.is_empty()
            && p.subchapters.is_empty()
            && p.variables.is_empty()
            && p.countries.is_empty()
            && p.values.is_empty())
    }

    fn all_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.committed.chapters.iter().chain(&self.pending.chapters)
    }

    fn all_subchapters(&self) -> impl Iterator<Item = &Subchapter> {
        self.committed.subchapters.iter().chain(&self.pending.subchapters)
    }

    fn all_variables(&self) -> impl Iterator<Item = &Variable> {
        self.committed.variables.iter().chain(&self.pending.variables)
    }

    fn all_countries(&self) -> impl Iterator<Item = &Country> {
        self.committed.countries.iter().chain(&self.pending.countries)
    }

    /// Checks the merged state the commit would produce
    fn validate_pending(&self) -> Result<()> {
        let mut names = HashSet::new();
        for c in self.all_chapters() {
            if !names.insert(c.name.as_str()) {
                bail!("duplicate chapter '{}'", c.name);
            }
        }
        let chapter_ids: HashSet<Uuid> = self.all_chapters().map(|c| c.id).collect();

        let mut keys = HashSet::new();
        for s in self.all_subchapters() {
            if !chapter_ids.contains(&s.chapter_id) {
                bail!("subchapter '{}' references unknown chapter", s.name);
            }
            if !keys.insert((s.chapter_id, s.name.as_str())) {
                bail!("duplicate subchapter '{}'", s.name);
            }
        }
        let subchapter_ids: HashSet<Uuid> = self.all_subchapters().map(|s| s.id).collect();

        let mut codes = HashSet::new();
        for v in self.all_variables() {
            if self.rejected_variables.contains(&v.code) {
                bail!("variable '{}' rejected by store", v.code);
            }
            if !subchapter_ids.contains(&v.subchapter_id) {
                bail!("variable '{}' references unknown subchapter", v.code);
            }
            if !codes.insert(v.code.as_str()) {
                bail!("duplicate variable '{}'", v.code);
            }
        }
        let variable_ids: HashSet<Uuid> = self.all_variables().map(|v| v.id).collect();

        let mut codes = HashSet::new();
        for c in self.all_countries() {
            if !codes.insert(c.code.as_str()) {
                bail!("duplicate country '{}'", c.code);
            }
        }
        let country_ids: HashSet<Uuid> = self.all_countries().map(|c| c.id).collect();

        for v in &self.pending.values {
            if !variable_ids.contains(&v.variable_id) || !country_ids.contains(&v.country_id) {
                bail!("value for year {} references unknown variable or country", v.year);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AmecoStore for MemoryStore {
    async fn find_chapter(&mut self, name: &str) -> Result<Option<Chapter>> {
        Ok(self.all_chapters().find(|c| c.name == name).cloned())
    }

    async fn stage_chapter(&mut self, chapter: &Chapter) -> Result<()> {
        self.pending.chapters.push(chapter.clone());
        Ok(())
    }

    async fn find_subchapter(&mut self, chapter_id: Uuid, name: &str) -> Result<Option<Subchapter>> {
        Ok(self
            .all_subchapters()
            .find(|s| s.chapter_id == chapter_id && s.name == name)
            .cloned())
    }

    async fn stage_subchapter(&mut self, subchapter: &Subchapter) -> Result<()> {
        self.pending.subchapters.push(subchapter.clone());
        Ok(())
    }

    async fn find_variable(&mut self, code: &str) -> Result<Option<Variable>> {
        Ok(self.all_variables().find(|v| v.code == code).cloned())
    }

    async fn stage_variable(&mut self, variable: &Variable) -> Result<()> {
        self.pending.variables.push(variable.clone());
        Ok(())
    }

    async fn find_country(&mut self, code: &str) -> Result<Option<Country>> {
        Ok(self.all_countries().find(|c| c.code == code).cloned())
    }

    async fn stage_country(&mut self, country: &Country) -> Result<()> {
        self.pending.countries.push(country.clone());
        Ok(())
    }

    async fn stage_value(&mut self, value: &Value) -> Result<bool> {
        let key = value.natural_key();
        let pending_dup = self.pending.values.iter().any(|v| v.natural_key() == key);
        if self.value_keys.contains(&key) || pending_dup {
            return Ok(false);
        }
        self.pending.values.push(value.clone());
        Ok(true)
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.has_pending() {
            return Ok(());
        }
        if let Err(e) = self.validate_pending() {
            self.pending.clear();
            return Err(e);
        }

        let pending = std::mem::take(&mut self.pending);
        self.value_keys
            .extend(pending.values.iter().map(Value::natural_key));
        self.committed.chapters.extend(pending.chapters);
        self.committed.subchapters.extend(pending.subchapters);
        self.committed.variables.extend(pending.variables);
        self.committed.countries.extend(pending.countries);
        self.committed.values.extend(pending.values);
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) {
        self.pending.clear();
    }

    async fn counts(&mut self) -> Result<TableCounts> {
        let c = &self.committed;
        Ok(TableCounts {
            chapters: c.chapters.len() as i64,
            subchapters: c.subchapters.len() as i64,
            variables: c.variables.len() as i64,
            countries: c.countries.len() as i64,
            values: c.values.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn seed(store: &mut MemoryStore) -> (Chapter, Subchapter, Variable, Country) {
        let chapter = Chapter::new("Population");
        let sub = Subchapter::new(chapter.id, "01 Population");
        let var = Variable {
            id: Uuid::new_v4(),
            code: "NPTD".to_string(),
            name: "Total population".to_string(),
            unit_code: "0".to_string(),
            unit_description: "1000 persons".to_string(),
            subchapter_id: sub.id,
            trn_code: None,
            agg_code: None,
            ref_code: None,
        };
        let country = Country::new("DE", "Germany");
        store.pending.chapters.push(chapter.clone());
        store.pending.subchapters.push(sub.clone());
        store.pending.variables.push(var.clone());
        store.pending.countries.push(country.clone());
        (chapter, sub, var, country)
    }

    #[tokio::test]
    async fn test_staged_rows_visible_before_commit_but_not_committed() {
        let mut store = MemoryStore::new();
        let (chapter, ..) = seed(&mut store);

        assert_eq!(store.find_chapter("Population").await.unwrap(), Some(chapter));
        assert!(store.chapters().is_empty());

        store.commit().await.unwrap();
        assert_eq!(store.chapters().len(), 1);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_pending() {
        let mut store = MemoryStore::new();
        seed(&mut store);
        store.rollback().await;
        store.commit().await.unwrap();

        assert_eq!(store.counts().await.unwrap(), TableCounts::default());
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_value_is_not_staged() {
        let mut store = MemoryStore::new();
        let (_, _, var, country) = seed(&mut store);
        let v = Value::yearly(var.id, country.id, 2020, BigDecimal::from(1));
        let again = Value::yearly(var.id, country.id, 2020, BigDecimal::from(2));

        assert!(store.stage_value(&v).await.unwrap());
        assert!(!store.stage_value(&again).await.unwrap());
        store.commit().await.unwrap();
        assert!(!store.stage_value(&again).await.unwrap());
        assert_eq!(store.values().len(), 1);
    }

    #[tokio::test]
    async fn test_dangling_reference_fails_commit_atomically() {
        let mut store = MemoryStore::new();
        let orphan = Subchapter::new(Uuid::new_v4(), "orphan");
        store.stage_chapter(&Chapter::new("X")).await.unwrap();
        store.stage_subchapter(&orphan).await.unwrap();

        assert!(store.commit().await.is_err());
        assert!(store.chapters().is_empty());
        assert!(store.find_chapter("X").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_variable_fails_commit() {
        let mut store = MemoryStore::new();
        store.reject_variable("NPTD");
        seed(&mut store);

        let err = store.commit().await.unwrap_err();
        assert!(err.to_string().contains("NPTD"));
        assert_eq!(store.counts().await.unwrap(), TableCounts::default());
    }
}

//! Postgres store
//!
//! A transaction is opened lazily by the first call after a commit or
//! rollback; staging inserts inside it, commit issues COMMIT. Dropping the
//! store with an open transaction rolls it back.

use super::{AmecoStore, TableCounts};
use crate::model::{Chapter, Country, Subchapter, Value, Variable};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;
use uuid::Uuid;

pub struct PgStore {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    async fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        if self.tx.is_none() {
            let tx = self.pool.begin().await.context("Failed to begin transaction")?;
            self.tx = Some(tx);
        }
        self.tx.as_mut().context("transaction not open")
    }
}

#[async_trait]
impl AmecoStore for PgStore {
    async fn find_chapter(&mut self, name: &str) -> Result<Option<Chapter>> {
        let tx = self.tx().await?;
        let chapter = sqlx::query_as::<_, Chapter>("SELECT id, name FROM chapters WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(chapter)
    }

    async fn stage_chapter(&mut self, chapter: &Chapter) -> Result<()> {
        let tx = self.tx().await?;
        sqlx::query("INSERT INTO chapters (id, name) VALUES ($1, $2)")
            .bind(chapter.id)
            .bind(&chapter.name)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("insert chapter '{}'", chapter.name))?;
        Ok(())
    }

    async fn find_subchapter(&mut self, chapter_id: Uuid, name: &str) -> Result<Option<Subchapter>> {
        let tx = self.tx().await?;
        let subchapter = sqlx::query_as::<_, Subchapter>(
            "SELECT id, name, chapter_id FROM subchapters WHERE chapter_id = $1 AND name = $2",
        )
        .bind(chapter_id)
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(subchapter)
    }

    async fn stage_subchapter(&mut self, subchapter: &Subchapter) -> Result<()> {
        let tx = self.tx().await?;
        sqlx::query("INSERT INTO subchapters (id, name, chapter_id) VALUES ($1, $2, $3)")
            .bind(subchapter.id)
            .bind(&subchapter.name)
            .bind(subchapter.chapter_id)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("insert subchapter '{}'", subchapter.name))?;
        Ok(())
    }

    async fn find_variable(&mut self, code: &str) -> Result<Option<Variable>> {
        let tx = self.tx().await?;
        let variable = sqlx::query_as::<_, Variable>(
            r#"
            SELECT id, code, name, unit_code, unit_description, subchapter_id,
                   trn_code, agg_code, ref_code
            FROM variables
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(variable)
    }

    async fn stage_variable(&mut self, variable: &Variable) -> Result<()> {
        let tx = self.tx().await?;
        sqlx::query(
            r#"
            INSERT INTO variables (id, code, name, unit_code, unit_description, subchapter_id,
                                   trn_code, agg_code, ref_code)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(variable.id)
        .bind(&variable.code)
        .bind(&variable.name)
        .bind(&variable.unit_code)
        .bind(&variable.unit_description)
        .bind(variable.subchapter_id)
        .bind(&variable.trn_code)
        .bind(&variable.agg_code)
        .bind(&variable.ref_code)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("insert variable '{}'", variable.code))?;
        Ok(())
    }

    async fn find_country(&mut self, code: &str) -> Result<Option<Country>> {
        let tx = self.tx().await?;
        let country = sqlx::query_as::<_, Country>("SELECT id, code, name FROM countries WHERE code = $1")
            .bind(code)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(country)
    }

    async fn stage_country(&mut self, country: &Country) -> Result<()> {
        let tx = self.tx().await?;
        sqlx::query("INSERT INTO countries (id, code, name) VALUES ($1, $2, $3)")
            .bind(country.id)
            .bind(&country.code)
            .bind(&country.name)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("insert country '{}'", country.code))?;
        Ok(())
    }

    async fn stage_value(&mut self, value: &Value) -> Result<bool> {
        let tx = self.tx().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO series_values (id, variable_id, country_id, year, month, amount, is_monthly)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT series_values_natural_key DO NOTHING
            "#,
        )
        .bind(value.id)
        .bind(value.variable_id)
        .bind(value.country_id)
        .bind(value.year)
        .bind(value.month)
        .bind(&value.amount)
        .bind(value.is_monthly)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("insert value for year {}", value.year))?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.context("Failed to commit transaction")?;
        }
        Ok(())
    }

    async fn rollback(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "rollback failed");
            }
        }
    }

    async fn counts(&mut self) -> Result<TableCounts> {
        let (chapters, subchapters, variables, countries, values): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM chapters),
                    (SELECT COUNT(*) FROM subchapters),
                    (SELECT COUNT(*) FROM variables),
                    (SELECT COUNT(*) FROM countries),
                    (SELECT COUNT(*) FROM series_values)
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .context("Failed to count rows")?;

        Ok(TableCounts {
            chapters,
            subchapters,
            variables,
            countries,
            values,
        })
    }
}

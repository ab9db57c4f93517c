//! Relational model for AMECO series
//!
//! Four small dimension tables (Chapter, Subchapter, Variable, Country) and one
//! fact table (Value). Natural keys:
//! - Chapter: name
//! - Subchapter: (chapter_id, name)
//! - Variable: code
//! - Country: code
//! - Value: (variable_id, country_id, year, month)

use bigdecimal::BigDecimal;
use serde::Serialize;
use uuid::Uuid;

/// Chapter name used when a file or row cannot be classified
pub const UNKNOWN_CHAPTER: &str = "Unknown Chapter";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Chapter {
    pub id: Uuid,
    pub name: String,
}

impl Chapter {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Subchapter {
    pub id: Uuid,
    pub name: String,
    pub chapter_id: Uuid,
}

impl Subchapter {
    pub fn new(chapter_id: Uuid, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            chapter_id,
        }
    }
}

/// Indicator definition. Descriptive fields are fixed at first creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Variable {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub unit_code: String,
    pub unit_description: String,
    pub subchapter_id: Uuid,
    /// Raw TRN code (transformation type)
    pub trn_code: Option<String>,
    /// Raw AGG code (aggregation mode)
    pub agg_code: Option<String>,
    /// Raw REF code (reference)
    pub ref_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Country {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

impl Country {
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
        }
    }
}

/// One yearly (or, reserved, monthly) observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Value {
    pub id: Uuid,
    pub variable_id: Uuid,
    pub country_id: Uuid,
    pub year: i32,
    pub month: Option<i32>,
    pub amount: BigDecimal,
    pub is_monthly: bool,
}

impl Value {
    pub fn yearly(variable_id: Uuid, country_id: Uuid, year: i32, amount: BigDecimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            variable_id,
            country_id,
            year,
            month: None,
            amount,
            is_monthly: false,
        }
    }

    pub fn natural_key(&self) -> (Uuid, Uuid, i32, Option<i32>) {
        (self.variable_id, self.country_id, self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearValue {
    pub year: i32,
    pub amount: BigDecimal,
}

/// Normalized row produced by the mapper and consumed once by the resolver
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    pub chapter_name: String,
    pub subchapter_name: String,
    pub variable_code: String,
    pub variable_name: String,
    pub unit_code: String,
    pub unit_description: String,
    pub country_code: String,
    pub country_name: String,
    pub values: Vec<YearValue>,
    pub trn: Option<String>,
    pub agg: Option<String>,
    pub reference: Option<String>,
}

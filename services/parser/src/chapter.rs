//! Chapter classification
//!
//! Primary strategy: the chapter number embedded in the file name
//! (`AMECO<N>.<ext>`), resolved once per file.
//! Alternate strategy: the row's subchapter label looked up in a static
//! table, resolved per row. The label table sits behind `SubchapterLookup`
//! so a different table can be plugged in.

use crate::model::UNKNOWN_CHAPTER;
use clap::ValueEnum;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

/// Canonical chapter names by AMECO chapter number
const CHAPTER_NAMES: [(u32, &str); 18] = [
    (1, "Population And Employment"),
    (2, "Consumption"),
    (3, "Capital Formation and Saving, Total Economy and Sectors"),
    (4, "Domestic and Final Demand"),
    (5, "National Income"),
    (6, "Domestic Product"),
    (7, "Gross Domestic Product (Income Approach), Labour Costs"),
    (8, "Capital Stock"),
    (9, "Exports and Imports of Goods and Services, National Accounts"),
    (10, "Balances with the Rest of the World"),
    (11, "Foreign Trade"),
    (12, "National Accounts by Branch of Activity"),
    (13, "Monetary Variables"),
    (14, "Corporations (S11 + S12)"),
    (15, "Households And Npish (S14 + S15)"),
    (16, "General Government (S13)"),
    (17, "Cyclical Adjustment of Public Finance Variables"),
    (18, "Gross Public Debt"),
];

/// Subchapter label -> chapter name.
///
/// Chapters 14 and 15 share three labels ("01 Revenue", "02 Expenditure",
/// "03 Balances"); the first entry wins, so those resolve to Corporations.
const SUBCHAPTER_CHAPTERS: &[(&str, &str)] = &[
    ("01 Population", "Population And Employment"),
    ("02 Labour Force Statistics", "Population And Employment"),
    ("03 Unemployment", "Population And Employment"),
    ("04 Employment, Persons (National Accounts)", "Population And Employment"),
    ("05 Employment, Full-Time Equivalents (National Accounts)", "Population And Employment"),
    ("06 Self-Employed, Persons (National Accounts)", "Population And Employment"),
    ("07 Wage And Salary Earners, Persons (National Accounts)", "Population And Employment"),
    ("08 Wage And Salary Earners, Full-Time Equivalents (National Acc...", "Population And Employment"),
    ("01 Private Final Consumption Expenditure", "Consumption"),
    ("02 Private Final Consumption Expenditure Per Head Of Population", "Consumption"),
    ("03 Actual Individual Final Consumption Of Households", "Consumption"),
    ("04 Consumer Price Index", "Consumption"),
    ("05 Total Final Consumption Expenditure Of General Government", "Consumption"),
    ("06 Collective Consumption Expenditure Of General Government", "Consumption"),
    ("07 Individual Consumption Expenditure Of General Government", "Consumption"),
    ("08 Total Consumption", "Consumption"),
    ("01 Gross Fixed Capital Formation, Total Economy", "Capital Formation And Saving"),
    ("02 Gross Fixed Capital Formation At Current Prices, Sectors", "Capital Formation And Saving"),
    ("03 Net Fixed Capital Formation, Total Economy", "Capital Formation And Saving"),
    ("04 Net Fixed Capital Formation At Current Prices, Sectors", "Capital Formation And Saving"),
    ("05 Consumption Of Fixed Capital, Total Economy", "Capital Formation And Saving"),
    ("06 Consumption Of Fixed Capital, General Government", "Capital Formation And Saving"),
    ("07 Gross Fixed Capital Formation By Type Of Goods At Current Prices", "Capital Formation And Saving"),
    ("08 Gross Fixed Capital Formation By Type Of Goods At Constant Prices", "Capital Formation And Saving"),
    ("09 Gross Fixed Capital Formation By Type Of Goods, Price Deflators", "Capital Formation And Saving"),
    ("10 Change In Inventories And Net Acquisition Of Valuables", "Capital Formation And Saving"),
    ("11 Gross Capital Formation", "Capital Formation And Saving"),
    ("12 Gross Saving", "Capital Formation And Saving"),
    ("13 Net Saving", "Capital Formation And Saving"),
    ("01 Domestic Demand Excluding Change In Inventories", "Domestic And Final Demand"),
    ("02 Domestic Demand Including Change In Inventories", "Domestic And Final Demand"),
    ("03 Final Demand", "Domestic And Final Demand"),
    ("04 Contributions To The Change Of The Final Demand Deflator", "Domestic And Final Demand"),
    ("01 Gross National Income", "National Income"),
    ("02 Gross National Income Per Head Of Population", "National Income"),
    ("03 Net National Income", "National Income"),
    ("04 National Disposable Income At Current Prices", "National Income"),
    ("05 Gross National Disposable Income Per Head Of Population", "National Income"),
    ("01 Gross Domestic Product", "Domestic Product"),
    ("02 Gross Domestic Product Per Head Of Population", "Domestic Product"),
    ("03 Gross Domestic Product Per Person Employed", "Domestic Product"),
    ("04 Gross Domestic Product Per Hour Worked", "Domestic Product"),
    ("05 Potential Gross Domestic Product At Constant Prices", "Domestic Product"),
    ("06 Trend Gross Domestic Product At Constant Prices", "Domestic Product"),
    ("07 Gdp At Constant Prices Adjusted For The Impact Of Terms Of Trade Per Head", "Domestic Product"),
    ("08 Contributions To The Change Of Gdp At Constant Market Prices", "Domestic Product"),
    ("09 Alternative Definitions Domestic Product At Current Prices", "Domestic Product"),
    ("10 Gross Value Added, Total Economy", "Domestic Product"),
    ("01 Compensation Of Employees", "Gross Domestic Product (Income Approach)"),
    ("02 Taxes Linked To Imports And Production And Subsidies; Total Economy", "Gross Domestic Product (Income Approach)"),
    ("03 Operating Surplus, Total Economy", "Gross Domestic Product (Income Approach)"),
    ("04 Nominal Compensation Per Employee, Total Economy", "Gross Domestic Product (Income Approach)"),
    ("05 Real Compensation Per Employee, Total Economy", "Gross Domestic Product (Income Approach)"),
    ("06 Adjusted Wage Share", "Gross Domestic Product (Income Approach)"),
    ("07 Nominal Unit Labour Costs, Total Economy", "Gross Domestic Product (Income Approach)"),
    ("08 Real Unit Labour Costs, Total Economy", "Gross Domestic Product (Income Approach)"),
    ("01 Net Capital Stock At Constant Prices, Total Economy", "Capital Stock"),
    ("02 Factor Productivity, Total Economy", "Capital Stock"),
    ("03 Production Factors Substitution, Total Economy", "Capital Stock"),
    ("04 Marginal Efficiency Of Capital, Total Economy", "Capital Stock"),
    ("01 Exports Of Goods And Services", "Exports And Imports"),
    ("02 Imports Of Goods And Services", "Exports And Imports"),
    ("03 Exports Of Goods", "Exports And Imports"),
    ("04 Exports Of Services", "Exports And Imports"),
    ("05 Imports Of Goods", "Exports And Imports"),
    ("06 Imports Of Services", "Exports And Imports"),
    ("07 Terms Of Trade", "Exports And Imports"),
    ("01 Balances With The Rest Of The World, National Accounts", "Balances With The Rest Of The World"),
    ("02 Balances With The Rest Of The World, Bop Statistics", "Balances With The Rest Of The World"),
    ("01 Foreign Trade At Current Prices", "Foreign Trade"),
    ("02 Foreign Trade Shares In World Trade", "Foreign Trade"),
    ("01 Employment, Persons", "National Accounts By Branch Of Activity"),
    ("02 Employment, Full-Time Equivalents", "National Accounts By Branch Of Activity"),
    ("03 Wage And Salary Earners, Persons", "National Accounts By Branch Of Activity"),
    ("04 Wage And Salary Earners, Full-Time Equivalents", "National Accounts By Branch Of Activity"),
    ("05 Gross Value Added By Main Branch At Current Prices", "National Accounts By Branch Of Activity"),
    ("06 Gross Value Added By Main Branch At Current Prices Per Person Employed", "National Accounts By Branch Of Activity"),
    ("07 Gross Value Added By Main Branch At Current Prices Per Employee", "National Accounts By Branch Of Activity"),
    ("08 Gross Value Added By Main Branch At Constant Prices", "National Accounts By Branch Of Activity"),
    ("09 Gross Value Added By Main Branch At Constant Prices Per Person Employed", "National Accounts By Branch Of Activity"),
    ("10 Gross Value Added By Main Branch At Constant Prices Per Employee", "National Accounts By Branch Of Activity"),
    ("11 Price Deflator Gross Value Added By Main Branch", "National Accounts By Branch Of Activity"),
    ("12 Compensation Of Employees By Main Branch", "National Accounts By Branch Of Activity"),
    ("13 Nominal Compensation By Main Branch Per Employee", "National Accounts By Branch Of Activity"),
    ("14 Adjusted Wage Share By Main Branch", "National Accounts By Branch Of Activity"),
    ("15 Nominal Unit Wage Costs By Main Branch", "National Accounts By Branch Of Activity"),
    ("16 Nominal Unit Labour Costs By Main Branch", "National Accounts By Branch Of Activity"),
    ("17 Real Unit Labour Costs By Main Branch", "National Accounts By Branch Of Activity"),
    ("18 Industrial Production", "National Accounts By Branch Of Activity"),
    ("01 Exchange Rates And Purchasing Power Parities", "Monetary Variables"),
    ("02 Interest Rates", "Monetary Variables"),
    ("01 Revenue", "Corporations"),
    ("02 Expenditure", "Corporations"),
    ("03 Balances", "Corporations"),
    ("01 Revenue", "Households And Npish"),
    ("02 Expenditure", "Households And Npish"),
    ("03 Balances", "Households And Npish"),
    ("01 Revenue (Esa 2010)", "General Government"),
    ("02 Expenditure (Esa 2010)", "General Government"),
    ("03 Net Lending (Esa 2010)", "General Government"),
    ("04 Excessive Deficit Procedure", "General Government"),
    ("01 Based On Potential Gdp (Esa 2010)", "Cyclical Adjustment Of Public Finance Variables"),
    ("02 Based On Trend Gdp (Esa 2010)", "Cyclical Adjustment Of Public Finance Variables"),
    ("01 Based On Esa 2010", "Gross Public Debt"),
    ("02 Based On Esa 2010 And Former Definitions (Linked Series)", "Gross Public Debt"),
];

static CHAPTER_BY_NUMBER: Lazy<HashMap<u32, &'static str>> =
    Lazy::new(|| CHAPTER_NAMES.iter().copied().collect());

static CHAPTER_BY_SUBCHAPTER: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::with_capacity(SUBCHAPTER_CHAPTERS.len());
    for (label, chapter) in SUBCHAPTER_CHAPTERS {
        map.entry(*label).or_insert(*chapter);
    }
    map
});

/// Which strategy names a row's chapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ChapterStrategy {
    /// Chapter number in the file name, once per file
    #[default]
    #[value(name = "filename")]
    FileName,
    /// Row's subchapter label looked up per row
    #[value(name = "subchapter")]
    SubchapterLabel,
}

/// Subchapter label -> chapter name table
pub trait SubchapterLookup: Send + Sync {
    fn chapter_for(&self, subchapter_label: &str) -> Option<&str>;
}

/// The built-in AMECO label table
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinSubchapterTable;

impl SubchapterLookup for BuiltinSubchapterTable {
    fn chapter_for(&self, subchapter_label: &str) -> Option<&str> {
        CHAPTER_BY_SUBCHAPTER.get(subchapter_label).copied()
    }
}

impl SubchapterLookup for HashMap<String, String> {
    fn chapter_for(&self, subchapter_label: &str) -> Option<&str> {
        self.get(subchapter_label).map(|s| s.as_str())
    }
}

pub struct ChapterClassifier {
    strategy: ChapterStrategy,
    lookup: Box<dyn SubchapterLookup>,
}

impl ChapterClassifier {
    pub fn new(strategy: ChapterStrategy) -> Self {
        Self {
            strategy,
            lookup: Box::new(BuiltinSubchapterTable),
        }
    }

    /// Replace the subchapter label table
    pub fn with_lookup(mut self, lookup: Box<dyn SubchapterLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn strategy(&self) -> ChapterStrategy {
        self.strategy
    }

    /// Chapter for the whole file, or `None` when chapters are resolved per row
    pub fn chapter_for_file(&self, path: &Path) -> Option<String> {
        match self.strategy {
            ChapterStrategy::FileName => Some(chapter_from_file_name(path)),
            ChapterStrategy::SubchapterLabel => None,
        }
    }

    /// Chapter for one row from its raw subchapter label
    pub fn chapter_for_row(&self, subchapter_label: &str) -> String {
        self.lookup
            .chapter_for(subchapter_label)
            .unwrap_or(UNKNOWN_CHAPTER)
            .to_string()
    }
}

/// Chapter number from `AMECO<N>.<ext>`: case-insensitive prefix, digits-only suffix
pub fn chapter_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let prefix = stem.get(..5)?;
    if !prefix.eq_ignore_ascii_case("AMECO") {
        return None;
    }
    let suffix = &stem[5..];
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Canonical chapter name for a file
pub fn chapter_from_file_name(path: &Path) -> String {
    match chapter_number(path) {
        Some(n) => match CHAPTER_BY_NUMBER.get(&n) {
            Some(name) => name.to_string(),
            None => format!("{} ({})", UNKNOWN_CHAPTER, n),
        },
        None => {
            tracing::warn!(file = %path.display(), "cannot determine chapter number from file name");
            UNKNOWN_CHAPTER.to_string()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

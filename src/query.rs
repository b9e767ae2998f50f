//! Filtering and sorting over point-in-time copies of the index.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::core::FileRecord;
use crate::error::{IndexError, Result};
use crate::filter::normalize_extension;
use crate::store::IndexStore;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Modification time
    Date,
    /// File size in bytes
    Size,
    /// File name, case-insensitive
    Name,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "date" => Ok(Self::Date),
            "size" => Ok(Self::Size),
            "name" => Ok(Self::Name),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

/// How to order a result set. `sort_by: None` keeps index order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortOptions {
    pub sort_by: Option<SortKey>,
    pub order: SortOrder,
}

impl SortOptions {
    pub fn new(sort_by: Option<SortKey>, order: SortOrder) -> Self {
        Self { sort_by, order }
    }

    pub fn by(key: SortKey, order: SortOrder) -> Self {
        Self::new(Some(key), order)
    }
}

pub fn search_by_type(records: Vec<FileRecord>, ext: &str, sort: SortOptions) -> Vec<FileRecord> {
    let ext = normalize_extension(ext);
    let matches = records.into_iter().filter(|r| r.extension == ext).collect();
    apply_sorting(matches, sort)
}

/// Inclusive size range; `max: None` is unbounded. `min > max` matches nothing.
pub fn search_by_size(
    records: Vec<FileRecord>,
    min: u64,
    max: Option<u64>,
    sort: SortOptions,
) -> Vec<FileRecord> {
    let matches = records
        .into_iter()
        .filter(|r| r.size >= min && max.map_or(true, |max| r.size <= max))
        .collect();
    apply_sorting(matches, sort)
}

/// Inclusive range over modification time. At least one bound is required.
pub fn search_by_date(
    records: Vec<FileRecord>,
    start: Option<&str>,
    end: Option<&str>,
    sort: SortOptions,
) -> Result<Vec<FileRecord>> {
    if start.is_none() && end.is_none() {
        return Err(IndexError::MissingBound);
    }
    let start = start.map(parse_date).transpose()?;
    let end = end.map(parse_date).transpose()?;

    let matches = records
        .into_iter()
        .filter(|r| {
            start.map_or(true, |s| r.modified_at >= s) && end.map_or(true, |e| r.modified_at <= e)
        })
        .collect();
    Ok(apply_sorting(matches, sort))
}

/// Parse a date bound. Date-only inputs mean midnight; inputs with an offset
/// are converted to local time.
pub fn parse_date(input: &str) -> Result<NaiveDateTime> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }

    Err(IndexError::InvalidDate(input.to_string()))
}

/// Stable sort on the chosen key; ties keep their incoming order.
pub fn apply_sorting(mut records: Vec<FileRecord>, sort: SortOptions) -> Vec<FileRecord> {
    let Some(key) = sort.sort_by else {
        return records;
    };

    let compare = |a: &FileRecord, b: &FileRecord| -> Ordering {
        match key {
            SortKey::Date => a.modified_at.cmp(&b.modified_at),
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Name => a
                .display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase()),
        }
    };

    match sort.order {
        SortOrder::Asc => records.sort_by(compare),
        SortOrder::Desc => records.sort_by(|a, b| compare(b, a)),
    }
    records
}

impl IndexStore {
    pub fn search_by_type(&self, ext: &str, sort: SortOptions) -> Vec<FileRecord> {
        search_by_type(self.records(), ext, sort)
    }

    pub fn search_by_size(&self, min: u64, max: Option<u64>, sort: SortOptions) -> Vec<FileRecord> {
        search_by_size(self.records(), min, max, sort)
    }

    pub fn search_by_date(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        sort: SortOptions,
    ) -> Result<Vec<FileRecord>> {
        search_by_date(self.records(), start, end, sort)
    }
}

//! Filtered listing and timeline grouping over the catalog.

use crate::photo_store::{Photo, PhotoOrder, PhotoQuery, PhotoStore};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Listing request as received from a client, not yet validated.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PhotoFilter {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub filename: Option<String>,
    pub tag: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(rename = "orderBy", alias = "order_by")]
    pub order_by: Option<String>,
}

/// year -> month -> photos, each month in default listing order.
pub type Timeline = BTreeMap<i32, BTreeMap<u32, Vec<Photo>>>;

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn PhotoStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn PhotoStore>) -> Self {
        Self { store }
    }

    pub fn list(&self, filter: &PhotoFilter) -> Result<Vec<Photo>, QueryError> {
        let query = build_query(filter)?;
        Ok(self.store.list_photos(&query)?)
    }

    /// Group every photo by the year and month of its organizing timestamp.
    ///
    /// With `limit_per_bucket > 0` each month keeps only its newest entries.
    pub fn timeline(&self, limit_per_bucket: usize) -> Result<Timeline, QueryError> {
        let photos = self.store.list_photos(&PhotoQuery::default())?;

        let mut timeline = Timeline::new();
        for photo in photos {
            let at = photo.organizing_at();
            timeline
                .entry(at.year())
                .or_default()
                .entry(at.month())
                .or_default()
                .push(photo);
        }

        if limit_per_bucket > 0 {
            for months in timeline.values_mut() {
                for bucket in months.values_mut() {
                    bucket.truncate(limit_per_bucket);
                }
            }
        }
        Ok(timeline)
    }
}

fn build_query(filter: &PhotoFilter) -> Result<PhotoQuery, QueryError> {
    let organizing_range = match (filter.year, filter.month) {
        (None, Some(_)) => {
            return Err(QueryError::Validation("month requires year".to_string()));
        }
        (None, None) => None,
        (Some(year), month) => Some(calendar_range(year, month)?),
    };

    let order = match filter.order_by.as_deref() {
        None | Some("") => PhotoOrder::default(),
        Some(name) => PhotoOrder::parse(name)
            .ok_or_else(|| QueryError::Validation(format!("unknown orderBy {:?}", name)))?,
    };

    let limit = match filter.limit {
        Some(l) if l < 0 => {
            return Err(QueryError::Validation("limit must not be negative".to_string()));
        }
        Some(0) | None => None,
        Some(l) => Some(l as usize),
    };
    let offset = match filter.offset {
        Some(o) if o < 0 => {
            return Err(QueryError::Validation("offset must not be negative".to_string()));
        }
        Some(o) => o as usize,
        None => 0,
    };

    Ok(PhotoQuery {
        organizing_range,
        filename_contains: non_empty(&filter.filename),
        tag_contains: non_empty(&filter.tag),
        order,
        limit,
        offset,
    })
}

/// The whole `year`, or one month of it, as a half-open UTC interval.
fn calendar_range(year: i32, month: Option<u32>) -> Result<Range<DateTime<Utc>>, QueryError> {
    let new_year_after = || year.checked_add(1).and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1));
    let (start, end) = match month {
        None => (NaiveDate::from_ymd_opt(year, 1, 1), new_year_after()),
        Some(m) if !(1..=12).contains(&m) => {
            return Err(QueryError::Validation(format!(
                "month must be between 1 and 12, got {}",
                m
            )));
        }
        Some(12) => (NaiveDate::from_ymd_opt(year, 12, 1), new_year_after()),
        Some(m) => (
            NaiveDate::from_ymd_opt(year, m, 1),
            NaiveDate::from_ymd_opt(year, m + 1, 1),
        ),
    };

    match (start, end) {
        (Some(start), Some(end)) => Ok(start.and_time(Default::default()).and_utc()
            ..end.and_time(Default::default()).and_utc()),
        _ => Err(QueryError::Validation(format!("year {} is out of range", year))),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

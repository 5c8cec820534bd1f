//! Grouped quantity totals and their extrema.
//!
//! [`Totals`] keeps keys in first-insertion order so that presentation order
//! and tie-breaking are reproducible for identical input order.

use crate::schema::Record;
use log::debug;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Department,
    Item,
}

impl GroupBy {
    fn key<'a>(&self, record: &'a Record) -> &'a str {
        match self {
            GroupBy::Department => &record.department,
            GroupBy::Item => &record.item,
        }
    }
}

/// Insertion-ordered mapping from grouping key to accumulated quantity.
///
/// Sums are exact decimals, so every grouping of the same records adds up to
/// the same total regardless of summation order.
#[derive(Debug, Clone, Default)]
pub struct Totals {
    entries: Vec<(String, Decimal)>,
    index: HashMap<String, usize>,
}

impl Totals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates `qty` for each record under the requested grouping key.
    pub fn from_records(records: &[Record], group_by: GroupBy) -> Self {
        let mut totals = Self::new();
        for record in records {
            totals.add(group_by.key(record), record.qty);
        }
        totals
    }

    pub fn add(&mut self, key: &str, qty: Decimal) {
        match self.index.get(key) {
            Some(&position) => self.entries[position].1 += qty,
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), qty));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Decimal> {
        self.index.get(key).map(|&position| self.entries[position].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.entries.iter().map(|(key, qty)| (key.as_str(), *qty))
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn values(&self) -> Vec<Decimal> {
        self.entries.iter().map(|(_, qty)| *qty).collect()
    }

    /// Values as floats for plotting. Precision beyond `f64` only matters to
    /// the arithmetic, not to bar heights.
    pub fn chart_values(&self) -> Vec<f64> {
        self.entries
            .iter()
            .map(|(_, qty)| qty.to_f64().unwrap_or(0.0))
            .collect()
    }

    pub fn sum(&self) -> Decimal {
        self.entries.iter().map(|(_, qty)| *qty).sum()
    }

    /// The key with the largest total. Ties go to the key inserted first.
    pub fn extremum(&self) -> Extremum {
        let mut best: Option<(&str, Decimal)> = None;
        for (key, qty) in self.iter() {
            if best.map_or(true, |(_, best_qty)| qty > best_qty) {
                best = Some((key, qty));
            }
        }

        match best {
            Some((key, qty)) => Extremum {
                key: Some(key.to_string()),
                qty,
            },
            None => Extremum::none(),
        }
    }
}

impl PartialEq for Totals {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<'a> FromIterator<(&'a str, Decimal)> for Totals {
    fn from_iter<I: IntoIterator<Item = (&'a str, Decimal)>>(iter: I) -> Self {
        let mut totals = Self::new();
        for (key, qty) in iter {
            totals.add(key, qty);
        }
        totals
    }
}

impl Serialize for Totals {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, qty) in &self.entries {
            map.serialize_entry(key, qty)?;
        }
        map.end()
    }
}

/// Grouping key with the maximum accumulated quantity, `key: None` when
/// nothing was aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    pub key: Option<String>,
    pub qty: Decimal,
}

impl Extremum {
    pub fn none() -> Self {
        Self {
            key: None,
            qty: Decimal::ZERO,
        }
    }

    pub fn key_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.key.as_deref().unwrap_or(fallback)
    }
}

/// Both groupings of one record set, computed in a single pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub department_totals: Totals,
    pub item_totals: Totals,
    pub top_department: Extremum,
    pub top_item: Extremum,
}

pub fn aggregate(records: &[Record]) -> Aggregation {
    let mut department_totals = Totals::new();
    let mut item_totals = Totals::new();

    for record in records {
        department_totals.add(&record.department, record.qty);
        item_totals.add(&record.item, record.qty);
    }

    let top_department = department_totals.extremum();
    let top_item = item_totals.extremum();

    debug!(
        "Aggregated {} records into {} departments and {} items",
        records.len(),
        department_totals.len(),
        item_totals.len()
    );

    Aggregation {
        department_totals,
        item_totals,
        top_department,
        top_item,
    }
}

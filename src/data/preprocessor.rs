//! Source-table ingestion.
//!
//! The source is a delimited text table whose first three columns are
//! (entity, year, value); a trailing percentage column is ignored.
//! Rows for configured aggregate entities are dropped, as are rows
//! with missing year or value fields. The output is one ordered
//! (years, values) pair per entity plus a stable entity <-> index
//! catalog built by sorting entity names.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// One entity's observations, ordered by year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub years: Vec<f64>,
    pub values: Vec<f64>,
}

/// Immutable entity <-> dense index mapping.
///
/// Serving must use the exact catalog captured at training time, so
/// the mapping never changes after construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityCatalog {
    entity_to_index: BTreeMap<String, usize>,
    index_to_entity: Vec<String>,
}

impl EntityCatalog {
    /// Build the catalog from entity names, indexed in sorted order.
    pub fn from_names<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let sorted: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        let index_to_entity: Vec<String> = sorted.into_iter().collect();
        let entity_to_index = index_to_entity
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            entity_to_index,
            index_to_entity,
        }
    }

    pub fn index_of(&self, entity: &str) -> Option<usize> {
        self.entity_to_index.get(entity).copied()
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.index_to_entity.get(index).map(String::as_str)
    }

    /// Entity names in index order (lexicographically sorted).
    pub fn names(&self) -> &[String] {
        &self.index_to_entity
    }

    pub fn entity_to_index(&self) -> &BTreeMap<String, usize> {
        &self.entity_to_index
    }

    pub fn len(&self) -> usize {
        self.index_to_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_entity.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreparedData {
    pub series: BTreeMap<String, Series>,
    pub catalog: EntityCatalog,
}

impl PreparedData {
    pub fn num_observations(&self) -> usize {
        self.series.values().map(|s| s.values.len()).sum()
    }
}

pub struct Preprocessor {
    csv_path: PathBuf,
    reject: BTreeSet<String>,
}

impl Preprocessor {
    pub fn new(csv_path: impl Into<PathBuf>, non_entities: &[String]) -> Self {
        Self {
            csv_path: csv_path.into(),
            reject: non_entities.iter().cloned().collect(),
        }
    }

    /// Parse, filter and order the source table.
    ///
    /// Fatal on a missing file, on fewer than three columns, on
    /// unparseable non-empty fields, on duplicate years within an
    /// entity, and when nothing survives filtering.
    pub fn load(&self) -> Result<PreparedData, DataError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.csv_path)?;

        let width = reader.headers()?.len();
        if width < 3 {
            return Err(DataError::Schema {
                expected: 3,
                found: width,
            });
        }

        let mut rows: Vec<(String, i32, f64)> = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let entity = record.get(0).unwrap_or("").trim();
            if entity.is_empty() || self.reject.contains(entity) {
                continue;
            }

            let year_field = record.get(1).unwrap_or("").trim();
            let value_field = record.get(2).unwrap_or("").trim();
            // Missing fields drop the row; malformed ones are fatal.
            if year_field.is_empty() || value_field.is_empty() {
                continue;
            }
            let year: f64 = year_field.parse().map_err(|_| DataError::BadField {
                row,
                column: "year",
                value: year_field.to_string(),
            })?;
            let value: f64 = value_field.parse().map_err(|_| DataError::BadField {
                row,
                column: "value",
                value: value_field.to_string(),
            })?;
            if !year.is_finite() || !value.is_finite() {
                continue;
            }

            rows.push((entity.to_string(), year as i32, value));
        }

        if rows.is_empty() {
            return Err(DataError::Empty);
        }

        rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut series: BTreeMap<String, Series> = BTreeMap::new();
        for (entity, year, value) in rows {
            let entry = series.entry(entity.clone()).or_default();
            if entry.years.last().copied() == Some(year as f64) {
                return Err(DataError::DuplicateYear { entity, year });
            }
            entry.years.push(year as f64);
            entry.values.push(value);
        }

        let catalog = EntityCatalog::from_names(series.keys().cloned());
        Ok(PreparedData { series, catalog })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    const HEADER: &str = "Country name,Year,Population,Population (%)\n";

    #[test]
    fn loads_ordered_series_and_catalog() {
        let file = write_csv(&format!(
            "{HEADER}Vietnam,2001,80000000,1.3\nAlbania,2000,3000000,0.05\n\
             Vietnam,2000,79000000,1.3\nWorld,2000,6000000000,100\n"
        ));
        let prep = Preprocessor::new(file.path(), &["World".to_string()])
            .load()
            .unwrap();

        assert_eq!(prep.catalog.len(), 2);
        assert_eq!(prep.catalog.index_of("Albania"), Some(0));
        assert_eq!(prep.catalog.index_of("Vietnam"), Some(1));
        assert_eq!(prep.catalog.name_of(1), Some("Vietnam"));
        assert_eq!(prep.catalog.index_of("World"), None);

        let vietnam = &prep.series["Vietnam"];
        assert_eq!(vietnam.years, vec![2000.0, 2001.0]);
        assert_eq!(vietnam.values, vec![79_000_000.0, 80_000_000.0]);
        assert_eq!(prep.num_observations(), 3);
    }

    #[test]
    fn missing_fields_drop_the_row() {
        let file = write_csv(&format!(
            "{HEADER}Albania,2000,3000000,0.05\nAlbania,,3100000,0.05\nAlbania,2002,,0.05\n"
        ));
        let prep = Preprocessor::new(file.path(), &[]).load().unwrap();
        assert_eq!(prep.series["Albania"].years, vec![2000.0]);
    }

    #[test]
    fn malformed_field_is_fatal() {
        let file = write_csv(&format!("{HEADER}Albania,not-a-year,3000000,0.05\n"));
        let err = Preprocessor::new(file.path(), &[]).load().unwrap_err();
        assert!(matches!(err, DataError::BadField { column: "year", .. }));
    }

    #[test]
    fn duplicate_year_is_fatal() {
        let file = write_csv(&format!(
            "{HEADER}Albania,2000,3000000,0.05\nAlbania,2000,3000001,0.05\n"
        ));
        let err = Preprocessor::new(file.path(), &[]).load().unwrap_err();
        assert!(matches!(err, DataError::DuplicateYear { year: 2000, .. }));
    }

    #[test]
    fn empty_after_filtering_is_fatal() {
        let file = write_csv(&format!("{HEADER}World,2000,6000000000,100\n"));
        let err = Preprocessor::new(file.path(), &["World".to_string()])
            .load()
            .unwrap_err();
        assert!(matches!(err, DataError::Empty));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = Preprocessor::new("/no/such/file.csv", &[]).load().unwrap_err();
        assert!(matches!(err, DataError::Read(_)));
    }

    #[test]
    fn narrow_schema_is_fatal() {
        let file = write_csv("Country name,Year\nAlbania,2000\n");
        let err = Preprocessor::new(file.path(), &[]).load().unwrap_err();
        assert!(matches!(err, DataError::Schema { found: 2, .. }));
    }
}

use std::collections::HashSet;
use std::io::Read;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::db::Database;
use crate::models::NewIngredient;

/// What an ingredient import did (or would do, for a dry run).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngredientImportSummary {
    pub rows_parsed: usize,
    pub inserted: usize,
    pub skipped: usize,
}

/// Parse a header-less `name,unit` CSV.
///
/// Blank rows are skipped. A row with a name but no unit is an error that
/// names its line.
pub fn parse_ingredient_csv<R: Read>(reader: R) -> Result<Vec<NewIngredient>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (index, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", index + 1))?;
        let line = record.position().map_or(index as u64 + 1, |p| p.line());

        let name = record.get(0).unwrap_or("").trim();
        let unit = record.get(1).unwrap_or("").trim();
        if name.is_empty() && unit.is_empty() {
            continue;
        }
        if name.is_empty() {
            bail!("Line {line}: missing ingredient name");
        }
        if unit.is_empty() {
            bail!("Line {line}: missing measurement unit for '{name}'");
        }

        rows.push(NewIngredient {
            name: name.to_string(),
            measurement_unit: unit.to_string(),
        });
    }
    Ok(rows)
}

/// Load parsed rows into the catalogue, keeping whatever is already there.
///
/// When `dry_run` is true nothing is written; `inserted` counts rows that are
/// new to both the catalogue and the file.
pub fn import_ingredients(
    db: &Database,
    rows: &[NewIngredient],
    dry_run: bool,
) -> Result<IngredientImportSummary> {
    let inserted = if dry_run {
        let mut seen = HashSet::new();
        let mut fresh = 0;
        for row in rows {
            if !seen.insert((row.name.as_str(), row.measurement_unit.as_str())) {
                continue;
            }
            let exists = db
                .search_ingredients(&row.name)?
                .iter()
                .any(|i| i.name == row.name && i.measurement_unit == row.measurement_unit);
            if !exists {
                fresh += 1;
            }
        }
        fresh
    } else {
        db.insert_ingredients(rows)?
    };

    let summary = IngredientImportSummary {
        rows_parsed: rows.len(),
        inserted,
        skipped: rows.len() - inserted,
    };
    info!(
        rows = summary.rows_parsed,
        inserted = summary.inserted,
        skipped = summary.skipped,
        dry_run,
        "ingredient import finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "\
abricot jam,g
anise,pinch

basil,g
\"salt, coarse\",g
";

    #[test]
    fn test_parse_ingredient_csv_basic() {
        let rows = parse_ingredient_csv(SAMPLE_CSV.as_bytes()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].name, "abricot jam");
        assert_eq!(rows[1].measurement_unit, "pinch");
        assert_eq!(rows[3].name, "salt, coarse");
    }

    #[test]
    fn test_parse_ingredient_csv_trims_fields() {
        let rows = parse_ingredient_csv("  milk ,  ml \n".as_bytes()).unwrap();
        assert_eq!(
            rows,
            vec![NewIngredient {
                name: "milk".to_string(),
                measurement_unit: "ml".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_ingredient_csv_missing_unit_names_line() {
        let err = parse_ingredient_csv("flour,g\nsugar\n".as_bytes()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Line 2"), "unexpected error: {msg}");
        assert!(msg.contains("sugar"));
    }

    #[test]
    fn test_import_skips_existing() {
        let db = Database::open_in_memory().unwrap();
        let rows = parse_ingredient_csv(SAMPLE_CSV.as_bytes()).unwrap();

        let first = import_ingredients(&db, &rows, false).unwrap();
        assert_eq!(
            first,
            IngredientImportSummary {
                rows_parsed: 4,
                inserted: 4,
                skipped: 0,
            }
        );

        let second = import_ingredients(&db, &rows, false).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 4);
        assert_eq!(db.search_ingredients("").unwrap().len(), 4);
    }

    #[test]
    fn test_import_dry_run_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let rows = parse_ingredient_csv("flour,g\nflour,g\nsugar,g\n".as_bytes()).unwrap();

        let summary = import_ingredients(&db, &rows, true).unwrap();
        assert_eq!(summary.rows_parsed, 3);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 1);
        assert!(db.search_ingredients("").unwrap().is_empty());
    }
}

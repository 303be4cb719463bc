use std::path::Path;

use anyhow::{Context, Result};
use tabled::{Table, Tabled, settings::Style};

use potluck_core::service::PotluckService;

use super::helpers::truncate;

pub(crate) fn cmd_tag_add(svc: &PotluckService, name: &str, slug: &str, json: bool) -> Result<()> {
    let tag = svc.create_tag(name, slug)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tag)?);
    } else {
        println!("Created tag {} ({}, id: {})", tag.name, tag.slug, tag.id);
    }
    Ok(())
}

pub(crate) fn cmd_tag_list(svc: &PotluckService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct TagRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Slug")]
        slug: String,
    }

    let tags = svc.list_tags()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
        return Ok(());
    }
    if tags.is_empty() {
        eprintln!("No tags yet. Create one with: potluck tag add <name> <slug>");
        return Ok(());
    }
    let rows: Vec<TagRow> = tags
        .into_iter()
        .map(|t| TagRow {
            id: t.id,
            name: t.name,
            slug: t.slug,
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_ingredient_import(
    svc: &PotluckService,
    path: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let summary = svc.import_ingredients(&data, dry_run)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "dry_run": dry_run,
                "rows_parsed": summary.rows_parsed,
                "inserted": summary.inserted,
                "skipped": summary.skipped,
            })
        );
    } else {
        if dry_run {
            println!("Dry run — no changes made.\n");
        } else {
            println!("Import complete.\n");
        }
        println!("  Rows parsed: {}", summary.rows_parsed);
        println!("  Inserted:    {}", summary.inserted);
        println!("  Skipped:     {}", summary.skipped);
    }
    Ok(())
}

pub(crate) fn cmd_ingredient_search(svc: &PotluckService, prefix: &str, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Unit")]
        unit: String,
    }

    let found = svc.search_ingredients(prefix)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }
    if found.is_empty() {
        eprintln!("No ingredients starting with '{prefix}'");
        return Ok(());
    }
    let rows: Vec<IngredientRow> = found
        .into_iter()
        .map(|i| IngredientRow {
            id: i.id,
            name: truncate(&i.name, 40),
            unit: i.measurement_unit,
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

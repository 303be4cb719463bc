use std::path::Path;

use anyhow::{Context, Result};

use potluck_core::models::User;
use potluck_core::service::PotluckService;

use super::helpers::or_exit_on_conflict;

/// Print the shopping list, or write it to `output` (a directory gets the
/// default file name).
pub(crate) fn cmd_shopping_list(
    svc: &PotluckService,
    owner: &User,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let report = or_exit_on_conflict(svc.shopping_list(owner), json)?;

    if let Some(output) = output {
        let path = if output.is_dir() {
            output.join(report.filename)
        } else {
            output.to_path_buf()
        };
        std::fs::write(&path, &report.body)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if json {
            println!(
                "{}",
                serde_json::json!({ "written": path.display().to_string(), "items": report.items.len() })
            );
        } else {
            println!("Wrote {} items to {}", report.items.len(), path.display());
        }
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.body);
    }
    Ok(())
}

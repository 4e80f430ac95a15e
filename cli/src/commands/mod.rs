mod backup;
mod feedback;
mod helpers;
mod recipe;
mod report;
mod target;
mod week;

use anyhow::Result;
use chrono::NaiveDate;
use std::path::Path;

use mealprep_core::MealPlanService;
use mealprep_core::models::Document;

pub(crate) use backup::{cmd_backup_list, cmd_backup_restore};
pub(crate) use feedback::{cmd_feedback_list, cmd_feedback_retry, cmd_rate};
pub(crate) use helpers::json_error;
pub(crate) use recipe::{
    cmd_complement_import, cmd_complement_list, cmd_recipe_favorite, cmd_recipe_generate, cmd_recipe_import,
    cmd_recipe_list, cmd_recipe_show,
};
pub(crate) use report::{cmd_macros, cmd_schedule, cmd_shopping};
pub(crate) use target::{cmd_target_exclude, cmd_target_set, cmd_target_show, cmd_target_template};
pub(crate) use week::{cmd_week_add, cmd_week_clear, cmd_week_remove, cmd_week_set, cmd_week_show};

/// Create the store with defaults, or report the one already there.
pub(crate) fn cmd_init(path: &Path, backup_dir: &Path, today: NaiveDate, json: bool) -> Result<()> {
    let existed = path.exists();
    let svc = MealPlanService::open(path, backup_dir, today)?;
    let doc: Document = svc.document();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "path": path,
                "created": !existed,
                "database_version": doc.database_version,
                "recipes": doc.recipes.len(),
                "weeks": doc.rotation.total_weeks,
            })
        );
    } else if existed {
        println!(
            "Store already exists at {} ({} recipes, {} weeks)",
            path.display(),
            doc.recipes.len(),
            doc.rotation.total_weeks
        );
    } else {
        println!("Created {}", path.display());
        println!("Import recipes with: mealprep recipe import <file.json> --week <n>");
    }
    Ok(())
}

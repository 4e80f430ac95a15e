use anyhow::Result;

use mealprep_core::MealPlanService;
use mealprep_core::rotation::{WeekSource, WeekStatus};

use super::helpers::parse_date;

fn print_status(status: &WeekStatus) {
    let week = status.week;
    let total = status.total_weeks;
    let menu = status.menu_name.as_deref().unwrap_or("(unnamed)");
    print!("Week {week}/{total}: {menu}");
    match (status.source, status.next_rotation) {
        (WeekSource::Override, _) => println!("  [manual override; `mealprep week clear` to resume]"),
        (WeekSource::Calendar, Some(next)) => println!("  (next rotation {next})"),
        (WeekSource::Calendar, None) => println!(),
    }
}

pub(crate) fn cmd_week_show(svc: &MealPlanService, date: Option<String>, json: bool) -> Result<()> {
    let today = parse_date(date)?;
    let status = svc.week_status(today);
    let plan = svc.week_plan(today)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    print_status(&status);
    if plan.recipes.is_empty() {
        eprintln!("No recipes assigned. Use `mealprep week add {} <recipe>`.", status.week);
        return Ok(());
    }
    for recipe in &plan.recipes {
        let star = if recipe.favorite { " *" } else { "" };
        println!("  [{}] {} ({}){star}", recipe.id, recipe.name, recipe.category);
    }
    for (complement, portions) in &plan.complements {
        println!("  + {} x{portions}", complement.name);
    }
    Ok(())
}

pub(crate) fn cmd_week_set(
    svc: &MealPlanService,
    week: u32,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let status = svc.set_week(week, parse_date(date)?)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

pub(crate) fn cmd_week_clear(svc: &MealPlanService, date: Option<String>, json: bool) -> Result<()> {
    let status = svc.clear_override(parse_date(date)?)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

pub(crate) fn cmd_week_add(svc: &MealPlanService, week: u32, recipe_id: &str, json: bool) -> Result<()> {
    svc.add_to_week(week, recipe_id)?;
    if json {
        println!("{}", serde_json::json!({ "week": week, "added": recipe_id }));
    } else {
        println!("Added {recipe_id} to week {week}");
    }
    Ok(())
}

pub(crate) fn cmd_week_remove(
    svc: &MealPlanService,
    week: u32,
    recipe_id: &str,
    json: bool,
) -> Result<()> {
    let removed = svc.remove_from_week(week, recipe_id)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "week": week, "recipe_id": recipe_id, "removed": removed })
        );
    } else if removed {
        println!("Removed {recipe_id} from week {week}");
    } else {
        eprintln!("{recipe_id} was not on week {week}");
    }
    Ok(())
}

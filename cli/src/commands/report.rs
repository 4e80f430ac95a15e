use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealprep_core::MealPlanService;
use mealprep_core::macros::Verdict;
use mealprep_core::shopping::format_quantity;

use super::helpers::{no_neg_zero, parse_date, truncate};

pub(crate) fn cmd_macros(svc: &MealPlanService, date: Option<String>, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct MacroRow {
        #[tabled(rename = "Macro")]
        nutrient: String,
        #[tabled(rename = "Total")]
        total: String,
        #[tabled(rename = "Target")]
        target: String,
        #[tabled(rename = "±")]
        tolerance: String,
        #[tabled(rename = "%")]
        percent: String,
        #[tabled(rename = "Status")]
        verdict: String,
    }

    let today = parse_date(date)?;
    let report = svc.macro_report(today)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let rows: Vec<MacroRow> = report
        .lines
        .iter()
        .map(|l| {
            let unit = l.nutrient.unit();
            MacroRow {
                nutrient: l.nutrient.as_str().to_string(),
                total: format!("{:.0}{unit}", no_neg_zero(l.total)),
                target: format!("{:.0}{unit}", l.target),
                tolerance: format!("{:.0}", l.tolerance),
                percent: format!("{:.0}%", l.percent_of_target),
                verdict: match l.verdict {
                    Verdict::WithinTolerance => "ok".to_string(),
                    other => other.as_str().to_string(),
                },
            }
        })
        .collect();

    let week = svc.week_status(today);
    println!("Daily macros, week {}:", week.week);
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_shopping(
    svc: &MealPlanService,
    date: Option<String>,
    csv: Option<&Path>,
    json: bool,
) -> Result<()> {
    let today = parse_date(date)?;
    let list = svc.shopping_list(today)?;

    if let Some(path) = csv {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        list.write_csv(file)?;
        if !json {
            eprintln!("Wrote {} items to {}", list.item_count(), path.display());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }
    if csv.is_some() {
        return Ok(());
    }

    if list.is_empty() {
        eprintln!("Nothing to buy: the active week has no recipes");
        return Ok(());
    }
    for section in &list.sections {
        println!("{}", section.category.as_str().to_uppercase());
        for item in &section.items {
            println!(
                "  - {} {} {}",
                truncate(&item.name, 40),
                format_quantity(item.quantity),
                item.unit
            );
        }
    }
    Ok(())
}

pub(crate) fn cmd_schedule(
    svc: &MealPlanService,
    date: Option<String>,
    template: Option<&str>,
    json: bool,
) -> Result<()> {
    let today = parse_date(date)?;
    let plan = svc.cooking_plan(today, template)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{} ({})", plan.template_name, plan.template);
    for session in &plan.sessions {
        let day = &session.day;
        let start = &session.start;
        let minutes = session.expected_minutes();
        println!("\n  {} {start} (~{minutes} min)", day.to_uppercase());
        if session.recipes.is_empty() {
            println!("    nothing scheduled");
        }
        for r in &session.recipes {
            println!(
                "    +{:<4} {} [{}] {}-{} min, {}",
                r.offset_minutes, r.name, r.category, r.min_minutes, r.max_minutes, r.equipment
            );
        }
    }

    if !plan.unplaced.is_empty() {
        eprintln!("\nCould not schedule:");
        for u in &plan.unplaced {
            eprintln!("  {}: {}", u.recipe_id, u.reason);
        }
    }
    Ok(())
}

use anyhow::{Result, bail};
use std::collections::BTreeSet;

use mealprep_core::MealPlanService;
use mealprep_core::models::{Macros, Preferences};

fn print_preferences(prefs: &Preferences) {
    let t = &prefs.targets;
    let tol = &prefs.tolerance;
    println!("Daily targets:");
    println!("  Calories: {:.0} kcal (±{:.0})", t.calories, tol.calories);
    println!("  Protein:  {:.0}g (±{:.0})", t.protein, tol.protein);
    println!("  Carbs:    {:.0}g (±{:.0})", t.carbs, tol.carbs);
    println!("  Fat:      {:.0}g (±{:.0})", t.fat, tol.fat);
    println!("Schedule template: {}", prefs.schedule_template);
    if prefs.excluded_tags.is_empty() {
        println!("Excluded: none");
    } else {
        let tags: Vec<&str> = prefs.excluded_tags.iter().map(String::as_str).collect();
        println!("Excluded: {}", tags.join(", "));
    }
}

pub(crate) fn cmd_target_show(svc: &MealPlanService, json: bool) -> Result<()> {
    let prefs = svc.preferences();
    if json {
        println!("{}", serde_json::to_string_pretty(&prefs)?);
    } else {
        print_preferences(&prefs);
    }
    Ok(())
}

/// Set targets in grams and kcal. Omitted macros keep their current target.
/// A single `tolerance` percentage applies to every macro.
pub(crate) fn cmd_target_set(
    svc: &MealPlanService,
    calories: f64,
    protein: Option<f64>,
    carbs: Option<f64>,
    fat: Option<f64>,
    tolerance_pct: Option<f64>,
    json: bool,
) -> Result<()> {
    let current = svc.preferences().targets;
    let targets = Macros::new(
        protein.unwrap_or(current.protein),
        carbs.unwrap_or(current.carbs),
        fat.unwrap_or(current.fat),
        calories,
    );
    for (name, value) in [
        ("Calorie", targets.calories),
        ("Protein", targets.protein),
        ("Carbs", targets.carbs),
        ("Fat", targets.fat),
    ] {
        if value.is_nan() || value <= 0.0 {
            bail!("{name} target must be greater than 0");
        }
    }
    let tolerance = match tolerance_pct {
        None => None,
        Some(pct) if (0.0..=100.0).contains(&pct) => Some(targets.scaled(pct / 100.0)),
        Some(pct) => bail!("Tolerance must be between 0 and 100, got {pct}"),
    };

    let prefs = svc.set_targets(targets, tolerance)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prefs)?);
    } else {
        print_preferences(&prefs);
    }
    Ok(())
}

pub(crate) fn cmd_target_template(svc: &MealPlanService, key: &str, json: bool) -> Result<()> {
    let prefs = svc.set_schedule_template(key)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prefs)?);
    } else {
        println!("Schedule template set to {key}");
    }
    Ok(())
}

pub(crate) fn cmd_target_exclude(svc: &MealPlanService, tags: &[String], json: bool) -> Result<()> {
    let tags: BTreeSet<String> = tags.iter().cloned().collect();
    let prefs = svc.set_excluded_tags(tags)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prefs)?);
    } else {
        print_preferences(&prefs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn service(dir: &tempfile::TempDir) -> MealPlanService {
        MealPlanService::open(
            &dir.path().join("mealplan.json"),
            &dir.path().join("backups"),
            Local::now().date_naive(),
        )
        .unwrap()
    }

    #[test]
    fn test_target_set_keeps_omitted_macros() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let before = svc.preferences().targets;

        cmd_target_set(&svc, 2500.0, None, None, None, None, true).unwrap();
        let after = svc.preferences();
        assert!((after.targets.calories - 2500.0).abs() < f64::EPSILON);
        assert!((after.targets.protein - before.protein).abs() < f64::EPSILON);
        assert!((after.targets.fat - before.fat).abs() < f64::EPSILON);
        assert!((after.tolerance.calories - 250.0).abs() < 1e-9);

        cmd_target_set(&svc, 2500.0, Some(160.0), None, None, Some(5.0), true).unwrap();
        let after = svc.preferences();
        assert!((after.targets.protein - 160.0).abs() < f64::EPSILON);
        assert!((after.targets.carbs - before.carbs).abs() < f64::EPSILON);
    }

    #[test]
    fn test_target_set_rejects_non_positive_values() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let before = svc.preferences();

        let err = cmd_target_set(&svc, 2500.0, Some(0.0), None, None, None, true).unwrap_err();
        assert!(err.to_string().contains("Protein"));
        assert!(cmd_target_set(&svc, 0.0, None, None, None, None, true).is_err());
        assert!(cmd_target_set(&svc, 2500.0, None, Some(-5.0), None, None, true).is_err());
        assert!(cmd_target_set(&svc, 2500.0, None, None, None, Some(150.0), true).is_err());
        assert_eq!(svc.preferences(), before);
    }
}

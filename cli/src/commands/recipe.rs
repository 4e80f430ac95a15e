use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealprep_core::MealPlanService;
use mealprep_core::models::{Complement, Recipe, RecipeCategory};
use mealprep_core::shopping::format_quantity;

use crate::ai::AnthropicReviser;

use super::helpers::{as_reviser, json_error, truncate};

/// A recipe file holds one recipe or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(file: &Path) -> Result<Vec<T>> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let parsed: OneOrMany<T> = serde_json::from_str(&input)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    Ok(parsed.into_vec())
}

fn parse_category(s: &str) -> Result<RecipeCategory> {
    match s.to_lowercase().as_str() {
        "protein" => Ok(RecipeCategory::Protein),
        "legume" | "legumes" => Ok(RecipeCategory::Legume),
        "base" | "bases" => Ok(RecipeCategory::Base),
        "complement" | "complements" => Ok(RecipeCategory::Complement),
        _ => bail!("Invalid category: {s}. Use protein, legume, base or complement"),
    }
}

pub(crate) fn cmd_recipe_list(
    svc: &MealPlanService,
    category: Option<&str>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Fav")]
        favorite: String,
        #[tabled(rename = "Rating")]
        rating: String,
        #[tabled(rename = "Rev")]
        revision: u32,
        #[tabled(rename = "kcal/portion")]
        calories: String,
    }

    let category = category.map(parse_category).transpose()?;
    let recipes = svc.list_recipes(category);
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id.clone(),
            name: truncate(&r.name, 30),
            category: r.category.to_string(),
            favorite: if r.favorite { "*".to_string() } else { String::new() },
            rating: r
                .average_rating()
                .map_or_else(|| "-".to_string(), |avg| format!("{avg:.1}")),
            revision: r.revision,
            calories: format!("{:.0}", r.macros_per_portion.calories),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_recipe_show(svc: &MealPlanService, id: &str, json: bool) -> Result<()> {
    let recipe = svc.get_recipe(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
        return Ok(());
    }

    let name = &recipe.name;
    let category = recipe.category;
    let revision = recipe.revision;
    let star = if recipe.favorite { " *" } else { "" };
    println!("=== {name}{star} ===");
    println!("  {category} | revision {revision} | complexity {}", recipe.complexity);

    let cooking = &recipe.cooking;
    println!(
        "  {}: {}-{} min, {}\n",
        cooking.method, cooking.duration.min_minutes, cooking.duration.max_minutes, cooking.equipment
    );

    println!("  INGREDIENTS:");
    for ing in &recipe.ingredients {
        let qty = format_quantity(ing.quantity);
        println!("    {} {qty} {} ({})", ing.name, ing.unit, ing.category);
    }

    let m = &recipe.macros_per_portion;
    println!("\n  PER PORTION:");
    println!(
        "    {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
        m.calories, m.protein, m.carbs, m.fat
    );

    if !recipe.ratings.is_empty() {
        println!("\n  RATINGS:");
        for rating in &recipe.ratings {
            let date = rating.timestamp.format("%Y-%m-%d");
            println!("    {date} {}/5 {}", rating.score, rating.comment);
        }
    }

    Ok(())
}

pub(crate) fn cmd_recipe_favorite(svc: &MealPlanService, id: &str, json: bool) -> Result<()> {
    let recipe = svc.toggle_favorite(id)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "recipe_id": recipe.id, "favorite": recipe.favorite })
        );
    } else if recipe.favorite {
        println!("Marked {} as a favorite", recipe.name);
    } else {
        println!("Removed {} from favorites", recipe.name);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_import(
    svc: &MealPlanService,
    file: &Path,
    week: Option<u32>,
    json: bool,
) -> Result<()> {
    let recipes: Vec<Recipe> = read_json(file)?;
    if recipes.is_empty() {
        bail!("No recipes found in {}", file.display());
    }

    let mut saved = Vec::with_capacity(recipes.len());
    for recipe in recipes {
        let id = recipe.id.clone();
        let stored = svc
            .put_recipe(recipe)
            .with_context(|| format!("Failed to import recipe '{id}'"))?;
        if let Some(week) = week {
            svc.add_to_week(week, &stored.id)?;
        }
        saved.push(stored);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&saved)?);
    } else {
        for r in &saved {
            let action = if r.revision == 0 { "Imported" } else { "Updated" };
            println!("{action} recipe: {} [{}] (revision {})", r.name, r.id, r.revision);
        }
        if let Some(week) = week {
            println!("Assigned {} recipe(s) to week {week}", saved.len());
        }
    }
    Ok(())
}

/// Draft a new recipe with the AI and store it at revision 0.
pub(crate) fn cmd_recipe_generate(
    svc: &MealPlanService,
    reviser: Option<&AnthropicReviser>,
    request: &str,
    category: Option<&str>,
    id: Option<&str>,
    week: Option<u32>,
    json: bool,
) -> Result<()> {
    let Some(reviser) = as_reviser(reviser) else {
        bail!("No AI collaborator configured; set ANTHROPIC_API_KEY or [ai] in config.toml");
    };
    let category = category.map(parse_category).transpose()?;
    let recipe = tokio::task::block_in_place(|| {
        svc.generate_recipe(reviser, request, category, id)
    })?;
    if let Some(week) = week {
        svc.add_to_week(week, &recipe.id)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        println!(
            "Created recipe: {} [{}] ({}, {} ingredients)",
            recipe.name,
            recipe.id,
            recipe.category,
            recipe.ingredients.len()
        );
        if let Some(week) = week {
            println!("Assigned to week {week}");
        }
    }
    Ok(())
}

pub(crate) fn cmd_complement_list(svc: &MealPlanService, json: bool) -> Result<()> {
    let complements = svc.list_complements();
    if json {
        println!("{}", serde_json::to_string_pretty(&complements)?);
        return Ok(());
    }
    if complements.is_empty() {
        eprintln!("No complements found");
        process::exit(2);
    }
    for c in &complements {
        let m = &c.macros_per_portion;
        println!(
            "[{}] {}: {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
            c.id, c.name, m.calories, m.protein, m.carbs, m.fat
        );
    }
    Ok(())
}

pub(crate) fn cmd_complement_import(svc: &MealPlanService, file: &Path, json: bool) -> Result<()> {
    let complements: Vec<Complement> = read_json(file)?;
    let mut failed = Vec::new();
    let mut imported = Vec::new();
    for complement in complements {
        let id = complement.id.clone();
        match svc.put_complement(complement) {
            Ok(()) => imported.push(id),
            Err(e) => failed.push(format!("{id}: {e}")),
        }
    }

    if json {
        if failed.is_empty() {
            println!("{}", serde_json::json!({ "imported": imported }));
        } else {
            println!("{}", json_error(&failed.join("; ")));
        }
    } else {
        for id in &imported {
            println!("Imported complement {id}");
        }
        for f in &failed {
            eprintln!("Skipped {f}");
        }
    }
    if !failed.is_empty() {
        process::exit(2);
    }
    Ok(())
}

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::feedback::{self, FeedbackOutcome, RecipeReviser};
use crate::macros::{self, MacroReport};
use crate::models::{
    Complement, Document, EntityKind, FeedbackRecord, Macros, Preferences, Recipe,
    RecipeCategory, validate_recipe,
};
use crate::rotation::{self, WeekStatus};
use crate::schedule::{self, CookingPlan};
use crate::shopping::{self, ShoppingList};
use crate::store::{BackupInfo, Store};

/// Default tolerance band when only targets are given: ±10%.
const DEFAULT_TOLERANCE_RATIO: f64 = 0.1;

/// Recipes and complements resolved for one rotation week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekPlan {
    pub week: u32,
    pub menu_name: String,
    pub recipes: Vec<Recipe>,
    pub complements: Vec<(Complement, f64)>,
}

pub struct MealPlanService {
    store: Store,
}

impl MealPlanService {
    /// Open the store at `path`, seeding defaults anchored on `today` when it doesn't exist.
    pub fn open(path: &Path, backup_dir: &Path, today: NaiveDate) -> Result<Self> {
        let store = Store::open_or_init(path, backup_dir, || Document::with_defaults(today))?;
        Ok(Self { store })
    }

    #[must_use]
    pub fn from_store(store: Store) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn document(&self) -> Document {
        self.store.document()
    }

    // --- Rotation ---

    #[must_use]
    pub fn week_status(&self, today: NaiveDate) -> WeekStatus {
        self.store
            .read(|doc| rotation::status(&doc.rotation, &doc.plan, today))
    }

    /// Persist the observed week when the calendar moved it.
    pub fn sync_rotation(&self, today: NaiveDate) -> Result<WeekStatus> {
        let (next, changed) = self.store.read(|doc| rotation::sync(&doc.rotation, today));
        if changed {
            let week = next.current_week;
            self.store.snapshot_then_commit(|doc| {
                doc.rotation = next;
                Ok(())
            })?;
            tracing::info!(week, "rotation advanced");
        }
        Ok(self.week_status(today))
    }

    pub fn set_week(&self, week: u32, today: NaiveDate) -> Result<WeekStatus> {
        self.store.snapshot_then_commit(|doc| {
            doc.rotation = rotation::set_week(&doc.rotation, week)?;
            Ok(())
        })?;
        tracing::info!(week, "rotation week overridden");
        Ok(self.week_status(today))
    }

    pub fn clear_override(&self, today: NaiveDate) -> Result<WeekStatus> {
        self.store.snapshot_then_commit(|doc| {
            doc.rotation = rotation::clear_override(&doc.rotation, today);
            Ok(())
        })?;
        Ok(self.week_status(today))
    }

    /// Add `recipe_id` to a week's menu. Adding it twice is a no-op.
    pub fn add_to_week(&self, week: u32, recipe_id: &str) -> Result<()> {
        self.store.snapshot_then_commit(|doc| {
            if !doc.recipes.contains_key(recipe_id) {
                return Err(Error::NotFound {
                    kind: EntityKind::Recipe,
                    id: recipe_id.to_string(),
                });
            }
            let total = doc.rotation.total_weeks;
            let menu = doc
                .plan
                .weeks
                .get_mut(&week)
                .ok_or(Error::InvalidWeek { week, total })?;
            if !menu.recipes.iter().any(|id| id == recipe_id) {
                menu.recipes.push(recipe_id.to_string());
            }
            Ok(())
        })
    }

    pub fn remove_from_week(&self, week: u32, recipe_id: &str) -> Result<bool> {
        self.store.snapshot_then_commit(|doc| {
            let total = doc.rotation.total_weeks;
            let menu = doc
                .plan
                .weeks
                .get_mut(&week)
                .ok_or(Error::InvalidWeek { week, total })?;
            let before = menu.recipes.len();
            menu.recipes.retain(|id| id != recipe_id);
            Ok(menu.recipes.len() != before)
        })
    }

    // --- Reports ---

    pub fn week_plan(&self, today: NaiveDate) -> Result<WeekPlan> {
        let doc = self.store.document();
        let week = rotation::effective_week(&doc.rotation, today);
        resolve_week(&doc, week)
    }

    /// One day's intake for the active week against the targets.
    ///
    /// A day eats each category's portion count, spread evenly over that
    /// category's recipes, plus the week's complements.
    pub fn macro_report(&self, today: NaiveDate) -> Result<MacroReport> {
        let doc = self.store.document();
        let week = rotation::effective_week(&doc.rotation, today);
        let plan = resolve_week(&doc, week)?;

        let mut portions: Vec<(&Macros, f64)> = Vec::new();
        for category in RecipeCategory::ALL {
            let in_category: Vec<&Recipe> = plan
                .recipes
                .iter()
                .filter(|r| r.category == category)
                .collect();
            if in_category.is_empty() {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let share = doc.plan.portions.for_category(category) / in_category.len() as f64;
            portions.extend(in_category.iter().map(|r| (&r.macros_per_portion, share)));
        }
        portions.extend(
            plan.complements
                .iter()
                .map(|(c, count)| (&c.macros_per_portion, *count)),
        );

        Ok(macros::report(
            portions,
            &doc.preferences.targets,
            &doc.preferences.tolerance,
        ))
    }

    pub fn shopping_list(&self, today: NaiveDate) -> Result<ShoppingList> {
        let doc = self.store.document();
        let week = rotation::effective_week(&doc.rotation, today);
        let plan = resolve_week(&doc, week)?;
        Ok(shopping::build(&plan.recipes, &doc.plan.category_order))
    }

    /// Cooking plan for the active week, using `template` or the preferred one.
    pub fn cooking_plan(&self, today: NaiveDate, template: Option<&str>) -> Result<CookingPlan> {
        let doc = self.store.document();
        let week = rotation::effective_week(&doc.rotation, today);
        let plan = resolve_week(&doc, week)?;
        let key = template.unwrap_or(&doc.preferences.schedule_template);
        let selected = schedule::template(&doc.plan, key)?;
        Ok(schedule::plan(key, selected, &plan.recipes))
    }

    // --- Feedback ---

    pub fn submit_feedback(
        &self,
        reviser: Option<&dyn RecipeReviser>,
        recipe_id: &str,
        score: u8,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<FeedbackOutcome> {
        feedback::submit(&self.store, reviser, recipe_id, score, comment, now)
    }

    pub fn retry_feedback(
        &self,
        reviser: Option<&dyn RecipeReviser>,
        feedback_id: Uuid,
    ) -> Result<FeedbackOutcome> {
        feedback::retry(&self.store, reviser, feedback_id)
    }

    /// Ask the collaborator for a new recipe and store it at revision 0.
    pub fn generate_recipe(
        &self,
        reviser: &dyn RecipeReviser,
        request: &str,
        category: Option<RecipeCategory>,
        id: Option<&str>,
    ) -> Result<Recipe> {
        feedback::generate(&self.store, reviser, request, category, id)
    }

    /// Feedback history, newest first. `unresolved_only` keeps records without a modification.
    #[must_use]
    pub fn list_feedback(&self, unresolved_only: bool) -> Vec<FeedbackRecord> {
        self.store.read(|doc| {
            doc.feedback
                .iter()
                .rev()
                .filter(|r| !unresolved_only || r.modification.is_none())
                .cloned()
                .collect()
        })
    }

    // --- Recipes ---

    pub fn get_recipe(&self, id: &str) -> Result<Recipe> {
        self.store.get(id)
    }

    #[must_use]
    pub fn list_recipes(&self, category: Option<RecipeCategory>) -> Vec<Recipe> {
        self.store
            .list::<Recipe>(|r| category.is_none_or(|c| r.category == c))
    }

    /// Insert or replace a recipe body. Replacing keeps ratings and the
    /// favorite flag and counts as a new revision.
    pub fn put_recipe(&self, mut recipe: Recipe) -> Result<Recipe> {
        let excluded = self.store.read(|doc| doc.preferences.excluded_tags.clone());
        validate_recipe(&recipe, &excluded)?;

        let saved = self.store.snapshot_then_commit(|doc| {
            if let Some(existing) = doc.recipes.get(&recipe.id) {
                recipe.revision = existing.revision + 1;
                recipe.ratings.clone_from(&existing.ratings);
                recipe.favorite = existing.favorite;
            } else {
                recipe.revision = 0;
            }
            doc.recipes.insert(recipe.id.clone(), recipe.clone());
            Ok(recipe)
        })?;
        tracing::info!(recipe = %saved.id, revision = saved.revision, "saved recipe");
        Ok(saved)
    }

    pub fn toggle_favorite(&self, id: &str) -> Result<Recipe> {
        self.store.snapshot_then_commit(|doc| {
            let recipe = doc.recipes.get_mut(id).ok_or_else(|| Error::NotFound {
                kind: EntityKind::Recipe,
                id: id.to_string(),
            })?;
            recipe.favorite = !recipe.favorite;
            Ok(recipe.clone())
        })
    }

    pub fn put_complement(&self, complement: Complement) -> Result<()> {
        let id = complement.id.clone();
        self.store.put(&id, complement)
    }

    #[must_use]
    pub fn list_complements(&self) -> Vec<Complement> {
        self.store.list::<Complement>(|_| true)
    }

    // --- Preferences ---

    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.store.read(|doc| doc.preferences.clone())
    }

    /// Set daily targets. Without an explicit tolerance the band is ±10% of each target.
    pub fn set_targets(&self, targets: Macros, tolerance: Option<Macros>) -> Result<Preferences> {
        let tolerance = tolerance.unwrap_or_else(|| targets.scaled(DEFAULT_TOLERANCE_RATIO));
        self.store.snapshot_then_commit(|doc| {
            doc.preferences.targets = targets;
            doc.preferences.tolerance = tolerance;
            Ok(doc.preferences.clone())
        })
    }

    pub fn set_schedule_template(&self, key: &str) -> Result<Preferences> {
        self.store.snapshot_then_commit(|doc| {
            schedule::template(&doc.plan, key)?;
            doc.preferences.schedule_template = key.to_string();
            Ok(doc.preferences.clone())
        })
    }

    pub fn set_excluded_tags(&self, tags: BTreeSet<String>) -> Result<Preferences> {
        let tags = tags
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.store.snapshot_then_commit(|doc| {
            doc.preferences.excluded_tags = tags;
            Ok(doc.preferences.clone())
        })
    }

    // --- Backups ---

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        self.store.list_backups()
    }

    pub fn restore_backup(&self, path: &Path) -> Result<PathBuf> {
        self.store.restore(path)?;
        Ok(path.to_path_buf())
    }
}

fn resolve_week(doc: &Document, week: u32) -> Result<WeekPlan> {
    let menu = rotation::recipes_for_week(&doc.rotation, &doc.plan, week)?;

    let recipes = menu
        .recipes
        .iter()
        .map(|id| {
            doc.recipes.get(id).cloned().ok_or_else(|| Error::NotFound {
                kind: EntityKind::Recipe,
                id: id.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let complements = menu
        .complements
        .iter()
        .map(|portion| {
            doc.complements
                .get(&portion.id)
                .cloned()
                .map(|c| (c, portion.portions))
                .ok_or_else(|| Error::NotFound {
                    kind: EntityKind::Complement,
                    id: portion.id.clone(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(WeekPlan {
        week,
        menu_name: menu.name.clone(),
        recipes,
        complements,
    })
}

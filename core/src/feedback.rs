//! Ratings, and recipe revisions proposed by a language model in response to
//! them. The same collaborator can also draft new recipes from a request.
//!
//! A rating is always recorded first, in its own commit. Only then is the
//! collaborator asked for a revision, outside any store lock. Whatever comes
//! back is parsed and checked with the same rules as a manual edit before a
//! second commit applies it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    CookingParams, EntityKind, FeedbackRecord, Ingredient, Macros, Rating, Recipe,
    RecipeCategory, recipe_problems, validate_score,
};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Failed(String),
}

impl From<CollaboratorError> for Error {
    fn from(e: CollaboratorError) -> Self {
        match e {
            CollaboratorError::Timeout => Self::AiCollaboratorTimeout,
            CollaboratorError::Failed(msg) => Self::AiCollaboratorError(msg),
        }
    }
}

const REVISION_KEYS: [&str; 2] = ["modifiedRecipe", "modified_recipe"];
const DRAFT_KEYS: [&str; 2] = ["newRecipe", "new_recipe"];

/// Something that can propose a revised recipe from a user's comment, or
/// draft a new one from a request.
///
/// Called synchronously and without any store lock held. Responses are
/// expected to hold `{"modifiedRecipe": {...}}` or `{"newRecipe": {...}}`,
/// but they are never trusted.
pub trait RecipeReviser: Send + Sync {
    fn revise(
        &self,
        recipe: &Recipe,
        comment: &str,
        excluded_tags: &BTreeSet<String>,
    ) -> Result<Value, CollaboratorError>;

    fn draft(
        &self,
        request: &str,
        category: Option<RecipeCategory>,
        excluded_tags: &BTreeSet<String>,
    ) -> Result<Value, CollaboratorError>;
}

/// The recipe body a collaborator may replace. Identity, favorites, ratings
/// and revision are never taken from a proposal.
#[derive(Debug, Clone, Deserialize)]
struct RecipeDraft {
    name: String,
    #[serde(default)]
    category: Option<RecipeCategory>,
    ingredients: Vec<Ingredient>,
    macros_per_portion: Macros,
    cooking: CookingParams,
    complexity: u8,
}

impl RecipeDraft {
    fn apply_to(&self, base: &Recipe) -> Recipe {
        Recipe {
            name: self.name.clone(),
            category: self.category.unwrap_or(base.category),
            ingredients: self.ingredients.clone(),
            macros_per_portion: self.macros_per_portion,
            cooking: self.cooking.clone(),
            complexity: self.complexity,
            ..base.clone()
        }
    }

    fn into_recipe(self, id: String, category: RecipeCategory) -> Recipe {
        Recipe {
            id,
            name: self.name,
            category,
            ingredients: self.ingredients,
            macros_per_portion: self.macros_per_portion,
            cooking: self.cooking,
            complexity: self.complexity,
            favorite: false,
            ratings: Vec::new(),
            revision: 0,
            extra: Map::new(),
        }
    }
}

struct Proposal {
    draft: RecipeDraft,
    changes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevisionStatus {
    NotRequested { reason: String },
    Applied { summary: String, revision: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackOutcome {
    pub feedback_id: Uuid,
    pub recipe_id: String,
    pub score: u8,
    pub revision: RevisionStatus,
}

/// Record a rating and, when it is low enough and explained, ask for a revision.
///
/// The rating survives any later failure: a rejected proposal or collaborator
/// error is returned after the first commit, and the record can be retried.
pub fn submit(
    store: &Store,
    reviser: Option<&dyn RecipeReviser>,
    recipe_id: &str,
    score: u8,
    comment: &str,
    now: DateTime<Utc>,
) -> Result<FeedbackOutcome> {
    validate_score(score)?;
    store.get::<Recipe>(recipe_id)?;

    let comment = comment.trim().to_string();
    let record = FeedbackRecord {
        id: Uuid::new_v4(),
        recipe_id: recipe_id.to_string(),
        score,
        comment: comment.clone(),
        timestamp: now,
        modification: None,
    };

    store.snapshot_then_commit(|doc| {
        let recipe = doc
            .recipes
            .get_mut(recipe_id)
            .ok_or_else(|| not_found(EntityKind::Recipe, recipe_id))?;
        recipe.ratings.push(Rating {
            score,
            comment: comment.clone(),
            timestamp: now,
        });
        doc.feedback.push(record.clone());
        Ok(())
    })?;
    tracing::info!(recipe = recipe_id, score, feedback = %record.id, "recorded rating");

    let threshold = store.read(|doc| doc.plan.modification_threshold);
    let skip = if score > threshold {
        Some(format!("score {score} is above the revision threshold {threshold}"))
    } else if comment.is_empty() {
        Some("no comment to act on".to_string())
    } else if reviser.is_none() {
        Some("no recipe reviser configured".to_string())
    } else {
        None
    };

    let revision = match (skip, reviser) {
        (None, Some(reviser)) => revise(store, reviser, &record)?,
        (reason, _) => RevisionStatus::NotRequested {
            reason: reason.unwrap_or_default(),
        },
    };

    Ok(FeedbackOutcome {
        feedback_id: record.id,
        recipe_id: record.recipe_id,
        score,
        revision,
    })
}

/// Ask again for a revision on a record whose earlier attempt failed.
pub fn retry(
    store: &Store,
    reviser: Option<&dyn RecipeReviser>,
    feedback_id: Uuid,
) -> Result<FeedbackOutcome> {
    let record = store
        .read(|doc| doc.feedback.iter().find(|r| r.id == feedback_id).cloned())
        .ok_or_else(|| not_found(EntityKind::Feedback, &feedback_id.to_string()))?;

    if record.modification.is_some() {
        return Err(Error::FeedbackAlreadyResolved(feedback_id.to_string()));
    }
    if record.comment.trim().is_empty() {
        return Err(Error::InvalidFeedback(
            "feedback has no comment to act on".to_string(),
        ));
    }
    let reviser = reviser.ok_or_else(|| {
        Error::AiCollaboratorError("no recipe reviser configured".to_string())
    })?;

    let revision = revise(store, reviser, &record)?;
    Ok(FeedbackOutcome {
        feedback_id: record.id,
        recipe_id: record.recipe_id,
        score: record.score,
        revision,
    })
}

fn revise(
    store: &Store,
    reviser: &dyn RecipeReviser,
    record: &FeedbackRecord,
) -> Result<RevisionStatus> {
    let (recipe, excluded) = store.read(|doc| {
        (
            doc.recipes.get(&record.recipe_id).cloned(),
            doc.preferences.excluded_tags.clone(),
        )
    });
    let recipe = recipe.ok_or_else(|| not_found(EntityKind::Recipe, &record.recipe_id))?;

    let raw = reviser
        .revise(&recipe, &record.comment, &excluded)
        .inspect_err(|e| {
            tracing::warn!(recipe = %recipe.id, error = %e, "recipe reviser failed");
        })?;

    let reject = |reasons: Vec<String>| {
        tracing::warn!(recipe = %recipe.id, ?reasons, "rejected revision proposal");
        Error::ProposalRejected {
            recipe_id: recipe.id.clone(),
            reasons,
        }
    };

    let proposal = parse_proposal(&raw, &REVISION_KEYS).map_err(|reason| reject(vec![reason]))?;
    let candidate = proposal.draft.apply_to(&recipe);
    let problems = recipe_problems(&candidate, &excluded);
    if !problems.is_empty() {
        return Err(reject(problems));
    }

    let summary = if proposal.changes.is_empty() {
        summarize_changes(&recipe, &candidate)
    } else {
        proposal.changes.join("; ")
    };

    let revision = store.snapshot_then_commit(|doc| {
        let entry = doc
            .feedback
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| not_found(EntityKind::Feedback, &record.id.to_string()))?;
        if entry.modification.is_some() {
            return Err(Error::FeedbackAlreadyResolved(record.id.to_string()));
        }
        entry.modification = Some(summary.clone());

        let current = doc
            .recipes
            .get_mut(&record.recipe_id)
            .ok_or_else(|| not_found(EntityKind::Recipe, &record.recipe_id))?;
        // Ratings may have arrived while the collaborator was working; keep them.
        let mut revised = proposal.draft.apply_to(current);
        revised.revision = current.revision + 1;
        *current = revised;
        Ok(current.revision)
    })?;

    tracing::info!(recipe = %record.recipe_id, revision, "applied recipe revision");
    Ok(RevisionStatus::Applied { summary, revision })
}

/// Ask the collaborator for a new recipe and store it at revision 0.
///
/// `category` pins the category; otherwise the draft must name one. Without
/// an `id` one is derived from the drafted name. An existing id is refused
/// rather than overwritten.
pub fn generate(
    store: &Store,
    reviser: &dyn RecipeReviser,
    request: &str,
    category: Option<RecipeCategory>,
    id: Option<&str>,
) -> Result<Recipe> {
    let request = request.trim();
    let label = id.unwrap_or("new recipe").to_string();
    if request.is_empty() {
        return Err(Error::InvalidRecipe {
            id: label,
            reasons: vec!["request must describe the recipe".to_string()],
        });
    }
    if let Some(id) = id {
        ensure_new_id(store, id)?;
    }

    let excluded = store.read(|doc| doc.preferences.excluded_tags.clone());
    let raw = reviser
        .draft(request, category, &excluded)
        .inspect_err(|e| tracing::warn!(error = %e, "recipe draft failed"))?;

    let reject = |reasons: Vec<String>| {
        tracing::warn!(recipe = %label, ?reasons, "rejected recipe draft");
        Error::ProposalRejected {
            recipe_id: label.clone(),
            reasons,
        }
    };

    let proposal = parse_proposal(&raw, &DRAFT_KEYS).map_err(|reason| reject(vec![reason]))?;
    let category = category
        .or(proposal.draft.category)
        .ok_or_else(|| reject(vec!["draft has no category".to_string()]))?;
    let id = id.map_or_else(|| slug(&proposal.draft.name), str::to_string);
    let recipe = proposal.draft.into_recipe(id, category);
    let problems = recipe_problems(&recipe, &excluded);
    if !problems.is_empty() {
        return Err(reject(problems));
    }
    ensure_new_id(store, &recipe.id)?;

    store.snapshot_then_commit(|doc| {
        if doc.recipes.contains_key(&recipe.id) {
            return Err(duplicate_id(&recipe.id));
        }
        doc.recipes.insert(recipe.id.clone(), recipe.clone());
        Ok(())
    })?;
    tracing::info!(recipe = %recipe.id, "stored drafted recipe");
    Ok(recipe)
}

fn ensure_new_id(store: &Store, id: &str) -> Result<()> {
    if store.read(|doc| doc.recipes.contains_key(id)) {
        Err(duplicate_id(id))
    } else {
        Ok(())
    }
}

fn duplicate_id(id: &str) -> Error {
    Error::InvalidRecipe {
        id: id.to_string(),
        reasons: vec!["a recipe with this id already exists".to_string()],
    }
}

/// Lowercase id from a recipe name: "Chana Masala!" becomes "chana-masala".
fn slug(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn not_found(kind: EntityKind, id: &str) -> Error {
    Error::NotFound {
        kind,
        id: id.to_string(),
    }
}

/// Pull the proposal out of a collaborator response. Models sometimes wrap
/// their JSON in prose, so a string response is searched for an object.
fn parse_proposal(raw: &Value, keys: &[&str]) -> std::result::Result<Proposal, String> {
    let parsed;
    let object = match raw {
        Value::Object(_) => raw,
        Value::String(text) => {
            let start = text.find('{');
            let end = text.rfind('}');
            let json = match (start, end) {
                (Some(s), Some(e)) if s < e => &text[s..=e],
                _ => return Err("response does not contain a JSON object".to_string()),
            };
            parsed = serde_json::from_str::<Value>(json)
                .map_err(|e| format!("response is not valid JSON: {e}"))?;
            &parsed
        }
        _ => return Err("response is not a JSON object".to_string()),
    };

    let key = keys.first().copied().unwrap_or("recipe");
    let body = keys
        .iter()
        .find_map(|k| object.get(*k))
        .ok_or_else(|| format!("response has no {key}"))?;
    let draft: RecipeDraft = serde_json::from_value(body.clone())
        .map_err(|e| format!("{key} is malformed: {e}"))?;

    let changes = object
        .get("changes")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Proposal { draft, changes })
}

/// Short human-readable description of what differs between two recipe bodies.
#[must_use]
pub fn summarize_changes(before: &Recipe, after: &Recipe) -> String {
    let mut parts = Vec::new();

    if before.name != after.name {
        parts.push(format!("renamed to '{}'", after.name));
    }
    if before.category != after.category {
        parts.push(format!("category {} -> {}", before.category, after.category));
    }

    let names = |r: &Recipe| -> BTreeSet<String> {
        r.ingredients
            .iter()
            .map(|i| i.name.trim().to_lowercase())
            .collect()
    };
    let (old, new) = (names(before), names(after));
    let added: Vec<_> = new.difference(&old).cloned().collect();
    let removed: Vec<_> = old.difference(&new).cloned().collect();
    if !added.is_empty() {
        parts.push(format!("added {}", added.join(", ")));
    }
    if !removed.is_empty() {
        parts.push(format!("removed {}", removed.join(", ")));
    }
    if added.is_empty() && removed.is_empty() && before.ingredients != after.ingredients {
        parts.push("adjusted ingredient quantities".to_string());
    }

    if before.macros_per_portion != after.macros_per_portion {
        let (b, a) = (before.macros_per_portion, after.macros_per_portion);
        parts.push(format!(
            "macros {:.0}P/{:.0}C/{:.0}F -> {:.0}P/{:.0}C/{:.0}F",
            b.protein, b.carbs, b.fat, a.protein, a.carbs, a.fat
        ));
    }
    if before.cooking != after.cooking {
        parts.push(format!(
            "cooking {} {}-{} min",
            after.cooking.method,
            after.cooking.duration.min_minutes,
            after.cooking.duration.max_minutes
        ));
    }
    if before.complexity != after.complexity {
        parts.push(format!(
            "complexity {} -> {}",
            before.complexity, after.complexity
        ));
    }

    if parts.is_empty() {
        "no visible changes".to_string()
    } else {
        parts.join("; ")
    }
}

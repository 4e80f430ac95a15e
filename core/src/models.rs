use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, AddAssign};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Highest `database_version` this build knows how to read.
pub const DATABASE_VERSION: u32 = 1;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;
pub const MIN_COMPLEXITY: u8 = 1;
pub const MAX_COMPLEXITY: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Recipe,
    Complement,
    Feedback,
    Week,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recipe => "recipe",
            Self::Complement => "complement",
            Self::Feedback => "feedback",
            Self::Week => "week",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeCategory {
    Protein,
    Legume,
    Base,
    /// Quick preparations: sides, snacks, anything that doesn't need a long cook.
    Complement,
}

impl RecipeCategory {
    pub const ALL: [Self; 4] = [Self::Protein, Self::Legume, Self::Base, Self::Complement];

    /// Cooking order: proteins first, quick preparations last.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Protein => 0,
            Self::Legume => 1,
            Self::Base => 2,
            Self::Complement => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protein => "protein",
            Self::Legume => "legume",
            Self::Base => "base",
            Self::Complement => "complement",
        }
    }
}

impl fmt::Display for RecipeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseCategory {
    Protein,
    Legume,
    Grain,
    Vegetable,
    Spice,
    Dairy,
    Other,
}

impl PurchaseCategory {
    pub const ALL: [Self; 7] = [
        Self::Protein,
        Self::Legume,
        Self::Grain,
        Self::Vegetable,
        Self::Spice,
        Self::Dairy,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protein => "protein",
            Self::Legume => "legume",
            Self::Grain => "grain",
            Self::Vegetable => "vegetable",
            Self::Spice => "spice",
            Self::Dairy => "dairy",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for PurchaseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    SlowCooker,
    Oven,
    Stovetop,
    RiceCooker,
    /// No heat source: portioning, salads, marinades.
    Counter,
}

impl Equipment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SlowCooker => "slow_cooker",
            Self::Oven => "oven",
            Self::Stovetop => "stovetop",
            Self::RiceCooker => "rice_cooker",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for Equipment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nutrient {
    Protein,
    Carbs,
    Fat,
    Calories,
}

impl Nutrient {
    pub const ALL: [Self; 4] = [Self::Protein, Self::Carbs, Self::Fat, Self::Calories];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protein => "protein",
            Self::Carbs => "carbs",
            Self::Fat => "fat",
            Self::Calories => "calories",
        }
    }

    #[must_use]
    pub fn unit(self) -> &'static str {
        match self {
            Self::Calories => "kcal",
            _ => "g",
        }
    }
}

/// Grams of protein/carbs/fat plus kcal, either per portion or as a total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub calories: f64,
}

impl Macros {
    #[must_use]
    pub fn new(protein: f64, carbs: f64, fat: f64, calories: f64) -> Self {
        Self {
            protein,
            carbs,
            fat,
            calories,
        }
    }

    #[must_use]
    pub fn get(&self, nutrient: Nutrient) -> f64 {
        match nutrient {
            Nutrient::Protein => self.protein,
            Nutrient::Carbs => self.carbs,
            Nutrient::Fat => self.fat,
            Nutrient::Calories => self.calories,
        }
    }

    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            protein: self.protein * factor,
            carbs: self.carbs * factor,
            fat: self.fat * factor,
            calories: self.calories * factor,
        }
    }
}

impl Add for Macros {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            protein: self.protein + rhs.protein,
            carbs: self.carbs + rhs.carbs,
            fat: self.fat + rhs.fat,
            calories: self.calories + rhs.calories,
        }
    }
}

impl AddAssign for Macros {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: PurchaseCategory,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl Ingredient {
    /// True when the ingredient's name or any of its tags is in `excluded`.
    #[must_use]
    pub fn is_excluded_by(&self, excluded: &BTreeSet<String>) -> bool {
        excluded.contains(&self.name.trim().to_lowercase())
            || self.tags.iter().any(|t| excluded.contains(&t.to_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min_minutes: u32,
    pub max_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookingParams {
    pub method: String,
    pub duration: DurationRange,
    pub equipment: Equipment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub score: u8,
    #[serde(default)]
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub category: RecipeCategory,
    pub ingredients: Vec<Ingredient>,
    pub macros_per_portion: Macros,
    pub cooking: CookingParams,
    pub complexity: u8,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub ratings: Vec<Rating>,
    #[serde(default)]
    pub revision: u32,
    /// Fields the engine doesn't know about, kept so they survive a rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Recipe {
    #[must_use]
    pub fn average_rating(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            return None;
        }
        let sum: f64 = self.ratings.iter().map(|r| f64::from(r.score)).sum();
        #[allow(clippy::cast_precision_loss)]
        let count = self.ratings.len() as f64;
        Some(sum / count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complement {
    pub id: String,
    pub name: String,
    pub macros_per_portion: Macros,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub targets: Macros,
    pub tolerance: Macros,
    pub schedule_template: String,
    #[serde(default)]
    pub excluded_tags: BTreeSet<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            targets: Macros::new(145.0, 380.0, 100.0, 2900.0),
            tolerance: Macros::new(14.5, 38.0, 10.0, 290.0),
            schedule_template: DEFAULT_TEMPLATE.to_string(),
            excluded_tags: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    pub anchor: NaiveDate,
    pub cadence_days: u32,
    pub total_weeks: u32,
    /// Last week observed by `sync`; informational, never authoritative.
    pub current_week: u32,
    #[serde(default)]
    pub override_week: Option<u32>,
}

impl RotationState {
    #[must_use]
    pub fn new(anchor: NaiveDate, cadence_days: u32, total_weeks: u32) -> Self {
        Self {
            anchor,
            cadence_days,
            total_weeks,
            current_week: 1,
            override_week: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplementPortion {
    pub id: String,
    pub portions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekMenu {
    pub name: String,
    pub recipes: Vec<String>,
    #[serde(default)]
    pub complements: Vec<ComplementPortion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub day: String,
    pub start: String,
    pub budget_minutes: u32,
    /// Concurrent runs allowed per piece of equipment during this session.
    pub capacity: BTreeMap<Equipment, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTemplate {
    pub name: String,
    pub sessions: Vec<Session>,
}

/// Portions eaten per day for each recipe category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortionRules {
    pub protein: f64,
    pub legume: f64,
    pub base: f64,
    pub complement: f64,
}

impl PortionRules {
    #[must_use]
    pub fn for_category(&self, category: RecipeCategory) -> f64 {
        match category {
            RecipeCategory::Protein => self.protein,
            RecipeCategory::Legume => self.legume,
            RecipeCategory::Base => self.base,
            RecipeCategory::Complement => self.complement,
        }
    }
}

impl Default for PortionRules {
    fn default() -> Self {
        Self {
            protein: 2.0,
            legume: 1.5,
            base: 1.0,
            complement: 1.0,
        }
    }
}

pub const DEFAULT_TEMPLATE: &str = "weekend_batch";
pub const DEFAULT_CADENCE_DAYS: u32 = 14;
pub const DEFAULT_MODIFICATION_THRESHOLD: u8 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub weeks: BTreeMap<u32, WeekMenu>,
    #[serde(default = "default_category_order")]
    pub category_order: Vec<PurchaseCategory>,
    pub templates: BTreeMap<String, ScheduleTemplate>,
    #[serde(default)]
    pub portions: PortionRules,
    #[serde(default = "default_modification_threshold")]
    pub modification_threshold: u8,
}

fn default_category_order() -> Vec<PurchaseCategory> {
    PurchaseCategory::ALL.to_vec()
}

fn default_modification_threshold() -> u8 {
    DEFAULT_MODIFICATION_THRESHOLD
}

impl Default for PlanConfig {
    fn default() -> Self {
        let menu = |name: &str| WeekMenu {
            name: name.to_string(),
            recipes: Vec::new(),
            complements: Vec::new(),
        };
        let weeks = BTreeMap::from([
            (1, menu("Mediterranean")),
            (2, menu("Mexican")),
            (3, menu("Asian")),
            (4, menu("Moroccan")),
        ]);

        let weekend_batch = ScheduleTemplate {
            name: "Weekend batch (Saturday + Sunday)".to_string(),
            sessions: vec![
                Session {
                    day: "saturday".to_string(),
                    start: "10:00".to_string(),
                    budget_minutes: 480,
                    capacity: BTreeMap::from([(Equipment::SlowCooker, 2), (Equipment::Stovetop, 1)]),
                },
                Session {
                    day: "sunday".to_string(),
                    start: "10:00".to_string(),
                    budget_minutes: 480,
                    capacity: BTreeMap::from([
                        (Equipment::SlowCooker, 2),
                        (Equipment::Oven, 1),
                        (Equipment::Stovetop, 2),
                        (Equipment::RiceCooker, 1),
                        (Equipment::Counter, 2),
                    ]),
                },
            ],
        };
        let single_sunday = ScheduleTemplate {
            name: "Single Sunday session".to_string(),
            sessions: vec![Session {
                day: "sunday".to_string(),
                start: "10:00".to_string(),
                budget_minutes: 270,
                capacity: BTreeMap::from([
                    (Equipment::SlowCooker, 2),
                    (Equipment::Oven, 1),
                    (Equipment::Stovetop, 2),
                    (Equipment::RiceCooker, 1),
                    (Equipment::Counter, 2),
                ]),
            }],
        };

        Self {
            weeks,
            category_order: default_category_order(),
            templates: BTreeMap::from([
                (DEFAULT_TEMPLATE.to_string(), weekend_batch),
                ("single_sunday".to_string(), single_sunday),
            ]),
            portions: PortionRules::default(),
            modification_threshold: DEFAULT_MODIFICATION_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub recipe_id: String,
    pub score: u8,
    #[serde(default)]
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    /// Set once, when the pipeline applies a revision for this record.
    #[serde(default)]
    pub modification: Option<String>,
}

/// The whole persisted state, one JSON document keyed by entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub database_version: u32,
    #[serde(default)]
    pub recipes: BTreeMap<String, Recipe>,
    #[serde(default)]
    pub complements: BTreeMap<String, Complement>,
    #[serde(default)]
    pub preferences: Preferences,
    pub rotation: RotationState,
    #[serde(default)]
    pub plan: PlanConfig,
    #[serde(default)]
    pub feedback: Vec<FeedbackRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    /// Fresh document for a first run, rotation anchored on `anchor`.
    #[must_use]
    pub fn with_defaults(anchor: NaiveDate) -> Self {
        let plan = PlanConfig::default();
        let total_weeks = u32::try_from(plan.weeks.len()).unwrap_or(u32::MAX);
        Self {
            database_version: DATABASE_VERSION,
            recipes: BTreeMap::new(),
            complements: BTreeMap::new(),
            preferences: Preferences::default(),
            rotation: RotationState::new(anchor, DEFAULT_CADENCE_DAYS, total_weeks),
            plan,
            feedback: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Boundary invariants checked on load and before every commit.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.database_version > DATABASE_VERSION {
            problems.push(format!(
                "database_version {} is not supported",
                self.database_version
            ));
        }

        for (key, recipe) in &self.recipes {
            if key != &recipe.id {
                problems.push(format!("recipe stored under '{key}' has id '{}'", recipe.id));
            }
            for reason in recipe_problems(recipe, &BTreeSet::new()) {
                problems.push(format!("recipe '{key}': {reason}"));
            }
        }

        for (key, complement) in &self.complements {
            if key != &complement.id {
                problems.push(format!(
                    "complement stored under '{key}' has id '{}'",
                    complement.id
                ));
            }
            for reason in macro_problems(&complement.macros_per_portion) {
                problems.push(format!("complement '{key}': {reason}"));
            }
        }

        for nutrient in Nutrient::ALL {
            let target = self.preferences.targets.get(nutrient);
            if !(target.is_finite() && target > 0.0) {
                problems.push(format!("target {} must be positive", nutrient.as_str()));
            }
            let tolerance = self.preferences.tolerance.get(nutrient);
            if !(tolerance.is_finite() && tolerance >= 0.0) {
                problems.push(format!(
                    "tolerance {} must be non-negative",
                    nutrient.as_str()
                ));
            }
        }

        let rotation = &self.rotation;
        if rotation.cadence_days == 0 {
            problems.push("rotation cadence_days must be at least 1".to_string());
        }
        if rotation.total_weeks == 0 {
            problems.push("rotation total_weeks must be at least 1".to_string());
        }
        if !(1..=rotation.total_weeks).contains(&rotation.current_week) {
            problems.push(format!(
                "rotation current_week {} outside 1..={}",
                rotation.current_week, rotation.total_weeks
            ));
        }
        if let Some(week) = rotation.override_week {
            if !(1..=rotation.total_weeks).contains(&week) {
                problems.push(format!(
                    "rotation override_week {week} outside 1..={}",
                    rotation.total_weeks
                ));
            }
        }
        for week in self.plan.weeks.keys() {
            if !(1..=rotation.total_weeks).contains(week) {
                problems.push(format!(
                    "plan defines week {week} outside 1..={}",
                    rotation.total_weeks
                ));
            }
        }

        if self.plan.modification_threshold > MAX_SCORE {
            problems.push(format!(
                "modification_threshold {} exceeds max score {MAX_SCORE}",
                self.plan.modification_threshold
            ));
        }

        problems
    }
}

fn macro_problems(macros: &Macros) -> Vec<String> {
    Nutrient::ALL
        .iter()
        .filter(|n| {
            let v = macros.get(**n);
            !(v.is_finite() && v >= 0.0)
        })
        .map(|n| format!("{} must be a non-negative number", n.as_str()))
        .collect()
}

/// Everything wrong with a recipe body. Empty means the recipe is acceptable.
///
/// Manual edits and AI proposals both go through here.
#[must_use]
pub fn recipe_problems(recipe: &Recipe, excluded_tags: &BTreeSet<String>) -> Vec<String> {
    let mut problems = Vec::new();

    if recipe.id.trim().is_empty() {
        problems.push("id must not be empty".to_string());
    }
    if recipe.name.trim().is_empty() {
        problems.push("name must not be empty".to_string());
    }
    problems.extend(macro_problems(&recipe.macros_per_portion));

    if recipe.ingredients.is_empty() {
        problems.push("ingredient list must not be empty".to_string());
    }
    for ingredient in &recipe.ingredients {
        if ingredient.name.trim().is_empty() {
            problems.push("ingredient name must not be empty".to_string());
        }
        if !(ingredient.quantity.is_finite() && ingredient.quantity >= 0.0) {
            problems.push(format!(
                "ingredient '{}' quantity must be a non-negative number",
                ingredient.name
            ));
        }
        if ingredient.is_excluded_by(excluded_tags) {
            problems.push(format!(
                "ingredient '{}' is excluded by dietary restrictions",
                ingredient.name
            ));
        }
    }

    let duration = recipe.cooking.duration;
    if duration.min_minutes == 0 || duration.min_minutes > duration.max_minutes {
        problems.push(format!(
            "duration range {}..{} minutes is malformed",
            duration.min_minutes, duration.max_minutes
        ));
    }

    if !(MIN_COMPLEXITY..=MAX_COMPLEXITY).contains(&recipe.complexity) {
        problems.push(format!(
            "complexity {} outside {MIN_COMPLEXITY}..={MAX_COMPLEXITY}",
            recipe.complexity
        ));
    }

    for rating in &recipe.ratings {
        if !(MIN_SCORE..=MAX_SCORE).contains(&rating.score) {
            problems.push(format!("rating score {} outside 1..=5", rating.score));
        }
    }

    problems
}

pub fn validate_recipe(recipe: &Recipe, excluded_tags: &BTreeSet<String>) -> Result<()> {
    let reasons = recipe_problems(recipe, excluded_tags);
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidRecipe {
            id: recipe.id.clone(),
            reasons,
        })
    }
}

pub fn validate_score(score: u8) -> Result<()> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(())
    } else {
        Err(Error::InvalidFeedback(format!(
            "score must be between {MIN_SCORE} and {MAX_SCORE} (got {score})"
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ingredient(name: &str, qty: f64, unit: &str, category: PurchaseCategory) -> Ingredient {
        Ingredient {
            name: name.to_string(),
            quantity: qty,
            unit: unit.to_string(),
            category,
            tags: BTreeSet::new(),
        }
    }

    pub(crate) fn sample_recipe(id: &str, category: RecipeCategory) -> Recipe {
        Recipe {
            id: id.to_string(),
            name: format!("Recipe {id}"),
            category,
            ingredients: vec![
                ingredient("rice", 200.0, "g", PurchaseCategory::Grain),
                ingredient("onion", 1.0, "unit", PurchaseCategory::Vegetable),
            ],
            macros_per_portion: Macros::new(30.0, 45.0, 12.0, 420.0),
            cooking: CookingParams {
                method: "slow cook".to_string(),
                duration: DurationRange {
                    min_minutes: 240,
                    max_minutes: 360,
                },
                equipment: Equipment::SlowCooker,
            },
            complexity: 2,
            favorite: false,
            ratings: Vec::new(),
            revision: 0,
            extra: Map::new(),
        }
    }

    pub(crate) fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_default_document_is_valid() {
        let doc = Document::with_defaults(anchor());
        assert!(doc.problems().is_empty(), "{:?}", doc.problems());
        assert_eq!(doc.rotation.total_weeks, 4);
        assert_eq!(doc.rotation.cadence_days, 14);
    }

    #[test]
    fn test_recipe_validation_accepts_sample() {
        let recipe = sample_recipe("chicken", RecipeCategory::Protein);
        assert!(validate_recipe(&recipe, &BTreeSet::new()).is_ok());
    }

    #[test]
    fn test_recipe_validation_collects_every_problem() {
        let mut recipe = sample_recipe("bad", RecipeCategory::Protein);
        recipe.macros_per_portion.fat = -1.0;
        recipe.ingredients.clear();
        recipe.cooking.duration = DurationRange {
            min_minutes: 90,
            max_minutes: 30,
        };
        recipe.complexity = 7;

        let problems = recipe_problems(&recipe, &BTreeSet::new());
        assert_eq!(problems.len(), 4, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("fat")));
        assert!(problems.iter().any(|p| p.contains("ingredient list")));
    }

    #[test]
    fn test_recipe_validation_rejects_nan_macros() {
        let mut recipe = sample_recipe("nan", RecipeCategory::Base);
        recipe.macros_per_portion.calories = f64::NAN;
        assert!(validate_recipe(&recipe, &BTreeSet::new()).is_err());
    }

    #[test]
    fn test_excluded_ingredient_by_name_and_tag() {
        let mut recipe = sample_recipe("r", RecipeCategory::Base);
        let excluded: BTreeSet<String> = ["rice".to_string()].into();
        assert!(validate_recipe(&recipe, &excluded).is_err());

        recipe.ingredients[0].name = "Cauliflower rice".to_string();
        assert!(validate_recipe(&recipe, &excluded).is_ok());

        let gluten: BTreeSet<String> = ["gluten".to_string()].into();
        recipe.ingredients[1].tags.insert("Gluten".to_string());
        assert!(validate_recipe(&recipe, &gluten).is_err());
    }

    #[test]
    fn test_validate_score() {
        assert!(validate_score(1).is_ok());
        assert!(validate_score(5).is_ok());
        assert!(validate_score(0).is_err());
        assert!(validate_score(6).is_err());
    }

    #[test]
    fn test_unknown_recipe_fields_survive_roundtrip() {
        let mut value = serde_json::to_value(sample_recipe("x", RecipeCategory::Legume)).unwrap();
        value["origin"] = serde_json::json!("grandma");
        let recipe: Recipe = serde_json::from_value(value).unwrap();
        assert_eq!(recipe.extra["origin"], "grandma");

        let back = serde_json::to_value(&recipe).unwrap();
        assert_eq!(back["origin"], "grandma");
    }

    #[test]
    fn test_macros_add_and_scale() {
        let a = Macros::new(10.0, 20.0, 5.0, 200.0);
        let total = a + a.scaled(1.5);
        assert!((total.protein - 25.0).abs() < f64::EPSILON);
        assert!((total.calories - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_average_rating() {
        let mut recipe = sample_recipe("r", RecipeCategory::Protein);
        assert!(recipe.average_rating().is_none());
        for score in [2, 4] {
            recipe.ratings.push(Rating {
                score,
                comment: String::new(),
                timestamp: Utc::now(),
            });
        }
        assert!((recipe.average_rating().unwrap() - 3.0).abs() < f64::EPSILON);
    }
}

//! Assigns a week's recipes to the sessions of a cooking template.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Equipment, PlanConfig, Recipe, RecipeCategory, ScheduleTemplate, Session};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRecipe {
    pub recipe_id: String,
    pub name: String,
    pub category: RecipeCategory,
    pub equipment: Equipment,
    pub min_minutes: u32,
    pub max_minutes: u32,
    /// Minutes after the session start when this run begins on its unit.
    pub offset_minutes: u32,
}

impl PlannedRecipe {
    fn finish(&self) -> u32 {
        self.offset_minutes + self.max_minutes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedSession {
    pub day: String,
    pub start: String,
    pub budget_minutes: u32,
    pub recipes: Vec<PlannedRecipe>,
}

impl PlannedSession {
    /// Wall-clock length of the session: the latest finishing run.
    #[must_use]
    pub fn expected_minutes(&self) -> u32 {
        self.recipes.iter().map(PlannedRecipe::finish).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unplaced {
    pub recipe_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CookingPlan {
    pub template: String,
    pub template_name: String,
    pub sessions: Vec<PlannedSession>,
    pub unplaced: Vec<Unplaced>,
}

impl CookingPlan {
    #[must_use]
    pub fn placed_count(&self) -> usize {
        self.sessions.iter().map(|s| s.recipes.len()).sum()
    }

    pub fn ensure_complete(self) -> Result<Self> {
        if self.unplaced.is_empty() {
            Ok(self)
        } else {
            Err(Error::ScheduleOverflow(
                self.unplaced.into_iter().map(|u| u.recipe_id).collect(),
            ))
        }
    }
}

/// Cooking order: category priority, then the most involved recipes first, then id.
fn sort_for_cooking(recipes: &mut [&Recipe]) {
    recipes.sort_by(|a, b| {
        a.category
            .priority()
            .cmp(&b.category.priority())
            .then_with(|| b.complexity.cmp(&a.complexity))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub fn template<'a>(plan: &'a PlanConfig, key: &str) -> Result<&'a ScheduleTemplate> {
    plan.templates
        .get(key)
        .ok_or_else(|| Error::UnknownTemplate(key.to_string()))
}

/// Booked minutes per unit of equipment in one session. Units run in
/// parallel; runs on the same unit follow each other.
#[derive(Default, Clone)]
struct Lanes(BTreeMap<Equipment, Vec<u32>>);

impl Lanes {
    /// The least-booked unit that can still take `minutes` within `budget`.
    fn free_unit(&self, session: &Session, equipment: Equipment, minutes: u32) -> Option<usize> {
        let capacity = session.capacity.get(&equipment).copied().unwrap_or(0) as usize;
        let booked = self.0.get(&equipment).map_or(&[][..], Vec::as_slice);
        (0..capacity)
            .map(|unit| (unit, booked.get(unit).copied().unwrap_or(0)))
            .filter(|(_, used)| used + minutes <= session.budget_minutes)
            .min_by_key(|(_, used)| *used)
            .map(|(unit, _)| unit)
    }

    /// Book `minutes` on `unit`, returning the run's start offset.
    fn book(&mut self, equipment: Equipment, unit: usize, minutes: u32) -> u32 {
        let booked = self.0.entry(equipment).or_default();
        if booked.len() <= unit {
            booked.resize(unit + 1, 0);
        }
        let offset = booked[unit];
        booked[unit] += minutes;
        offset
    }
}

fn unplaced_reason(template: &ScheduleTemplate, recipe: &Recipe) -> String {
    let equipment = recipe.cooking.equipment;
    let max = recipe.cooking.duration.max_minutes;
    let offered = template
        .sessions
        .iter()
        .any(|s| s.capacity.get(&equipment).copied().unwrap_or(0) > 0);
    let long_enough = template.sessions.iter().any(|s| s.budget_minutes >= max);
    if !offered {
        format!("no session offers {equipment}")
    } else if !long_enough {
        format!("takes up to {max} min, longer than any session")
    } else {
        format!("no {equipment} slot has {max} min left in any session")
    }
}

/// Greedy first-fit over the sessions in template order. A recipe goes to the
/// first session with an equipment unit whose booked time plus the recipe's
/// `max_minutes` stays within the session budget.
#[must_use]
pub fn plan<'a>(
    template_key: &str,
    template: &ScheduleTemplate,
    recipes: impl IntoIterator<Item = &'a Recipe>,
) -> CookingPlan {
    let mut ordered: Vec<&Recipe> = recipes.into_iter().collect();
    sort_for_cooking(&mut ordered);

    let mut lanes: Vec<Lanes> = vec![Lanes::default(); template.sessions.len()];
    let mut sessions: Vec<PlannedSession> = template
        .sessions
        .iter()
        .map(|s| PlannedSession {
            day: s.day.clone(),
            start: s.start.clone(),
            budget_minutes: s.budget_minutes,
            recipes: Vec::new(),
        })
        .collect();
    let mut unplaced = Vec::new();

    for recipe in ordered {
        let equipment = recipe.cooking.equipment;
        let minutes = recipe.cooking.duration.max_minutes;
        let slot = template.sessions.iter().enumerate().find_map(|(i, session)| {
            lanes[i]
                .free_unit(session, equipment, minutes)
                .map(|unit| (i, unit))
        });

        if let Some((i, unit)) = slot {
            let offset_minutes = lanes[i].book(equipment, unit, minutes);
            sessions[i].recipes.push(PlannedRecipe {
                recipe_id: recipe.id.clone(),
                name: recipe.name.clone(),
                category: recipe.category,
                equipment: recipe.cooking.equipment,
                min_minutes: recipe.cooking.duration.min_minutes,
                max_minutes: recipe.cooking.duration.max_minutes,
                offset_minutes,
            });
        } else {
            let reason = unplaced_reason(template, recipe);
            tracing::debug!(recipe = %recipe.id, %reason, "recipe left unscheduled");
            unplaced.push(Unplaced {
                recipe_id: recipe.id.clone(),
                reason,
            });
        }
    }

    CookingPlan {
        template: template_key.to_string(),
        template_name: template.name.clone(),
        sessions,
        unplaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::sample_recipe;
    use crate::models::{DEFAULT_TEMPLATE, DurationRange};

    fn one_session(capacity: u32) -> ScheduleTemplate {
        ScheduleTemplate {
            name: "test".to_string(),
            sessions: vec![Session {
                day: "sunday".to_string(),
                start: "10:00".to_string(),
                budget_minutes: 480,
                capacity: BTreeMap::from([(Equipment::SlowCooker, capacity)]),
            }],
        }
    }

    fn two_sessions() -> ScheduleTemplate {
        let mut t = one_session(2);
        t.sessions.push(Session {
            day: "monday".to_string(),
            ..t.sessions[0].clone()
        });
        t
    }

    #[test]
    fn test_capacity_limits_placement() {
        let recipes: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| sample_recipe(id, RecipeCategory::Protein))
            .collect();
        let plan = plan("t", &one_session(2), &recipes);

        assert_eq!(plan.placed_count(), 2);
        assert_eq!(plan.unplaced.len(), 1);
        assert_eq!(plan.unplaced[0].recipe_id, "c");
        assert!(plan.unplaced[0].reason.contains("slot"));
        assert!(matches!(
            plan.ensure_complete(),
            Err(Error::ScheduleOverflow(ids)) if ids == vec!["c".to_string()]
        ));
    }

    #[test]
    fn test_overflow_moves_to_next_session() {
        let recipes: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| sample_recipe(id, RecipeCategory::Protein))
            .collect();
        let plan = plan("t", &two_sessions(), &recipes);

        assert_eq!(plan.sessions[0].recipes.len(), 2);
        assert_eq!(plan.sessions[1].recipes.len(), 1);
        assert_eq!(plan.sessions[1].recipes[0].recipe_id, "c");
        assert!(plan.ensure_complete().is_ok());
    }

    #[test]
    fn test_ordering_by_category_then_complexity() {
        let mut base = sample_recipe("base", RecipeCategory::Base);
        base.complexity = 4;
        let mut simple = sample_recipe("p-simple", RecipeCategory::Protein);
        simple.complexity = 1;
        let mut hard = sample_recipe("p-hard", RecipeCategory::Protein);
        hard.complexity = 3;
        let legume = sample_recipe("legume", RecipeCategory::Legume);

        let mut template = one_session(10);
        template.sessions[0].budget_minutes = 600;
        let plan = plan("t", &template, [&base, &simple, &hard, &legume]);

        let ids: Vec<_> = plan.sessions[0]
            .recipes
            .iter()
            .map(|r| r.recipe_id.as_str())
            .collect();
        assert_eq!(ids, vec!["p-hard", "p-simple", "legume", "base"]);
    }

    #[test]
    fn test_missing_equipment_and_long_recipes() {
        let mut oven = sample_recipe("roast", RecipeCategory::Protein);
        oven.cooking.equipment = Equipment::Oven;
        let mut slow = sample_recipe("stew", RecipeCategory::Protein);
        slow.cooking.duration = DurationRange {
            min_minutes: 500,
            max_minutes: 600,
        };

        let plan = plan("t", &one_session(2), [&oven, &slow]);
        assert_eq!(plan.placed_count(), 0);
        let reasons: Vec<_> = plan.unplaced.iter().map(|u| u.reason.as_str()).collect();
        assert!(reasons.iter().any(|r| r.contains("no session offers oven")));
        assert!(reasons.iter().any(|r| r.contains("longer than any session")));
    }

    fn recipe_taking(id: &str, equipment: Equipment, minutes: u32) -> Recipe {
        let mut recipe = sample_recipe(id, RecipeCategory::Protein);
        recipe.cooking.equipment = equipment;
        recipe.cooking.duration = DurationRange {
            min_minutes: minutes,
            max_minutes: minutes,
        };
        recipe
    }

    #[test]
    fn test_time_budget_limits_placement() {
        let template = ScheduleTemplate {
            name: "short".to_string(),
            sessions: vec![Session {
                day: "sunday".to_string(),
                start: "10:00".to_string(),
                budget_minutes: 270,
                capacity: BTreeMap::from([
                    (Equipment::SlowCooker, 2),
                    (Equipment::Stovetop, 2),
                    (Equipment::Oven, 1),
                ]),
            }],
        };
        let recipes: Vec<_> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| recipe_taking(id, Equipment::SlowCooker, 240))
            .collect();
        let plan = plan("t", &template, &recipes);

        // Two units, 240 min each; a second run on either unit would end at 480.
        assert_eq!(plan.placed_count(), 2);
        assert_eq!(plan.unplaced.len(), 3);
        assert!(plan.unplaced[0].reason.contains("240 min left"));
        assert!(plan.sessions[0].expected_minutes() <= 270);
    }

    #[test]
    fn test_budget_pushes_run_to_next_session() {
        // One stovetop, 480 min: two 200-min runs back to back, the third moves on.
        let mut template = two_sessions();
        for session in &mut template.sessions {
            session.capacity = BTreeMap::from([(Equipment::Stovetop, 1)]);
        }
        let recipes: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| recipe_taking(id, Equipment::Stovetop, 200))
            .collect();
        let plan = plan("t", &template, &recipes);

        let first = &plan.sessions[0];
        assert_eq!(first.recipes.len(), 2);
        assert_eq!(first.recipes[0].offset_minutes, 0);
        assert_eq!(first.recipes[1].offset_minutes, 200);
        assert_eq!(first.expected_minutes(), 400);
        assert_eq!(plan.sessions[1].recipes.len(), 1);
        assert_eq!(plan.sessions[1].recipes[0].recipe_id, "c");
        assert!(plan.unplaced.is_empty());
    }

    #[test]
    fn test_unknown_template() {
        let config = PlanConfig::default();
        assert!(template(&config, DEFAULT_TEMPLATE).is_ok());
        assert!(matches!(
            template(&config, "midweek"),
            Err(Error::UnknownTemplate(name)) if name == "midweek"
        ));
    }

    #[test]
    fn test_expected_minutes() {
        let recipes = [
            sample_recipe("a", RecipeCategory::Protein),
            sample_recipe("b", RecipeCategory::Protein),
        ];
        let plan = plan("t", &one_session(2), &recipes);
        assert_eq!(plan.sessions[0].expected_minutes(), 360);
    }
}

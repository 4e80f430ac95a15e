use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use mealprep_core::MealPlanService;
use mealprep_core::feedback::RecipeReviser;

use crate::ai::AnthropicReviser;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Resolve a full feedback id or a unique prefix of one.
pub(crate) fn resolve_feedback_id(svc: &MealPlanService, input: &str) -> Result<Uuid> {
    if let Ok(id) = input.parse::<Uuid>() {
        return Ok(id);
    }
    let prefix = input.trim().to_lowercase();
    if prefix.is_empty() {
        bail!("Feedback id must not be empty");
    }
    let matches: Vec<Uuid> = svc
        .list_feedback(false)
        .into_iter()
        .map(|r| r.id)
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("No feedback matches '{input}'"),
        _ => bail!("'{input}' matches {} feedback records; use more characters", matches.len()),
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// JSON body for a rating that was saved while its revision failed.
pub(crate) fn revision_failure_json(
    message: &str,
    retryable: bool,
    pending: Option<&Uuid>,
) -> String {
    #[derive(Serialize)]
    struct RevisionFailure<'a> {
        error: &'a str,
        retryable: bool,
        rating_saved: bool,
        feedback_id: Option<&'a Uuid>,
    }
    serde_json::to_string(&RevisionFailure {
        error: message,
        retryable,
        rating_saved: true,
        feedback_id: pending,
    })
    .unwrap_or_else(|_| json_error(message))
}

pub(crate) fn as_reviser(reviser: Option<&AnthropicReviser>) -> Option<&dyn RecipeReviser> {
    reviser.map(|r| r as &dyn RecipeReviser)
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

/// First 8 characters of a feedback id, enough to pass back to `feedback retry`.
pub(crate) fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mealprep_core::models::{
        CookingParams, DurationRange, Equipment, Ingredient, Macros, PurchaseCategory, Recipe,
        RecipeCategory,
    };
    use serde_json::Map;
    use std::collections::BTreeSet;

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string())).unwrap(),
            today - chrono::Duration::days(1)
        );
        assert_eq!(
            parse_date(Some("tomorrow".to_string())).unwrap(),
            today + chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_resolve_feedback_id_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let svc = MealPlanService::open(
            &dir.path().join("mealplan.json"),
            &dir.path().join("backups"),
            Local::now().date_naive(),
        )
        .unwrap();
        svc.put_recipe(Recipe {
            id: "soup".to_string(),
            name: "Soup".to_string(),
            category: RecipeCategory::Base,
            ingredients: vec![Ingredient {
                name: "leek".to_string(),
                quantity: 2.0,
                unit: "unit".to_string(),
                category: PurchaseCategory::Vegetable,
                tags: BTreeSet::new(),
            }],
            macros_per_portion: Macros::new(5.0, 20.0, 3.0, 150.0),
            cooking: CookingParams {
                method: "simmer".to_string(),
                duration: DurationRange {
                    min_minutes: 30,
                    max_minutes: 45,
                },
                equipment: Equipment::Stovetop,
            },
            complexity: 1,
            favorite: false,
            ratings: Vec::new(),
            revision: 0,
            extra: Map::new(),
        })
        .unwrap();
        let outcome = svc
            .submit_feedback(None, "soup", 4, "", Utc::now())
            .unwrap();

        let full = outcome.feedback_id.to_string();
        assert_eq!(resolve_feedback_id(&svc, &full).unwrap(), outcome.feedback_id);
        assert_eq!(
            resolve_feedback_id(&svc, &short_id(&outcome.feedback_id)).unwrap(),
            outcome.feedback_id
        );
        assert!(resolve_feedback_id(&svc, "zzzz").is_err());
        assert!(resolve_feedback_id(&svc, "").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
    }

    #[test]
    fn test_no_neg_zero() {
        assert_eq!(no_neg_zero(-0.0).to_bits(), 0.0_f64.to_bits());
        assert_eq!(no_neg_zero(5.0), 5.0);
    }

    #[test]
    fn test_json_error() {
        assert_eq!(json_error("boom"), r#"{"error":"boom"}"#);
    }

    #[test]
    fn test_revision_failure_json_carries_pending_id() {
        let id = Uuid::new_v4();
        let body: serde_json::Value =
            serde_json::from_str(&revision_failure_json("AI collaborator timed out", true, Some(&id)))
                .unwrap();
        assert_eq!(body["error"], "AI collaborator timed out");
        assert_eq!(body["retryable"], true);
        assert_eq!(body["rating_saved"], true);
        assert_eq!(body["feedback_id"], id.to_string());

        let body: serde_json::Value =
            serde_json::from_str(&revision_failure_json("rejected", false, None)).unwrap();
        assert!(body["feedback_id"].is_null());
    }
}

//! Structured commands from a chat or HTTP front end, and the results sent back.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::feedback::RecipeReviser;
use crate::service::MealPlanService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    Week,
    SetWeek,
    ClearOverride,
    Macros,
    Shopping,
    Schedule,
    Rate,
    Favorite,
    Recipe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_override: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Command {
    #[must_use]
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            recipe_id: None,
            week_override: None,
            score: None,
            comment: None,
        }
    }

    fn recipe_id(&self) -> Result<&str> {
        self.recipe_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::InvalidCommand("recipeId is required".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub kind: ResultKind,
    pub payload: Value,
}

impl CommandResult {
    pub fn success(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(payload) => Self {
                kind: ResultKind::Success,
                payload,
            },
            Err(e) => Self::error(&Error::from(e)),
        }
    }

    #[must_use]
    pub fn error(err: &Error) -> Self {
        Self {
            kind: ResultKind::Error,
            payload: json!({ "error": err.to_string(), "retryable": err.is_retryable() }),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.kind == ResultKind::Success
    }
}

/// Run one command. Failures are reported in the result, never as a panic or `Err`.
pub fn execute(
    svc: &MealPlanService,
    reviser: Option<&dyn RecipeReviser>,
    command: &Command,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> CommandResult {
    tracing::debug!(kind = ?command.kind, "executing command");
    match dispatch(svc, reviser, command, today, now) {
        Ok(result) => result,
        Err(e) => {
            tracing::debug!(kind = ?command.kind, error = %e, "command failed");
            CommandResult::error(&e)
        }
    }
}

fn dispatch(
    svc: &MealPlanService,
    reviser: Option<&dyn RecipeReviser>,
    command: &Command,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<CommandResult> {
    let result = match command.kind {
        CommandKind::Week => CommandResult::success(svc.sync_rotation(today)?),
        CommandKind::SetWeek => {
            let week = command.week_override.ok_or_else(|| {
                Error::InvalidCommand("weekOverride is required".to_string())
            })?;
            CommandResult::success(svc.set_week(week, today)?)
        }
        CommandKind::ClearOverride => CommandResult::success(svc.clear_override(today)?),
        CommandKind::Macros => CommandResult::success(svc.macro_report(today)?),
        CommandKind::Shopping => CommandResult::success(svc.shopping_list(today)?),
        CommandKind::Schedule => CommandResult::success(svc.cooking_plan(today, None)?),
        CommandKind::Rate => {
            let score = command
                .score
                .ok_or_else(|| Error::InvalidCommand("score is required".to_string()))?;
            CommandResult::success(svc.submit_feedback(
                reviser,
                command.recipe_id()?,
                score,
                command.comment.as_deref().unwrap_or_default(),
                now,
            )?)
        }
        CommandKind::Favorite => CommandResult::success(svc.toggle_favorite(command.recipe_id()?)?),
        CommandKind::Recipe => match command.recipe_id.as_deref() {
            Some(id) => CommandResult::success(svc.get_recipe(id)?),
            None => CommandResult::success(svc.week_plan(today)?),
        },
    };
    Ok(result)
}

use anyhow::Result;
use chrono::Utc;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealprep_core::{Error as CoreError, MealPlanService};
use mealprep_core::feedback::{FeedbackOutcome, RevisionStatus};

use crate::ai::AnthropicReviser;

use super::helpers::{as_reviser, resolve_feedback_id, revision_failure_json, short_id, truncate};

fn print_outcome(outcome: &FeedbackOutcome) {
    let id = short_id(&outcome.feedback_id);
    println!(
        "Rated {} {}/5 (feedback {id})",
        outcome.recipe_id, outcome.score
    );
    match &outcome.revision {
        RevisionStatus::Applied { summary, revision } => {
            println!("Recipe revised to revision {revision}: {summary}");
        }
        RevisionStatus::NotRequested { reason } => println!("No revision: {reason}"),
    }
}

/// Rate a recipe. The reviser call blocks on the runtime, so it runs in `block_in_place`.
pub(crate) fn cmd_rate(
    svc: &MealPlanService,
    reviser: Option<&AnthropicReviser>,
    recipe_id: &str,
    score: u8,
    comment: &str,
    json: bool,
) -> Result<()> {
    let outcome = tokio::task::block_in_place(|| {
        svc.submit_feedback(as_reviser(reviser), recipe_id, score, comment, Utc::now())
    });
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) if e.is_retryable() || matches!(e, CoreError::ProposalRejected { .. }) => {
            // The rating itself is already saved.
            let pending = svc
                .list_feedback(true)
                .into_iter()
                .find(|r| r.recipe_id == recipe_id)
                .map(|r| r.id);
            if json {
                let message = e.to_string();
                println!("{}", revision_failure_json(&message, e.is_retryable(), pending.as_ref()));
            } else {
                eprintln!("Rating saved, but the revision failed: {e}");
                if let Some(pending) = pending {
                    let id = short_id(&pending);
                    eprintln!("Retry later with `mealprep feedback retry {id}`");
                }
            }
            process::exit(3);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

pub(crate) fn cmd_feedback_list(svc: &MealPlanService, unresolved: bool, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct FeedbackRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Recipe")]
        recipe: String,
        #[tabled(rename = "Score")]
        score: u8,
        #[tabled(rename = "Comment")]
        comment: String,
        #[tabled(rename = "Change")]
        change: String,
    }

    let records = svc.list_feedback(unresolved);
    if records.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No feedback recorded");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let rows: Vec<FeedbackRow> = records
        .iter()
        .map(|r| FeedbackRow {
            id: short_id(&r.id),
            date: r.timestamp.format("%Y-%m-%d").to_string(),
            recipe: r.recipe_id.clone(),
            score: r.score,
            comment: truncate(&r.comment, 30),
            change: r
                .modification
                .as_deref()
                .map_or_else(|| "-".to_string(), |m| truncate(m, 30)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_feedback_retry(
    svc: &MealPlanService,
    reviser: Option<&AnthropicReviser>,
    id: &str,
    json: bool,
) -> Result<()> {
    let feedback_id = resolve_feedback_id(svc, id)?;
    let outcome =
        tokio::task::block_in_place(|| svc.retry_feedback(as_reviser(reviser), feedback_id))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

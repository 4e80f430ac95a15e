mod ai;
mod commands;
mod config;
mod server;

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::ai::AnthropicReviser;
use crate::commands::{
    cmd_backup_list, cmd_backup_restore, cmd_complement_import, cmd_complement_list,
    cmd_feedback_list, cmd_feedback_retry, cmd_init, cmd_macros, cmd_rate, cmd_recipe_favorite,
    cmd_recipe_generate, cmd_recipe_import, cmd_recipe_list, cmd_recipe_show, cmd_schedule, cmd_shopping,
    cmd_target_exclude, cmd_target_set, cmd_target_show, cmd_target_template, cmd_week_add,
    cmd_week_clear, cmd_week_remove, cmd_week_set, cmd_week_show, json_error,
};
use crate::config::Config;
use mealprep_core::MealPlanService;
use mealprep_core::feedback::RecipeReviser;

#[derive(Parser)]
#[command(
    name = "mealprep",
    version,
    about = "Batch-cooking meal planner",
    long_about = "Plan a rotating batch-cooking menu: weekly macros, shopping lists, \
cooking sessions, and recipe ratings that feed back into the recipes."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the plan store with defaults
    Init {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or change the active rotation week
    Week {
        #[command(subcommand)]
        command: Option<WeekCommands>,
        /// Date to evaluate the rotation on (YYYY-MM-DD, default: today)
        #[arg(long, global = true)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long, global = true)]
        json: bool,
    },
    /// Compare the active week's daily macros with your targets
    Macros {
        /// Date to evaluate the rotation on (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Shopping list for the active week, grouped by aisle
    Shopping {
        /// Also write the list as CSV to this path
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,
        /// Date to evaluate the rotation on (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Plan the active week's cooking sessions
    Schedule {
        /// Schedule template key (default: the one in your preferences)
        #[arg(short, long)]
        template: Option<String>,
        /// Date to evaluate the rotation on (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rate a recipe; low scores with a comment ask the AI for a revision
    Rate {
        /// Recipe ID
        recipe: String,
        /// Score from 1 to 5
        score: u8,
        /// What to change (the rest of the line)
        comment: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Review past ratings and retry failed revisions
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage complements (quick sides eaten alongside the batch recipes)
    Complement {
        #[command(subcommand)]
        command: ComplementCommands,
    },
    /// Manage macro targets and planning preferences
    Target {
        #[command(subcommand)]
        command: TargetCommands,
    },
    /// List or restore store backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Start the REST API server
    ///
    /// The server holds the store open. Changes made by other commands while it
    /// runs are detected, and the server's next write fails until it is restarted.
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum WeekCommands {
    /// Show the active week and its menu (default)
    Show,
    /// Pin the rotation to a week until cleared
    Set {
        /// Week number (1-based)
        week: u32,
    },
    /// Drop the manual override and follow the calendar again
    Clear,
    /// Add a recipe to a week's menu
    Add {
        /// Week number (1-based)
        week: u32,
        /// Recipe ID
        recipe: String,
    },
    /// Remove a recipe from a week's menu
    Remove {
        /// Week number (1-based)
        week: u32,
        /// Recipe ID
        recipe: String,
    },
}

#[derive(Subcommand)]
enum FeedbackCommands {
    /// List feedback, newest first
    List {
        /// Only records that haven't produced a revision
        #[arg(long)]
        unresolved: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask again for a revision on a feedback record
    Retry {
        /// Feedback ID or a unique prefix of it
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// List recipes
    List {
        /// Only this category: protein, legume, base, complement
        #[arg(short, long)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recipe details
    Show {
        /// Recipe ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Toggle a recipe's favorite flag
    Favorite {
        /// Recipe ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import recipes from a JSON file (one recipe or a list)
    Import {
        /// Path to the JSON file
        file: PathBuf,
        /// Also add the imported recipes to this week's menu
        #[arg(long)]
        week: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the AI for a new recipe and add it to the collection
    Generate {
        /// What the recipe should be (the rest of the line)
        #[arg(required = true)]
        request: Vec<String>,
        /// Category: protein, legume, base, complement (default: the AI's choice)
        #[arg(short, long)]
        category: Option<String>,
        /// Recipe ID (default: derived from the name)
        #[arg(long)]
        id: Option<String>,
        /// Also add the recipe to this week's menu
        #[arg(long)]
        week: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ComplementCommands {
    /// List complements
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import complements from a JSON file (one or a list)
    Import {
        /// Path to the JSON file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TargetCommands {
    /// Set daily macro targets
    Set {
        /// Daily calorie target
        calories: f64,
        /// Protein grams (default: keep the current target)
        #[arg(long)]
        protein: Option<f64>,
        /// Carbs grams (default: keep the current target)
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat grams (default: keep the current target)
        #[arg(long)]
        fat: Option<f64>,
        /// Allowed deviation in percent of each target (default: 10)
        #[arg(long)]
        tolerance: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show targets and preferences
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Choose the default cooking schedule template
    Template {
        /// Template key
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the list of excluded ingredient names or tags
    Exclude {
        /// Tags to exclude; pass none to clear
        tags: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List backups, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore from a backup number (see `backup list`) or path
    Restore {
        /// Backup number or path
        backup: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = std::env::args().any(|a| a == "--json");
    init_tracing(if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    });

    if let Err(e) = run(cli).await {
        if json {
            println!("{}", json_error(&format!("{e:#}")));
        } else {
            eprintln!("Error: {e:#}");
        }
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let today = Local::now().date_naive();

    if let Commands::Init { json } = cli.command {
        return cmd_init(&config.store_path, &config.backup_dir, today, json);
    }

    let svc = MealPlanService::open(&config.store_path, &config.backup_dir, today)?;
    svc.sync_rotation(today)?;
    let reviser = AnthropicReviser::from_config(&config.ai)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Week {
            command,
            date,
            json,
        } => match command {
            None | Some(WeekCommands::Show) => cmd_week_show(&svc, date, json),
            Some(WeekCommands::Set { week }) => cmd_week_set(&svc, week, date, json),
            Some(WeekCommands::Clear) => cmd_week_clear(&svc, date, json),
            Some(WeekCommands::Add { week, recipe }) => cmd_week_add(&svc, week, &recipe, json),
            Some(WeekCommands::Remove { week, recipe }) => {
                cmd_week_remove(&svc, week, &recipe, json)
            }
        },
        Commands::Macros { date, json } => cmd_macros(&svc, date, json),
        Commands::Shopping { csv, date, json } => cmd_shopping(&svc, date, csv.as_deref(), json),
        Commands::Schedule {
            template,
            date,
            json,
        } => cmd_schedule(&svc, date, template.as_deref(), json),
        Commands::Rate {
            recipe,
            score,
            comment,
            json,
        } => cmd_rate(&svc, reviser.as_ref(), &recipe, score, &comment.join(" "), json),
        Commands::Feedback { command } => match command {
            FeedbackCommands::List { unresolved, json } => cmd_feedback_list(&svc, unresolved, json),
            FeedbackCommands::Retry { id, json } => {
                cmd_feedback_retry(&svc, reviser.as_ref(), &id, json)
            }
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::List { category, json } => {
                cmd_recipe_list(&svc, category.as_deref(), json)
            }
            RecipeCommands::Show { recipe, json } => cmd_recipe_show(&svc, &recipe, json),
            RecipeCommands::Favorite { recipe, json } => cmd_recipe_favorite(&svc, &recipe, json),
            RecipeCommands::Import { file, week, json } => {
                cmd_recipe_import(&svc, &file, week, json)
            }
            RecipeCommands::Generate {
                request,
                category,
                id,
                week,
                json,
            } => cmd_recipe_generate(
                &svc,
                reviser.as_ref(),
                &request.join(" "),
                category.as_deref(),
                id.as_deref(),
                week,
                json,
            ),
        },
        Commands::Complement { command } => match command {
            ComplementCommands::List { json } => cmd_complement_list(&svc, json),
            ComplementCommands::Import { file, json } => cmd_complement_import(&svc, &file, json),
        },
        Commands::Target { command } => match command {
            TargetCommands::Set {
                calories,
                protein,
                carbs,
                fat,
                tolerance,
                json,
            } => cmd_target_set(&svc, calories, protein, carbs, fat, tolerance, json),
            TargetCommands::Show { json } => cmd_target_show(&svc, json),
            TargetCommands::Template { key, json } => cmd_target_template(&svc, &key, json),
            TargetCommands::Exclude { tags, json } => cmd_target_exclude(&svc, &tags, json),
        },
        Commands::Backup { command } => match command {
            BackupCommands::List { json } => cmd_backup_list(&svc, json),
            BackupCommands::Restore { backup, json } => cmd_backup_restore(&svc, &backup, json),
        },
        Commands::Serve { port, bind } => {
            let reviser = reviser.map(|r| Arc::new(r) as Arc<dyn RecipeReviser>);
            server::start_server(svc, reviser, port, &bind).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_week_subcommand_is_optional() {
        let cli = Cli::try_parse_from(["mealprep", "week", "--date", "2024-01-08"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Week { command: None, date: Some(_), json: false }
        ));
        let cli = Cli::try_parse_from(["mealprep", "week", "set", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Week { command: Some(WeekCommands::Set { week: 3 }), .. }
        ));
    }

    #[test]
    fn test_rate_parses_comment() {
        let cli = Cli::try_parse_from(["mealprep", "rate", "chili", "2", "too", "salty"]).unwrap();
        let Commands::Rate { recipe, score, comment, .. } = cli.command else {
            panic!("expected rate");
        };
        assert_eq!((recipe.as_str(), score), ("chili", 2));
        assert_eq!(comment.join(" "), "too salty");
    }

    #[test]
    fn test_recipe_generate_parses_request() {
        let cli = Cli::try_parse_from([
            "mealprep", "recipe", "generate", "smoky", "black", "beans", "-c", "legume", "--week",
            "2",
        ])
        .unwrap();
        let Commands::Recipe {
            command: RecipeCommands::Generate { request, category, id, week, .. },
        } = cli.command
        else {
            panic!("expected recipe generate");
        };
        assert_eq!(request.join(" "), "smoky black beans");
        assert_eq!(category.as_deref(), Some("legume"));
        assert_eq!((id, week), (None, Some(2)));

        assert!(Cli::try_parse_from(["mealprep", "recipe", "generate"]).is_err());
    }

    #[test]
    fn test_target_set_macros_are_optional() {
        let cli = Cli::try_parse_from(["mealprep", "target", "set", "2500"]).unwrap();
        let Commands::Target {
            command: TargetCommands::Set { calories, protein, carbs, fat, .. },
        } = cli.command
        else {
            panic!("expected target set");
        };
        assert!((calories - 2500.0).abs() < f64::EPSILON);
        assert_eq!((protein, carbs, fat), (None, None, None));
    }
}

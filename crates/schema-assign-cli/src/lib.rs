//! Admin command surface for schema assignment rules.
//!
//! Host projects can embed the same behavior through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_command`] for direct command execution against an existing
//!   [`AssignmentEngine`].

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use schema_assign_core::LanguagePrefixResolver;
use schema_assign_store_sqlite::{AssignmentEngine, SqliteAssignmentStore};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "sa")]
#[command(about = "Schema assignment rules for hierarchical page collections")]
pub struct Cli {
    #[arg(long, default_value = "./schema_assign.sqlite3")]
    db: PathBuf,

    /// Translation namespace to strip from incoming page ids (repeatable).
    #[arg(long = "lang")]
    langs: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Pattern {
        #[command(subcommand)]
        command: PatternCommand,
    },
    Page {
        #[command(subcommand)]
        command: PageCommand,
    },
    Pages(PagesArgs),
    Clear(ClearArgs),
}

#[derive(Debug, Subcommand)]
pub enum PatternCommand {
    Add(PatternArgs),
    Remove(PatternArgs),
    List,
}

#[derive(Debug, Args)]
pub struct PatternArgs {
    #[arg(long)]
    pattern: String,
    #[arg(long)]
    schema: String,
}

#[derive(Debug, Subcommand)]
pub enum PageCommand {
    Reevaluate(PageArgs),
    Show(PageShowArgs),
}

#[derive(Debug, Args)]
pub struct PageArgs {
    #[arg(long)]
    page: String,
}

#[derive(Debug, Args)]
pub struct PageShowArgs {
    #[arg(long)]
    page: String,
    /// Evaluate patterns live instead of reading recorded assignments.
    #[arg(long)]
    live: bool,
}

#[derive(Debug, Args)]
pub struct PagesArgs {
    #[arg(long)]
    schema: Option<String>,
    #[arg(long)]
    assigned_only: bool,
}

#[derive(Debug, Args)]
pub struct ClearArgs {
    /// Also delete assignment rows instead of just unassigning them.
    #[arg(long)]
    full: bool,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when the store cannot be opened or migrated, or when the
/// requested command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    init_tracing();

    let store = SqliteAssignmentStore::open(&cli.db)?;
    store.migrate()?;

    let mut engine = if cli.langs.is_empty() {
        AssignmentEngine::new(store)?
    } else {
        AssignmentEngine::with_resolver(
            store,
            Box::new(LanguagePrefixResolver::new(cli.langs)),
        )?
    };

    run_command(cli.command, &mut engine)
}

/// Executes a parsed command against an existing engine.
///
/// # Errors
/// Returns an error when pattern validation or a store operation fails.
pub fn run_command(command: Command, engine: &mut AssignmentEngine) -> Result<()> {
    match command {
        Command::Pattern { command } => run_pattern(command, engine),
        Command::Page { command } => run_page(command, engine),
        Command::Pages(args) => {
            let pages = engine.pages(args.schema.as_deref(), args.assigned_only)?;
            print_payload(&json!({
                "contract_version": "pages.v1",
                "pages": pages,
            }))
        }
        Command::Clear(args) => {
            engine.clear(args.full)?;
            print_payload(&json!({
                "contract_version": "clear.v1",
                "full": args.full,
            }))
        }
    }
}

fn run_pattern(command: PatternCommand, engine: &mut AssignmentEngine) -> Result<()> {
    match command {
        PatternCommand::Add(args) => {
            let changes = engine.add_pattern(&args.pattern, &args.schema)?;
            print_payload(&json!({
                "contract_version": "pattern_change.v1",
                "pattern": args.pattern,
                "schema": args.schema,
                "removed": false,
                "changes": changes,
            }))
        }
        PatternCommand::Remove(args) => {
            let outcome = engine.remove_pattern(&args.pattern, &args.schema)?;
            print_payload(&json!({
                "contract_version": "pattern_change.v1",
                "pattern": args.pattern,
                "schema": args.schema,
                "removed": outcome.removed,
                "changes": outcome.changes,
            }))
        }
        PatternCommand::List => print_payload(&json!({
            "contract_version": "pattern_list.v1",
            "patterns": engine.all_patterns(),
        })),
    }
}

fn run_page(command: PageCommand, engine: &mut AssignmentEngine) -> Result<()> {
    match command {
        PageCommand::Reevaluate(args) => {
            let changes = engine.reevaluate_page(&args.page)?;
            print_payload(&json!({
                "contract_version": "reconcile_report.v1",
                "page": args.page,
                "changes": changes,
            }))
        }
        PageCommand::Show(args) => {
            let schemas = engine.page_schemas(&args.page, args.live)?;
            print_payload(&json!({
                "contract_version": "page_assignments.v1",
                "page": args.page,
                "live": args.live,
                "schemas": schemas,
            }))
        }
    }
}

fn print_payload(payload: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

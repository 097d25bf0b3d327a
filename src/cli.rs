use clap::{Parser, Subcommand};

/// Weekly task-completion ingestion and quota reconciliation.
#[derive(Parser, Debug)]
#[command(
    name = "quotasync",
    version,
    about = "Sync completed tracker tasks and reconcile weekly orders"
)]
pub struct Cli {
    /// Directory holding `.quotasync/` (settings and state database).
    #[arg(long, global = true, default_value = ".")]
    pub data_dir: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one ingestion + reconciliation pass now.
    Sync {
        /// Teams to sync (PLA, Art, Video, Concept). Defaults to all.
        #[arg(long = "team")]
        teams: Vec<String>,
    },
    /// Reconcile orders against stored tasks for an explicit range.
    Reconcile {
        /// Inclusive range start, RFC 3339.
        #[arg(long)]
        start: String,
        /// Inclusive range end, RFC 3339.
        #[arg(long)]
        end: String,
    },
    /// Run the weekly trigger loop.
    Schedule,
    /// Manage weekly orders.
    Orders {
        #[command(subcommand)]
        action: OrderAction,
    },
    /// Manage fallback assignees per project and team.
    Details {
        #[command(subcommand)]
        action: DetailAction,
    },
    /// Read persisted project issues.
    Issues {
        #[command(subcommand)]
        action: IssueAction,
    },
    /// Completed-task records for assignees or teams in a range.
    Points {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        /// Treat identifiers as team labels instead of assignee emails.
        #[arg(long)]
        by_team: bool,
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Show the settings file, or merge a JSON patch into it.
    Settings {
        /// JSON object merged into the stored settings.
        #[arg(long)]
        set: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum OrderAction {
    /// Create or update orders from a JSON array file.
    Import { file: String },
    List,
    /// Projects with at least one order starting in a range.
    Projects {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    Delete {
        #[arg(long)]
        project: String,
        /// Order week, RFC 3339.
        #[arg(long)]
        start_week: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum DetailAction {
    /// Upsert details from a JSON array file.
    Import { file: String },
    List,
}

#[derive(Subcommand, Debug)]
pub enum IssueAction {
    List {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Attach a free-text note to one issue row.
    Note {
        #[arg(long)]
        project: String,
        #[arg(long)]
        start_week: String,
        #[arg(long)]
        task_type: String,
        /// Omit to clear the note.
        #[arg(long)]
        text: Option<String>,
    },
}

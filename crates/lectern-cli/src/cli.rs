use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use lectern_core::config::BackendKind;
use lectern_core::models::{ConflictStrategy, Resolution};
use lectern_core::EntityType;

#[derive(Parser)]
#[command(name = "lectern")]
#[command(about = "Plan sermons and series offline, sync when you can")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for backend and account configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage sermon series
    Series {
        #[command(subcommand)]
        command: SeriesCommands,
    },
    /// Manage sermons
    Sermon {
        #[command(subcommand)]
        command: SermonCommands,
    },
    /// Edit an existing series or sermon
    Edit {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Record ID or unique ID prefix
        id: String,
        #[arg(long)]
        title: Option<String>,
        /// Series description
        #[arg(long)]
        description: Option<String>,
        /// Sermon scripture reference
        #[arg(long)]
        scripture: Option<String>,
        /// Sermon content (opens $EDITOR for sermons when no flag is given)
        #[arg(long)]
        content: Option<String>,
        /// Replace tags (comma separated or repeated)
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
        /// New status (series: planning|active|completed|archived, sermon: draft|ready|preached|archived)
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete an existing series or sermon
    Delete {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Sync local records with the configured backend
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Move offline data to the signed-in account
    Migrate {
        #[command(subcommand)]
        command: MigrateCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage the signed-in account of a profile
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum EntityArg {
    Series,
    Sermon,
}

impl From<EntityArg> for EntityType {
    fn from(value: EntityArg) -> Self {
        match value {
            EntityArg::Series => Self::Series,
            EntityArg::Sermon => Self::Sermon,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

impl From<CompletionShell> for clap_complete::Shell {
    fn from(value: CompletionShell) -> Self {
        match value {
            CompletionShell::Bash => Self::Bash,
            CompletionShell::Zsh => Self::Zsh,
            CompletionShell::Fish => Self::Fish,
            CompletionShell::PowerShell => Self::PowerShell,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeepSide {
    Local,
    Remote,
    Merge,
}

impl From<KeepSide> for Resolution {
    fn from(value: KeepSide) -> Self {
        match value {
            KeepSide::Local => Self::KeepLocal,
            KeepSide::Remote => Self::KeepRemote,
            KeepSide::Merge => Self::Merge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    NewestWins,
    LocalWins,
    RemoteWins,
    FieldMerge,
}

impl From<StrategyArg> for ConflictStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::NewestWins => Self::NewestWins,
            StrategyArg::LocalWins => Self::LocalWins,
            StrategyArg::RemoteWins => Self::RemoteWins,
            StrategyArg::FieldMerge => Self::FieldMerge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum BackendKindArg {
    Rest,
    Memory,
}

impl From<BackendKindArg> for BackendKind {
    fn from(value: BackendKindArg) -> Self {
        match value {
            BackendKindArg::Rest => Self::Rest,
            BackendKindArg::Memory => Self::Memory,
        }
    }
}

#[derive(Subcommand)]
pub enum SeriesCommands {
    /// Create a new series
    #[command(alias = "new")]
    Add {
        /// Series title
        title: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        /// Tags (comma separated or repeated)
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },
    /// List series
    List {
        /// Number of series to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SermonCommands {
    /// Create a new sermon
    #[command(alias = "new")]
    Add {
        /// Sermon title
        title: Vec<String>,
        /// Series ID or unique ID prefix
        #[arg(long, value_name = "ID")]
        series: Option<String>,
        #[arg(long)]
        scripture: Option<String>,
        /// Sermon content (read from stdin when piped)
        #[arg(long)]
        content: Option<String>,
        /// Tags (comma separated or repeated)
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// List sermons
    List {
        /// Only sermons of this series (ID or unique prefix)
        #[arg(long, value_name = "ID")]
        series: Option<String>,
        /// Filter by tag name
        #[arg(long)]
        tag: Option<String>,
        /// Number of sermons to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// List sync conflicts
    Conflicts {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Number of conflicts to show with --all
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a pending conflict
    Resolve {
        /// Conflict ID
        id: i64,
        /// Which side to keep
        #[arg(long, value_enum)]
        keep: KeepSide,
    },
}

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Show what offline data would move to the signed-in account
    Preview,
    /// Move offline data to the signed-in account
    Run,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Backend identifier used to key id mappings
        #[arg(long, value_name = "ID")]
        backend_id: Option<String>,
        /// Backend kind
        #[arg(long, value_enum)]
        backend_kind: Option<BackendKindArg>,
        /// REST backend base URL
        #[arg(long, value_name = "URL")]
        backend_url: Option<String>,
        /// Automatic conflict strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Maximum differing fields resolved automatically
        #[arg(long, value_name = "N")]
        auto_resolve_max_fields: Option<usize>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign a profile in as an account
    Login {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Account id issued by the backend
        #[arg(long, value_name = "ID")]
        user_id: String,
        /// Bearer token for the backend
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
    /// Show auth status for profile
    Status {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
    /// Sign a profile out
    Logout {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}

use std::{net::SocketAddr, path::PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use docseek::model_manager::ModelRole;

#[derive(Debug, Parser)]
#[command(
    name = "docseek",
    about = "Semantic search over your PDFs, with the answer highlighted"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID or local model path
    #[arg(long, global = true)]
    pub embed_model: Option<String>,

    /// Override the question-answering model ID or local model path
    #[arg(long, global = true)]
    pub qa_model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload PDF (or plain text) files into the library
    Upload(UploadArgs),
    /// Ask a question against the uploaded documents
    Search(SearchArgs),
    /// Inspect and manage uploaded documents
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },
    /// Delete every document, chunk and vector
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Serve the web UI and HTTP API
    Serve(ServeArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Manage the model configuration
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Show system status and statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Upload --

#[derive(Debug, Parser)]
pub struct UploadArgs {
    /// Files to upload (.pdf, .txt, .md)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Output a JSON summary of each upload
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The question or search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Drop results with a cosine distance above this value
    #[arg(long)]
    pub max_distance: Option<f32>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip answer extraction (no QA model is loaded)
    #[arg(long)]
    pub no_answer: bool,
}

// -- Documents --

#[derive(Debug, Subcommand)]
pub enum DocumentsAction {
    /// List uploaded documents
    List {
        /// Only show documents whose title matches this glob
        pattern: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a document's chunks
    Show {
        /// Document reference: #short_id, hex id, or exact title
        reference: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a document and all of its chunks
    Remove {
        /// Document reference: #short_id, hex id, or exact title
        reference: String,
    },
}

// -- Serve --

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = docseek::web::DEFAULT_ADDR)]
    pub addr: SocketAddr,
}

// -- Model --

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// The sentence embedding model
    Embed,
    /// The extractive question-answering model
    Qa,
}

impl From<RoleArg> for ModelRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Embed => ModelRole::Embed,
            RoleArg::Qa => ModelRole::Qa,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Show the currently resolved models
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a model ID or local path in config.redb
    Set {
        /// Which model to set
        #[arg(value_enum)]
        role: RoleArg,
        /// Model ID (HuggingFace) or local path
        model: String,
    },
    /// Clear a stored model setting (revert to default)
    Clear {
        /// Which model to clear
        #[arg(value_enum)]
        role: RoleArg,
    },
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docseek",
            &mut std::io::stdout(),
        );
    }
}

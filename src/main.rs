use std::{path::Path, sync::Arc};

use clap::Parser;
use docseek::{
    ConfigDb,
    DataDir,
    Error,
    LibraryDb,
    ModelManager,
    Result,
    chunking::ChunkingConfig,
    ingestion::{self, IngestOutcome},
    library_db::DocumentSummary,
    model_manager::{ModelRole, resolve_role},
    retrieval::{self, SearchParams},
    web,
};
use kdam::{BarExt, tqdm};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, DocumentsAction, ModelAction};

const LOG_ENV_VAR: &str = "DOCSEEK_LOG";

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var(LOG_ENV_VAR) {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let models = || {
        ModelManager::resolve(
            Some(&config_db),
            cli.embed_model.as_deref(),
            cli.qa_model.as_deref(),
        )
    };

    match &cli.command {
        Command::Upload(args) => {
            let library = LibraryDb::open(&data_dir.library_db())?;
            cmd_upload(&library, &mut models()?, &args.paths, args.json)?;
        }
        Command::Search(args) => {
            let library = LibraryDb::open(&data_dir.library_db())?;
            let params = SearchParams {
                query: args.query.clone(),
                limit: args.count,
                max_distance: args.max_distance,
                answers: !args.no_answer,
            };
            let hits = retrieval::search(&params, &library, &mut models()?)?;

            if args.json {
                println!("{}", retrieval::format_json(&args.query, &hits)?);
            } else {
                print!("{}", retrieval::format_human(&hits));
            }
        }
        Command::Documents { action } => {
            let library = LibraryDb::open(&data_dir.library_db())?;
            match action {
                DocumentsAction::List { pattern, json } => {
                    documents_list(&library, pattern.as_deref(), *json)?;
                }
                DocumentsAction::Show { reference, json } => {
                    documents_show(&library, reference, *json)?;
                }
                DocumentsAction::Remove { reference } => {
                    let document = library.resolve(reference)?;
                    library.delete_document(document.id.numeric)?;
                    println!("Removed {} {}", document.id, document.title);
                }
            }
        }
        Command::Reset { yes } => {
            if !yes {
                return Err(Error::InvalidInput(
                    "reset deletes every document; pass --yes to confirm"
                        .to_string(),
                ));
            }
            let library = LibraryDb::open(&data_dir.library_db())?;
            let count = library.document_count()?;
            library.reset()?;
            println!("Deleted {count} document(s)");
        }
        Command::Serve(args) => {
            let library = LibraryDb::open(&data_dir.library_db())?;
            let state = Arc::new(web::AppState::new(
                library,
                ChunkingConfig::default(),
                models()?,
            ));
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            eprintln!("Open http://{} in your browser", args.addr);
            runtime.block_on(web::serve(args.addr, state))?;
        }
        Command::Mcp => {
            docseek::mcp::run_mcp(data_dir, models()?)?;
        }
        Command::Model { action } => match action {
            ModelAction::Show { json } => {
                model_show(&config_db, &cli, *json)?;
            }
            ModelAction::Set { role, model } => {
                let role = ModelRole::from(*role);
                config_db.set_setting(role.setting_key(), model)?;
                println!("Set {role} model to {model}");
            }
            ModelAction::Clear { role } => {
                let role = ModelRole::from(*role);
                if config_db.remove_setting(role.setting_key())? {
                    println!(
                        "Cleared {role} model setting (default: {})",
                        role.default_id()
                    );
                } else {
                    println!("No {role} model setting stored");
                }
            }
        },
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, &cli, args.json)?;
        }
        Command::Completions(args) => {
            args.generate();
        }
    }

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadSummary {
    document: DocumentSummary,
    replaced: bool,
    chunk_count: usize,
}

impl From<&IngestOutcome> for UploadSummary {
    fn from(outcome: &IngestOutcome) -> Self {
        Self {
            document: outcome.document.summary(),
            replaced: outcome.replaced,
            chunk_count: outcome.chunks.len(),
        }
    }
}

fn cmd_upload(
    library: &LibraryDb,
    models: &mut ModelManager,
    paths: &[std::path::PathBuf],
    json: bool,
) -> Result<()> {
    let config = ChunkingConfig::default();
    let mut summaries = Vec::with_capacity(paths.len());

    for path in paths {
        let outcome = upload_file(library, models, path, &config)?;
        if !json {
            let verb = if outcome.replaced { "Replaced" } else { "Uploaded" };
            println!(
                "{verb} {} {} ({} chunks)",
                outcome.document.id,
                outcome.document.title,
                outcome.chunks.len()
            );
        }
        summaries.push(UploadSummary::from(&outcome));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }
    Ok(())
}

fn upload_file(
    library: &LibraryDb,
    models: &mut ModelManager,
    path: &Path,
    config: &ChunkingConfig,
) -> Result<IngestOutcome> {
    let bytes = std::fs::read(path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut bar = None;
    let outcome = ingestion::ingest_upload(
        library,
        models,
        &filename,
        &bytes,
        config,
        &mut |done, total| {
            let pb = bar
                .get_or_insert_with(|| tqdm!(total = total, desc = filename.clone()));
            if let Err(e) = pb.update_to(done) {
                debug!(error = %e, "failed to draw progress bar");
            }
        },
    );
    if bar.is_some() {
        eprintln!();
    }
    outcome
}

fn documents_list(
    library: &LibraryDb,
    pattern: Option<&str>,
    json: bool,
) -> Result<()> {
    let matcher = pattern
        .map(|p| {
            globset::Glob::new(p)
                .map(|g| g.compile_matcher())
                .map_err(|e| Error::InvalidInput(format!("invalid pattern: {e}")))
        })
        .transpose()?;

    let documents: Vec<DocumentSummary> = library
        .list_documents()?
        .iter()
        .filter(|d| matcher.as_ref().is_none_or(|m| m.is_match(&d.title)))
        .map(|d| d.summary())
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
    } else if documents.is_empty() {
        println!("No documents found.");
    } else {
        for doc in &documents {
            println!(
                "{} {}  ({} chunks, uploaded {})",
                doc.short_id, doc.title, doc.chunk_count, doc.uploaded_at
            );
        }
        println!("\n{} document(s)", documents.len());
    }
    Ok(())
}

fn documents_show(library: &LibraryDb, reference: &str, json: bool) -> Result<()> {
    let document = library.resolve(reference)?;
    let chunks = library.document_chunks(document.id.numeric)?;

    if json {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|(order, text)| json!({ "order": order, "text": text }))
            .collect();
        let value = json!({ "document": document.summary(), "chunks": chunks });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{} {}", document.id, document.title);
        for (order, text) in &chunks {
            println!("--- chunk {order} ---");
            println!("{text}");
        }
    }
    Ok(())
}

fn model_show(config_db: &ConfigDb, cli: &Cli, json: bool) -> Result<()> {
    let mut rows = Vec::with_capacity(ModelRole::ALL.len());
    for role in ModelRole::ALL {
        let flag = match role {
            ModelRole::Embed => cli.embed_model.as_deref(),
            ModelRole::Qa => cli.qa_model.as_deref(),
        };
        let (id, source) = resolve_role(role, flag, Some(config_db))?;
        rows.push((role, id, source));
    }

    if json {
        let value: serde_json::Map<_, _> = rows
            .iter()
            .map(|(role, id, source)| {
                (
                    role.to_string(),
                    json!({ "model": id, "source": source.to_string() }),
                )
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        for (role, id, source) in &rows {
            println!("{role}: {id} ({source})");
        }
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    cli: &Cli,
    json: bool,
) -> Result<()> {
    let library = LibraryDb::open(&data_dir.library_db())?;
    let documents = library.document_count()?;
    let chunks = library.chunk_count()?;
    let (embed_model, _) =
        resolve_role(ModelRole::Embed, cli.embed_model.as_deref(), Some(config_db))?;
    let (qa_model, _) =
        resolve_role(ModelRole::Qa, cli.qa_model.as_deref(), Some(config_db))?;

    if json {
        let value = json!({
            "dataDir": data_dir.root().display().to_string(),
            "embedModel": embed_model,
            "qaModel": qa_model,
            "documents": documents,
            "chunks": chunks,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Embedding model: {embed_model}");
        println!("QA model: {qa_model}");
        println!("Documents: {documents}");
        println!("Chunks: {chunks}");
    }
    Ok(())
}

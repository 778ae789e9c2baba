//! docdedup CLI - classify documents as unique, exact, near or semantic duplicates

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use docdedup::{
    DedupConfig, DocumentId, DuplicateResolver, Embedder, ResolveError, Verdict,
};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docdedup", version)]
#[command(about = "Exact, near-duplicate and semantic duplicate detection for documents")]
#[command(after_help = "\
EXAMPLES:
  docdedup --db docs.redb ingest reports/*.txt
  docdedup --db docs.redb ingest --on-review link draft.txt
  docdedup --db docs.redb show <id>
  docdedup --config docdedup.yaml rebuild")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// redb database file (overrides `storage` from the config)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG wins when set
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify documents and store the ones that are new
    Ingest {
        /// Files to classify, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// What to do with near or semantic matches that need review
        #[arg(long, value_enum, default_value_t = ReviewAction::Skip)]
        on_review: ReviewAction,

        /// Skip the embedding tier for this run
        #[arg(long)]
        no_semantic: bool,
    },
    /// Delete a stored document and everything derived from it
    Delete {
        id: DocumentId,
    },
    /// Append a source label to a stored document
    Link {
        id: DocumentId,
        label: String,
    },
    /// Print a stored document record
    Show {
        id: DocumentId,
    },
    /// Rebuild the in-memory indexes and repair the persisted tables
    Rebuild,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReviewAction {
    /// Report the match and write nothing
    Skip,
    /// Append the file's label to the matched document
    Link,
    /// Store the file as its own document, noting what it resembles
    Admit,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => DedupConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DedupConfig::default(),
    };
    if let Some(db) = &cli.db {
        config = config.with_redb_path(db.to_string_lossy());
    }

    match cli.command {
        Commands::Ingest {
            files,
            on_review,
            no_semantic,
        } => {
            if no_semantic {
                config.semantic.enabled = false;
            }
            cmd_ingest(&config, &files, on_review)
        }
        Commands::Delete { id } => {
            let resolver = docdedup::open(&config)?;
            if resolver.delete(&id)? {
                println!("deleted {id}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("no document {id}");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Link { id, label } => {
            let resolver = docdedup::open(&config)?;
            resolver.link(&id, &label)?;
            println!("linked {label} -> {id}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { id } => cmd_show(&config, &id),
        Commands::Rebuild => {
            let resolver = docdedup::open(&config)?;
            let report = resolver.rebuild()?;
            println!(
                "records {}, signatures {}, embeddings {}",
                report.records, report.signatures_indexed, report.embeddings_indexed
            );
            for (table, key) in &report.undecodable {
                println!("removed undecodable {table:?} row {key}");
            }
            for (table, key) in &report.orphans {
                println!("removed orphan {table:?} row {key}");
            }
            for key in &report.unindexed {
                println!("kept record without signature {key} (exact matches only)");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cmd_ingest(config: &DedupConfig, files: &[PathBuf], on_review: ReviewAction) -> Result<ExitCode> {
    let resolver = docdedup::open(config)?;
    let embedder = docdedup::build_embedder(config)?;
    info!(
        files = files.len(),
        model = embedder.model_name(),
        semantic = config.semantic.enabled,
        "ingest_start"
    );

    let mut failed = 0usize;
    for path in files {
        match ingest_one(&resolver, &embedder, path, on_review) {
            Ok(line) => println!("{line}"),
            Err(err) => {
                failed += 1;
                eprintln!("{}: {err:#}", path.display());
            }
        }
    }
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn ingest_one(
    resolver: &DuplicateResolver,
    embedder: &dyn Embedder,
    path: &Path,
    on_review: ReviewAction,
) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let label = path.display().to_string();

    let mut verdict = resolver.classify(&bytes, &text, &label, embedder)?;
    let mut note = String::new();
    if verdict.needs_review() {
        note = resolve_review(resolver, &mut verdict, &label, on_review)?;
    }
    Ok(format_verdict(&label, &verdict, &note))
}

fn resolve_review(
    resolver: &DuplicateResolver,
    verdict: &mut Verdict,
    label: &str,
    action: ReviewAction,
) -> Result<String, ResolveError> {
    match (action, verdict.matched.clone(), verdict.pending.take()) {
        (ReviewAction::Link, Some(matched), _) => {
            resolver.link(&matched, label)?;
            Ok(format!("linked to {matched}"))
        }
        (ReviewAction::Admit, matched, Some(pending)) => {
            let admitted = resolver.admit(pending, matched.as_ref())?;
            Ok(match admitted.document_id {
                Some(id) => format!("admitted as {id}"),
                None => "admitted".to_string(),
            })
        }
        (_, _, pending) => {
            verdict.pending = pending;
            Ok("needs review".to_string())
        }
    }
}

fn format_verdict(label: &str, verdict: &Verdict, note: &str) -> String {
    let matched = verdict
        .matched
        .as_ref()
        .map_or("-", DocumentId::as_str);
    let mut line = format!(
        "{label}\t{}\t{:?}\t{:.3}\t{matched}",
        verdict.classification, verdict.disposition, verdict.score
    );
    if let Some(related) = &verdict.related {
        line.push_str(&format!(
            "\trelated {} ({:?} {:.3})",
            related.id, related.method, related.score
        ));
    }
    if verdict.semantic_unavailable {
        line.push_str("\tsemantic tier unavailable");
    }
    if !note.is_empty() {
        line.push('\t');
        line.push_str(note);
    }
    line
}

fn cmd_show(config: &DedupConfig, id: &DocumentId) -> Result<ExitCode> {
    let resolver = docdedup::open(config)?;
    let Some(record) = resolver.get(id)? else {
        eprintln!("no document {id}");
        return Ok(ExitCode::FAILURE);
    };
    println!("id:           {}", record.id);
    println!("created_at:   {}", record.created_at.to_rfc3339());
    println!(
        "duplicate_of: {}",
        record.duplicate_of.as_ref().map_or("-", DocumentId::as_str)
    );
    println!("signature:    {} slots", record.signature.len());
    match &record.embedding {
        Some(vector) => println!("embedding:    {} dims", vector.len()),
        None => println!("embedding:    -"),
    }
    println!("labels:");
    for label in &record.source_labels {
        println!("  {label}");
    }
    Ok(ExitCode::SUCCESS)
}

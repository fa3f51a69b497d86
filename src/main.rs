//! RAG evaluation harness CLI
//!
//! Index datasets into vector databases, generate evaluation questions and
//! compare databases by retrieval quality.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use rag_eval_harness::{
    config::Config,
    document::{Metadata, load_documents, load_questions, write_questions},
    embeddings,
    error::RagError,
    eval::{
        EvaluationReport, ExportFormat, QualityAnalyzer, QualityHistory, VectorDbEvaluation,
        evaluator::DEFAULT_MAX_RESULTS, report::default_output_name, rerank_chunks,
    },
    indexing::{IndexPlan, auto_plans, build_index},
    llm::LlmClient,
    persistence::{backup_file, ensure_parent_dir},
    questions::QuestionGenerator,
    rag::SimpleRag,
    splitter::SplitterKind,
    store::{LocalVectorStore, VectorStore, discover_databases},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// RAG evaluation harness - compare vector databases by retrieval quality
#[derive(Parser)]
#[command(name = "rag-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every vector database against a question set
    Evaluate {
        /// Questions file (one JSON object per line)
        #[arg(long = "input_file", default_value = "datasets/questions.json")]
        input_file: PathBuf,

        /// Output file name without extension
        #[arg(long = "output_file_name")]
        output_file_name: Option<String>,

        /// Directory for saving results
        #[arg(long = "output_dir", default_value = "results")]
        output_dir: PathBuf,

        /// Number of chunks retrieved per question
        #[arg(long = "max_results", default_value_t = DEFAULT_MAX_RESULTS)]
        max_results: usize,

        /// Directory holding one subdirectory per database
        #[arg(long = "databases_dir")]
        databases_dir: Option<PathBuf>,
    },

    /// Split and embed a dataset into a new vector database
    Index {
        /// Dataset file (JSON array of documents)
        dataset: PathBuf,

        /// Database name, or name prefix with --auto (defaults to the dataset file name)
        #[arg(short, long)]
        name: Option<String>,

        /// How documents are split into chunks
        #[arg(long, value_enum, default_value_t = SplitterArg::Sentence)]
        splitter: SplitterArg,

        /// Build a forward and a split database for every text rendition in the dataset
        #[arg(long, conflicts_with = "splitter")]
        auto: bool,

        #[arg(long = "chunk_size", default_value_t = 512)]
        chunk_size: usize,

        #[arg(long = "chunk_overlap", default_value_t = 50)]
        chunk_overlap: usize,

        #[arg(long = "databases_dir")]
        databases_dir: Option<PathBuf>,

        /// Replace an existing index
        #[arg(long)]
        force: bool,
    },

    /// Generate evaluation questions from a dataset with the LLM
    GenerateQuestions {
        /// Dataset file (JSON array of documents)
        #[arg(long = "input_file", default_value = "datasets/dataset.json")]
        input_file: PathBuf,

        /// Output file name without extension
        #[arg(long = "output_file_name")]
        output_file_name: Option<String>,

        #[arg(long = "output_dir", default_value = "results")]
        output_dir: PathBuf,
    },

    /// Rank the chunks of a dataset by similarity to a query, without an index
    Rerank {
        query: String,

        /// Dataset file (JSON array of documents)
        #[arg(long = "input_file", default_value = "datasets/dataset.json")]
        input_file: PathBuf,

        #[arg(long, value_enum, default_value_t = SplitterArg::Sentence)]
        splitter: SplitterArg,

        #[arg(long = "chunk_size", default_value_t = 512)]
        chunk_size: usize,

        #[arg(long = "chunk_overlap", default_value_t = 50)]
        chunk_overlap: usize,

        #[arg(long = "max_results", default_value_t = DEFAULT_MAX_RESULTS)]
        max_results: usize,
    },

    /// Answer a question from one vector database
    Ask {
        question: String,

        /// Database name
        #[arg(short, long)]
        database: String,

        #[arg(long = "max_results", default_value_t = DEFAULT_MAX_RESULTS)]
        max_results: usize,

        #[arg(long = "databases_dir")]
        databases_dir: Option<PathBuf>,

        /// Export search and answer quality to this file (.json or .csv)
        #[arg(long = "metrics_out")]
        metrics_out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SplitterArg {
    Forward,
    Fixed,
    Sentence,
    Markdown,
    Html,
}

impl SplitterArg {
    fn build(self, chunk_size: usize, chunk_overlap: usize) -> Result<SplitterKind> {
        let splitter = match self {
            SplitterArg::Forward => SplitterKind::Forward,
            SplitterArg::Fixed => SplitterKind::Fixed { chunk_size },
            SplitterArg::Sentence => SplitterKind::Sentence {
                chunk_size,
                chunk_overlap,
            },
            SplitterArg::Markdown => SplitterKind::Markdown {
                chunk_size,
                chunk_overlap,
            },
            SplitterArg::Html => SplitterKind::Html {
                chunk_size,
                chunk_overlap,
            },
        };
        splitter.validate().context("Invalid splitter settings")?;
        Ok(splitter)
    }
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate {
            input_file,
            output_file_name,
            output_dir,
            max_results,
            databases_dir,
        } => cmd_evaluate(input_file, output_file_name, output_dir, max_results, databases_dir),
        Commands::Index {
            dataset,
            name,
            splitter,
            auto,
            chunk_size,
            chunk_overlap,
            databases_dir,
            force,
        } => {
            let mode = if auto {
                IndexMode::Auto {
                    chunk_size,
                    chunk_overlap,
                }
            } else {
                IndexMode::Single(splitter.build(chunk_size, chunk_overlap)?)
            };
            cmd_index(dataset, name, mode, databases_dir, force)
        }
        Commands::GenerateQuestions {
            input_file,
            output_file_name,
            output_dir,
        } => cmd_generate_questions(input_file, output_file_name, output_dir),
        Commands::Rerank {
            query,
            input_file,
            splitter,
            chunk_size,
            chunk_overlap,
            max_results,
        } => cmd_rerank(
            query,
            input_file,
            splitter.build(chunk_size, chunk_overlap)?,
            max_results,
        ),
        Commands::Ask {
            question,
            database,
            max_results,
            databases_dir,
            metrics_out,
        } => cmd_ask(question, database, max_results, databases_dir, metrics_out),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> Result<Config> {
    Config::load().context("Failed to load configuration")
}

fn tokio_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn cmd_evaluate(
    input_file: PathBuf,
    output_file_name: Option<String>,
    output_dir: PathBuf,
    max_results: usize,
    databases_dir: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    config.validate_embedding().context("Invalid configuration")?;
    let databases_dir = databases_dir.unwrap_or_else(|| config.paths.databases_dir.clone());

    let questions = load_questions(&input_file).context("Failed to load questions")?;
    let embedder = embeddings::from_config(&config.embedding)?;
    let databases = discover_databases(&databases_dir, Arc::clone(&embedder))
        .context("Failed to discover vector databases")?;

    info!(
        questions = questions.len(),
        databases = databases.len(),
        databases_dir = %databases_dir.display(),
        "starting evaluation"
    );
    let start = Instant::now();

    let analyzer = QualityAnalyzer::new(QualityHistory::new());
    let mut evaluation = VectorDbEvaluation::with_analyzer(embedder.as_ref(), analyzer, max_results);
    info!(max_results = evaluation.max_results(), "retrieving chunks per question");
    let mut evaluations = evaluation.execute(&databases, &questions)?;

    let mut results = Vec::new();
    for result in evaluations.by_ref() {
        println!(
            "Evaluated {}: {} questions processed",
            result.database, result.total_processed
        );
        results.push(result);
    }
    let failed = evaluations.failed().to_vec();
    drop(evaluations);
    let analyzer = evaluation.into_analyzer();

    let report = EvaluationReport::new(results);
    println!("\nEvaluation Results:");
    println!("{}", report.render_table());

    if !failed.is_empty() {
        println!("Failed databases: {}", failed.join(", "));
    }
    if let Some(summary) = analyzer.search_summary() {
        println!(
            "Searches: {} (avg similarity {:.4}, {} below {})",
            summary.total_searches,
            summary.avg_similarity_overall,
            summary.low_quality_searches,
            rag_eval_harness::eval::quality::LOW_QUALITY_THRESHOLD
        );
    }

    let name = output_file_name.unwrap_or_else(default_output_name);
    let json_path = output_dir.join(format!("{}.json", name));
    let csv_path = output_dir.join(format!("{}.csv", name));
    report.save_json(&json_path)?;
    report.save_csv(&csv_path)?;

    println!("Results saved to: {}", json_path.display());
    println!("Summary saved to: {}", csv_path.display());
    println!("Completed in {:.2?}", start.elapsed());

    Ok(())
}

enum IndexMode {
    Single(SplitterKind),
    Auto {
        chunk_size: usize,
        chunk_overlap: usize,
    },
}

fn cmd_index(
    dataset: PathBuf,
    name: Option<String>,
    mode: IndexMode,
    databases_dir: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let config = load_config()?;
    config.validate_embedding().context("Invalid configuration")?;
    let databases_dir = databases_dir.unwrap_or_else(|| config.paths.databases_dir.clone());

    let name = match name {
        Some(name) => name,
        None => dataset_stem(&dataset)?,
    };

    let documents = load_documents(&dataset).context("Failed to load dataset")?;
    if documents.is_empty() {
        return Err(RagError::NoDocuments(dataset).into());
    }

    let plans = match mode {
        IndexMode::Single(splitter) => vec![IndexPlan::new(name, splitter)],
        IndexMode::Auto {
            chunk_size,
            chunk_overlap,
        } => auto_plans(&name, &documents, chunk_size, chunk_overlap),
    };
    println!("Indexing {} documents into {} databases", documents.len(), plans.len());

    let embedder = embeddings::from_config(&config.embedding)?;
    let mut failed = Vec::new();

    for plan in &plans {
        let start = Instant::now();
        match build_index(&databases_dir, plan, &documents, Arc::clone(&embedder), force) {
            Ok(built) => {
                println!("\nIndex Built:");
                println!("  Database:    {}", built.name);
                println!("  Splitter:    {:?}", plan.splitter);
                println!("  Entries:     {}", built.entries);
                println!("  Dimension:   {}", built.dimension.unwrap_or(0));
                println!("  Build time:  {:.2?}", start.elapsed());
                println!("  Saved to:    {}", built.path.display());
            }
            Err(e) => {
                error!(database = %plan.name, error = %e, "failed to build index");
                failed.push(plan.name.clone());
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!(
            "Failed to build {} of {} databases: {}",
            failed.len(),
            plans.len(),
            failed.join(", ")
        );
    }
    Ok(())
}

fn dataset_stem(dataset: &Path) -> Result<String> {
    dataset
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .context("Cannot derive a database name from the dataset path; pass --name")
}

fn cmd_generate_questions(
    input_file: PathBuf,
    output_file_name: Option<String>,
    output_dir: PathBuf,
) -> Result<()> {
    let config = load_config()?;
    config.validate_llm().context("Invalid configuration")?;

    let documents = load_documents(&input_file).context("Failed to load dataset")?;
    if documents.is_empty() {
        return Err(RagError::NoDocuments(input_file).into());
    }

    let name = output_file_name
        .unwrap_or_else(|| format!("questions_{}", Local::now().format("%Y%m%d_%H%M%S")));
    let output_path = output_dir.join(format!("{}.json", name));

    if let Some(backup) = backup_file(&output_path)? {
        info!(backup = %backup.display(), "backed up existing questions file");
    }
    ensure_parent_dir(&output_path)?;

    println!("Generating questions for {} documents", documents.len());
    println!("Using model: {}", config.llm.model);
    let start = Instant::now();

    let generator = QuestionGenerator::new(LlmClient::new(config.llm));
    let runtime = tokio_runtime()?;
    let mut generated = Vec::new();
    let outcome = runtime.block_on(generator.generate_all(&documents, |question| {
        generated.push(question.clone());
        Ok(())
    }));

    // Keep whatever was generated even when some documents failed
    let written = write_questions(&output_path, &generated)?;
    outcome?;

    println!("\nGenerated {} questions in {:.2?}", written, start.elapsed());
    println!("Questions saved to: {}", output_path.display());

    Ok(())
}

fn cmd_ask(
    question: String,
    database: String,
    max_results: usize,
    databases_dir: Option<PathBuf>,
    metrics_out: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    config.validate_embedding().context("Invalid configuration")?;
    config.validate_llm().context("Invalid configuration")?;
    let databases_dir = databases_dir.unwrap_or_else(|| config.paths.databases_dir.clone());

    let embedder = embeddings::from_config(&config.embedding)?;
    let store = LocalVectorStore::open(&databases_dir.join(&database), Arc::clone(&embedder));
    store.ensure_ready()?;

    let rag = SimpleRag::new(&store, LlmClient::new(config.llm), max_results);
    let mut analyzer = QualityAnalyzer::default();

    // Retrieval and scoring use the blocking embedder, so they run outside the runtime
    let mut context = Metadata::new();
    context.insert("db_name".to_string(), serde_json::Value::from(database.as_str()));
    let (candidates, search) =
        rag.retrieve_analyzed(&question, embedder.as_ref(), &mut analyzer, context)?;

    analyzer.start_operation("llm_generation");
    let runtime = tokio_runtime()?;
    let answer = runtime
        .block_on(rag.answer(&question, &candidates))
        .context("Failed to generate answer")?;
    drop(runtime);

    let chunks: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
    let llm = analyzer.analyze_llm_quality(
        &question,
        &answer,
        &chunks,
        search.as_ref().map(|s| s.id),
        Metadata::new(),
    );

    println!("{}", answer);
    println!("{}", "─".repeat(60));
    if let Some(search) = &search {
        println!(
            "Retrieved {} chunks (avg similarity {:.4}, max {:.4})",
            search.retrieved_count, search.avg_similarity_score, search.max_similarity_score
        );
    } else {
        println!("No chunks retrieved");
    }
    println!(
        "Context relevance {:.2}, consistency {:.2}, completeness {:.2}",
        llm.context_relevance, llm.response_consistency, llm.response_completeness
    );

    if let Some(path) = metrics_out {
        let format = ExportFormat::from_path(&path)?;
        analyzer.export(&path, format)?;
        println!("Quality metrics saved to: {}", path.display());
    }

    Ok(())
}

fn cmd_rerank(
    query: String,
    input_file: PathBuf,
    splitter: SplitterKind,
    max_results: usize,
) -> Result<()> {
    let config = load_config()?;
    config.validate_embedding().context("Invalid configuration")?;

    let documents = load_documents(&input_file).context("Failed to load dataset")?;
    if documents.is_empty() {
        return Err(RagError::NoDocuments(input_file).into());
    }

    let embedder = embeddings::from_config(&config.embedding)?;
    let start = Instant::now();
    let ranked = rerank_chunks(&query, &documents, &splitter, embedder.as_ref(), max_results)?;

    for (rank, candidate) in ranked.iter().enumerate() {
        let score = candidate
            .metadata
            .get(rag_eval_harness::eval::rerank::SCORE_KEY)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let preview: String = candidate.content.chars().take(120).collect();
        println!("{:>2}. [{:.4}] {}", rank + 1, score, preview.replace('\n', " "));
    }
    println!("\nRanked {} chunks in {:.2?}", ranked.len(), start.elapsed());

    Ok(())
}

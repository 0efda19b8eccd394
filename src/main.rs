//! noesis CLI: knowledge graph reasoning engine.

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use noesis::config::EngineConfig;
use noesis::dispatch::Operation;
use noesis::engine::Engine;
use noesis::graph::{NewTriple, TripleQuery};

#[derive(Parser)]
#[command(name = "noesis", version, about = "Knowledge graph reasoning engine")]
struct Cli {
    /// Data directory for persistent storage. Overrides the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file.
    Init {
        /// Where to write the config.
        #[arg(long, default_value = "noesis.toml")]
        path: PathBuf,
    },

    /// Show engine info and statistics.
    Info,

    /// Store one triple.
    Add {
        subject: String,
        predicate: String,
        object: String,
        #[arg(long, default_value = "1.0")]
        confidence: f32,
        #[arg(long, default_value = "")]
        context: String,
    },

    /// Match stored triples. Omitted positions are wildcards.
    Query {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        predicate: Option<String>,
        #[arg(long)]
        object: Option<String>,
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Derive conclusions from premises of the form "subject predicate object".
    Deduce {
        #[arg(required = true)]
        premises: Vec<String>,
        #[arg(long, default_value = "")]
        domain: String,
    },

    /// Map the structure of one description onto another.
    Analogy {
        source: String,
        target: String,
        /// Comparison criteria (comma-separated).
        #[arg(long, value_delimiter = ',')]
        criteria: Vec<String>,
    },

    /// Trace causes and effects of a situation.
    Causal {
        situation: String,
        #[arg(long, default_value = "")]
        domain: String,
        #[arg(long, default_value = "3")]
        depth: usize,
    },

    /// Generate and rank candidate approaches to a problem.
    Candidates {
        problem: String,
        #[arg(long, default_value = "3")]
        count: usize,
        #[arg(long, value_delimiter = ',')]
        criteria: Vec<String>,
    },

    /// Run JSON operations from a file (or stdin). Accepts one operation
    /// object or an array of them.
    Run {
        file: Option<PathBuf>,
    },

    /// Export engine data as JSON.
    Export {
        #[command(subcommand)]
        action: ExportAction,
    },
}

#[derive(Subcommand)]
enum ExportAction {
    Triples,
    Patterns,
    Hyperedges,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir.clone();
    }

    match cli.command {
        Commands::Init { path } => {
            config.save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }

        Commands::Info => {
            let engine = Engine::new(config)?;
            println!("{}", engine.info()?);
        }

        Commands::Add {
            subject,
            predicate,
            object,
            confidence,
            context,
        } => {
            let engine = Engine::new(config)?;
            let id = engine.add_triple(
                NewTriple::new(subject, predicate, object)
                    .with_confidence(confidence)
                    .with_context(context),
            )?;
            println!("{id}");
        }

        Commands::Query {
            subject,
            predicate,
            object,
            context,
            limit,
        } => {
            let engine = Engine::new(config)?;
            let response = engine.query(TripleQuery {
                subject,
                predicate,
                object,
                context,
                limit,
                ..Default::default()
            })?;
            print_json(&response)?;
        }

        Commands::Deduce { premises, domain } => {
            let engine = Engine::new(config)?;
            print_json(&engine.deduce(&premises, &domain)?)?;
        }

        Commands::Analogy {
            source,
            target,
            criteria,
        } => {
            let engine = Engine::new(config)?;
            print_json(&engine.analogy(&source, &target, &criteria)?)?;
        }

        Commands::Causal {
            situation,
            domain,
            depth,
        } => {
            let engine = Engine::new(config)?;
            print_json(&engine.causal_chain(&situation, &domain, depth)?)?;
        }

        Commands::Candidates {
            problem,
            count,
            criteria,
        } => {
            let engine = Engine::new(config)?;
            print_json(&engine.generate_candidates(&problem, count, &criteria)?)?;
        }

        Commands::Run { file } => {
            let content = match file {
                Some(path) => std::fs::read_to_string(&path).into_diagnostic()?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .into_diagnostic()?;
                    buf
                }
            };
            let value: serde_json::Value = serde_json::from_str(&content).into_diagnostic()?;
            let ops: Vec<Operation> = match value {
                serde_json::Value::Array(_) => serde_json::from_value(value).into_diagnostic()?,
                other => vec![serde_json::from_value(other).into_diagnostic()?],
            };

            let engine = Engine::new(config)?;
            for op in ops {
                let output = engine.dispatch(op)?;
                print_json(&output)?;
            }
        }

        Commands::Export { action } => {
            let engine = Engine::new(config)?;
            match action {
                ExportAction::Triples => print_json(&engine.export_triples()?)?,
                ExportAction::Patterns => print_json(&engine.export_patterns()?)?,
                ExportAction::Hyperedges => print_json(&engine.export_hyperedges()?)?,
            }
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

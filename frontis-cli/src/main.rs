use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use frontis_catalog::{CatalogService, CatalogStore, JsonFileCatalogStore};
use frontis_core::{GenerateRequest, Orchestrator};
use frontis_ledger::{verify_log, GenerationLedger};
use frontis_render::TemplateCoverRenderer;
use frontis_types::ArtifactFormat;

#[derive(Parser)]
#[command(name = "frontis")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect the generation ledger.
    Ledger {
        #[command(subcommand)]
        action: LedgerCommand,
        #[arg(long, default_value = "./frontpage_ledger.jsonl")]
        path: String,
    },
    /// Inspect or initialize the catalog file.
    Catalog {
        #[command(subcommand)]
        action: CatalogCommand,
        #[arg(long, default_value = "./catalog.json")]
        path: String,
    },
    /// Generate one cover from the command line.
    Demo {
        #[arg(long)]
        name: String,
        #[arg(long)]
        roll: String,
        #[arg(long)]
        reg: String,
        #[arg(long)]
        semester: u32,
        /// Subject name, matched case-insensitively against the catalog.
        #[arg(long)]
        subject: String,
        #[arg(long)]
        stream: u32,
        /// Emit a PDF page instead of the raw PNG.
        #[arg(long)]
        pdf: bool,
        /// Output path; defaults to the generated download name.
        #[arg(long)]
        out: Option<String>,
        #[arg(long, default_value = "./catalog.json")]
        catalog: String,
        #[arg(long, default_value = "./frontpage_ledger.jsonl")]
        ledger: String,
        #[arg(long, default_value = "static/template.png")]
        template: String,
        #[arg(long, default_value = "static/Sans.ttf")]
        font: String,
    },
}

#[derive(Subcommand)]
enum LedgerCommand {
    Tail {
        #[arg(long, default_value_t = 10)]
        lines: usize,
    },
    Verify,
    Count,
}

#[derive(Subcommand)]
enum CatalogCommand {
    List,
    /// Write the seeded catalog (eight semesters) to disk if none exists.
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Ledger { action, path } => match action {
            LedgerCommand::Tail { lines } => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {path}"))?;
                let all: Vec<&str> = content.lines().collect();
                let start = all.len().saturating_sub(lines);
                for line in &all[start..] {
                    println!("{line}");
                }
            }
            LedgerCommand::Verify => {
                verify_log(&path)?;
                let count = GenerationLedger::open(&path)?.count()?;
                println!("ledger OK ({count} records)");
            }
            LedgerCommand::Count => {
                let count = GenerationLedger::open(&path)?.count()?;
                println!("{count}");
            }
        },
        Command::Catalog { action, path } => {
            let store = JsonFileCatalogStore::new(&path);
            match action {
                CatalogCommand::List => {
                    let service = CatalogService::new(Arc::new(store));
                    let view = service.list_catalog().await?;
                    for sem in &view.semesters {
                        println!("{}:", sem.label);
                        for off in &sem.offerings {
                            println!("  {} [{}]", off.name, off.code);
                        }
                    }
                    println!("streams:");
                    for stream in &view.streams {
                        println!("  {} {} ({})", stream.id, stream.label, stream.short_code);
                    }
                }
                CatalogCommand::Seed => {
                    let data = store.load().await?;
                    store.persist(&data).await?;
                    println!("catalog written to {path}");
                }
            }
        }
        Command::Demo {
            name,
            roll,
            reg,
            semester,
            subject,
            stream,
            pdf,
            out,
            catalog,
            ledger,
            template,
            font,
        } => {
            let catalog = Arc::new(CatalogService::new(Arc::new(JsonFileCatalogStore::new(
                catalog,
            ))));
            let subject_id = catalog
                .snapshot()
                .await?
                .subject_by_name_ci(&subject)
                .map(|s| s.id)
                .with_context(|| format!("subject '{subject}' not in catalog"))?;
            let orchestrator = Orchestrator::new(
                catalog,
                Arc::new(TemplateCoverRenderer::new(template, font)),
                Arc::new(GenerationLedger::open(ledger)?),
            );

            let cover = orchestrator
                .generate(GenerateRequest {
                    name,
                    roll,
                    reg,
                    semester_id: semester,
                    subject_id,
                    stream_id: stream,
                    format: if pdf {
                        ArtifactFormat::Pdf
                    } else {
                        ArtifactFormat::Png
                    },
                })
                .await?;

            let out = out.unwrap_or_else(|| cover.file_name.clone());
            std::fs::write(&out, &cover.bytes)
                .with_context(|| format!("writing {out}"))?;
            println!("wrote {out} ({} bytes)", cover.bytes.len());
            if let Some(warning) = cover.ledger_warning {
                eprintln!("warning: {warning}");
            }
        }
    }
    Ok(())
}

//! dirstore CLI - Admin Command Line Interface
//!
//! Opens a backend directly from its configuration and runs one
//! administrative command against it.

mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dirstore_backend::{Backend, add_result};
use dirstore_common::{Dn, EntryId, ldif};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "/etc/dirstore/backend.toml";

#[derive(Parser, Debug)]
#[command(name = "dirstore-cli")]
#[command(about = "dirstore Admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "DIRSTORE_CONFIG")]
    config: Option<String>,

    /// Database file (overrides the configuration)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add the entries of an LDIF file
    Add {
        /// LDIF file
        file: PathBuf,
        /// Identity performing the adds (defaults to the configured root DN)
        #[arg(short, long)]
        actor: Option<String>,
        /// Keep going after a failed entry
        #[arg(short = 'k', long = "continue")]
        keep_going: bool,
    },
    /// Print an entry as LDIF
    Get {
        /// Entry DN
        dn: String,
    },
    /// List the children of an entry (root-level entries when omitted)
    Children {
        /// Parent DN
        dn: Option<String>,
    },
    /// List entries whose indexed attribute equals a value
    Search {
        /// Attribute name
        attr: String,
        /// Attribute value
        value: String,
    },
    /// Check index consistency
    Verify,
    /// Remove index records that point at missing or mismatched entries
    Repair,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &args.config {
        Some(path) => settings::load(path, true)?,
        None => settings::load(DEFAULT_CONFIG, false)?,
    };
    if let Some(db) = args.db {
        config.db_path = db;
    }
    info!("Opening backend at {:?}", config.db_path);
    let backend = Backend::open(config).context("opening backend")?;

    match args.command {
        Commands::Add {
            file,
            actor,
            keep_going,
        } => add(&backend, &file, actor.as_deref(), keep_going),
        Commands::Get { dn } => {
            let dn = Dn::parse(&dn)?;
            match backend.get(&dn)? {
                Some(entry) => {
                    print!("{}", ldif::write_entry(&entry));
                    Ok(())
                }
                None => anyhow::bail!("no such entry: {dn}"),
            }
        }
        Commands::Children { dn } => {
            let dn = dn.as_deref().map_or(Ok(Dn::null()), Dn::parse)?;
            print_ids(&backend, &backend.children(&dn)?)
        }
        Commands::Search { attr, value } => {
            if !backend.store().is_indexed(&attr) {
                anyhow::bail!("attribute {attr} is not indexed");
            }
            print_ids(&backend, &backend.search_eq(&attr, &value)?)
        }
        Commands::Verify => {
            let report = backend.verify()?;
            for issue in &report.issues {
                println!("{issue}");
            }
            println!(
                "{} entries, {} inconsistencies",
                report.entries,
                report.issues.len()
            );
            if !report.is_consistent() {
                anyhow::bail!("index inconsistencies found");
            }
            Ok(())
        }
        Commands::Repair => {
            let report = backend.repair()?;
            for issue in &report.issues {
                println!("fixed: {issue}");
            }
            println!("{} inconsistencies repaired", report.issues.len());
            Ok(())
        }
    }
}

fn add(backend: &Backend, file: &Path, actor: Option<&str>, keep_going: bool) -> Result<()> {
    let actor = match actor {
        Some(actor) => Dn::parse(actor)?,
        None => backend
            .config()
            .root_dn()?
            .context("no --actor given and no root_dn configured")?,
    };
    let text =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let entries = ldif::parse_entries(&text)?;

    let total = entries.len();
    let mut failed = 0;
    for entry in entries {
        let dn = entry.dn().clone();
        println!("adding new entry \"{dn}\"");
        let outcome = backend.add(&actor, entry);
        let result = add_result(&outcome);
        if result.code.is_success() {
            continue;
        }
        failed += 1;
        println!("result: {}", result.code);
        if let Some(matched) = &result.matched {
            println!("matched DN: {matched}");
        }
        if !result.message.is_empty() {
            println!("additional info: {}", result.message);
        }
        if !keep_going {
            break;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} entries not added");
    }
    println!("{total} entries added");
    Ok(())
}

fn print_ids(backend: &Backend, ids: &[EntryId]) -> Result<()> {
    for id in ids {
        match backend.store().id2entry_get(*id)? {
            Some(entry) => println!("{id}\t{}", entry.dn()),
            None => println!("{id}\t(missing entry)"),
        }
    }
    Ok(())
}

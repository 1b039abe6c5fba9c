//! Manual driver for exercising the engine against a data directory
//! outside of the library's own test suite.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shardkv::{EngineContext, EngineError, Options, ParallelizeInput, Value};

#[derive(Parser, Debug)]
#[command(name = "shardkv-cli", author, version, about = "Partitioned key-value compute engine CLI")]
struct Cli {
    /// Root directory under which LMDB/ and IN_MEMORY/ table trees live.
    #[arg(long, default_value = "data")]
    db_path: PathBuf,

    /// Worker pool size; defaults to the number of logical CPUs.
    #[arg(long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create (or open) a table and report its partition count.
    Table {
        name: String,
        namespace: String,
        #[arg(long, default_value_t = 8)]
        partitions: u64,
        #[arg(long)]
        ephemeral: bool,
    },
    /// Write a single string key/value pair.
    Put {
        name: String,
        namespace: String,
        key: String,
        value: String,
    },
    /// Read a single string key.
    Get {
        name: String,
        namespace: String,
        key: String,
    },
    /// Print every entry in the table in sorted key order.
    Collect { name: String, namespace: String },
    /// Report partition count and total entry count for a table.
    Stats { name: String, namespace: String },
    /// Remove every table under a namespace matching a glob pattern.
    Cleanup {
        namespace: String,
        pattern: String,
        #[arg(long)]
        persistent: bool,
    },
    /// Ingest a list of values into a fresh table. Each entry is either a
    /// bare value (synthetic integer keys assigned by enumeration) or a
    /// `key=value` pair, depending on `--include-key`; when that flag is
    /// omitted the engine's configured `include_key` option decides.
    Parallelize {
        values: Vec<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long, default_value_t = 4)]
        partitions: u64,
        #[arg(long)]
        persistent: bool,
        #[arg(long)]
        include_key: Option<bool>,
    },
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), shardkv::EngineError> {
    let cli = Cli::parse();
    let mut options = Options {
        data_dir: cli.db_path,
        ..Options::default()
    };
    if let Some(threads) = cli.threads {
        options.threads = threads;
    }
    let ctx = EngineContext::new(&options)?.install();

    match cli.command {
        Command::Table { name, namespace, partitions, ephemeral } => {
            let table = ctx.table(name, namespace, partitions, !ephemeral)?;
            println!("{} partitions", table.partitions());
        }
        Command::Put { name, namespace, key, value } => {
            let table = ctx.table(name, namespace, 1, true)?;
            table.put(&Value::Str(key), &Value::Str(value), true)?;
        }
        Command::Get { name, namespace, key } => match ctx.table(name, namespace, 1, true)?.get(&Value::Str(key), true)? {
            Some(Value::Str(s)) => println!("{s}"),
            Some(other) => println!("{other:?}"),
            None => println!("(nil)"),
        },
        Command::Collect { name, namespace } => {
            let table = ctx.table(name, namespace, 1, true)?;
            for entry in table.collect(true)? {
                let (k, v) = entry?;
                println!("{k:?} -> {v:?}");
            }
        }
        Command::Stats { name, namespace } => {
            let table = ctx.table(name, namespace, 1, true)?;
            println!("partitions={} entries={}", table.partitions(), table.count()?);
        }
        Command::Cleanup { namespace, pattern, persistent } => {
            ctx.cleanup(&pattern, &namespace, persistent)?;
        }
        Command::Parallelize { values, name, namespace, partitions, persistent, include_key } => {
            let include_key = include_key.unwrap_or(options.include_key);
            let input = if include_key {
                let pairs = values
                    .iter()
                    .map(|entry| {
                        let (k, v) = entry.split_once('=').ok_or_else(|| {
                            EngineError::InvalidArgument(format!("expected key=value, got {entry:?}"))
                        })?;
                        Ok((Value::Str(k.to_string()), Value::Str(v.to_string())))
                    })
                    .collect::<Result<Vec<_>, EngineError>>()?;
                ParallelizeInput::Keyed(pairs)
            } else {
                ParallelizeInput::Values(values.into_iter().map(Value::Str).collect())
            };
            let table = ctx.parallelize(input, name, namespace, partitions, persistent, None, true)?;
            println!("parallelized {} entries into {} partitions", table.count()?, table.partitions());
        }
    }
    Ok(())
}

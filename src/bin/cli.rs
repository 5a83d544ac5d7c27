//! PoolKV CLI
//!
//! Command-line access to a pool file.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use poolkv::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// PoolKV CLI
#[derive(Parser, Debug)]
#[command(name = "poolkv-cli")]
#[command(about = "CLI for PoolKV pool files")]
#[command(version)]
struct Args {
    /// Pool file
    #[arg(short, long, default_value = "./poolkv.pool")]
    pool: String,

    /// Index variant: btree, hashmap or blackhole
    #[arg(short, long, default_value = "btree")]
    engine: String,

    /// Size in MiB of a newly created pool (0 to only open an existing one)
    #[arg(short, long, default_value = "8")]
    size_mb: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a value
    Put {
        key: String,
        value: String,
    },

    /// Print the value of a key
    Get {
        key: String,
    },

    /// Remove a key
    Remove {
        key: String,
    },

    /// Report whether a key exists
    Exists {
        key: String,
    },

    /// Count records, optionally only keys matching a pattern
    Count {
        #[arg(long)]
        like: Option<String>,
    },

    /// Print records, optionally only keys matching a pattern
    List {
        #[arg(long)]
        like: Option<String>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let config = Config::builder()
        .engine(&args.engine)
        .path(&args.pool)
        .pool_size(args.size_mb * 1024 * 1024)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = ?e, "failed to open pool");
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&engine, args.command);
    engine.close();

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &Engine, command: Commands) -> poolkv::Result<ExitCode> {
    match command {
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
        }
        Commands::Get { key } => match engine.get_string(key.as_bytes())? {
            Some(value) => println!("{}", value),
            None => return Ok(ExitCode::FAILURE),
        },
        Commands::Remove { key } => {
            if !engine.remove(key.as_bytes())? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Exists { key } => {
            println!("{}", engine.exists(key.as_bytes())?);
        }
        Commands::Count { like } => {
            let count = match like {
                Some(pattern) => engine.count_like(&pattern)?,
                None => engine.count()?,
            };
            println!("{}", count);
        }
        Commands::List { like } => {
            let print = |key: &str, value: &str| println!("{}\t{}", key, value);
            match like {
                Some(pattern) => engine.each_string_like(&pattern, print)?,
                None => engine.each_string(print)?,
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

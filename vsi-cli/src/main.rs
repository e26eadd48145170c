//! Thin command-line front end over `vsi_core::VsiStore`. No business
//! logic lives here beyond argument parsing and formatting: a consumer of
//! the store, not a reimplementation of it.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use vsi_core::{StoreConfig, VsiStore};

#[derive(Parser)]
#[command(name = "vsi", about = "Inspect and drive a vsi signal store")]
struct Cli {
    /// Override the configured user/system region paths (`path` and
    /// `path.sys` are used).
    #[arg(short = 'a', long = "address")]
    address: Option<PathBuf>,

    /// Unlink and recreate the regions fresh before running the command.
    #[arg(short = 'c', long = "create-new")]
    create_new: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump registry contents: every (domain, key) pair and its queue depth.
    Dump,

    /// Insert a signal body for (domain, key).
    Insert {
        #[arg(short = 'd', long)]
        domain: u64,
        #[arg(short = 'k', long)]
        key: u64,
        #[arg(short = 'b', long)]
        body: String,
    },

    /// Fetch a signal for (domain, key).
    Fetch {
        #[arg(short = 'd', long)]
        domain: u64,
        #[arg(short = 'k', long)]
        key: u64,
        #[arg(short = 'm', long, default_value_t = 4096)]
        max_size: usize,
        /// Read the newest signal instead of popping the oldest.
        #[arg(long)]
        newest: bool,
        /// Block until a signal is available.
        #[arg(long)]
        wait: bool,
    },

    /// Write a raw record file from a signal (mirrors the source's
    /// `writeRecord` helper).
    WriteRecord {
        #[arg(short = 'd', long)]
        domain: u64,
        #[arg(short = 'k', long)]
        key: u64,
        #[arg(short = 'r', long)]
        file: PathBuf,
    },

    /// Read a raw record file and insert it as a signal (mirrors the
    /// source's `readRecord` helper).
    ReadRecord {
        #[arg(short = 'd', long)]
        domain: u64,
        #[arg(short = 'k', long)]
        key: u64,
        #[arg(short = 'r', long)]
        file: PathBuf,
    },

    /// Discard every queued signal for (domain, key).
    Flush {
        #[arg(short = 'd', long)]
        domain: u64,
        #[arg(short = 'k', long)]
        key: u64,
    },
}

fn load_config(cli: &Cli) -> StoreConfig {
    let mut config = StoreConfig::load();
    if let Some(address) = &cli.address {
        config.user_region_path = address.clone();
        let mut sys_path = address.clone();
        sys_path.set_extension("sys");
        config.sys_region_path = sys_path;
    }
    config
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli);
    let store = VsiStore::open(&config, cli.create_new)?;

    match &cli.command {
        Command::Dump => {
            println!("{}", "vsi store".bold());
            println!("  user region: {:?}", config.user_region_path);
            println!("  sys region:  {:?}", config.sys_region_path);
            for (domain, key, depth) in store.registry_entries() {
                println!("  domain={domain} key={key} depth={depth}");
            }
        }
        Command::Insert { domain, key, body } => {
            store.insert(*domain, *key, body.as_bytes())?;
            println!("{}", "ok".green());
        }
        Command::Fetch {
            domain,
            key,
            max_size,
            newest,
            wait,
        } => {
            let body = if *newest {
                store.fetch_newest(*domain, *key, *max_size, *wait)?
            } else {
                store.fetch(*domain, *key, *max_size, *wait)?
            };
            println!("{}", String::from_utf8_lossy(&body));
        }
        Command::WriteRecord { domain, key, file } => {
            let body = store.fetch_newest(*domain, *key, 1 << 20, false)?;
            std::fs::write(file, &body)?;
            println!("{} ({} bytes)", "ok".green(), body.len());
        }
        Command::ReadRecord { domain, key, file } => {
            let body = std::fs::read(file)?;
            store.insert(*domain, *key, &body)?;
            println!("{}", "ok".green());
        }
        Command::Flush { domain, key } => {
            store.flush(*domain, *key)?;
            println!("{}", "ok".green());
        }
    }

    store.close()?;
    Ok(())
}

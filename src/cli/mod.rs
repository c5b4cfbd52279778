use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

use crate::config::{Config, Project, parse_timeout};
use crate::pkg::actions::{self, Session};
use crate::pkg::error::kind_of;

#[derive(Parser, Debug)]
#[command(
    name = "vendr",
    version,
    about = "Resolve, vendor and lock VCS-hosted dependencies"
)]
struct Cli {
    /// Directory holding the shared cache (default: $VENDR_HOME or ~/.vendr)
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,
    /// Manifest file name to look for
    #[arg(long, global = true, value_name = "FILE")]
    manifest: Option<String>,
    /// Parallel install workers
    #[arg(short, long, global = true, value_name = "N")]
    jobs: Option<usize>,
    /// Give up waiting for another run's cache lock after SECS seconds
    #[arg(long, global = true, value_name = "SECS")]
    lock_timeout: Option<String>,
    /// More output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a manifest in the current directory
    Init {
        /// Root import path of the project (guessed when omitted)
        package: Option<String>,
    },
    /// Print the project's package name
    Name,
    /// Install dependencies, preferring the revisions in the lock file
    Install {
        /// Do not resolve test-only imports
        #[arg(long)]
        skip_test: bool,
    },
    /// Re-resolve every dependency to the newest allowed revision
    #[command(alias = "up")]
    Update {
        /// Do not resolve test-only imports
        #[arg(long)]
        skip_test: bool,
    },
    /// Add packages (`path[#version]`) to the manifest and install them
    Get {
        #[arg(required = true)]
        packages: Vec<String>,
        /// Add as test-only imports
        #[arg(long)]
        test: bool,
    },
    /// Remove packages from the manifest and the vendor tree
    #[command(alias = "rm")]
    Remove {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Convert godep/gpm metadata into manifest imports
    Import {
        /// Write the merged manifest here instead of stdout
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// List locked packages
    List,
    /// Delete every cached working copy
    CacheClear,
}

pub fn run_cli<I>(args: I) -> i32
where
    I: IntoIterator<Item = String>,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return e.exit_code();
        }
    };
    init_logger(level_for(cli.verbose, cli.quiet));
    match run(cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {:#}", err);
            if kind_of(&err).is_some_and(|k| k.is_retryable()) {
                eprintln!("note: this failure may be transient; re-running may succeed");
            }
            1
        }
    }
}

fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// `RUST_LOG` wins over the flags when set.
fn init_logger(level: LevelFilter) {
    let mut b = env_logger::Builder::new();
    b.filter_level(level).format_timestamp(None);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        b.parse_filters(&spec);
    }
    let _ = b.try_init();
}

fn config_for(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = Config::from_env()?;
    if let Some(home) = &cli.home {
        cfg.home = home.clone();
    }
    if let Some(name) = &cli.manifest {
        cfg.manifest_name = name.clone();
    }
    if let Some(n) = cli.jobs {
        cfg.workers = n.max(1);
    }
    if let Some(secs) = &cli.lock_timeout {
        cfg.lock_timeout = Some(parse_timeout(secs)?);
    }
    if matches!(
        cli.command,
        Command::Install { skip_test: true } | Command::Update { skip_test: true }
    ) {
        cfg.resolve_dev = false;
    }
    Ok(cfg)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config_for(&cli)?;
    let cwd = std::env::current_dir()?;
    let session = Session::new(cfg)?;
    let project = || -> anyhow::Result<Project> { session.project(&cwd) };

    match cli.command {
        Command::Init { package } => {
            let path = actions::init(&session, &cwd, package)?;
            println!("{}", path.display());
        }
        Command::Name => println!("{}", actions::name(&project()?)?),
        Command::Install { .. } => {
            let lock = actions::install(&session, &project()?)?;
            log::info!("installed {} packages", lock.entries().count());
        }
        Command::Update { .. } => {
            let lock = actions::update(&session, &project()?)?;
            log::info!("updated {} packages", lock.entries().count());
        }
        Command::Get { packages, test } => {
            actions::get(&session, &project()?, &packages, test)?;
        }
        Command::Remove { packages } => {
            actions::remove(&session, &project()?, &packages)?;
        }
        Command::Import { file } => {
            if let Some(text) = actions::import(&session, &project()?, file.as_deref())? {
                print!("{}", text);
            }
        }
        Command::List => {
            for line in actions::list(&project()?)? {
                println!("{}", line);
            }
        }
        Command::CacheClear => actions::cache_clear(&session)?,
    }
    Ok(())
}

// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use entropy::config::{DEFAULT_CONFIG_PATH, EntropyConfig};
use entropy::{InstallOptions, PackageMatch, RemovalOptions, RepositorySet, Resolver};
use tracing::info;

#[derive(Parser)]
#[command(name = "entropy")]
#[command(author, version, about = "Compute ordered install and removal queues for Entropy packages", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an empty repository database
    Init {
        /// Database path
        db_path: String,
    },
    /// Print the install queue for the given atoms, dependencies first
    Install {
        /// Package atoms, e.g. `>=app-misc/foo-1.2`
        #[arg(required = true)]
        atoms: Vec<String>,
        /// Only pull in direct dependencies
        #[arg(long)]
        no_recursive: bool,
        /// Pull in satisfied dependencies when a newer version is available
        #[arg(long)]
        deep: bool,
        /// Ignore what is already installed
        #[arg(long)]
        empty: bool,
        /// Include build dependencies
        #[arg(long)]
        build: bool,
    },
    /// Print the removal queue for the given installed atoms, dependents first
    Remove {
        /// Installed package atoms
        #[arg(required = true)]
        atoms: Vec<String>,
        /// Also remove dependencies nothing else needs
        #[arg(long)]
        deep: bool,
        /// With --deep, remove the packages' dependencies too
        #[arg(long, requires = "deep")]
        empty: bool,
        /// Only take direct reverse dependencies
        #[arg(long)]
        no_recursive: bool,
        /// Allow removing system packages
        #[arg(long)]
        no_system_check: bool,
    },
}

fn atom_of(repositories: &RepositorySet, pkg_match: &PackageMatch) -> Result<String> {
    Ok(repositories
        .package(pkg_match)?
        .map(|package| package.atom())
        .unwrap_or_else(|| pkg_match.to_string()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing repository database at: {}", db_path);
            entropy::db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Install {
            atoms,
            no_recursive,
            deep,
            empty,
            build,
        }) => {
            let config = EntropyConfig::load_or_default(&cli.config)
                .with_context(|| format!("loading {}", cli.config))?;
            let repositories = config.open_repositories()?;
            let resolver = Resolver::new(&repositories);

            let requested = resolver.match_packages(&atoms)?;
            let options = InstallOptions {
                recursive: !no_recursive,
                empty,
                deep,
                build,
            };
            let queue = resolver.resolve_install(&requested, &options)?;

            if !queue.is_done() {
                for conflict in &queue.conflicts {
                    eprintln!("conflict: {}", conflict);
                }
                bail!("{} conflict(s) in the install set", queue.conflicts.len());
            }

            for dependency in &queue.missing {
                eprintln!("missing: {}", dependency);
            }
            for package_id in &queue.removal {
                let atom = repositories
                    .installed()
                    .retrieve_atom(*package_id)?
                    .unwrap_or_else(|| package_id.to_string());
                println!("- {}", atom);
            }
            for pkg_match in &queue.install {
                println!("+ {}", atom_of(&repositories, pkg_match)?);
            }
            Ok(())
        }
        Some(Commands::Remove {
            atoms,
            deep,
            empty,
            no_recursive,
            no_system_check,
        }) => {
            let config = EntropyConfig::load_or_default(&cli.config)
                .with_context(|| format!("loading {}", cli.config))?;
            let repositories = config.open_repositories()?;
            let resolver = Resolver::new(&repositories).with_system_mask(config.system_mask_atoms()?);

            let requested = resolver.match_installed(&atoms)?;
            let options = RemovalOptions {
                deep,
                empty,
                recursive: !no_recursive,
                system_check: !no_system_check,
                elf_needed_scanning: config.elf_needed_scanning,
            };

            for package_id in resolver.resolve_removal(&requested, &options)? {
                let atom = repositories
                    .installed()
                    .retrieve_atom(package_id)?
                    .unwrap_or_else(|| package_id.to_string());
                println!("- {}", atom);
            }
            Ok(())
        }
        None => {
            println!("Entropy v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'entropy --help' for usage information");
            Ok(())
        }
    }
}

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use dtm::manifest::{VersionEntry, LATEST};
use dtm::{
    configure_backend, AddVersionOptions, BackendType, Datamole, DtmError, InitOptions,
    InitOutcome, PullOptions, PullOutcome, SettingsStore,
};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Starts tracking the current directory as a datamole project.
    /// Running it again in an existing project re-checks the storage and
    /// restores the current version if the data directory is empty.
    Init {
        /// Data directory to track, relative to the project root
        #[clap(long)]
        data_dir: Option<PathBuf>,
        /// Storage backend for a new project (local, gcs, s3, azure)
        #[clap(long, default_value = "local")]
        backend: String,
        /// Do not pull the current version when re-initializing
        #[clap(long)]
        no_pull: bool,
    },
    /// Snapshots the data directory as a new version
    AddVersion {
        /// Defaults to the tracked data directory
        data_dir: Option<PathBuf>,
        #[clap(short, long)]
        message: Option<String>,
        #[clap(short, long)]
        tag: Option<String>,
    },
    /// Lists every version, oldest first
    ListVersions,
    /// Downloads a version into the data directory
    #[clap(alias = "pull")]
    PullVersion {
        /// Hash, hash prefix (4+ characters), tag or `latest`
        #[clap(default_value = LATEST)]
        version: String,
        /// Download somewhere other than the tracked data directory
        #[clap(long)]
        to: Option<PathBuf>,
        /// Overwrite a non-empty destination without asking
        #[clap(long)]
        force: bool,
    },
    /// Shows the version currently checked out
    CurrentVersion,
    /// Forgets a version. It cannot be the current one.
    DeleteVersion {
        version: String,
        /// Also remove the stored copy from the backend
        #[clap(long)]
        purge: bool,
    },
    /// Shows or edits the global settings in ~/.datamole/config.yaml
    Config {
        #[clap(long)]
        backend: Option<String>,
        /// Storage location for the local backend
        #[clap(long)]
        storage_path: Option<String>,
        /// Set an arbitrary backend key, e.g. `--set default_bucket=my-bucket`
        #[clap(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

#[derive(Parser)]
#[clap(version, author, about)]
pub struct Cli {
    /// Output results as JSON
    #[clap(long, global = true)]
    pub json: bool,

    #[clap(subcommand)]
    pub command: Command,
}

/// Asks on stderr, reads the answer from stdin. Anything but y/yes declines.
fn ask(prompt: &str) -> bool {
    eprint!("{prompt} [y/N] ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn describe(entry: &VersionEntry) -> String {
    let mut line = format!("{}  {}", entry.hash, entry.timestamp);
    if let Some(tag) = &entry.tag {
        line.push_str(&format!("  [{tag}]"));
    }
    if let Some(message) = &entry.message {
        line.push_str(&format!("  {message}"));
    }
    line
}

fn from_cwd(current_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        current_dir.join(path)
    }
}

fn try_main(cli: Cli) -> Result<()> {
    env_logger::init();

    let current_dir = std::env::current_dir()?;
    log::debug!("Running from {}", current_dir.display());
    let settings = SettingsStore::default_location()?;

    match cli.command {
        Command::Init {
            data_dir,
            backend,
            no_pull,
        } => {
            let backend: BackendType = backend.parse()?;
            let dtm = Datamole::new(&current_dir, settings);
            let outcome = dtm.init(InitOptions {
                data_directory: data_dir,
                backend,
                no_pull,
            })?;
            let manifest = outcome.manifest();
            match &outcome {
                InitOutcome::Created(_) => {
                    if cli.json {
                        println!(
                            "{}",
                            json!({
                                "status": "initialized",
                                "project": manifest.project,
                                "backend": manifest.backend_type().as_str(),
                            })
                        );
                    } else {
                        println!(
                            "Initialized datamole project '{}' ({} backend)",
                            manifest.project,
                            manifest.backend_type()
                        );
                    }
                }
                InitOutcome::Attached {
                    pulled, warning, ..
                } => {
                    if cli.json {
                        println!(
                            "{}",
                            json!({
                                "status": "attached",
                                "project": manifest.project,
                                "backend": manifest.backend_type().as_str(),
                                "pulled": pulled,
                                "warning": warning,
                            })
                        );
                    } else {
                        println!(
                            "Project '{}' is already initialized ({} backend)",
                            manifest.project,
                            manifest.backend_type()
                        );
                        if let Some(hash) = pulled {
                            println!("Pulled current version {hash}");
                        }
                        if let Some(warning) = warning {
                            eprintln!("Warning: could not pull the current version: {warning}");
                        }
                    }
                }
            }
        }
        Command::AddVersion {
            data_dir,
            message,
            tag,
        } => {
            let dtm = Datamole::discover(&current_dir, settings)?;
            let entry = dtm.add_version(AddVersionOptions {
                data_dir: data_dir.map(|p| from_cwd(&current_dir, p)),
                message,
                tag,
            })?;
            if cli.json {
                println!("{}", serde_json::to_string(&entry)?);
            } else {
                println!("Added version {}", describe(&entry));
            }
        }
        Command::ListVersions => {
            let dtm = Datamole::discover(&current_dir, settings)?;
            let manifest = dtm.load_manifest()?;
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "current_version": manifest.current_version,
                        "versions": manifest.versions,
                    })
                );
            } else if manifest.versions.is_empty() {
                println!("No versions yet. Run `dtm add-version` to create one.");
            } else {
                for entry in &manifest.versions {
                    let marker = if manifest.current_version.as_deref() == Some(entry.hash.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {}", describe(entry));
                }
            }
        }
        Command::PullVersion { version, to, force } => {
            let dtm = Datamole::discover(&current_dir, settings)?;
            let outcome = dtm.pull(
                PullOptions {
                    version: Some(version),
                    to: to.map(|p| from_cwd(&current_dir, p)),
                    force,
                },
                &mut ask,
            )?;
            match outcome {
                PullOutcome::Pulled { hash, destination } => {
                    if cli.json {
                        println!(
                            "{}",
                            json!({"status": "pulled", "hash": hash, "destination": destination})
                        );
                    } else {
                        println!("Pulled version {hash} into {}", destination.display());
                    }
                }
                PullOutcome::Declined { hash, destination } => {
                    if cli.json {
                        println!(
                            "{}",
                            json!({"status": "declined", "hash": hash, "destination": destination})
                        );
                    } else {
                        println!("Pull cancelled, {} left untouched", destination.display());
                    }
                }
            }
        }
        Command::CurrentVersion => {
            let dtm = Datamole::discover(&current_dir, settings)?;
            let current = dtm.current_version()?;
            if cli.json {
                println!("{}", serde_json::to_string(&current)?);
            } else {
                match current {
                    Some(entry) => println!("{}", describe(&entry)),
                    None => println!("No current version"),
                }
            }
        }
        Command::DeleteVersion { version, purge } => {
            let dtm = Datamole::discover(&current_dir, settings)?;
            let removed = dtm.delete_version(&version, purge)?;
            if cli.json {
                println!(
                    "{}",
                    json!({"status": "deleted", "hash": removed.hash, "purged": purge})
                );
            } else if purge {
                println!("Deleted version {} and its stored data", removed.hash);
            } else {
                println!("Deleted version {}", removed.hash);
            }
        }
        Command::Config {
            backend,
            storage_path,
            set,
        } => {
            let current = if backend.is_none() && storage_path.is_none() && set.is_empty() {
                settings.initialize_defaults()?
            } else {
                let backend_type: BackendType = match backend {
                    Some(name) => name.parse()?,
                    None => BackendType::Local,
                };
                let mut config = settings
                    .initialize_defaults()?
                    .backend(backend_type)
                    .cloned()
                    .unwrap_or_default();
                if let Some(path) = storage_path {
                    config.set("storage_path", path);
                }
                for pair in set {
                    let Some((key, value)) = pair.split_once('=') else {
                        bail!("Invalid --set value '{pair}', expected KEY=VALUE");
                    };
                    config.set(key.trim(), value.trim());
                }
                configure_backend(&settings, backend_type, config)?
            };

            if cli.json {
                println!(
                    "{}",
                    json!({"path": settings.path(), "settings": current})
                );
            } else {
                println!("# {}", settings.path().display());
                print!("{}", serde_yaml::to_string(&current)?);
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    if let Err(e) = try_main(cli) {
        match (json, e.downcast_ref::<DtmError>()) {
            (true, Some(err)) => eprintln!(
                "{}",
                json!({"error": err.error_type(), "message": err.to_string()})
            ),
            _ => eprintln!("{e:?}"),
        }
        ::std::process::exit(1)
    }
}

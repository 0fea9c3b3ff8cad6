//! Command-line host for the keyvault secret store.
//!
//! Exit codes: 0 success, 1 generic failure, 2 misuse, 3 authentication
//! failure, 4 not initialized, 5 not found.

mod config;

use clap::{Parser, Subcommand};
use config::HostConfig;
use keyvault_core::{
    generate_secret, Environment, EntryFilter, EntryPatch, MergePolicy, NewEntry, SessionToken,
    Theme, VaultError, VaultManager, VaultStore,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Local, password-protected secret store for API credentials.
#[derive(Parser)]
#[command(name = "keyvault", version, about = "Local, password-protected secret store for API credentials", long_about = None)]
struct Cli {
    /// Store directory (defaults to ~/.keyvault)
    #[arg(long, global = true, value_name = "DIR")]
    store: Option<PathBuf>,

    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault
    Init {
        /// Overwrite an existing vault (destroys all entries)
        #[arg(long)]
        force: bool,
    },

    /// Show vault status
    Status,

    /// Unlock the vault and cache a session token
    Unlock {
        /// Session lifetime in minutes (defaults to the auto-lock window)
        #[arg(long)]
        minutes: Option<u64>,
    },

    /// Lock the vault and discard the session token
    Lock,

    /// Add a new entry
    Add {
        /// Service name
        #[arg(long)]
        service: String,

        /// Secret value (prompted when omitted)
        #[arg(long)]
        secret: Option<String>,

        /// Environment: production, development, staging, testing
        #[arg(long, default_value = "production")]
        environment: Environment,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Associated hostname (repeatable)
        #[arg(long = "domain")]
        domains: Vec<String>,

        #[arg(long, default_value = "")]
        notes: String,

        #[arg(long)]
        favorite: bool,

        /// Expiry, milliseconds since the Unix epoch
        #[arg(long)]
        expires_at: Option<i64>,

        /// Free-text rate-limit hint
        #[arg(long, default_value = "")]
        rate_limit: String,
    },

    /// Decrypt and print one entry
    Get { id: String },

    /// Update fields of an entry
    Update {
        id: String,

        #[arg(long)]
        service: Option<String>,

        /// New secret value; pass --prompt-secret to enter it hidden
        #[arg(long)]
        secret: Option<String>,

        /// Prompt for the new secret instead of passing it as an argument
        #[arg(long)]
        prompt_secret: bool,

        #[arg(long)]
        environment: Option<Environment>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long = "domain")]
        domains: Vec<String>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        favorite: Option<bool>,

        #[arg(long)]
        expires_at: Option<i64>,

        #[arg(long)]
        rate_limit: Option<String>,
    },

    /// Delete an entry
    #[command(alias = "rm")]
    Delete { id: String },

    /// List entries (metadata only)
    List {
        #[arg(long)]
        domain: Option<String>,

        #[arg(long)]
        environment: Option<Environment>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        favorite: bool,

        #[arg(long)]
        expired_within_days: Option<u64>,
    },

    /// Case-insensitive search over names, tags, environments, notes
    Search { query: String },

    /// Record a usage of an entry
    Use {
        id: String,

        #[arg(long)]
        domain: Option<String>,
    },

    /// Export an encrypted backup
    Export {
        /// Output file
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },

    /// Import an encrypted backup
    Import {
        /// Backup file
        file: PathBuf,

        /// skip-duplicate, overwrite, or rename
        #[arg(long, default_value = "skip-duplicate")]
        policy: MergePolicy,
    },

    /// Show recent audit records
    Audit {
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },

    /// Generate a random secret
    Generate {
        #[arg(long, default_value_t = 32)]
        length: usize,
    },

    /// Change the master password (re-encrypts every entry)
    ChangePassword,

    /// Update vault settings
    Settings {
        #[arg(long)]
        auto_lock_minutes: Option<u64>,

        #[arg(long)]
        clipboard_clear_seconds: Option<u64>,

        #[arg(long)]
        expiration_warning_days: Option<u64>,

        /// light, dark, or auto
        #[arg(long)]
        theme: Option<String>,

        #[arg(long)]
        audit_log: Option<bool>,
    },
}

fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: logging already initialized");
    }

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &VaultError) -> u8 {
    match err {
        VaultError::NotInitialized => 4,
        VaultError::NotFound(_) => 5,
        VaultError::BadPassword | VaultError::BadBackupPassword | VaultError::Locked => 3,
        VaultError::AlreadyInitialized | VaultError::Validation { .. } => 2,
        VaultError::Corrupt(_) | VaultError::Io(_) => 1,
    }
}

fn run(cli: Cli) -> keyvault_core::Result<()> {
    let default_dir = VaultStore::default_dir();
    let mut host_config = HostConfig::load(&default_dir);

    let store_dir = cli
        .store
        .clone()
        .or_else(|| host_config.store_dir.clone())
        .unwrap_or_else(|| default_dir.clone());

    host_config.last_access = Some(chrono::Utc::now().timestamp_millis());
    if let Err(err) = host_config.save(&default_dir) {
        tracing::warn!(%err, "failed to update host config");
    }

    let mut vault = VaultManager::open(&store_dir)?;

    match cli.command {
        Commands::Init { force } => {
            let password = prompt_new_password()?;
            if force {
                vault.initialize_overwrite(&password)?;
                SessionToken::clear(vault.dir());
            } else {
                vault.initialize(&password)?;
            }
            println!("Vault initialized at {}", vault.dir().display());
        }

        Commands::Status => {
            let status = vault.status();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status).map_err(json_err)?);
            } else {
                println!("initialized:  {}", status.initialized);
                println!("unlocked:     {}", status.unlocked);
                println!("entries:      {}", status.entry_count);
                println!("last activity: {}", status.last_activity);
            }
        }

        Commands::Unlock { minutes } => {
            let password = rpassword::prompt_password("Master password: ")?;
            let count = vault.unlock(&password)?;
            save_session(&mut vault, minutes)?;
            println!("Unlocked ({count} entries)");
        }

        Commands::Lock => {
            resume_session(&mut vault);
            vault.lock();
            SessionToken::clear(vault.dir());
            println!("Locked");
        }

        Commands::Add {
            service,
            secret,
            environment,
            tags,
            domains,
            notes,
            favorite,
            expires_at,
            rate_limit,
        } => {
            require_unlocked(&mut vault)?;
            let plaintext = match secret {
                Some(secret) => secret,
                None => rpassword::prompt_password("Secret: ")?,
            };

            let id = vault.add(NewEntry {
                service_name: service,
                plaintext,
                environment,
                tags: to_set(tags),
                domains: to_set(domains),
                notes,
                favorite,
                expires_at,
                rate_limit,
            })?;
            save_session(&mut vault, None)?;
            println!("{id}");
        }

        Commands::Get { id } => {
            require_unlocked(&mut vault)?;
            let entry = vault.get(&id)?;
            save_session(&mut vault, None)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entry).map_err(json_err)?);
            } else {
                println!("{}", entry.plaintext);
            }
        }

        Commands::Update {
            id,
            service,
            secret,
            prompt_secret,
            environment,
            tags,
            domains,
            notes,
            favorite,
            expires_at,
            rate_limit,
        } => {
            require_unlocked(&mut vault)?;
            let plaintext = if prompt_secret {
                Some(rpassword::prompt_password("New secret: ")?)
            } else {
                secret
            };

            vault.update(
                &id,
                EntryPatch {
                    service_name: service,
                    plaintext,
                    environment,
                    tags: if tags.is_empty() { None } else { Some(to_set(tags)) },
                    domains: if domains.is_empty() {
                        None
                    } else {
                        Some(to_set(domains))
                    },
                    notes,
                    favorite,
                    expires_at,
                    rate_limit,
                },
            )?;
            save_session(&mut vault, None)?;
            println!("Updated {id}");
        }

        Commands::Delete { id } => {
            require_unlocked(&mut vault)?;
            vault.delete(&id)?;
            save_session(&mut vault, None)?;
            println!("Deleted {id}");
        }

        Commands::List {
            domain,
            environment,
            tag,
            favorite,
            expired_within_days,
        } => {
            require_unlocked(&mut vault)?;
            let views = vault.list(&EntryFilter {
                domain,
                environment,
                tag,
                favorite: favorite.then_some(true),
                expired_within_days,
            })?;
            save_session(&mut vault, None)?;
            print_views(&views, cli.json)?;
        }

        Commands::Search { query } => {
            require_unlocked(&mut vault)?;
            let views = vault.search(&query)?;
            save_session(&mut vault, None)?;
            print_views(&views, cli.json)?;
        }

        Commands::Use { id, domain } => {
            require_unlocked(&mut vault)?;
            vault.record_usage(&id, domain.as_deref())?;
            save_session(&mut vault, None)?;
            println!("Recorded usage of {id}");
        }

        Commands::Export { out } => {
            require_unlocked(&mut vault)?;
            let password = prompt_backup_password()?;
            let blob = vault.export(&password)?;
            std::fs::write(&out, &blob)?;
            save_session(&mut vault, None)?;
            println!("Exported {} bytes to {}", blob.len(), out.display());
        }

        Commands::Import { file, policy } => {
            require_unlocked(&mut vault)?;
            let blob = std::fs::read(&file)?;
            let password = rpassword::prompt_password("Backup password: ")?;
            let report = vault.import(&blob, &password, policy)?;
            save_session(&mut vault, None)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report).map_err(json_err)?);
            } else {
                println!(
                    "Imported: {} inserted, {} skipped, {} overwritten, {} renamed",
                    report.inserted, report.skipped, report.overwritten, report.renamed
                );
            }
        }

        Commands::Audit { count } => {
            let records = vault.audit_tail(count);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records).map_err(json_err)?);
            } else {
                for record in records {
                    println!("{}  {}", record.timestamp, record.action);
                }
            }
        }

        Commands::Generate { length } => {
            let secret = generate_secret(length).map_err(VaultError::from)?;
            println!("{secret}");
        }

        Commands::ChangePassword => {
            require_unlocked(&mut vault)?;
            let old = rpassword::prompt_password("Current master password: ")?;
            let new = prompt_new_password()?;
            vault.change_password(&old, &new)?;
            save_session(&mut vault, None)?;
            println!("Master password changed");
        }

        Commands::Settings {
            auto_lock_minutes,
            clipboard_clear_seconds,
            expiration_warning_days,
            theme,
            audit_log,
        } => {
            require_unlocked(&mut vault)?;
            let mut settings = vault.settings().clone();
            if let Some(minutes) = auto_lock_minutes {
                settings.auto_lock_minutes = minutes;
            }
            if let Some(seconds) = clipboard_clear_seconds {
                settings.clipboard_clear_seconds = seconds;
            }
            if let Some(days) = expiration_warning_days {
                settings.expiration_warning_days = days;
            }
            if let Some(theme) = theme {
                settings.theme = parse_theme(&theme)?;
            }
            if let Some(enabled) = audit_log {
                settings.enable_audit_log = enabled;
            }
            vault.update_settings(settings)?;
            save_session(&mut vault, None)?;
            println!("Settings updated");
        }
    }

    Ok(())
}

/// Resume from the session token if one is live; otherwise prompt for the
/// master password.
fn require_unlocked(vault: &mut VaultManager) -> keyvault_core::Result<()> {
    if resume_session(vault) {
        return Ok(());
    }

    let password = rpassword::prompt_password("Master password: ")?;
    vault.unlock(&password)?;
    save_session(vault, None)?;
    Ok(())
}

fn resume_session(vault: &mut VaultManager) -> bool {
    let now = chrono::Utc::now().timestamp_millis();
    match SessionToken::load(vault.dir(), now) {
        Some(token) => vault.unlock_with_token(&token).is_ok(),
        None => false,
    }
}

/// Write a fresh token with a sliding expiry.
fn save_session(vault: &mut VaultManager, minutes: Option<u64>) -> keyvault_core::Result<()> {
    let minutes = minutes.unwrap_or_else(|| match vault.settings().auto_lock_minutes {
        0 => 60,
        m => m,
    });
    let token = vault.issue_session_token(minutes as i64 * 60_000)?;
    token.save(vault.dir())?;
    Ok(())
}

fn prompt_new_password() -> keyvault_core::Result<String> {
    let first = rpassword::prompt_password("New master password: ")?;
    let second = rpassword::prompt_password("Confirm master password: ")?;
    if first != second {
        return Err(VaultError::Validation {
            field: "password",
            reason: "passwords do not match".to_string(),
        });
    }
    Ok(first)
}

fn prompt_backup_password() -> keyvault_core::Result<String> {
    let first = rpassword::prompt_password("Backup password: ")?;
    let second = rpassword::prompt_password("Confirm backup password: ")?;
    if first != second {
        return Err(VaultError::Validation {
            field: "password",
            reason: "passwords do not match".to_string(),
        });
    }
    Ok(first)
}

fn print_views(
    views: &[keyvault_core::EntryView],
    json: bool,
) -> keyvault_core::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(views).map_err(json_err)?);
        return Ok(());
    }

    for view in views {
        let star = if view.favorite { "*" } else { " " };
        let tags = view
            .tags
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{star} {}  {}  [{}]  {}",
            view.id,
            view.service_name,
            view.environment.as_str(),
            tags
        );
    }
    Ok(())
}

fn parse_theme(value: &str) -> keyvault_core::Result<Theme> {
    match value.to_ascii_lowercase().as_str() {
        "light" => Ok(Theme::Light),
        "dark" => Ok(Theme::Dark),
        "auto" => Ok(Theme::Auto),
        other => Err(VaultError::Validation {
            field: "theme",
            reason: format!("unknown theme: {other}"),
        }),
    }
}

fn json_err(err: serde_json::Error) -> VaultError {
    VaultError::Validation {
        field: "output",
        reason: err.to_string(),
    }
}

fn to_set(values: Vec<String>) -> BTreeSet<String> {
    values.into_iter().collect()
}

//! notesdb Admin - Notesfile maintenance from the shell
//!
//! Creates, inspects, compacts and expires notesfiles, and edits their
//! access lists. Every command runs as the calling user.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use notesdb_common::{Identity, NotesfileId, StoreConfig, format_timestamp, now};
use notesdb_storage::{AccessEntry, AccessList, Notesfile, Permissions, Scope};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "notesdb-admin")]
#[command(about = "notesdb administrative tool")]
#[command(version)]
struct Args {
    /// Store configuration file (TOML)
    #[arg(short, long, env = "NOTESDB_CONFIG")]
    config: Option<PathBuf>,

    /// Spool directory; overrides the configuration file
    #[arg(long)]
    root: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a notesfile (`name` or `owner/name`)
    Create {
        notesfile: String,
        /// Notesfile title
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Remove a notesfile and everything in it
    Destroy {
        notesfile: String,
        /// Required; there is no undo
        #[arg(long)]
        yes: bool,
    },
    /// List every notesfile
    List,
    /// Show usage statistics
    Stat { notesfile: String },
    /// Drop deleted and damaged notes and reclaim their space
    Compact { notesfile: String },
    /// Expire old notes according to the notesfile's policy
    Expire {
        notesfile: String,
        /// Notesfile receiving archived notes
        #[arg(short, long)]
        archive: Option<String>,
    },
    /// Access list operations
    Access {
        #[command(subcommand)]
        action: AccessCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AccessCommands {
    /// Show the access list
    Show { notesfile: String },
    /// Add or replace an entry
    Set {
        notesfile: String,
        scope: ScopeArg,
        /// User, group or system name; `other` for the scope default
        name: String,
        /// Any of r (read), w (write), a (reply), d (director); `-` for none
        perms: String,
    },
    /// Remove an entry
    Remove {
        notesfile: String,
        scope: ScopeArg,
        name: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    User,
    Group,
    System,
}

impl From<ScopeArg> for Scope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::User => Self::User,
            ScopeArg::Group => Self::Group,
            ScopeArg::System => Self::System,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(args.config.as_deref(), args.root)?;
    let identity = Identity::current(config.system_name()).context("cannot resolve caller")?;
    debug!("running as {}@{}", identity.name, identity.system);

    match args.command {
        Commands::Create { notesfile, title } => {
            let id = parse_id(&notesfile)?;
            let title = title.unwrap_or_else(|| id.name.to_string());
            let nf = Notesfile::create(&config, &id, &title, &identity)?;
            let number = nf.descriptor().nf_number;
            if args.json {
                println!("{}", json!({ "notesfile": id.key(), "nf_number": number }));
            } else {
                println!("Created {id} (notesfile number {number})");
            }
        }
        Commands::Destroy { notesfile, yes } => {
            let id = parse_id(&notesfile)?;
            if !yes {
                bail!("refusing to destroy {id} without --yes");
            }
            Notesfile::destroy(&config, &id, &identity)?;
            println!("Destroyed {id}");
        }
        Commands::List => {
            let ids = Notesfile::list(&config)?;
            if args.json {
                let keys: Vec<String> = ids.iter().map(NotesfileId::key).collect();
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else if ids.is_empty() {
                println!("No notesfiles under {}", config.root.display());
            } else {
                for id in ids {
                    println!("{id}");
                }
            }
        }
        Commands::Stat { notesfile } => {
            let nf = open(&config, &notesfile)?;
            let stats = nf.stats()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Notesfile: {} ({})", nf.id(), stats.title);
                println!("==========");
                println!("Number:            {}", stats.nf_number);
                println!("Notes:             {}", stats.total_notes);
                println!("Deleted notes:     {}", stats.deleted_notes);
                println!("Deleted responses: {}", stats.deleted_responses);
                println!("Text bytes:        {}", stats.text_bytes);
                println!("Response blocks:   {}", stats.response_blocks);
                println!("Created:           {}", format_timestamp(stats.created));
                println!("Last modified:     {}", format_timestamp(stats.last_modified));
                println!("Notes read:        {}", stats.usage.notes_read);
                println!("Notes written:     {}", stats.usage.notes_written);
                println!("Entries:           {}", stats.usage.entries);
            }
        }
        Commands::Compact { notesfile } => {
            let nf = open(&config, &notesfile)?;
            let id = nf.id().clone();
            info!("compacting {id}");
            let report = nf.compact(&identity)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Compacted {id}: kept {} notes and {} responses, dropped {} notes and {} responses",
                    report.notes, report.responses, report.dropped_notes, report.dropped_responses
                );
                println!(
                    "Text: {} -> {} bytes",
                    report.text_bytes_before, report.text_bytes_after
                );
            }
        }
        Commands::Expire { notesfile, archive } => {
            let nf = open(&config, &notesfile)?;
            let archive = archive.map(|name| open(&config, &name)).transpose()?;
            let expired = nf.expire(&identity, now(), archive.as_ref())?;
            if args.json {
                println!("{}", json!({ "notesfile": nf.id().key(), "expired": expired }));
            } else {
                println!("Expired {expired} notes from {}", nf.id());
            }
        }
        Commands::Access { action } => run_access(&config, &identity, action, args.json)?,
    }

    Ok(())
}

fn run_access(
    config: &StoreConfig,
    identity: &Identity,
    action: AccessCommands,
    json_output: bool,
) -> Result<()> {
    match action {
        AccessCommands::Show { notesfile } => {
            let nf = open(config, &notesfile)?;
            let list = nf.access_list(identity)?;
            print_access(&list, json_output);
        }
        AccessCommands::Set {
            notesfile,
            scope,
            name,
            perms,
        } => {
            let nf = open(config, &notesfile)?;
            let mut list = nf.access_list(identity)?;
            list.set(AccessEntry::new(scope.into(), name, parse_perms(&perms)?))?;
            nf.replace_access(identity, &list)?;
            print_access(&list, json_output);
        }
        AccessCommands::Remove {
            notesfile,
            scope,
            name,
        } => {
            let nf = open(config, &notesfile)?;
            let mut list = nf.access_list(identity)?;
            if !list.remove(scope.into(), &name) {
                bail!("no {scope:?} entry for {name} in {}", nf.id());
            }
            nf.replace_access(identity, &list)?;
            print_access(&list, json_output);
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>, root: Option<PathBuf>) -> Result<StoreConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("cannot parse {}", path.display()))?
        }
        None => StoreConfig::default(),
    };
    // CLI takes precedence over the file
    if let Some(root) = root {
        config.root = root;
    }
    config.validate()?;
    Ok(config)
}

fn parse_id(spec: &str) -> Result<NotesfileId> {
    NotesfileId::parse(spec).with_context(|| format!("bad notesfile name {spec:?}"))
}

fn open(config: &StoreConfig, spec: &str) -> Result<Notesfile> {
    Ok(Notesfile::open(config, &parse_id(spec)?)?)
}

fn parse_perms(spec: &str) -> Result<Permissions> {
    let mut perms = Permissions::empty();
    if spec == "-" {
        return Ok(perms);
    }
    for c in spec.chars() {
        perms |= match c {
            'r' => Permissions::READ,
            'w' => Permissions::WRITE,
            'a' => Permissions::REPLY,
            'd' => Permissions::DIRECTOR,
            other => bail!("unknown permission {other:?}; use r, w, a or d"),
        };
    }
    Ok(perms)
}

fn format_perms(perms: Permissions) -> String {
    let mut out = String::new();
    for (flag, c) in [
        (Permissions::READ, 'r'),
        (Permissions::WRITE, 'w'),
        (Permissions::REPLY, 'a'),
        (Permissions::DIRECTOR, 'd'),
    ] {
        out.push(if perms.contains(flag) { c } else { '-' });
    }
    out
}

fn print_access(list: &AccessList, json_output: bool) {
    if json_output {
        let rows: Vec<_> = list
            .entries()
            .iter()
            .map(|e| {
                json!({
                    "scope": format!("{:?}", e.scope).to_lowercase(),
                    "name": e.name,
                    "perms": format_perms(e.perms),
                })
            })
            .collect();
        println!("{}", json!(rows));
        return;
    }
    println!("{:<8} {:<32} {:<5}", "SCOPE", "NAME", "PERMS");
    println!("{}", "-".repeat(47));
    for entry in list.entries() {
        println!(
            "{:<8} {:<32} {:<5}",
            format!("{:?}", entry.scope).to_lowercase(),
            entry.name,
            format_perms(entry.perms)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perm_strings() {
        let perms = parse_perms("rwa").unwrap();
        assert_eq!(perms, Permissions::READ | Permissions::WRITE | Permissions::REPLY);
        assert_eq!(format_perms(perms), "rwa-");
        assert_eq!(parse_perms("-").unwrap(), Permissions::empty());
        assert!(parse_perms("rx").is_err());
    }

    #[test]
    fn test_config_file_and_root_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notesdb.toml");
        std::fs::write(&path, "root = \"/srv/notes\"\nsuperuser = \"usenet\"\n").unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/notes"));
        assert_eq!(config.superuser, "usenet");

        let config = load_config(Some(&path), Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.superuser, "usenet");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "notesdb-admin",
            "--root",
            "/tmp/notes",
            "access",
            "set",
            "general",
            "group",
            "staff",
            "rwa",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Commands::Access {
                action: AccessCommands::Set { .. }
            }
        ));
    }
}

//! SiteBlock CLI
//!
//! Drives the blocker core against a JSON state file instead of a browser,
//! for scripting and for poking at strict mode without an extension.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use sb_core::host::{MemoryRuleEngine, MemoryStore, MemoryTabs, SystemClock};
use sb_core::store::AddOutcome;
use sb_core::{strict, Background, BlockerError, RuleEdit, Settings};

mod state;

use state::StateFile;

type CliBackground = Background<MemoryRuleEngine, MemoryStore, MemoryTabs, SystemClock>;

#[derive(Parser)]
#[command(name = "sb-cli")]
#[command(about = "SiteBlock rule management and strict mode tools")]
struct Cli {
    /// State file holding the rules and storage
    #[arg(short, long, default_value = "siteblock.json")]
    state: PathBuf,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Block a URL
    Block {
        url: String,

        /// Block only this exact address instead of the whole domain
        #[arg(long)]
        exact: bool,
    },

    /// List blocked URLs
    List,

    /// Delete one rule
    Delete { id: u32 },

    /// Delete every rule
    Clear,

    /// Edit one rule
    Edit {
        id: u32,

        /// New URL
        #[arg(long)]
        url: Option<String>,

        /// Block the whole domain
        #[arg(long, conflicts_with = "exact")]
        domain: bool,

        /// Block only the exact address
        #[arg(long)]
        exact: bool,

        /// Turn the rule on
        #[arg(long, conflicts_with = "inactive")]
        active: bool,

        /// Turn the rule off
        #[arg(long)]
        inactive: bool,
    },

    /// Turn strict mode on or off, or show its state
    Strict {
        #[arg(value_enum)]
        mode: StrictMode,
    },

    /// Simulate a navigation: reconcile strict mode and check the URL
    Navigate { url: String },

    /// Show today's remaining disables
    Quota,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrictMode {
    On,
    Off,
    Status,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), String> {
    let settings = state::load_settings(cli.config.as_deref())?;
    let mut bg = open(&cli.state, settings)?;

    let result = match cli.command {
        Commands::Block { url, exact } => cmd_block(&mut bg, &url, !exact),
        Commands::List => cmd_list(&bg),
        Commands::Delete { id } => cmd_delete(&mut bg, id),
        Commands::Clear => cmd_clear(&mut bg),
        Commands::Edit {
            id,
            url,
            domain,
            exact,
            active,
            inactive,
        } => {
            let scope = match (domain, exact) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let state = match (active, inactive) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd_edit(&mut bg, id, url, scope, state)
        }
        Commands::Strict { mode } => cmd_strict(&mut bg, mode),
        Commands::Navigate { url } => cmd_navigate(&mut bg, &url),
        Commands::Quota => cmd_quota(&bg),
    };

    // Partial progress (e.g. a reconcile before a failed check) is kept.
    StateFile::from_hosts(&bg.engine, &bg.storage).save(&cli.state)?;
    result
}

fn open(path: &Path, settings: Settings) -> Result<CliBackground, String> {
    let (engine, storage) = StateFile::load(path)?.into_hosts();
    Ok(Background::new(
        engine,
        storage,
        MemoryTabs::default(),
        SystemClock,
        settings,
        StdRng::from_os_rng(),
    ))
}

fn fail(e: BlockerError) -> String {
    e.to_string()
}

fn cmd_block(bg: &mut CliBackground, url: &str, block_domain: bool) -> Result<(), String> {
    match bg.block_url(url, block_domain).map_err(fail)? {
        AddOutcome::Added(site) => println!("Blocked '{}' as rule {}", site.stripped_url, site.id),
        AddOutcome::Duplicate => println!("'{}' is already blocked", url),
    }
    Ok(())
}

fn cmd_list(bg: &CliBackground) -> Result<(), String> {
    let mut sites = bg.rules().map_err(fail)?;
    if sites.is_empty() {
        println!("No blocked URLs");
        return Ok(());
    }

    sites.sort_by_key(|site| site.id);
    println!("{:>4}  {:<8}  {:<6}  URL", "ID", "STATE", "SCOPE");
    for site in &sites {
        println!(
            "{:>4}  {:<8}  {:<6}  {}",
            site.id,
            if site.is_active { "active" } else { "inactive" },
            if site.block_domain { "domain" } else { "exact" },
            site.stripped_url
        );
    }
    println!("{} rule(s)", sites.len());
    Ok(())
}

fn cmd_delete(bg: &mut CliBackground, id: u32) -> Result<(), String> {
    bg.delete_rule(id).map_err(fail)?;
    println!("Deleted rule {}", id);
    Ok(())
}

fn cmd_clear(bg: &mut CliBackground) -> Result<(), String> {
    let count = bg.rules().map_err(fail)?.len();
    bg.delete_all().map_err(fail)?;
    println!("Deleted {} rule(s)", count);
    Ok(())
}

fn cmd_edit(
    bg: &mut CliBackground,
    id: u32,
    url: Option<String>,
    block_domain: Option<bool>,
    is_active: Option<bool>,
) -> Result<(), String> {
    let site = bg
        .rules()
        .map_err(fail)?
        .into_iter()
        .find(|site| site.id == id)
        .ok_or_else(|| fail(BlockerError::UnknownRule(id)))?;

    let edit = RuleEdit {
        id,
        url: url.unwrap_or(site.stripped_url),
        block_domain: block_domain.unwrap_or(site.block_domain),
        is_active: is_active.unwrap_or(site.is_active),
    };

    let (plan, sites) = bg.update_rules(&[edit]).map_err(fail)?;
    if plan.dropped.contains(&id) {
        return Err(format!("Rule {} would duplicate another rule; left unchanged", id));
    }

    if let Some(site) = sites.iter().find(|site| site.id == id) {
        println!(
            "Rule {}: '{}' ({}, {})",
            site.id,
            site.stripped_url,
            if site.block_domain { "domain" } else { "exact" },
            if site.is_active { "active" } else { "inactive" }
        );
    }
    Ok(())
}

fn cmd_strict(bg: &mut CliBackground, mode: StrictMode) -> Result<(), String> {
    match mode {
        StrictMode::On => {
            let deferred = bg.set_strict_mode(true).map_err(fail)?;
            println!("Strict mode on ({} disabled rule(s) scheduled)", deferred);
        }
        StrictMode::Off => {
            bg.set_strict_mode(false).map_err(fail)?;
            println!("Strict mode off");
        }
        StrictMode::Status => {
            let enabled = strict::is_enabled(&bg.storage).map_err(fail)?;
            println!("Strict mode: {}", if enabled { "on" } else { "off" });

            for entry in strict::load_deferred(&bg.storage).map_err(fail)? {
                println!(
                    "  rule {:>4}  {:<40}  until {}",
                    entry.id,
                    entry.url_to_block,
                    entry.unblock_date.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

fn cmd_navigate(bg: &mut CliBackground, url: &str) -> Result<(), String> {
    let outcome = bg.on_navigation(Some(url)).map_err(fail)?;

    for id in &outcome.reactivated {
        println!("Re-enabled rule {}", id);
    }
    match outcome.redirect {
        Some(hit) => println!("Blocked by rule {} -> {}", hit.rule_id, hit.redirect_url),
        None => println!("Allowed"),
    }
    Ok(())
}

fn cmd_quota(bg: &CliBackground) -> Result<(), String> {
    let quota = bg.disable_quota().map_err(fail)?;
    println!(
        "{} of {} disable(s) left for {}",
        quota.remaining,
        bg.settings().daily_disable_limit,
        quota.last_reset
    );
    Ok(())
}

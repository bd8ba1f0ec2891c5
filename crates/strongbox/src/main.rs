//! strongbox - Personal secret vault
//!
//! Commands:
//! - init <GPG-ID>: Create the vault and record the recipient identity
//! - ls: Show stored services as a tree
//! - show <SERVICE>: Decrypt and print a secret
//! - insert <SERVICE>: Store a secret (hidden prompt)
//! - generate <SERVICE>: Store a random password
//! - edit <SERVICE>: Edit a secret in $EDITOR
//! - rm <SERVICE>: Delete a secret
//! - rename / cp: Move or duplicate a secret
//! - backup / restore: Archive the vault to a tar.gz and back
//! - api up|down|status: Manage the detached API server

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strongbox::pwgen::{self, PasswordPolicy};
use strongbox::server::Server;
use strongbox::{GpgGateway, Overwrite, ServicePath, Store, TreeNode};
use strongbox_core::{Config, Daemon, DaemonError, DaemonStatus, Paths};

#[derive(Parser)]
#[command(name = "strongbox")]
#[command(about = "Personal secret vault - every secret is a gpg-encrypted file")]
#[command(version)]
#[command(after_help = r#"SERVICE NAMES:
    Secrets are addressed by /-separated service paths:
    - email/work         stored as <vault>/email/work.gpg
    - bank/checking      stored as <vault>/bank/checking.gpg

STATE:
    Configuration, PID and log files live in ~/.strongbox
    (override with STRONGBOX_HOME, or the config file alone with
    --config). Set RUST_LOG=debug for details."#)]
struct Cli {
    /// Config file (default: ~/.strongbox/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault encrypting to GPG-ID
    Init {
        /// gpg key id or email of the recipient
        gpg_id: String,
        /// Vault directory (default: ~/.strongbox/vault)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// List stored services
    Ls {
        /// Output a sorted flat list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decrypt and print a secret
    Show {
        service: String,
        /// Print only this line (1-based)
        #[arg(long)]
        line: Option<usize>,
    },

    /// Store a secret
    Insert {
        service: String,
        /// Read a multi-line secret from stdin until EOF
        #[arg(short, long)]
        multiline: bool,
        /// Replace an existing secret
        #[arg(short, long)]
        force: bool,
    },

    /// Generate and store a random password
    Generate {
        service: String,
        #[command(flatten)]
        policy: PolicyArgs,
        /// Replace an existing secret
        #[arg(short, long)]
        force: bool,
        /// Print the generated password
        #[arg(long)]
        print: bool,
    },

    /// Edit a secret with $EDITOR
    Edit { service: String },

    /// Delete a secret
    Rm {
        service: String,
        /// Don't ask for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Rename a secret
    Rename {
        from: String,
        to: String,
        /// Overwrite the destination without asking
        #[arg(short, long)]
        force: bool,
    },

    /// Copy a secret
    Cp {
        from: String,
        to: String,
        /// Overwrite the destination without asking
        #[arg(short, long)]
        force: bool,
    },

    /// Archive the vault into DIR
    Backup { dir: PathBuf },

    /// Restore an archive into TARGET (default: the vault)
    Restore {
        archive: PathBuf,
        target: Option<PathBuf>,
    },

    /// Manage the API server
    Api {
        #[command(subcommand)]
        action: ApiAction,
    },
}

#[derive(Args, Debug, Clone)]
struct PolicyArgs {
    /// Password length
    #[arg(short, long, default_value_t = 16)]
    length: usize,
    #[arg(long)]
    no_symbols: bool,
    #[arg(long)]
    no_numbers: bool,
    #[arg(long)]
    no_uppercase: bool,
    #[arg(long)]
    no_lowercase: bool,
}

impl From<PolicyArgs> for PasswordPolicy {
    fn from(args: PolicyArgs) -> Self {
        Self {
            length: args.length,
            symbols: !args.no_symbols,
            numbers: !args.no_numbers,
            uppercase: !args.no_uppercase,
            lowercase: !args.no_lowercase,
        }
    }
}

#[derive(Subcommand)]
enum ApiAction {
    /// Start the API server in the background
    Up {
        /// Port to listen on (default from config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Stop the API server
    Down,
    /// Show whether the API server is running
    Status,
    /// Run the API server in the foreground
    #[command(hide = true)]
    Serve {
        #[arg(long)]
        addr: String,
    },
}

/// Resolved state shared by every command
struct App {
    paths: Paths,
    config: Config,
}

impl App {
    fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut paths = Paths::new();
        if let Some(file) = config_file {
            paths.config = file;
        }
        let config = Config::load(&paths.config, &paths)?;
        Ok(Self { paths, config })
    }

    fn store(&self) -> Result<Store> {
        let root = &self.config.vault_path;
        if !root.is_dir() {
            bail!(
                "No vault at {} - run 'strongbox init <gpg-id>' first",
                root.display()
            );
        }
        Ok(Store::new(root, Arc::new(GpgGateway::new(&self.config.gpg))))
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let serving = matches!(
        cli.command,
        Some(Commands::Api {
            action: ApiAction::Serve { .. }
        })
    );
    init_logging(if serving { "info" } else { "warn" });

    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let app = App::load(cli.config)?;

    match cli.command {
        Some(Commands::Init { gpg_id, path }) => cmd_init(app, &gpg_id, path),
        Some(Commands::Ls { json }) => cmd_ls(&app, json),
        Some(Commands::Show { service, line }) => cmd_show(&app, &service, line),
        Some(Commands::Insert {
            service,
            multiline,
            force,
        }) => cmd_insert(&app, &service, multiline, force),
        Some(Commands::Generate {
            service,
            policy,
            force,
            print,
        }) => cmd_generate(&app, &service, policy.into(), force, print),
        Some(Commands::Edit { service }) => cmd_edit(&app, &service),
        Some(Commands::Rm { service, force }) => cmd_rm(&app, &service, force),
        Some(Commands::Rename { from, to, force }) => cmd_transfer(&app, &from, &to, force, true),
        Some(Commands::Cp { from, to, force }) => cmd_transfer(&app, &from, &to, force, false),
        Some(Commands::Backup { dir }) => cmd_backup(&app, &dir),
        Some(Commands::Restore { archive, target }) => cmd_restore(&app, &archive, target),
        Some(Commands::Api { action }) => match action {
            ApiAction::Up { port } => cmd_api_up(&app, port),
            ApiAction::Down => cmd_api_down(&app),
            ApiAction::Status => cmd_api_status(&app),
            ApiAction::Serve { addr } => cmd_api_serve(&app, &addr),
        },
        // Default to listing secrets
        None => cmd_ls(&app, false),
    }
}

/// Ask a yes/no question on the terminal, defaulting to no
fn confirm(question: &str) -> Result<bool> {
    eprint!("{} [y/N] ", question);
    io::stderr().flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read answer")?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn parse_service(raw: &str) -> Result<ServicePath> {
    Ok(ServicePath::parse(raw)?)
}

/// Create the vault and point the config at it
fn cmd_init(mut app: App, gpg_id: &str, path: Option<PathBuf>) -> Result<()> {
    let root = path.unwrap_or_else(|| app.paths.default_vault());

    Store::init(&root, gpg_id, Arc::new(GpgGateway::new(&app.config.gpg)))
        .with_context(|| format!("Failed to create vault at {}", root.display()))?;

    app.config.vault_path = root.clone();
    app.config.save(&app.paths.config)?;

    println!("success: Vault initialized at {}", root.display());
    println!("Secrets will be encrypted for: {}", gpg_id);
    println!();
    println!("Store secrets with: strongbox insert <service>");

    Ok(())
}

fn print_tree(nodes: &[TreeNode], prefix: &str) {
    for (i, node) in nodes.iter().enumerate() {
        let last = i + 1 == nodes.len();
        let branch = if last { "└── " } else { "├── " };
        println!("{}{}{}", prefix, branch, node.name());

        if let TreeNode::Dir { children, .. } = node {
            let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
            print_tree(children, &child_prefix);
        }
    }
}

/// List secrets
fn cmd_ls(app: &App, json: bool) -> Result<()> {
    let store = app.store()?;

    if json {
        let mut services: Vec<String> = store.list()?.into_iter().map(|s| s.to_string()).collect();
        services.sort();
        println!("{}", serde_json::to_string_pretty(&services)?);
        return Ok(());
    }

    let tree = store.tree()?;
    if tree.is_empty() {
        println!("No secrets stored. Add one with: strongbox insert <service>");
        return Ok(());
    }

    println!("Strongbox");
    print_tree(&tree, "");

    Ok(())
}

/// Print a secret, or one line of it
fn cmd_show(app: &App, service: &str, line: Option<usize>) -> Result<()> {
    let store = app.store()?;
    let svc = parse_service(service)?;

    let plaintext = store.read(&svc)?;
    let text = String::from_utf8_lossy(&plaintext);

    match line {
        Some(n) => {
            let selected = n
                .checked_sub(1)
                .and_then(|i| text.lines().nth(i))
                .with_context(|| format!("{} has no line {}", svc, n))?;
            println!("{}", selected);
        }
        None => {
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
        }
    }

    Ok(())
}

fn read_secret(service: &ServicePath, multiline: bool) -> Result<String> {
    if multiline {
        eprintln!("Enter contents of {} and press Ctrl+D when finished:", service);
        let mut secret = String::new();
        io::stdin()
            .read_to_string(&mut secret)
            .context("Failed to read secret")?;
        return Ok(secret);
    }

    let secret = rpassword::prompt_password(format!("Enter secret for {}: ", service))
        .context("Failed to read secret")?;
    let again = rpassword::prompt_password(format!("Retype secret for {}: ", service))
        .context("Failed to read secret")?;
    if secret != again {
        bail!("The entered secrets do not match");
    }

    Ok(secret)
}

/// Insert the secret, or replace it when forced
fn store_secret(store: &Store, svc: &ServicePath, secret: &[u8], force: bool) -> Result<()> {
    if force && store.exists(svc) {
        store.update(svc, secret)?;
    } else {
        store.insert(svc, secret)?;
    }
    Ok(())
}

/// Store a secret typed by the user
fn cmd_insert(app: &App, service: &str, multiline: bool, force: bool) -> Result<()> {
    let store = app.store()?;
    let svc = parse_service(service)?;

    if store.exists(&svc) && !force {
        bail!("{} already exists (use --force to replace it)", svc);
    }

    let secret = read_secret(&svc, multiline)?;
    if secret.is_empty() {
        bail!("Empty secret not allowed");
    }

    store_secret(&store, &svc, secret.as_bytes(), force)?;
    println!("success: Secret stored: {}", svc);

    Ok(())
}

/// Store a random password
fn cmd_generate(app: &App, service: &str, policy: PasswordPolicy, force: bool, print: bool) -> Result<()> {
    let store = app.store()?;
    let svc = parse_service(service)?;

    let password = pwgen::generate(&policy)?;
    store_secret(&store, &svc, password.as_bytes(), force)?;

    println!("success: Generated {} character password for {}", password.len(), svc);
    if print {
        println!("{}", password);
    }

    Ok(())
}

/// Edit a secret in $EDITOR via a temporary file
fn cmd_edit(app: &App, service: &str) -> Result<()> {
    let store = app.store()?;
    let svc = parse_service(service)?;
    let editor = std::env::var("EDITOR")
        .ok()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| "vi".to_string());

    let changed = store.edit(&svc, |current| -> Result<Option<Vec<u8>>> {
        let mut file = tempfile::Builder::new()
            .prefix("strongbox-")
            .suffix(".txt")
            .tempfile()
            .context("Failed to create temporary file")?;
        file.write_all(current)?;
        file.flush()?;

        let mut parts = editor.split_whitespace();
        let program = parts.next().unwrap_or("vi");
        let status = Command::new(program)
            .args(parts)
            .arg(file.path())
            .status()
            .with_context(|| format!("Failed to run editor: {}", editor))?;
        if !status.success() {
            warn!("editor exited with {}", status);
            return Ok(None);
        }

        let updated = std::fs::read(file.path()).context("Failed to read edited secret")?;
        Ok(Some(updated))
    })?;

    if changed {
        println!("success: Secret updated: {}", svc);
    } else {
        println!("No changes to {}", svc);
    }

    Ok(())
}

/// Delete a secret
fn cmd_rm(app: &App, service: &str, force: bool) -> Result<()> {
    let store = app.store()?;
    let svc = parse_service(service)?;

    if !store.exists(&svc) {
        bail!("Service not found: {}", svc);
    }
    if !force && !confirm(&format!("Delete {}?", svc))? {
        println!("Aborted");
        return Ok(());
    }

    store.remove(&svc)?;
    println!("success: Secret deleted: {}", svc);

    Ok(())
}

/// Rename or copy, asking before replacing an existing destination
fn cmd_transfer(app: &App, from: &str, to: &str, force: bool, rename: bool) -> Result<()> {
    let store = app.store()?;
    let from = parse_service(from)?;
    let to = parse_service(to)?;

    let overwrite = if force {
        Overwrite::Allow
    } else if store.exists(&to) && store.exists(&from) {
        if !confirm(&format!("{} already exists. Overwrite?", to))? {
            println!("Aborted");
            return Ok(());
        }
        Overwrite::Allow
    } else {
        Overwrite::Deny
    };

    if rename {
        store.rename(&from, &to, overwrite)?;
        println!("success: Renamed {} to {}", from, to);
    } else {
        store.copy(&from, &to, overwrite)?;
        println!("success: Copied {} to {}", from, to);
    }

    Ok(())
}

/// Archive the vault
fn cmd_backup(app: &App, dir: &Path) -> Result<()> {
    let store = app.store()?;

    let path = archive::archive(store.root(), dir)?;
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    println!("success: Backup created: {}", path.display());
    println!("  Size: {}", archive::format_size(size));

    Ok(())
}

/// Restore an archive
fn cmd_restore(app: &App, archive_path: &Path, target: Option<PathBuf>) -> Result<()> {
    if !archive_path.is_file() {
        bail!("Archive not found: {}", archive_path.display());
    }
    let target = target.unwrap_or_else(|| app.config.vault_path.clone());

    let summary = archive::restore(archive_path, &target)?;

    println!("success: Restored into {}", target.display());
    println!(
        "  {} directories, {} files{}",
        summary.directories,
        summary.files,
        if summary.skipped > 0 {
            format!(", {} skipped", summary.skipped)
        } else {
            String::new()
        }
    );

    Ok(())
}

/// Start the detached API server
fn cmd_api_up(app: &App, port: Option<u16>) -> Result<()> {
    app.store()?;
    let daemon = Daemon::new(&app.paths);

    if let DaemonStatus::Running(pid) = daemon.status() {
        println!("warning: API server already running (PID {})", pid);
        return Ok(());
    }

    let mut api = app.config.api.clone();
    if let Some(port) = port {
        api.port = port;
    }

    let program = std::env::current_exe().context("Failed to locate strongbox executable")?;
    let args = vec![
        "--config".to_string(),
        app.paths.config.to_string_lossy().into_owned(),
        "api".to_string(),
        "serve".to_string(),
    ];
    let pid = daemon.start(&app.paths.home, &api.addr(), &program, &args)?;

    println!("success: API server started on {} (PID {})", api.addr(), pid);
    println!("  Log: {}", daemon.log_file().display());
    println!();
    println!("warning: The API serves decrypted secrets without authentication or TLS.");
    println!("         NEVER expose it beyond this machine.");

    Ok(())
}

/// Stop the detached API server
fn cmd_api_down(app: &App) -> Result<()> {
    let daemon = Daemon::new(&app.paths);

    match daemon.stop() {
        Ok(pid) => {
            println!("success: API server stopped (PID {})", pid);
            Ok(())
        }
        Err(DaemonError::NotRunning) => bail!("API server is not running"),
        Err(e) => Err(e.into()),
    }
}

/// Report API server status
fn cmd_api_status(app: &App) -> Result<()> {
    let daemon = Daemon::new(&app.paths);
    let status = daemon.status();

    match status.pid() {
        Some(pid) => println!(
            "{} API server {} (PID {}) on {}",
            status.symbol(),
            status.as_str(),
            pid,
            app.config.api.addr()
        ),
        None => println!("{} API server {}", status.symbol(), status.as_str()),
    }

    Ok(())
}

/// Run the API server in the foreground; this is what `api up` spawns
fn cmd_api_serve(app: &App, addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", addr))?;
    let store = app.store()?;

    let daemon = Daemon::new(&app.paths);
    daemon.write_record(std::process::id())?;
    info!(pid = std::process::id(), "wrote PID file");

    if !addr.ip().is_loopback() {
        warn!("listening on non-loopback address {} - secrets are served without TLS", addr);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        tokio::spawn(exit_on_signal());

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Server::new(store).serve(listener).await
    })
}

/// Exit immediately on SIGTERM or SIGINT. In-flight requests are abandoned.
async fn exit_on_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM, exiting"),
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, exiting"),
    }
    std::process::exit(0);
}

//! Warden CLI - command-line front end for identity and access management

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use warden_access::{build_manager, AccessManager, AccessResult, Outcome};
use warden_core::{
    init_logging, AccountRequest, AccountRequestInput, NewOrganization, NewUser, Organization,
    OrganizationUpdate, Permission, Profile, RequestStatus, Role, UserUpdate, WardenConfig,
};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Multi-tenant identity and access management")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON `{success, data | error}` objects
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and keep the session for later commands
    Login {
        /// Username or email
        identifier: String,

        /// Password (read from stdin when omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Remember the identifier for the next sign-in
        #[arg(long)]
        remember: bool,
    },

    /// End the current session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Manage organizations
    Orgs {
        #[command(subcommand)]
        action: OrgCommand,
    },

    /// Manage users
    Users {
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Submit and resolve account requests
    Requests {
        #[command(subcommand)]
        action: RequestCommand,
    },

    /// Export, import or reset local data
    Data {
        #[command(subcommand)]
        action: DataCommand,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file on init
        #[arg(long)]
        force: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[derive(Subcommand)]
enum OrgCommand {
    /// List visible organizations
    List,
    /// Create an organization
    Create { name: String },
    /// Rename an organization
    Rename { id: String, name: String },
    /// Delete an organization and its users
    Delete { id: String },
}

#[derive(Subcommand)]
enum UserCommand {
    /// List users, optionally within one organization
    List {
        #[arg(long)]
        org: Option<String>,
    },
    /// Create a user
    Create {
        username: String,
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(short, long, default_value = "viewer")]
        role: Role,
        #[arg(long)]
        org: Option<String>,
        /// Create the account deactivated
        #[arg(long)]
        inactive: bool,
    },
    /// Update a user; omitted fields stay unchanged
    Update {
        id: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        role: Option<Role>,
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Delete a user
    Delete { id: String },
}

#[derive(Subcommand)]
enum RequestCommand {
    /// Ask for an account (no sign-in needed)
    Submit {
        username: String,
        email: String,
        #[arg(short, long, default_value = "viewer")]
        role: Role,
        #[arg(long)]
        org: Option<String>,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Pending requests you may resolve
    Pending,
    /// Requests you may see, optionally by status
    List {
        #[arg(long)]
        status: Option<RequestStatus>,
    },
    /// Approve a request and provision its user
    Approve { id: String },
    /// Reject a request
    Reject {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum DataCommand {
    /// Write the full local document as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace local data with a previously exported document
    Import { file: PathBuf },
    /// Wipe local data and restore the seeded defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(find_config_file);
    let mut config = WardenConfig::load(config_path.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting Warden CLI v{}", env!("CARGO_PKG_VERSION"));
    debug!(config = ?config_path, "Configuration loaded");

    if let Commands::Config {
        show,
        init,
        force,
        validate,
    } = cli.command
    {
        return handle_config(&config, config_path.as_deref(), show, init, force, validate);
    }

    let manager = build_manager(&config)?;
    let backend = manager
        .wait_ready(config.startup.readiness_timeout_seconds)
        .await?;
    debug!(%backend, fallback = manager.used_fallback(), "Access manager ready");

    let out = Output { json: cli.json };
    match cli.command {
        Commands::Login {
            identifier,
            password,
            remember,
        } => handle_login(&manager, &out, identifier, password, remember).await,
        Commands::Logout => out.emit(manager.logout().await, |_| println!("👋 Signed out")),
        Commands::Whoami => handle_whoami(&manager, &out),
        Commands::Orgs { action } => handle_orgs(&manager, &out, action).await,
        Commands::Users { action } => handle_users(&manager, &out, action).await,
        Commands::Requests { action } => handle_requests(&manager, &out, action).await,
        Commands::Data { action } => handle_data(&manager, &out, action).await,
        Commands::Config { .. } => Ok(()),
    }
}

/// Renders results either for people or as JSON outcomes
struct Output {
    json: bool,
}

impl Output {
    fn emit<T: Serialize>(
        &self,
        result: AccessResult<T>,
        render: impl FnOnce(&T),
    ) -> anyhow::Result<()> {
        if !self.json {
            let value = result?;
            render(&value);
            return Ok(());
        }

        let outcome = Outcome::from(result);
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        match outcome.error {
            Some(error) => bail!(error),
            None => Ok(()),
        }
    }
}

async fn handle_login(
    manager: &AccessManager,
    out: &Output,
    identifier: String,
    password: Option<String>,
    remember: bool,
) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => prompt("Password: ")?,
    };

    let result = manager.login(&identifier, &password, remember).await;
    out.emit(result, |profile| {
        println!("✅ Signed in as {} ({})", profile.user.username, profile.user.role);
    })
}

fn handle_whoami(manager: &AccessManager, out: &Output) -> anyhow::Result<()> {
    let result = manager
        .current_profile()
        .ok_or(warden_access::AccessError::NotAuthenticated);

    out.emit(result, |profile| {
        print_profile(profile);
        let granted: Vec<String> = Permission::ALL
            .iter()
            .filter(|p| manager.has_permission(**p))
            .map(|p| p.to_string())
            .collect();
        println!("Permissions:  {}", granted.join(", "));
        if let Some(kind) = manager.active_backend() {
            println!("Backend:      {}", kind);
        }
    })
}

async fn handle_orgs(
    manager: &AccessManager,
    out: &Output,
    action: OrgCommand,
) -> anyhow::Result<()> {
    match action {
        OrgCommand::List => out.emit(manager.list_organizations().await, |orgs| {
            print_organizations(orgs)
        }),
        OrgCommand::Create { name } => {
            let result = manager.create_organization(NewOrganization { name }).await;
            out.emit(result, |org| {
                println!("✅ Created organization {} ({})", org.name, org.id)
            })
        }
        OrgCommand::Rename { id, name } => {
            let update = OrganizationUpdate { name: Some(name) };
            let result = manager.update_organization(&id, update).await;
            out.emit(result, |org| println!("✅ Renamed organization to {}", org.name))
        }
        OrgCommand::Delete { id } => out.emit(manager.delete_organization(&id).await, |_| {
            println!("🗑️  Deleted organization {}", id)
        }),
    }
}

async fn handle_users(
    manager: &AccessManager,
    out: &Output,
    action: UserCommand,
) -> anyhow::Result<()> {
    match action {
        UserCommand::List { org } => out.emit(manager.list_users(org.as_deref()).await, |users| {
            print_users(users)
        }),
        UserCommand::Create {
            username,
            email,
            password,
            role,
            org,
            inactive,
        } => {
            let input = NewUser {
                username,
                email,
                password,
                role,
                organization_id: org,
                is_active: !inactive,
            };
            out.emit(manager.create_user(input).await, |user| {
                println!("✅ Created user {} ({})", user.username, user.id)
            })
        }
        UserCommand::Update {
            id,
            username,
            email,
            password,
            role,
            org,
            active,
        } => {
            let update = UserUpdate {
                username,
                email,
                password,
                role,
                organization_id: org,
                is_active: active,
            };
            out.emit(manager.update_user(&id, update).await, |user| {
                println!("✅ Updated user {}", user.username)
            })
        }
        UserCommand::Delete { id } => out.emit(manager.delete_user(&id).await, |_| {
            println!("🗑️  Deleted user {}", id)
        }),
    }
}

async fn handle_requests(
    manager: &AccessManager,
    out: &Output,
    action: RequestCommand,
) -> anyhow::Result<()> {
    match action {
        RequestCommand::Submit {
            username,
            email,
            role,
            org,
            message,
        } => {
            let input = AccountRequestInput {
                username,
                email,
                requested_role: role,
                organization_id: org,
                message,
            };
            out.emit(manager.request_account(input).await, |request| {
                println!("📨 Request {} submitted, awaiting review", request.id)
            })
        }
        RequestCommand::Pending => out.emit(manager.get_pending_account_requests().await, |r| {
            print_requests(r)
        }),
        RequestCommand::List { status } => out.emit(
            manager.list_account_requests(status).await,
            |r| print_requests(r),
        ),
        RequestCommand::Approve { id } => {
            out.emit(manager.approve_account_request(&id).await, |approval| {
                println!(
                    "✅ Approved {}; created user {} ({})",
                    approval.request.id, approval.user.username, approval.user.id
                );
                println!("🔑 Temporary password: {}", approval.temporary_password);
            })
        }
        RequestCommand::Reject { id, reason } => out.emit(
            manager.reject_account_request(&id, reason).await,
            |request| println!("❌ Rejected request {}", request.id),
        ),
    }
}

async fn handle_data(
    manager: &AccessManager,
    out: &Output,
    action: DataCommand,
) -> anyhow::Result<()> {
    match action {
        DataCommand::Export { output } => {
            let result = manager.export_data().await;
            match (output, result) {
                (Some(path), Ok(document)) => {
                    std::fs::write(&path, &document)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    out.emit(Ok(path.display().to_string()), |p| {
                        println!("📦 Exported data to {}", p)
                    })
                }
                (_, result) => out.emit(result, |document| println!("{}", document)),
            }
        }
        DataCommand::Import { file } => {
            let payload = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            out.emit(manager.import_data(&payload).await, |_| {
                println!("📥 Imported data from {}", file.display())
            })
        }
        DataCommand::Reset { yes } => {
            if !yes {
                let answer = prompt("This wipes all local data. Type 'reset' to continue: ")?;
                if answer.trim() != "reset" {
                    println!("Aborted");
                    return Ok(());
                }
            }
            out.emit(manager.reset_data().await, |_| {
                println!("🔄 Local data reset to defaults")
            })
        }
    }
}

fn handle_config(
    config: &WardenConfig,
    config_path: Option<&Path>,
    show: bool,
    init: bool,
    force: bool,
    validate: bool,
) -> anyhow::Result<()> {
    if init {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => default_config_path().context("Could not determine a config directory")?,
        };
        if path.exists() && !force {
            bail!(
                "Configuration already exists at {:?} (use --force to overwrite)",
                path
            );
        }
        WardenConfig::default().save_to_file(&path)?;
        println!("✅ Configuration initialized at: {:?}", path);
        println!("📝 Fill in [remote] to use the hosted identity service.");
    }

    if show {
        println!("📋 Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
        if !config.remote.is_configured() {
            println!("ℹ️  Remote service not configured, local storage will be used");
        }
    }

    if validate {
        match config.validate() {
            Ok(()) => println!("✅ Configuration is valid"),
            Err(e) => {
                println!("❌ Configuration validation failed: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// First existing file among the standard config locations
fn find_config_file() -> Option<PathBuf> {
    let candidates = [
        default_config_path(),
        dirs::home_dir().map(|d| d.join(".warden").join("config.toml")),
        Some(PathBuf::from("warden.toml")),
    ];

    candidates.into_iter().flatten().find(|p| p.exists())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .map(|d| d.join("warden").join("config.toml"))
}

fn prompt(label: &str) -> anyhow::Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_profile(profile: &Profile) {
    let user = &profile.user;
    println!("User:         {} <{}>", user.username, user.email);
    println!("Id:           {}", user.id);
    println!("Role:         {}", user.role);
    match &profile.organization {
        Some(org) => println!("Organization: {} ({})", org.name, org.id),
        None => println!("Organization: -"),
    }
}

fn print_organizations(orgs: &[Organization]) {
    if orgs.is_empty() {
        println!("No organizations visible");
        return;
    }
    println!("{:<38} {:<30} {}", "ID", "NAME", "CREATED");
    for org in orgs {
        println!(
            "{:<38} {:<30} {}",
            org.id,
            org.name,
            org.created_at.format("%Y-%m-%d")
        );
    }
}

fn print_users(users: &[Profile]) {
    if users.is_empty() {
        println!("No users visible");
        return;
    }
    println!(
        "{:<38} {:<16} {:<10} {:<24} {}",
        "ID", "USERNAME", "ROLE", "ORGANIZATION", "ACTIVE"
    );
    for profile in users {
        let org = profile
            .organization
            .as_ref()
            .map(|o| o.name.as_str())
            .unwrap_or("-");
        println!(
            "{:<38} {:<16} {:<10} {:<24} {}",
            profile.user.id,
            profile.user.username,
            profile.user.role.to_string(),
            org,
            if profile.user.is_active { "yes" } else { "no" }
        );
    }
}

fn print_requests(requests: &[AccountRequest]) {
    if requests.is_empty() {
        println!("No account requests");
        return;
    }
    println!(
        "{:<38} {:<16} {:<10} {:<9} {}",
        "ID", "USERNAME", "ROLE", "STATUS", "SUBMITTED"
    );
    for request in requests {
        println!(
            "{:<38} {:<16} {:<10} {:<9} {}",
            request.id,
            request.username,
            request.requested_role.to_string(),
            request.status.to_string(),
            request.created_at.format("%Y-%m-%d %H:%M")
        );
    }
}

//! Command handling for the alumni client.
//!
//! `App` owns the configuration and the core services, and runs one command
//! per invocation. Protected commands go through the route guard first.

use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use alumni_core::auth::{GuardDecision, SessionSnapshot};
use alumni_core::models::{User, UsersPage, DEFAULT_PAGE_SIZE};
use alumni_core::{ApiClient, ApiError, AuthService, Config, RouteGuard, UserService};

use crate::cli::{Command, RegisterArgs, UpdateArgs, UsersArgs};

const PASSWORD_ENV: &str = "ALUMNI_PASSWORD";

/// Shown instead of the raw 401 when the session could not be renewed.
const SESSION_EXPIRED_MESSAGE: &str =
    "Your session has expired. Run `alumni login` to sign in again.";

/// Login hint used as the guard's redirect target.
const LOGIN_HINT: &str = "alumni login";

pub struct App {
    pub config: Config,
    auth: AuthService,
    users: UserService,
    guard: RouteGuard,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let store = config.store.open(&config)?;
        let client = ApiClient::new(&config, store)?;
        debug!(base_url = %client.base_url(), mode = %client.mode(), "API client configured");

        let auth = AuthService::restore(client.clone());
        let guard = RouteGuard::new(auth.session().clone()).with_login_route(LOGIN_HINT);
        let users = UserService::new(client);

        Ok(Self {
            config,
            auth,
            users,
            guard,
        })
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Login { email } => self.login(email).await,
            Command::Logout => self.logout().await,
            Command::Register(args) => self.register(args).await,
            Command::Refresh => self.refresh().await,
            Command::Status => {
                self.status();
                Ok(())
            }
            Command::Whoami => self.whoami().await,
            Command::Users(args) => self.list_users(args).await,
            Command::User { id } => self.show_user(id).await,
            Command::Update(args) => self.update_user(args).await,
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    async fn login(&mut self, email: Option<String>) -> Result<()> {
        let email = match email.or_else(|| self.config.last_email.clone()) {
            Some(email) => email,
            None => prompt("Email: ")?,
        };
        let password = read_password()?;

        let grant = self
            .auth
            .login(&email, &password)
            .await
            .map_err(explain)?;

        self.config.last_email = Some(email.clone());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        match grant.user_id {
            Some(id) => println!("Logged in as {email} (user {id})"),
            None => println!("Logged in as {email}"),
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let message = self.auth.logout().await.map_err(explain)?;
        println!("{}", message.as_deref().unwrap_or("Logged out"));
        Ok(())
    }

    async fn register(&mut self, args: RegisterArgs) -> Result<()> {
        let password = read_password()?;
        let profile = args.into_profile(password);

        let grant = match self.auth.register(&profile).await {
            Ok(grant) => grant,
            Err(ApiError::Validation(errors)) => {
                for error in &errors {
                    eprintln!("  {}: {}", error.field, error.message);
                }
                anyhow::bail!("Registration rejected ({} field(s))", errors.len());
            }
            Err(e) => return Err(explain(e)),
        };

        self.config.last_email = Some(profile.email.clone());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
        println!(
            "Registered {} (user {})",
            profile.email,
            grant.user_id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string())
        );
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        let grant = self.auth.refresh().await.map_err(explain)?;
        println!(
            "Session renewed{}",
            grant
                .user_id
                .map(|id| format!(" for user {id}"))
                .unwrap_or_default()
        );
        Ok(())
    }

    fn status(&self) {
        let snapshot = self.auth.session().snapshot();
        println!("API:      {}", self.config.api_url);
        println!("Mode:     {}", self.config.auth_mode);
        println!("Session:  {:?}", snapshot.phase);
        if let Some(id) = snapshot.user_id {
            println!("User:     {id}");
        }
        println!(
            "Stored:   {}",
            if self.auth.is_authenticated() { "yes" } else { "no" }
        );
    }

    /// Route guard check for protected commands.
    async fn require_session(&self) -> Result<SessionSnapshot> {
        match self.guard.resolve().await {
            GuardDecision::Allow => Ok(self.auth.session().snapshot()),
            GuardDecision::Redirect(route) => {
                anyhow::bail!("Not logged in. Run `{route}` first.")
            }
            GuardDecision::Wait => anyhow::bail!("Authentication still in progress"),
        }
    }

    // =========================================================================
    // Directory
    // =========================================================================

    async fn whoami(&self) -> Result<()> {
        let session = self.require_session().await?;
        let id = session
            .user_id
            .context("The stored session does not identify a user")?;
        self.show_user(id).await
    }

    async fn list_users(&self, args: UsersArgs) -> Result<()> {
        self.require_session().await?;

        if args.all {
            let users = self.users.all_users().await.map_err(explain)?;
            for user in &users {
                print_row(user);
            }
            println!("{} users", users.len());
            return Ok(());
        }

        let query = args.query();
        let page: UsersPage = self.users.users_lazy(&query).await.map_err(explain)?;
        for user in &page.users {
            print_row(user);
        }
        println!(
            "Page {} of {} ({} users)",
            args.page.max(1),
            page.page_count(DEFAULT_PAGE_SIZE).max(1),
            page.total
        );
        Ok(())
    }

    async fn show_user(&self, id: i64) -> Result<()> {
        self.require_session().await?;
        let user = self
            .users
            .find_user(id)
            .await
            .map_err(explain)?
            .with_context(|| format!("No user with id {id}"))?;
        print_profile(&user);
        Ok(())
    }

    async fn update_user(&self, args: UpdateArgs) -> Result<()> {
        self.require_session().await?;
        let changes = args.changes();
        if changes.is_empty() {
            anyhow::bail!("Nothing to update; pass at least one field");
        }
        let user = self
            .users
            .update_user(args.id, &changes)
            .await
            .map_err(explain)?;
        println!("Updated profile:");
        print_profile(&user);
        Ok(())
    }
}

/// Map API errors to user-facing errors. Anything that means the session is
/// gone gets one generic message.
fn explain(err: ApiError) -> anyhow::Error {
    if err.is_unauthorized() {
        debug!(error = %err, "Session rejected");
        anyhow::anyhow!(SESSION_EXPIRED_MESSAGE)
    } else {
        err.into()
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn read_password() -> Result<String> {
    match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => Ok(password),
        _ => rpassword::prompt_password("Password: ").context("Failed to read password"),
    }
}

fn print_row(user: &User) {
    println!(
        "{:>6}  {:<32}  {:<6}  {}",
        user.id,
        user.full_name,
        user.class_label(),
        user.status_display()
    );
}

fn print_profile(user: &User) {
    println!("{} (#{})", user.full_name, user.id);
    println!("  Email:      {}", user.email);
    println!("  Class:      {}", user.class_label());
    println!("  Occupation: {}", user.occupation);
    println!("  Status:     {}", user.status_display());
    if !user.message_to_graduates.is_empty() {
        println!("  To graduates: {}", user.message_to_graduates);
    }
    if !user.message_to_students.is_empty() {
        println!("  To students:  {}", user.message_to_students);
    }
}

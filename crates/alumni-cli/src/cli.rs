use clap::{Args, Parser, Subcommand};

use alumni_core::models::{RegisterProfile, UpdateUser, UsersQuery};
use alumni_core::{AuthMode, Config, StoreBackend};

#[derive(Debug, Parser)]
#[command(name = "alumni", version, about = "Alumni directory client")]
pub struct Cli {
    /// API base URL, e.g. https://alumni.example.org/api/
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// How the server authenticates: bearer or cookie
    #[arg(long, global = true)]
    pub mode: Option<AuthMode>,

    /// Where to keep credentials: keyring, file, or memory
    #[arg(long, global = true)]
    pub store: Option<StoreBackend>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Flags take precedence over the config file and environment.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(ref url) = self.api_url {
            config.api_url = url.clone();
        }
        if let Some(mode) = self.mode {
            config.auth_mode = mode;
        }
        if let Some(store) = self.store {
            config.store = store;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in (password from ALUMNI_PASSWORD or prompted)
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Create an account and sign in
    Register(RegisterArgs),
    /// Renew the stored session
    Refresh,
    /// Show the local session state
    Status,
    /// Show your own profile
    Whoami,
    /// List alumni
    Users(UsersArgs),
    /// Show one profile
    User { id: i64 },
    /// Update a profile
    Update(UpdateArgs),
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub full_name: String,
    #[arg(long)]
    pub graduation_year: i32,
    #[arg(long)]
    pub class_letter: String,
    #[arg(long, default_value = "")]
    pub message_to_graduates: String,
    #[arg(long, default_value = "")]
    pub message_to_students: String,
    #[arg(long, default_value = "")]
    pub occupation: String,
}

impl RegisterArgs {
    pub fn into_profile(self, password: String) -> RegisterProfile {
        RegisterProfile {
            email: self.email,
            password,
            full_name: self.full_name,
            graduation_year: self.graduation_year,
            class_letter: self.class_letter,
            message_to_graduates: self.message_to_graduates,
            message_to_students: self.message_to_students,
            occupation: self.occupation,
        }
    }
}

#[derive(Debug, Args)]
pub struct UsersArgs {
    /// Fetch the whole directory instead of one page
    #[arg(long)]
    pub all: bool,
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    #[arg(long, default_value = "")]
    pub name: String,
    #[arg(long)]
    pub year_from: Option<i32>,
    #[arg(long)]
    pub year_to: Option<i32>,
    /// Class letter filter; repeat for several letters
    #[arg(long = "class")]
    pub classes: Vec<String>,
}

impl UsersArgs {
    pub fn query(&self) -> UsersQuery {
        UsersQuery {
            year_from: self.year_from,
            year_to: self.year_to,
            full_name: self.name.clone(),
            class_letters: self.classes.clone(),
            ..UsersQuery::default()
        }
        .page(self.page)
    }
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    pub id: i64,
    #[arg(long)]
    pub full_name: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub graduation_year: Option<i32>,
    #[arg(long)]
    pub class_letter: Option<String>,
    #[arg(long)]
    pub message_to_graduates: Option<String>,
    #[arg(long)]
    pub message_to_students: Option<String>,
    #[arg(long)]
    pub occupation: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
}

impl UpdateArgs {
    pub fn changes(&self) -> UpdateUser {
        UpdateUser {
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            graduation_year: self.graduation_year,
            class_letter: self.class_letter.clone(),
            message_to_graduates: self.message_to_graduates.clone(),
            message_to_students: self.message_to_students.clone(),
            occupation: self.occupation.clone(),
            status: self.status.clone(),
        }
    }
}

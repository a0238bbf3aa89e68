//! Operator command line.

mod commands;

use clap::{Parser, Subcommand};

/// Centergate - authentication and center access for care facilities
#[derive(Parser)]
#[command(name = "centergate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default)
    #[command(alias = "web")]
    Serve,

    /// Create default config file
    #[command(alias = "--init")]
    Init,

    /// Create an account
    CreateAccount {
        /// Login name
        login_name: String,
        /// Employee code, e.g. NR12345
        employee_code: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Role (administrator, nurse, caregiver, doctor, manager, receptionist)
        #[arg(long, default_value = "caregiver")]
        role: String,
        /// Initial password
        #[arg(long)]
        password: String,
        /// Grant superuser rights (implies --multi-unit)
        #[arg(long)]
        superuser: bool,
        /// Allow access to every center
        #[arg(long)]
        multi_unit: bool,
        /// Let the user keep the initial password
        #[arg(long)]
        no_forced_change: bool,
    },

    /// Create a center
    CreateCenter {
        /// Center code, 2 to 5 capital letters
        code: String,
        /// Center name
        #[arg(long)]
        name: String,
        /// Resident capacity
        #[arg(long, default_value = "0")]
        capacity: i32,
    },

    /// Assign an account to a center
    Assign {
        /// Login name or employee code
        identifier: String,
        /// Center code
        center: String,
        /// Make this the primary center
        #[arg(long)]
        primary: bool,
    },

    /// Clear the lockout of an account
    Unlock {
        /// Login name or employee code
        identifier: String,
    },

    /// List accounts needing operator attention
    Accounts {
        /// Only accounts that are currently locked out
        #[arg(long, conflicts_with = "expired")]
        locked: bool,
        /// Only accounts that must change their password
        #[arg(long)]
        expired: bool,
    },

    /// Issue a one-time password reset token
    IssueResetToken {
        /// Login name or employee code
        identifier: String,
    },

    /// Show recent audit entries
    Audit {
        /// Window in days
        #[arg(long, default_value = "7")]
        days: u32,
        /// Only entries by this account id
        #[arg(long)]
        actor: Option<String>,
        /// Maximum entries to show
        #[arg(long, default_value = "50")]
        limit: u64,
    },
}

pub use commands::*;

//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use opas_core::models::{DecodeMode, RegistrationStatus};

#[derive(Parser)]
#[command(
    name = "opas",
    version,
    about = "OPAS admin client - review seller registrations, online or from cache"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// How to treat malformed backend records (overrides config).
    #[arg(long = "decode", value_enum, global = true)]
    pub decode: Option<DecodeArg>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in as an admin and save the session.
    Login {
        /// Admin username (defaults to OPAS_USERNAME or the last user).
        #[arg(long, short)]
        username: Option<String>,

        /// Remember the password in the OS keychain.
        #[arg(long)]
        remember: bool,
    },

    /// Clear the saved session.
    Logout {
        /// Also forget the password stored in the keychain.
        #[arg(long)]
        forget: bool,
    },

    /// Browse and review seller registrations.
    #[command(subcommand)]
    Registrations(RegistrationsCommand),

    /// Show or reset the saved listing filter.
    #[command(subcommand)]
    Filter(FilterCommand),

    /// Local notification history.
    #[command(subcommand)]
    Notifications(NotificationsCommand),

    /// Inspect and clean the local cache.
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
pub enum RegistrationsCommand {
    /// List registrations using the saved filter, updated by any options given.
    List(ListArgs),

    /// Show one registration.
    Show {
        id: i64,
    },

    /// Approve a registration.
    Approve {
        id: i64,

        /// Notes recorded with the approval.
        #[arg(long)]
        notes: Option<String>,
    },

    /// Reject a registration.
    Reject {
        id: i64,

        /// Reason shown to the seller.
        #[arg(long)]
        reason: String,
    },

    /// Ask the seller for more information.
    RequestInfo {
        id: i64,

        /// Message sent to the seller.
        #[arg(long)]
        message: String,
    },
}

#[derive(Args, Default)]
pub struct ListArgs {
    /// Only show registrations with this status ("all" clears it).
    #[arg(long, value_enum)]
    pub status: Option<StatusArg>,

    /// Search seller or farm names.
    #[arg(long)]
    pub search: Option<String>,

    /// Field to sort by.
    #[arg(long = "sort-by")]
    pub sort_by: Option<String>,

    /// Flip between ascending and descending order.
    #[arg(long = "toggle-order")]
    pub toggle_order: bool,

    /// Go to a specific page.
    #[arg(long, conflicts_with_all = ["next", "prev"])]
    pub page: Option<u32>,

    /// Go to the next page.
    #[arg(long, conflicts_with = "prev")]
    pub next: bool,

    /// Go to the previous page.
    #[arg(long)]
    pub prev: bool,
}

#[derive(Subcommand)]
pub enum FilterCommand {
    Show,
    Reset,
}

#[derive(Subcommand)]
pub enum NotificationsCommand {
    /// Show stored notifications, newest first.
    List {
        /// Only unread notifications.
        #[arg(long)]
        unread: bool,
    },

    /// Fetch the server feed, merge it into local history and refresh
    /// the status of registrations still under review.
    Sync,

    /// Mark a notification as read.
    Read {
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Show entry counts.
    Stats,

    /// Remove expired entries.
    Sweep,

    /// Remove every cached entry.
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    All,
    Pending,
    Approved,
    Rejected,
    RequestMoreInfo,
}

impl StatusArg {
    pub fn to_status(self) -> Option<RegistrationStatus> {
        match self {
            StatusArg::All => None,
            StatusArg::Pending => Some(RegistrationStatus::Pending),
            StatusArg::Approved => Some(RegistrationStatus::Approved),
            StatusArg::Rejected => Some(RegistrationStatus::Rejected),
            StatusArg::RequestMoreInfo => Some(RegistrationStatus::RequestMoreInfo),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecodeArg {
    Strict,
    Lenient,
}

impl From<DecodeArg> for DecodeMode {
    fn from(arg: DecodeArg) -> Self {
        match arg {
            DecodeArg::Strict => DecodeMode::Strict,
            DecodeArg::Lenient => DecodeMode::Lenient,
        }
    }
}

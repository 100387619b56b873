//! Command handlers.
//!
//! Reads print whatever the cache holds right away, marked with its age,
//! then wait for the background refresh and print the result if it differs.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use opas_core::auth::CredentialStore;
use opas_core::cache::age_display;
use opas_core::config::ENV_PASSWORD;
use opas_core::controller::{DataSource, QueryState};
use opas_core::models::{Notification, Registration, RegistrationFilter, RegistrationPage};
use opas_core::utils::{format_date, format_optional, format_timestamp, truncate};
use opas_core::{AdminContext, Config, OpasError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cli::{
    CacheCommand, Command, FilterCommand, ListArgs, NotificationsCommand, RegistrationsCommand,
};

/// Column width for seller names in listings
const NAME_WIDTH: usize = 40;

pub async fn run(command: Command, ctx: &AdminContext) -> Result<()> {
    match command {
        Command::Login { username, remember } => login(ctx, username, remember).await,
        Command::Logout { forget } => logout(ctx, forget),
        Command::Registrations(cmd) => registrations(ctx, cmd).await,
        Command::Filter(cmd) => filter(ctx, cmd),
        Command::Notifications(cmd) => notifications(ctx, cmd).await,
        Command::Cache(cmd) => cache(ctx, cmd),
    }
}

// =========================================================================
// Authentication
// =========================================================================

async fn login(ctx: &AdminContext, username: Option<String>, remember: bool) -> Result<()> {
    let username = match username.or_else(|| ctx.config.last_username.clone()) {
        Some(name) => name,
        None => prompt_username()?,
    };
    if username.is_empty() {
        bail!("Username required");
    }

    let password = match std::env::var(ENV_PASSWORD).ok().filter(|p| !p.is_empty()) {
        Some(password) => password,
        None if CredentialStore::has_credentials(&username) => {
            debug!(%username, "Using stored password");
            CredentialStore::get_password(&username)?
        }
        None => rpassword::prompt_password("Password: ")?,
    };

    ctx.api.client().login(&username, &password).await?;

    if remember {
        if let Err(e) = CredentialStore::store(&username, &password) {
            warn!(error = %e, "Failed to store credentials");
        }
    }

    // Save against the file contents so environment overrides stay out of it
    let path = Config::config_path()?;
    let mut saved = Config::load_from(&path).unwrap_or_default();
    saved.last_username = Some(username.clone());
    if let Err(e) = saved.save_to(&path) {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}.", username);
    Ok(())
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

fn logout(ctx: &AdminContext, forget: bool) -> Result<()> {
    let username = ctx.session.current().map(|s| s.username);
    ctx.api.client().logout();
    if forget {
        if let Some(ref username) = username.or_else(|| ctx.config.last_username.clone()) {
            CredentialStore::delete(username)?;
        }
    }
    println!("Logged out.");
    Ok(())
}

// =========================================================================
// Registrations
// =========================================================================

async fn registrations(ctx: &AdminContext, command: RegistrationsCommand) -> Result<()> {
    let controller = &ctx.registrations;
    match command {
        RegistrationsCommand::List(args) => {
            let filter = controller.update_filter(|current| apply_list_args(current, &args));
            debug!(filter = %filter.signature(), "Listing registrations");
            let rx = controller.subscribe_list(&filter);
            if let Some(page) = watch_query(rx, ctx.cache.now(), print_page).await? {
                let changed = ctx.notifications.reconcile(&page.items);
                if changed > 0 {
                    println!("{} notification(s) updated.", changed);
                }
            }
        }
        RegistrationsCommand::Show { id } => {
            let rx = controller.subscribe_detail(id);
            watch_query(rx, ctx.cache.now(), print_registration).await?;
        }
        RegistrationsCommand::Approve { id, notes } => {
            controller.approve(id, notes.as_deref()).await?;
            println!("Registration {} approved.", id);
        }
        RegistrationsCommand::Reject { id, reason } => {
            controller.reject(id, &reason).await?;
            println!("Registration {} rejected.", id);
        }
        RegistrationsCommand::RequestInfo { id, message } => {
            controller.request_more_info(id, &message).await?;
            println!("Requested more information for registration {}.", id);
        }
    }
    Ok(())
}

/// Apply list options to the saved filter. Criteria changes go back to
/// page 1 before any page option is applied.
pub fn apply_list_args(current: &RegistrationFilter, args: &ListArgs) -> RegistrationFilter {
    let mut filter = current.clone();
    if let Some(status) = args.status {
        filter = filter.with_status(status.to_status());
    }
    if let Some(ref query) = args.search {
        filter = filter.with_search_query(query.clone());
    }
    if let Some(ref sort_by) = args.sort_by {
        filter = filter.with_sort_by(sort_by.clone());
    }
    if args.toggle_order {
        filter = filter.toggled_sort_order();
    }
    if let Some(page) = args.page {
        filter = filter.with_page(page);
    } else if args.next {
        filter = filter.next_page();
    } else if args.prev {
        filter = filter.previous_page();
    }
    filter
}

/// Print the cached value (if any), then the outcome of the refresh.
///
/// Returns the network value when the refresh succeeded.
async fn watch_query<T: Clone + PartialEq>(
    mut rx: watch::Receiver<QueryState<T>>,
    now: DateTime<Utc>,
    print: fn(&T),
) -> Result<Option<T>> {
    let initial = rx.borrow_and_update().clone();
    if let QueryState::Ready { ref value, updated_at, .. } = initial {
        println!("Cached ({}), refreshing...\n", age_display(updated_at, now));
        print(value);
    }

    if rx.changed().await.is_err() {
        return Ok(None);
    }
    let state = rx.borrow().clone();
    match state {
        QueryState::Ready {
            value,
            source: DataSource::Network,
            ..
        } => {
            match initial.value() {
                Some(cached) if *cached == value => println!("\nUp to date."),
                Some(_) => {
                    println!("\nUpdated:\n");
                    print(&value);
                }
                None => print(&value),
            }
            Ok(Some(value))
        }
        QueryState::Ready { .. } => {
            eprintln!("\nCould not reach the server; showing cached data.");
            Ok(None)
        }
        QueryState::Error { error, .. } => Err(explain(error)),
        QueryState::Empty | QueryState::Loading => Ok(None),
    }
}

fn explain(error: OpasError) -> anyhow::Error {
    match error {
        OpasError::Auth(_) => anyhow::Error::new(error).context("Not logged in. Run `opas login` first"),
        other => other.into(),
    }
}

fn print_page(page: &RegistrationPage) {
    if page.items.is_empty() {
        println!("No registrations match the current filter.");
        return;
    }
    println!("{:>6}  {:<18}  {:<w$}  {}", "ID", "STATUS", "SELLER", "SUBMITTED", w = NAME_WIDTH);
    for reg in &page.items {
        println!(
            "{:>6}  {:<18}  {:<w$}  {}",
            reg.id,
            reg.status.as_str(),
            truncate(&reg.display_name(), NAME_WIDTH),
            format_date(&reg.submitted_at),
            w = NAME_WIDTH
        );
    }
    println!(
        "\nPage {} of {} ({} registrations)",
        page.page,
        page.total_pages(),
        page.total
    );
}

fn print_registration(reg: &Registration) {
    println!("Registration #{}", reg.id);
    println!("  Seller:     {}", reg.seller_name);
    println!("  Farm:       {}", format_optional(reg.farm_name.as_deref(), "-"));
    println!("  Status:     {}", reg.status);
    println!("  Submitted:  {}", format_timestamp(&reg.submitted_at));
    if let Some(ref reviewed) = reg.reviewed_at {
        println!("  Reviewed:   {}", format_timestamp(reviewed));
    }
    if let Some(note) = reg.review_note() {
        println!("  Note:       {}", note);
    }
}

// =========================================================================
// Filter, notifications, cache
// =========================================================================

fn filter(ctx: &AdminContext, command: FilterCommand) -> Result<()> {
    let filter = match command {
        FilterCommand::Show => ctx.registrations.filter(),
        FilterCommand::Reset => ctx.registrations.reset_filter(),
    };
    println!("status: {}", filter.status.map_or("all", |s| s.as_str()));
    println!("search: {}", format_optional(Some(filter.search_query.as_str()), "-"));
    println!("sort:   {} {}", filter.sort_by, filter.sort_order);
    println!("page:   {}", filter.page);
    Ok(())
}

async fn notifications(ctx: &AdminContext, command: NotificationsCommand) -> Result<()> {
    let history = &ctx.notifications;
    match command {
        NotificationsCommand::List { unread } => {
            let items: Vec<Notification> = history
                .list()
                .into_iter()
                .filter(|n| !unread || !n.read)
                .collect();
            if items.is_empty() {
                println!("No notifications.");
            }
            for n in &items {
                let marker = if n.read { " " } else { "*" };
                let status = n.status.map_or("", |s| s.as_str());
                println!(
                    "{} {:>6}  {}  {:<18}  {}",
                    marker,
                    n.id,
                    format_timestamp(&n.received_at),
                    status,
                    n.title
                );
            }
            println!("\n{} unread", history.unread_count());
        }
        NotificationsCommand::Sync => {
            let summary = history.sync(&ctx.api, &ctx.api).await.map_err(explain)?;
            println!(
                "{} new, {} updated, {} status change(s), {} unread.",
                summary.added,
                summary.updated,
                summary.reconciled,
                history.unread_count()
            );
        }
        NotificationsCommand::Read { id } => {
            if !history.mark_read(id) {
                bail!("No notification with id {}", id);
            }
        }
    }
    Ok(())
}

fn cache(ctx: &AdminContext, command: CacheCommand) -> Result<()> {
    match command {
        CacheCommand::Stats => {
            let stats = ctx.cache.stats().context("Failed to read cache")?;
            println!("{} entries ({} expired)", stats.entries, stats.expired);
        }
        CacheCommand::Sweep => {
            let removed = ctx.cache.clear_expired().context("Failed to sweep cache")?;
            println!("Removed {} expired entries.", removed);
        }
        CacheCommand::Clear => {
            let removed = ctx.cache.clear_all().context("Failed to clear cache")?;
            println!("Removed {} entries.", removed);
        }
    }
    Ok(())
}

//! Demo command implementation.
//!
//! Drives a session against the in-memory backend through a live write, a
//! change made by another client, a channel outage with a write during it,
//! and the reconnect that follows.

use marksync_engine::{MemoryBackend, RetryConfig, SyncConfig, SyncSession, SyncStats};
use marksync_protocol::{parse_timestamp, Bookmark, Principal, SubscriptionState};
use serde::Serialize;
use std::error::Error;
use std::time::Duration;
use tracing::info;

/// One scripted step and what the session looked like afterwards.
#[derive(Debug, Serialize)]
pub struct DemoStep {
    /// What was done.
    pub action: String,
    /// Subscription state after the step.
    pub state: SubscriptionState,
    /// Collection size after the step.
    pub count: usize,
}

/// Final demo report.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    /// The signed-in principal.
    pub principal: Principal,
    /// Status indicator label.
    pub status: &'static str,
    /// Steps in order.
    pub steps: Vec<DemoStep>,
    /// Final collection, newest first.
    pub bookmarks: Vec<Bookmark>,
    /// Session counters.
    pub stats: SyncStats,
}

/// Runs the demo command.
pub fn run(owner: &str, retry_secs: u64, format: &str) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(script(owner, retry_secs))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }
    Ok(())
}

async fn script(owner: &str, retry_secs: u64) -> Result<DemoReport, Box<dyn Error>> {
    let principal = Principal::new(owner).with_email(format!("{}@example.com", owner));
    let backend = MemoryBackend::with_principal(principal.clone());
    backend.seed([
        Bookmark::new(
            "seed-1",
            "The Rust Book",
            "https://doc.rust-lang.org/book/",
            owner,
            parse_timestamp("2024-01-01T09:00:00Z")?,
        ),
        Bookmark::new(
            "seed-2",
            "Tokio tutorial",
            "https://tokio.rs/tokio/tutorial",
            owner,
            parse_timestamp("2024-02-01T09:00:00Z")?,
        ),
    ]);

    let retry_delay = Duration::from_secs(retry_secs);
    let config = SyncConfig::default().with_retry(RetryConfig::fixed(retry_delay));
    let session = SyncSession::start(backend.clone(), config).await?;
    let mut steps = Vec::new();

    wait_for_state(&session, SubscriptionState::Subscribed, Duration::from_secs(5)).await?;
    record(&mut steps, &session, "initial load and subscribe");

    let created = session.add_bookmark("docs.rs", "docs.rs").await?;
    wait_for_id(&session, &created.id).await?;
    record(&mut steps, &session, "add while live (applied from change event)");

    let other = Bookmark::new(
        "remote-1",
        "crates.io",
        "https://crates.io",
        owner,
        parse_timestamp("2024-03-01T09:00:00Z")?,
    );
    backend.remote_insert(other.clone());
    wait_for_id(&session, &other.id).await?;
    record(&mut steps, &session, "insert by another client");

    backend.push_status(SubscriptionState::ChannelError);
    wait_for_state(&session, SubscriptionState::ChannelError, Duration::from_secs(5)).await?;
    record(&mut steps, &session, "channel error");

    backend.remote_delete("seed-1");
    record(&mut steps, &session, "delete by another client (missed)");

    session.add_bookmark("This Week in Rust", "this-week-in-rust.org").await?;
    record(&mut steps, &session, "add during outage (re-fetched)");

    info!(retry_secs, "Waiting for reconnect");
    wait_for_state(
        &session,
        SubscriptionState::Subscribed,
        retry_delay + Duration::from_secs(5),
    )
    .await?;
    record(&mut steps, &session, "reconnected");

    let report = DemoReport {
        principal,
        status: session.status_badge().label(),
        steps,
        bookmarks: session.bookmarks(),
        stats: session.stats(),
    };
    session.teardown().await;
    Ok(report)
}

fn record(steps: &mut Vec<DemoStep>, session: &SyncSession<MemoryBackend>, action: &str) {
    info!(action, state = %session.state(), "Demo step");
    steps.push(DemoStep {
        action: action.to_string(),
        state: session.state(),
        count: session.bookmarks().len(),
    });
}

async fn wait_for_state(
    session: &SyncSession<MemoryBackend>,
    want: SubscriptionState,
    limit: Duration,
) -> Result<(), Box<dyn Error>> {
    let mut rx = session.subscribe_state();
    tokio::time::timeout(limit, rx.wait_for(|state| *state == want))
        .await
        .map_err(|_| format!("timed out waiting for {}", want))??;
    Ok(())
}

async fn wait_for_id(session: &SyncSession<MemoryBackend>, id: &str) -> Result<(), Box<dyn Error>> {
    let mut rx = session.subscribe_bookmarks();
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|items| items.iter().any(|b| b.id == id)),
    )
    .await
    .map_err(|_| format!("timed out waiting for bookmark {}", id))??;
    Ok(())
}

fn print_text(report: &DemoReport) {
    println!("marksync demo");
    println!("=============");
    println!();
    println!("Principal: {}", report.principal.id);
    if let Some(email) = &report.principal.email {
        println!("Email:     {}", email);
    }
    println!("Status:    {}", report.status);
    println!();

    println!("Steps:");
    for step in &report.steps {
        println!(
            "  {:<45} {:<14} {} bookmark(s)",
            step.action,
            step.state.as_wire(),
            step.count
        );
    }
    println!();

    println!("Bookmarks (newest first):");
    for b in &report.bookmarks {
        println!("  {}  {:<20} {}", b.created_at.format("%Y-%m-%d %H:%M"), b.title, b.url);
    }
    println!();

    let stats = &report.stats;
    println!("Stats:");
    println!("  Bulk loads:      {}", stats.bulk_loads);
    println!("  Re-fetches:      {}", stats.refetches);
    println!("  Reconnects:      {}", stats.reconnects);
    println!("  Events applied:  {}", stats.events_applied);
    println!("  Events dropped:  {}", stats.events_dropped);
    println!("  Events rejected: {}", stats.events_rejected);
}

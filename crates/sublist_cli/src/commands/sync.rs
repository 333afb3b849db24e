//! Sync commands against a fixture remote.
//!
//! The fixture is a JSON array of remote records, loaded into a
//! `MemoryRemoteStore` for the duration of the command.

use super::StoreTarget;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use sublist_sync_engine::{
    MemoryRemoteStore, NotificationRouter, RemoteClient, RouteOutcome, SyncConfig, SyncOutcome,
    SyncPipeline, SyncReport, SyncTrigger,
};
use sublist_sync_protocol::RemoteRecord;
use tracing::info;

/// Runs the sync command.
///
/// Ensures the subscription, publishes pending events, then refreshes.
pub async fn refresh(
    target: &StoreTarget,
    fixture: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(target, fixture)?;

    let handle = pipeline.ensure_subscription().await?;
    info!(subscription = %handle.id, "subscription ensured");

    let published = pipeline.publish_pending().await?;
    if published > 0 {
        println!("Published {published} pending event(s)");
    }

    let outcome = pipeline.trigger_with_retry(SyncTrigger::Refresh).await?;
    print_outcome(&outcome);
    Ok(())
}

/// Runs the notify command.
pub async fn notify(
    target: &StoreTarget,
    fixture: &Path,
    payload: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(target, fixture)?;
    let router = NotificationRouter::new(pipeline);

    let bytes = fs::read(payload)?;
    match router.route_slice(&bytes).await? {
        RouteOutcome::Dropped(reason) => println!("Ignored payload: {reason}"),
        RouteOutcome::Synced(outcome) => print_outcome(&outcome),
        RouteOutcome::Deleted { removed: true } => println!("Deleted 1 event"),
        RouteOutcome::Deleted { removed: false } => println!("No local event to delete"),
    }
    Ok(())
}

fn build_pipeline(
    target: &StoreTarget,
    fixture: &Path,
) -> Result<Arc<SyncPipeline<MemoryRemoteStore>>, Box<dyn std::error::Error>> {
    let records = load_fixture(fixture)?;
    info!(records = records.len(), fixture = %fixture.display(), "loaded fixture remote");

    let remote = Arc::new(MemoryRemoteStore::with_records(records));
    let client = target.with_subscriptions(RemoteClient::new(remote, SyncConfig::default()));
    let store = Arc::new(target.open());
    Ok(Arc::new(SyncPipeline::new(store, client)))
}

fn load_fixture(path: &Path) -> Result<Vec<RemoteRecord>, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Cannot read fixture {}: {e}", path.display()))?;
    let records = serde_json::from_str(&text)
        .map_err(|e| format!("Invalid fixture {}: {e}", path.display()))?;
    Ok(records)
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(report) => print_report(report),
        SyncOutcome::Coalesced => println!("A sync was already running"),
    }
}

fn print_report(report: &SyncReport) {
    println!(
        "Fetched {}, merged {}, already present {}, dropped {} in {:?}",
        report.fetched, report.merged, report.skipped_existing, report.dropped, report.duration
    );
    if !report.complete {
        println!("Fetch budget exhausted; some records were not downloaded");
    }
}

//! CLI command implementations.

pub mod events;
pub mod sync;

use std::path::{Path, PathBuf};
use sublist_store::{Event, LocalStore};
use sublist_sync_engine::{
    FileSubscriptionStore, MemorySubscriptionStore, RemoteClient, RemoteStore,
};
use tracing::warn;

/// Where the commands keep their events.
pub enum StoreTarget {
    /// A journal file on disk.
    Journal(PathBuf),
    /// A store that lives for one command.
    Ephemeral,
}

impl StoreTarget {
    /// Resolves the global `--path` / `--ephemeral` flags.
    pub fn from_flags(
        path: Option<PathBuf>,
        ephemeral: bool,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        match (path, ephemeral) {
            (_, true) => Ok(Self::Ephemeral),
            (Some(path), false) => Ok(Self::Journal(path)),
            (None, false) => Err("journal path required (or pass --ephemeral)".into()),
        }
    }

    /// Opens the store, falling back to memory if the journal is unusable.
    pub fn open(&self) -> LocalStore {
        match self {
            Self::Journal(path) => {
                let store = LocalStore::open(path);
                if store.is_degraded() {
                    warn!(path = %path.display(), "changes will not outlive this command");
                }
                store
            }
            Self::Ephemeral => LocalStore::in_memory(),
        }
    }

    /// Gives `client` subscription handle storage kept next to the journal.
    pub fn with_subscriptions<R: RemoteStore>(&self, client: RemoteClient<R>) -> RemoteClient<R> {
        match self {
            Self::Journal(path) => {
                client.with_subscription_store(FileSubscriptionStore::new(subscription_path(path)))
            }
            Self::Ephemeral => client.with_subscription_store(MemorySubscriptionStore::new()),
        }
    }
}

fn subscription_path(journal: &Path) -> PathBuf {
    let mut name = journal
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".subscription.json");
    journal.with_file_name(name)
}

/// Renders one event as a single text line.
pub fn format_event(event: &Event) -> String {
    let when = event
        .fields
        .occurs_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let title = event.fields.title.as_deref().unwrap_or("(untitled)");
    let remote = event
        .remote_id
        .as_ref()
        .map(|r| r.as_str())
        .unwrap_or("pending");
    let mut line = format!("{}  {}  {}  [{}]", event.id, when, title, remote);
    if let Some(location) = event.fields.location {
        line.push_str(&format!(
            "  @{:.5},{:.5}",
            location.latitude, location.longitude
        ));
    }
    line
}

/// Prints events as text lines or a JSON array.
pub fn print_events(events: &[Event], format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(events)?),
        "text" => {
            if events.is_empty() {
                println!("No events.");
            }
            for event in events {
                println!("{}", format_event(event));
            }
        }
        other => return Err(format!("Unknown output format: {other}").into()),
    }
    Ok(())
}

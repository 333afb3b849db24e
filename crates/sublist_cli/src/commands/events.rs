//! Local event commands.

use super::{print_events, StoreTarget};
use chrono::{DateTime, Utc};
use sublist_store::{EventFields, EventId, Location};

/// Runs the list command.
pub fn list(
    target: &StoreTarget,
    limit: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = target.open();
    print_events(&store.query(limit), format)
}

/// Runs the add command.
///
/// The event is stored locally as pending; `sync` publishes it.
pub fn add(
    target: &StoreTarget,
    title: String,
    at: Option<&str>,
    location: Option<(f64, f64)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let occurs_at = match at {
        Some(text) => parse_time(text)?,
        None => Utc::now(),
    };
    let mut fields = EventFields::titled(title).at(occurs_at);
    if let Some((latitude, longitude)) = location {
        fields = fields.located(Location::new(latitude, longitude));
    }

    let store = target.open();
    let id = store.insert(fields, None)?;
    println!("Added {id} (pending)");
    Ok(())
}

/// Runs the delete command.
pub fn delete(target: &StoreTarget, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = EventId::parse(id).ok_or_else(|| format!("Not an event id: {id}"))?;
    let store = target.open();
    if store.delete(id)? {
        println!("Deleted {id}");
    } else {
        println!("No event {id}");
    }
    Ok(())
}

/// Runs the pending command.
pub fn pending(target: &StoreTarget, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = target.open();
    print_events(&store.pending(), format)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    let parsed = DateTime::parse_from_rfc3339(text)
        .map_err(|e| format!("Invalid timestamp {text:?}: {e}"))?;
    Ok(parsed.with_timezone(&Utc))
}

use std::env;
use std::sync::Arc;

use crate::engine::{FileSnapshotter, Roster, Snapshotter};
use crate::sdk::Client;
use crate::{Result, RosterOps};

/// Initializes a [`RosterOps`] implementation based on the environment.
///
/// `new` automatically detects whether to connect to a remote server or
/// initialize a local embedded store:
///
/// 1. If the `ROSTER_ADDR` environment variable is set, it attempts to
///    connect to that address in **Remote Mode**.
/// 2. Otherwise, it initializes an embedded [`Roster`] backed by a
///    [`FileSnapshotter`] at `data_file` in **Embedded Mode**.
///
/// # Examples
///
/// ```no_run
/// use roster_store::sdk;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let store = sdk::new("data/roster.json").await?;
///     let people = store.list().await?;
///     println!("{} records", people.len());
///     Ok(())
/// }
/// ```
pub async fn new(data_file: &str) -> Result<Arc<dyn RosterOps>> {
    if let Ok(addr) = env::var("ROSTER_ADDR") {
        if !addr.is_empty() {
            if let Ok(client) = Client::connect(&addr).await {
                return Ok(Arc::new(client));
            }
            log::warn!("could not reach {addr}, falling back to embedded mode");
        }
    }

    let snapshotter = Arc::new(FileSnapshotter::new(data_file)?);
    let initial = snapshotter.load()?;
    let roster = Roster::new(initial, Some(snapshotter));
    Ok(Arc::new(roster))
}

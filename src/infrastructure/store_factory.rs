// Store factory - builds the structured store for a backend selection
use crate::application::structured_store::StructuredStore;
use crate::infrastructure::config::{Settings, StorageSelection, StoreKind};
use crate::infrastructure::dual_store::DualStore;
use crate::infrastructure::influx_store::InfluxStore;
use crate::infrastructure::sqlite_store::SqliteStore;
use std::sync::Arc;

pub fn open_store(
    selection: &StorageSelection,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn StructuredStore>> {
    let store: Arc<dyn StructuredStore> = match selection.backend {
        StoreKind::Primary => Arc::new(SqliteStore::open(&settings.resolve(&selection.sqlite.path))?),
        StoreKind::Secondary => Arc::new(InfluxStore::new(&selection.influx)?),
        StoreKind::Dual => {
            let primary = Arc::new(SqliteStore::open(&settings.resolve(&selection.sqlite.path))?);
            let secondary = Arc::new(InfluxStore::new(&selection.influx)?);
            Arc::new(DualStore::new(primary, secondary, selection.read_from))
        }
    };

    tracing::info!(backend = ?selection.backend, read_from = ?selection.read_from, "Structured store ready");
    Ok(store)
}

//! SQLite realization of the storage port.
//!
//! Each logical table is one physical table holding the JSON document plus
//! extracted columns for its declared indices. Reads borrow pooled
//! connections; every mutation goes through the write actor, so a `put_all`
//! batch commits or rolls back as one transaction.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, warn};
use serde_json::Value;

use fieldbook_core::storage::{
    check_filter, record_str, BackendKind, IndexField, RecordFilter, RecordWrite, StorageBackend,
    StoreTable,
};
use fieldbook_core::StorageError;

use crate::db::{
    create_pool, get_connection, init, run_migrations, spawn_writer, DbPool, WriteHandle,
};
use crate::errors::DriverError;
use crate::models::{AppStateRowDB, EvidenceRowDB, InspectionRowDB, PropertyRowDB, QueueItemRowDB};
use crate::schema::{app_state, evidence, inspections, properties, sync_queue};

pub struct SqliteBackend {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteBackend {
    /// Open (creating if needed) the database under `app_data_dir`, run
    /// pending migrations, and start the write actor.
    pub fn open(app_data_dir: &str) -> Result<Self, StorageError> {
        let db_path = init(app_data_dir)?;
        run_migrations(&db_path)?;
        let pool = create_pool(&db_path)?;
        let writer = spawn_writer(pool.as_ref().clone());
        debug!("SQLite store ready at {}", db_path);
        Ok(Self { pool, writer })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn put_all(&self, writes: Vec<RecordWrite>) -> Result<(), StorageError> {
        if writes.is_empty() {
            return Ok(());
        }
        self.writer
            .exec(move |conn| {
                for write in &writes {
                    apply_write(conn, write).map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await
    }

    async fn get(&self, table: StoreTable, id: &str) -> Result<Option<Value>, StorageError> {
        let mut conn = get_connection(&self.pool)?;
        let raw = get_record(&mut conn, table, id).map_err(StorageError::from)?;
        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    async fn query(
        &self,
        table: StoreTable,
        filter: RecordFilter,
    ) -> Result<Vec<Value>, StorageError> {
        check_filter(table, &filter)?;
        let mut conn = get_connection(&self.pool)?;
        let raws = load_records(&mut conn, table, &filter).map_err(StorageError::from)?;
        let records = raws
            .iter()
            .map(|raw| serde_json::from_str(raw))
            .collect::<Result<Vec<Value>, _>>()?;
        Ok(records)
    }

    async fn count(&self, table: StoreTable, filter: RecordFilter) -> Result<i64, StorageError> {
        check_filter(table, &filter)?;
        let mut conn = get_connection(&self.pool)?;
        Ok(count_records(&mut conn, table, &filter)?)
    }

    async fn remove(&self, table: StoreTable, id: &str) -> Result<(), StorageError> {
        let id = id.to_string();
        self.writer
            .exec(move |conn| delete_record(conn, table, &id).map_err(StorageError::from))
            .await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let mut conn = get_connection(&self.pool)?;
        if let Err(err) = diesel::sql_query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&mut conn) {
            warn!("WAL checkpoint on close failed: {}", err);
        }
        Ok(())
    }
}

fn index_value(record: &Value, field: IndexField) -> Option<String> {
    record_str(record, field.record_key()).map(str::to_string)
}

fn unsupported(table: StoreTable, field: IndexField) -> DriverError {
    DriverError::Storage(StorageError::backend(format!(
        "index {} is not declared on table {}",
        field.record_key(),
        table
    )))
}

fn apply_write(conn: &mut SqliteConnection, write: &RecordWrite) -> Result<(), DriverError> {
    let record = serde_json::to_string(&write.record)?;
    match write.table {
        StoreTable::Properties => {
            let row = PropertyRowDB {
                id: write.id.clone(),
                record,
                sync_status: index_value(&write.record, IndexField::SyncStatus),
            };
            diesel::insert_into(properties::table)
                .values(&row)
                .on_conflict(properties::id)
                .do_update()
                .set((
                    properties::record.eq(row.record.clone()),
                    properties::sync_status.eq(row.sync_status.clone()),
                ))
                .execute(conn)?;
        }
        StoreTable::Inspections => {
            let row = InspectionRowDB {
                id: write.id.clone(),
                record,
                sync_status: index_value(&write.record, IndexField::SyncStatus),
                property_id: index_value(&write.record, IndexField::PropertyId),
            };
            diesel::insert_into(inspections::table)
                .values(&row)
                .on_conflict(inspections::id)
                .do_update()
                .set((
                    inspections::record.eq(row.record.clone()),
                    inspections::sync_status.eq(row.sync_status.clone()),
                    inspections::property_id.eq(row.property_id.clone()),
                ))
                .execute(conn)?;
        }
        StoreTable::Evidence => {
            let row = EvidenceRowDB {
                id: write.id.clone(),
                record,
                sync_status: index_value(&write.record, IndexField::SyncStatus),
                inspection_id: index_value(&write.record, IndexField::InspectionId),
            };
            diesel::insert_into(evidence::table)
                .values(&row)
                .on_conflict(evidence::id)
                .do_update()
                .set((
                    evidence::record.eq(row.record.clone()),
                    evidence::sync_status.eq(row.sync_status.clone()),
                    evidence::inspection_id.eq(row.inspection_id.clone()),
                ))
                .execute(conn)?;
        }
        StoreTable::SyncQueue => {
            let row = QueueItemRowDB {
                id: write.id.clone(),
                record,
                status: index_value(&write.record, IndexField::QueueStatus),
            };
            diesel::insert_into(sync_queue::table)
                .values(&row)
                .on_conflict(sync_queue::id)
                .do_update()
                .set((
                    sync_queue::record.eq(row.record.clone()),
                    sync_queue::status.eq(row.status.clone()),
                ))
                .execute(conn)?;
        }
        StoreTable::AppState => {
            let row = AppStateRowDB {
                id: write.id.clone(),
                record,
            };
            diesel::insert_into(app_state::table)
                .values(&row)
                .on_conflict(app_state::id)
                .do_update()
                .set(app_state::record.eq(row.record.clone()))
                .execute(conn)?;
        }
    }
    Ok(())
}

fn get_record(
    conn: &mut SqliteConnection,
    table: StoreTable,
    id: &str,
) -> Result<Option<String>, DriverError> {
    let raw = match table {
        StoreTable::Properties => properties::table
            .find(id)
            .select(properties::record)
            .first::<String>(conn)
            .optional()?,
        StoreTable::Inspections => inspections::table
            .find(id)
            .select(inspections::record)
            .first::<String>(conn)
            .optional()?,
        StoreTable::Evidence => evidence::table
            .find(id)
            .select(evidence::record)
            .first::<String>(conn)
            .optional()?,
        StoreTable::SyncQueue => sync_queue::table
            .find(id)
            .select(sync_queue::record)
            .first::<String>(conn)
            .optional()?,
        StoreTable::AppState => app_state::table
            .find(id)
            .select(app_state::record)
            .first::<String>(conn)
            .optional()?,
    };
    Ok(raw)
}

fn load_records(
    conn: &mut SqliteConnection,
    table: StoreTable,
    filter: &RecordFilter,
) -> Result<Vec<String>, DriverError> {
    let raws = match table {
        StoreTable::Properties => match filter {
            RecordFilter::All => properties::table
                .order(properties::id.asc())
                .select(properties::record)
                .load::<String>(conn)?,
            RecordFilter::Index {
                field: IndexField::SyncStatus,
                value,
            } => properties::table
                .filter(properties::sync_status.eq(value))
                .order(properties::id.asc())
                .select(properties::record)
                .load::<String>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
        StoreTable::Inspections => match filter {
            RecordFilter::All => inspections::table
                .order(inspections::id.asc())
                .select(inspections::record)
                .load::<String>(conn)?,
            RecordFilter::Index {
                field: IndexField::SyncStatus,
                value,
            } => inspections::table
                .filter(inspections::sync_status.eq(value))
                .order(inspections::id.asc())
                .select(inspections::record)
                .load::<String>(conn)?,
            RecordFilter::Index {
                field: IndexField::PropertyId,
                value,
            } => inspections::table
                .filter(inspections::property_id.eq(value))
                .order(inspections::id.asc())
                .select(inspections::record)
                .load::<String>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
        StoreTable::Evidence => match filter {
            RecordFilter::All => evidence::table
                .order(evidence::id.asc())
                .select(evidence::record)
                .load::<String>(conn)?,
            RecordFilter::Index {
                field: IndexField::SyncStatus,
                value,
            } => evidence::table
                .filter(evidence::sync_status.eq(value))
                .order(evidence::id.asc())
                .select(evidence::record)
                .load::<String>(conn)?,
            RecordFilter::Index {
                field: IndexField::InspectionId,
                value,
            } => evidence::table
                .filter(evidence::inspection_id.eq(value))
                .order(evidence::id.asc())
                .select(evidence::record)
                .load::<String>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
        StoreTable::SyncQueue => match filter {
            RecordFilter::All => sync_queue::table
                .order(sync_queue::id.asc())
                .select(sync_queue::record)
                .load::<String>(conn)?,
            RecordFilter::Index {
                field: IndexField::QueueStatus,
                value,
            } => sync_queue::table
                .filter(sync_queue::status.eq(value))
                .order(sync_queue::id.asc())
                .select(sync_queue::record)
                .load::<String>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
        StoreTable::AppState => match filter {
            RecordFilter::All => app_state::table
                .order(app_state::id.asc())
                .select(app_state::record)
                .load::<String>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
    };
    Ok(raws)
}

fn count_records(
    conn: &mut SqliteConnection,
    table: StoreTable,
    filter: &RecordFilter,
) -> Result<i64, DriverError> {
    let n = match table {
        StoreTable::Properties => match filter {
            RecordFilter::All => properties::table.select(count_star()).first::<i64>(conn)?,
            RecordFilter::Index {
                field: IndexField::SyncStatus,
                value,
            } => properties::table
                .filter(properties::sync_status.eq(value))
                .select(count_star())
                .first::<i64>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
        StoreTable::Inspections => match filter {
            RecordFilter::All => inspections::table.select(count_star()).first::<i64>(conn)?,
            RecordFilter::Index {
                field: IndexField::SyncStatus,
                value,
            } => inspections::table
                .filter(inspections::sync_status.eq(value))
                .select(count_star())
                .first::<i64>(conn)?,
            RecordFilter::Index {
                field: IndexField::PropertyId,
                value,
            } => inspections::table
                .filter(inspections::property_id.eq(value))
                .select(count_star())
                .first::<i64>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
        StoreTable::Evidence => match filter {
            RecordFilter::All => evidence::table.select(count_star()).first::<i64>(conn)?,
            RecordFilter::Index {
                field: IndexField::SyncStatus,
                value,
            } => evidence::table
                .filter(evidence::sync_status.eq(value))
                .select(count_star())
                .first::<i64>(conn)?,
            RecordFilter::Index {
                field: IndexField::InspectionId,
                value,
            } => evidence::table
                .filter(evidence::inspection_id.eq(value))
                .select(count_star())
                .first::<i64>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
        StoreTable::SyncQueue => match filter {
            RecordFilter::All => sync_queue::table.select(count_star()).first::<i64>(conn)?,
            RecordFilter::Index {
                field: IndexField::QueueStatus,
                value,
            } => sync_queue::table
                .filter(sync_queue::status.eq(value))
                .select(count_star())
                .first::<i64>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
        StoreTable::AppState => match filter {
            RecordFilter::All => app_state::table.select(count_star()).first::<i64>(conn)?,
            RecordFilter::Index { field, .. } => return Err(unsupported(table, *field)),
        },
    };
    Ok(n)
}

fn delete_record(
    conn: &mut SqliteConnection,
    table: StoreTable,
    id: &str,
) -> Result<(), DriverError> {
    match table {
        StoreTable::Properties => {
            diesel::delete(properties::table.find(id)).execute(conn)?;
        }
        StoreTable::Inspections => {
            diesel::delete(inspections::table.find(id)).execute(conn)?;
        }
        StoreTable::Evidence => {
            diesel::delete(evidence::table.find(id)).execute(conn)?;
        }
        StoreTable::SyncQueue => {
            diesel::delete(sync_queue::table.find(id)).execute(conn)?;
        }
        StoreTable::AppState => {
            diesel::delete(app_state::table.find(id)).execute(conn)?;
        }
    }
    Ok(())
}

//! Insertable row types. `record` is the serialized JSON document; the other
//! columns are projections of its indexed fields, written alongside it.

use diesel::prelude::*;

use crate::schema::{app_state, evidence, inspections, properties, sync_queue};

#[derive(Debug, Insertable)]
#[diesel(table_name = properties)]
pub struct PropertyRowDB {
    pub id: String,
    pub record: String,
    pub sync_status: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = inspections)]
pub struct InspectionRowDB {
    pub id: String,
    pub record: String,
    pub sync_status: Option<String>,
    pub property_id: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = evidence)]
pub struct EvidenceRowDB {
    pub id: String,
    pub record: String,
    pub sync_status: Option<String>,
    pub inspection_id: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sync_queue)]
pub struct QueueItemRowDB {
    pub id: String,
    pub record: String,
    pub status: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = app_state)]
pub struct AppStateRowDB {
    pub id: String,
    pub record: String,
}

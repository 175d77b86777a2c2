use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use diesel::dsl::max;
use diesel::pg::upsert::excluded;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use super::normalize::CustomerRow;
use crate::choices::DEFAULT_VALVE_STATE;
use crate::models::{Assignment, Customer, NewAssignment, NewCustomer};
use crate::schema::{assignments, customers, projects};

/// Creates the customer or overwrites its name and room number. Repeating the
/// same call leaves the row unchanged.
pub fn reconcile_customer(
    conn: &mut PgConnection,
    usage_no: &str,
    name: &str,
    room_number: &str,
) -> QueryResult<Customer> {
    let new_customer = NewCustomer {
        id: Uuid::new_v4(),
        usage_no: usage_no.to_string(),
        name: name.to_string(),
        room_number: room_number.to_string(),
    };

    diesel::insert_into(customers::table)
        .values(&new_customer)
        .on_conflict(customers::usage_no)
        .do_update()
        .set((
            customers::name.eq(excluded(customers::name)),
            customers::room_number.eq(excluded(customers::room_number)),
        ))
        .get_result(conn)
}

/// Import-sourced assignment fields.
#[derive(Debug, Clone, Copy)]
pub struct MeterFields<'a> {
    pub meter_type: &'a str,
    pub meter_number: &'a str,
    pub block_number: &'a str,
    pub building_number: &'a str,
}

#[derive(Debug, Clone)]
pub enum Allocation {
    Created(Assignment),
    Updated(Assignment),
}

impl Allocation {
    pub fn assignment(&self) -> &Assignment {
        match self {
            Allocation::Created(assignment) | Allocation::Updated(assignment) => assignment,
        }
    }
}

/// Takes the project row lock that serializes sequence allocation. The lock is
/// held until the enclosing transaction ends; taking it again is a no-op.
pub fn lock_project(conn: &mut PgConnection, project_id: Uuid) -> QueryResult<()> {
    projects::table
        .find(project_id)
        .select(projects::id)
        .for_update()
        .first::<Uuid>(conn)?;
    Ok(())
}

/// Links a customer to a project. An existing link only gets its meter fields
/// refreshed; a new one takes the next sequence number in the project.
///
/// The project row is locked for the rest of the enclosing transaction so that
/// concurrent allocations in one project never compute the same sequence.
pub fn allocate_assignment(
    conn: &mut PgConnection,
    project_id: Uuid,
    customer_id: Uuid,
    meter: MeterFields<'_>,
) -> QueryResult<Allocation> {
    conn.transaction(|conn| {
        lock_project(conn, project_id)?;

        let existing = assignments::table
            .filter(assignments::project_id.eq(project_id))
            .filter(assignments::customer_id.eq(customer_id))
            .first::<Assignment>(conn)
            .optional()?;

        if let Some(existing) = existing {
            let updated = diesel::update(assignments::table.find(existing.id))
                .set((
                    assignments::meter_type.eq(meter.meter_type),
                    assignments::meter_number.eq(meter.meter_number),
                    assignments::updated_at.eq(Utc::now().naive_utc()),
                ))
                .get_result(conn)?;
            return Ok(Allocation::Updated(updated));
        }

        let current_max: Option<i32> = assignments::table
            .filter(assignments::project_id.eq(project_id))
            .select(max(assignments::sequence))
            .first(conn)?;

        let new_assignment = NewAssignment {
            id: Uuid::new_v4(),
            project_id,
            customer_id,
            sequence: current_max.unwrap_or(0) + 1,
            block_number: meter.block_number.to_string(),
            building_number: meter.building_number.to_string(),
            meter_type: meter.meter_type.to_string(),
            meter_number: meter.meter_number.to_string(),
            m_valve_state: DEFAULT_VALVE_STATE.as_str().to_string(),
        };

        let created = diesel::insert_into(assignments::table)
            .values(&new_assignment)
            .get_result(conn)?;
        Ok(Allocation::Created(created))
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub customers: usize,
    pub assignments_created: usize,
    pub assignments_updated: usize,
}

/// Applies staged customer rows to a project as one transaction.
///
/// Lock order is fixed: the project row first, then customers in ascending
/// usage number. Assignments are then allocated in row order, so sequence
/// numbers follow the sheet. When a usage number repeats, its last row wins.
pub fn import_customer_rows<'a, I>(
    conn: &mut PgConnection,
    project_id: Uuid,
    rows: I,
) -> QueryResult<ImportSummary>
where
    I: IntoIterator<Item = &'a CustomerRow>,
{
    let rows: Vec<&CustomerRow> = rows.into_iter().collect();

    conn.transaction(|conn| {
        lock_project(conn, project_id)?;

        let mut by_usage_no: BTreeMap<&str, &CustomerRow> = BTreeMap::new();
        for row in &rows {
            by_usage_no.insert(row.usage_no.as_str(), *row);
        }
        let mut customer_ids: HashMap<&str, Uuid> = HashMap::with_capacity(by_usage_no.len());
        for (usage_no, row) in &by_usage_no {
            let customer =
                reconcile_customer(conn, usage_no, &row.stored_name(), &row.room_number)?;
            customer_ids.insert(*usage_no, customer.id);
        }

        let mut summary = ImportSummary {
            customers: customer_ids.len(),
            ..ImportSummary::default()
        };
        for row in &rows {
            let Some(customer_id) = customer_ids.get(row.usage_no.as_str()) else {
                continue;
            };
            let meter = MeterFields {
                meter_type: &row.meter_type,
                meter_number: &row.meter_number,
                block_number: &row.block_number,
                building_number: &row.building_number,
            };
            match allocate_assignment(conn, project_id, *customer_id, meter)? {
                Allocation::Created(_) => summary.assignments_created += 1,
                Allocation::Updated(_) => summary.assignments_updated += 1,
            }
        }
        Ok(summary)
    })
}

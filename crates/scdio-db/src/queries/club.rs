use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

use scdio_types::models::{Budget, BudgetType, Equipment, Event, Task};
use scdio_types::time;

use crate::Database;
use crate::models::parsed_column;
use crate::queries::{SCOPE_CLAUSE, Scope};

// -- Tasks --

const TASK_SELECT: &str = "SELECT t.id, t.server_id, t.title, t.description, t.status, t.priority,
        t.status = 'done', t.assignee_id, a.username, t.user_id, c.username, t.due_date,
        t.created_at, t.updated_at
     FROM tasks t
     LEFT JOIN users a ON a.id = t.assignee_id
     LEFT JOIN users c ON c.id = t.user_id";

#[derive(Debug, Default, Clone, Copy)]
pub struct TaskFilter {
    /// Matches tasks assigned to or created by this user.
    pub user_id: Option<i64>,
    pub scope: Scope,
}

pub struct NewTask<'a> {
    pub server_id: Option<i64>,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub status: Option<&'a str>,
    pub priority: Option<&'a str>,
    /// Defaults to the creator.
    pub assignee_id: Option<i64>,
    pub user_id: i64,
    pub due_date: Option<&'a str>,
}

#[derive(Debug, Default)]
pub struct TaskChanges<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub status: Option<&'a str>,
    pub priority: Option<&'a str>,
    pub assignee_id: Option<i64>,
    pub due_date: Option<&'a str>,
    /// `true` forces status `done`; `false` reopens a done task as `todo`.
    pub completed: Option<bool>,
}

// -- Events --

const EVENT_SELECT: &str = "SELECT e.id, e.server_id, e.name, e.description, e.start_time, e.end_time,
        e.location, e.max_participants, e.organizer_id, u.username, e.created_at, e.updated_at
     FROM events e
     LEFT JOIN users u ON u.id = e.organizer_id";

#[derive(Debug, Default)]
pub struct NewEvent<'a> {
    pub server_id: Option<i64>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub start_time: &'a str,
    pub end_time: Option<&'a str>,
    pub location: Option<&'a str>,
    pub max_participants: Option<i64>,
}

// -- Budgets --

const BUDGET_SELECT: &str = "SELECT b.id, b.server_id, b.name, b.description, b.amount, b.type,
        b.category, b.date, b.approved_by, u.username, b.created_at, b.updated_at
     FROM budgets b
     LEFT JOIN users u ON u.id = b.approved_by";

#[derive(Debug)]
pub struct NewBudget<'a> {
    pub server_id: Option<i64>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub amount: i64,
    pub budget_type: BudgetType,
    /// Defaults to `general`.
    pub category: Option<&'a str>,
    /// `YYYY-MM-DD`; defaults to today.
    pub date: Option<&'a str>,
}

// -- Equipment --

const EQUIPMENT_SELECT: &str = "SELECT q.id, q.server_id, q.name, q.description, q.quantity, q.location,
        q.condition, q.responsible_user_id, u.username, q.created_at, q.updated_at
     FROM equipments q
     LEFT JOIN users u ON u.id = q.responsible_user_id";

#[derive(Debug, Default)]
pub struct NewEquipment<'a> {
    pub server_id: Option<i64>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub quantity: Option<i64>,
    pub location: Option<&'a str>,
    pub condition: Option<&'a str>,
}

impl Database {
    // -- Tasks --

    pub fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{TASK_SELECT}
                 WHERE {SCOPE_CLAUSE}
                   AND (?3 IS NULL OR t.assignee_id = ?3 OR t.user_id = ?3)
                 ORDER BY t.created_at DESC, t.id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![filter.scope.server_id(), filter.scope.viewer(), filter.user_id], task_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn create_task(&self, task: &NewTask<'_>) -> Result<Task> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (server_id, title, description, status, priority, assignee_id, user_id, due_date)
                 VALUES (?1, ?2, ?3, COALESCE(?4, 'todo'), COALESCE(?5, 'medium'), COALESCE(?6, ?7), ?7, ?8)",
                params![
                    task.server_id,
                    task.title,
                    task.description,
                    task.status,
                    task.priority,
                    task.assignee_id,
                    task.user_id,
                    task.due_date
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_task(conn, id)?.ok_or_else(|| anyhow::anyhow!("task {} vanished after insert", id))
        })
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| query_task(conn, id))
    }

    pub fn update_task(&self, id: i64, changes: &TaskChanges<'_>) -> Result<Option<Task>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET
                    title       = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    status      = CASE
                                    WHEN ?8 IS NULL THEN COALESCE(?4, status)
                                    WHEN ?8 THEN 'done'
                                    WHEN COALESCE(?4, status) = 'done' THEN 'todo'
                                    ELSE COALESCE(?4, status)
                                  END,
                    priority    = COALESCE(?5, priority),
                    assignee_id = COALESCE(?6, assignee_id),
                    due_date    = COALESCE(?7, due_date),
                    updated_at  = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![
                    id,
                    changes.title,
                    changes.description,
                    changes.status,
                    changes.priority,
                    changes.assignee_id,
                    changes.due_date,
                    changes.completed
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_task(conn, id)
        })
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM tasks WHERE id = ?1", [id])? > 0))
    }

    // -- Events --

    /// Soonest first.
    pub fn list_events(&self, scope: Scope) -> Result<Vec<Event>> {
        self.with_conn(|conn| {
            let sql = format!("{EVENT_SELECT} WHERE {SCOPE_CLAUSE} ORDER BY e.start_time, e.id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([scope.server_id(), scope.viewer()], event_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn create_event(&self, organizer_id: i64, event: &NewEvent<'_>) -> Result<Event> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (server_id, name, description, start_time, end_time, location, max_participants, organizer_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.server_id,
                    event.name,
                    event.description,
                    event.start_time,
                    event.end_time,
                    event.location,
                    event.max_participants,
                    organizer_id
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_event(conn, id)?.ok_or_else(|| anyhow::anyhow!("event {} vanished after insert", id))
        })
    }

    pub fn get_event(&self, id: i64) -> Result<Option<Event>> {
        self.with_conn(|conn| query_event(conn, id))
    }

    /// Replaces the editable fields; `server_id` and organizer stay as they were.
    pub fn update_event(&self, id: i64, event: &NewEvent<'_>) -> Result<Option<Event>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE events SET
                    name = ?2, description = ?3, start_time = ?4, end_time = ?5,
                    location = ?6, max_participants = ?7,
                    updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![
                    id,
                    event.name,
                    event.description,
                    event.start_time,
                    event.end_time,
                    event.location,
                    event.max_participants
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_event(conn, id)
        })
    }

    pub fn delete_event(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM events WHERE id = ?1", [id])? > 0))
    }

    // -- Budgets --

    /// Most recent entry first.
    pub fn list_budgets(&self, scope: Scope) -> Result<Vec<Budget>> {
        self.with_conn(|conn| {
            let sql = format!("{BUDGET_SELECT} WHERE {SCOPE_CLAUSE} ORDER BY b.date DESC, b.id DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([scope.server_id(), scope.viewer()], budget_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn create_budget(&self, approved_by: i64, budget: &NewBudget<'_>) -> Result<Budget> {
        let date = budget.date.map(str::to_string).unwrap_or_else(time::today);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO budgets (server_id, name, description, amount, type, category, date, approved_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, 'general'), ?7, ?8)",
                params![
                    budget.server_id,
                    budget.name,
                    budget.description,
                    budget.amount,
                    budget.budget_type.as_str(),
                    budget.category,
                    date,
                    approved_by
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_budget(conn, id)?.ok_or_else(|| anyhow::anyhow!("budget {} vanished after insert", id))
        })
    }

    pub fn get_budget(&self, id: i64) -> Result<Option<Budget>> {
        self.with_conn(|conn| query_budget(conn, id))
    }

    /// Replaces the editable fields; an omitted date keeps the stored one.
    pub fn update_budget(&self, id: i64, budget: &NewBudget<'_>) -> Result<Option<Budget>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE budgets SET
                    name = ?2, description = ?3, amount = ?4, type = ?5,
                    category = COALESCE(?6, 'general'), date = COALESCE(?7, date),
                    updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![
                    id,
                    budget.name,
                    budget.description,
                    budget.amount,
                    budget.budget_type.as_str(),
                    budget.category,
                    budget.date
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_budget(conn, id)
        })
    }

    pub fn delete_budget(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM budgets WHERE id = ?1", [id])? > 0))
    }

    // -- Equipment --

    pub fn list_equipment(&self, scope: Scope) -> Result<Vec<Equipment>> {
        self.with_conn(|conn| {
            let sql = format!("{EQUIPMENT_SELECT} WHERE {SCOPE_CLAUSE} ORDER BY q.name, q.id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([scope.server_id(), scope.viewer()], equipment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn create_equipment(&self, responsible_user_id: i64, item: &NewEquipment<'_>) -> Result<Equipment> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO equipments (server_id, name, description, quantity, location, condition, responsible_user_id)
                 VALUES (?1, ?2, ?3, COALESCE(?4, 1), ?5, COALESCE(?6, 'good'), ?7)",
                params![
                    item.server_id,
                    item.name,
                    item.description,
                    item.quantity,
                    item.location,
                    item.condition,
                    responsible_user_id
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_equipment(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("equipment {} vanished after insert", id))
        })
    }

    pub fn get_equipment(&self, id: i64) -> Result<Option<Equipment>> {
        self.with_conn(|conn| query_equipment(conn, id))
    }

    pub fn update_equipment(&self, id: i64, item: &NewEquipment<'_>) -> Result<Option<Equipment>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE equipments SET
                    name = ?2, description = ?3, quantity = COALESCE(?4, quantity),
                    location = ?5, condition = COALESCE(?6, condition),
                    updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1",
                params![
                    id,
                    item.name,
                    item.description,
                    item.quantity,
                    item.location,
                    item.condition
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_equipment(conn, id)
        })
    }

    pub fn delete_equipment(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM equipments WHERE id = ?1", [id])? > 0))
    }
}

fn query_task(conn: &Connection, id: i64) -> Result<Option<Task>> {
    let sql = format!("{TASK_SELECT} WHERE t.id = ?1");
    Ok(conn.query_row(&sql, [id], task_from_row).optional()?)
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        server_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        completed: row.get(6)?,
        assignee_id: row.get(7)?,
        assignee_name: row.get(8)?,
        user_id: row.get(9)?,
        creator_name: row.get(10)?,
        due_date: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn query_event(conn: &Connection, id: i64) -> Result<Option<Event>> {
    let sql = format!("{EVENT_SELECT} WHERE e.id = ?1");
    Ok(conn.query_row(&sql, [id], event_from_row).optional()?)
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        location: row.get(6)?,
        max_participants: row.get(7)?,
        organizer_id: row.get(8)?,
        organizer_name: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn query_budget(conn: &Connection, id: i64) -> Result<Option<Budget>> {
    let sql = format!("{BUDGET_SELECT} WHERE b.id = ?1");
    Ok(conn.query_row(&sql, [id], budget_from_row).optional()?)
}

fn budget_from_row(row: &Row<'_>) -> rusqlite::Result<Budget> {
    Ok(Budget {
        id: row.get(0)?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        amount: row.get(4)?,
        budget_type: parsed_column(row, 5, BudgetType::parse)?,
        category: row.get(6)?,
        date: row.get(7)?,
        approved_by: row.get(8)?,
        approved_by_name: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn query_equipment(conn: &Connection, id: i64) -> Result<Option<Equipment>> {
    let sql = format!("{EQUIPMENT_SELECT} WHERE q.id = ?1");
    Ok(conn.query_row(&sql, [id], equipment_from_row).optional()?)
}

fn equipment_from_row(row: &Row<'_>) -> rusqlite::Result<Equipment> {
    Ok(Equipment {
        id: row.get(0)?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        quantity: row.get(4)?,
        location: row.get(5)?,
        condition: row.get(6)?,
        responsible_user_id: row.get(7)?,
        responsible_user_name: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

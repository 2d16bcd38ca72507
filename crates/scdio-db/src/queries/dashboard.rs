use anyhow::Result;

use scdio_types::models::{Activity, ActivityUser, BudgetChartPoint, DashboardStats, TaskProgress};

use crate::Database;
use crate::queries::{SCOPE_CLAUSE, Scope};

const ACTIVITY_LIMIT: i64 = 10;
const ACTIVITY_PER_KIND: i64 = 3;

const STATUS_COLORS: [(&str, &str); 3] = [
    ("todo", "#FF6B6B"),
    ("in_progress", "#FFD60A"),
    ("done", "#06D6A0"),
];
const OTHER_STATUS_COLOR: &str = "#8B5CF6";

impl Database {
    /// Counters for the dashboard header. Without a server scope,
    /// `total_members` counts every registered user.
    pub fn dashboard_stats(&self, scope: Scope) -> Result<DashboardStats> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT
                    (SELECT COUNT(*) FROM tasks WHERE {SCOPE_CLAUSE}),
                    (SELECT COUNT(*) FROM tasks WHERE {SCOPE_CLAUSE} AND status = 'done'),
                    (SELECT COUNT(*) FROM events
                        WHERE {SCOPE_CLAUSE}
                          AND start_time > strftime('%Y-%m-%d %H:%M:%f', 'now')),
                    CASE WHEN ?1 IS NULL THEN (SELECT COUNT(*) FROM users)
                         ELSE (SELECT COUNT(*) FROM server_members WHERE server_id = ?1) END,
                    (SELECT COALESCE(SUM(amount), 0) FROM budgets
                        WHERE {SCOPE_CLAUSE} AND type = 'income'),
                    (SELECT COALESCE(SUM(amount), 0) FROM budgets
                        WHERE {SCOPE_CLAUSE} AND type = 'expense')"
            );
            let stats = conn.query_row(
                &sql,
                [scope.server_id(), scope.viewer()],
                |row| {
                    Ok(DashboardStats {
                        total_tasks: row.get(0)?,
                        completed_tasks: row.get(1)?,
                        upcoming_events: row.get(2)?,
                        total_members: row.get(3)?,
                        active_budget: row.get(4)?,
                        monthly_expenses: row.get(5)?,
                    })
                },
            )?;
            Ok(stats)
        })
    }

    /// The latest few tasks, events and wiki pages merged newest first.
    pub fn recent_activities(&self, scope: Scope) -> Result<Vec<Activity>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT a.kind, a.description, a.ts, a.user_id, u.username FROM (
                    SELECT * FROM (
                        SELECT 'task' AS kind, title AS description, created_at AS ts, user_id
                        FROM tasks WHERE {SCOPE_CLAUSE}
                        ORDER BY created_at DESC LIMIT ?3)
                    UNION ALL
                    SELECT * FROM (
                        SELECT 'event', name, created_at, organizer_id
                        FROM events WHERE {SCOPE_CLAUSE}
                        ORDER BY created_at DESC LIMIT ?3)
                    UNION ALL
                    SELECT * FROM (
                        SELECT 'wiki', title, created_at, author_id
                        FROM wiki_pages WHERE {SCOPE_CLAUSE}
                        ORDER BY created_at DESC LIMIT ?3)
                 ) a
                 LEFT JOIN users u ON u.id = a.user_id
                 ORDER BY a.ts DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![scope.server_id(), scope.viewer(), ACTIVITY_PER_KIND, ACTIVITY_LIMIT],
                    |row| {
                        let user_id: Option<i64> = row.get(3)?;
                        let username: Option<String> = row.get(4)?;
                        Ok(Activity {
                            kind: row.get(0)?,
                            description: row.get(1)?,
                            timestamp: row.get(2)?,
                            user_id,
                            user: user_id.map(|_| ActivityUser {
                                username: username.unwrap_or_else(|| "Unknown".to_string()),
                            }),
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One bar per task status: how many tasks sit in it out of all tasks.
    pub fn task_progress(&self, scope: Scope) -> Result<Vec<TaskProgress>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT status, COUNT(*), (SELECT COUNT(*) FROM tasks WHERE {SCOPE_CLAUSE})
                 FROM tasks
                 WHERE {SCOPE_CLAUSE}
                 GROUP BY status"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map([scope.server_id(), scope.viewer()], |row| {
                    let status: String = row.get(0)?;
                    let color = STATUS_COLORS
                        .iter()
                        .find(|(s, _)| *s == status)
                        .map(|(_, c)| *c)
                        .unwrap_or(OTHER_STATUS_COLOR);
                    Ok(TaskProgress {
                        color: color.to_string(),
                        name: status,
                        completed: row.get(1)?,
                        total: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // Known statuses in workflow order, anything else after them.
            rows.sort_by_key(|p| {
                STATUS_COLORS
                    .iter()
                    .position(|(s, _)| *s == p.name)
                    .unwrap_or(STATUS_COLORS.len())
            });
            Ok(rows)
        })
    }

    /// Income vs expense per `YYYY-MM`, oldest month first.
    pub fn budget_chart(&self, scope: Scope) -> Result<Vec<BudgetChartPoint>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT substr(date, 1, 7) AS month,
                        COALESCE(SUM(CASE WHEN type = 'income' THEN amount END), 0),
                        COALESCE(SUM(CASE WHEN type = 'expense' THEN amount END), 0)
                 FROM budgets
                 WHERE {SCOPE_CLAUSE}
                 GROUP BY month
                 ORDER BY month"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([scope.server_id(), scope.viewer()], |row| {
                    Ok(BudgetChartPoint {
                        month: row.get(0)?,
                        budget: row.get(1)?,
                        spent: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

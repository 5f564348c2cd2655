//! Database layer: migrations and collection/event/task persistence.
//!
//! Writes take a connection so callers can group them: the ledger runs every
//! mutation of a collection inside one [`begin_write`] transaction, so a
//! reader never sees a state without its event and two writers never
//! interleave on the same row.

use chrono::NaiveDate;
use sqlx::{sqlite::SqlitePoolOptions, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{info, warn};

use crate::collection::{Collection, CollectionData, Event, Task, TaskData};
use crate::errors::{OrderError, Result};
use crate::types::{CollState, State, TaskState};

const DATE_FMT: &str = "%Y-%m-%d";

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    connect(database_url, 5).await
}

/// Like [`init_pool`] with an explicit connection limit. An in-memory
/// database needs exactly one connection, each connection being its own db.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    let url = if url.contains('?') || url.contains(":memory:") {
        url
    } else {
        format!("{url}?mode=rwc")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct CollectionRow {
    id: String,
    pass: String,
    state: String,
    data: String,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    coll_state: String,
    date: String,
    paid: i64,
    text: String,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    state: String,
    data: String,
}

impl TryFrom<EventRow> for Event {
    type Error = OrderError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Event {
            state: row.coll_state.parse()?,
            date: NaiveDate::parse_from_str(&row.date, DATE_FMT)
                .map_err(|e| OrderError::Validation(format!("bad event date {}: {e}", row.date)))?,
            paid: row.paid,
            text: row.text,
        })
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = OrderError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            state: row.state.parse()?,
            data: serde_json::from_str::<TaskData>(&row.data)?,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Collection writes
// ─────────────────────────────────────────────────────────

/// Open a write transaction. `BEGIN IMMEDIATE` takes the database write lock
/// up front, so whatever is read inside stays current until commit.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Insert a new collection together with its first event.
pub async fn insert_collection(pool: &SqlitePool, coll: &Collection, first: &Event) -> Result<()> {
    let mut tx = begin_write(pool).await?;
    sqlx::query("INSERT INTO collections (id, pass, state, data) VALUES (?1, ?2, ?3, ?4)")
        .bind(&coll.id)
        .bind(&coll.pass)
        .bind(coll.state.as_str())
        .bind(serde_json::to_string(&coll.data)?)
        .execute(&mut *tx)
        .await?;
    insert_event(&mut tx, &coll.id, first).await?;
    tx.commit().await?;
    Ok(())
}

/// Fails with `TransitionDenied` when the stored state is no longer
/// `expected`, i.e. the caller decided on an outdated copy.
pub async fn expect_state(conn: &mut SqliteConnection, coll_id: &str, expected: CollState) -> Result<()> {
    let row: Option<(String,)> = sqlx::query_as("SELECT state FROM collections WHERE id = ?1")
        .bind(coll_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some((stored,)) = row else {
        return Err(OrderError::NotFound);
    };
    if stored != expected.as_str() {
        warn!("Collection {coll_id} is {stored}, caller expected {expected}");
        return Err(OrderError::TransitionDenied);
    }
    Ok(())
}

pub async fn write_state(conn: &mut SqliteConnection, coll_id: &str, state: CollState) -> Result<()> {
    let updated = sqlx::query("UPDATE collections SET state = ?1 WHERE id = ?2")
        .bind(state.as_str())
        .bind(coll_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(OrderError::NotFound);
    }
    Ok(())
}

/// Write the collection data and replace its task rows. The state column is
/// left alone; state only changes together with an event.
///
/// Payment bookkeeping already stored is folded into `coll.data` before the
/// write, so an edit made on an older copy never forgets a recorded payment
/// or a booked invoice.
pub async fn write_data_and_tasks(conn: &mut SqliteConnection, coll: &mut Collection) -> Result<()> {
    let row: Option<(String,)> = sqlx::query_as("SELECT data FROM collections WHERE id = ?1")
        .bind(&coll.id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some((stored,)) = row else {
        return Err(OrderError::NotFound);
    };
    let stored: CollectionData = serde_json::from_str(&stored)?;
    coll.data.absorb_payments(&stored);

    sqlx::query("UPDATE collections SET data = ?1 WHERE id = ?2")
        .bind(serde_json::to_string(&coll.data)?)
        .bind(&coll.id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM tasks WHERE coll_id = ?1")
        .bind(&coll.id)
        .execute(&mut *conn)
        .await?;

    for task in &coll.tasks {
        sqlx::query("INSERT INTO tasks (id, coll_id, state, data) VALUES (?1, ?2, ?3, ?4)")
            .bind(&task.id)
            .bind(&coll.id)
            .bind(task.state.as_str())
            .bind(serde_json::to_string(&task.data)?)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn insert_event(conn: &mut SqliteConnection, coll_id: &str, event: &Event) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO events (coll_id, coll_state, date, paid, text)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(coll_id)
    .bind(event.state.as_str())
    .bind(event.date.format(DATE_FMT).to_string())
    .bind(event.paid)
    .bind(&event.text)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Remove a collection with all of its events and tasks.
pub async fn delete_collection(conn: &mut SqliteConnection, coll_id: &str) -> Result<()> {
    let deleted = sqlx::query("DELETE FROM collections WHERE id = ?1")
        .bind(coll_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(OrderError::NotFound);
    }
    sqlx::query("DELETE FROM events WHERE coll_id = ?1")
        .bind(coll_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM tasks WHERE coll_id = ?1")
        .bind(coll_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Move one task from `from` to `to`. Fails with `TransitionDenied` when the
/// stored task is no longer in `from`.
pub async fn write_task_state(
    conn: &mut SqliteConnection,
    coll_id: &str,
    task_id: &str,
    from: TaskState,
    to: TaskState,
) -> Result<()> {
    let updated = sqlx::query("UPDATE tasks SET state = ?1 WHERE id = ?2 AND coll_id = ?3 AND state = ?4")
        .bind(to.as_str())
        .bind(task_id)
        .bind(coll_id)
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if updated == 0 {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM tasks WHERE id = ?1 AND coll_id = ?2")
            .bind(task_id)
            .bind(coll_id)
            .fetch_optional(&mut *conn)
            .await?;
        return Err(match exists {
            Some(_) => OrderError::TransitionDenied,
            None => OrderError::NotFound,
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

/// Load a collection with its events (oldest first) and tasks.
pub async fn read_collection(pool: &SqlitePool, id: &str) -> Result<Collection> {
    let mut conn = pool.acquire().await?;
    read_collection_in(&mut conn, id).await
}

/// [`read_collection`] on a given connection, e.g. inside a write transaction.
pub async fn read_collection_in(conn: &mut SqliteConnection, id: &str) -> Result<Collection> {
    let row = sqlx::query_as::<_, CollectionRow>(
        "SELECT id, pass, state, data FROM collections WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(OrderError::NotFound)?;

    let events = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT coll_state, date, paid, text
        FROM   events
        WHERE  coll_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(Event::try_from)
    .collect::<Result<Vec<_>>>()?;

    let tasks = sqlx::query_as::<_, TaskRow>(
        "SELECT id, state, data FROM tasks WHERE coll_id = ?1 ORDER BY rowid ASC",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(Task::try_from)
    .collect::<Result<Vec<_>>>()?;

    Ok(Collection {
        id: row.id,
        pass: row.pass,
        state: row.state.parse()?,
        data: serde_json::from_str::<CollectionData>(&row.data)?,
        events,
        tasks,
    })
}

/// Identifiers of all collections currently in `state`.
pub async fn read_collection_ids(pool: &SqlitePool, state: CollState) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM collections WHERE state = ?1 ORDER BY id")
        .bind(state.as_str())
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

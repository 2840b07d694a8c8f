use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    Activity, Attachment, Board, BoardMember, Card, CardMember, Checklist, ChecklistItem, Comment,
    Label, List, Notification, User, Workspace, WorkspaceMember,
};

const SCHEMA_VERSION: i64 = 1;

pub(crate) fn open_db(config: &Config) -> Result<Connection> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(&config.db_path)?;
    conn.busy_timeout(config.busy_timeout)?;
    prepare(&conn)?;
    Ok(conn)
}

pub(crate) fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.busy_timeout(Duration::from_secs(5))?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    init_db(conn)
}

pub(crate) fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            owner_id TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(owner_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS workspace_members (
            workspace_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            joined_at INTEGER NOT NULL,
            PRIMARY KEY(workspace_id, user_id),
            FOREIGN KEY(workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS boards (
            id TEXT PRIMARY KEY,
            workspace_id TEXT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            visibility TEXT NOT NULL,
            created_by TEXT NOT NULL,
            is_archived INTEGER NOT NULL DEFAULT 0,
            archived_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
            FOREIGN KEY(created_by) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS board_members (
            board_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            joined_at INTEGER NOT NULL,
            PRIMARY KEY(board_id, user_id),
            FOREIGN KEY(board_id) REFERENCES boards(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS board_stars (
            board_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            starred_at INTEGER NOT NULL,
            PRIMARY KEY(board_id, user_id),
            FOREIGN KEY(board_id) REFERENCES boards(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS labels (
            id TEXT PRIMARY KEY,
            board_id TEXT NOT NULL,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(board_id) REFERENCES boards(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS lists (
            id TEXT PRIMARY KEY,
            board_id TEXT NOT NULL,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            is_archived INTEGER NOT NULL DEFAULT 0,
            archived_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(board_id) REFERENCES boards(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS lists_board_position ON lists(board_id, position);
        CREATE TABLE IF NOT EXISTS cards (
            id TEXT PRIMARY KEY,
            list_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            position INTEGER NOT NULL,
            due_date INTEGER,
            is_completed INTEGER NOT NULL DEFAULT 0,
            is_archived INTEGER NOT NULL DEFAULT 0,
            archived_at INTEGER,
            created_by TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(list_id) REFERENCES lists(id) ON DELETE CASCADE,
            FOREIGN KEY(created_by) REFERENCES users(id) ON DELETE SET NULL
        );
        CREATE INDEX IF NOT EXISTS cards_list_position ON cards(list_id, position);
        CREATE TABLE IF NOT EXISTS card_members (
            card_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            assigned_by TEXT,
            assigned_at INTEGER NOT NULL,
            PRIMARY KEY(card_id, user_id),
            FOREIGN KEY(card_id) REFERENCES cards(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(assigned_by) REFERENCES users(id) ON DELETE SET NULL
        );
        CREATE TABLE IF NOT EXISTS card_labels (
            card_id TEXT NOT NULL,
            label_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY(card_id, label_id),
            FOREIGN KEY(card_id) REFERENCES cards(id) ON DELETE CASCADE,
            FOREIGN KEY(label_id) REFERENCES labels(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS checklists (
            id TEXT PRIMARY KEY,
            card_id TEXT NOT NULL,
            title TEXT NOT NULL,
            position INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(card_id) REFERENCES cards(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS checklist_items (
            id TEXT PRIMARY KEY,
            checklist_id TEXT NOT NULL,
            title TEXT NOT NULL,
            position INTEGER NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0,
            completed_at INTEGER,
            completed_by TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(checklist_id) REFERENCES checklists(id) ON DELETE CASCADE,
            FOREIGN KEY(completed_by) REFERENCES users(id) ON DELETE SET NULL
        );
        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            card_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            content TEXT NOT NULL,
            is_edited INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY(card_id) REFERENCES cards(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            card_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_url TEXT NOT NULL,
            file_type TEXT NOT NULL DEFAULT '',
            file_size INTEGER,
            uploaded_by TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(card_id) REFERENCES cards(id) ON DELETE CASCADE,
            FOREIGN KEY(uploaded_by) REFERENCES users(id) ON DELETE SET NULL
        );
        CREATE TABLE IF NOT EXISTS activities (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            board_id TEXT,
            card_id TEXT,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(board_id) REFERENCES boards(id) ON DELETE CASCADE,
            FOREIGN KEY(card_id) REFERENCES cards(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS activities_board ON activities(board_id, created_at);
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            type TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL DEFAULT '',
            is_read INTEGER NOT NULL DEFAULT 0,
            read_at INTEGER,
            related_board_id TEXT,
            related_card_id TEXT,
            related_user_id TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(related_board_id) REFERENCES boards(id) ON DELETE CASCADE,
            FOREIGN KEY(related_card_id) REFERENCES cards(id) ON DELETE CASCADE,
            FOREIGN KEY(related_user_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS notifications_user_read ON notifications(user_id, is_read);",
    )?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    }
    Ok(())
}

pub(crate) fn datetime_from_millis(value: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or(Error::Timestamp(value))
}

/// Current time truncated to the millisecond precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    datetime_from_millis(now.timestamp_millis()).unwrap_or(now)
}

fn column_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    datetime_from_millis(millis)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(err)))
}

fn column_datetime_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = row.get(idx)?;
    millis
        .map(|value| {
            datetime_from_millis(value).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(err))
            })
        })
        .transpose()
}

pub(crate) const USER_COLUMNS: &str = "id, username, email, created_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: column_datetime(row, 3)?,
    })
}

pub(crate) const WORKSPACE_COLUMNS: &str =
    "id, name, slug, description, owner_id, is_active, created_at, updated_at";

pub(crate) fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        owner_id: row.get(4)?,
        is_active: row.get(5)?,
        created_at: column_datetime(row, 6)?,
        updated_at: column_datetime(row, 7)?,
    })
}

pub(crate) fn workspace_member_from_row(row: &Row<'_>) -> rusqlite::Result<WorkspaceMember> {
    Ok(WorkspaceMember {
        workspace_id: row.get(0)?,
        user_id: row.get(1)?,
        role: row.get(2)?,
        joined_at: column_datetime(row, 3)?,
    })
}

pub(crate) const BOARD_COLUMNS: &str = "id, workspace_id, name, slug, description, visibility, \
     created_by, is_archived, archived_at, created_at, updated_at";

pub(crate) fn board_from_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        slug: row.get(3)?,
        description: row.get(4)?,
        visibility: row.get(5)?,
        created_by: row.get(6)?,
        is_archived: row.get(7)?,
        archived_at: column_datetime_opt(row, 8)?,
        created_at: column_datetime(row, 9)?,
        updated_at: column_datetime(row, 10)?,
    })
}

pub(crate) fn board_member_from_row(row: &Row<'_>) -> rusqlite::Result<BoardMember> {
    Ok(BoardMember {
        board_id: row.get(0)?,
        user_id: row.get(1)?,
        role: row.get(2)?,
        joined_at: column_datetime(row, 3)?,
    })
}

pub(crate) const LABEL_COLUMNS: &str = "id, board_id, name, color, created_at";

pub(crate) fn label_from_row(row: &Row<'_>) -> rusqlite::Result<Label> {
    Ok(Label {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        created_at: column_datetime(row, 4)?,
    })
}

pub(crate) const LIST_COLUMNS: &str =
    "id, board_id, name, position, is_archived, archived_at, created_at, updated_at";

pub(crate) fn list_from_row(row: &Row<'_>) -> rusqlite::Result<List> {
    Ok(List {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
        is_archived: row.get(4)?,
        archived_at: column_datetime_opt(row, 5)?,
        created_at: column_datetime(row, 6)?,
        updated_at: column_datetime(row, 7)?,
    })
}

pub(crate) const CARD_COLUMNS: &str = "id, list_id, title, description, position, due_date, \
     is_completed, is_archived, archived_at, created_by, created_at, updated_at";

pub(crate) fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: row.get(0)?,
        list_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        position: row.get(4)?,
        due_date: column_datetime_opt(row, 5)?,
        is_completed: row.get(6)?,
        is_archived: row.get(7)?,
        archived_at: column_datetime_opt(row, 8)?,
        created_by: row.get(9)?,
        created_at: column_datetime(row, 10)?,
        updated_at: column_datetime(row, 11)?,
    })
}

pub(crate) fn card_member_from_row(row: &Row<'_>) -> rusqlite::Result<CardMember> {
    Ok(CardMember {
        card_id: row.get(0)?,
        user_id: row.get(1)?,
        assigned_by: row.get(2)?,
        assigned_at: column_datetime(row, 3)?,
    })
}

pub(crate) const CHECKLIST_COLUMNS: &str = "id, card_id, title, position, created_at";

pub(crate) fn checklist_from_row(row: &Row<'_>) -> rusqlite::Result<Checklist> {
    Ok(Checklist {
        id: row.get(0)?,
        card_id: row.get(1)?,
        title: row.get(2)?,
        position: row.get(3)?,
        created_at: column_datetime(row, 4)?,
    })
}

pub(crate) const CHECKLIST_ITEM_COLUMNS: &str =
    "id, checklist_id, title, position, is_completed, completed_at, completed_by, created_at";

pub(crate) fn checklist_item_from_row(row: &Row<'_>) -> rusqlite::Result<ChecklistItem> {
    Ok(ChecklistItem {
        id: row.get(0)?,
        checklist_id: row.get(1)?,
        title: row.get(2)?,
        position: row.get(3)?,
        is_completed: row.get(4)?,
        completed_at: column_datetime_opt(row, 5)?,
        completed_by: row.get(6)?,
        created_at: column_datetime(row, 7)?,
    })
}

pub(crate) const COMMENT_COLUMNS: &str =
    "id, card_id, user_id, content, is_edited, created_at, updated_at";

pub(crate) fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        card_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        is_edited: row.get(4)?,
        created_at: column_datetime(row, 5)?,
        updated_at: column_datetime(row, 6)?,
    })
}

pub(crate) const ATTACHMENT_COLUMNS: &str =
    "id, card_id, file_name, file_url, file_type, file_size, uploaded_by, created_at";

pub(crate) fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        card_id: row.get(1)?,
        file_name: row.get(2)?,
        file_url: row.get(3)?,
        file_type: row.get(4)?,
        file_size: row.get(5)?,
        uploaded_by: row.get(6)?,
        created_at: column_datetime(row, 7)?,
    })
}

pub(crate) const ACTIVITY_COLUMNS: &str =
    "id, user_id, action_type, board_id, card_id, payload, created_at";

pub(crate) fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    let payload: String = row.get(5)?;
    Ok(Activity {
        id: row.get(0)?,
        user_id: row.get(1)?,
        action_type: row.get(2)?,
        board_id: row.get(3)?,
        card_id: row.get(4)?,
        payload: serde_json::from_str(&payload).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(err))
        })?,
        created_at: column_datetime(row, 6)?,
    })
}

pub(crate) const NOTIFICATION_COLUMNS: &str = "id, user_id, type, title, message, is_read, \
     read_at, related_board_id, related_card_id, related_user_id, created_at";

pub(crate) fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        is_read: row.get(5)?,
        read_at: column_datetime_opt(row, 6)?,
        related_board_id: row.get(7)?,
        related_card_id: row.get(8)?,
        related_user_id: row.get(9)?,
        created_at: column_datetime(row, 10)?,
    })
}

pub(crate) fn user_id_exists(conn: &Connection, user_id: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(exists != 0)
}

pub(crate) fn get_user_by_id(conn: &Connection, user_id: &str) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![user_id],
        user_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("user"))
}

pub(crate) fn get_workspace_by_id(conn: &Connection, workspace_id: &str) -> Result<Workspace> {
    conn.query_row(
        &format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = ?1"),
        params![workspace_id],
        workspace_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("workspace"))
}

pub(crate) fn get_board_by_id(conn: &Connection, board_id: &str) -> Result<Board> {
    conn.query_row(
        &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1"),
        params![board_id],
        board_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("board"))
}

pub(crate) fn get_label_by_id(conn: &Connection, label_id: &str) -> Result<Label> {
    conn.query_row(
        &format!("SELECT {LABEL_COLUMNS} FROM labels WHERE id = ?1"),
        params![label_id],
        label_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("label"))
}

pub(crate) fn get_list_by_id(conn: &Connection, list_id: &str) -> Result<List> {
    conn.query_row(
        &format!("SELECT {LIST_COLUMNS} FROM lists WHERE id = ?1"),
        params![list_id],
        list_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("list"))
}

pub(crate) fn get_card_by_id(conn: &Connection, card_id: &str) -> Result<Card> {
    conn.query_row(
        &format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1"),
        params![card_id],
        card_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("card"))
}

pub(crate) fn get_checklist_by_id(conn: &Connection, checklist_id: &str) -> Result<Checklist> {
    conn.query_row(
        &format!("SELECT {CHECKLIST_COLUMNS} FROM checklists WHERE id = ?1"),
        params![checklist_id],
        checklist_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("checklist"))
}

pub(crate) fn get_checklist_item_by_id(conn: &Connection, item_id: &str) -> Result<ChecklistItem> {
    conn.query_row(
        &format!("SELECT {CHECKLIST_ITEM_COLUMNS} FROM checklist_items WHERE id = ?1"),
        params![item_id],
        checklist_item_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("checklist item"))
}

pub(crate) fn get_comment_by_id(conn: &Connection, comment_id: &str) -> Result<Comment> {
    conn.query_row(
        &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
        params![comment_id],
        comment_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("comment"))
}

pub(crate) fn get_notification_by_id(
    conn: &Connection,
    notification_id: &str,
) -> Result<Notification> {
    conn.query_row(
        &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
        params![notification_id],
        notification_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("notification"))
}

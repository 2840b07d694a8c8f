//! Soft delete for boards, lists and cards.
//!
//! Archiving only touches the entity's own flag and timestamp; children keep their
//! own flags. An archived list or card keeps its last position, and its active
//! siblings close ranks behind it. Restoring clears the flag and leaves the position
//! alone, so a restored item can share a position with an active sibling until the
//! scope is renumbered.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::position::{self, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveTarget<'a> {
    Board(&'a str),
    List(&'a str),
    Card(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArchiveState {
    Active,
    Archived { at: Option<DateTime<Utc>> },
}

impl ArchiveState {
    pub fn is_archived(&self) -> bool {
        matches!(self, ArchiveState::Archived { .. })
    }
}

impl<'a> ArchiveTarget<'a> {
    fn table(&self) -> &'static str {
        match self {
            ArchiveTarget::Board(_) => "boards",
            ArchiveTarget::List(_) => "lists",
            ArchiveTarget::Card(_) => "cards",
        }
    }

    fn entity(&self) -> &'static str {
        match self {
            ArchiveTarget::Board(_) => "board",
            ArchiveTarget::List(_) => "list",
            ArchiveTarget::Card(_) => "card",
        }
    }

    fn id(&self) -> &'a str {
        match *self {
            ArchiveTarget::Board(id) | ArchiveTarget::List(id) | ArchiveTarget::Card(id) => id,
        }
    }
}

/// Sets the archived flag and stamps `at`. Archiving twice re-stamps.
pub(crate) fn archive(conn: &Connection, target: ArchiveTarget<'_>, at: DateTime<Utc>) -> Result<()> {
    let was_archived = is_archived(conn, target)?;

    if !was_archived {
        match target {
            ArchiveTarget::Board(_) => {}
            ArchiveTarget::List(id) => {
                let board_id: String = conn.query_row(
                    "SELECT board_id FROM lists WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                close_gap(conn, Scope::BoardLists(&board_id), id)?;
            }
            ArchiveTarget::Card(id) => {
                let list_id: String = conn.query_row(
                    "SELECT list_id FROM cards WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                close_gap(conn, Scope::ListCards(&list_id), id)?;
            }
        }
    }

    let millis = at.timestamp_millis();
    conn.execute(
        &format!(
            "UPDATE {} SET is_archived = 1, archived_at = ?1, updated_at = ?1 WHERE id = ?2",
            target.table()
        ),
        params![millis, target.id()],
    )?;
    Ok(())
}

/// Clears the archived flag and timestamp. Position is not renormalized.
pub(crate) fn restore(conn: &Connection, target: ArchiveTarget<'_>, at: DateTime<Utc>) -> Result<()> {
    is_archived(conn, target)?;
    conn.execute(
        &format!(
            "UPDATE {} SET is_archived = 0, archived_at = NULL, updated_at = ?1 WHERE id = ?2",
            target.table()
        ),
        params![at.timestamp_millis(), target.id()],
    )?;
    Ok(())
}

pub(crate) fn state(conn: &Connection, target: ArchiveTarget<'_>) -> Result<ArchiveState> {
    let row: Option<(bool, Option<i64>)> = conn
        .query_row(
            &format!(
                "SELECT is_archived, archived_at FROM {} WHERE id = ?1",
                target.table()
            ),
            params![target.id()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        None => Err(Error::NotFound(target.entity())),
        Some((true, millis)) => Ok(ArchiveState::Archived {
            at: millis.map(crate::db::datetime_from_millis).transpose()?,
        }),
        Some((false, _)) => Ok(ArchiveState::Active),
    }
}

fn is_archived(conn: &Connection, target: ArchiveTarget<'_>) -> Result<bool> {
    Ok(state(conn, target)?.is_archived())
}

fn close_gap(conn: &Connection, scope: Scope<'_>, id: &str) -> Result<()> {
    let order = position::load_order(conn, scope)?;
    position::apply_plan(conn, scope, &order.plan_close_gap(id))
}

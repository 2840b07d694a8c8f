//! Role resolution and capability checks.
//!
//! Workspace and board memberships are independent: a workspace role never grants
//! anything on a board. Lists, cards and card content inherit the role of the board
//! they hang off.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Workspace(&'a str),
    Board(&'a str),
    List(&'a str),
    Card(&'a str),
    Checklist(&'a str),
    ChecklistItem(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    View,
    ModifyContent,
    Administer,
}

const ADMIN_CAPABILITIES: &[Capability] = &[
    Capability::View,
    Capability::ModifyContent,
    Capability::Administer,
];
const MEMBER_CAPABILITIES: &[Capability] = &[Capability::View, Capability::ModifyContent];
const OBSERVER_CAPABILITIES: &[Capability] = &[Capability::View];

impl Role {
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Role::Admin => ADMIN_CAPABILITIES,
            Role::Member => MEMBER_CAPABILITIES,
            Role::Observer => OBSERVER_CAPABILITIES,
            Role::None => &[],
        }
    }

    pub fn allows(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn can_administer(self) -> bool {
        self.allows(Capability::Administer)
    }

    pub fn can_modify_content(self) -> bool {
        self.allows(Capability::ModifyContent)
    }

    pub fn can_view(self) -> bool {
        self.allows(Capability::View)
    }
}

/// Effective role of `user_id` on `target`. A missing membership row is `Role::None`;
/// a target id that does not exist is `NotFound`.
pub fn resolve_role(conn: &Connection, user_id: &str, target: Target<'_>) -> Result<Role> {
    match target {
        Target::Workspace(workspace_id) => workspace_role(conn, user_id, workspace_id),
        other => {
            let board_id = board_of(conn, other)?;
            board_role(conn, user_id, &board_id)
        }
    }
}

/// Walks the containment chain up to the owning board.
pub fn board_of(conn: &Connection, target: Target<'_>) -> Result<String> {
    let (sql, entity, id) = match target {
        Target::Workspace(_) => {
            return Err(Error::invalid("a workspace is not contained in a board"));
        }
        Target::Board(id) => ("SELECT id FROM boards WHERE id = ?1", "board", id),
        Target::List(id) => ("SELECT board_id FROM lists WHERE id = ?1", "list", id),
        Target::Card(id) => (
            "SELECT l.board_id FROM cards c JOIN lists l ON l.id = c.list_id WHERE c.id = ?1",
            "card",
            id,
        ),
        Target::Checklist(id) => (
            "SELECT l.board_id FROM checklists k
             JOIN cards c ON c.id = k.card_id
             JOIN lists l ON l.id = c.list_id
             WHERE k.id = ?1",
            "checklist",
            id,
        ),
        Target::ChecklistItem(id) => (
            "SELECT l.board_id FROM checklist_items i
             JOIN checklists k ON k.id = i.checklist_id
             JOIN cards c ON c.id = k.card_id
             JOIN lists l ON l.id = c.list_id
             WHERE i.id = ?1",
            "checklist item",
            id,
        ),
    };
    conn.query_row(sql, params![id], |row| row.get(0))
        .optional()?
        .ok_or(Error::NotFound(entity))
}

fn workspace_role(conn: &Connection, user_id: &str, workspace_id: &str) -> Result<Role> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM workspaces WHERE id = ?1)",
        params![workspace_id],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(Error::NotFound("workspace"));
    }
    let role: Option<Role> = conn
        .query_row(
            "SELECT role FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(role.unwrap_or(Role::None))
}

fn board_role(conn: &Connection, user_id: &str, board_id: &str) -> Result<Role> {
    let role: Option<Role> = conn
        .query_row(
            "SELECT role FROM board_members WHERE board_id = ?1 AND user_id = ?2",
            params![board_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(role.unwrap_or(Role::None))
}

/// Resolves the role and checks it against `capability`.
///
/// No membership at all reads as `NotFound`, so the existence of records the user
/// cannot see is not revealed. A role that is present but too weak is `Forbidden`.
pub fn authorize(
    conn: &Connection,
    user_id: &str,
    target: Target<'_>,
    capability: Capability,
) -> Result<Role> {
    let role = resolve_role(conn, user_id, target)?;
    if role == Role::None {
        return Err(Error::NotFound(target.entity()));
    }
    if !role.allows(capability) {
        return Err(Error::forbidden(format!(
            "{} role cannot {} this {}",
            role,
            capability.verb(),
            target.entity()
        )));
    }
    Ok(role)
}

impl Target<'_> {
    fn entity(&self) -> &'static str {
        match self {
            Target::Workspace(_) => "workspace",
            Target::Board(_) => "board",
            Target::List(_) => "list",
            Target::Card(_) => "card",
            Target::Checklist(_) => "checklist",
            Target::ChecklistItem(_) => "checklist item",
        }
    }
}

impl Capability {
    fn verb(&self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::ModifyContent => "modify",
            Capability::Administer => "administer",
        }
    }
}

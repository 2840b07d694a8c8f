//! Sibling ordering for lists within a board, cards within a list, and the
//! checklists/items hanging off a card.
//!
//! The active (non-archived) siblings of one container should hold positions
//! `1..=N`. [`SiblingOrder`] computes the position changes an operation needs as a
//! list of [`Shift`]s without touching storage; the functions at the bottom of the
//! module load a scope from SQLite and write a plan back inside the caller's
//! transaction.

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sibling {
    pub id: String,
    pub position: i64,
}

/// A single position assignment produced by a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shift {
    pub id: String,
    pub position: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SiblingOrder {
    siblings: Vec<Sibling>,
}

impl SiblingOrder {
    pub fn new(mut siblings: Vec<Sibling>) -> Self {
        siblings.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        SiblingOrder { siblings }
    }

    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }

    pub fn position_of(&self, id: &str) -> Option<i64> {
        self.siblings
            .iter()
            .find(|sibling| sibling.id == id)
            .map(|sibling| sibling.position)
    }

    pub fn positions(&self) -> Vec<i64> {
        self.siblings.iter().map(|sibling| sibling.position).collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.siblings.iter().map(|sibling| sibling.id.as_str()).collect()
    }

    /// `max + 1`, or `1` for an empty container.
    pub fn append_position(&self) -> i64 {
        self.siblings
            .iter()
            .map(|sibling| sibling.position)
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Target for an in-place move: `0` means the last slot, anything else is taken as is.
    pub fn resolve_move_target(&self, requested: i64) -> i64 {
        if requested == 0 {
            self.len().max(1) as i64
        } else {
            requested
        }
    }

    /// True when the positions are exactly `1..=N`.
    pub fn is_contiguous(&self) -> bool {
        self.siblings
            .iter()
            .enumerate()
            .all(|(idx, sibling)| sibling.position == idx as i64 + 1)
    }

    /// Moves `id` to `new_position` within this container.
    ///
    /// Moving right decrements every sibling in `(old, new]`; moving left increments
    /// every sibling in `[new, old)`. The moved item is then set to `new_position`
    /// directly and is the last shift in the plan. Equal positions, or an id not in
    /// the set, yield an empty plan.
    pub fn plan_reorder(&self, id: &str, new_position: i64) -> Vec<Shift> {
        let Some(old_position) = self.position_of(id) else {
            return Vec::new();
        };
        if new_position == old_position {
            return Vec::new();
        }

        let mut plan: Vec<Shift> = self
            .siblings
            .iter()
            .filter(|sibling| sibling.id != id)
            .filter_map(|sibling| {
                let p = sibling.position;
                if new_position > old_position && old_position < p && p <= new_position {
                    Some(Shift {
                        id: sibling.id.clone(),
                        position: p - 1,
                    })
                } else if new_position < old_position && new_position <= p && p < old_position {
                    Some(Shift {
                        id: sibling.id.clone(),
                        position: p + 1,
                    })
                } else {
                    None
                }
            })
            .collect();

        plan.push(Shift {
            id: id.to_string(),
            position: new_position,
        });
        plan
    }

    /// Makes room at `at` for an incoming item: every sibling at `at` or later moves up one.
    pub fn plan_open_slot(&self, at: i64) -> Vec<Shift> {
        self.siblings
            .iter()
            .filter(|sibling| sibling.position >= at)
            .map(|sibling| Shift {
                id: sibling.id.clone(),
                position: sibling.position + 1,
            })
            .collect()
    }

    /// Closes the hole `id` leaves when it drops out of the set. `id` itself is untouched.
    pub fn plan_close_gap(&self, id: &str) -> Vec<Shift> {
        let Some(at) = self.position_of(id) else {
            return Vec::new();
        };
        self.siblings
            .iter()
            .filter(|sibling| sibling.id != id && sibling.position > at)
            .map(|sibling| Shift {
                id: sibling.id.clone(),
                position: sibling.position - 1,
            })
            .collect()
    }

    /// Rewrites the set to `1..=N` in current order. Only changed positions are emitted.
    pub fn plan_renumber(&self) -> Vec<Shift> {
        self.siblings
            .iter()
            .enumerate()
            .filter(|(idx, sibling)| sibling.position != *idx as i64 + 1)
            .map(|(idx, sibling)| Shift {
                id: sibling.id.clone(),
                position: idx as i64 + 1,
            })
            .collect()
    }

    pub fn apply(&mut self, plan: &[Shift]) {
        for shift in plan {
            if let Some(sibling) = self.siblings.iter_mut().find(|s| s.id == shift.id) {
                sibling.position = shift.position;
            }
        }
        self.siblings
            .sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
    }

    pub fn insert(&mut self, id: impl Into<String>, position: i64) {
        self.siblings.push(Sibling {
            id: id.into(),
            position,
        });
        self.apply(&[]);
    }

    pub fn remove(&mut self, id: &str) -> Option<Sibling> {
        let idx = self.siblings.iter().position(|sibling| sibling.id == id)?;
        Some(self.siblings.remove(idx))
    }
}

/// A container whose children share one position sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    BoardLists(&'a str),
    ListCards(&'a str),
    CardChecklists(&'a str),
    ChecklistItems(&'a str),
}

impl<'a> Scope<'a> {
    fn table(&self) -> &'static str {
        match self {
            Scope::BoardLists(_) => "lists",
            Scope::ListCards(_) => "cards",
            Scope::CardChecklists(_) => "checklists",
            Scope::ChecklistItems(_) => "checklist_items",
        }
    }

    fn parent_column(&self) -> &'static str {
        match self {
            Scope::BoardLists(_) => "board_id",
            Scope::ListCards(_) => "list_id",
            Scope::CardChecklists(_) => "card_id",
            Scope::ChecklistItems(_) => "checklist_id",
        }
    }

    pub fn parent_id(&self) -> &'a str {
        match *self {
            Scope::BoardLists(id)
            | Scope::ListCards(id)
            | Scope::CardChecklists(id)
            | Scope::ChecklistItems(id) => id,
        }
    }

    fn archivable(&self) -> bool {
        matches!(self, Scope::BoardLists(_) | Scope::ListCards(_))
    }

    fn active_filter(&self) -> &'static str {
        if self.archivable() {
            " AND is_archived = 0"
        } else {
            ""
        }
    }
}

/// Ordering health of one scope, as reported by the audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderReport {
    pub table: &'static str,
    pub parent_id: String,
    pub positions: Vec<i64>,
    pub contiguous: bool,
}

/// Largest position a caller may request. Shifts only ever add one per sibling, so
/// stored positions stay far from `i64::MAX`.
pub const MAX_POSITION: i64 = i64::MAX / 2;

pub(crate) fn validate_position(position: i64) -> Result<()> {
    if position < 0 {
        return Err(Error::invalid("position must be a non-negative integer"));
    }
    if position > MAX_POSITION {
        return Err(Error::invalid("position out of range"));
    }
    Ok(())
}

/// Loads the active siblings of `scope`, ordered by position.
pub(crate) fn load_order(conn: &Connection, scope: Scope<'_>) -> Result<SiblingOrder> {
    let sql = format!(
        "SELECT id, position FROM {} WHERE {} = ?1{} ORDER BY position ASC, id ASC",
        scope.table(),
        scope.parent_column(),
        scope.active_filter()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![scope.parent_id()], |row| {
        Ok(Sibling {
            id: row.get(0)?,
            position: row.get(1)?,
        })
    })?;
    let siblings = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(SiblingOrder::new(siblings))
}

pub(crate) fn next_position(conn: &Connection, scope: Scope<'_>) -> Result<i64> {
    let sql = format!(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM {} WHERE {} = ?1{}",
        scope.table(),
        scope.parent_column(),
        scope.active_filter()
    );
    let position: i64 = conn.query_row(&sql, params![scope.parent_id()], |row| row.get(0))?;
    Ok(position)
}

/// Writes a plan. Must run inside the transaction that read the order.
pub(crate) fn apply_plan(conn: &Connection, scope: Scope<'_>, plan: &[Shift]) -> Result<()> {
    if plan.is_empty() {
        return Ok(());
    }
    debug!(
        table = scope.table(),
        parent = scope.parent_id(),
        shifts = plan.len(),
        "applying position plan"
    );
    let sql = format!(
        "UPDATE {} SET position = ?1 WHERE id = ?2 AND {} = ?3",
        scope.table(),
        scope.parent_column()
    );
    let mut stmt = conn.prepare(&sql)?;
    for shift in plan {
        stmt.execute(params![shift.position, shift.id, scope.parent_id()])?;
    }
    Ok(())
}

/// Resolves the position for a new child: `0` appends, anything else opens a slot there.
pub(crate) fn place_new(conn: &Connection, scope: Scope<'_>, requested: i64) -> Result<i64> {
    validate_position(requested)?;
    if requested == 0 {
        return next_position(conn, scope);
    }
    let order = load_order(conn, scope)?;
    apply_plan(conn, scope, &order.plan_open_slot(requested))?;
    Ok(requested)
}

/// Renumbers the active set of `scope` to `1..=N`, returning how many rows changed.
pub(crate) fn renumber(conn: &Connection, scope: Scope<'_>) -> Result<usize> {
    let order = load_order(conn, scope)?;
    let plan = order.plan_renumber();
    apply_plan(conn, scope, &plan)?;
    Ok(plan.len())
}

pub(crate) fn report(conn: &Connection, scope: Scope<'_>) -> Result<OrderReport> {
    let order = load_order(conn, scope)?;
    Ok(OrderReport {
        table: scope.table(),
        parent_id: scope.parent_id().to_string(),
        positions: order.positions(),
        contiguous: order.is_contiguous(),
    })
}

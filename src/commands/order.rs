use rusqlite::{Connection, TransactionBehavior};
use tracing::{info, warn};

use crate::db::{get_board_by_id, get_list_by_id};
use crate::error::Result;
use crate::membership::{authorize, Capability, Target};
use crate::position::{self, OrderReport, Scope};
use crate::store::Store;

/// A container whose active children are checked or repaired as one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRef {
    /// The lists of a board.
    Board(String),
    /// The cards of a list.
    List(String),
}

impl ScopeRef {
    fn scope(&self) -> Scope<'_> {
        match self {
            ScopeRef::Board(id) => Scope::BoardLists(id),
            ScopeRef::List(id) => Scope::ListCards(id),
        }
    }

    fn ensure_exists(&self, conn: &Connection) -> Result<()> {
        match self {
            ScopeRef::Board(id) => get_board_by_id(conn, id).map(|_| ()),
            ScopeRef::List(id) => get_list_by_id(conn, id).map(|_| ()),
        }
    }

    fn target(&self) -> Target<'_> {
        match self {
            ScopeRef::Board(id) => Target::Board(id),
            ScopeRef::List(id) => Target::List(id),
        }
    }
}

fn all_scopes(conn: &Connection) -> Result<Vec<ScopeRef>> {
    let mut scopes = Vec::new();
    let mut boards = conn.prepare("SELECT id FROM boards ORDER BY created_at ASC, id ASC")?;
    for id in boards.query_map([], |row| row.get::<_, String>(0))? {
        scopes.push(ScopeRef::Board(id?));
    }
    let mut lists = conn.prepare("SELECT id FROM lists ORDER BY board_id ASC, position ASC, id ASC")?;
    for id in lists.query_map([], |row| row.get::<_, String>(0))? {
        scopes.push(ScopeRef::List(id?));
    }
    Ok(scopes)
}

impl Store {
    /// Ordering health of one scope, for a user who can view it.
    pub fn check_order(&self, actor: &str, scope: &ScopeRef) -> Result<OrderReport> {
        authorize(&self.conn, actor, scope.target(), Capability::View)?;
        position::report(&self.conn, scope.scope())
    }

    /// Every board and list whose active positions are not exactly `1..=N`.
    ///
    /// Operator-level: runs without a user and sees all data.
    pub fn audit_orders(&self) -> Result<Vec<OrderReport>> {
        let mut drifted = Vec::new();
        for scope in all_scopes(&self.conn)? {
            let report = position::report(&self.conn, scope.scope())?;
            if !report.contiguous {
                warn!(
                    table = report.table,
                    parent = %report.parent_id,
                    positions = ?report.positions,
                    "non-contiguous order"
                );
                drifted.push(report);
            }
        }
        Ok(drifted)
    }

    /// Operator-level renumber of one scope, without a membership check.
    pub fn repair_order(&mut self, scope: &ScopeRef) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        scope.ensure_exists(&tx)?;
        let changed = position::renumber(&tx, scope.scope())?;
        tx.commit()?;
        info!(scope = ?scope, changed, "order repaired");
        Ok(changed)
    }
}

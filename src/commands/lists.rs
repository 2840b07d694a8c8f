use rusqlite::{params, TransactionBehavior};
use serde_json::json;
use tracing::info;

use crate::activity::{self, NewActivity};
use crate::archive::{self, ArchiveTarget};
use crate::commands::cards::active_cards;
use crate::commands::{new_id, require_text};
use crate::db::{self, get_list_by_id, list_from_row, LIST_COLUMNS};
use crate::error::{Error, Result};
use crate::membership::{authorize, Capability, Target};
use crate::models::{ActionType, List, ListDetail, NewList};
use crate::position::{self, Scope};
use crate::store::Store;

impl Store {
    pub fn create_list(&mut self, actor: &str, input: NewList) -> Result<List> {
        let name = require_text("name", &input.name)?;
        position::validate_position(input.position)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::Board(&input.board_id), Capability::ModifyContent)?;

        let now = db::now();
        let list = List {
            id: new_id(),
            position: position::place_new(&tx, Scope::BoardLists(&input.board_id), input.position)?,
            board_id: input.board_id,
            name,
            is_archived: false,
            archived_at: None,
            created_at: now,
            updated_at: now,
        };
        tx.execute(
            "INSERT INTO lists (id, board_id, name, position, is_archived, archived_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5, ?6)",
            params![
                list.id,
                list.board_id,
                list.name,
                list.position,
                list.created_at.timestamp_millis(),
                list.updated_at.timestamp_millis()
            ],
        )?;

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::ListCreated)
                .board(&list.board_id)
                .payload(json!({ "list_id": list.id, "list_name": list.name })),
        );

        tx.commit()?;
        info!(list = %list.id, board = %list.board_id, position = list.position, "list created");
        Ok(list)
    }

    /// Lists of a board in position order, either the active or the archived ones.
    pub fn list_lists(&self, actor: &str, board_id: &str, archived: bool) -> Result<Vec<List>> {
        authorize(&self.conn, actor, Target::Board(board_id), Capability::View)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LIST_COLUMNS} FROM lists WHERE board_id = ?1 AND is_archived = ?2
             ORDER BY position ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![board_id, archived], list_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_list(&self, actor: &str, list_id: &str) -> Result<ListDetail> {
        authorize(&self.conn, actor, Target::List(list_id), Capability::View)?;
        Ok(ListDetail {
            list: get_list_by_id(&self.conn, list_id)?,
            cards: active_cards(&self.conn, list_id)?,
        })
    }

    pub fn archive_list(&mut self, actor: &str, list_id: &str) -> Result<List> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::List(list_id), Capability::ModifyContent)?;
        archive::archive(&tx, ArchiveTarget::List(list_id), db::now())?;
        let list = get_list_by_id(&tx, list_id)?;

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::ListArchived)
                .board(&list.board_id)
                .payload(json!({ "list_id": list.id, "list_name": list.name })),
        );

        tx.commit()?;
        info!(list = %list_id, "list archived");
        Ok(list)
    }

    pub fn restore_list(&mut self, actor: &str, list_id: &str) -> Result<List> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::List(list_id), Capability::ModifyContent)?;
        archive::restore(&tx, ArchiveTarget::List(list_id), db::now())?;
        let list = get_list_by_id(&tx, list_id)?;

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::ListRestored)
                .board(&list.board_id)
                .payload(json!({ "list_id": list.id, "list_name": list.name })),
        );

        tx.commit()?;
        info!(list = %list_id, "list restored");
        Ok(list)
    }

    /// Moves a list within its board. Moving to the current position changes nothing.
    ///
    /// `0` is not a literal slot here: it is read as "the last slot", the same way
    /// `create_list` reads `0` as "append". Positions above
    /// [`MAX_POSITION`](crate::position::MAX_POSITION) are rejected.
    pub fn move_list(&mut self, actor: &str, list_id: &str, new_position: i64) -> Result<List> {
        position::validate_position(new_position)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::List(list_id), Capability::ModifyContent)?;
        let list = get_list_by_id(&tx, list_id)?;
        if list.is_archived {
            return Err(Error::invalid("archived lists cannot be moved"));
        }

        let scope = Scope::BoardLists(&list.board_id);
        let order = position::load_order(&tx, scope)?;
        let new_position = order.resolve_move_target(new_position);
        let plan = order.plan_reorder(list_id, new_position);
        if plan.is_empty() {
            return Ok(list);
        }
        position::apply_plan(&tx, scope, &plan)?;
        tx.execute(
            "UPDATE lists SET updated_at = ?1 WHERE id = ?2",
            params![db::now().timestamp_millis(), list_id],
        )?;

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::ListMoved)
                .board(&list.board_id)
                .payload(json!({
                    "list_id": list.id,
                    "from_position": list.position,
                    "to_position": new_position,
                })),
        );

        let moved = get_list_by_id(&tx, list_id)?;
        tx.commit()?;
        Ok(moved)
    }

    /// Rewrites the active lists of a board to `1..=N`. Returns how many lists moved.
    pub fn renumber_lists(&mut self, actor: &str, board_id: &str) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::Board(board_id), Capability::Administer)?;
        let changed = position::renumber(&tx, Scope::BoardLists(board_id))?;
        tx.commit()?;
        info!(board = %board_id, changed, "lists renumbered");
        Ok(changed)
    }
}

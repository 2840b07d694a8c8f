use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use serde_json::json;
use tracing::info;

use crate::activity::{self, NewActivity, NewNotification};
use crate::archive::{self, ArchiveTarget};
use crate::commands::content::{load_attachments, load_checklists, load_comments};
use crate::commands::{new_id, require_text};
use crate::db::{
    self, card_from_row, card_member_from_row, get_card_by_id, get_label_by_id, get_list_by_id,
    label_from_row, user_id_exists, CARD_COLUMNS,
};
use crate::error::{map_unique_violation, Error, Result};
use crate::membership::{authorize, board_of, resolve_role, Capability, Target};
use crate::models::{ActionType, Card, CardDetail, CardMember, Label, NewCard, NotificationType, Role};
use crate::position::{self, Scope};
use crate::store::Store;

pub(crate) fn active_cards(conn: &Connection, list_id: &str) -> Result<Vec<Card>> {
    cards_in(conn, list_id, false)
}

fn cards_in(conn: &Connection, list_id: &str, archived: bool) -> Result<Vec<Card>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CARD_COLUMNS} FROM cards WHERE list_id = ?1 AND is_archived = ?2
         ORDER BY position ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![list_id, archived], card_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn card_members(conn: &Connection, card_id: &str) -> Result<Vec<CardMember>> {
    let mut stmt = conn.prepare(
        "SELECT card_id, user_id, assigned_by, assigned_at FROM card_members
         WHERE card_id = ?1 ORDER BY assigned_at ASC, user_id ASC",
    )?;
    let rows = stmt.query_map(params![card_id], card_member_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// User ids assigned to a card.
pub(crate) fn assignee_ids(conn: &Connection, card_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT user_id FROM card_members WHERE card_id = ?1")?;
    let rows = stmt.query_map(params![card_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn card_labels(conn: &Connection, card_id: &str) -> Result<Vec<Label>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.board_id, l.name, l.color, l.created_at
         FROM card_labels cl JOIN labels l ON l.id = cl.label_id
         WHERE cl.card_id = ?1
         ORDER BY cl.created_at ASC, l.id ASC",
    )?;
    let rows = stmt.query_map(params![card_id], label_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn touch(conn: &Connection, card_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE cards SET updated_at = ?1 WHERE id = ?2",
        params![db::now().timestamp_millis(), card_id],
    )?;
    Ok(())
}

fn due_date_action(
    old: Option<DateTime<Utc>>,
    new: Option<DateTime<Utc>>,
) -> Option<ActionType> {
    match (old, new) {
        (None, Some(_)) => Some(ActionType::CardDueDateSet),
        (Some(before), Some(after)) if before != after => Some(ActionType::CardDueDateChanged),
        (Some(_), None) => Some(ActionType::CardDueDateRemoved),
        _ => None,
    }
}

impl Store {
    pub fn create_card(&mut self, actor: &str, input: NewCard) -> Result<Card> {
        let title = require_text("title", &input.title)?;
        position::validate_position(input.position)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::List(&input.list_id), Capability::ModifyContent)?;
        let board_id = board_of(&tx, Target::List(&input.list_id))?;

        let now = db::now();
        let card = Card {
            id: new_id(),
            position: position::place_new(&tx, Scope::ListCards(&input.list_id), input.position)?,
            list_id: input.list_id,
            title,
            description: input.description.trim().to_string(),
            due_date: input.due_date,
            is_completed: false,
            is_archived: false,
            archived_at: None,
            created_by: Some(actor.to_string()),
            created_at: now,
            updated_at: now,
        };
        tx.execute(
            "INSERT INTO cards (id, list_id, title, description, position, due_date, is_completed,
                is_archived, archived_at, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, NULL, ?7, ?8, ?9)",
            params![
                card.id,
                card.list_id,
                card.title,
                card.description,
                card.position,
                card.due_date.map(|due| due.timestamp_millis()),
                card.created_by,
                card.created_at.timestamp_millis(),
                card.updated_at.timestamp_millis()
            ],
        )?;

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CardCreated)
                .board(&board_id)
                .card(&card.id)
                .payload(json!({ "card_title": card.title, "list_id": card.list_id })),
        );

        tx.commit()?;
        info!(card = %card.id, list = %card.list_id, position = card.position, "card created");
        Ok(card)
    }

    pub fn list_cards(&self, actor: &str, list_id: &str, archived: bool) -> Result<Vec<Card>> {
        authorize(&self.conn, actor, Target::List(list_id), Capability::View)?;
        cards_in(&self.conn, list_id, archived)
    }

    pub fn get_card(&self, actor: &str, card_id: &str) -> Result<CardDetail> {
        authorize(&self.conn, actor, Target::Card(card_id), Capability::View)?;
        Ok(CardDetail {
            card: get_card_by_id(&self.conn, card_id)?,
            members: card_members(&self.conn, card_id)?,
            labels: card_labels(&self.conn, card_id)?,
            checklists: load_checklists(&self.conn, card_id)?,
            attachments: load_attachments(&self.conn, card_id)?,
            comments: load_comments(&self.conn, card_id)?,
        })
    }

    pub fn archive_card(&mut self, actor: &str, card_id: &str) -> Result<Card> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;
        let board_id = board_of(&tx, Target::Card(card_id))?;
        archive::archive(&tx, ArchiveTarget::Card(card_id), db::now())?;
        let card = get_card_by_id(&tx, card_id)?;

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CardArchived)
                .board(&board_id)
                .card(card_id)
                .payload(json!({ "card_title": card.title })),
        );

        tx.commit()?;
        info!(card = %card_id, "card archived");
        Ok(card)
    }

    pub fn restore_card(&mut self, actor: &str, card_id: &str) -> Result<Card> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;
        let board_id = board_of(&tx, Target::Card(card_id))?;
        archive::restore(&tx, ArchiveTarget::Card(card_id), db::now())?;
        let card = get_card_by_id(&tx, card_id)?;

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CardRestored)
                .board(&board_id)
                .card(card_id)
                .payload(json!({ "card_title": card.title })),
        );

        tx.commit()?;
        info!(card = %card_id, "card restored");
        Ok(card)
    }

    /// Moves a card to `new_position` in `list_id`.
    ///
    /// Within one list this is a reorder. Across lists a slot is opened in the
    /// destination and the source list keeps the gap.
    ///
    /// `0` is not a literal slot: within one list it is read as the last slot, across
    /// lists it appends after the destination's last card. Positions above
    /// [`MAX_POSITION`](crate::position::MAX_POSITION) are rejected.
    pub fn move_card(
        &mut self,
        actor: &str,
        card_id: &str,
        list_id: &str,
        new_position: i64,
    ) -> Result<Card> {
        position::validate_position(new_position)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;
        authorize(&tx, actor, Target::List(list_id), Capability::ModifyContent)?;
        let card = get_card_by_id(&tx, card_id)?;
        if card.is_archived {
            return Err(Error::invalid("archived cards cannot be moved"));
        }

        let to_position = if card.list_id == list_id {
            let scope = Scope::ListCards(list_id);
            let order = position::load_order(&tx, scope)?;
            let target = order.resolve_move_target(new_position);
            let plan = order.plan_reorder(card_id, target);
            if plan.is_empty() {
                return Ok(card);
            }
            position::apply_plan(&tx, scope, &plan)?;
            target
        } else {
            let target = position::place_new(&tx, Scope::ListCards(list_id), new_position)?;
            tx.execute(
                "UPDATE cards SET list_id = ?1, position = ?2 WHERE id = ?3",
                params![list_id, target, card_id],
            )?;
            target
        };
        touch(&tx, card_id)?;

        let board_id = get_list_by_id(&tx, list_id)?.board_id;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CardMoved)
                .board(&board_id)
                .card(card_id)
                .payload(json!({
                    "card_title": card.title,
                    "from_list_id": card.list_id,
                    "to_list_id": list_id,
                    "from_position": card.position,
                    "to_position": to_position,
                })),
        );

        let moved = get_card_by_id(&tx, card_id)?;
        tx.commit()?;
        info!(card = %card_id, list = %list_id, position = to_position, "card moved");
        Ok(moved)
    }

    /// Assigns a board member to a card and notifies them.
    pub fn assign_card_member(&mut self, actor: &str, card_id: &str, user_id: &str) -> Result<CardMember> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;
        if !user_id_exists(&tx, user_id)? {
            return Err(Error::invalid("user does not exist"));
        }
        if resolve_role(&tx, user_id, Target::Card(card_id))? == Role::None {
            return Err(Error::invalid("user is not a member of this board"));
        }

        let member = CardMember {
            card_id: card_id.to_string(),
            user_id: user_id.to_string(),
            assigned_by: Some(actor.to_string()),
            assigned_at: db::now(),
        };
        tx.execute(
            "INSERT INTO card_members (card_id, user_id, assigned_by, assigned_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                member.card_id,
                member.user_id,
                member.assigned_by,
                member.assigned_at.timestamp_millis()
            ],
        )
        .map_err(|err| map_unique_violation(err, "user is already assigned to this card"))?;

        let card = get_card_by_id(&tx, card_id)?;
        let board_id = board_of(&tx, Target::Card(card_id))?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CardMemberAdded)
                .board(&board_id)
                .card(card_id)
                .payload(json!({ "card_title": card.title, "member_id": user_id })),
        );
        activity::notify(
            self.events.as_ref(),
            &tx,
            NewNotification::new(
                user_id,
                NotificationType::Assignment,
                format!("You were assigned to {}", card.title),
            )
            .board(&board_id)
            .card(card_id)
            .from_user(actor),
        );

        tx.commit()?;
        Ok(member)
    }

    pub fn remove_card_member(&mut self, actor: &str, card_id: &str, user_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;
        let removed = tx.execute(
            "DELETE FROM card_members WHERE card_id = ?1 AND user_id = ?2",
            params![card_id, user_id],
        )?;
        if removed == 0 {
            return Err(Error::NotFound("card member"));
        }

        let board_id = board_of(&tx, Target::Card(card_id))?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CardMemberRemoved)
                .board(&board_id)
                .card(card_id)
                .payload(json!({ "member_id": user_id })),
        );

        tx.commit()?;
        Ok(())
    }

    /// Attaches a label from the card's own board.
    pub fn add_card_label(&mut self, actor: &str, card_id: &str, label_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;
        let board_id = board_of(&tx, Target::Card(card_id))?;
        let label = get_label_by_id(&tx, label_id)?;
        if label.board_id != board_id {
            return Err(Error::invalid("label belongs to a different board"));
        }

        tx.execute(
            "INSERT INTO card_labels (card_id, label_id, created_at) VALUES (?1, ?2, ?3)",
            params![card_id, label_id, db::now().timestamp_millis()],
        )
        .map_err(|err| map_unique_violation(err, "label is already on this card"))?;

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CardLabelAdded)
                .board(&board_id)
                .card(card_id)
                .payload(json!({ "label_id": label.id, "label_name": label.name })),
        );

        tx.commit()?;
        Ok(())
    }

    pub fn remove_card_label(&mut self, actor: &str, card_id: &str, label_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;
        let removed = tx.execute(
            "DELETE FROM card_labels WHERE card_id = ?1 AND label_id = ?2",
            params![card_id, label_id],
        )?;
        if removed == 0 {
            return Err(Error::NotFound("card label"));
        }

        let board_id = board_of(&tx, Target::Card(card_id))?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CardLabelRemoved)
                .board(&board_id)
                .card(card_id)
                .payload(json!({ "label_id": label_id })),
        );

        tx.commit()?;
        Ok(())
    }

    /// Sets or clears the due date. The activity distinguishes set, changed and removed.
    pub fn set_card_due_date(
        &mut self,
        actor: &str,
        card_id: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Card> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;
        let card = get_card_by_id(&tx, card_id)?;
        let Some(action) = due_date_action(card.due_date, due_date) else {
            return Ok(card);
        };

        tx.execute(
            "UPDATE cards SET due_date = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                due_date.map(|due| due.timestamp_millis()),
                db::now().timestamp_millis(),
                card_id
            ],
        )?;
        let board_id = board_of(&tx, Target::Card(card_id))?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, action)
                .board(&board_id)
                .card(card_id)
                .payload(json!({
                    "card_title": card.title,
                    "from": card.due_date,
                    "to": due_date,
                })),
        );

        let updated = get_card_by_id(&tx, card_id)?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn set_card_completed(&mut self, actor: &str, card_id: &str, completed: bool) -> Result<Card> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;
        let card = get_card_by_id(&tx, card_id)?;
        if card.is_completed == completed {
            return Ok(card);
        }

        tx.execute(
            "UPDATE cards SET is_completed = ?1, updated_at = ?2 WHERE id = ?3",
            params![completed, db::now().timestamp_millis(), card_id],
        )?;
        if completed {
            let board_id = board_of(&tx, Target::Card(card_id))?;
            activity::record(
                self.events.as_ref(),
                &tx,
                NewActivity::new(actor, ActionType::CardCompleted)
                    .board(&board_id)
                    .card(card_id)
                    .payload(json!({ "card_title": card.title })),
            );
        }

        let updated = get_card_by_id(&tx, card_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Rewrites the active cards of a list to `1..=N`. Returns how many cards moved.
    pub fn renumber_cards(&mut self, actor: &str, list_id: &str) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::List(list_id), Capability::Administer)?;
        let changed = position::renumber(&tx, Scope::ListCards(list_id))?;
        tx.commit()?;
        info!(list = %list_id, changed, "cards renumbered");
        Ok(changed)
    }
}

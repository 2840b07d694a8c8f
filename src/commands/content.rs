//! Checklists, comments and attachments hanging off a card.

use rusqlite::{params, Connection, TransactionBehavior};
use serde_json::json;

use crate::activity::{self, NewActivity, NewNotification};
use crate::commands::cards::assignee_ids;
use crate::commands::{new_id, require_text};
use crate::db::{
    self, attachment_from_row, checklist_from_row, checklist_item_from_row, comment_from_row,
    get_card_by_id, get_checklist_by_id, get_checklist_item_by_id, get_comment_by_id,
    ATTACHMENT_COLUMNS, CHECKLIST_COLUMNS, CHECKLIST_ITEM_COLUMNS, COMMENT_COLUMNS,
};
use crate::error::{Error, Result};
use crate::membership::{authorize, board_of, Capability, Target};
use crate::models::{
    ActionType, Attachment, Checklist, ChecklistDetail, ChecklistItem, Comment, NewAttachment,
    NotificationType,
};
use crate::position::{self, Scope};
use crate::store::Store;

pub(crate) fn load_checklists(conn: &Connection, card_id: &str) -> Result<Vec<ChecklistDetail>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHECKLIST_COLUMNS} FROM checklists WHERE card_id = ?1 ORDER BY position ASC, id ASC"
    ))?;
    let checklists = stmt
        .query_map(params![card_id], checklist_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut items_stmt = conn.prepare(&format!(
        "SELECT {CHECKLIST_ITEM_COLUMNS} FROM checklist_items WHERE checklist_id = ?1
         ORDER BY position ASC, id ASC"
    ))?;
    checklists
        .into_iter()
        .map(|checklist| -> Result<ChecklistDetail> {
            let items = items_stmt
                .query_map(params![checklist.id], checklist_item_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ChecklistDetail { checklist, items })
        })
        .collect()
}

pub(crate) fn load_comments(conn: &Connection, card_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE card_id = ?1
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map(params![card_id], comment_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn load_attachments(conn: &Connection, card_id: &str) -> Result<Vec<Attachment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE card_id = ?1
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map(params![card_id], attachment_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

impl Store {
    pub fn add_checklist(&mut self, actor: &str, card_id: &str, title: &str) -> Result<Checklist> {
        let title = require_text("title", title)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;

        let checklist = Checklist {
            id: new_id(),
            card_id: card_id.to_string(),
            title,
            position: position::place_new(&tx, Scope::CardChecklists(card_id), 0)?,
            created_at: db::now(),
        };
        tx.execute(
            "INSERT INTO checklists (id, card_id, title, position, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                checklist.id,
                checklist.card_id,
                checklist.title,
                checklist.position,
                checklist.created_at.timestamp_millis()
            ],
        )?;

        let board_id = board_of(&tx, Target::Card(card_id))?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::ChecklistCreated)
                .board(&board_id)
                .card(card_id)
                .payload(json!({ "checklist_title": checklist.title })),
        );

        tx.commit()?;
        Ok(checklist)
    }

    pub fn add_checklist_item(&mut self, actor: &str, checklist_id: &str, title: &str) -> Result<ChecklistItem> {
        let title = require_text("title", title)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        authorize(&tx, actor, Target::Checklist(checklist_id), Capability::ModifyContent)?;

        let item = ChecklistItem {
            id: new_id(),
            checklist_id: checklist_id.to_string(),
            title,
            position: position::place_new(&tx, Scope::ChecklistItems(checklist_id), 0)?,
            is_completed: false,
            completed_at: None,
            completed_by: None,
            created_at: db::now(),
        };
        tx.execute(
            "INSERT INTO checklist_items (id, checklist_id, title, position, is_completed,
                completed_at, completed_by, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, NULL, NULL, ?5)",
            params![
                item.id,
                item.checklist_id,
                item.title,
                item.position,
                item.created_at.timestamp_millis()
            ],
        )?;

        tx.commit()?;
        Ok(item)
    }

    /// Flips completion. `completed_at` and `completed_by` are set together on
    /// completion and cleared together otherwise.
    pub fn toggle_checklist_item(&mut self, actor: &str, item_id: &str) -> Result<ChecklistItem> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::ChecklistItem(item_id), Capability::ModifyContent)?;
        let item = get_checklist_item_by_id(&tx, item_id)?;

        let (action, completed_at, completed_by) = if item.is_completed {
            (ActionType::ChecklistItemUncompleted, None, None)
        } else {
            (
                ActionType::ChecklistItemCompleted,
                Some(db::now().timestamp_millis()),
                Some(actor),
            )
        };
        tx.execute(
            "UPDATE checklist_items SET is_completed = ?1, completed_at = ?2, completed_by = ?3
             WHERE id = ?4",
            params![!item.is_completed, completed_at, completed_by, item_id],
        )?;

        let card_id = get_checklist_by_id(&tx, &item.checklist_id)?.card_id;
        let board_id = board_of(&tx, Target::Card(&card_id))?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, action)
                .board(&board_id)
                .card(&card_id)
                .payload(json!({ "item_id": item.id, "item_title": item.title })),
        );

        let toggled = get_checklist_item_by_id(&tx, item_id)?;
        tx.commit()?;
        Ok(toggled)
    }

    /// Posts a comment and notifies the people assigned to the card.
    pub fn add_comment(&mut self, actor: &str, card_id: &str, content: &str) -> Result<Comment> {
        let content = require_text("content", content)?;
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;

        let now = db::now();
        let comment = Comment {
            id: new_id(),
            card_id: card_id.to_string(),
            user_id: actor.to_string(),
            content,
            is_edited: false,
            created_at: now,
            updated_at: now,
        };
        tx.execute(
            "INSERT INTO comments (id, card_id, user_id, content, is_edited, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
            params![
                comment.id,
                comment.card_id,
                comment.user_id,
                comment.content,
                comment.created_at.timestamp_millis(),
                comment.updated_at.timestamp_millis()
            ],
        )?;

        let card = get_card_by_id(&tx, card_id)?;
        let board_id = board_of(&tx, Target::Card(card_id))?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CommentAdded)
                .board(&board_id)
                .card(card_id)
                .payload(json!({ "comment_id": comment.id, "card_title": card.title })),
        );
        for assignee in assignee_ids(&tx, card_id)? {
            activity::notify(
                self.events.as_ref(),
                &tx,
                NewNotification::new(
                    &assignee,
                    NotificationType::Comment,
                    format!("New comment on {}", card.title),
                )
                .message(comment.content.clone())
                .board(&board_id)
                .card(card_id)
                .from_user(actor),
            );
        }

        tx.commit()?;
        Ok(comment)
    }

    /// Only the author may edit; the comment is flagged as edited.
    pub fn update_comment(&mut self, actor: &str, comment_id: &str, content: &str) -> Result<Comment> {
        let content = require_text("content", content)?;
        let tx = self.conn.transaction()?;
        let comment = get_comment_by_id(&tx, comment_id)?;
        authorize(&tx, actor, Target::Card(&comment.card_id), Capability::View)?;
        if comment.user_id != actor {
            return Err(Error::forbidden("only the author can edit a comment"));
        }

        tx.execute(
            "UPDATE comments SET content = ?1, is_edited = 1, updated_at = ?2 WHERE id = ?3",
            params![content, db::now().timestamp_millis(), comment_id],
        )?;
        let board_id = board_of(&tx, Target::Card(&comment.card_id))?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::CommentUpdated)
                .board(&board_id)
                .card(&comment.card_id)
                .payload(json!({ "comment_id": comment_id })),
        );

        let updated = get_comment_by_id(&tx, comment_id)?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn list_comments(&self, actor: &str, card_id: &str) -> Result<Vec<Comment>> {
        authorize(&self.conn, actor, Target::Card(card_id), Capability::View)?;
        load_comments(&self.conn, card_id)
    }

    /// Stores attachment metadata. The file itself lives elsewhere.
    pub fn add_attachment(&mut self, actor: &str, card_id: &str, input: NewAttachment) -> Result<Attachment> {
        let file_name = require_text("file_name", &input.file_name)?;
        let file_url = require_text("file_url", &input.file_url)?;
        if input.file_size.is_some_and(|size| size < 0) {
            return Err(Error::invalid("file_size must be non-negative"));
        }
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Card(card_id), Capability::ModifyContent)?;

        let attachment = Attachment {
            id: new_id(),
            card_id: card_id.to_string(),
            file_name,
            file_url,
            file_type: input.file_type.trim().to_string(),
            file_size: input.file_size,
            uploaded_by: Some(actor.to_string()),
            created_at: db::now(),
        };
        tx.execute(
            "INSERT INTO attachments (id, card_id, file_name, file_url, file_type, file_size,
                uploaded_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                attachment.id,
                attachment.card_id,
                attachment.file_name,
                attachment.file_url,
                attachment.file_type,
                attachment.file_size,
                attachment.uploaded_by,
                attachment.created_at.timestamp_millis()
            ],
        )?;

        let board_id = board_of(&tx, Target::Card(card_id))?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::AttachmentAdded)
                .board(&board_id)
                .card(card_id)
                .payload(json!({ "file_name": attachment.file_name })),
        );

        tx.commit()?;
        Ok(attachment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBoard, NewCard, NewList, Role};

    struct Fixture {
        store: Store,
        ann: String,
        bob: String,
        card: String,
    }

    fn fixture() -> Fixture {
        let mut store = Store::open_in_memory().expect("store");
        let ann = store.create_user("ann", "ann@example.com").expect("ann").id;
        let bob = store.create_user("bob", "bob@example.com").expect("bob").id;
        let board = store
            .create_board(&ann, NewBoard { name: "Plan".into(), ..Default::default() })
            .expect("board")
            .id;
        store
            .add_board_member(&ann, &board, &bob, Role::Member)
            .expect("bob joins");
        let list = store
            .create_list(&ann, NewList { board_id: board, name: "Todo".into(), position: 0 })
            .expect("list")
            .id;
        let card = store
            .create_card(&ann, NewCard { list_id: list, title: "Ship".into(), ..Default::default() })
            .expect("card")
            .id;
        Fixture { store, ann, bob, card }
    }

    #[test]
    fn checklist_completion_fields_move_together() {
        let mut fx = fixture();
        let checklist = fx.store.add_checklist(&fx.ann, &fx.card, "Release").expect("checklist");
        let item = fx
            .store
            .add_checklist_item(&fx.ann, &checklist.id, "Tag")
            .expect("item");
        assert!(!item.is_completed && item.completed_at.is_none() && item.completed_by.is_none());

        let done = fx.store.toggle_checklist_item(&fx.bob, &item.id).expect("complete");
        assert!(done.is_completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.completed_by.as_deref(), Some(fx.bob.as_str()));

        let undone = fx.store.toggle_checklist_item(&fx.ann, &item.id).expect("uncomplete");
        assert!(!undone.is_completed);
        assert!(undone.completed_at.is_none());
        assert!(undone.completed_by.is_none());
    }

    #[test]
    fn checklists_and_items_append_in_order() {
        let mut fx = fixture();
        let first = fx.store.add_checklist(&fx.ann, &fx.card, "One").expect("one");
        let second = fx.store.add_checklist(&fx.ann, &fx.card, "Two").expect("two");
        assert_eq!((first.position, second.position), (1, 2));

        let items: Vec<ChecklistItem> = ["a", "b", "c"]
            .into_iter()
            .map(|title| fx.store.add_checklist_item(&fx.ann, &first.id, title).expect("item"))
            .collect();
        fx.store.toggle_checklist_item(&fx.ann, &items[0].id).expect("toggle");

        let detail = fx.store.get_card(&fx.ann, &fx.card).expect("detail");
        let positions: Vec<i64> = detail.checklists[0].items.iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(detail.checklists[0].progress(), 33);
        assert_eq!(detail.checklists[1].progress(), 0);
    }

    #[test]
    fn comments_notify_assignees_but_not_the_author() {
        let mut fx = fixture();
        fx.store.assign_card_member(&fx.ann, &fx.card, &fx.bob).expect("assign");
        fx.store.assign_card_member(&fx.ann, &fx.card, &fx.ann).expect("self");
        fx.store.add_comment(&fx.ann, &fx.card, "shipping friday").expect("comment");

        let bob_comments = fx
            .store
            .list_notifications(&fx.bob, None)
            .expect("inbox")
            .into_iter()
            .filter(|n| n.kind == NotificationType::Comment)
            .count();
        assert_eq!(bob_comments, 1);
        assert!(fx.store.list_notifications(&fx.ann, None).expect("own").is_empty());
    }

    #[test]
    fn only_the_author_edits_a_comment() {
        let mut fx = fixture();
        let comment = fx.store.add_comment(&fx.bob, &fx.card, "first").expect("comment");
        assert!(matches!(
            fx.store.update_comment(&fx.ann, &comment.id, "hijack"),
            Err(Error::Forbidden(_))
        ));
        let edited = fx.store.update_comment(&fx.bob, &comment.id, "second").expect("edit");
        assert!(edited.is_edited);
        assert_eq!(edited.content, "second");
        assert_eq!(fx.store.list_comments(&fx.ann, &fx.card).expect("list"), vec![edited]);
    }

    #[test]
    fn observers_cannot_comment() {
        let mut fx = fixture();
        let carol = fx.store.create_user("carol", "c@example.com").expect("carol").id;
        let board = board_of(fx.store.connection(), Target::Card(&fx.card)).expect("board");
        fx.store
            .add_board_member(&fx.ann, &board, &carol, Role::Observer)
            .expect("observer");
        assert!(matches!(
            fx.store.add_comment(&carol, &fx.card, "hi"),
            Err(Error::Forbidden(_))
        ));
        assert!(fx.store.list_comments(&carol, &fx.card).expect("view").is_empty());
    }

    #[test]
    fn attachments_store_metadata_only() {
        let mut fx = fixture();
        let attachment = fx
            .store
            .add_attachment(
                &fx.ann,
                &fx.card,
                NewAttachment {
                    file_name: "roadmap.pdf".into(),
                    file_url: "https://files.example.com/roadmap.pdf".into(),
                    file_type: "application/pdf".into(),
                    file_size: Some(2048),
                },
            )
            .expect("attachment");
        assert_eq!(attachment.uploaded_by.as_deref(), Some(fx.ann.as_str()));
        assert!(matches!(
            fx.store.add_attachment(
                &fx.ann,
                &fx.card,
                NewAttachment { file_name: "x".into(), file_url: "u".into(), file_size: Some(-1), ..Default::default() }
            ),
            Err(Error::Validation(_))
        ));
        assert_eq!(fx.store.get_card(&fx.ann, &fx.card).expect("detail").attachments, vec![attachment]);
    }
}

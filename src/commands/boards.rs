use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

use crate::activity::{self, NewActivity, NewNotification};
use crate::archive::{self, ArchiveTarget};
use crate::commands::workspaces::assignable_role;
use crate::commands::{new_id, require_text, slugify};
use crate::db::{
    self, board_from_row, board_member_from_row, get_board_by_id, label_from_row, user_id_exists,
    BOARD_COLUMNS, LABEL_COLUMNS,
};
use crate::error::{map_unique_violation, Error, Result};
use crate::membership::{authorize, Capability, Target};
use crate::models::{
    ActionType, Board, BoardDetail, BoardFilter, BoardMember, BoardUpdate, Label, NewBoard,
    NotificationType, Role,
};
use crate::store::Store;

const DEFAULT_LABEL_COLOR: &str = "#0079bf";

fn board_slug(name: &str) -> String {
    match slugify(name) {
        slug if slug.is_empty() => "board".to_string(),
        slug => slug,
    }
}

fn load_members(conn: &Connection, board_id: &str) -> Result<Vec<BoardMember>> {
    let mut stmt = conn.prepare(
        "SELECT board_id, user_id, role, joined_at FROM board_members
         WHERE board_id = ?1 ORDER BY joined_at ASC, user_id ASC",
    )?;
    let rows = stmt.query_map(params![board_id], board_member_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn load_labels(conn: &Connection, board_id: &str) -> Result<Vec<Label>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LABEL_COLUMNS} FROM labels WHERE board_id = ?1 ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![board_id], label_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn is_starred(conn: &Connection, board_id: &str, user_id: &str) -> Result<bool> {
    let starred: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM board_stars WHERE board_id = ?1 AND user_id = ?2)",
        params![board_id, user_id],
        |row| row.get(0),
    )?;
    Ok(starred != 0)
}

fn board_member(conn: &Connection, board_id: &str, user_id: &str) -> Result<BoardMember> {
    conn.query_row(
        "SELECT board_id, user_id, role, joined_at FROM board_members
         WHERE board_id = ?1 AND user_id = ?2",
        params![board_id, user_id],
        board_member_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound("board member"))
}

impl Store {
    /// Creates a board with `actor` as its first admin. A board inside a workspace
    /// needs member rights on that workspace.
    pub fn create_board(&mut self, actor: &str, input: NewBoard) -> Result<Board> {
        let name = require_text("name", &input.name)?;
        let tx = self.conn.transaction()?;
        if !user_id_exists(&tx, actor)? {
            return Err(Error::NotFound("user"));
        }
        if let Some(workspace_id) = input.workspace_id.as_deref() {
            authorize(&tx, actor, Target::Workspace(workspace_id), Capability::ModifyContent)?;
        }

        let now = db::now();
        let board = Board {
            id: new_id(),
            workspace_id: input.workspace_id,
            slug: board_slug(&name),
            name,
            description: input.description.trim().to_string(),
            visibility: input.visibility,
            created_by: actor.to_string(),
            is_archived: false,
            archived_at: None,
            created_at: now,
            updated_at: now,
        };

        tx.execute(
            "INSERT INTO boards (id, workspace_id, name, slug, description, visibility, created_by,
                is_archived, archived_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, ?9)",
            params![
                board.id,
                board.workspace_id,
                board.name,
                board.slug,
                board.description,
                board.visibility,
                board.created_by,
                board.created_at.timestamp_millis(),
                board.updated_at.timestamp_millis()
            ],
        )?;
        tx.execute(
            "INSERT INTO board_members (board_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![board.id, actor, Role::Admin, now.timestamp_millis()],
        )?;

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::BoardCreated)
                .board(&board.id)
                .payload(json!({ "board_name": board.name })),
        );

        tx.commit()?;
        info!(board = %board.id, "board created");
        Ok(board)
    }

    /// Boards `actor` is a member of. Active boards unless `filter.archived` says otherwise.
    pub fn list_my_boards(&self, actor: &str, filter: &BoardFilter) -> Result<Vec<Board>> {
        let mut sql = format!(
            "SELECT {BOARD_COLUMNS} FROM boards
             WHERE id IN (SELECT board_id FROM board_members WHERE user_id = ?1)
               AND is_archived = ?2"
        );
        let archived = filter.archived.unwrap_or(false);
        let mut values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(actor.to_string()), Box::new(archived)];
        if let Some(workspace_id) = &filter.workspace_id {
            values.push(Box::new(workspace_id.clone()));
            sql.push_str(&format!(" AND workspace_id = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY updated_at DESC, id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(values.iter().map(|value| value.as_ref())),
            board_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_board(&self, actor: &str, board_id: &str) -> Result<BoardDetail> {
        authorize(&self.conn, actor, Target::Board(board_id), Capability::View)?;
        Ok(BoardDetail {
            board: get_board_by_id(&self.conn, board_id)?,
            is_starred: is_starred(&self.conn, board_id, actor)?,
            members: load_members(&self.conn, board_id)?,
            labels: load_labels(&self.conn, board_id)?,
        })
    }

    pub fn update_board(&mut self, actor: &str, board_id: &str, update: BoardUpdate) -> Result<Board> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Board(board_id), Capability::Administer)?;
        let mut board = get_board_by_id(&tx, board_id)?;

        let mut changed = Vec::new();
        if let Some(name) = update.name.as_deref() {
            board.name = require_text("name", name)?;
            board.slug = board_slug(&board.name);
            changed.push("name");
        }
        if let Some(description) = update.description.as_deref() {
            board.description = description.trim().to_string();
            changed.push("description");
        }
        if let Some(visibility) = update.visibility {
            board.visibility = visibility;
            changed.push("visibility");
        }
        if changed.is_empty() {
            return Ok(board);
        }
        board.updated_at = db::now();

        tx.execute(
            "UPDATE boards SET name = ?1, slug = ?2, description = ?3, visibility = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                board.name,
                board.slug,
                board.description,
                board.visibility,
                board.updated_at.timestamp_millis(),
                board.id
            ],
        )?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::BoardUpdated)
                .board(board_id)
                .payload(json!({ "fields": changed })),
        );

        tx.commit()?;
        Ok(board)
    }

    pub fn archive_board(&mut self, actor: &str, board_id: &str) -> Result<Board> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Board(board_id), Capability::Administer)?;
        archive::archive(&tx, ArchiveTarget::Board(board_id), db::now())?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::BoardArchived).board(board_id),
        );
        let board = get_board_by_id(&tx, board_id)?;
        tx.commit()?;
        info!(board = %board_id, "board archived");
        Ok(board)
    }

    pub fn restore_board(&mut self, actor: &str, board_id: &str) -> Result<Board> {
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Board(board_id), Capability::Administer)?;
        archive::restore(&tx, ArchiveTarget::Board(board_id), db::now())?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::BoardRestored).board(board_id),
        );
        let board = get_board_by_id(&tx, board_id)?;
        tx.commit()?;
        info!(board = %board_id, "board restored");
        Ok(board)
    }

    pub fn star_board(&mut self, actor: &str, board_id: &str) -> Result<()> {
        authorize(&self.conn, actor, Target::Board(board_id), Capability::View)?;
        self.conn
            .execute(
                "INSERT INTO board_stars (board_id, user_id, starred_at) VALUES (?1, ?2, ?3)",
                params![board_id, actor, db::now().timestamp_millis()],
            )
            .map_err(|err| map_unique_violation(err, "board is already starred"))?;
        Ok(())
    }

    pub fn unstar_board(&mut self, actor: &str, board_id: &str) -> Result<()> {
        authorize(&self.conn, actor, Target::Board(board_id), Capability::View)?;
        let removed = self.conn.execute(
            "DELETE FROM board_stars WHERE board_id = ?1 AND user_id = ?2",
            params![board_id, actor],
        )?;
        if removed == 0 {
            return Err(Error::invalid("board is not starred"));
        }
        Ok(())
    }

    /// Starred boards the user can still see, most recently starred first.
    pub fn list_starred_boards(&self, actor: &str) -> Result<Vec<Board>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.workspace_id, b.name, b.slug, b.description, b.visibility,
                    b.created_by, b.is_archived, b.archived_at, b.created_at, b.updated_at
             FROM board_stars s
             JOIN boards b ON b.id = s.board_id
             JOIN board_members m ON m.board_id = b.id AND m.user_id = s.user_id
             WHERE s.user_id = ?1
             ORDER BY s.starred_at DESC, b.id ASC",
        )?;
        let rows = stmt.query_map(params![actor], board_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn add_board_member(
        &mut self,
        actor: &str,
        board_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<BoardMember> {
        let role = assignable_role(role)?;
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Board(board_id), Capability::Administer)?;
        if !user_id_exists(&tx, user_id)? {
            return Err(Error::invalid("user does not exist"));
        }

        let member = BoardMember {
            board_id: board_id.to_string(),
            user_id: user_id.to_string(),
            role,
            joined_at: db::now(),
        };
        tx.execute(
            "INSERT INTO board_members (board_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                member.board_id,
                member.user_id,
                member.role,
                member.joined_at.timestamp_millis()
            ],
        )
        .map_err(|err| map_unique_violation(err, "user is already a board member"))?;

        let board = get_board_by_id(&tx, board_id)?;
        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::BoardMemberAdded)
                .board(board_id)
                .payload(json!({ "member_id": user_id, "role": role })),
        );
        activity::notify(
            self.events.as_ref(),
            &tx,
            NewNotification::new(
                user_id,
                NotificationType::BoardInvite,
                format!("You were added to {}", board.name),
            )
            .board(board_id)
            .from_user(actor),
        );

        tx.commit()?;
        info!(board = %board_id, user = %user_id, role = %role, "board member added");
        Ok(member)
    }

    /// Removes a board membership. The board creator can never be removed.
    pub fn remove_board_member(&mut self, actor: &str, board_id: &str, user_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        let board = get_board_by_id(&tx, board_id)?;
        if board.created_by == user_id {
            return Err(Error::conflict("cannot remove the board creator"));
        }
        authorize(&tx, actor, Target::Board(board_id), Capability::Administer)?;

        let removed = tx.execute(
            "DELETE FROM board_members WHERE board_id = ?1 AND user_id = ?2",
            params![board_id, user_id],
        )?;
        if removed == 0 {
            return Err(Error::NotFound("board member"));
        }

        activity::record(
            self.events.as_ref(),
            &tx,
            NewActivity::new(actor, ActionType::BoardMemberRemoved)
                .board(board_id)
                .payload(json!({ "member_id": user_id })),
        );

        tx.commit()?;
        info!(board = %board_id, user = %user_id, "board member removed");
        Ok(())
    }

    /// Changes a member's role. The creator always stays admin.
    pub fn update_board_member_role(
        &mut self,
        actor: &str,
        board_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<BoardMember> {
        let role = assignable_role(role)?;
        let tx = self.conn.transaction()?;
        if get_board_by_id(&tx, board_id)?.created_by == user_id {
            return Err(Error::conflict("cannot change the board creator's role"));
        }
        authorize(&tx, actor, Target::Board(board_id), Capability::Administer)?;

        let updated = tx.execute(
            "UPDATE board_members SET role = ?1 WHERE board_id = ?2 AND user_id = ?3",
            params![role, board_id, user_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound("board member"));
        }
        let member = board_member(&tx, board_id, user_id)?;

        tx.commit()?;
        Ok(member)
    }

    pub fn create_label(&mut self, actor: &str, board_id: &str, name: &str, color: &str) -> Result<Label> {
        authorize(&self.conn, actor, Target::Board(board_id), Capability::ModifyContent)?;
        let color = match color.trim() {
            "" => DEFAULT_LABEL_COLOR.to_string(),
            value => value.to_string(),
        };
        let label = Label {
            id: new_id(),
            board_id: board_id.to_string(),
            name: name.trim().to_string(),
            color,
            created_at: db::now(),
        };
        self.conn.execute(
            "INSERT INTO labels (id, board_id, name, color, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                label.id,
                label.board_id,
                label.name,
                label.color,
                label.created_at.timestamp_millis()
            ],
        )?;
        Ok(label)
    }

    pub fn list_labels(&self, actor: &str, board_id: &str) -> Result<Vec<Label>> {
        authorize(&self.conn, actor, Target::Board(board_id), Capability::View)?;
        load_labels(&self.conn, board_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityFilter, NewWorkspace, Visibility};

    fn setup() -> (Store, String, String) {
        let mut store = Store::open_in_memory().expect("store");
        let ann = store.create_user("ann", "ann@example.com").expect("ann").id;
        let bob = store.create_user("bob", "bob@example.com").expect("bob").id;
        (store, ann, bob)
    }

    fn board(store: &mut Store, actor: &str, name: &str) -> Board {
        store
            .create_board(actor, NewBoard { name: name.into(), ..Default::default() })
            .expect("board")
    }

    #[test]
    fn creator_is_admin_and_activity_is_logged() {
        let (mut store, ann, _) = setup();
        let created = board(&mut store, &ann, "Road Map");
        assert_eq!(created.slug, "road-map");

        let detail = store.get_board(&ann, &created.id).expect("detail");
        assert_eq!(detail.members.len(), 1);
        assert_eq!(detail.members[0].role, Role::Admin);
        assert!(!detail.is_starred);

        let log = store
            .list_activities(&ann, &ActivityFilter::default())
            .expect("activities");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action_type, ActionType::BoardCreated);
    }

    #[test]
    fn workspace_observers_cannot_create_boards_there() {
        let (mut store, ann, bob) = setup();
        let ws = store
            .create_workspace(&ann, NewWorkspace { name: "Ops".into(), ..Default::default() })
            .expect("ws");
        store
            .add_workspace_member(&ann, &ws.id, &bob, Role::Observer)
            .expect("observer");

        let err = store
            .create_board(
                &bob,
                NewBoard { name: "Mine".into(), workspace_id: Some(ws.id.clone()), ..Default::default() },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        store
            .update_workspace_member_role(&ann, &ws.id, &bob, Role::Member)
            .expect("promote");
        let created = store
            .create_board(
                &bob,
                NewBoard { name: "Mine".into(), workspace_id: Some(ws.id.clone()), ..Default::default() },
            )
            .expect("member creates");
        assert_eq!(created.workspace_id.as_deref(), Some(ws.id.as_str()));
    }

    #[test]
    fn workspace_role_does_not_open_boards() {
        let (mut store, ann, bob) = setup();
        let ws = store
            .create_workspace(&ann, NewWorkspace { name: "Ops".into(), ..Default::default() })
            .expect("ws");
        store
            .add_workspace_member(&ann, &ws.id, &bob, Role::Admin)
            .expect("admin");
        let created = store
            .create_board(
                &ann,
                NewBoard { name: "Private".into(), workspace_id: Some(ws.id), ..Default::default() },
            )
            .expect("board");

        let err = store.get_board(&bob, &created.id).unwrap_err();
        assert!(matches!(err, Error::NotFound("board")));
    }

    #[test]
    fn archive_filters_board_listing() {
        let (mut store, ann, _) = setup();
        let keep = board(&mut store, &ann, "Keep");
        let old = board(&mut store, &ann, "Old");
        store.archive_board(&ann, &old.id).expect("archive");

        let active = store.list_my_boards(&ann, &BoardFilter::default()).expect("active");
        assert_eq!(active.iter().map(|b| b.id.as_str()).collect::<Vec<_>>(), vec![keep.id.as_str()]);

        let archived = store
            .list_my_boards(&ann, &BoardFilter { archived: Some(true), ..Default::default() })
            .expect("archived");
        assert_eq!(archived.len(), 1);
        assert!(archived[0].archived_at.is_some());

        let restored = store.restore_board(&ann, &old.id).expect("restore");
        assert!(!restored.is_archived);
        assert!(restored.archived_at.is_none());
    }

    #[test]
    fn members_cannot_archive_boards() {
        let (mut store, ann, bob) = setup();
        let created = board(&mut store, &ann, "Team");
        store
            .add_board_member(&ann, &created.id, &bob, Role::Member)
            .expect("member");
        let err = store.archive_board(&bob, &created.id).unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn stars_are_per_user() {
        let (mut store, ann, bob) = setup();
        let created = board(&mut store, &ann, "Team");
        store
            .add_board_member(&ann, &created.id, &bob, Role::Observer)
            .expect("observer");

        store.star_board(&bob, &created.id).expect("star");
        assert!(matches!(store.star_board(&bob, &created.id), Err(Error::Conflict(_))));
        assert!(store.get_board(&bob, &created.id).expect("detail").is_starred);
        assert!(!store.get_board(&ann, &created.id).expect("detail").is_starred);
        assert_eq!(store.list_starred_boards(&bob).expect("stars").len(), 1);

        store.unstar_board(&bob, &created.id).expect("unstar");
        assert!(matches!(store.unstar_board(&bob, &created.id), Err(Error::Validation(_))));
    }

    #[test]
    fn board_invite_notifies_the_new_member() {
        let (mut store, ann, bob) = setup();
        let created = board(&mut store, &ann, "Team");
        store
            .add_board_member(&ann, &created.id, &bob, Role::Member)
            .expect("add");
        let inbox = store.list_notifications(&bob, None).expect("inbox");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::BoardInvite);
        assert_eq!(inbox[0].related_user_id.as_deref(), Some(ann.as_str()));
        assert!(store.list_notifications(&ann, None).expect("own").is_empty());
    }

    #[test]
    fn creator_removal_conflicts_for_any_caller() {
        let (mut store, ann, bob) = setup();
        let created = board(&mut store, &ann, "Team");
        store
            .add_board_member(&ann, &created.id, &bob, Role::Admin)
            .expect("add");
        assert!(matches!(
            store.remove_board_member(&bob, &created.id, &ann),
            Err(Error::Conflict(_))
        ));
        store
            .remove_board_member(&ann, &created.id, &bob)
            .expect("remove");
        assert!(matches!(
            store.remove_board_member(&ann, &created.id, &bob),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn update_changes_only_given_fields() {
        let (mut store, ann, _) = setup();
        let created = board(&mut store, &ann, "Team");
        let updated = store
            .update_board(
                &ann,
                &created.id,
                BoardUpdate { visibility: Some(Visibility::Public), ..Default::default() },
            )
            .expect("update");
        assert_eq!(updated.name, "Team");
        assert_eq!(updated.visibility, Visibility::Public);
        assert!(matches!(
            store.update_board(
                &ann,
                &created.id,
                BoardUpdate { name: Some("  ".into()), ..Default::default() }
            ),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn labels_default_their_color() {
        let (mut store, ann, _) = setup();
        let created = board(&mut store, &ann, "Team");
        let label = store.create_label(&ann, &created.id, "Bug", "").expect("label");
        assert_eq!(label.color, DEFAULT_LABEL_COLOR);
        assert_eq!(store.list_labels(&ann, &created.id).expect("labels"), vec![label]);
    }
}

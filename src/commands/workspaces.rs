use rusqlite::{params, Connection};
use tracing::info;

use crate::activity::{self, NewNotification};
use crate::commands::{new_id, require_text, slugify};
use crate::db::{
    self, get_workspace_by_id, user_id_exists, workspace_from_row, workspace_member_from_row,
    WORKSPACE_COLUMNS,
};
use crate::error::{map_unique_violation, Error, Result};
use crate::membership::{authorize, Capability, Target};
use crate::models::{NewWorkspace, NotificationType, Role, Workspace, WorkspaceDetail, WorkspaceMember};
use crate::store::Store;

/// First free slug among `base`, `base-1`, `base-2`, ...
fn unique_workspace_slug(conn: &Connection, name: &str) -> Result<String> {
    let base = match slugify(name) {
        slug if slug.is_empty() => "workspace".to_string(),
        slug => slug,
    };
    let mut slug = base.clone();
    let mut counter = 1;
    loop {
        let taken: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM workspaces WHERE slug = ?1)",
            params![slug],
            |row| row.get(0),
        )?;
        if taken == 0 {
            return Ok(slug);
        }
        slug = format!("{base}-{counter}");
        counter += 1;
    }
}

pub(crate) fn assignable_role(role: Role) -> Result<Role> {
    if role == Role::None {
        return Err(Error::invalid("role must be admin, member or observer"));
    }
    Ok(role)
}

fn load_members(conn: &Connection, workspace_id: &str) -> Result<Vec<WorkspaceMember>> {
    let mut stmt = conn.prepare(
        "SELECT workspace_id, user_id, role, joined_at FROM workspace_members
         WHERE workspace_id = ?1 ORDER BY joined_at ASC, user_id ASC",
    )?;
    let rows = stmt.query_map(params![workspace_id], workspace_member_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

impl Store {
    /// Creates a workspace owned by `actor`, who also becomes its first admin.
    pub fn create_workspace(&mut self, actor: &str, input: NewWorkspace) -> Result<Workspace> {
        let name = require_text("name", &input.name)?;
        let tx = self.conn.transaction()?;
        if !user_id_exists(&tx, actor)? {
            return Err(Error::NotFound("user"));
        }

        let now = db::now();
        let workspace = Workspace {
            id: new_id(),
            slug: unique_workspace_slug(&tx, &name)?,
            name,
            description: input.description.trim().to_string(),
            owner_id: actor.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        tx.execute(
            "INSERT INTO workspaces (id, name, slug, description, owner_id, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                workspace.id,
                workspace.name,
                workspace.slug,
                workspace.description,
                workspace.owner_id,
                workspace.is_active,
                workspace.created_at.timestamp_millis(),
                workspace.updated_at.timestamp_millis()
            ],
        )?;
        tx.execute(
            "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![workspace.id, actor, Role::Admin, now.timestamp_millis()],
        )?;

        tx.commit()?;
        info!(workspace = %workspace.id, slug = %workspace.slug, "workspace created");
        Ok(workspace)
    }

    pub fn list_my_workspaces(&self, actor: &str) -> Result<Vec<Workspace>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces
             WHERE id IN (SELECT workspace_id FROM workspace_members WHERE user_id = ?1)
             ORDER BY created_at DESC, id ASC"
        ))?;
        let rows = stmt.query_map(params![actor], workspace_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_workspace(&self, actor: &str, workspace_id: &str) -> Result<WorkspaceDetail> {
        authorize(&self.conn, actor, Target::Workspace(workspace_id), Capability::View)?;
        Ok(WorkspaceDetail {
            workspace: get_workspace_by_id(&self.conn, workspace_id)?,
            members: load_members(&self.conn, workspace_id)?,
        })
    }

    pub fn add_workspace_member(
        &mut self,
        actor: &str,
        workspace_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<WorkspaceMember> {
        let role = assignable_role(role)?;
        let tx = self.conn.transaction()?;
        authorize(&tx, actor, Target::Workspace(workspace_id), Capability::Administer)?;
        if !user_id_exists(&tx, user_id)? {
            return Err(Error::invalid("user does not exist"));
        }

        let member = WorkspaceMember {
            workspace_id: workspace_id.to_string(),
            user_id: user_id.to_string(),
            role,
            joined_at: db::now(),
        };
        tx.execute(
            "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                member.workspace_id,
                member.user_id,
                member.role,
                member.joined_at.timestamp_millis()
            ],
        )
        .map_err(|err| map_unique_violation(err, "user is already a member"))?;

        let workspace = get_workspace_by_id(&tx, workspace_id)?;
        activity::notify(
            self.events.as_ref(),
            &tx,
            NewNotification::new(
                user_id,
                NotificationType::WorkspaceInvite,
                format!("You were added to {}", workspace.name),
            )
            .from_user(actor),
        );

        tx.commit()?;
        info!(workspace = %workspace_id, user = %user_id, role = %role, "workspace member added");
        Ok(member)
    }

    /// Removes a membership. The owner can never be removed.
    pub fn remove_workspace_member(
        &mut self,
        actor: &str,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        let workspace = get_workspace_by_id(&tx, workspace_id)?;
        if workspace.owner_id == user_id {
            return Err(Error::conflict("cannot remove the workspace owner"));
        }
        authorize(&tx, actor, Target::Workspace(workspace_id), Capability::Administer)?;

        let removed = tx.execute(
            "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, user_id],
        )?;
        if removed == 0 {
            return Err(Error::NotFound("workspace member"));
        }

        activity::notify(
            self.events.as_ref(),
            &tx,
            NewNotification::new(
                user_id,
                NotificationType::MemberRemoved,
                format!("You were removed from {}", workspace.name),
            )
            .from_user(actor),
        );

        tx.commit()?;
        info!(workspace = %workspace_id, user = %user_id, "workspace member removed");
        Ok(())
    }

    /// Changes a member's role. The owner always stays admin.
    pub fn update_workspace_member_role(
        &mut self,
        actor: &str,
        workspace_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<WorkspaceMember> {
        let role = assignable_role(role)?;
        let tx = self.conn.transaction()?;
        if get_workspace_by_id(&tx, workspace_id)?.owner_id == user_id {
            return Err(Error::conflict("cannot change the workspace owner's role"));
        }
        authorize(&tx, actor, Target::Workspace(workspace_id), Capability::Administer)?;

        let updated = tx.execute(
            "UPDATE workspace_members SET role = ?1 WHERE workspace_id = ?2 AND user_id = ?3",
            params![role, workspace_id, user_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound("workspace member"));
        }
        let member = tx.query_row(
            "SELECT workspace_id, user_id, role, joined_at FROM workspace_members
             WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, user_id],
            workspace_member_from_row,
        )?;

        tx.commit()?;
        info!(workspace = %workspace_id, user = %user_id, role = %role, "workspace role updated");
        Ok(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Store, String, String) {
        let mut store = Store::open_in_memory().expect("store");
        let owner = store.create_user("owner", "o@example.com").expect("owner").id;
        let other = store.create_user("other", "x@example.com").expect("other").id;
        (store, owner, other)
    }

    #[test]
    fn slugs_are_deduplicated() {
        let (mut store, owner, _) = setup();
        let first = store
            .create_workspace(&owner, NewWorkspace { name: "Acme Corp".into(), ..Default::default() })
            .expect("first");
        let second = store
            .create_workspace(&owner, NewWorkspace { name: "Acme corp".into(), ..Default::default() })
            .expect("second");
        let third = store
            .create_workspace(&owner, NewWorkspace { name: "ACME  corp".into(), ..Default::default() })
            .expect("third");
        assert_eq!(first.slug, "acme-corp");
        assert_eq!(second.slug, "acme-corp-1");
        assert_eq!(third.slug, "acme-corp-2");
    }

    #[test]
    fn owner_becomes_admin() {
        let (mut store, owner, _) = setup();
        let ws = store
            .create_workspace(&owner, NewWorkspace { name: "Ops".into(), ..Default::default() })
            .expect("create");
        let detail = store.get_workspace(&owner, &ws.id).expect("detail");
        assert_eq!(detail.members.len(), 1);
        assert_eq!(detail.members[0].role, Role::Admin);
        assert_eq!(store.list_my_workspaces(&owner).expect("mine").len(), 1);
    }

    #[test]
    fn add_member_validates_user_and_duplicates() {
        let (mut store, owner, other) = setup();
        let ws = store
            .create_workspace(&owner, NewWorkspace { name: "Ops".into(), ..Default::default() })
            .expect("create");

        let err = store
            .add_workspace_member(&owner, &ws.id, "ghost", Role::Member)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        store
            .add_workspace_member(&owner, &ws.id, &other, Role::Observer)
            .expect("add");
        let err = store
            .add_workspace_member(&owner, &ws.id, &other, Role::Member)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn only_admins_manage_members() {
        let (mut store, owner, other) = setup();
        let third = store.create_user("third", "t@example.com").expect("third").id;
        let ws = store
            .create_workspace(&owner, NewWorkspace { name: "Ops".into(), ..Default::default() })
            .expect("create");
        store
            .add_workspace_member(&owner, &ws.id, &other, Role::Member)
            .expect("add");

        let err = store
            .add_workspace_member(&other, &ws.id, &third, Role::Member)
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let err = store
            .add_workspace_member(&third, &ws.id, &other, Role::Member)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let updated = store
            .update_workspace_member_role(&owner, &ws.id, &other, Role::Admin)
            .expect("promote");
        assert_eq!(updated.role, Role::Admin);
        store
            .add_workspace_member(&other, &ws.id, &third, Role::Member)
            .expect("new admin adds");
    }

    #[test]
    fn owner_cannot_be_removed_even_by_another_admin() {
        let (mut store, owner, other) = setup();
        let ws = store
            .create_workspace(&owner, NewWorkspace { name: "Ops".into(), ..Default::default() })
            .expect("create");
        store
            .add_workspace_member(&owner, &ws.id, &other, Role::Admin)
            .expect("add");

        let err = store.remove_workspace_member(&other, &ws.id, &owner).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let err = store.remove_workspace_member(&owner, &ws.id, &owner).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        store
            .remove_workspace_member(&owner, &ws.id, &other)
            .expect("remove other");
        assert_eq!(store.get_workspace(&owner, &ws.id).expect("detail").members.len(), 1);
    }

    #[test]
    fn none_is_not_an_assignable_role() {
        let (mut store, owner, other) = setup();
        let ws = store
            .create_workspace(&owner, NewWorkspace { name: "Ops".into(), ..Default::default() })
            .expect("create");
        let err = store
            .add_workspace_member(&owner, &ws.id, &other, Role::None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

use rusqlite::params;

use crate::db::{self, get_notification_by_id, notification_from_row, NOTIFICATION_COLUMNS};
use crate::error::{Error, Result};
use crate::models::Notification;
use crate::store::Store;

impl Store {
    /// Newest first. `is_read` narrows to read or unread notifications.
    pub fn list_notifications(&self, user_id: &str, is_read: Option<bool>) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id = ?1 AND (?2 IS NULL OR is_read = ?2)
             ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, is_read], notification_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn unread_count(&self, user_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn mark_read(&mut self, user_id: &str, notification_id: &str) -> Result<Notification> {
        self.set_read(user_id, notification_id, true)
    }

    pub fn mark_unread(&mut self, user_id: &str, notification_id: &str) -> Result<Notification> {
        self.set_read(user_id, notification_id, false)
    }

    /// Marks every unread notification of `user_id` as read. Returns how many changed.
    pub fn mark_all_read(&mut self, user_id: &str) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = ?1 WHERE user_id = ?2 AND is_read = 0",
            params![db::now().timestamp_millis(), user_id],
        )?;
        Ok(changed)
    }

    /// Deletes all of the user's notifications.
    pub fn clear_notifications(&mut self, user_id: &str) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM notifications WHERE user_id = ?1", params![user_id])?;
        Ok(removed)
    }

    fn set_read(&mut self, user_id: &str, notification_id: &str, read: bool) -> Result<Notification> {
        let tx = self.conn.transaction()?;
        let notification = get_notification_by_id(&tx, notification_id)?;
        // Someone else's notification reads as missing.
        if notification.user_id != user_id {
            return Err(Error::NotFound("notification"));
        }
        let read_at = read.then(|| db::now().timestamp_millis());
        tx.execute(
            "UPDATE notifications SET is_read = ?1, read_at = ?2 WHERE id = ?3",
            params![read, read_at, notification_id],
        )?;
        let updated = get_notification_by_id(&tx, notification_id)?;
        tx.commit()?;
        Ok(updated)
    }
}

//! Activity log and notification emission.
//!
//! Mutating operations report what happened through an [`EventSink`]. Emission is a
//! side channel: a failing sink is logged and ignored, and never fails or rolls back
//! the operation that triggered it.

use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::db::{self, activity_from_row, ACTIVITY_COLUMNS};
use crate::error::Result;
use crate::models::{Activity, ActivityFilter, ActionType, NotificationType};
use crate::store::Store;

pub const ACTIVITY_PAGE_LIMIT: i64 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub user_id: String,
    pub action_type: ActionType,
    pub board_id: Option<String>,
    pub card_id: Option<String>,
    pub payload: Value,
}

impl NewActivity {
    pub fn new(user_id: &str, action_type: ActionType) -> Self {
        NewActivity {
            user_id: user_id.to_string(),
            action_type,
            board_id: None,
            card_id: None,
            payload: Value::Object(Default::default()),
        }
    }

    pub fn board(mut self, board_id: &str) -> Self {
        self.board_id = Some(board_id.to_string());
        self
    }

    pub fn card(mut self, card_id: &str) -> Self {
        self.card_id = Some(card_id.to_string());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: String,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub related_board_id: Option<String>,
    pub related_card_id: Option<String>,
    pub related_user_id: Option<String>,
}

impl NewNotification {
    pub fn new(user_id: &str, kind: NotificationType, title: impl Into<String>) -> Self {
        NewNotification {
            user_id: user_id.to_string(),
            kind,
            title: title.into(),
            message: String::new(),
            related_board_id: None,
            related_card_id: None,
            related_user_id: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn board(mut self, board_id: &str) -> Self {
        self.related_board_id = Some(board_id.to_string());
        self
    }

    pub fn card(mut self, card_id: &str) -> Self {
        self.related_card_id = Some(card_id.to_string());
        self
    }

    pub fn from_user(mut self, user_id: &str) -> Self {
        self.related_user_id = Some(user_id.to_string());
        self
    }
}

/// Destination for activity entries and notifications.
///
/// The sink receives the connection of the running operation so a store-backed sink
/// can write in the same transaction.
pub trait EventSink {
    fn record_activity(&self, conn: &Connection, activity: &NewActivity) -> Result<()>;

    fn notify(&self, conn: &Connection, notification: &NewNotification) -> Result<()>;
}

/// Writes to the `activities` and `notifications` tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteEventSink;

impl EventSink for SqliteEventSink {
    fn record_activity(&self, conn: &Connection, activity: &NewActivity) -> Result<()> {
        conn.execute(
            "INSERT INTO activities (id, user_id, action_type, board_id, card_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                activity.user_id,
                activity.action_type,
                activity.board_id,
                activity.card_id,
                serde_json::to_string(&activity.payload)?,
                db::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn notify(&self, conn: &Connection, notification: &NewNotification) -> Result<()> {
        conn.execute(
            "INSERT INTO notifications (id, user_id, type, title, message, related_board_id,
                related_card_id, related_user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                Uuid::new_v4().to_string(),
                notification.user_id,
                notification.kind,
                notification.title,
                notification.message,
                notification.related_board_id,
                notification.related_card_id,
                notification.related_user_id,
                db::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }
}

/// Records `activity`, logging instead of failing when the sink errors.
pub(crate) fn record(sink: &dyn EventSink, conn: &Connection, activity: NewActivity) {
    if let Err(err) = sink.record_activity(conn, &activity) {
        warn!(
            action = %activity.action_type,
            user = %activity.user_id,
            error = %err,
            "activity not recorded"
        );
    }
}

/// Delivers `notification` unless the recipient triggered it themselves.
pub(crate) fn notify(sink: &dyn EventSink, conn: &Connection, notification: NewNotification) {
    if notification.related_user_id.as_deref() == Some(notification.user_id.as_str()) {
        return;
    }
    if let Err(err) = sink.notify(conn, &notification) {
        warn!(
            kind = %notification.kind,
            user = %notification.user_id,
            error = %err,
            "notification not created"
        );
    }
}

impl Store {
    /// Newest activity on boards `user_id` belongs to, capped at [`ACTIVITY_PAGE_LIMIT`].
    pub fn list_activities(&self, user_id: &str, filter: &ActivityFilter) -> Result<Vec<Activity>> {
        let mut sql = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities a
             WHERE a.board_id IN (SELECT board_id FROM board_members WHERE user_id = ?1)"
        );
        let mut values: Vec<String> = vec![user_id.to_string()];
        if let Some(board_id) = &filter.board_id {
            values.push(board_id.clone());
            sql.push_str(&format!(" AND a.board_id = ?{}", values.len()));
        }
        if let Some(card_id) = &filter.card_id {
            values.push(card_id.clone());
            sql.push_str(&format!(" AND a.card_id = ?{}", values.len()));
        }
        sql.push_str(&format!(
            " ORDER BY a.created_at DESC, a.rowid DESC LIMIT {ACTIVITY_PAGE_LIMIT}"
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), activity_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn record_activity(&self, _conn: &Connection, _activity: &NewActivity) -> Result<()> {
            Err(Error::invalid("sink offline"))
        }

        fn notify(&self, _conn: &Connection, _notification: &NewNotification) -> Result<()> {
            Err(Error::invalid("sink offline"))
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        notifications: RefCell<Vec<NewNotification>>,
    }

    impl EventSink for CapturingSink {
        fn record_activity(&self, _conn: &Connection, _activity: &NewActivity) -> Result<()> {
            Ok(())
        }

        fn notify(&self, _conn: &Connection, notification: &NewNotification) -> Result<()> {
            self.notifications.borrow_mut().push(notification.clone());
            Ok(())
        }
    }

    #[test]
    fn failing_sink_is_swallowed() {
        let conn = db::open_in_memory().expect("open");
        record(
            &FailingSink,
            &conn,
            NewActivity::new("u1", ActionType::BoardCreated),
        );
        notify(
            &FailingSink,
            &conn,
            NewNotification::new("u1", NotificationType::Mention, "hi"),
        );
    }

    #[test]
    fn self_notifications_are_dropped() {
        let conn = db::open_in_memory().expect("open");
        let sink = CapturingSink::default();
        notify(
            &sink,
            &conn,
            NewNotification::new("u1", NotificationType::Assignment, "assigned").from_user("u1"),
        );
        notify(
            &sink,
            &conn,
            NewNotification::new("u2", NotificationType::Assignment, "assigned").from_user("u1"),
        );
        let delivered = sink.notifications.borrow();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].user_id, "u2");
    }

    #[test]
    fn sqlite_sink_rejects_unknown_actor_without_panicking() {
        let conn = db::open_in_memory().expect("open");
        let err = SqliteEventSink
            .record_activity(&conn, &NewActivity::new("ghost", ActionType::CardCreated))
            .unwrap_err();
        assert!(matches!(err, Error::Sql(_)));
    }
}

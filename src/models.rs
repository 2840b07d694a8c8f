use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Declares a closed enum stored as snake_case text, with parsing and SQLite conversions.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::invalid(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|err: Error| FromSqlError::Other(err.to_string().into()))
            }
        }
    };
}

text_enum! {
    /// Effective role of a user on a workspace or board. `None` means no membership row.
    Role {
        Admin => "admin",
        Member => "member",
        Observer => "observer",
        None => "none",
    }
}

text_enum! {
    Visibility {
        Private => "private",
        Workspace => "workspace",
        Public => "public",
    }
}

text_enum! {
    ActionType {
        BoardCreated => "board_created",
        BoardUpdated => "board_updated",
        BoardArchived => "board_archived",
        BoardRestored => "board_restored",
        BoardMemberAdded => "board_member_added",
        BoardMemberRemoved => "board_member_removed",
        ListCreated => "list_created",
        ListMoved => "list_moved",
        ListArchived => "list_archived",
        ListRestored => "list_restored",
        CardCreated => "card_created",
        CardMoved => "card_moved",
        CardArchived => "card_archived",
        CardRestored => "card_restored",
        CardCompleted => "card_completed",
        CardMemberAdded => "card_member_added",
        CardMemberRemoved => "card_member_removed",
        CardLabelAdded => "card_label_added",
        CardLabelRemoved => "card_label_removed",
        CardDueDateSet => "card_due_date_set",
        CardDueDateChanged => "card_due_date_changed",
        CardDueDateRemoved => "card_due_date_removed",
        ChecklistCreated => "checklist_created",
        ChecklistItemCompleted => "checklist_item_completed",
        ChecklistItemUncompleted => "checklist_item_uncompleted",
        AttachmentAdded => "attachment_added",
        CommentAdded => "comment_added",
        CommentUpdated => "comment_updated",
    }
}

text_enum! {
    NotificationType {
        Mention => "mention",
        Assignment => "assignment",
        DueDate => "due_date",
        Comment => "comment",
        CardMoved => "card_moved",
        BoardInvite => "board_invite",
        WorkspaceInvite => "workspace_invite",
        CardCompleted => "card_completed",
        ChecklistCompleted => "checklist_completed",
        AttachmentAdded => "attachment_added",
        MemberAdded => "member_added",
        MemberRemoved => "member_removed",
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Member
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Private
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub owner_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkspaceMember {
    pub workspace_id: String,
    pub user_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkspaceDetail {
    #[serde(flatten)]
    pub workspace: Workspace,
    pub members: Vec<WorkspaceMember>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Board {
    pub id: String,
    pub workspace_id: Option<String>,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub visibility: Visibility,
    pub created_by: String,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BoardMember {
    pub board_id: String,
    pub user_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Label {
    pub id: String,
    pub board_id: String,
    pub name: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardDetail {
    #[serde(flatten)]
    pub board: Board,
    pub is_starred: bool,
    pub members: Vec<BoardMember>,
    pub labels: Vec<Label>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct List {
    pub id: String,
    pub board_id: String,
    pub name: String,
    pub position: i64,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ListDetail {
    #[serde(flatten)]
    pub list: List,
    pub cards: Vec<Card>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Card {
    pub id: String,
    pub list_id: String,
    pub title: String,
    pub description: String,
    pub position: i64,
    pub due_date: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CardMember {
    pub card_id: String,
    pub user_id: String,
    pub assigned_by: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Checklist {
    pub id: String,
    pub card_id: String,
    pub title: String,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChecklistItem {
    pub id: String,
    pub checklist_id: String,
    pub title: String,
    pub position: i64,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChecklistDetail {
    #[serde(flatten)]
    pub checklist: Checklist,
    pub items: Vec<ChecklistItem>,
}

impl ChecklistDetail {
    /// Completed items as a percentage, 0 for an empty checklist.
    pub fn progress(&self) -> u8 {
        if self.items.is_empty() {
            return 0;
        }
        let done = self.items.iter().filter(|item| item.is_completed).count();
        ((done * 100) / self.items.len()) as u8
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    pub card_id: String,
    pub user_id: String,
    pub content: String,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Attachment {
    pub id: String,
    pub card_id: String,
    pub file_name: String,
    pub file_url: String,
    pub file_type: String,
    pub file_size: Option<i64>,
    pub uploaded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CardDetail {
    #[serde(flatten)]
    pub card: Card,
    pub members: Vec<CardMember>,
    pub labels: Vec<Label>,
    pub checklists: Vec<ChecklistDetail>,
    pub attachments: Vec<Attachment>,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Activity {
    pub id: String,
    pub user_id: String,
    pub action_type: ActionType,
    pub board_id: Option<String>,
    pub card_id: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub related_board_id: Option<String>,
    pub related_card_id: Option<String>,
    pub related_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NewWorkspace {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NewBoard {
    pub name: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BoardUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BoardFilter {
    pub workspace_id: Option<String>,
    /// Defaults to active boards only.
    pub archived: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NewList {
    pub board_id: String,
    pub name: String,
    /// `0` appends to the end of the board.
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NewCard {
    pub list_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// `0` appends to the end of the list.
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NewAttachment {
    pub file_name: String,
    pub file_url: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ActivityFilter {
    pub board_id: Option<String>,
    pub card_id: Option<String>,
}

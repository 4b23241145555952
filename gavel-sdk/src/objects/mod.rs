pub mod auction;
pub mod bid;
pub mod command;
pub mod notification;
pub mod question;
pub mod user;

pub use auction::{AuctionDocument, AuctionStatus};
pub use bid::BidDocument;
pub use command::{CommandDecodeError, CommandKind, CommandMessage};
pub use notification::{ChangeRecord, Collection};
pub use question::QuestionDocument;
pub use user::{UserDocument, UserStatus};

/// Display name written over a deleted user's denormalized name fields.
pub const DELETED_USER_NAME: &str = "deleted";

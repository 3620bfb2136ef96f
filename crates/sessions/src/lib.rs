//! Token and session directory for coderelay.
//!
//! A repo registry, a token directory, a session index and one record file
//! per session, all plain JSON under a single storage root.  The record
//! files are the source of truth; the two indexes are derived and can be
//! rebuilt with [`SessionStore::reindex_sessions`].

pub mod conversation;
pub mod current;
pub mod format;
pub mod index;
pub mod layout;
pub mod list;
pub mod record;
pub mod repos;
pub mod store;
pub mod token_gen;

pub use conversation::{
    extract_conversation, extract_session_meta, Conversation, ConversationSource, TranscriptMeta,
};
pub use current::CurrentTokenStore;
pub use format::{format_conversation, format_relative_time, format_sessions_list, FormatOptions};
pub use index::{SessionIndex, TokenDirectory, TokenEntry};
pub use layout::StoreLayout;
pub use list::{ListOptions, SessionListing};
pub use record::{
    Channel, ChannelKind, ChatOrigin, CodexContinuation, EmailOrigin, Notification, SessionRecord,
    Stamp,
};
pub use repos::{Repo, RepoRegistry};
pub use store::{CreatedSession, ReindexReport, SessionStore};
pub use token_gen::{RandomTokenGenerator, TokenGenerator};

//! SQLite persistence for netwatch scan sessions, results, and tags.

mod error;
mod models;
mod open;
mod query;
mod schema;
mod session;
mod tags;

pub use error::StoreError;
pub use models::*;
pub use open::Db;
pub use session::{delete_orphaned_results, delete_session, insert_result, insert_session};
pub use tags::{delete_global_tag, get_global_tag, get_session_tags, get_tags, set_tag};

mod entries;
mod feeds;
mod images;
mod read_state;
mod schema;
mod types;

pub use schema::Database;
pub use types::{CachedImage, DatabaseError, Entry, Feed, InsertedEntry, NewEntry};

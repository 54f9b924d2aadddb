mod feeds;
mod schema;
mod settings;
mod store;
mod types;

pub use schema::Database;
pub use store::FeedStore;
pub use types::{DatabaseError, Feed, Post, UserFeed, UserSettings};

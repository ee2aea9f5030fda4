mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{Album, NewPhoto, Photo, PhotoOrder, PhotoQuery};
pub use store::SqlitePhotoStore;
pub use trait_def::{InsertPhotoError, PhotoStore};

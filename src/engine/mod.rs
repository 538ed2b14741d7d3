pub mod persistence;
pub mod store;

pub use persistence::{FileSnapshotter, Snapshotter};
pub use store::Roster;

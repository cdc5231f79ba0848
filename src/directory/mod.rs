pub mod cursor;
pub mod entry;
pub mod storage;

pub use cursor::{EntryCursor, ListCursor};
pub use entry::{Attribute, Entry, Modification};
pub use storage::{Directory, Partition};

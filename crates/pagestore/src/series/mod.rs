//! In-memory series buffers and their element kinds.

mod data;
mod element;
mod select;

pub use data::{Data, Merge, MergeStrategy};
pub use element::{ElementKind, IndexElement, IndexKey, SeriesValue, ValueKind};
pub use select::Selection;

//! Identity types shared by every servable-facing component.

mod servable_id;

pub use servable_id::{LoadMetadata, ServableId};

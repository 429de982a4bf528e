//! Application Services
//!
//! - `reading`: the latest-reading holder shared by the collector (writer)
//!   and the query server (readers)

mod reading;

pub use reading::{ReadingHandle, ReadingPublisher, channel};

//! Domain module - repository resources and traversal events
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod constants;
pub mod events;
pub mod resource;

pub use events::{VisitEvent, VisitEventKind};
pub use resource::{Resource, ResourceBuilder};

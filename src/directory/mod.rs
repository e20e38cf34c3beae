pub mod model;
pub mod service;

pub use model::{AreaHierarchy, AreaNode, AssignStats, PopularArea, VenueAssignment};
pub use service::AreaDirectoryService;

/// Joins ancestor names into a display name, root first.
pub const FULL_NAME_SEPARATOR: &str = " > ";

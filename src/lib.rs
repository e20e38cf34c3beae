pub mod commands;
pub mod config;
pub mod directory;
pub mod error;
pub mod geocode;
pub mod geometry;
pub mod hierarchy;
pub mod resolver;
pub mod storage;

pub use config::AppConfig;
pub use directory::AreaDirectoryService;
pub use error::AreaError;
pub use hierarchy::{HierarchyImporter, ImportOptions, ImportReport};
pub use resolver::{ContainmentResolver, NearbyArea, RegionIndex};
pub use storage::establish_connection;
pub use storage::repository::{Area, AreaKind};

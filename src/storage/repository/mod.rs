pub mod area_repo;
pub mod venue_repo;

pub use area_repo::{
    Area, AreaKind, AreaRepository, LevelCountRow, NewArea, UpsertOutcome,
};
pub use venue_repo::{VenueCountRow, VenueRepository};

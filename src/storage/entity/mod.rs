pub mod area;
pub mod venue;

pub use area::Entity as AreaEntity;
pub use venue::Entity as VenueEntity;

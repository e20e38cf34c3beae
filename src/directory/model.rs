use crate::storage::repository::{Area, AreaKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// An area with its active descendants.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AreaNode {
    #[serde(flatten)]
    pub area: Area,
    pub children: Vec<AreaNode>,
}

impl AreaNode {
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(AreaNode::size).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(AreaNode::depth).max().unwrap_or(0)
    }
}

/// Containing regions of a point keyed by kind; the most specific wins
/// when a kind repeats.
pub type AreaHierarchy = BTreeMap<AreaKind, Area>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PopularArea {
    pub area: Area,
    pub venue_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssignStats {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
    pub no_coordinates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum VenueAssignment {
    Assigned(Area),
    NoRegion,
    NoCoordinates,
}

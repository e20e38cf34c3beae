use super::classifier::{is_ambiguous, ClassifierRules, RegionRole};
use super::source::RawShape;
use crate::geometry::merge_polygons;
use crate::storage::repository::AreaKind;
use geo::Geometry;
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// A region ready to persist, geometry already merged.
#[derive(Debug, Clone)]
pub struct RegionPlan {
    pub name: String,
    pub kind: AreaKind,
    pub geometry: Option<Geometry<f64>>,
}

/// Level-1 region plus the level-2 wards nested below it.
#[derive(Debug, Clone)]
pub struct CityPlan {
    pub region: RegionPlan,
    pub wards: Vec<RegionPlan>,
    pub synthesized: bool,
}

#[derive(Debug, Clone)]
pub struct PrefecturePlan {
    pub name: String,
    pub geometry: Option<Geometry<f64>>,
    pub cities: Vec<CityPlan>,
    /// Municipalities whose parts produced no usable union.
    pub dropped: Vec<String>,
    pub ambiguous: Vec<String>,
}

impl PrefecturePlan {
    pub fn region_count(&self) -> usize {
        1 + self
            .cities
            .iter()
            .map(|c| 1 + c.wards.len())
            .sum::<usize>()
    }
}

/// Groups one prefecture's raw parts by municipality, merges every group,
/// classifies the results and derives designated-city and prefecture
/// geometry by union. CPU bound; run it off the async runtime.
pub fn build_prefecture_plan(
    prefecture: &str,
    shapes: Vec<RawShape>,
    rules: &ClassifierRules,
) -> PrefecturePlan {
    let mut groups: BTreeMap<String, Vec<Geometry<f64>>> = BTreeMap::new();
    for shape in shapes {
        groups
            .entry(shape.municipality)
            .or_default()
            .push(shape.geometry);
    }

    let mut merged: Vec<(String, Option<Geometry<f64>>)> = groups
        .into_par_iter()
        .map(|(name, parts)| {
            let geometry = merge_polygons(parts);
            (name, geometry)
        })
        .collect();
    merged.sort_by(|a, b| a.0.cmp(&b.0));

    let mut plan = PrefecturePlan {
        name: prefecture.to_string(),
        geometry: None,
        cities: Vec::new(),
        dropped: Vec::new(),
        ambiguous: Vec::new(),
    };

    let mut level_one: BTreeMap<String, CityPlan> = BTreeMap::new();
    let mut designated: BTreeMap<String, Vec<RegionPlan>> = BTreeMap::new();

    for (name, geometry) in merged {
        let Some(geometry) = geometry else {
            warn!("{prefecture}/{name}: no usable geometry after merge, dropped");
            plan.dropped.push(name);
            continue;
        };
        if is_ambiguous(&name) {
            warn!("{prefecture}/{name}: ambiguous name, classified by fallback rule");
            plan.ambiguous.push(name.clone());
        }

        match rules.classify(prefecture, &name) {
            RegionRole::RegularCity => {
                level_one.insert(name.clone(), own_city(name, AreaKind::City, geometry));
            }
            RegionRole::CapitalWard => {
                level_one.insert(name.clone(), own_city(name, AreaKind::Ward, geometry));
            }
            RegionRole::DesignatedCityWard { parent_city } => {
                designated.entry(parent_city).or_default().push(RegionPlan {
                    name,
                    kind: AreaKind::Ward,
                    geometry: Some(geometry),
                });
            }
            RegionRole::Unrecognized => {
                warn!("{prefecture}/{name}: unrecognized, dropped");
                plan.dropped.push(name);
            }
        }
    }

    // 政令市本身只由各区合并而成
    let synthesized: Vec<(String, Vec<RegionPlan>, Option<Geometry<f64>>)> = designated
        .into_par_iter()
        .map(|(city, wards)| {
            let parts: Vec<Geometry<f64>> =
                wards.iter().filter_map(|w| w.geometry.clone()).collect();
            let geometry = merge_polygons(parts);
            (city, wards, geometry)
        })
        .collect();

    for (city, wards, geometry) in synthesized {
        if geometry.is_none() {
            warn!("{prefecture}/{city}: union of wards failed, city kept without geometry");
        }
        match level_one.get_mut(&city) {
            // 源数据自带该市，保留其原有轮廓
            Some(existing) => {
                debug!("{prefecture}/{city}: wards attached to existing city record");
                existing.wards.extend(wards);
            }
            None => {
                level_one.insert(
                    city.clone(),
                    CityPlan {
                        region: RegionPlan {
                            name: city,
                            kind: AreaKind::City,
                            geometry,
                        },
                        wards,
                        synthesized: true,
                    },
                );
            }
        }
    }

    let top_parts: Vec<Geometry<f64>> = level_one
        .values()
        .filter_map(|c| c.region.geometry.clone())
        .collect();
    plan.geometry = merge_polygons(top_parts);
    if plan.geometry.is_none() {
        warn!("{prefecture}: no prefecture geometry could be derived");
    }

    plan.cities = level_one.into_values().collect();
    for city in &mut plan.cities {
        city.wards.sort_by(|a, b| a.name.cmp(&b.name));
    }
    plan
}

fn own_city(name: String, kind: AreaKind, geometry: Geometry<f64>) -> CityPlan {
    CityPlan {
        region: RegionPlan {
            name,
            kind,
            geometry: Some(geometry),
        },
        wards: Vec::new(),
        synthesized: false,
    }
}

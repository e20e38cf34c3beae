use super::classifier::ClassifierRules;
use super::plan::{build_prefecture_plan, PrefecturePlan, RegionPlan};
use super::report::{ImportReport, ProbeResult};
use super::source::{RawShape, SourceReader, SourceStats};
use crate::geometry::{encode_geometry, representative_point, Coordinate};
use crate::resolver::RegionIndex;
use crate::storage::repository::{
    AreaKind, AreaRepository, NewArea, UpsertOutcome, VenueRepository,
};
use anyhow::Context;
use futures::stream::{self, StreamExt};
use geo::Geometry;
use log::{error, info, warn};
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;

/// A named coordinate resolved after every import as a smoke test.
#[derive(Debug, Clone)]
pub struct Probe {
    pub label: String,
    pub point: Coordinate,
}

impl Probe {
    pub fn new(label: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            label: label.into(),
            point: Coordinate::new(lat, lon),
        }
    }
}

pub fn default_probes() -> Vec<Probe> {
    vec![
        Probe::new("東京駅", 35.6812, 139.7671),
        Probe::new("大阪駅", 34.7024, 135.4959),
    ]
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub source_root: PathBuf,
    pub clear: bool,
    pub workers: usize,
    pub expected_prefectures: usize,
    pub expected_total: RangeInclusive<u64>,
    pub rules: ClassifierRules,
    pub probes: Vec<Probe>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("./data"),
            clear: false,
            workers: 4,
            expected_prefectures: 47,
            expected_total: 1800..=1950,
            rules: ClassifierRules::default(),
            probes: default_probes(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    created: usize,
    filled: usize,
    unchanged: usize,
}

impl Tally {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::GeometryFilled => self.filled += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

pub struct HierarchyImporter {
    db: Arc<DatabaseConnection>,
    options: ImportOptions,
}

impl HierarchyImporter {
    pub fn new(db: Arc<DatabaseConnection>, options: ImportOptions) -> Self {
        Self { db, options }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Reads the source tree and imports it.
    pub async fn run(&self) -> anyhow::Result<ImportReport> {
        let reader = SourceReader::new(self.options.source_root.clone());
        info!("reading area source from {}", reader.root().display());
        let (shapes, stats) = tokio::task::spawn_blocking(move || reader.read_all())
            .await
            .context("source reader task panicked")??;
        info!(
            "source: {} shapes from {} files ({} features skipped)",
            shapes.len(),
            stats.files_read,
            stats.features_skipped()
        );
        self.import_shapes(shapes, stats).await
    }

    /// Imports already-loaded shapes. Each prefecture commits or rolls back
    /// on its own; a failed prefecture is reported, not returned as an error.
    pub async fn import_shapes(
        &self,
        shapes: Vec<RawShape>,
        source: SourceStats,
    ) -> anyhow::Result<ImportReport> {
        let mut report = ImportReport {
            source,
            ..Default::default()
        };

        if self.options.clear {
            report.cleared = self.clear_existing().await?;
        }

        let mut by_prefecture: BTreeMap<String, Vec<RawShape>> = BTreeMap::new();
        for shape in shapes {
            by_prefecture
                .entry(shape.prefecture.clone())
                .or_default()
                .push(shape);
        }
        report.prefectures_seen = by_prefecture.len();

        let rules = Arc::new(self.options.rules.clone());
        let workers = self.options.workers.max(1);

        // 几何在阻塞线程池中提前准备，写库仍按都道府県顺序逐个进行
        let mut plans = stream::iter(by_prefecture.into_iter().map(|(prefecture, shapes)| {
            let rules = Arc::clone(&rules);
            async move {
                let name = prefecture.clone();
                let plan = tokio::task::spawn_blocking(move || {
                    build_prefecture_plan(&prefecture, shapes, &rules)
                })
                .await;
                (name, plan)
            }
        }))
        .buffered(workers);

        let mut tally = Tally::default();
        while let Some((prefecture, plan)) = plans.next().await {
            let plan = match plan {
                Ok(p) => p,
                Err(e) => {
                    error!("{prefecture}: geometry preparation failed: {e}");
                    report.prefectures_failed.push(prefecture);
                    continue;
                }
            };
            report.dropped.extend(plan.dropped.iter().cloned());
            report.ambiguous.extend(plan.ambiguous.iter().cloned());

            match self.persist_prefecture(&plan).await {
                Ok(t) => {
                    info!(
                        "{prefecture}: committed {} regions ({} created)",
                        plan.region_count(),
                        t.created
                    );
                    tally.created += t.created;
                    tally.filled += t.filled;
                    tally.unchanged += t.unchanged;
                    report.prefectures_committed += 1;
                }
                Err(e) => {
                    error!("{prefecture}: rolled back: {e:#}");
                    report.prefectures_failed.push(prefecture);
                }
            }
            // 进入下一个县之前释放 plan 及其多边形
        }

        report.created = tally.created;
        report.geometry_filled = tally.filled;
        report.unchanged = tally.unchanged;

        self.self_check(&mut report).await?;
        for w in &report.warnings {
            warn!("import self-check: {w}");
        }
        Ok(report)
    }

    /// Nulls venue references, then deletes every area.
    pub async fn clear_existing(&self) -> anyhow::Result<u64> {
        let txn = self.db.begin().await?;
        let venues = VenueRepository::clear_all_area_refs(&txn).await?;
        let areas = AreaRepository::delete_all(&txn).await?;
        txn.commit().await?;
        info!("cleared {areas} areas, detached {venues} venues");
        Ok(areas)
    }

    async fn persist_prefecture(&self, plan: &PrefecturePlan) -> anyhow::Result<Tally> {
        let txn = self.db.begin().await?;
        match persist_plan(&txn, plan).await {
            Ok(tally) => {
                txn.commit().await?;
                Ok(tally)
            }
            Err(e) => {
                if let Err(rb) = txn.rollback().await {
                    error!("{}: rollback failed: {rb}", plan.name);
                }
                Err(e)
            }
        }
    }

    async fn self_check(&self, report: &mut ImportReport) -> anyhow::Result<()> {
        let db = self.db.as_ref();
        report.counts_by_level = AreaRepository::counts_by_level(db)
            .await?
            .into_iter()
            .map(|r| (r.level, r.count))
            .collect();
        report.total = AreaRepository::count_all(db).await?;
        report.with_geometry = AreaRepository::count_with_geometry(db).await?;
        report.orphans = AreaRepository::count_orphans(db).await?;

        if !self.options.probes.is_empty() {
            let index = RegionIndex::load(db).await?;
            for probe in &self.options.probes {
                let resolved = match index.most_specific(probe.point.lat, probe.point.lon) {
                    Ok(Some(area)) => Some(full_name_of(db, area.id, &area.name).await?),
                    Ok(None) => None,
                    Err(e) => {
                        warn!("probe {}: {e}", probe.label);
                        None
                    }
                };
                report.probes.push(ProbeResult {
                    label: probe.label.clone(),
                    point: probe.point,
                    resolved,
                });
            }
        }

        report.evaluate(self.options.expected_prefectures, &self.options.expected_total);
        Ok(())
    }
}

async fn full_name_of<C: ConnectionTrait>(db: &C, id: i32, name: &str) -> anyhow::Result<String> {
    let mut names: Vec<String> = AreaRepository::ancestors(db, id)
        .await?
        .into_iter()
        .map(|m| m.name)
        .collect();
    names.push(name.to_string());
    Ok(names.join(crate::directory::FULL_NAME_SEPARATOR))
}

/// Top-down upserts for one prefecture: prefecture, its level-1 regions,
/// then designated-city wards.
async fn persist_plan<C: ConnectionTrait>(db: &C, plan: &PrefecturePlan) -> anyhow::Result<Tally> {
    let mut tally = Tally::default();

    let (pref, outcome) = AreaRepository::upsert(
        db,
        &to_new_area(&plan.name, AreaKind::Prefecture, 0, None, plan.geometry.as_ref()),
    )
    .await
    .with_context(|| format!("upserting prefecture {}", plan.name))?;
    tally.record(outcome);

    let mut city_ids: HashMap<&str, i32> = HashMap::new();
    for city in &plan.cities {
        let (row, outcome) = upsert_region(db, &city.region, 1, pref.id).await?;
        tally.record(outcome);
        city_ids.insert(city.region.name.as_str(), row.id);
    }

    for city in &plan.cities {
        let Some(&city_id) = city_ids.get(city.region.name.as_str()) else {
            continue;
        };
        for ward in &city.wards {
            let (_, outcome) = upsert_region(db, ward, 2, city_id).await?;
            tally.record(outcome);
        }
    }

    Ok(tally)
}

async fn upsert_region<C: ConnectionTrait>(
    db: &C,
    region: &RegionPlan,
    level: i32,
    parent_id: i32,
) -> anyhow::Result<(crate::storage::entity::area::Model, UpsertOutcome)> {
    let new = to_new_area(
        &region.name,
        region.kind,
        level,
        Some(parent_id),
        region.geometry.as_ref(),
    );
    AreaRepository::upsert(db, &new)
        .await
        .with_context(|| format!("upserting {} (level {level})", region.name))
}

fn to_new_area(
    name: &str,
    kind: AreaKind,
    level: i32,
    parent_id: Option<i32>,
    geometry: Option<&Geometry<f64>>,
) -> NewArea {
    let encoded = geometry.and_then(|g| match encode_geometry(g) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("{name}: geometry not stored: {e}");
            None
        }
    });
    NewArea {
        name: name.to_string(),
        name_kana: None,
        kind,
        level,
        parent_id,
        center: encoded
            .as_ref()
            .and(geometry)
            .and_then(representative_point),
        geometry: encoded,
    }
}

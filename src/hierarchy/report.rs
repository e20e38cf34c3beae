use super::source::SourceStats;
use crate::geometry::Coordinate;
use serde::Serialize;
use std::fmt;
use std::ops::RangeInclusive;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub label: String,
    pub point: Coordinate,
    /// Full name of the most specific region, if any.
    pub resolved: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub source: SourceStats,
    pub cleared: u64,
    pub prefectures_seen: usize,
    pub prefectures_committed: usize,
    pub prefectures_failed: Vec<String>,
    pub created: usize,
    pub geometry_filled: usize,
    pub unchanged: usize,
    pub dropped: Vec<String>,
    pub ambiguous: Vec<String>,
    pub counts_by_level: Vec<(i32, i64)>,
    pub total: u64,
    pub with_geometry: u64,
    pub orphans: u64,
    pub probes: Vec<ProbeResult>,
    pub warnings: Vec<String>,
}

impl ImportReport {
    pub fn top_level_count(&self) -> i64 {
        self.counts_by_level
            .iter()
            .find(|(level, _)| *level == 0)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub fn coverage_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.with_geometry as f64 * 100.0 / self.total as f64
    }

    /// Fills `warnings` from the self-check counts. None of these make the
    /// import fail.
    pub fn evaluate(&mut self, expected_top_level: usize, expected_total: &RangeInclusive<u64>) {
        self.warnings.clear();
        let top = self.top_level_count();
        if top != expected_top_level as i64 {
            self.warnings.push(format!(
                "top-level regions: expected {expected_top_level}, found {top}"
            ));
        }
        if !expected_total.contains(&self.total) {
            self.warnings.push(format!(
                "total regions {} outside expected {}..={}",
                self.total,
                expected_total.start(),
                expected_total.end()
            ));
        }
        if self.total > 0 && self.with_geometry < self.total {
            self.warnings.push(format!(
                "geometry coverage {:.1}% ({} of {})",
                self.coverage_percent(),
                self.with_geometry,
                self.total
            ));
        }
        if self.orphans > 0 {
            self.warnings
                .push(format!("{} non-root regions without a parent", self.orphans));
        }
        if !self.prefectures_failed.is_empty() {
            self.warnings.push(format!(
                "{} prefecture(s) rolled back: {}",
                self.prefectures_failed.len(),
                self.prefectures_failed.join(", ")
            ));
        }
        for probe in &self.probes {
            if probe.resolved.is_none() {
                self.warnings.push(format!(
                    "probe {} ({}, {}) resolved to no region",
                    probe.label, probe.point.lat, probe.point.lon
                ));
            }
        }
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== area import ===")?;
        writeln!(
            f,
            "source: {} files read, {} failed, {} features, {} skipped",
            self.source.files_read,
            self.source.files_failed,
            self.source.features_read,
            self.source.features_skipped()
        )?;
        if self.cleared > 0 {
            writeln!(f, "cleared: {} existing regions", self.cleared)?;
        }
        writeln!(
            f,
            "prefectures: {} seen, {} committed, {} failed",
            self.prefectures_seen,
            self.prefectures_committed,
            self.prefectures_failed.len()
        )?;
        writeln!(
            f,
            "regions: {} created, {} geometry filled, {} unchanged, {} dropped",
            self.created,
            self.geometry_filled,
            self.unchanged,
            self.dropped.len()
        )?;
        for (level, count) in &self.counts_by_level {
            writeln!(f, "  level {level}: {count}")?;
        }
        writeln!(
            f,
            "total: {}  with geometry: {} ({:.1}%)  orphans: {}",
            self.total,
            self.with_geometry,
            self.coverage_percent(),
            self.orphans
        )?;
        if !self.ambiguous.is_empty() {
            writeln!(f, "ambiguous names: {}", self.ambiguous.join(", "))?;
        }
        for probe in &self.probes {
            let hit = probe.resolved.as_deref().unwrap_or("-");
            writeln!(f, "probe {}: {hit}", probe.label)?;
        }
        for w in &self.warnings {
            writeln!(f, "WARNING: {w}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ImportReport {
        ImportReport {
            counts_by_level: vec![(0, 47), (1, 1700), (2, 175)],
            total: 1922,
            with_geometry: 1922,
            ..Default::default()
        }
    }

    #[test]
    fn clean_report_has_no_warnings() {
        let mut r = report();
        r.evaluate(47, &(1800..=1950));
        assert!(r.warnings.is_empty(), "{:?}", r.warnings);
        assert!((r.coverage_percent() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn deviations_become_warnings() {
        let mut r = report();
        r.counts_by_level[0].1 = 46;
        r.with_geometry = 1900;
        r.orphans = 2;
        r.probes.push(ProbeResult {
            label: "somewhere".into(),
            point: Coordinate::new(0.0, 0.0),
            resolved: None,
        });
        r.evaluate(47, &(1800..=1950));
        assert_eq!(r.warnings.len(), 4);
        let text = r.to_string();
        assert!(text.contains("WARNING: top-level regions: expected 47, found 46"));
        assert!(text.contains("probe somewhere: -"));
    }

    #[test]
    fn empty_database_reports_zero_coverage() {
        let mut r = ImportReport::default();
        r.evaluate(47, &(1800..=1950));
        assert_eq!(r.coverage_percent(), 0.0);
        assert_eq!(r.warnings.len(), 2);
    }
}

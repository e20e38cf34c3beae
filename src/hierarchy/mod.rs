pub mod classifier;
pub mod importer;
pub mod plan;
pub mod report;
pub mod source;

pub use classifier::{classify, is_ambiguous, parent_city_name, ClassifierRules, RegionRole};
pub use importer::{default_probes, HierarchyImporter, ImportOptions, Probe};
pub use plan::{build_prefecture_plan, CityPlan, PrefecturePlan, RegionPlan};
pub use report::{ImportReport, ProbeResult};
pub use source::{parse_collection, RawShape, SourceReader, SourceStats};

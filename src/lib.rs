pub mod models;
pub mod stats;
pub mod raw;
pub mod header;
pub mod log_grouper;
pub mod loaders;
pub mod cleaner;
pub mod aligner;
pub mod roles;
pub mod features;
pub mod pipeline;
pub mod month_split;
pub mod charts;
pub mod report;

pub use aligner::TimeAligner;
pub use charts::ChartRenderer;
pub use cleaner::{CleaningStats, DataCleaner};
pub use features::FeatureEngineer;
pub use header::HeaderResolver;
pub use loaders::{
    EnergyReportsLoader, ForecastLoader, InverterLogLoader, PowerReportsLoader,
    WeatherReportsLoader,
};
pub use log_grouper::LogGrouper;
pub use models::{
    CanonicalTable, CleaningConfig, Column, FeatureConfig, HeaderResolution, HeaderSpec,
    LogGroupKey, MergeMethod, MissingPolicy, OutlierMethod, TableRegistry,
};
pub use pipeline::{PipelineConfig, PreprocessingPipeline};
pub use report::SummaryReport;
pub use roles::{ColumnRole, RoleSchema};

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::aligner::TimeAligner;
use crate::cleaner::{CleaningStats, DataCleaner};
use crate::features::FeatureEngineer;
use crate::loaders::{
    EnergyReportsLoader, ForecastLoader, InverterLogLoader, PowerReportsLoader,
    WeatherReportsLoader,
};
use crate::models::{
    CanonicalTable, CleaningConfig, FeatureConfig, MergeMethod, TableRegistry,
    CSV_TIMESTAMP_FORMAT,
};

/// Where the source files live and how each stage should behave.
///
/// The defaults mirror the plant's October 2025 delivery layout. A source
/// set to `None` is disabled; a missing file downgrades to a warning at
/// load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub datasets_dir: PathBuf,
    pub output_dir: PathBuf,
    pub forecast_file: Option<String>,
    pub power_report_files: Vec<String>,
    pub weather_report_file: Option<String>,
    pub energy_report_file: Option<String>,
    pub inverter_log_dir: Option<String>,
    /// Restrict inverter log grouping to these stream types.
    pub log_types: Option<Vec<String>>,
    pub cleaning: CleaningConfig,
    pub merge_method: MergeMethod,
    pub tolerance_minutes: i64,
    pub features: FeatureConfig,
    pub target_column: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let datasets_dir = std::env::var("PV_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("datasets"));
        let output_dir = std::env::var("PV_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("processed_data"));
        Self {
            datasets_dir,
            output_dir,
            forecast_file: Some("28_10_25_PV_Forecast.csv".to_string()),
            power_report_files: vec![
                "Power reports (1-15)102025.xls".to_string(),
                "Power reports (16-27)102025.xls".to_string(),
            ],
            weather_report_file: Some("Weather reports (1-27)10.xlsm".to_string()),
            energy_report_file: Some("Energy reports 01102025 - 27102025.xls".to_string()),
            inverter_log_dir: Some("inv 24.5/log".to_string()),
            log_types: None,
            cleaning: CleaningConfig::default(),
            merge_method: MergeMethod::Outer,
            tolerance_minutes: 1,
            features: FeatureConfig::default(),
            target_column: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
    pub missing_cells: usize,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Drives the five stages: load, clean, merge, features, save.
pub struct PreprocessingPipeline {
    config: PipelineConfig,
    registry: TableRegistry,
    cleaning_stats: Vec<(String, CleaningStats)>,
    merged: Option<CanonicalTable>,
    features_added: usize,
    stage_timings: Vec<(String, f64)>,
}

impl PreprocessingPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: TableRegistry::new(),
            cleaning_stats: Vec::new(),
            merged: None,
            features_added: 0,
            stage_timings: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn merged(&self) -> Option<&CanonicalTable> {
        self.merged.as_ref()
    }

    pub fn cleaning_stats(&self) -> &[(String, CleaningStats)] {
        &self.cleaning_stats
    }

    /// Run every enabled loader. Sources register in a fixed order so the
    /// forecast, when present, is the merge base. A source that fails to
    /// load is skipped; the stage only fails when nothing loads at all.
    pub fn load_all_data(&mut self) -> Result<()> {
        let dir = self.config.datasets_dir.clone();
        let mut registry = TableRegistry::new();

        if let Some(name) = &self.config.forecast_file {
            let loader = ForecastLoader::new(dir.join(name));
            register(&mut registry, "forecast", loader.load());
        }

        if !self.config.power_report_files.is_empty() {
            let mut paths = Vec::new();
            for name in &self.config.power_report_files {
                let path = dir.join(name);
                if path.exists() {
                    paths.push(path);
                } else {
                    println!("  ⚠️  power report missing: {}", path.display());
                }
            }
            if paths.is_empty() {
                println!("  ⚠️  skipping power: no report files found");
            } else {
                register(&mut registry, "power", PowerReportsLoader::new(paths).load());
            }
        }

        if let Some(name) = &self.config.weather_report_file {
            let loader = WeatherReportsLoader::new(dir.join(name));
            register(&mut registry, "weather", loader.load());
        }

        if let Some(name) = &self.config.energy_report_file {
            let loader = EnergyReportsLoader::new(dir.join(name));
            register(&mut registry, "energy", loader.load());
        }

        if let Some(name) = &self.config.inverter_log_dir {
            let mut loader = InverterLogLoader::new(dir.join(name));
            if let Some(types) = &self.config.log_types {
                loader = loader.with_log_types(types.clone());
            }
            match loader.load() {
                Ok(groups) => {
                    for (key, table) in groups {
                        let slug = key.slug();
                        println!(
                            "  ✅ {}: {} rows, {} columns",
                            slug,
                            table.height(),
                            table.width()
                        );
                        registry.insert(slug, table);
                    }
                }
                Err(err) => println!("  ⚠️  skipping inverter logs: {:#}", err),
            }
        }

        if registry.is_empty() {
            bail!("no source data could be loaded from {}", dir.display());
        }
        self.registry = registry;
        Ok(())
    }

    pub fn clean_all_data(&mut self) -> Result<()> {
        if self.registry.is_empty() {
            bail!("no data loaded; run load_all_data first");
        }
        let cleaner = DataCleaner::new(self.config.cleaning.clone());
        let (cleaned, stats) = cleaner.clean_registry(&self.registry);
        for (name, s) in &stats {
            println!(
                "  🧹 {}: {} -> {} rows ({} duplicates, {} outliers)",
                name, s.rows_in, s.rows_out, s.duplicates_removed, s.outliers_replaced
            );
        }
        self.registry = cleaned;
        self.cleaning_stats = stats;
        Ok(())
    }

    pub fn merge_data(&mut self) -> Result<()> {
        if self.registry.is_empty() {
            bail!("no data loaded; run load_all_data first");
        }
        let aligner =
            TimeAligner::from_minutes(self.config.tolerance_minutes, self.config.merge_method);
        let merged = aligner
            .merge_registry(&self.registry)
            .context("merging sources onto one time axis")?;
        println!("  🔗 merged: {} rows, {} columns", merged.height(), merged.width());
        self.merged = Some(merged);
        Ok(())
    }

    pub fn create_features(&mut self) -> Result<()> {
        let merged = self
            .merged
            .as_ref()
            .context("nothing merged; run merge_data first")?;
        let mut engineer = FeatureEngineer::new(self.config.features.clone());
        if let Some(target) = &self.config.target_column {
            engineer = engineer.with_target(target.clone());
        }
        let before = merged.width();
        let out = engineer.create_all_features(merged)?;
        self.features_added = out.width() - before;
        println!(
            "  🧪 features: {} added, {} columns total",
            self.features_added,
            out.width()
        );
        self.merged = Some(out);
        Ok(())
    }

    /// Write the merged table, each cleaned source, and the run summary.
    pub fn save(&self) -> Result<()> {
        let merged = self
            .merged
            .as_ref()
            .context("nothing to save; run the pipeline first")?;
        let out_dir = &self.config.output_dir;
        fs::create_dir_all(out_dir)
            .with_context(|| format!("creating {}", out_dir.display()))?;

        let main_path = out_dir.join("processed_data.csv");
        merged.to_csv(&main_path)?;
        println!("  💾 {}", main_path.display());

        let individual = out_dir.join("individual");
        for (name, table) in self.registry.iter() {
            let path = individual.join(format!("{}.csv", name));
            table
                .to_csv(&path)
                .with_context(|| format!("saving source table '{}'", name))?;
        }
        println!(
            "  💾 {} source tables -> {}",
            self.registry.len(),
            individual.display()
        );

        let summary_path = out_dir.join("run_summary.json");
        let summary = self.run_summary(merged);
        fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("writing {}", summary_path.display()))?;
        println!("  💾 {}", summary_path.display());
        Ok(())
    }

    fn run_summary(&self, merged: &CanonicalTable) -> serde_json::Value {
        let sources: Vec<_> = self
            .registry
            .iter()
            .map(|(name, table)| {
                json!({
                    "name": name,
                    "rows": table.height(),
                    "columns": table.width(),
                })
            })
            .collect();
        let cleaning: Vec<_> = self
            .cleaning_stats
            .iter()
            .map(|(name, stats)| json!({ "name": name, "stats": stats }))
            .collect();
        let timings: Vec<_> = self
            .stage_timings
            .iter()
            .map(|(stage, seconds)| json!({ "stage": stage, "seconds": seconds }))
            .collect();
        json!({
            "generated_at": chrono::Local::now().format(CSV_TIMESTAMP_FORMAT).to_string(),
            "sources": sources,
            "cleaning": cleaning,
            "merged": {
                "rows": merged.height(),
                "columns": merged.width(),
                "time_range": merged.time_range().map(|(start, end)| {
                    vec![
                        start.format(CSV_TIMESTAMP_FORMAT).to_string(),
                        end.format(CSV_TIMESTAMP_FORMAT).to_string(),
                    ]
                }),
            },
            "features_added": self.features_added,
            "stage_seconds": timings,
        })
    }

    pub fn run_full_pipeline(&mut self) -> Result<()> {
        let started = Instant::now();
        println!("{}", "=".repeat(60));
        println!("🌞 PV PLANT DATA PREPROCESSING PIPELINE");
        println!("{}", "=".repeat(60));
        println!("📂 datasets: {}", self.config.datasets_dir.display());
        println!("📁 output:   {}", self.config.output_dir.display());

        println!("\n📥 [1/5] Loading source data");
        let stage = Instant::now();
        self.load_all_data()?;
        self.record_stage("load", stage);

        println!("\n🧹 [2/5] Cleaning");
        let stage = Instant::now();
        self.clean_all_data()?;
        self.record_stage("clean", stage);

        println!("\n🔗 [3/5] Merging onto one time axis");
        let stage = Instant::now();
        self.merge_data()?;
        self.record_stage("merge", stage);

        println!("\n🧪 [4/5] Engineering features");
        let stage = Instant::now();
        self.create_features()?;
        self.record_stage("features", stage);

        println!("\n💾 [5/5] Saving outputs");
        let stage = Instant::now();
        self.save()?;
        self.record_stage("save", stage);

        println!("\n{}", "=".repeat(60));
        println!("✅ Pipeline complete in {:.1}s", started.elapsed().as_secs_f64());
        println!("{}", "=".repeat(60));
        Ok(())
    }

    fn record_stage(&mut self, name: &str, started: Instant) {
        self.stage_timings
            .push((name.to_string(), started.elapsed().as_secs_f64()));
    }

    /// Shape and time range of every loaded table plus the merged result.
    pub fn get_data_summary(&self) -> Vec<TableSummary> {
        let mut out: Vec<TableSummary> = self
            .registry
            .iter()
            .map(|(name, table)| summarize(name, table))
            .collect();
        if let Some(merged) = &self.merged {
            out.push(summarize("merged", merged));
        }
        out
    }
}

fn summarize(name: &str, table: &CanonicalTable) -> TableSummary {
    let missing_cells = table.columns().iter().map(|c| c.missing_count()).sum();
    let (start, end) = match table.time_range() {
        Some((a, b)) => (
            Some(a.format(CSV_TIMESTAMP_FORMAT).to_string()),
            Some(b.format(CSV_TIMESTAMP_FORMAT).to_string()),
        ),
        None => (None, None),
    };
    TableSummary {
        name: name.to_string(),
        rows: table.height(),
        columns: table.width(),
        missing_cells,
        start,
        end,
    }
}

fn register(registry: &mut TableRegistry, name: &str, result: Result<CanonicalTable>) {
    match result {
        Ok(table) => {
            println!(
                "  ✅ {}: {} rows, {} columns",
                name,
                table.height(),
                table.width()
            );
            registry.insert(name, table);
        }
        Err(err) => println!("  ⚠️  skipping {}: {:#}", name, err),
    }
}

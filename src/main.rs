use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use pv_pipeline::models::CanonicalTable;
use pv_pipeline::{month_split, ChartRenderer, PipelineConfig, PreprocessingPipeline, SummaryReport};

fn print_usage() {
    println!("PV plant data preprocessing pipeline");
    println!();
    println!("Usage:");
    println!("  pv_pipeline                               Run the full pipeline");
    println!("  pv_pipeline --split-month <report> [out]  Write monthly CSVs for a raw report");
    println!("  pv_pipeline --charts <csv> [out]          Render charts for a processed CSV");
    println!("  pv_pipeline --report <csv> [out]          Write a markdown summary for a processed CSV");
    println!("  pv_pipeline --help                        Show this message");
    println!();
    println!("Environment:");
    println!("  PV_DATA_DIR    datasets directory (default: datasets)");
    println!("  PV_OUTPUT_DIR  output directory (default: processed_data)");
}

fn main() -> Result<()> {
    env_logger::init();

    // Set Rayon to use all available cores
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()
        .unwrap();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--help" {
        print_usage();
    } else if args.len() > 1 && args[1] == "--split-month" {
        if args.len() < 3 {
            print_usage();
            bail!("--split-month needs a report file");
        }
        let report = PathBuf::from(&args[2]);
        let out_dir = args
            .get(3)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("monthly_reports"));
        println!("📅 Splitting {} by month", report.display());
        let written = month_split::split_report_file(&report, &out_dir, None)?;
        println!("✅ {} monthly files written", written.len());
    } else if args.len() > 1 && args[1] == "--charts" {
        if args.len() < 3 {
            print_usage();
            bail!("--charts needs a processed CSV");
        }
        let csv = PathBuf::from(&args[2]);
        let out_dir = args
            .get(3)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("charts"));
        let table = CanonicalTable::read_csv(&csv)
            .with_context(|| format!("loading {}", csv.display()))?;
        println!("📊 Rendering charts for {} ({} rows)", csv.display(), table.height());
        let written = ChartRenderer::new(&out_dir).render_all(&table);
        println!("✅ {} charts written to {}", written.len(), out_dir.display());
    } else if args.len() > 1 && args[1] == "--report" {
        if args.len() < 3 {
            print_usage();
            bail!("--report needs a processed CSV");
        }
        let csv = PathBuf::from(&args[2]);
        let out_path = args
            .get(3)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data_report.md"));
        let table = CanonicalTable::read_csv(&csv)
            .with_context(|| format!("loading {}", csv.display()))?;
        SummaryReport::new(&table).save(&out_path)?;
    } else if args.len() > 1 {
        print_usage();
        bail!("unknown option '{}'", args[1]);
    } else {
        let mut pipeline = PreprocessingPipeline::new(PipelineConfig::default());
        pipeline.run_full_pipeline()?;
    }

    Ok(())
}

// ==============================================================================
// main.rs - Genotype Reconciler Entry Point
// ==============================================================================
// Description: Command line front end reconciling one genotype dataset
//              against the reference variant and sample databases
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-07
// Version: 2.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genotype_reconciler::allele_coding::Coding;
use genotype_reconciler::coordinates::SearchKey;
use genotype_reconciler::models::{AssemblyRef, SampleField};
use genotype_reconciler::parsers::{
    AffymetrixReport, BinaryPlink, GenotypeSource, IlluminaReport, TextPlink,
};
use genotype_reconciler::pipeline::{FamilyIds, ReconcileOptions, Reconciler};
use genotype_reconciler::reference_store::ReferenceStore;
use genotype_reconciler::sample_store::SampleStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("input")
        .required(true)
        .args(["file", "bfile", "illumina_report", "affymetrix_report"]),
))]
struct Args {
    /// PLINK text prefix (`<prefix>.map` and `<prefix>.ped`)
    #[arg(long)]
    file: Option<PathBuf>,

    /// PLINK binary prefix (`<prefix>.bed`, `.bim` and `.fam`)
    #[arg(long)]
    bfile: Option<PathBuf>,

    /// Illumina final report
    #[arg(long, requires = "snpfile")]
    illumina_report: Option<PathBuf>,

    /// SNP list of the Illumina report
    #[arg(long)]
    snpfile: Option<PathBuf>,

    /// Affymetrix genotype report
    #[arg(long)]
    affymetrix_report: Option<PathBuf>,

    /// Reference variant database
    #[arg(long, env = "REFERENCE_DB")]
    reference_db: PathBuf,

    /// Sample and breed database
    #[arg(long, env = "SAMPLES_DB")]
    samples_db: Option<PathBuf>,

    /// Dataset file name the samples belong to (omit to only convert)
    #[arg(long, requires = "samples_db")]
    dataset: Option<String>,

    /// Allele coding of the input genotypes
    #[arg(long, value_enum, default_value_t = Coding::Top)]
    coding: Coding,

    /// Assembly version of the input coordinates
    #[arg(long)]
    src_version: String,

    /// Source of the input assembly locations
    #[arg(long)]
    src_imported_from: String,

    /// Target assembly version (defaults to the source assembly)
    #[arg(long, requires = "dst_imported_from")]
    dst_version: Option<String>,

    /// Source of the target assembly locations
    #[arg(long, requires = "dst_version")]
    dst_imported_from: Option<String>,

    /// Marker attribute used to search the reference database
    #[arg(long, value_enum, default_value_t = SearchKey::Name)]
    search_field: SearchKey,

    /// Chip of the probeset ids
    #[arg(long)]
    chip_name: Option<String>,

    /// Breed code used as family id of every sample
    #[arg(long, conflicts_with = "fake_ped")]
    breed_code: Option<String>,

    /// Take family ids from the breed of the stored samples
    #[arg(long, requires = "dataset")]
    fake_ped: bool,

    /// Register samples missing from the database
    #[arg(long, requires = "dataset")]
    create_samples: bool,

    /// Sample attribute matching the individual id of the input
    #[arg(long, value_enum, default_value_t = SampleField::OriginalId)]
    sample_field: SampleField,

    /// Set genotypes outside the declared coding to missing
    #[arg(long)]
    ignore_coding_errors: bool,

    /// Output prefix
    #[arg(short, long, required_unless_present = "list_samples")]
    output: Option<PathBuf>,

    /// Print the sample ids of the input and exit
    #[arg(long)]
    list_samples: bool,
}

impl Args {
    fn source(&self) -> Result<Box<dyn GenotypeSource>> {
        if let Some(prefix) = &self.file {
            Ok(Box::new(TextPlink::new(prefix)))
        } else if let Some(prefix) = &self.bfile {
            Ok(Box::new(BinaryPlink::new(prefix)))
        } else if let Some(report) = &self.illumina_report {
            let snpfile = self
                .snpfile
                .as_ref()
                .context("--snpfile is required with --illumina-report")?;
            Ok(Box::new(IlluminaReport::new(report, snpfile, self.coding)))
        } else if let Some(report) = &self.affymetrix_report {
            Ok(Box::new(AffymetrixReport::new(report)))
        } else {
            anyhow::bail!("No input given")
        }
    }

    fn options(&self) -> Result<ReconcileOptions> {
        let output = self.output.clone().context("--output is required")?;

        let mut options = ReconcileOptions::new(
            self.coding,
            AssemblyRef::new(&self.src_version, &self.src_imported_from),
            output,
        );

        if let (Some(version), Some(imported_from)) = (&self.dst_version, &self.dst_imported_from) {
            options.dst_assembly = Some(AssemblyRef::new(version, imported_from));
        }

        options.search = self.search_field;
        options.chip_name = self.chip_name.clone();
        options.family_ids = match (&self.breed_code, self.fake_ped) {
            (Some(code), _) => FamilyIds::BreedCode(code.clone()),
            (None, true) => FamilyIds::Lookup,
            (None, false) => FamilyIds::Native,
        };
        options.create_samples = self.create_samples;
        options.sample_field = self.sample_field;
        options.ignore_coding_errors = self.ignore_coding_errors;

        Ok(options)
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genotype_reconciler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let args = Args::parse();
    let mut source = args.source()?;

    if args.list_samples {
        for sample in source.list_sample_ids()? {
            println!("{}", sample);
        }
        return Ok(());
    }

    info!("Genotype Reconciler starting...");

    let reference = ReferenceStore::open(&args.reference_db)
        .context("Failed to open reference database")?;
    reference
        .validate()
        .context("Reference database validation failed")?;

    let reconciler = Reconciler::new(&reference, args.options()?);

    let summary = match (&args.dataset, &args.samples_db) {
        (Some(file), Some(samples_db)) => {
            let store = SampleStore::open(samples_db).context("Failed to open sample database")?;
            store
                .validate()
                .context("Sample database validation failed")?;

            let dataset = store
                .dataset_by_file(file)?
                .with_context(|| format!("Couldn't find dataset '{}'", file))?;
            info!("Found dataset {}", dataset);

            reconciler
                .with_dataset(&store, &dataset)
                .run(source.as_mut())?
        }
        _ => reconciler.run(source.as_mut())?,
    };

    info!(
        "Run {} complete: {} markers, {} samples written to {:?}",
        summary.run_id,
        summary.output.n_markers,
        summary.output.n_rows,
        summary.output.ped_path
    );

    Ok(())
}

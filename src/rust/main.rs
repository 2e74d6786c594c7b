use catres::config::{ContactConfig, CounterConfig, PipelineConfigBuilder};
use catres::counter::ExternalCounter;
use catres::errors::{PipelineError, PipelineResult};
use catres::folds::SplitTable;
use catres::io::list_files_with_extension;
use catres::pipeline::{
    count_graphlets, read_catalytic_sites, read_record_contact, write_structure_records,
    InferenceOrchestrator, ModelBundle, TrainingOrchestrator, MODEL_FILE,
};
use catres::records::{QueueLayout, RecordPaths};
use catres::sparse::{FeatureSet, SparseFeatureAssembler};
use catres::types::{DistanceThreshold, StructureId};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "catres")]
#[command(about = "Catalytic residue prediction from backbone contact graphlets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build contact graphs and write the counter input records
    Graph {
        /// PDB files, or directories of `.pdb` files (gzip, bzip2, xz and zstd supported)
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Output directory for the record files
        #[arg(short, long)]
        output: PathBuf,

        /// Edge distance threshold in Ångström
        #[arg(short, long, default_value = "7.5")]
        threshold: f64,

        /// Chain to read from each structure
        #[arg(long, default_value = "A")]
        chain: char,

        /// Tab-separated catalytic residues (`<structure>\t<i>,<j>,...`); writes training queues
        #[arg(long)]
        catalytic: Option<PathBuf>,

        /// Annotation method naming the training queue files
        #[arg(long, default_value = "csa")]
        method: String,
    },
    /// Run the external graphlet counter over a record directory
    Count {
        /// Record directory written by `graph`
        #[arg(short, long)]
        records: PathBuf,

        /// Output directory for the `.svml` files
        #[arg(short, long)]
        output: PathBuf,

        /// Counter executable
        #[arg(long, default_value = "run_kernel")]
        program: PathBuf,

        /// Use the training queues of this method instead of `<id>.atom_pos`
        #[arg(long)]
        method: Option<String>,
    },
    /// Assemble `.svml` count files into one sparse feature set
    Assemble {
        /// Directory of `.svml` files
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the feature set
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Cross-validate on a split table and fit the final model
    CrossValidate {
        /// Feature set directory written by `assemble`
        #[arg(short, long)]
        features: PathBuf,

        /// Split table (`<fold>\t<train|test>\t<structure>`)
        #[arg(short, long)]
        splits: PathBuf,

        /// Record directory written by `graph` with `--catalytic`
        #[arg(short, long)]
        records: PathBuf,

        /// Output directory for reports and the model
        #[arg(short, long)]
        output: PathBuf,

        /// Annotation method naming the training queue files
        #[arg(long, default_value = "csa")]
        method: String,

        /// Number of threads for parallel folds (default: all cores)
        #[arg(long)]
        threads: Option<usize>,

        /// SVM penalty
        #[arg(short = 'C', long = "svm-c", default_value = "1.0")]
        c: f64,

        /// Maximum coordinate-descent passes
        #[arg(long, default_value = "1000")]
        max_iter: usize,

        /// Seed for the coordinate visiting order
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Fail on split entries without rows or with unconsumed queues
        #[arg(long, default_value = "false")]
        strict: bool,
    },
    /// Predict catalytic residue probabilities for one structure
    Predict {
        /// Input PDB file
        #[arg(short, long)]
        input: PathBuf,

        /// Output `.npy` file of residue probabilities
        #[arg(short, long)]
        output: PathBuf,

        /// Model bundle written by `cross-validate`
        #[arg(short, long)]
        model: PathBuf,

        /// Counter executable
        #[arg(long, default_value = "run_kernel")]
        program: PathBuf,
    },
}

/// Expand directories into their `.pdb` files
fn collect_structures(inputs: &[PathBuf]) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(list_files_with_extension(input, "pdb")?);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

/// Record paths of every structure with a `.graph` file in `dir`
fn collect_records(dir: &Path, layout: &QueueLayout) -> PipelineResult<Vec<RecordPaths>> {
    list_files_with_extension(dir, "graph")?
        .iter()
        .map(|graph| {
            let id = StructureId::from_path(graph).ok_or_else(|| PipelineError::ValidationError {
                message: format!("cannot derive a structure id from {}", graph.display()),
            })?;
            Ok(RecordPaths::new(dir, &id, layout))
        })
        .collect()
}

fn contact_config(threshold: f64, chain: char) -> PipelineResult<ContactConfig> {
    let threshold = DistanceThreshold::new(threshold).map_err(|message| {
        PipelineError::ConfigurationError { field: "threshold".to_string(), message }
    })?;
    Ok(ContactConfig { threshold, chain })
}

fn main() -> PipelineResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Graph { input, output, threshold, chain, catalytic, method } => {
            let contact = contact_config(threshold, chain)?;
            let structures = collect_structures(&input)?;
            println!("Building contact graphs for {} structures", structures.len());
            println!("Threshold: {} Å, chain {}", contact.threshold, contact.chain);

            let sites = catalytic.as_deref().map(read_catalytic_sites).transpose()?;
            let written = write_structure_records(
                &structures,
                &output,
                &contact,
                sites.as_ref().map(|s| (s, method.as_str())),
            )?;
            println!("Wrote records for {} structures to {}", written.len(), output.display());
        }
        Commands::Count { records, output, program, method } => {
            let layout = match method {
                Some(method) => QueueLayout::Training { method },
                None => QueueLayout::Inference,
            };
            let record_paths = collect_records(&records, &layout)?;
            let counter = ExternalCounter::new(&CounterConfig { program, ..CounterConfig::default() });
            println!("Counting graphlets for {} structures", record_paths.len());

            let outputs = count_graphlets(&counter, &record_paths, &output)?;
            println!("Wrote {} count files to {}", outputs.len(), output.display());
        }
        Commands::Assemble { input, output } => {
            let (features, stats) = SparseFeatureAssembler::new().assemble_dir(&input)?;
            features.save(&output)?;
            println!(
                "Assembled {} rows x {} features from {} files into {}",
                stats.rows,
                stats.distinct_features,
                stats.files,
                output.display()
            );
        }
        Commands::CrossValidate {
            features,
            splits,
            records,
            output,
            method,
            threads,
            c,
            max_iter,
            seed,
            strict,
        } => {
            let contact = read_record_contact(&records)?;
            println!("Records built at {} Å, chain {}", contact.threshold, contact.chain);
            let mut builder = PipelineConfigBuilder::new(contact.threshold.get(), contact.chain)?
                .method(&method)
                .c(c)
                .max_iter(max_iter)
                .seed(seed)
                .strict(strict);
            if let Some(threads) = threads {
                builder = builder.num_threads(threads);
            }
            let config = builder.build()?;
            println!("Using {} threads", config.effective_thread_count());

            let feature_set = FeatureSet::load(&features)?;
            let table = SplitTable::from_file(&splits)?;
            println!(
                "Loaded {} rows, {} folds from {}",
                feature_set.n_rows(),
                table.fold_count(),
                splits.display()
            );

            let orchestrator = TrainingOrchestrator::new(config)?;
            let (report, bundle) = orchestrator.train(&feature_set, &table, &records)?;
            report.write(&output)?;
            bundle.save(&output.join(MODEL_FILE))?;

            println!("ROC AUC: {:.4}", report.metrics.roc_auc);
            println!("PR AUC: {:.4}", report.metrics.pr_auc);
            if report.diagnostics.unmatched_entries > 0 || report.diagnostics.unexhausted_entries > 0 {
                println!(
                    "Split entries without rows: {}, with unconsumed queues: {}",
                    report.diagnostics.unmatched_entries, report.diagnostics.unexhausted_entries
                );
            }
            println!("Model saved to {}", output.join(MODEL_FILE).display());
        }
        Commands::Predict { input, output, model, program } => {
            let bundle = ModelBundle::load(&model)?;
            let counter = ExternalCounter::new(&CounterConfig { program, ..CounterConfig::default() });
            let predictions =
                InferenceOrchestrator::from_bundle(bundle, counter).predict_to_npy(&input, &output)?;
            println!("\ncatalytic residue predictions saved to {}\n", output.display());
            println!("{} residues scored", predictions.len());
        }
    }

    Ok(())
}

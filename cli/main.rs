#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use pyrexia::config::{ExplainerKind, PipelineConfig};
use pyrexia::encode::EncodingError;
use pyrexia::model::{Classifier, LogisticModel};
use pyrexia::pipeline::{ErrorCategory, RiskPipeline};
use pyrexia::report::render_text;
use pyrexia::schema::{FEATURE_SCHEMA, FeatureKind, feature_spec};
use pyrexia::types::{PatientInput, RawValue};

#[derive(Clone, Copy, ValueEnum)]
pub enum ExplainerCli {
    /// Baseline plus contributions equals P(fever)
    Sampling,
    /// Baseline plus contributions equals the log-odds of fever, not P(fever)
    Linear,
}

impl From<ExplainerCli> for ExplainerKind {
    fn from(value: ExplainerCli) -> Self {
        match value {
            ExplainerCli::Sampling => ExplainerKind::Sampling,
            ExplainerCli::Linear => ExplainerKind::Linear,
        }
    }
}

#[derive(Args)]
pub struct PredictArgs {
    /// Path to the model artifact (overrides the configuration file)
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Patient fields as a TOML or JSON map; unset fields keep their defaults
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Set a single field, e.g. --set Sex=Female --set BMI=31.5
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub assignments: Vec<String>,

    /// Attribution method used to explain the prediction. `sampling` adds up
    /// to the reported probability; `linear` is exact but adds up in
    /// log-odds, not probability
    #[arg(long, value_enum)]
    pub explainer: Option<ExplainerCli>,

    /// Skip the feature impact analysis
    #[arg(long)]
    pub no_explain: bool,

    /// Seed for the background draw and the sampled feature orderings
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the assessment as JSON instead of a text report
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
#[command(
    name = "pyrexia",
    about = "Post-operative fever risk prediction after PCNL",
    long_about = "Encodes a patient's preoperative and operative fields, scores them with a \
                 trained logistic model, assigns a risk tier, and explains which features \
                 drove the prediction."
)]
struct Cli {
    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pipeline configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Predict fever risk for one patient")]
    Predict(PredictArgs),
    #[command(about = "List the model's input fields, ranges, options and defaults")]
    Schema {
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Load a model artifact and check it against the feature schema")]
    CheckModel {
        #[arg(long, value_name = "PATH")]
        model: Option<PathBuf>,
    },
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    let cli = Cli::parse();
    let Cli {
        verbose,
        config,
        command,
    } = cli;

    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = match command {
        Some(Commands::Predict(args)) => predict(config.as_deref(), args),
        Some(Commands::Schema { json }) => print_schema(json),
        Some(Commands::CheckModel { model }) => check_model(config.as_deref(), model),
        Some(Commands::Version) => {
            println!("pyrexia {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            log::info!("Reading configuration from: {}", path.display());
            Ok(PipelineConfig::load(path)?)
        }
        None => Ok(PipelineConfig::default()),
    }
}

/// Parses one `NAME=VALUE` assignment against the schema.
fn parse_assignment(assignment: &str) -> Result<(String, RawValue), EncodingError> {
    let (name, text) = assignment
        .split_once('=')
        .ok_or_else(|| EncodingError::UnknownField(assignment.to_string()))?;
    let name = name.trim();
    let spec = feature_spec(name).ok_or_else(|| EncodingError::UnknownField(name.to_string()))?;
    Ok((spec.name.to_string(), RawValue::parse_for(spec, text)?))
}

fn predict(config_path: Option<&Path>, args: PredictArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(config_path)?;
    if let Some(model) = args.model {
        config.model_path = model;
    }
    if let Some(explainer) = args.explainer {
        config.explainer = explainer.into();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.no_explain {
        config.explanations = false;
    }
    config.validate()?;

    let mut input = PatientInput::defaults();
    if let Some(path) = &args.input {
        input.merge(PatientInput::from_path(path)?);
    }
    for assignment in &args.assignments {
        let (name, value) = parse_assignment(assignment)?;
        input.set(&name, value);
    }
    input
        .validate()
        .map_err(|err| format!("{}: {}", ErrorCategory::InputValidation, err))?;

    let pipeline = RiskPipeline::from_config(&config);
    let assessment = pipeline
        .assess(&input)
        .map_err(|err| format!("{}: {}", err.category(), err))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&assessment)?);
    } else {
        print!("{}", render_text(&assessment));
    }
    Ok(())
}

fn print_schema(json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(&FEATURE_SCHEMA)?);
        return Ok(());
    }

    println!("{:<26} {:<48} {:<34} Default", "Field", "Label", "Domain");
    for spec in &FEATURE_SCHEMA {
        let (domain, default) = match spec.kind {
            FeatureKind::Numeric { min, max, default } => {
                (format!("[{min}, {max}]"), default.to_string())
            }
            FeatureKind::Categorical { default, .. } => {
                (spec.option_names().join(" | "), default.to_string())
            }
        };
        println!("{:<26} {:<48} {:<34} {}", spec.name, spec.label, domain, default);
    }
    Ok(())
}

fn check_model(config_path: Option<&Path>, model: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let path = match model {
        Some(path) => path,
        None => load_config(config_path)?.model_path,
    };
    println!("Loading model from: {}", path.display());
    let model = LogisticModel::load(&path)?;
    model.validate_against_schema()?;

    println!("Model expects {} features", model.n_features());
    println!("Intercept: {:.6}", model.intercept);
    println!(
        "Standardization: {}",
        if model.standardization.is_some() { "yes" } else { "no" }
    );
    println!("Background rows: {}", model.background.len());
    if let Some(description) = &model.description {
        println!("Description: {description}");
    }
    println!("Model is consistent with the feature schema.");
    Ok(())
}

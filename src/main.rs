//! Football match prediction CLI
//!
//! Train, evaluate and query linear match-outcome models from delimited files.

use clap::{Parser, Subcommand};
use football::{Config, Result};

#[derive(Parser)]
#[command(name = "football")]
#[command(about = "Football match outcome prediction", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "football.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and save it
    Train {
        /// Training data file
        data: String,
        /// Output model path
        model: String,
        /// Held-out data to evaluate after saving
        #[arg(long)]
        test: Option<String>,
        /// Override number of epochs
        #[arg(long)]
        epochs: Option<usize>,
        /// Override the random seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Evaluate a saved model on test data
    Evaluate {
        /// Model path
        model: String,
        /// Test data file
        data: String,
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Predict a single match, e.g. "10615,10586"
    Predict {
        /// Model path
        model: String,
        /// Delimited record laid out like the training data
        record: String,
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Show model information
    Info {
        /// Model path
        model: String,
    },
    /// Write the default config
    Init,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use table or json.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or fall back to defaults
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(e.exit_code());
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Train {
            data,
            model,
            test,
            epochs,
            seed,
        } => commands::train(&config, &data, &model, test.as_deref(), epochs, seed),
        Commands::Evaluate {
            model,
            data,
            format,
        } => commands::evaluate(&config, &model, &data, format),
        Commands::Predict {
            model,
            record,
            format,
        } => commands::predict(&config, &model, &record, format),
        Commands::Info { model } => commands::info(&model),
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

mod commands {
    use super::*;
    use football::data::{load_records, parse_line, SchemaDescriptor};
    use football::model::{store, ModelHead};
    use football::pipeline;
    use football::predict::{PredictionResult, Predictor};
    use football::training::EvaluationMetrics;

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        println!("\nNext steps:");
        println!("  1. Edit {} to match your data layout", config_path);
        println!("  2. Run 'football train <data> <model>' to train a model");
        println!("  3. Run 'football predict <model> \"HOME,AWAY\"' to make predictions");

        Ok(())
    }

    pub fn train(
        config: &Config,
        data: &str,
        model_path: &str,
        test: Option<&str>,
        epochs: Option<usize>,
        seed: Option<u64>,
    ) -> Result<()> {
        let mut config = config.clone();
        if let Some(e) = epochs {
            config.training.epochs = e;
        }
        if let Some(s) = seed {
            config.training.seed = s;
        }

        let schema = SchemaDescriptor::from_layout(&config.data.columns);
        let records = load_records(data, &schema, &config.data)?;

        println!(
            "Training {} model on {} records...",
            config.training.task,
            records.len()
        );
        let outcome = pipeline::train(&records, &config)?;
        println!("Training set: {}", outcome.training_metrics);

        store::save(&outcome.bundle, model_path)?;
        println!("Model saved to {}", model_path);

        if let Some(test_path) = test {
            let test_records = load_records(test_path, &schema, &config.data)?;
            let metrics = pipeline::evaluate(&outcome.bundle, &test_records, &config)?;
            print_metrics(&metrics);
        }

        Ok(())
    }

    pub fn evaluate(
        config: &Config,
        model_path: &str,
        data: &str,
        format: OutputFormat,
    ) -> Result<()> {
        let bundle = store::load(model_path)?;
        let schema = SchemaDescriptor::from_layout(&config.data.columns);
        let records = load_records(data, &schema, &config.data)?;

        let metrics = pipeline::evaluate(&bundle, &records, config)?;
        match format {
            OutputFormat::Table => print_metrics(&metrics),
            OutputFormat::Json => print_json(&metrics)?,
        }

        Ok(())
    }

    pub fn predict(
        config: &Config,
        model_path: &str,
        record: &str,
        format: OutputFormat,
    ) -> Result<()> {
        let predictor = Predictor::load(model_path, config.features.unknown_category_policy)?;
        let schema = SchemaDescriptor::from_layout(&config.data.columns);
        let record = parse_line(record, &schema, &config.data)?;

        let prediction = predictor.predict(&record)?;
        match format {
            OutputFormat::Table => {
                println!();
                println!("  {} vs {}", record.home_team, record.away_team);
                println!("───────────────────────────────");
                match &prediction {
                    PredictionResult::Label {
                        label,
                        probabilities,
                    } => {
                        println!("  Predicted: {}", label);
                        for (l, p) in probabilities {
                            println!("  {:<12} {:>5.1}%", l, p * 100.0);
                        }
                    }
                    PredictionResult::Score { value } => {
                        let target = predictor
                            .bundle()
                            .target
                            .map(|t| format!("{:?}", t))
                            .unwrap_or_else(|| "Score".to_string());
                        println!("  {}: {:.2}", target, value);
                    }
                }
                println!();
            }
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "home": record.home_team.as_str(),
                    "away": record.away_team.as_str(),
                    "prediction": prediction,
                });
                print_json(&json)?;
            }
        }

        Ok(())
    }

    pub fn info(model_path: &str) -> Result<()> {
        let bundle = store::load(model_path)?;

        println!("Model Information");
        println!("───────────────────────────────");
        println!("  Path:           {}", model_path);
        println!("  Format version: {}", store::FORMAT_VERSION);
        println!("  Schema version: {}", bundle.schema_version);
        println!("  Task:           {}", bundle.task());
        println!("  Features:       {}", bundle.encoder.dimension());
        println!("  Encoder:        {:08x}", bundle.encoder.fingerprint());
        for column in bundle.encoder.columns() {
            println!(
                "    {:<12} offset {:>4}, width {:>4}",
                column.field().name(),
                column.offset(),
                column.width()
            );
        }
        match bundle.model.head() {
            ModelHead::Classification { labels } => {
                println!("  Labels:         {}", labels.join(", "));
            }
            ModelHead::Regression { normalization } => {
                if let Some(target) = bundle.target {
                    println!("  Target:         {:?}", target);
                }
                println!(
                    "  Normalization:  mean={:.3}, std={:.3}",
                    normalization.mean, normalization.std
                );
            }
        }

        Ok(())
    }

    fn print_metrics(metrics: &EvaluationMetrics) {
        println!();
        println!("╔═══════════════════════════════════════╗");
        match metrics {
            EvaluationMetrics::Classification(m) => {
                println!("║  Multi-class classification metrics   ║");
                println!("╠═══════════════════════════════════════╣");
                println!("║  MicroAccuracy:    {:>18.3} ║", m.micro_accuracy);
                println!("║  MacroAccuracy:    {:>18.3} ║", m.macro_accuracy);
                println!("║  LogLoss:          {:>18.3} ║", m.log_loss);
                println!("║  LogLossReduction: {:>18.3} ║", m.log_loss_reduction);
            }
            EvaluationMetrics::Regression(m) => {
                println!("║  Regression metrics                   ║");
                println!("╠═══════════════════════════════════════╣");
                println!("║  R²:               {:>18.3} ║", m.r_squared);
                println!("║  RMSE:             {:>18.3} ║", m.root_mean_squared_error);
                println!("║  MAE:              {:>18.3} ║", m.mean_absolute_error);
            }
        }
        println!("╚═══════════════════════════════════════╝");
        println!();
    }

    fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
        println!("{}", json);
        Ok(())
    }
}

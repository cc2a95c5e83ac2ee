mod envconfig;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use smartfolders::{
    ArchitectureBuilder, ClassifierConfig, ClassifierInput, ClassifierModel, DeviceKind,
    NetworkType,
};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "smartfolders")]
#[command(version)]
#[command(about = "Build and inspect the smart-folder message classifier", long_about = None)]
struct Cli {
    #[command(flatten)]
    model: ModelArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// YAML or JSON classifier config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_parser = parse_network_type)]
    network_type: Option<NetworkType>,

    /// Comma separated exclusive class labels
    #[arg(long, global = true, value_delimiter = ',')]
    exclusive: Option<Vec<String>>,

    /// Comma separated overlapping class labels
    #[arg(long, global = true, value_delimiter = ',')]
    overlapping: Option<Vec<String>>,

    #[arg(long, global = true)]
    no_analytics: bool,

    #[arg(long, global = true)]
    num_words: Option<usize>,

    #[arg(long, global = true)]
    width: Option<usize>,

    /// auto, cpu, cuda, cuda:N or metal
    #[arg(long, global = true)]
    device: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the layer graph
    Describe {
        #[arg(short, long, value_enum, default_value = "json")]
        format: Format,
    },
    /// Instantiate the network and report its size
    Summary,
    /// Run a forward pass on zero inputs
    Forward {
        #[arg(short, long, default_value_t = 1)]
        batch: usize,
    },
    /// Write freshly initialized weights
    Init {
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn parse_network_type(s: &str) -> Result<NetworkType, String> {
    s.parse().map_err(|e: smartfolders::Error| e.to_string())
}

fn load_config(args: &ModelArgs, env: &envconfig::EnvConfig) -> anyhow::Result<ClassifierConfig> {
    let path = args.config.clone().or_else(|| env.config_path.clone());
    let mut config = match path {
        Some(path) => ClassifierConfig::from_file(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ClassifierConfig::default(),
    };

    if let Some(network_type) = args.network_type {
        config.network_type = network_type;
    }
    if let Some(classes) = &args.exclusive {
        config.exclusive_classes = Some(classes.clone());
    }
    if let Some(classes) = &args.overlapping {
        config.overlapping_classes = Some(classes.clone());
    }
    if args.no_analytics {
        config.analytics_input = false;
    }
    if let Some(n) = args.num_words {
        config.num_words = n;
    }
    if let Some(width) = args.width {
        config.width = width;
    }
    Ok(config)
}

fn open_device(
    args: &ModelArgs,
    env: &envconfig::EnvConfig,
) -> anyhow::Result<candle_core::Device> {
    let kind: DeviceKind = args.device.as_deref().unwrap_or(&env.device).parse()?;
    Ok(kind.open()?)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let env = envconfig::EnvConfig::from_env();
    let config = load_config(&cli.model, &env)?;

    match cli.command {
        Commands::Describe { format } => {
            let graph = ArchitectureBuilder::new(&config).build()?;
            let text = match format {
                Format::Json => graph.to_json()?,
                Format::Yaml => graph.to_yaml()?,
            };
            println!("{text}");
        }
        Commands::Summary => {
            let device = open_device(&cli.model, &env)?;
            let model = ClassifierModel::new(&config, &device)?;
            let graph = model.network().graph();
            println!("encoder:     {:?}", graph.encoder);
            println!("topology:    {:?}", graph.topology);
            println!("trunk width: {}", model.network().trunk_width());
            println!("parameters:  {}", model.parameter_count());
        }
        Commands::Forward { batch } => {
            let device = open_device(&cli.model, &env)?;
            let model = ClassifierModel::new(&config, &device)?;
            let input = ClassifierInput::zeros(&config, batch, &device)?;
            let output = model.forward(&input, false)?;
            if let Some(t) = output.exclusive() {
                println!("exclusive:   {:?}", t.dims());
            }
            if let Some(t) = output.overlapping() {
                println!("overlapping: {:?}", t.dims());
            }
        }
        Commands::Init { out } => {
            let device = open_device(&cli.model, &env)?;
            let model = ClassifierModel::new(&config, &device)?;
            model
                .save(&out)
                .with_context(|| format!("failed to write {}", out.display()))?;
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("smartfolders=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

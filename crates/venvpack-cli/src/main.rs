mod commands;

use clap::{Parser, Subcommand};
use commands::EXIT_FAILURE;
use std::path::PathBuf;
use std::process::ExitCode;
use venvpack_core::Engine;

#[derive(Debug, Parser)]
#[command(
    name = "venvpack",
    version,
    about = "Package declarative Python virtualenv deployments"
)]
struct Cli {
    /// Path to the deploy configuration file.
    #[arg(long, default_value = "deploy.conf", global = true)]
    deploy_conf: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// Build a package from the deploy configuration.
    CreatePackage {
        /// Package format to build (see list_plugins).
        format: String,
    },
    /// Render the build-control file for a format without building.
    CreatePackageConfig {
        /// Package format to render the configuration for.
        format: String,
        /// Output filename; defaults to the format's conventional name.
        #[arg(long)]
        outfile: Option<PathBuf>,
    },
    /// List the registered package formats and their availability.
    ListPlugins,
    /// Print the resolved value of one configuration setting.
    GetSetting {
        /// Configuration section name.
        section: String,
        /// Setting name within the section.
        item: String,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("VENVPACK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let engine = Engine::new(&cli.deploy_conf);
    let json_output = cli.json;

    let result = match cli.command {
        Commands::CreatePackage { format } => {
            commands::create_package::run(&engine, &format, json_output)
        }
        Commands::CreatePackageConfig { format, outfile } => {
            commands::create_config::run(&engine, &format, outfile.as_deref(), json_output)
        }
        Commands::ListPlugins => commands::list_plugins::run(&engine, json_output),
        Commands::GetSetting { section, item } => {
            commands::get_setting::run(&engine, &section, &item, json_output)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

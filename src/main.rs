use anyhow::{Context, Result};
use clap::Parser;
use setupkeep::application::{Action, LifecycleOptions};
use setupkeep::commands::{self, Config};
use setupkeep::error::{EXIT_FAILURE, LifecycleError};
use setupkeep::interrupt::Interrupt;
use setupkeep::registry::InstallScope;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// setupkeep - install, repair and remove archive-based products
///
/// Every file a product places on disk is recorded in a manifest, so repair
/// and removal delete exactly what the product owns. Files listed by several
/// products are kept until the last one is removed.
///
/// Examples:
///   setupkeep install -g MyApp -o /opt/myapp myapp.tar.gz
///   setupkeep repair -g MyApp myapp-1.1.tar.gz
///   setupkeep remove -g MyApp --remove-output-dir
#[derive(Parser, Debug)]
#[command(author, version = env!("SETUPKEEP_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// State root directory (replaces the system locations; also via SETUPKEEP_ROOT)
    #[arg(long = "root", env = "SETUPKEEP_ROOT", value_name = "PATH", global = true)]
    pub root: Option<PathBuf>,

    /// Machine-wide or per-user installation
    #[arg(long, value_enum, default_value_t = InstallScope::User, global = true)]
    pub scope: InstallScope,

    /// Directory holding the manifests
    #[arg(long = "data-dir", value_name = "PATH", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Name of the manifest directory under the state root
    #[arg(
        long = "data-dir-name",
        value_name = "NAME",
        global = true,
        conflicts_with = "data_dir"
    )]
    pub data_dir_name: Option<String>,

    /// Write log output to a file instead of stderr
    #[arg(long = "log-file", short = 'L', value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log progress messages
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Show a progress bar
    #[arg(long, global = true)]
    pub progress: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Extract archives and record the product
    Install(InstallArgs),

    /// Re-extract a product and remove files it no longer ships
    Repair(RepairArgs),

    /// Remove every file of a product
    Remove(RemoveArgs),

    /// Record that a product depends on another one
    AddDependent(DependentArgs),

    /// Forget that a product depends on another one
    RemoveDependent(DependentArgs),
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Product identifier
    #[arg(short = 'g', long = "product-id", value_name = "ID")]
    pub product_id: String,

    /// Directory to extract into
    #[arg(short = 'o', long = "output-dir", value_name = "PATH")]
    pub output_dir: PathBuf,

    /// Archives to extract (.tar.gz, .tgz, .zip)
    #[arg(value_name = "ARCHIVE", required = true)]
    pub archives: Vec<PathBuf>,

    /// List of generated files to remove with the product, relative to the output directory
    #[arg(short = 'A', long, value_name = "FILE")]
    pub artifacts: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct RepairArgs {
    #[arg(short = 'g', long = "product-id", value_name = "ID")]
    pub product_id: String,

    /// Directory to extract into (defaults to the recorded one)
    #[arg(short = 'o', long = "output-dir", value_name = "PATH")]
    pub output_dir: Option<PathBuf>,

    #[arg(value_name = "ARCHIVE", required = true)]
    pub archives: Vec<PathBuf>,

    #[arg(short = 'A', long, value_name = "FILE")]
    pub artifacts: Option<PathBuf>,

    #[command(flatten)]
    pub removal: RemovalArgs,
}

#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    #[arg(short = 'g', long = "product-id", value_name = "ID")]
    pub product_id: String,

    /// Fail when the product's manifest cannot be read
    #[arg(long)]
    pub require_list: bool,

    #[command(flatten)]
    pub removal: RemovalArgs,
}

#[derive(clap::Args, Debug)]
pub struct RemovalArgs {
    /// Proceed even if other products depend on this one
    #[arg(long)]
    pub ignore_dependents: bool,

    /// Delete files that are in use at the next reboot
    #[arg(long)]
    pub mark_for_reboot: bool,

    /// Delete files even if other products list them
    #[arg(long)]
    pub skip_global_refcount: bool,

    /// Also remove the previous output directory once it is empty
    #[arg(short = 'r', long)]
    pub remove_output_dir: bool,
}

#[derive(clap::Args, Debug)]
pub struct DependentArgs {
    /// Product that is depended on
    #[arg(value_name = "PRODUCT")]
    pub product: String,

    /// Product that depends on it
    #[arg(value_name = "DEPENDENT")]
    pub dependent: String,
}

impl RemovalArgs {
    fn apply(&self, options: LifecycleOptions) -> LifecycleOptions {
        LifecycleOptions {
            ignore_dependents: self.ignore_dependents,
            mark_for_reboot: self.mark_for_reboot,
            skip_global_refcount: self.skip_global_refcount,
            remove_output_dir: self.remove_output_dir,
            ..options
        }
    }
}

impl InstallArgs {
    fn options(&self) -> LifecycleOptions {
        LifecycleOptions {
            output_dir: Some(self.output_dir.clone()),
            archives: self.archives.clone(),
            artifacts: self.artifacts.clone(),
            ..Default::default()
        }
    }
}

impl RepairArgs {
    fn options(&self) -> LifecycleOptions {
        self.removal.apply(LifecycleOptions {
            output_dir: self.output_dir.clone(),
            archives: self.archives.clone(),
            artifacts: self.artifacts.clone(),
            ..Default::default()
        })
    }
}

impl RemoveArgs {
    fn options(&self) -> LifecycleOptions {
        self.removal.apply(LifecycleOptions {
            require_list: self.require_list,
            ..Default::default()
        })
    }
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "info" } else { "warn" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    if let Some(path) = log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::new(
        setupkeep::runtime::RealRuntime,
        cli.scope,
        cli.root,
        cli.data_dir,
        cli.data_dir_name,
    )?;
    let interrupt = Interrupt::new();
    interrupt.watch_ctrl_c();

    match cli.command {
        Commands::Install(args) => commands::run_lifecycle(
            &config,
            Action::Install,
            &args.product_id,
            &args.options(),
            cli.progress,
            &interrupt,
        ),
        Commands::Repair(args) => commands::run_lifecycle(
            &config,
            Action::Repair,
            &args.product_id,
            &args.options(),
            cli.progress,
            &interrupt,
        ),
        Commands::Remove(args) => commands::run_lifecycle(
            &config,
            Action::Remove,
            &args.product_id,
            &args.options(),
            cli.progress,
            &interrupt,
        ),
        Commands::AddDependent(args) => {
            commands::add_dependent(&config, &args.product, &args.dependent)
        }
        Commands::RemoveDependent(args) => {
            commands::remove_dependent(&config, &args.product, &args.dependent)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<LifecycleError>()
        .map_or(EXIT_FAILURE, LifecycleError::exit_code)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<LifecycleError>() {
                Some(err) => eprintln!("Error: {}", err),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from([
            "setupkeep",
            "install",
            "-g",
            "ABC123",
            "-o",
            "/opt/abc",
            "a.tar.gz",
            "b.zip",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.product_id, "ABC123");
                let options = args.options();
                assert_eq!(options.output_dir, Some(PathBuf::from("/opt/abc")));
                assert_eq!(
                    options.archives,
                    vec![PathBuf::from("a.tar.gz"), PathBuf::from("b.zip")]
                );
                assert!(!options.ignore_dependents);
            }
            _ => panic!("Expected Install command"),
        }
        assert_eq!(cli.scope, InstallScope::User);
    }

    #[test]
    fn test_cli_install_requires_output_dir() {
        let result = Cli::try_parse_from(["setupkeep", "install", "-g", "ABC123", "a.tar.gz"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_remove_flags() {
        let cli = Cli::try_parse_from([
            "setupkeep",
            "remove",
            "-g",
            "ABC123",
            "--ignore-dependents",
            "--mark-for-reboot",
            "--skip-global-refcount",
            "-r",
            "--require-list",
            "--scope",
            "machine",
        ])
        .unwrap();
        match cli.command {
            Commands::Remove(args) => {
                let options = args.options();
                assert!(options.ignore_dependents);
                assert!(options.mark_for_reboot);
                assert!(options.skip_global_refcount);
                assert!(options.remove_output_dir);
                assert!(options.require_list);
                assert!(options.archives.is_empty());
            }
            _ => panic!("Expected Remove command"),
        }
        assert_eq!(cli.scope, InstallScope::Machine);
    }

    #[test]
    fn test_cli_repair_output_dir_is_optional() {
        let cli =
            Cli::try_parse_from(["setupkeep", "repair", "-g", "ABC123", "a.tar.gz"]).unwrap();
        match cli.command {
            Commands::Repair(args) => assert_eq!(args.options().output_dir, None),
            _ => panic!("Expected Repair command"),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "setupkeep",
            "--root",
            "/tmp/state",
            "--data-dir-name",
            "lists",
            "-v",
            "add-dependent",
            "Runtime",
            "App",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/state")));
        assert_eq!(cli.data_dir_name.as_deref(), Some("lists"));
        assert!(cli.verbose);
        match cli.command {
            Commands::AddDependent(args) => {
                assert_eq!(args.product, "Runtime");
                assert_eq!(args.dependent, "App");
            }
            _ => panic!("Expected AddDependent command"),
        }
    }

    #[test]
    fn test_cli_data_dir_conflicts_with_name() {
        let result = Cli::try_parse_from([
            "setupkeep",
            "--data-dir",
            "/srv/lists",
            "--data-dir-name",
            "lists",
            "remove",
            "-g",
            "ABC123",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_exit_code_mapping() {
        let blocked = anyhow::Error::from(LifecycleError::DependencyBlocked {
            id: "ABC123".into(),
            count: 2,
        });
        assert_eq!(exit_code(&blocked), setupkeep::error::EXIT_HAS_DEPENDENTS);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), EXIT_FAILURE);
    }
}

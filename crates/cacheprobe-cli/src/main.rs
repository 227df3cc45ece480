#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cacheprobe_config::{Configuration, ResourceState};
use cacheprobe_engine::{CommandProbe, CreateOutcome, EngineError, ReadOutcome, Reconciler};
use cacheprobe_image::RegistryClient;
use cacheprobe_options::Diagnostics;
use cacheprobe_util::Cancellation;

type CliResult = Result<(), Box<dyn Error>>;

const DEFAULT_CONFIG: &str = "cacheprobe.toml";
const DEFAULT_STATE: &str = "cacheprobe.state.toml";

#[derive(Debug, Parser)]
#[command(
    name = "cacheprobe",
    about = "Find a previously built devcontainer image in a cache repository"
)]
#[command(version)]
struct Cli {
    /// Increase log output (-v for info, -vv for debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct PassArgs {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// State file
    #[arg(long, default_value = DEFAULT_STATE)]
    state: PathBuf,
    /// Abort the pass after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the computed environment
    Env {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Probe for a cached image and write the state file
    Create(PassArgs),
    /// Check the state file against the registry
    Read(PassArgs),
    /// Read the state file if it exists, create it otherwise
    Apply(PassArgs),
    /// Forget the state file
    Delete {
        /// State file
        #[arg(long, default_value = DEFAULT_STATE)]
        state: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Env { config } => cmd_env(&config),
        Command::Create(args) => cmd_create(&args),
        Command::Read(args) => cmd_read(&args),
        Command::Apply(args) => cmd_apply(&args),
        Command::Delete { state } => cmd_delete(&state),
    };

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

/// Default log filter for a `-v` count.
fn log_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "cacheprobe=warn",
        1 => "cacheprobe=info",
        _ => "cacheprobe=debug",
    }
}

/// `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn print_diagnostics(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.iter() {
        eprintln!("{diagnostic}");
    }
}

/// Print the diagnostics behind an invalid configuration before failing.
fn report(err: EngineError) -> Box<dyn Error> {
    if let EngineError::InvalidOptions { diagnostics, .. } = &err {
        print_diagnostics(diagnostics);
    }
    err.into()
}

fn cancellation(timeout: Option<u64>) -> Cancellation {
    match timeout {
        Some(secs) => Cancellation::with_timeout(Duration::from_secs(secs)),
        None => Cancellation::new(),
    }
}

/// A registry client honouring the resolved `insecure` option.
fn registry_for(config: &Configuration) -> RegistryClient {
    RegistryClient::new(cacheprobe_options::resolve(config).options.insecure)
}

/// The environment entries for a configuration file.
fn env_entries(config_path: &Path) -> Result<Vec<String>, Box<dyn Error>> {
    let config = Configuration::from_path(config_path)?;
    let resolution = cacheprobe_options::resolve(&config);
    print_diagnostics(&resolution.diagnostics);
    if resolution.diagnostics.has_errors() {
        return Err(format!(
            "configuration has {} error(s)",
            resolution.diagnostics.error_count()
        )
        .into());
    }
    Ok(resolution.environment(&config).entries())
}

fn cmd_env(config_path: &Path) -> CliResult {
    for entry in env_entries(config_path)? {
        println!("{entry}");
    }
    Ok(())
}

fn create(reconciler: &Reconciler<'_>, config: &Configuration, args: &PassArgs) -> CliResult {
    let cancel = cancellation(args.timeout);
    let result = reconciler.create(config, &cancel).map_err(report)?;
    print_diagnostics(&result.diagnostics);
    result.state.write_to(&args.state)?;

    match result.outcome {
        CreateOutcome::Found => eprintln!("    Found cached image `{}`", result.state.image),
        CreateOutcome::NotFound => {
            eprintln!("    No cached image, using `{}`", result.state.image);
        }
    }
    println!("{}", result.state.image);
    Ok(())
}

fn cmd_create(args: &PassArgs) -> CliResult {
    let config = Configuration::from_path(&args.config)?;
    let registry = registry_for(&config);
    let probe = CommandProbe::new();
    create(&Reconciler::new(&registry, &probe), &config, args)
}

/// Run Read against an existing state file. Returns whether the state
/// survived; an invalidated state file is removed.
fn read(
    reconciler: &Reconciler<'_>,
    config: &Configuration,
    prior: &ResourceState,
    args: &PassArgs,
) -> Result<bool, Box<dyn Error>> {
    let cancel = cancellation(args.timeout);
    let result = reconciler.read(config, prior, &cancel).map_err(report)?;
    print_diagnostics(&result.diagnostics);

    match (result.outcome, result.state) {
        (ReadOutcome::StillFound, Some(state)) => {
            let state = reconciler.update(&state);
            state.write_to(&args.state)?;
            eprintln!("    Cached image `{}` is still present", state.image);
            println!("{}", state.image);
            Ok(true)
        }
        (ReadOutcome::Transient, Some(state)) => {
            state.write_to(&args.state)?;
            eprintln!("    Keeping `{}`", state.image);
            println!("{}", state.image);
            Ok(true)
        }
        _ => {
            cacheprobe_util::fs::remove_file_if_exists(&args.state)?;
            eprintln!("    State invalidated, {} removed", args.state.display());
            Ok(false)
        }
    }
}

fn load_state(path: &Path) -> Result<ResourceState, Box<dyn Error>> {
    match ResourceState::from_path(path)? {
        Some(state) => Ok(state),
        None => Err(format!(
            "no state file at {}, run `cacheprobe create` first",
            path.display()
        )
        .into()),
    }
}

fn cmd_read(args: &PassArgs) -> CliResult {
    let config = Configuration::from_path(&args.config)?;
    let prior = load_state(&args.state)?;
    let registry = registry_for(&config);
    let probe = CommandProbe::new();
    read(&Reconciler::new(&registry, &probe), &config, &prior, args)?;
    Ok(())
}

fn cmd_apply(args: &PassArgs) -> CliResult {
    let config = Configuration::from_path(&args.config)?;
    let registry = registry_for(&config);
    let probe = CommandProbe::new();
    let reconciler = Reconciler::new(&registry, &probe);

    if let Some(prior) = ResourceState::from_path(&args.state)? {
        if read(&reconciler, &config, &prior, args)? {
            return Ok(());
        }
    }
    create(&reconciler, &config, args)
}

fn cmd_delete(state_path: &Path) -> CliResult {
    let Some(state) = ResourceState::from_path(state_path)? else {
        eprintln!("    Nothing to delete at {}", state_path.display());
        return Ok(());
    };
    let registry = RegistryClient::new(false);
    let probe = CommandProbe::new();
    Reconciler::new(&registry, &probe).delete(&state);
    cacheprobe_util::fs::remove_file_if_exists(state_path)?;
    eprintln!("    Removed {}", state_path.display());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use clap::CommandFactory;

    const CONFIG: &str = r#"
builder_image = "reg.local/envbuilder:latest"
cache_repo = "reg.local/cache"
git_url = "https://git.example/repo.git"

[extra_env]
ENVBUILDER_VERBOSE = "true"
FOO = "bar"
"#;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join(DEFAULT_CONFIG);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_create_defaults() {
        let cli = Cli::try_parse_from(["cacheprobe", "create"]).unwrap();
        assert_eq!(cli.verbose, 0);
        match cli.command {
            Command::Create(args) => {
                assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));
                assert_eq!(args.state, PathBuf::from(DEFAULT_STATE));
                assert!(args.timeout.is_none());
            }
            other => panic!("expected Create, got {other:?}"),
        }
    }

    #[test]
    fn parse_apply_with_flags() {
        let cli = Cli::try_parse_from([
            "cacheprobe",
            "apply",
            "--config",
            "c.toml",
            "--state",
            "s.toml",
            "--timeout",
            "90",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert_eq!(args.config, PathBuf::from("c.toml"));
                assert_eq!(args.state, PathBuf::from("s.toml"));
                assert_eq!(args.timeout, Some(90));
            }
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["cacheprobe", "destroy"]).is_err());
    }

    #[test]
    fn verbosity_maps_to_filter() {
        assert_eq!(log_directive(0), "cacheprobe=warn");
        assert_eq!(log_directive(1), "cacheprobe=info");
        assert_eq!(log_directive(2), "cacheprobe=debug");
        assert_eq!(log_directive(9), "cacheprobe=debug");
    }

    #[test]
    fn timeout_builds_a_deadline() {
        assert!(cancellation(None).remaining().is_none());
        assert!(cancellation(Some(60)).remaining().is_some());
    }

    #[test]
    fn env_entries_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);

        assert_eq!(
            env_entries(&path).unwrap(),
            vec![
                "ENVBUILDER_CACHE_REPO=reg.local/cache",
                "ENVBUILDER_GIT_URL=https://git.example/repo.git",
                "ENVBUILDER_REMOTE_REPO_BUILD_MODE=true",
                "ENVBUILDER_VERBOSE=true",
                "FOO=bar",
            ]
        );
    }

    #[test]
    fn env_rejects_invalid_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            &CONFIG.replace("ENVBUILDER_VERBOSE = \"true\"", "ENVBUILDER_VERBOSE = \"maybe\""),
        );
        let err = env_entries(&path).unwrap_err();
        assert!(err.to_string().contains("1 error"));
    }

    #[test]
    fn read_of_a_miss_removes_the_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path(), CONFIG);
        let state_path = dir.path().join(DEFAULT_STATE);
        ResourceState {
            id: cacheprobe_config::NIL_ID.to_owned(),
            exists: false,
            image: "reg.local/envbuilder:latest".to_owned(),
            env: Vec::new(),
            env_map: BTreeMap::new(),
        }
        .write_to(&state_path)
        .unwrap();

        let args = PassArgs {
            config,
            state: state_path.clone(),
            timeout: None,
        };
        cmd_read(&args).unwrap();
        assert!(!state_path.exists());
    }

    #[test]
    fn read_without_state_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = PassArgs {
            config: write_config(dir.path(), CONFIG),
            state: dir.path().join(DEFAULT_STATE),
            timeout: None,
        };
        let err = cmd_read(&args).unwrap_err();
        assert!(err.to_string().contains("no state file"));
    }

    #[test]
    fn delete_removes_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join(DEFAULT_STATE);
        ResourceState {
            id: cacheprobe_config::NIL_ID.to_owned(),
            exists: false,
            image: "reg.local/envbuilder:latest".to_owned(),
            env: Vec::new(),
            env_map: BTreeMap::new(),
        }
        .write_to(&state_path)
        .unwrap();

        cmd_delete(&state_path).unwrap();
        assert!(!state_path.exists());
        cmd_delete(&state_path).unwrap();
    }
}

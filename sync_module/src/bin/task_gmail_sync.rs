//! Keeps Taskwarrior tasks in step with Gmail threads carrying an action label.
//!
//! One reconciliation pass per invocation:
//! - labelled threads without a task get a new task linking back to the thread
//! - threads whose task is completed lose the label
//! - tasks whose thread lost the label are marked done

use std::env;
use std::process::exit;

use reconcile_module::Reconciler;
use sync_module::adapters::{GmailThreadSource, TaskwarriorStore};
use sync_module::config::{validate_tag, SyncConfig};
use sync_module::google_auth::{CredentialProvider, GoogleAuth, StaticToken};
use sync_module::{Driver, RunMode, SyncError, SyncReport};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const EXIT_FATAL: i32 = 1;
const EXIT_PARTIAL: i32 = 2;

fn print_usage() {
    eprintln!(
        r##"Usage: task-gmail-sync [options]

Options:
  --dry-run            Show what would change without changing anything
  --label <name>       Gmail label marking action threads (default: gtd/next-action)
  --tag <tag>          Taskwarrior tag marking synced tasks (default: gmail)
  --no-browser-auth    Fail instead of opening the browser authorization flow
  --verbose            Log debug output
  --help               Show this message

Environment Variables:
  TASK_GMAIL_SYNC_CONFIG            - Config file (default: ~/.config/task-gmail-sync/config.toml)
  TASK_GMAIL_SYNC_LABEL             - Same as --label
  TASK_GMAIL_SYNC_TAG               - Same as --tag
  TASK_GMAIL_SYNC_MAIL_ACCOUNT      - Account index used in mail links (default: 0)
  TASK_GMAIL_SYNC_CREDENTIALS_PATH  - OAuth client secret (default: /etc/task-gmail-sync/credentials.json)
  TASK_GMAIL_SYNC_TOKEN_PATH        - Token cache (default: ~/.cache/task-gmail-sync/token.json)
  TASK_GMAIL_SYNC_INTERACTIVE_AUTH  - Allow browser authorization (default: true)
  TASKWARRIOR_BIN                   - Taskwarrior binary (default: task)
  GOOGLE_ACCESS_TOKEN               - Pre-generated access token; skips OAuth entirely

Exit status is 1 when the run could not complete and 2 when some changes failed.
"##
    );
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    dry_run: bool,
    label: Option<String>,
    tag: Option<String>,
    no_browser_auth: bool,
    verbose: bool,
    help: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        match flag {
            "--dry-run" => parsed.dry_run = true,
            "--no-browser-auth" => parsed.no_browser_auth = true,
            "--verbose" | "-v" => parsed.verbose = true,
            "--help" | "-h" => parsed.help = true,
            "--label" | "--tag" => {
                let value = match inline {
                    Some(value) => value,
                    None => iter
                        .next()
                        .cloned()
                        .ok_or_else(|| format!("{} requires a value", flag))?,
                };
                if value.trim().is_empty() {
                    return Err(format!("{} requires a value", flag));
                }
                if flag == "--label" {
                    parsed.label = Some(value);
                } else {
                    parsed.tag = Some(value);
                }
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }

    Ok(parsed)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &CliArgs) -> Result<SyncConfig, SyncError> {
    let mut config = SyncConfig::load()?;
    if let Some(label) = &cli.label {
        config.label = label.trim().to_string();
    }
    if let Some(tag) = &cli.tag {
        let tag = tag.trim().to_string();
        validate_tag(&tag)?;
        config.tag = tag;
    }
    if cli.no_browser_auth {
        config.interactive_auth = false;
    }
    Ok(config)
}

fn credentials(config: &SyncConfig) -> Box<dyn CredentialProvider> {
    if let Some(token) = &config.access_token {
        debug!("Using GOOGLE_ACCESS_TOKEN");
        return Box::new(StaticToken::new(token.clone()));
    }
    Box::new(GoogleAuth::new(config.auth_config()))
}

fn run(cli: &CliArgs) -> Result<SyncReport, SyncError> {
    let config = load_config(cli)?;
    debug!(
        "label={} tag={} task_bin={} credentials={}",
        config.label,
        config.tag,
        config.task_bin.display(),
        config.credentials_path.display()
    );

    let source = GmailThreadSource::new(credentials(&config), config.gmail_api_base_url.clone());
    let store = TaskwarriorStore::new(config.task_bin.clone());
    let reconciler = Reconciler::new(config.tag.clone(), config.reference_builder());
    let driver = Driver::new(source, store, reconciler, config.label.clone());

    let mode = if cli.dry_run {
        RunMode::DryRun
    } else {
        RunMode::Apply
    };
    driver.run(mode)
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("Error: {}", message);
            print_usage();
            exit(EXIT_FATAL);
        }
    };
    if cli.help {
        print_usage();
        return;
    }

    init_logging(cli.verbose);

    match run(&cli) {
        Ok(report) => {
            print!("{}", report);
            if report.aborted.is_some() {
                exit(EXIT_FATAL);
            }
            if report.has_failures() {
                exit(EXIT_PARTIAL);
            }
        }
        Err(err) => {
            error!("{}", err);
            exit(EXIT_FATAL);
        }
    }
}

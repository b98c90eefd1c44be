use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDateTime;
use chutney_store::config::{
    self, AppConfig, AppConfigOverrides, ConfigError, DatabaseConfig, LoggingConfig, StoreConfig,
};
use chutney_store::jira_store::{JiraFileStore, JiraServerConfiguration, LinkKind};
use chutney_store::logging;
use chutney_store::metrics::Metrics;
use chutney_store::scenario::{SaveOutcome, ScenarioRepository, TestCase};
use chutney_store::schedule::{Frequency, PeriodicScheduledCampaign, ScheduleStore};
use serde::Serialize;

const USAGE: &str = "usage: chutney-store <command>
  search [filter]
  scenario list|show <id>|remove <id>|import <file.json>
  link list <kind>|get <kind> <id>|set <kind> <id> <jira-id>|remove <kind> <id>
  jira-config show|set <file.json>
  schedule list|add <yyyy-mm-ddThh:mm:ss> <frequency> <campaign-id>=<title>...|remove <id>
kinds: scenario, campaign, campaign-execution";

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn load_config() -> CliResult<AppConfig> {
    let overrides = AppConfigOverrides::from_env();
    let mut cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(ConfigError::MissingConfigFile { path })
            if overrides.store_folder.is_some() && overrides.database_path.is_some() =>
        {
            logging::debug(format!(
                "no config file at {}, using environment only",
                path.display()
            ));
            AppConfig {
                store: StoreConfig {
                    folder: String::new(),
                },
                database: DatabaseConfig {
                    path: String::new(),
                },
                logging: LoggingConfig::default(),
            }
        }
        Err(err) => return Err(err.into()),
    };
    cfg.apply_overrides(&overrides)?;
    Ok(cfg)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn arg<'a>(args: &'a [String], idx: usize) -> CliResult<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| USAGE.into())
}

fn link_kind(raw: &str) -> CliResult<LinkKind> {
    LinkKind::parse(raw).ok_or_else(|| format!("unknown link kind '{raw}'").into())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &str) -> CliResult<T> {
    let raw = std::fs::read_to_string(Path::new(path))
        .map_err(|err| format!("cannot read {path}: {err}"))?;
    Ok(serde_json::from_str(&raw).map_err(|err| format!("cannot parse {path}: {err}"))?)
}

fn run_search(cfg: &AppConfig, metrics: &Arc<Metrics>, args: &[String]) -> CliResult<()> {
    let repo = ScenarioRepository::open(Path::new(&cfg.database.path), Arc::clone(metrics))?;
    let filter = args.join(" ");
    print_json(&repo.search(&filter)?)
}

fn run_scenario(cfg: &AppConfig, metrics: &Arc<Metrics>, args: &[String]) -> CliResult<()> {
    let repo = ScenarioRepository::open(Path::new(&cfg.database.path), Arc::clone(metrics))?;
    match arg(args, 0)? {
        "list" => print_json(&repo.find_all()?),
        "show" => {
            let id = arg(args, 1)?;
            match repo.find_by_id(id)? {
                Some(found) => print_json(&found),
                None => Err(format!("scenario {id} not found").into()),
            }
        }
        "remove" => {
            repo.remove_by_id(arg(args, 1)?)?;
            Ok(())
        }
        "import" => {
            let test_case: TestCase = read_json_file(arg(args, 1)?)?;
            match repo.save(&test_case)? {
                SaveOutcome::Saved(id) => {
                    println!("{id}");
                    Ok(())
                }
                SaveOutcome::VersionConflict { id, version } => Err(format!(
                    "scenario {id} not found at version {version}: it was modified since"
                )
                .into()),
            }
        }
        _ => Err(USAGE.into()),
    }
}

fn run_link(cfg: &AppConfig, metrics: &Arc<Metrics>, args: &[String]) -> CliResult<()> {
    let store = JiraFileStore::open(&cfg.store.folder, Arc::clone(metrics))?;
    let kind = link_kind(arg(args, 1)?)?;
    match arg(args, 0)? {
        "list" => print_json(&store.get_all(kind)?),
        "get" => {
            println!("{}", store.get_by_id(kind, arg(args, 2)?)?);
            Ok(())
        }
        "set" => Ok(store.save(kind, arg(args, 2)?, arg(args, 3)?)?),
        "remove" => Ok(store.remove(kind, arg(args, 2)?)?),
        _ => Err(USAGE.into()),
    }
}

fn run_jira_config(cfg: &AppConfig, metrics: &Arc<Metrics>, args: &[String]) -> CliResult<()> {
    let store = JiraFileStore::open(&cfg.store.folder, Arc::clone(metrics))?;
    match arg(args, 0)? {
        "show" => print_json(&store.load_server_configuration()?),
        "set" => {
            let configuration: JiraServerConfiguration = read_json_file(arg(args, 1)?)?;
            Ok(store.save_server_configuration(&configuration)?)
        }
        _ => Err(USAGE.into()),
    }
}

fn parse_campaign(raw: &str) -> CliResult<(i64, String)> {
    let (id, title) = raw.split_once('=').unwrap_or((raw, ""));
    let id = id
        .parse::<i64>()
        .map_err(|_| format!("invalid campaign id in '{raw}'"))?;
    Ok((id, title.to_string()))
}

fn run_schedule(cfg: &AppConfig, metrics: &Arc<Metrics>, args: &[String]) -> CliResult<()> {
    let store = ScheduleStore::open(&cfg.store.folder, Arc::clone(metrics))?;
    match arg(args, 0)? {
        "list" => print_json(&store.scheduled_campaigns()?),
        "add" => {
            let date_raw = arg(args, 1)?;
            let date = NaiveDateTime::parse_from_str(date_raw, "%Y-%m-%dT%H:%M:%S")
                .map_err(|err| format!("invalid date '{date_raw}': {err}"))?;
            let frequency = Frequency::from_label(arg(args, 2)?);
            let campaigns = args
                .get(3..)
                .unwrap_or_default()
                .iter()
                .map(|raw| parse_campaign(raw))
                .collect::<CliResult<Vec<_>>>()?;
            if campaigns.is_empty() {
                return Err("schedule add needs at least one campaign".into());
            }
            let stored = store.add(PeriodicScheduledCampaign::new(campaigns, date, frequency))?;
            print_json(&stored)
        }
        "remove" => {
            let id_raw = arg(args, 1)?;
            let id = id_raw
                .parse::<i64>()
                .map_err(|_| format!("invalid schedule id '{id_raw}'"))?;
            Ok(store.remove_by_id(id)?)
        }
        _ => Err(USAGE.into()),
    }
}

fn main() -> CliResult<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        return Err(USAGE.into());
    };

    let cfg = load_config()?;
    if cfg.logging.debug {
        logging::enable_debug();
    }
    logging::debug(format!(
        "store folder={} database={}",
        cfg.store.folder, cfg.database.path
    ));

    let metrics = Arc::new(Metrics::new());
    let result = match command.as_str() {
        "search" => run_search(&cfg, &metrics, rest),
        "scenario" => run_scenario(&cfg, &metrics, rest),
        "link" => run_link(&cfg, &metrics, rest),
        "jira-config" => run_jira_config(&cfg, &metrics, rest),
        "schedule" => run_schedule(&cfg, &metrics, rest),
        _ => Err(USAGE.into()),
    };
    metrics.log_summary();

    if let Err(err) = &result {
        logging::error(format!("{command} failed: {err}"));
    }
    result
}

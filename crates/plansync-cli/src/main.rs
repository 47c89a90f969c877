//! plansync operator tool
//!
//! Works on captured remote payloads, without a live service:
//! - `normalize` unwraps an envelope and optionally decodes one kind
//! - `resolve` matches sensitive-area labels against a catalog
//! - `diff` prints the reconcile plan between two payloads of one kind
//! - `config` prints the effective configuration

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use plansync_core::decode::decode_all;
use plansync_core::normalize::unwrap;
use plansync_core::{
    reconcile_sets, Association, AssociationKind, AssociationSet, ChecklistTemplateAssociation, CriterionAssociation,
    DecodeRecord, DepartmentAssociation, DepartmentDirectory, DeptId, ScheduleMilestone, SensitiveAreaCatalog,
    SensitiveAreaResolver, SyncConfig, TeamMembership,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const KINDS: [&str; 5] = ["departments", "criteria", "team", "schedules", "checklist_templates"];

fn cli() -> Command {
    Command::new("plansync")
        .version(plansync_core::VERSION)
        .about("Plan aggregate normalization and reconciliation tool")
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("warn")
                .help("Log filter when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .subcommand(
            Command::new("normalize")
                .about("Unwrap a payload envelope, optionally decoding one association kind")
                .arg(Arg::new("input").required(true).help("Payload file, or - for stdin"))
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .value_parser(KINDS)
                        .help("Association kind to decode the records as"),
                ),
        )
        .subcommand(
            Command::new("resolve")
                .about("Resolve sensitive-area labels of one department")
                .arg(
                    Arg::new("catalog")
                        .long("catalog")
                        .required(true)
                        .help("Sensitive-area catalog payload"),
                )
                .arg(
                    Arg::new("directory")
                        .long("directory")
                        .help("Department directory payload, for compound labels"),
                )
                .arg(Arg::new("dept").long("dept").required(true).help("Department id"))
                .arg(
                    Arg::new("labels")
                        .required(true)
                        .num_args(1..)
                        .help("Labels as entered, e.g. \"Server Room - IT\""),
                ),
        )
        .subcommand(
            Command::new("diff")
                .about("Show the operations that move current to desired")
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .required(true)
                        .value_parser(KINDS)
                        .help("Association kind of both payloads"),
                )
                .arg(Arg::new("desired").required(true).help("Desired payload"))
                .arg(Arg::new("current").required(true).help("Current payload")),
        )
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"))
}

fn init_tracing(level: &str, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_json(input: &str) -> Result<Value> {
    let text = if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading payload from stdin")?;
        text
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading payload {input}"))?
    };
    serde_json::from_str(&text).with_context(|| format!("parsing payload {input} as JSON"))
}

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    let config = match path {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn parse_kind(name: &str) -> Result<AssociationKind> {
    serde_json::from_value(Value::String(name.to_string())).with_context(|| format!("unknown kind {name}"))
}

fn decoded<T: DecodeRecord + Serialize>(payload: &Value) -> Result<Value> {
    Ok(serde_json::to_value(decode_all::<T>(&unwrap(payload)))?)
}

fn normalize(payload: &Value, kind: Option<AssociationKind>) -> Result<Value> {
    match kind {
        None => Ok(Value::Array(unwrap(payload))),
        Some(AssociationKind::Departments) => decoded::<DepartmentAssociation>(payload),
        Some(AssociationKind::Criteria) => decoded::<CriterionAssociation>(payload),
        Some(AssociationKind::Team) => decoded::<TeamMembership>(payload),
        Some(AssociationKind::Schedules) => decoded::<ScheduleMilestone>(payload),
        Some(AssociationKind::ChecklistTemplates) => decoded::<ChecklistTemplateAssociation>(payload),
    }
}

fn keys<T: Association>(items: &[T]) -> Vec<String> {
    items.iter().map(|item| item.key().to_string()).collect()
}

fn diff_kind<T: Association + DecodeRecord>(desired: &Value, current: &Value, config: &SyncConfig) -> Value {
    let desired: AssociationSet<T> = decode_all::<T>(&unwrap(desired)).into_iter().collect();
    let current: AssociationSet<T> = decode_all::<T>(&unwrap(current)).into_iter().collect();
    let plan = reconcile_sets(&desired, &current, config.replace_on_attribute_change);
    json!({
        "kind": T::KIND,
        "remove": keys(&plan.to_remove),
        "add": keys(&plan.to_add),
        "replaced": plan.replaced.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}

fn diff(kind: AssociationKind, desired: &Value, current: &Value, config: &SyncConfig) -> Value {
    match kind {
        AssociationKind::Departments => diff_kind::<DepartmentAssociation>(desired, current, config),
        AssociationKind::Criteria => diff_kind::<CriterionAssociation>(desired, current, config),
        AssociationKind::Team => diff_kind::<TeamMembership>(desired, current, config),
        AssociationKind::Schedules => diff_kind::<ScheduleMilestone>(desired, current, config),
        AssociationKind::ChecklistTemplates => diff_kind::<ChecklistTemplateAssociation>(desired, current, config),
    }
}

fn resolve(args: &ArgMatches) -> Result<Value> {
    let Some(catalog_path) = args.get_one::<String>("catalog") else {
        bail!("--catalog is required");
    };
    let catalog = SensitiveAreaCatalog::from_payload(&read_json(catalog_path)?);
    let directory = match args.get_one::<String>("directory") {
        Some(path) => DepartmentDirectory::from_payload(&read_json(path)?),
        None => DepartmentDirectory::new(),
    };
    let dept_id = args
        .get_one::<String>("dept")
        .map(|id| DeptId::new(id.as_str()))
        .context("--dept is required")?;
    let labels: Vec<&String> = args.get_many::<String>("labels").into_iter().flatten().collect();

    tracing::info!("Resolving {} labels against {} catalog entries", labels.len(), catalog.len());
    let resolution = SensitiveAreaResolver::new(&catalog, &directory).resolve(&dept_id, &labels);
    Ok(serde_json::to_value(resolution)?)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches.get_one::<PathBuf>("config"))?;

    match matches.subcommand() {
        Some(("normalize", args)) => {
            let input = args.get_one::<String>("input").context("input is required")?;
            let kind = args.get_one::<String>("kind").map(String::as_str).map(parse_kind).transpose()?;
            print_json(&normalize(&read_json(input)?, kind)?)
        }
        Some(("resolve", args)) => print_json(&resolve(args)?),
        Some(("diff", args)) => {
            let kind = parse_kind(args.get_one::<String>("kind").context("--kind is required")?)?;
            let desired = read_json(args.get_one::<String>("desired").context("desired is required")?)?;
            let current = read_json(args.get_one::<String>("current").context("current is required")?)?;
            print_json(&diff(kind, &desired, &current, &config))
        }
        Some(("config", _)) => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let level = matches.get_one::<String>("log-level").map_or("warn", String::as_str);
    init_tracing(level, matches.get_flag("json-logs"));
    run(&matches)
}

// FILE: crates/cli/src/main.rs

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use lotkeeper_config::{Config, ConfigManager};
use std::path::PathBuf;

mod commands;

fn id_arg(name: &'static str, value_name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).required(true).value_name(value_name).help(help)
}

fn build_cli() -> Command {
    Command::new("lotkeeper")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Offline-first parking lot records with remote sync")
        .arg(
            Arg::new("config-dir")
                .short('c')
                .long("config-dir")
                .value_name("DIR")
                .help("Directory holding config.toml and the databases")
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print machine-readable JSON where supported")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("config")
                .about("Inspect or create the configuration file")
                .subcommand_required(true)
                .subcommand(Command::new("init").about("Write a default config file if none exists"))
                .subcommand(Command::new("show").about("Print the effective configuration"))
                .subcommand(Command::new("validate").about("Check the config file for invalid values"))
                .subcommand(Command::new("path").about("Print config and data locations")),
        )
        .subcommand(Command::new("status").about("Show sync engine, queue and conflict status"))
        .subcommand(
            Command::new("sync")
                .about("Run a sync cycle against the remote service")
                .arg(
                    Arg::new("phase")
                        .long("only")
                        .value_name("PHASE")
                        .help("Run only one phase")
                        .value_parser(["push", "pull"]),
                )
                .arg(
                    Arg::new("watch")
                        .short('w')
                        .long("watch")
                        .help("Keep syncing on the configured interval until Ctrl-C")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("phase"),
                ),
        )
        .subcommand(
            Command::new("entries")
                .about("Record and inspect parking entries")
                .subcommand_required(true)
                .subcommand(
                    Command::new("add")
                        .about("Record a vehicle entering the lot")
                        .arg(id_arg("vehicle", "NUMBER", "Vehicle number"))
                        .arg(Arg::new("transport").short('t').long("transport").required(true).value_name("NAME").help("Transport company"))
                        .arg(Arg::new("type").short('k').long("type").required(true).value_name("TYPE").help("Vehicle type, e.g. Trailer"))
                        .arg(Arg::new("driver").long("driver").value_name("NAME").help("Driver name"))
                        .arg(Arg::new("phone").long("phone").value_name("PHONE").help("Driver phone"))
                        .arg(Arg::new("at").long("at").value_name("TIME").help("Entry time (RFC 3339), defaults to now"))
                        .arg(Arg::new("notes").long("notes").value_name("TEXT").help("Free-form notes")),
                )
                .subcommand(
                    Command::new("exit")
                        .about("Record a vehicle leaving and charge the fee")
                        .arg(id_arg("id", "ENTRY_ID", "Entry ID (UUID)"))
                        .arg(Arg::new("at").long("at").value_name("TIME").help("Exit time (RFC 3339), defaults to now"))
                        .arg(Arg::new("paid").long("paid").help("Mark the fee as paid").action(ArgAction::SetTrue))
                        .arg(Arg::new("payment-type").long("payment-type").value_name("TYPE").help("Cash, card, ...").requires("paid")),
                )
                .subcommand(
                    Command::new("pay")
                        .about("Set the payment status of an entry")
                        .arg(id_arg("id", "ENTRY_ID", "Entry ID (UUID)"))
                        .arg(
                            Arg::new("status")
                                .long("status")
                                .value_name("STATUS")
                                .default_value("Paid")
                                .value_parser(["Unpaid", "Paid", "Pending", "Refunded"]),
                        )
                        .arg(Arg::new("payment-type").long("payment-type").value_name("TYPE").help("Cash, card, ...")),
                )
                .subcommand(
                    Command::new("delete")
                        .about("Delete an entry locally and on the remote")
                        .arg(id_arg("id", "ENTRY_ID", "Entry ID (UUID)"))
                        .arg(Arg::new("force").short('f').long("force").help("Skip confirmation prompt").action(ArgAction::SetTrue)),
                )
                .subcommand(
                    Command::new("show")
                        .about("Show one entry with its sync state")
                        .arg(id_arg("id", "ENTRY_ID", "Entry ID (UUID)")),
                )
                .subcommand(
                    Command::new("list")
                        .about("List entries, newest first")
                        .arg(Arg::new("status").long("status").value_name("STATUS").value_parser(["Parked", "Exited"]))
                        .arg(Arg::new("type").long("type").value_name("TYPE").help("Vehicle type"))
                        .arg(
                            Arg::new("payment")
                                .long("payment")
                                .value_name("STATUS")
                                .value_parser(["Unpaid", "Paid", "Pending", "Refunded"]),
                        )
                        .arg(Arg::new("vehicle").long("vehicle").value_name("NUMBER").help("Vehicle number"))
                        .arg(Arg::new("from").long("from").value_name("TIME").help("Entered at or after (RFC 3339)"))
                        .arg(Arg::new("to").long("to").value_name("TIME").help("Entered at or before (RFC 3339)")),
                )
                .subcommand(Command::new("stats").about("Show occupancy and revenue statistics"))
                .subcommand(Command::new("overstayed").about("List parked vehicles past the overstay threshold"))
                .subcommand(
                    Command::new("estimate")
                        .about("Estimate the fee for a stay")
                        .arg(Arg::new("type").required(true).value_name("TYPE").help("Vehicle type"))
                        .arg(
                            Arg::new("hours")
                                .required(true)
                                .value_name("HOURS")
                                .value_parser(clap::value_parser!(i64).range(0..)),
                        ),
                ),
        )
        .subcommand(
            Command::new("queue")
                .about("Inspect the outgoing operation queue")
                .subcommand_required(true)
                .subcommand(Command::new("status").about("Show queue counters"))
                .subcommand(Command::new("failed").about("List operations that will not be retried"))
                .subcommand(
                    Command::new("retry")
                        .about("Re-arm a failed operation")
                        .arg(id_arg("id", "OPERATION_ID", "Operation ID (UUID)")),
                )
                .subcommand(
                    Command::new("purge")
                        .about("Delete completed operations")
                        .arg(
                            Arg::new("days")
                                .long("older-than-days")
                                .value_name("DAYS")
                                .default_value("7")
                                .value_parser(clap::value_parser!(i64).range(0..)),
                        ),
                ),
        )
        .subcommand(
            Command::new("conflicts")
                .about("Review conflicts found while pulling")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List unresolved conflicts"))
                .subcommand(
                    Command::new("show")
                        .about("Show both versions and suggested resolutions")
                        .arg(id_arg("id", "ENTRY_ID", "ID of the conflicted entry")),
                )
                .subcommand(
                    Command::new("resolve")
                        .about("Resolve a conflict")
                        .arg(id_arg("id", "ENTRY_ID", "ID of the conflicted entry"))
                        .arg(
                            Arg::new("use")
                                .long("use")
                                .required(true)
                                .value_name("SIDE")
                                .value_parser(["local", "remote", "merged"])
                                .help("Keep local, adopt remote, or apply the suggested merge"),
                        )
                        .arg(Arg::new("notes").long("notes").value_name("TEXT").help("Why this resolution was chosen")),
                )
                .subcommand(Command::new("stats").about("Show resolver counters")),
        )
        .subcommand(
            Command::new("export")
                .about("Write every entry to a JSON snapshot")
                .arg(Arg::new("output").short('o').long("output").value_name("FILE").default_value("parking_export.json")),
        )
        .subcommand(
            Command::new("import")
                .about("Load entries from a JSON snapshot")
                .arg(id_arg("input", "FILE", "Snapshot file")),
        )
}

fn config_manager(dir: Option<&String>) -> Result<ConfigManager> {
    match dir {
        Some(dir) => ConfigManager::with_directory(PathBuf::from(dir))
            .context("Failed to open config directory"),
        None => ConfigManager::new().context("Failed to locate config directory"),
    }
}

fn init_logging(config: &Config) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.app.log_level.to_string()),
    )
    .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let json = matches.get_flag("json");
    let manager = config_manager(matches.get_one::<String>("config-dir"))?;

    let config = manager.load_with_env_overrides().unwrap_or_else(|e| {
        eprintln!("Config error: {}, using defaults", e);
        Config::default()
    });
    init_logging(&config);

    if let Some(("config", sub)) = matches.subcommand() {
        return commands::config_command(&manager, &config, sub, json);
    }
    if matches.subcommand().is_none() {
        build_cli().print_help()?;
        return Ok(());
    }

    let app = commands::App::open(&manager, config)
        .await
        .context("Failed to open local databases")?;

    let result = match matches.subcommand() {
        Some(("status", _)) => commands::show_status(&app, json).await,
        Some(("sync", sub)) => commands::run_sync(&app, sub, json).await,
        Some(("entries", sub)) => commands::entries_command(&app, sub, json).await,
        Some(("queue", sub)) => commands::queue_command(&app, sub, json).await,
        Some(("conflicts", sub)) => commands::conflicts_command(&app, sub, json).await,
        Some(("export", sub)) => commands::export_snapshot(&app, sub).await,
        Some(("import", sub)) => commands::import_snapshot(&app, sub).await,
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    };

    app.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_parses_entry_add() {
        let matches = build_cli()
            .try_get_matches_from([
                "lotkeeper", "entries", "add", "KA01AB1234", "-t", "Blue Dart", "-k", "Trailer",
            ])
            .unwrap();
        let (_, entries) = matches.subcommand().unwrap();
        let (name, add) = entries.subcommand().unwrap();
        assert_eq!(name, "add");
        assert_eq!(add.get_one::<String>("vehicle").unwrap(), "KA01AB1234");
        assert_eq!(add.get_one::<String>("type").unwrap(), "Trailer");
    }

    #[test]
    fn test_rejects_unknown_resolution() {
        let result = build_cli().try_get_matches_from([
            "lotkeeper", "conflicts", "resolve", "abc", "--use", "both",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_watch_conflicts_with_phase() {
        let result =
            build_cli().try_get_matches_from(["lotkeeper", "sync", "--watch", "--only", "push"]);
        assert!(result.is_err());
    }
}

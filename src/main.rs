use clap::Parser;
use osh::append::{self, CapturedCommand};
use osh::cli::{Cli, Commands, SearchMode};
use osh::config::Config;
use osh::maintenance;
use osh::query::{self, Mode};
use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let config = Config::from_env();

    match run(&cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("osh: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: &Commands, config: &Config) -> Result<ExitCode, osh::error::OshError> {
    match command {
        Commands::Search { mode, session, folder } => {
            let mode = match mode {
                SearchMode::All => Mode::All,
                SearchMode::Session => Mode::Session(session.clone().unwrap_or_default()),
                SearchMode::Folder => Mode::Folder(folder.clone().unwrap_or_default()),
                SearchMode::Bag => Mode::Bag,
            };
            let stdout = io::stdout();
            let mut out = stdout.lock();
            query::search(&config.base, config.lock_wait, &mode, &mut out)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            query::list(&config.base, config.lock_wait, &mut out)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::AppendEvent {
            starttime,
            endtime,
            command,
            folder,
            exit_code,
            machine,
            session,
        } => {
            append::record(
                config,
                CapturedCommand {
                    starttime: *starttime,
                    endtime: *endtime,
                    command: command.clone(),
                    folder: folder.clone(),
                    exit_code: *exit_code,
                    machine: machine.clone(),
                    session: session.clone(),
                },
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Convert { paths } => {
            maintenance::convert(paths, config.lock_wait)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::ConvertOshLegacy { paths } => {
            maintenance::convert_osh_legacy(paths, config.lock_wait)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::ConvertOldOsh { paths } => {
            maintenance::convert_old_osh(paths, config.lock_wait)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let reports = maintenance::check(&config.base, config.lock_wait)?;
            let mut all_ok = true;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for report in &reports {
                let status = if report.ok { "ok" } else { "FAILED" };
                let _ = writeln!(out, "{}: {status}", report.path.display());
                if let Some(detail) = &report.detail {
                    let _ = writeln!(out, "  {detail}");
                }
                all_ok &= report.ok;
            }
            Ok(if all_ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Report => {
            let report = maintenance::report(&config.base, config.lock_wait)?;
            println!(
                "events: {}\nfirst: {}\nlast: {}\nactive days: {}\nspan (days): {}\nsuccess: {} ({:.1}%)\navg events/active day: {:.1}",
                report.total_events,
                report.first.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string()),
                report.last.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string()),
                report.active_days,
                report.span_days,
                report.success_count,
                report.success_ratio * 100.0,
                report.average_active_day_volume,
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

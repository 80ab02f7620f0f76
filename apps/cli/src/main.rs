use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use startuplens_core_sdk::{
    prelude::*,
    report::{calculate_metrics, format_duration, top_steps},
};

/**
 * \brief Command-line entry for the startup-report analyzer.
 */
#[derive(Parser, Debug)]
#[command(name = "startuplens", version, about = "Spring Boot startup report analyzer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /** \brief Manage connection profiles. */
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /** \brief List built-in provider presets. */
    Presets,

    /** \brief Print summary metrics and the slowest steps of a report. */
    Metrics {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /**
     * \brief Analyze a report with the active profile.
     * \details Reads the report from `--file` or stdin; Ctrl-C cancels pending retries.
     */
    Analyze {
        #[arg(long)]
        file: Option<PathBuf>,
        /** Send the whole report instead of the compact summary */
        #[arg(long, default_value_t = false)]
        full_json: bool,
        #[arg(long)]
        attempts: Option<u32>,
        /** Do not switch to the fallback model when rate limited */
        #[arg(long, default_value_t = false)]
        no_fallback: bool,
    },

    /** \brief Persisted settings. */
    Config {
        #[arg(long, value_enum)]
        telemetry: Switch,
    },

    /** \brief Start the local dashboard server. */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    List,
    /** \brief Create or update a profile; omitting --id creates a new one. */
    Save {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /** Keep the profile as a draft without activating it */
        #[arg(long, default_value_t = false)]
        draft: bool,
    },
    /** \brief Start a fresh draft from the primary preset and activate it. */
    Draft,
    Delete {
        id: String,
    },
    /** \brief Make a profile active. */
    Use {
        id: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let core = Core::open(CoreConfig::from_env()).context("open database failed")?;

    match cli.command {
        Commands::Profiles { action } => run_profiles(&core, action)?,
        Commands::Presets => {
            for preset in core.manager.catalog().all() {
                println!(
                    "{:<11} {:<12} {} (model: {})",
                    preset.provider, preset.name, preset.base_url, preset.model
                );
            }
        }
        Commands::Metrics { file, top } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("read {} failed", file.display()))?;
            let events = StartupReport::parse(&text).events();
            let metrics = calculate_metrics(&events);
            println!("Total duration: {}", format_duration(metrics.total_duration));
            println!("Total steps:    {}", metrics.total_steps);
            println!("Average step:   {}", format_duration(metrics.avg_duration));
            println!("Slow steps:     {}", metrics.slow_steps);
            println!("Critical steps: {}", metrics.critical_issues);
            for (i, step) in top_steps(&events, top).iter().enumerate() {
                println!("{:>3}. {} ({})", i + 1, step.name, format_duration(step.duration_ms));
            }
        }
        Commands::Analyze {
            file,
            full_json,
            attempts,
            no_fallback,
        } => {
            let text = match file {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("read {} failed", path.display()))?,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut buf)
                        .await
                        .context("read stdin failed")?;
                    buf
                }
            };
            let report = StartupReport::parse(&text);

            let token = CancellationToken::new();
            let ctrl_c_token = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Canceling...");
                    ctrl_c_token.cancel();
                }
            });

            let options = AnalyzeOptions {
                on_status: Some(Arc::new(|msg: &str| eprintln!("{}", msg))),
                cancellation_token: token,
                full_json,
                attempts,
                allow_fallback: !no_fallback,
            };
            telemetry::log_event("cli.analyze", &format!("bytes={} full_json={}", text.len(), full_json));
            let answer = core.analyzer.analyze(&report, options).await?;
            println!("{}", answer);
        }
        Commands::Config { telemetry: switch } => {
            let enabled = matches!(switch, Switch::On);
            core.store
                .set_telemetry_enabled(enabled)
                .context("save telemetry failed")?;
            telemetry::set_enabled(enabled);
            println!("Telemetry {}", if enabled { "enabled" } else { "disabled" });
        }
        Commands::Serve { addr } => {
            server::run(&addr, core).await?;
        }
    }

    Ok(())
}

fn run_profiles(core: &Core, action: ProfileAction) -> Result<()> {
    let manager = &core.manager;
    match action {
        ProfileAction::List => {
            let active = manager.get_active_profile()?;
            for p in manager.get_profiles()? {
                let marker = if p.id == active.id { "*" } else { " " };
                let key = if p.api_key.is_empty() { "no key" } else { "key set" };
                let mut flags = Vec::new();
                if p.is_default {
                    flags.push("default");
                }
                if p.is_draft {
                    flags.push("draft");
                }
                println!(
                    "{} {} [{}] {} | {} | {} | {} {}",
                    marker,
                    p.id,
                    p.provider,
                    p.name,
                    p.base_url,
                    if p.model.is_empty() { "-" } else { p.model.as_str() },
                    key,
                    flags.join(",")
                );
            }
        }
        ProfileAction::Save {
            id,
            name,
            provider,
            base_url,
            api_key,
            model,
            draft,
        } => {
            let input = ProfileInput {
                id,
                name,
                provider: provider.as_deref().map(ProviderId::parse),
                base_url,
                api_key,
                model,
                is_draft: draft,
            };
            input.validate()?;
            let saved = manager.save_profile(input)?;
            if !saved.is_draft {
                manager.set_active_profile_id(&saved.id)?;
            }
            println!("Saved profile id={} ({} | {})", saved.id, saved.provider, saved.base_url);
        }
        ProfileAction::Draft => {
            let draft = manager.create_draft()?;
            println!("Created draft id={} ({})", draft.id, draft.base_url);
        }
        ProfileAction::Delete { id } => {
            manager.delete_profile(&id)?;
            println!("Deleted profile id={}", id);
        }
        ProfileAction::Use { id } => match manager.select_profile(&id)? {
            Some(p) => println!("Active profile: {} ({})", p.name, p.id),
            None => anyhow::bail!("profile {} not found", id),
        },
    }
    Ok(())
}

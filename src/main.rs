use clap::{Parser, Subcommand};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use study_acceptance::config::{self, Config};
use study_acceptance::harness::{run_scenario, wait_fixed, with_session};
use study_acceptance::report::{RunReport, read_summary_log};
use study_acceptance::run_dir::{self, RunDir};
use study_acceptance::verdict::{Markers, Verdict, compute_verdict, scan_markers};
use study_acceptance::{
    BrowserDriver, ChromeDriver, ChromeDriverConfig, ConsoleLog, Scenario, Severity, catalog,
};

/// Study Acceptance - browser-driven acceptance tests for the extraction app
#[derive(Parser, Debug)]
#[command(
    name = "study-acceptance",
    about = "Drive the clinical study extraction app in Chrome and report a verdict per scenario",
    after_help = "ENVIRONMENT VARIABLES:\n\
        STUDY_ACCEPTANCE_BASE_URL          Where the app is served\n\
        STUDY_ACCEPTANCE_SAMPLE_PDF        Sample document for upload steps\n\
        STUDY_ACCEPTANCE_RUN_DIR           Base directory for run outputs\n\
        STUDY_ACCEPTANCE_HEADLESS          Run Chrome without a window\n\
        STUDY_ACCEPTANCE_VIEWPORT          compact, standard, full-hd, or WxH\n\
        STUDY_ACCEPTANCE_NAV_TIMEOUT       Navigation timeout (seconds)\n\
        STUDY_ACCEPTANCE_ELEMENT_TIMEOUT   Element lookup timeout (seconds)\n\
        STUDY_ACCEPTANCE_CHROME            Chrome/Chromium executable\n\
        RUST_LOG                           Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the built-in scenarios
    List,

    /// Run scenarios against the app
    Run {
        /// Scenario names (see `list`)
        names: Vec<String>,

        /// Run every built-in scenario
        #[arg(long, conflicts_with = "names")]
        all: bool,

        /// Where the app is served
        #[arg(long, env = config::ENV_BASE_URL)]
        base_url: Option<String>,

        /// Run Chrome without a window
        #[arg(long)]
        headless: bool,

        /// Pass --no-sandbox to Chrome (containers)
        #[arg(long)]
        no_sandbox: bool,

        /// Output directory (one subdirectory per scenario)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Sample document for upload steps
        #[arg(long, env = config::ENV_SAMPLE_PDF)]
        sample_pdf: Option<PathBuf>,

        /// Keep the browser open this many seconds after the last step
        #[arg(long, default_value = "0")]
        linger: u64,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,

        /// Delete run outputs when done
        #[arg(long)]
        discard: bool,
    },

    /// Recompute a verdict from a saved summary
    Verdict {
        /// Path to a summary JSON file
        #[arg(long)]
        summary: PathBuf,

        /// Use the markers of a built-in scenario
        #[arg(long)]
        scenario: Option<String>,

        /// Success marker (repeatable)
        #[arg(long = "success")]
        success: Vec<String>,

        /// Failure marker (repeatable)
        #[arg(long = "failure")]
        failure: Vec<String>,
    },

    /// List run directories
    Runs,

    /// Remove old run directories
    Clean {
        /// Remove runs older than this many hours
        #[arg(long, default_value = "24")]
        max_age_hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Some(Commands::List) => {
            let config = config::get();
            for scenario in catalog::all(config) {
                println!("{:<22} {}", scenario.name, scenario.description);
            }
        }

        Some(Commands::Run {
            names,
            all,
            base_url,
            headless,
            no_sandbox,
            output,
            sample_pdf,
            linger,
            json,
            discard,
        }) => {
            let mut config: Config = config::get().clone();
            if let Some(url) = base_url {
                config.target.base_url = url;
            }
            if let Some(pdf) = sample_pdf {
                config.target.sample_pdf = pdf;
            }
            config.browser.headless |= headless;

            let names: Vec<String> = if all {
                catalog::NAMES.iter().map(|n| n.to_string()).collect()
            } else if names.is_empty() {
                return Err("name at least one scenario or pass --all (see `list`)".into());
            } else {
                names
            };

            let base = output.as_ref().unwrap_or(&config.runs.base_dir);
            let mut planned = Vec::new();
            for name in &names {
                let scenario = catalog::find(name, &config)
                    .ok_or_else(|| format!("unknown scenario '{}' (see `list`)", name))?;
                let run = RunDir::with_name_in(base, name).keep(!discard);
                planned.push((scenario, run));
            }

            let driver_config = ChromeDriverConfig::default()
                .headless(config.browser.headless)
                .viewport(config.browser.viewport_width, config.browser.viewport_height)
                .no_sandbox(no_sandbox);
            let (reports, failed) = run_each(
                planned,
                async || ChromeDriver::launch(driver_config.clone()).await,
                json,
                linger,
            )
            .await;

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
            if failed {
                std::process::exit(1);
            }
        }

        Some(Commands::Verdict {
            summary,
            scenario,
            success,
            failure,
        }) => {
            let mut markers = match scenario {
                Some(name) => {
                    catalog::find(&name, config::get())
                        .ok_or_else(|| format!("unknown scenario '{}'", name))?
                        .markers
                }
                None => Markers::default(),
            };
            markers.success.extend(success);
            markers.failure.extend(failure);
            if markers.is_empty() {
                return Err("give --scenario or at least one --success/--failure marker".into());
            }

            let log = read_summary_log(&summary)?;
            let scan = scan_markers(&log, &markers);
            for hit in scan.success_hits.iter().chain(&scan.failure_hits) {
                println!("  #{:<4} {}", hit.sequence, hit.marker);
            }
            let verdict = compute_verdict(&log, &markers);
            println!("{} ({} log entries)", verdict.to_string().to_uppercase(), log.len());
            if verdict == Verdict::Failure {
                std::process::exit(1);
            }
        }

        Some(Commands::Runs) => {
            let base = config::run_base_dir();
            let runs = run_dir::list_runs(&base)?;
            if runs.is_empty() {
                println!("No runs under {}", base.display());
            }
            for dir in runs {
                let verdict = std::fs::read_to_string(dir.join(run_dir::SUMMARY_FILE))
                    .ok()
                    .and_then(|text| serde_json::from_str::<RunReport>(&text).ok())
                    .map(|report| report.verdict.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<10} {}", verdict, dir.display());
            }
        }

        Some(Commands::Clean { max_age_hours }) => {
            let base = config::run_base_dir();
            let removed =
                run_dir::cleanup_old_runs(&base, Duration::from_secs(max_age_hours * 3600))?;
            println!("Removed {} run(s) from {}", removed, base.display());
        }

        None => {
            println!("Study Acceptance - browser-driven acceptance tests");
            println!();
            println!("Usage: study-acceptance <COMMAND>");
            println!();
            println!("Commands:");
            println!("  list     List the built-in scenarios");
            println!("  run      Run scenarios against the app");
            println!("  verdict  Recompute a verdict from a saved summary");
            println!("  runs     List run directories");
            println!("  clean    Remove old run directories");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

/// Run each scenario in a freshly launched browser. A launch failure or
/// fatal error fails that scenario only. Returns the reports gathered and
/// whether anything failed.
async fn run_each<D, E, L>(
    planned: Vec<(Scenario, RunDir)>,
    mut launch: L,
    json: bool,
    linger: u64,
) -> (Vec<RunReport>, bool)
where
    D: BrowserDriver,
    E: fmt::Display,
    L: AsyncFnMut() -> Result<D, E>,
{
    let mut failed = false;
    let mut reports = Vec::new();
    for (scenario, run) in planned {
        let name = &scenario.name;
        let driver = match launch().await {
            Ok(driver) => driver,
            Err(err) => {
                failed = true;
                tracing::error!(scenario = %name, "browser launch failed: {}", err);
                eprintln!("{}: ERROR (browser launch failed: {})", name, err);
                continue;
            }
        };

        let outcome = with_session(driver, async |session| {
            let report = run_scenario(session, &scenario, &run).await?;
            if !json {
                print_report(&report, &run, session.console(), &scenario.highlights);
            }
            if linger > 0 {
                tracing::info!("keeping the browser open for {}s", linger);
                wait_fixed(Duration::from_secs(linger)).await;
            }
            Ok(report)
        })
        .await;

        match outcome {
            Ok(report) => {
                failed |= !report.passed();
                reports.push(report);
            }
            Err(err) => {
                failed = true;
                tracing::error!(scenario = %name, "{}", err);
                eprintln!("{}: ERROR ({})", name, err);
            }
        }
    }
    (reports, failed)
}

fn print_report(report: &RunReport, run: &RunDir, console: &ConsoleLog, highlights: &[String]) {
    println!("{}", report.headline());
    for warning in &report.warnings {
        println!("  warning (step {}): {}: {}", warning.step, warning.description, warning.error);
    }
    for (name, value) in &report.probes {
        let text = value.to_string();
        let preview: String = text.chars().take(160).collect();
        println!("  {} = {}", name, preview);
    }
    for checkpoint in &report.checkpoints {
        println!("  checkpoint {}: {}", checkpoint.name, checkpoint.path.display());
    }
    if !highlights.is_empty() {
        let summary = console.matching(highlights);
        println!("  console summary ({} of {} entries):", summary.len(), console.len());
        for entry in summary {
            println!("    #{:<4} {}", entry.sequence, entry);
        }
    }
    let page_errors = console.count(Severity::PageError);
    if page_errors > 0 {
        println!("  {} JavaScript error(s) on the page", page_errors);
    }
    for entry in console.tail(20) {
        println!("  {}", entry);
    }
    println!("  output: {}", run.dir.display());
}

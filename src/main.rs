use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pgcov::collector::Collector;
use pgcov::config::{self, Cli, Command, LogFormat, ReportArgs, ReportFormat, RunArgs};
use pgcov::error::{PgcovError, Result};
use pgcov::model::{InstrumentedSql, TestStatus};
use pgcov::pool::Pool;
use pgcov::report::{self, FsSourceReader, Reporter};
use pgcov::store::Store;
use pgcov::{discovery, instrument, isolation, parser, workerpool};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (verbose, log_format) = match &cli.command {
        Command::Run(args) => (args.verbose, args.log_format),
        Command::Report(_) => (false, LogFormat::Text),
    };
    init_tracing(verbose, log_format);

    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Report(args) => report_cmd(args).await,
    };

    match outcome {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!(error = %e, kind = %e.kind(), "pgcov failed");
            std::process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

/// Returns the process exit code: `0` if every test passed, `1` otherwise.
async fn run(args: RunArgs) -> Result<i32> {
    let connection = config::resolve_connection(args.connection.as_deref())?;
    let admin = Arc::new(Pool::connect_admin(connection, config::admin_pool_size(args.parallel)).await?);

    let discovered = discovery::discover(&args.search_path);
    info!(
        sources = discovered.sources.len(),
        tests = discovered.tests.len(),
        "discovery complete"
    );
    if discovered.tests.is_empty() {
        warn!(path = %args.search_path.display(), "no *_test.sql files found");
    }

    let mut instrumented = Vec::with_capacity(discovered.sources.len());
    for path in &discovered.sources {
        match load_and_instrument(path).await {
            Ok(sql) => instrumented.push(sql),
            Err(e) => error!(file = %path.display(), error = %e, "skipping source file"),
        }
    }
    let sources: Arc<[InstrumentedSql]> = Arc::from(instrumented.into_boxed_slice());

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received interrupt, cancelling in-flight tests");
            ctrl_c_cancel.cancel();
        }
    });

    let runs = workerpool::execute_parallel(
        admin.clone(),
        sources,
        &discovered.tests,
        args.parallel,
        args.timeout,
        cancel,
    )
    .await;

    let collector = Collector::new();
    let mut any_failed = false;
    for run in &runs {
        match run.status {
            TestStatus::Passed => {}
            _ => {
                any_failed = true;
                warn!(test = %run.test.display(), status = ?run.status, error = ?run.error, "test did not pass");
            }
        }
        for signal in &run.signals {
            if let Err(e) = collector.add_signal(signal) {
                warn!(error = %e, "could not record coverage signal");
            }
        }
    }

    match isolation::verify(&runs, &admin).await {
        Ok(report) if !report.is_clean() => {
            for violation in &report.violations {
                error!(kind = ?violation.kind, detail = %violation.detail, "isolation violation");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "isolation verification could not run"),
    }

    let coverage = collector.snapshot();
    let store = Store::new(&args.coverage_file);
    store.save(&coverage).await?;
    info!(
        path = %store.path().display(),
        total_percent = coverage.total_percent(),
        "coverage written"
    );

    Ok(if any_failed { 1 } else { 0 })
}

async fn load_and_instrument(path: &Path) -> Result<InstrumentedSql> {
    let src = tokio::fs::read_to_string(path).await?;
    let parsed = parser::parse(path, &src)?;
    instrument::instrument(parsed, &src)
}

async fn report_cmd(args: ReportArgs) -> Result<i32> {
    let store = Store::new(&args.coverage_file);
    let coverage = store.load().await?;

    match args.format {
        ReportFormat::Json => write_text(&args.output, &report::JsonReporter.render(&coverage, &FsSourceReader)?).await?,
        ReportFormat::Lcov => write_text(&args.output, &report::LcovReporter.render(&coverage, &FsSourceReader)?).await?,
        ReportFormat::Html => write_html_tree(&args.output, &coverage).await?,
    }

    Ok(0)
}

async fn write_text(output: &str, content: &str) -> Result<()> {
    if output == "-" {
        println!("{content}");
    } else {
        tokio::fs::write(output, content).await?;
    }
    Ok(())
}

async fn write_html_tree(output: &str, coverage: &pgcov::model::Coverage) -> Result<()> {
    if output == "-" {
        return Err(PgcovError::config(
            "output",
            "html reports need a directory path, not stdout",
        ));
    }
    let dir = Path::new(output);
    tokio::fs::create_dir_all(dir).await?;

    let reporter = report::HtmlReporter;
    tokio::fs::write(dir.join("index.html"), reporter.render_index(coverage)).await?;

    for (file, positions) in &coverage.positions {
        let src = tokio::fs::read_to_string(file).await.unwrap_or_default();
        let page = reporter.render_file(file, positions, &src);
        tokio::fs::write(dir.join(report::file_page_name(file)), page).await?;
    }
    Ok(())
}

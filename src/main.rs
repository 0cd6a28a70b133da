use std::{collections::HashSet, path::PathBuf};

use anyhow::{Context, anyhow};
use archive_report::{
    cluster::{self, AuthContext},
    config::{LookupFailurePolicy, ReportConfig},
    job::ReportJob,
    progress::{self, BatchPhase},
    report::{self, OutputFormat},
};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[clap(about = "Report the last successful archive of every protected object")]
struct Opts {
    /// IP or hostname of any cluster node (or a full https:// URL)
    #[clap(short, long, env = "ARCHIVE_REPORT_NODE")]
    node: String,
    #[clap(short, long, env = "ARCHIVE_REPORT_USERNAME")]
    username: String,
    #[clap(long, env = "ARCHIVE_REPORT_PASSWORD", hide_env_values = true)]
    password: String,
    /// SLA domains to include; all when omitted
    #[clap(long, value_delimiter = ',')]
    sla: Vec<String>,
    #[clap(short, long, env = "ARCHIVE_REPORT_CONFIG")]
    config: Option<PathBuf>,
    #[clap(short, long)]
    output: Option<PathBuf>,
    #[clap(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
    /// Accept self-signed cluster certificates
    #[clap(long)]
    insecure: bool,
    /// Abort on the first failed lookup instead of marking the row
    #[clap(long)]
    fail_fast: bool,
}

fn entry_url(node: &str) -> anyhow::Result<url::Url> {
    let url = if node.contains("://") {
        url::Url::parse(node)
    } else {
        url::Url::parse(&format!("https://{node}"))
    };
    url.with_context(|| format!("invalid cluster address {node:?}"))
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ReportConfig> {
    let config = match path {
        Some(path) => {
            let src = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("read config {}", path.display()))?;
            ReportConfig::from_yaml(&src)
                .with_context(|| format!("parse config from {}", path.display()))?
        }
        None => ReportConfig::default(),
    };
    config.validate().map_err(|msg| anyhow!("{msg}"))?;
    Ok(config)
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let mut config = load_config(opts.config.as_ref()).await?;
    if opts.fail_fast {
        config.on_lookup_error = LookupFailurePolicy::Abort;
    }
    let sla_filter = opts
        .sla
        .iter()
        .map(|sla| sla.trim())
        .filter(|sla| !sla.is_empty())
        .map(str::to_owned)
        .collect::<HashSet<_>>();

    let auth = AuthContext::basic(&opts.username, &opts.password);
    let client = cluster::http::Client::new(
        entry_url(&opts.node)?,
        &auth,
        config.timeouts,
        opts.insecure,
    )
    .context("build http client")?;

    let reporter = progress::create_reporter();
    let job = ReportJob {
        client: &client,
        config: &config,
        progress: reporter.as_ref(),
    };
    let report = match job.run(&sla_filter).await {
        Ok(report) => report,
        Err(e) => {
            reporter.set_phase(BatchPhase::Failed(e.to_string()));
            reporter.finish();
            return Err(e.into());
        }
    };

    reporter.set_phase(BatchPhase::WritingReport);
    let path = opts.output.unwrap_or_else(|| {
        PathBuf::from(report::default_file_name(chrono::Local::now(), opts.format))
    });
    let format = opts.format;
    let written = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || report::write_file(&path, format, &report).map(|_| report.stats))
            .await
            .context("join report writer")?
    };
    let stats = match written {
        Ok(stats) => stats,
        Err(e) => {
            reporter.set_phase(BatchPhase::Failed(e.to_string()));
            reporter.finish();
            return Err(e).context("writing report");
        }
    };
    reporter.set_phase(BatchPhase::Completed);
    reporter.finish();
    info!(path = %path.display(), rows = stats.found, "report written");
    println!("File is {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run(opts).await {
        error!(?e, "critical error");
        std::process::exit(1);
    }
}

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tgt_core::{
    bootstrap::{AuthState, Bootstrapper},
    config::Config,
    digest::{DigestExporter, DigestRunOutcome},
    document::DocxWriter,
    scheduler::{run_cron_job, CronExpr},
    transport::port::Connector,
    triage::TriageLoop,
};
use tgt_gateway::GatewayConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgt_core::logging::init("tgt")?;

    let cfg = Arc::new(Config::load()?);
    let connector: Arc<dyn Connector> = Arc::new(GatewayConnector::new(cfg.auth.clone())?);

    // A fresh login is only picked up by a new process.
    let boot = Bootstrapper::new(connector.clone(), cfg.auth.clone());
    match boot.ensure_authenticated().await? {
        AuthState::Ready(session) => {
            info!(session = %session.session_id, "session ready");
        }
        AuthState::ChallengeIssued(challenge) => {
            let code = prompt_code().await?;
            boot.complete(&challenge, &code).await?;
            println!("Authorization successful. Restart the service.");
            return Ok(());
        }
    }

    let cancel = CancellationToken::new();

    let triage = TriageLoop::new(&cfg, connector.clone())?;
    let triage_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { triage.run(cancel).await })
    };

    let digest_task = if cfg.digest_enabled {
        let expr = CronExpr::parse(&cfg.digest_cron)
            .with_context(|| format!("invalid DIGEST_CRON: {}", cfg.digest_cron))?;
        let exporter = DigestExporter::new(&cfg, connector.clone(), Arc::new(DocxWriter));
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            let exporter = &exporter;
            run_cron_job("digest", &expr, cancel, move || async move {
                if let DigestRunOutcome::Failed { error_path, .. } = exporter.run().await {
                    warn!(path = %error_path.display(), "digest run failed, see error report");
                }
            })
            .await
        }))
    } else {
        info!("digest disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested, waiting for the current pass to finish");
    cancel.cancel();

    let stats = triage_task.await?;
    info!(
        passes = stats.passes,
        failures = stats.failures,
        "triage loop stopped"
    );
    if let Some(task) = digest_task {
        let runs = task.await?;
        info!(runs, "digest schedule stopped");
    }

    Ok(())
}

async fn prompt_code() -> anyhow::Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"Enter verification code: ").await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    let code = line.trim().to_string();
    anyhow::ensure!(!code.is_empty(), "no verification code entered");
    Ok(code)
}

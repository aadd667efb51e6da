use safescan::logging::init_logging;
use safescan::{
    AnalysisGateway, AuthSession, ClientConfig, HttpGateway, Identity, Phase, ReportView, SessionStore,
};
use std::sync::Arc;

const USAGE: &str = "Usage:
  safescan analyze <video-url>      analyze a video and print the report
  safescan result <job-id>          print the report of a finished job
  safescan history [page]           list your past analyses";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Loads .env before anything reads the environment
    let config = ClientConfig::from_env();

    init_logging()?;

    let identity = AuthSession::from_config(&config);
    let gateway = Arc::new(HttpGateway::new(&config)?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("analyze") => match args.get(1) {
            Some(url) => analyze(&config, gateway, &identity, url).await,
            None => {
                eprintln!("{}", USAGE);
                Ok(())
            }
        },
        Some("result") => match args.get(1) {
            Some(job_id) => print_result(gateway.as_ref(), &identity, job_id).await,
            None => {
                eprintln!("{}", USAGE);
                Ok(())
            }
        },
        Some("history") => {
            let page = args.get(1).and_then(|p| p.parse().ok()).unwrap_or(1);
            print_history(gateway.as_ref(), &identity, page).await
        }
        _ => {
            eprintln!("{}", USAGE);
            Ok(())
        }
    }
}

async fn analyze(
    config: &ClientConfig,
    gateway: Arc<HttpGateway>,
    identity: &AuthSession,
    url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SessionStore::new(gateway.clone()).with_remote_cancel(config.cancel_remote);
    let mut updates = store.watch();

    let job_id = match store.start(url, &config.default_options, identity).await {
        Ok(job_id) => job_id,
        Err(e) => {
            eprintln!("❌ {}", e);
            return Ok(());
        }
    };
    println!("🎬 Job {} accepted", job_id);

    let mut printed_logs = 0;
    loop {
        {
            let session = updates.borrow_and_update();
            for entry in &session.log_entries()[printed_logs.min(session.log_entries().len())..] {
                println!("[{:>3}%] {}", session.progress(), entry.message);
            }
            printed_logs = session.log_entries().len();
            if session.phase().is_terminal() {
                break;
            }
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                store.cancel().await;
            }
        }
    }

    let session = store.snapshot().await;
    match session.phase() {
        Phase::Completed => {
            if let Err(e) = print_result(gateway.as_ref(), identity, &job_id).await {
                tracing::warn!("Could not fetch the durable report for {}: {}", job_id, e);
                if let Some(report) = session.result() {
                    println!("Summary: {}", report.summary);
                }
            }
        }
        Phase::Cancelled => println!("🛑 Analysis cancelled"),
        Phase::Failed => println!("❌ Analysis failed: {}", session.status_message()),
        _ => {}
    }
    Ok(())
}

async fn print_result(
    gateway: &dyn AnalysisGateway,
    identity: &AuthSession,
    job_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = gateway.fetch_result(job_id).await?;
    let view = ReportView::build(&result, identity);
    println!("{}", view);
    Ok(())
}

async fn print_history(
    gateway: &dyn AnalysisGateway,
    identity: &AuthSession,
    page: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(user_id) = identity.user_id() else {
        eprintln!("Log in (SAFESCAN_ACCESS_TOKEN) to see your history");
        return Ok(());
    };

    let items = match gateway.get_history(&user_id, page, 20).await {
        Ok(items) => items,
        Err(e) => {
            tracing::error!("History lookup failed: {}", e);
            Vec::new()
        }
    };

    if items.is_empty() {
        println!("No analyses yet");
    }
    for item in items {
        println!(
            "{}  {:>3}/100  {}  {}",
            item.created_at.as_deref().unwrap_or("-"),
            item.safety_score,
            item.title,
            item.video_url
        );
    }
    Ok(())
}

use std::net::SocketAddr;

use jobload_testserver::{JobOutcome, JobServerBehavior, TestServerStats};
use tokio::net::TcpListener;

const USAGE: &str = "jobload-testserver\n\nUSAGE:\n  jobload-testserver [--bind 127.0.0.1:0] [--polls N] [--token T] [--fail-jobs] [--create-status CODE]\n\nOUTPUT:\n  Prints BASE_URL=<url> to stdout once ready.";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut behavior = JobServerBehavior::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--bind" => bind_addr = value("--bind")?.parse()?,
            "--polls" => behavior.polls_before_complete = value("--polls")?.parse()?,
            "--token" => behavior.token = Some(value("--token")?),
            "--create-status" => behavior.create_status = value("--create-status")?.parse()?,
            "--fail-jobs" => behavior.outcome = JobOutcome::Fail,
            "-h" | "--help" => {
                eprintln!("{USAGE}");
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let app = jobload_testserver::router(behavior, TestServerStats::default());

    println!("BASE_URL=http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use rangedl_core::model::TaskState;
use rangedl_core::strategy::http::HttpStrategy;
use rangedl_core::{DownloadContext, ProtocolStrategy, SchedulerConfig, TaskScheduler};

mod terminal_observer;
use terminal_observer::TerminalProgressObserver;

#[derive(Parser)]
#[command(name = "rangedl", about = "Multi-threaded HTTP file downloader")]
struct Args {
    /// URL to download
    #[arg(short, long, default_value = "https://proof.ovh.net/files/1Mb.dat")]
    url: String,

    /// Output file path
    #[arg(short, long, default_value = "downloaded_file")]
    output: PathBuf,

    /// Number of parallel segments to split the download into
    #[arg(short, long, default_value_t = 8)]
    connections: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let strategy: Arc<dyn ProtocolStrategy> = Arc::new(HttpStrategy::default());
    let scheduler = TaskScheduler::new(SchedulerConfig::default(), strategy);

    let context = DownloadContext::builder(args.url.clone(), args.output)
        .max_segments(args.connections)
        .build();

    let task_id = match scheduler.submit(context).await {
        Ok(id) => id,
        Err(err) => {
            eprintln!("could not start download: {err}");
            return ExitCode::FAILURE;
        }
    };
    scheduler
        .add_observer(&task_id, Arc::new(TerminalProgressObserver::new()))
        .await
        .expect("task was just submitted");

    println!("starting download: {}", args.url);
    let start = Instant::now();

    let task = scheduler.get(&task_id).await.expect("task was just submitted");
    loop {
        match task.state().await {
            TaskState::Completed => {
                println!("download completed in {:.2}s", start.elapsed().as_secs_f64());
                return ExitCode::SUCCESS;
            }
            TaskState::Failed | TaskState::Cancelled => {
                eprintln!("download did not complete");
                return ExitCode::FAILURE;
            }
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}

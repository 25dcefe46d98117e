/// Binlog 트랜잭션 스트리머 사용 예제
///
/// binlog 파일을 읽어 트랜잭션마다 JSON 한 줄을 출력합니다.
use rust_binlog::{BinlogFormat, BinlogStreamer, ReplicationPosition, StreamerConfig};
use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 초기화
    tracing_subscriber::fmt::init();

    let path = env::var("BINLOG_FILE").unwrap_or_else(|_| "mysql-bin.000001".to_string());
    let format: BinlogFormat = match env::var("BINLOG_FORMAT") {
        Ok(value) => value.parse()?,
        Err(_) => BinlogFormat::default(),
    };

    let mut config = StreamerConfig::default().with_format(format);
    if let Ok(database) = env::var("BINLOG_DATABASE") {
        config = config.with_database(database);
    }
    if let Some(offset) = env::var("BINLOG_START_OFFSET")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
    {
        let file_name = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        config = config.with_start_position(ReplicationPosition::new(file_name, offset));
    }

    info!("Streaming {} ({:?})", path, config.format);

    let streamer = BinlogStreamer::new(config);
    let source = streamer.open_file(&path).await?;

    let transactions = Arc::new(AtomicU64::new(0));
    let counter = transactions.clone();
    streamer.start(source, move |tx| {
        counter.fetch_add(1, Ordering::Relaxed);
        println!("{}", serde_json::to_string(&tx)?);
        Ok(())
    })?;

    let join = streamer.join();
    tokio::pin!(join);
    let outcome = tokio::select! {
        outcome = &mut join => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping stream");
            streamer.cancel();
            join.await
        }
    };

    let position = streamer.position();
    info!(
        "{} transactions, final position {}",
        transactions.load(Ordering::Relaxed),
        position
    );
    println!("{}", position.to_json()?);

    outcome?;
    Ok(())
}

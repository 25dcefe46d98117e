//! Binlog 트랜잭션 스트리머
//!
//! 이벤트 소스 → 디코더 → 트랜잭션 조립기 → 소비자 콜백 순서의 파이프라인을
//! 하나의 취소 가능한 작업으로 실행합니다.

use crate::assembler::{Transaction, TransactionAssembler};
use crate::binlog::BinlogFormat;
use crate::error::{BoxError, Result, StreamerError};
use crate::offset::{PositionHandle, PositionTracker, ReplicationPosition};
use crate::service::{RunOutcome, ServiceContext, ServiceManager, ServiceState};
use crate::source::{EventSource, FileSource};
use std::path::Path;
use tracing::{debug, info, warn};

/// 연결 소스에서 시작 위치가 주어지지 않았을 때 사용하는 파일명
const UNKNOWN_BINLOG_FILE: &str = "";

/// 스트리머 설정
#[derive(Debug, Clone, Default)]
pub struct StreamerConfig {
    /// 이벤트 헤더 레이아웃
    pub format: BinlogFormat,
    /// 이 데이터베이스의 문장만 전달 (None 이면 전체)
    pub database: Option<String>,
    /// 재시작 위치
    pub start_position: Option<ReplicationPosition>,
}

impl StreamerConfig {
    pub fn with_format(mut self, format: BinlogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_start_position(mut self, position: ReplicationPosition) -> Self {
        self.start_position = Some(position);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(self.database.as_deref(), Some(db) if db.trim().is_empty()) {
            return Err(StreamerError::InvalidConfig(
                "database filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 트랜잭션 스트리머
#[derive(Debug)]
pub struct BinlogStreamer {
    config: StreamerConfig,
    service: ServiceManager,
    position: PositionHandle,
}

impl BinlogStreamer {
    pub fn new(config: StreamerConfig) -> Self {
        let start = config
            .start_position
            .clone()
            .unwrap_or_else(|| ReplicationPosition::start_of(UNKNOWN_BINLOG_FILE));
        let position = PositionTracker::new(start).handle();
        BinlogStreamer {
            config,
            service: ServiceManager::new(),
            position,
        }
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// 설정의 포맷과 시작 위치로 binlog 파일을 연다
    pub async fn open_file(&self, path: impl AsRef<Path>) -> Result<EventSource> {
        self.config.validate()?;
        let start_offset = self
            .config
            .start_position
            .as_ref()
            .map(|p| p.offset)
            .unwrap_or(0);
        let source = FileSource::open(path, self.config.format, start_offset).await?;
        Ok(source.into())
    }

    /// 파이프라인을 백그라운드 작업으로 시작한다
    pub fn start<F>(&self, source: EventSource, consumer: F) -> Result<()>
    where
        F: FnMut(Transaction) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.config.validate()?;
        if self.service.state() == ServiceState::Running {
            return Err(StreamerError::AlreadyRunning);
        }

        let start = self.initial_position(&source);
        info!("Starting binlog stream at {}", start);

        let tracker = PositionTracker::with_handle(start.clone(), &self.position);
        let assembler = TransactionAssembler::new(tracker)
            .with_database_filter(self.config.database.clone())
            .with_skip_executed(start.executed);

        self.service
            .go(move |ctx| run_pipeline(ctx, source, assembler, consumer))
    }

    /// 파일 하나를 끝까지 스트리밍
    pub async fn stream_file<F>(&self, path: impl AsRef<Path>, consumer: F) -> Result<RunOutcome>
    where
        F: FnMut(Transaction) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        let source = self.open_file(path).await?;
        self.start(source, consumer)?;
        self.join().await
    }

    pub async fn join(&self) -> Result<RunOutcome> {
        self.service.join().await
    }

    pub fn cancel(&self) {
        self.service.cancel()
    }

    pub fn state(&self) -> ServiceState {
        self.service.state()
    }

    /// 마지막으로 확정된 트랜잭션 경계 위치
    pub fn position(&self) -> ReplicationPosition {
        self.position.current()
    }

    pub fn position_handle(&self) -> PositionHandle {
        self.position.clone()
    }

    fn initial_position(&self, source: &EventSource) -> ReplicationPosition {
        let configured = self.config.start_position.clone();
        match (source.binlog_file(), source.offset()) {
            (Some(file), Some(offset)) => {
                let executed = match configured {
                    Some(pos) => {
                        if pos.binlog_file != file {
                            warn!(
                                "Start position file {} does not match source file {}",
                                pos.binlog_file, file
                            );
                        }
                        pos.executed
                    }
                    None => Default::default(),
                };
                ReplicationPosition::new(file, offset).with_executed(executed)
            }
            _ => configured.unwrap_or_else(|| ReplicationPosition::start_of(UNKNOWN_BINLOG_FILE)),
        }
    }
}

async fn run_pipeline<F>(
    ctx: ServiceContext,
    mut source: EventSource,
    mut assembler: TransactionAssembler,
    mut consumer: F,
) -> Result<RunOutcome>
where
    F: FnMut(Transaction) -> std::result::Result<(), BoxError>,
{
    let token = ctx.token().clone();
    loop {
        if !ctx.is_running() {
            return Ok(cancelled(&mut assembler));
        }

        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(cancelled(&mut assembler)),
            next = source.next_event() => next?,
        };

        let Some(event) = next else {
            assembler.finish()?;
            info!("Reached end of stream at {}", assembler.position().current());
            return Ok(RunOutcome::EndOfStream);
        };

        if let Some(transaction) = assembler.push(event)? {
            consumer(transaction).map_err(StreamerError::ConsumerCallback)?;
        }
    }
}

fn cancelled(assembler: &mut TransactionAssembler) -> RunOutcome {
    let discarded = assembler.discard();
    if discarded > 0 {
        debug!("Discarded {} buffered events on cancellation", discarded);
    }
    info!("Stream cancelled at {}", assembler.position().current());
    RunOutcome::Cancelled
}

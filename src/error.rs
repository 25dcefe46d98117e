//! Binlog 스트리머 에러 타입

use crate::offset::ReplicationPosition;
use std::io;
use thiserror::Error;

/// 컨슈머 콜백이 반환하는 에러
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum StreamerError {
    #[error("잘못된 이벤트: {0}")]
    MalformedEvent(String),

    #[error("알 수 없는 이벤트 타입: {0}")]
    UnknownEventType(u8),

    #[error("트랜잭션이 완료되지 않은 채 스트림이 끝났습니다 ({buffered}개 이벤트 버퍼링됨, 마지막 안전 위치 {position})")]
    IncompleteTransaction {
        buffered: usize,
        position: ReplicationPosition,
    },

    #[error("이미 실행 중입니다")]
    AlreadyRunning,

    #[error("실행 중인 작업이 없습니다")]
    NotRunning,

    #[error("컨슈머 콜백 에러: {0}")]
    ConsumerCallback(#[source] BoxError),

    #[error("소스 I/O 에러: {0}")]
    SourceIo(String),

    #[error("GTID 처리 에러: {0}")]
    Gtid(String),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("예상치 못한 에러: {0}")]
    Other(String),
}

impl From<io::Error> for StreamerError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => {
                StreamerError::SourceIo(format!("truncated read: {}", err))
            }
            _ => StreamerError::SourceIo(err.to_string()),
        }
    }
}

impl StreamerError {
    /// 디코딩 단계에서 발생한 에러인지 여부
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            StreamerError::MalformedEvent(_) | StreamerError::UnknownEventType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StreamerError>;

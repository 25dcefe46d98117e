//! MySQL Binlog 트랜잭션 스트리머
//!
//! 이 라이브러리는 MySQL 바이너리 로그 이벤트를 읽어 트랜잭션 단위로 묶어 전달합니다.
//! 주요 기능:
//! - Binlog 이벤트 디코딩 (표준 / Google 헤더 레이아웃)
//! - BEGIN ~ COMMIT 경계 기반 트랜잭션 조립
//! - GTID 및 파일 위치 추적, 재시작
//! - 취소 가능한 백그라운드 실행

pub mod assembler;
pub mod binlog;
pub mod error;
pub mod events;
pub mod gtid;
pub mod offset;
pub mod service;
pub mod source;
pub mod streamer;

#[cfg(test)]
mod test_support;

pub use assembler::{Transaction, TransactionAssembler, TransactionKind};
pub use binlog::{BinlogFormat, BinlogParser};
pub use error::{BoxError, Result, StreamerError};
pub use events::{BinlogEvent, EventClass, EventData, EventType, Statement, StatementCategory};
pub use gtid::{Gtid, GtidSet};
pub use offset::{PositionHandle, ReplicationPosition};
pub use service::{RunOutcome, ServiceManager, ServiceState};
pub use source::{ConnectionSource, EventSource, FileSource};
pub use streamer::{BinlogStreamer, StreamerConfig};

//! Binlog 처리 위치 추적 (ReplicationPosition 및 PositionTracker)
//!
//! Binlog 파일명 + 위치로 정확한 재시작 지점을 추적합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치
//! GTID 가 있는 스트림은 커밋된 GTID 집합도 함께 누적합니다.

use crate::error::Result;
use crate::events::{BinlogEvent, EventData};
use crate::gtid::{Gtid, GtidSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// binlog 파일은 4 바이트 매직 넘버 다음부터 이벤트가 시작된다
pub const BINLOG_START_OFFSET: u64 = 4;

/// 스트림 진행 위치
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub binlog_file: String,
    /// 다음에 읽을 바이트 위치
    pub offset: u64,
    /// 커밋된 GTID 집합
    #[serde(default)]
    pub executed: GtidSet,
}

impl ReplicationPosition {
    pub fn new(binlog_file: impl Into<String>, offset: u64) -> Self {
        ReplicationPosition {
            binlog_file: binlog_file.into(),
            offset,
            executed: GtidSet::new(),
        }
    }

    /// 파일의 첫 이벤트 위치
    pub fn start_of(binlog_file: impl Into<String>) -> Self {
        ReplicationPosition::new(binlog_file, BINLOG_START_OFFSET)
    }

    pub fn with_executed(mut self, executed: GtidSet) -> Self {
        self.executed = executed;
        self
    }

    /// 파일명에서 시퀀스 번호 추출
    pub fn file_sequence(&self) -> Option<u64> {
        self.binlog_file
            .rsplit('.')
            .next()
            .and_then(|s| s.parse().ok())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn sort_key(&self, other: &Self) -> Option<Ordering> {
        if self.binlog_file == other.binlog_file {
            return Some(Ordering::Equal);
        }
        match (self.file_sequence(), other.file_sequence()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

impl PartialOrd for ReplicationPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.sort_key(other)?.then(self.offset.cmp(&other.offset)) {
            Ordering::Equal if self.executed != other.executed => None,
            ordering => Some(ordering),
        }
    }
}

impl fmt::Display for ReplicationPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.binlog_file, self.offset)
    }
}

/// 외부에서 읽을 수 있는 공개 위치. 트랜잭션 경계에서만 갱신된다.
#[derive(Debug, Clone)]
pub struct PositionHandle {
    published: Arc<RwLock<ReplicationPosition>>,
}

impl PositionHandle {
    pub fn current(&self) -> ReplicationPosition {
        self.published.read().clone()
    }
}

/// 파이프라인 내부의 위치 추적기
///
/// `advance` 는 이벤트마다 호출되고 작업 위치만 바꾼다. 외부 공개 위치는
/// `commit`/`publish` 에서만 바뀌므로 트랜잭션 중간 상태는 보이지 않는다.
#[derive(Debug)]
pub struct PositionTracker {
    working: ReplicationPosition,
    pending_gtid: Option<Gtid>,
    published: Arc<RwLock<ReplicationPosition>>,
}

impl PositionTracker {
    pub fn new(start: ReplicationPosition) -> Self {
        PositionTracker {
            published: Arc::new(RwLock::new(start.clone())),
            working: start,
            pending_gtid: None,
        }
    }

    /// 기존 공개 위치를 이어받는다
    pub fn with_handle(start: ReplicationPosition, handle: &PositionHandle) -> Self {
        *handle.published.write() = start.clone();
        PositionTracker {
            published: handle.published.clone(),
            working: start,
            pending_gtid: None,
        }
    }

    pub fn handle(&self) -> PositionHandle {
        PositionHandle {
            published: self.published.clone(),
        }
    }

    pub fn working(&self) -> &ReplicationPosition {
        &self.working
    }

    pub fn pending_gtid(&self) -> Option<&Gtid> {
        self.pending_gtid.as_ref()
    }

    /// 이벤트 하나를 소비한 뒤 작업 위치 갱신
    pub fn advance(&mut self, event: &BinlogEvent) {
        match &event.data {
            EventData::Rotate(rotate) => {
                if rotate.next_binlog_name == self.working.binlog_file
                    && rotate.position < self.working.offset
                {
                    warn!(
                        "Ignoring rotate to {}:{} behind current position {}",
                        rotate.next_binlog_name, rotate.position, self.working
                    );
                    return;
                }
                self.working.binlog_file = rotate.next_binlog_name.clone();
                self.working.offset = rotate.position;
                trace!("Rotated to {}", self.working);
                return;
            }
            EventData::Gtid(gtid) if gtid.gtid.is_anonymous() => {
                trace!("Ignoring anonymous GTID {}", gtid.gtid);
            }
            EventData::Gtid(gtid) => {
                self.pending_gtid = Some(gtid.gtid.clone());
            }
            _ => {}
        }

        if let Some(group_id) = event.header.group_id.filter(|g| *g > 0) {
            self.pending_gtid = Some(Gtid::new(event.header.server_id.to_string(), group_id));
        }

        let end = event.end_offset();
        if end < self.working.offset {
            warn!(
                "Ignoring event ending at {} behind current position {}",
                end, self.working
            );
            return;
        }
        self.working.offset = end;
    }

    /// 트랜잭션 커밋: GTID 를 누적하고 위치를 공개한 뒤 스냅샷을 반환
    pub fn commit(&mut self) -> (ReplicationPosition, Option<Gtid>) {
        let gtid = self.pending_gtid.take();
        if let Some(ref gtid) = gtid {
            self.working.executed.add(gtid);
        }
        self.publish();
        (self.working.clone(), gtid)
    }

    /// 트랜잭션 밖에서 작업 위치를 그대로 공개
    pub fn publish(&self) {
        *self.published.write() = self.working.clone();
    }
}

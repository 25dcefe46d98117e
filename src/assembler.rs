//! 트랜잭션 조립기
//!
//! 디코딩된 이벤트를 순서대로 받아 BEGIN ~ COMMIT/XID 로 묶인 트랜잭션을 만든다.
//! 트랜잭션은 경계가 확인된 뒤에만 한 번에 내보내며, 스트림이 중간에 끝나면
//! 버퍼는 버리고 에러로 보고한다.

use crate::error::{Result, StreamerError};
use crate::events::{BinlogEvent, EventClass, EventData, Statement};
use crate::gtid::{Gtid, GtidSet};
use crate::offset::{PositionHandle, PositionTracker, ReplicationPosition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// 트랜잭션 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// 정상 커밋
    Commit,
    /// 롤백. 이벤트 없이 위치만 전달한다.
    Rollback,
    /// 데이터베이스 필터로 모든 이벤트가 걸러짐
    Filtered,
}

/// 조립이 끝난 트랜잭션
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// BEGIN/COMMIT 마커를 제외한 이벤트들 (스트림 순서)
    pub events: Vec<BinlogEvent>,
    /// 트랜잭션이 끝난 위치 (재시작 지점)
    pub position: ReplicationPosition,
    pub gtid: Option<Gtid>,
    /// 커밋 이벤트의 타임스탬프
    pub timestamp: DateTime<Utc>,
    pub kind: TransactionKind,
}

impl Transaction {
    /// 텍스트로 표현 가능한 문장들
    pub fn statements(&self) -> Vec<Statement> {
        self.events.iter().filter_map(BinlogEvent::statement).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    Outside,
    /// `implicit` 는 BEGIN 없이 프렐류드 이벤트로 시작된 autocommit 문장
    InTransaction { implicit: bool },
}

/// 이벤트 → 트랜잭션 상태 머신
#[derive(Debug)]
pub struct TransactionAssembler {
    state: AssemblerState,
    buffer: Vec<BinlogEvent>,
    /// 현재 버퍼에서 필터로 버려진 이벤트 수
    dropped: usize,
    tracker: PositionTracker,
    database: Option<String>,
    table_databases: HashMap<u64, String>,
    skip_executed: GtidSet,
    anomalies: u64,
}

impl TransactionAssembler {
    pub fn new(tracker: PositionTracker) -> Self {
        TransactionAssembler {
            state: AssemblerState::Outside,
            buffer: Vec::new(),
            dropped: 0,
            tracker,
            database: None,
            table_databases: HashMap::new(),
            skip_executed: GtidSet::new(),
            anomalies: 0,
        }
    }

    /// 지정한 데이터베이스의 문장만 남긴다
    pub fn with_database_filter(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    /// 이미 처리한 GTID 의 트랜잭션은 전달하지 않는다
    pub fn with_skip_executed(mut self, executed: GtidSet) -> Self {
        self.skip_executed = executed;
        self
    }

    pub fn position(&self) -> PositionHandle {
        self.tracker.handle()
    }

    /// 복구 가능한 형식 이상 (중첩 BEGIN, 짝 없는 COMMIT) 횟수
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    pub fn in_transaction(&self) -> bool {
        self.state != AssemblerState::Outside
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 이벤트 하나를 소비하고, 경계가 확인되면 완성된 트랜잭션을 반환
    pub fn push(&mut self, event: BinlogEvent) -> Result<Option<Transaction>> {
        self.tracker.advance(&event);
        let timestamp = event.timestamp();

        match (event.class, self.state) {
            (EventClass::Control, state) => {
                trace!("Control event {:?}", event.event_type());
                if state == AssemblerState::Outside {
                    self.tracker.publish();
                }
                Ok(None)
            }

            (EventClass::Opaque, AssemblerState::Outside) => {
                debug!(
                    "Skipping uninterpreted event type {} at offset {}",
                    event.header.event_type.as_u8(),
                    event.stream_offset
                );
                self.tracker.publish();
                Ok(None)
            }
            (EventClass::Opaque, AssemblerState::InTransaction { .. }) => {
                self.reset();
                Err(StreamerError::UnknownEventType(event.header.event_type.as_u8()))
            }

            (EventClass::Begin, AssemblerState::Outside) => {
                self.state = AssemblerState::InTransaction { implicit: false };
                Ok(None)
            }
            (EventClass::Begin, AssemblerState::InTransaction { .. }) => {
                self.anomalies += 1;
                warn!(
                    "BEGIN inside an open transaction at offset {}, discarding {} buffered events",
                    event.stream_offset,
                    self.buffer.len()
                );
                self.reset();
                self.state = AssemblerState::InTransaction { implicit: false };
                Ok(None)
            }

            (EventClass::Prelude, AssemblerState::Outside) => {
                self.state = AssemblerState::InTransaction { implicit: true };
                self.buffer_event(event);
                Ok(None)
            }
            (EventClass::Prelude, AssemblerState::InTransaction { .. })
            | (EventClass::Statement, AssemblerState::InTransaction { implicit: false }) => {
                self.buffer_event(event);
                Ok(None)
            }
            (EventClass::Statement, _) => {
                // autocommit 문장: 단독 트랜잭션으로 바로 내보낸다
                self.buffer_event(event);
                Ok(self.emit(TransactionKind::Commit, timestamp))
            }

            (EventClass::Commit, AssemblerState::InTransaction { .. }) => {
                Ok(self.emit(TransactionKind::Commit, timestamp))
            }
            (EventClass::Rollback, AssemblerState::InTransaction { .. }) => {
                Ok(self.emit(TransactionKind::Rollback, timestamp))
            }
            (EventClass::Commit | EventClass::Rollback, AssemblerState::Outside) => {
                self.anomalies += 1;
                warn!(
                    "{:?} marker outside a transaction at offset {}",
                    event.class, event.stream_offset
                );
                self.tracker.publish();
                Ok(None)
            }
        }
    }

    /// 스트림 끝. 열린 트랜잭션이 있으면 버리고 에러를 반환한다.
    pub fn finish(&mut self) -> Result<()> {
        if !self.in_transaction() && self.buffer.is_empty() {
            return Ok(());
        }
        let buffered = self.buffer.len();
        self.reset();
        Err(StreamerError::IncompleteTransaction {
            buffered,
            position: self.tracker.handle().current(),
        })
    }

    /// 취소 시 부분 버퍼를 버리고 버린 이벤트 수를 반환
    pub fn discard(&mut self) -> usize {
        let buffered = self.buffer.len();
        self.reset();
        buffered
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.dropped = 0;
        self.state = AssemblerState::Outside;
    }

    fn buffer_event(&mut self, event: BinlogEvent) {
        if self.is_filtered(&event) {
            self.dropped += 1;
            // 걸러진 문장 바로 앞의 INTVAR/RAND/USER_VAR 도 함께 버린다.
            // 테이블 맵은 각자 필터링되므로 건드리지 않는다.
            if event.class == EventClass::Statement {
                while matches!(self.buffer.last(), Some(last) if is_statement_context(last)) {
                    self.buffer.pop();
                    self.dropped += 1;
                }
            }
            return;
        }
        self.buffer.push(event);
    }

    fn is_filtered(&mut self, event: &BinlogEvent) -> bool {
        let Some(database) = self.database.as_deref() else {
            return false;
        };
        match &event.data {
            EventData::Query(q) => q.database != database,
            EventData::TableMap(map) => {
                self.table_databases
                    .insert(map.table_id, map.database.clone());
                map.database != database
            }
            EventData::Rows(rows) => self
                .table_databases
                .get(&rows.table_id)
                .map(|db| db != database)
                .unwrap_or(false),
            _ => false,
        }
    }

    fn emit(&mut self, kind: TransactionKind, timestamp: DateTime<Utc>) -> Option<Transaction> {
        let (position, gtid) = self.tracker.commit();
        let mut events = std::mem::take(&mut self.buffer);
        let dropped = std::mem::take(&mut self.dropped);
        self.state = AssemblerState::Outside;

        let kind = match kind {
            TransactionKind::Rollback => {
                events.clear();
                TransactionKind::Rollback
            }
            TransactionKind::Commit if events.is_empty() && dropped > 0 => TransactionKind::Filtered,
            other => other,
        };

        if let Some(ref gtid) = gtid {
            if self.skip_executed.contains(gtid) {
                debug!("Skipping already executed transaction {}", gtid);
                return None;
            }
        }

        trace!(
            "Emitting {:?} transaction with {} events at {}",
            kind,
            events.len(),
            position
        );
        Some(Transaction {
            events,
            position,
            gtid,
            timestamp,
            kind,
        })
    }
}

/// 바로 뒤따르는 문장 하나에만 속하는 프렐류드
fn is_statement_context(event: &BinlogEvent) -> bool {
    matches!(
        event.data,
        EventData::Intvar(_) | EventData::Rand(_) | EventData::UserVar(_)
    )
}

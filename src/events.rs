//! MySQL Binlog 이벤트 타입 및 데이터 구조 정의

use crate::gtid::Gtid;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// MySQL Binlog 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    StartV3,
    /// 쿼리 이벤트 (BEGIN/COMMIT, DDL, SBR DML)
    Query,
    Stop,
    /// 로테이션 이벤트 (새 binlog 파일)
    Rotate,
    /// LAST_INSERT_ID / INSERT_ID
    Intvar,
    Rand,
    UserVar,
    /// 포맷 설명 이벤트 (체크섬, 헤더 길이)
    FormatDescription,
    /// 트랜잭션 커밋
    Xid,
    /// 테이블 맵 이벤트 (스키마 정보)
    TableMap,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    Incident,
    Heartbeat,
    Ignorable,
    /// Rows Query 이벤트 (원본 쿼리)
    RowsQuery,
    WriteRowsV2,
    UpdateRowsV2,
    DeleteRowsV2,
    /// GTID 이벤트 (Global Transaction ID)
    Gtid,
    AnonymousGtid,
    PreviousGtids,
    /// 디코더가 해석하지 않는 타입
    Unknown(u8),
}

impl EventType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => EventType::StartV3,
            2 => EventType::Query,
            3 => EventType::Stop,
            4 => EventType::Rotate,
            5 => EventType::Intvar,
            13 => EventType::Rand,
            14 => EventType::UserVar,
            15 => EventType::FormatDescription,
            16 => EventType::Xid,
            19 => EventType::TableMap,
            23 => EventType::WriteRowsV1,
            24 => EventType::UpdateRowsV1,
            25 => EventType::DeleteRowsV1,
            26 => EventType::Incident,
            27 => EventType::Heartbeat,
            28 => EventType::Ignorable,
            29 => EventType::RowsQuery,
            30 => EventType::WriteRowsV2,
            31 => EventType::UpdateRowsV2,
            32 => EventType::DeleteRowsV2,
            33 => EventType::Gtid,
            34 => EventType::AnonymousGtid,
            35 => EventType::PreviousGtids,
            other => EventType::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            EventType::StartV3 => 1,
            EventType::Query => 2,
            EventType::Stop => 3,
            EventType::Rotate => 4,
            EventType::Intvar => 5,
            EventType::Rand => 13,
            EventType::UserVar => 14,
            EventType::FormatDescription => 15,
            EventType::Xid => 16,
            EventType::TableMap => 19,
            EventType::WriteRowsV1 => 23,
            EventType::UpdateRowsV1 => 24,
            EventType::DeleteRowsV1 => 25,
            EventType::Incident => 26,
            EventType::Heartbeat => 27,
            EventType::Ignorable => 28,
            EventType::RowsQuery => 29,
            EventType::WriteRowsV2 => 30,
            EventType::UpdateRowsV2 => 31,
            EventType::DeleteRowsV2 => 32,
            EventType::Gtid => 33,
            EventType::AnonymousGtid => 34,
            EventType::PreviousGtids => 35,
            EventType::Unknown(code) => *code,
        }
    }

    pub fn is_row_event(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsV1
                | EventType::WriteRowsV2
                | EventType::UpdateRowsV1
                | EventType::UpdateRowsV2
                | EventType::DeleteRowsV1
                | EventType::DeleteRowsV2
        )
    }
}

/// Binlog 이벤트 헤더
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// 이벤트 타입
    pub event_type: EventType,
    /// MySQL 서버 ID
    pub server_id: u32,
    /// 이벤트 길이 (헤더 + 본문, 바이트)
    pub event_length: u32,
    /// 다음 이벤트 위치
    pub next_pos: u32,
    /// 이벤트 플래그
    pub flags: u16,
    /// Google 포맷 헤더의 group id
    pub group_id: Option<u64>,
}

/// binlog 체크섬 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    None,
    Crc32,
}

/// 포맷 설명 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptionData {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    /// 이후 이벤트들의 공통 헤더 길이
    pub header_length: u8,
    pub checksum: ChecksumAlgorithm,
}

/// 쿼리 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEventData {
    /// 스레드 ID
    pub thread_id: u32,
    /// 실행 시간 (초)
    pub exec_time: u32,
    pub error_code: u16,
    /// 데이터베이스명
    pub database: String,
    /// 쿼리 문자열
    pub query: String,
}

impl QueryEventData {
    pub fn category(&self) -> StatementCategory {
        StatementCategory::of(&self.query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XidEventData {
    pub xid: u64,
}

/// 회전 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateEventData {
    /// 새 바이너리 로그 파일명
    pub next_binlog_name: String,
    /// 새 파일의 시작 위치
    pub position: u64,
}

/// GTID 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidEventData {
    pub gtid: Gtid,
    pub flags: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntvarKind {
    LastInsertId,
    InsertId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntvarEventData {
    pub kind: IntvarKind,
    pub value: u64,
}

impl IntvarEventData {
    pub fn to_sql(&self) -> String {
        match self.kind {
            IntvarKind::LastInsertId => format!("SET LAST_INSERT_ID={}", self.value),
            IntvarKind::InsertId => format!("SET INSERT_ID={}", self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandEventData {
    pub seed1: u64,
    pub seed2: u64,
}

impl RandEventData {
    pub fn to_sql(&self) -> String {
        format!(
            "SET @@RAND_SEED1={}, @@RAND_SEED2={}",
            self.seed1, self.seed2
        )
    }
}

/// 사용자 변수 이벤트. 값은 해석하지 않고 그대로 보관한다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVarEventData {
    pub name: String,
    pub is_null: bool,
    pub value: Bytes,
}

/// 테이블 맵 정보. 컬럼 메타데이터는 해석하지 않는다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapData {
    /// 테이블 ID
    pub table_id: u64,
    /// 데이터베이스명
    pub database: String,
    /// 테이블명
    pub table: String,
}

/// 행 이벤트 (WRITE/UPDATE/DELETE_ROWS). 행 이미지는 원본 바이트로만 남는다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsEventData {
    pub table_id: u64,
    pub flags: u16,
}

/// 디코딩된 이벤트 본문
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventData {
    FormatDescription(FormatDescriptionData),
    Query(QueryEventData),
    Xid(XidEventData),
    Rotate(RotateEventData),
    Gtid(GtidEventData),
    Intvar(IntvarEventData),
    Rand(RandEventData),
    UserVar(UserVarEventData),
    TableMap(TableMapData),
    Rows(RowsEventData),
    RowsQuery(String),
    PreviousGtids,
    Heartbeat,
    Stop,
    Ignorable,
    Unknown(u8),
}

/// 트랜잭션 경계 판단을 위한 이벤트 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventClass {
    /// 위치만 갱신하고 트랜잭션에는 포함되지 않는 이벤트
    Control,
    Begin,
    Commit,
    Rollback,
    /// 뒤따르는 문장에 속하는 컨텍스트 (INTVAR, RAND, TABLE_MAP 등)
    Prelude,
    Statement,
    /// 해석하지 않은 이벤트
    Opaque,
}

impl EventClass {
    pub fn of(data: &EventData) -> Self {
        match data {
            EventData::FormatDescription(_)
            | EventData::Rotate(_)
            | EventData::Gtid(_)
            | EventData::PreviousGtids
            | EventData::Heartbeat
            | EventData::Stop
            | EventData::Ignorable => EventClass::Control,
            EventData::Xid(_) => EventClass::Commit,
            EventData::Query(q) => match q.category() {
                StatementCategory::Begin => EventClass::Begin,
                StatementCategory::Commit => EventClass::Commit,
                StatementCategory::Rollback => EventClass::Rollback,
                _ => EventClass::Statement,
            },
            EventData::Intvar(_)
            | EventData::Rand(_)
            | EventData::UserVar(_)
            | EventData::TableMap(_) => EventClass::Prelude,
            EventData::Rows(_) | EventData::RowsQuery(_) => EventClass::Statement,
            EventData::Unknown(_) => EventClass::Opaque,
        }
    }
}

/// 쿼리 문자열의 첫 키워드로 판단한 문장 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementCategory {
    Begin,
    Commit,
    Rollback,
    Set,
    Dml,
    Ddl,
    Unrecognized,
}

fn leading_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 앞쪽 공백과 /* ... */ 주석은 건너뛴다
    RE.get_or_init(|| {
        Regex::new(r"(?s)^\s*(?:/\*.*?\*/\s*)*([A-Za-z]+)(?:\s+([A-Za-z]+))?").unwrap()
    })
}

impl StatementCategory {
    pub fn of(sql: &str) -> Self {
        let Some(caps) = leading_keyword().captures(sql) else {
            return StatementCategory::Unrecognized;
        };
        let first = caps[1].to_ascii_uppercase();
        let second = caps.get(2).map(|m| m.as_str().to_ascii_uppercase());

        match first.as_str() {
            "BEGIN" => StatementCategory::Begin,
            "START" if second.as_deref() == Some("TRANSACTION") => StatementCategory::Begin,
            "COMMIT" => StatementCategory::Commit,
            // ROLLBACK TO SAVEPOINT 는 트랜잭션을 끝내지 않는다
            "ROLLBACK" if second.as_deref() == Some("TO") => StatementCategory::Unrecognized,
            "ROLLBACK" => StatementCategory::Rollback,
            "SET" => StatementCategory::Set,
            "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => StatementCategory::Dml,
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" => StatementCategory::Ddl,
            _ => StatementCategory::Unrecognized,
        }
    }
}

/// 트랜잭션의 텍스트 관점 문장
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub category: StatementCategory,
    pub sql: String,
}

/// 완성된 Binlog 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogEvent {
    /// 이벤트 헤더
    pub header: EventHeader,
    /// 이벤트 데이터
    pub data: EventData,
    pub class: EventClass,
    /// 소스 내 이벤트 시작 바이트 위치
    pub stream_offset: u64,
    /// 헤더를 포함한 원본 레코드
    pub raw: Bytes,
}

impl BinlogEvent {
    pub fn event_type(&self) -> EventType {
        self.header.event_type
    }

    /// 이 이벤트 바로 다음 바이트의 위치
    pub fn end_offset(&self) -> u64 {
        self.stream_offset + self.header.event_length as u64
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.header.timestamp as i64, 0)
            .single()
            .unwrap_or_default()
    }

    /// 텍스트로 표현 가능한 이벤트를 문장으로 변환
    pub fn statement(&self) -> Option<Statement> {
        match &self.data {
            EventData::Query(q) => Some(Statement {
                category: q.category(),
                sql: q.query.clone(),
            }),
            EventData::RowsQuery(sql) => Some(Statement {
                category: StatementCategory::of(sql),
                sql: sql.clone(),
            }),
            EventData::Intvar(iv) => Some(Statement {
                category: StatementCategory::Set,
                sql: iv.to_sql(),
            }),
            EventData::Rand(rand) => Some(Statement {
                category: StatementCategory::Set,
                sql: rand.to_sql(),
            }),
            _ => None,
        }
    }
}

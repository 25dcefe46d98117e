//! MySQL Binlog 바이너리 형식 디코더
//!
//! 파일 헤더: 4 바이트 매직 넘버 (0xfe 0x62 0x69 0x6e)
//! 각 이벤트 (표준 포맷, 19 bytes 헤더):
//!   - Timestamp (4 bytes)
//!   - Type (1 byte)
//!   - Server ID (4 bytes)
//!   - Event Length (4 bytes)
//!   - Next Position (4 bytes)
//!   - Flags (2 bytes)
//!   - Event Data (variable)
//! Google 포맷은 헤더 뒤에 Group ID (8 bytes) 가 붙어 27 bytes 헤더를 사용합니다.

use crate::error::{Result, StreamerError};
use crate::events::*;
use crate::gtid::Gtid;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{trace, warn};

pub const BINLOG_MAGIC: &[u8; 4] = &[0xfe, 0x62, 0x69, 0x6e]; // ".bin" in ASCII
pub const EVENT_HEADER_SIZE: usize = 19;
pub const GOOGLE_EVENT_HEADER_SIZE: usize = 27;
/// 헤더 안의 이벤트 전체 길이 필드 위치
pub const EVENT_SIZE_OFFSET: usize = 9;
/// 이벤트 최대 길이 (max_allowed_packet 상한 1 GiB)
pub const MAX_EVENT_SIZE: usize = 1 << 30;
const CHECKSUM_SIZE: usize = 4;

/// 이벤트 헤더 레이아웃 전략. 소스 단위로 선택된다.
pub trait HeaderLayout: Send + Sync + fmt::Debug {
    fn header_len(&self) -> usize;

    fn parse_header(&self, data: &[u8]) -> Result<EventHeader>;
}

/// MySQL 표준 v4 헤더
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardLayout;

/// Google MySQL 패치의 group id 확장 헤더
#[derive(Debug, Clone, Copy, Default)]
pub struct GoogleLayout;

fn parse_common_header(cursor: &mut Cursor<&[u8]>) -> io::Result<EventHeader> {
    let timestamp = cursor.read_u32::<LittleEndian>()?;
    let event_type = cursor.read_u8()?;
    let server_id = cursor.read_u32::<LittleEndian>()?;
    let event_length = cursor.read_u32::<LittleEndian>()?;
    let next_pos = cursor.read_u32::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;

    Ok(EventHeader {
        timestamp,
        event_type: EventType::from_u8(event_type),
        server_id,
        event_length,
        next_pos,
        flags,
        group_id: None,
    })
}

fn short_header(len: usize, need: usize) -> StreamerError {
    StreamerError::MalformedEvent(format!(
        "Invalid event header: {} bytes, need {}",
        len, need
    ))
}

impl HeaderLayout for StandardLayout {
    fn header_len(&self) -> usize {
        EVENT_HEADER_SIZE
    }

    fn parse_header(&self, data: &[u8]) -> Result<EventHeader> {
        if data.len() < EVENT_HEADER_SIZE {
            return Err(short_header(data.len(), EVENT_HEADER_SIZE));
        }
        let mut cursor = Cursor::new(data);
        parse_common_header(&mut cursor).map_err(|_| short_header(data.len(), EVENT_HEADER_SIZE))
    }
}

impl HeaderLayout for GoogleLayout {
    fn header_len(&self) -> usize {
        GOOGLE_EVENT_HEADER_SIZE
    }

    fn parse_header(&self, data: &[u8]) -> Result<EventHeader> {
        if data.len() < GOOGLE_EVENT_HEADER_SIZE {
            return Err(short_header(data.len(), GOOGLE_EVENT_HEADER_SIZE));
        }
        let mut cursor = Cursor::new(data);
        let parse = |cursor: &mut Cursor<&[u8]>| -> io::Result<EventHeader> {
            let mut header = parse_common_header(cursor)?;
            header.group_id = Some(cursor.read_u64::<LittleEndian>()?);
            Ok(header)
        };
        parse(&mut cursor).map_err(|_| short_header(data.len(), GOOGLE_EVENT_HEADER_SIZE))
    }
}

/// 소스별 binlog 포맷 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinlogFormat {
    #[default]
    Standard,
    Google,
}

impl BinlogFormat {
    pub fn layout(&self) -> Arc<dyn HeaderLayout> {
        match self {
            BinlogFormat::Standard => Arc::new(StandardLayout),
            BinlogFormat::Google => Arc::new(GoogleLayout),
        }
    }

    pub fn header_len(&self) -> usize {
        self.layout().header_len()
    }
}

impl FromStr for BinlogFormat {
    type Err = StreamerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "mysql" | "default" => Ok(BinlogFormat::Standard),
            "google" => Ok(BinlogFormat::Google),
            other => Err(StreamerError::InvalidConfig(format!(
                "Unknown binlog format: {}",
                other
            ))),
        }
    }
}

/// 헤더 블록에서 이벤트 전체 길이(bytes 9..13, little-endian) 추출
pub fn event_size(header: &[u8]) -> Result<u32> {
    let field = header
        .get(EVENT_SIZE_OFFSET..EVENT_SIZE_OFFSET + 4)
        .ok_or_else(|| short_header(header.len(), EVENT_SIZE_OFFSET + 4))?;
    Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}

/// Binlog 이벤트 디코더
///
/// 포맷 설명 이벤트에서 읽은 체크섬 설정을 기억하므로 소스마다 하나씩 사용한다.
#[derive(Debug, Clone)]
pub struct BinlogParser {
    layout: Arc<dyn HeaderLayout>,
    checksum: ChecksumAlgorithm,
}

impl Default for BinlogParser {
    fn default() -> Self {
        BinlogParser::new(BinlogFormat::Standard)
    }
}

impl BinlogParser {
    pub fn new(format: BinlogFormat) -> Self {
        BinlogParser::with_layout(format.layout())
    }

    pub fn with_layout(layout: Arc<dyn HeaderLayout>) -> Self {
        BinlogParser {
            layout,
            checksum: ChecksumAlgorithm::None,
        }
    }

    pub fn header_len(&self) -> usize {
        self.layout.header_len()
    }

    pub fn checksum(&self) -> ChecksumAlgorithm {
        self.checksum
    }

    /// Binlog 파일 헤더 검증
    pub fn verify_magic(data: &[u8]) -> Result<()> {
        if data.len() < BINLOG_MAGIC.len() {
            return Err(StreamerError::MalformedEvent(
                "Invalid binlog: too short".to_string(),
            ));
        }

        if data[..4] == BINLOG_MAGIC[..] {
            Ok(())
        } else {
            Err(StreamerError::MalformedEvent(
                "Invalid binlog magic number".to_string(),
            ))
        }
    }

    /// 원본 레코드 하나를 이벤트로 디코딩
    ///
    /// 해석하지 않는 타입은 `EventData::Unknown` 으로 통과시킨다.
    pub fn decode(&mut self, raw: Bytes, stream_offset: u64) -> Result<BinlogEvent> {
        let header_len = self.layout.header_len();
        if raw.len() < header_len {
            return Err(short_header(raw.len(), header_len));
        }

        let header = self.layout.parse_header(&raw[..header_len])?;
        if header.event_length as usize != raw.len() {
            return Err(StreamerError::MalformedEvent(format!(
                "Declared event size {} does not match buffer length {} at offset {}",
                header.event_length,
                raw.len(),
                stream_offset
            )));
        }

        let data = self.decode_body(&header, &raw[header_len..])?;
        if let EventData::FormatDescription(ref fde) = data {
            if fde.header_length as usize != header_len {
                warn!(
                    "Format description declares {}-byte headers, layout uses {}",
                    fde.header_length, header_len
                );
            }
            self.checksum = fde.checksum;
        }

        let class = EventClass::of(&data);
        trace!(
            "Decoded {:?} ({:?}) at offset {}, {} bytes",
            header.event_type,
            class,
            stream_offset,
            raw.len()
        );

        Ok(BinlogEvent {
            header,
            data,
            class,
            stream_offset,
            raw,
        })
    }

    /// 알 수 없는 타입을 에러로 돌려주는 디코딩
    pub fn decode_strict(&mut self, raw: Bytes, stream_offset: u64) -> Result<BinlogEvent> {
        let event = self.decode(raw, stream_offset)?;
        match event.data {
            EventData::Unknown(code) => Err(StreamerError::UnknownEventType(code)),
            _ => Ok(event),
        }
    }

    fn decode_body(&self, header: &EventHeader, body: &[u8]) -> Result<EventData> {
        let event_type = header.event_type;
        if event_type == EventType::FormatDescription {
            return parse_format_description(body).map(EventData::FormatDescription).map_err(
                |e| StreamerError::MalformedEvent(format!("Invalid format description: {}", e)),
            );
        }

        let body = match self.checksum {
            ChecksumAlgorithm::Crc32 => {
                if body.len() < CHECKSUM_SIZE {
                    return Err(StreamerError::MalformedEvent(format!(
                        "{:?} body too short for checksum",
                        event_type
                    )));
                }
                &body[..body.len() - CHECKSUM_SIZE]
            }
            ChecksumAlgorithm::None => body,
        };

        let parsed = match event_type {
            EventType::Query => parse_query(body).map(EventData::Query),
            EventType::Xid => parse_xid(body).map(EventData::Xid),
            EventType::Rotate => parse_rotate(body).map(EventData::Rotate),
            EventType::Gtid => parse_gtid(body).map(EventData::Gtid),
            // GTID 모드가 꺼진 서버의 익명 GTID 는 트랜잭션 식별자가 아니다
            EventType::AnonymousGtid => Ok(EventData::Ignorable),
            EventType::Intvar => parse_intvar(body).map(EventData::Intvar),
            EventType::Rand => parse_rand(body).map(EventData::Rand),
            EventType::UserVar => parse_user_var(body).map(EventData::UserVar),
            EventType::TableMap => parse_table_map(body).map(EventData::TableMap),
            t if t.is_row_event() => parse_rows_header(body).map(EventData::Rows),
            EventType::RowsQuery => parse_rows_query(body).map(EventData::RowsQuery),
            EventType::PreviousGtids => Ok(EventData::PreviousGtids),
            EventType::Heartbeat => Ok(EventData::Heartbeat),
            EventType::Stop => Ok(EventData::Stop),
            EventType::Unknown(code) => Ok(EventData::Unknown(code)),
            _ => Ok(EventData::Ignorable),
        };

        parsed.map_err(|e| StreamerError::MalformedEvent(format!("Invalid {:?} event: {}", event_type, e)))
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn remaining<'a>(cursor: &Cursor<&'a [u8]>) -> &'a [u8] {
    let data = *cursor.get_ref();
    &data[(cursor.position() as usize).min(data.len())..]
}

/// 5.6.1 이상부터 포맷 설명 이벤트에 체크섬 알고리즘 바이트가 있다
fn version_has_checksum(version: &str) -> bool {
    let mut parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    (major, minor, patch) >= (5, 6, 1)
}

/// FORMAT_DESCRIPTION 이벤트 파싱 (15)
fn parse_format_description(data: &[u8]) -> io::Result<FormatDescriptionData> {
    let mut cursor = Cursor::new(data);

    let binlog_version = cursor.read_u16::<LittleEndian>()?;
    let version_bytes = read_bytes(&mut cursor, 50)?;
    let server_version = String::from_utf8_lossy(&version_bytes)
        .trim_end_matches('\0')
        .to_string();
    let create_timestamp = cursor.read_u32::<LittleEndian>()?;
    let header_length = cursor.read_u8()?;

    // 체크섬 알고리즘 바이트는 끝의 CRC32 4 바이트 바로 앞에 있다
    let checksum = if version_has_checksum(&server_version) && data.len() >= 57 + 1 + 5 {
        match data[data.len() - 5] {
            1 => ChecksumAlgorithm::Crc32,
            _ => ChecksumAlgorithm::None,
        }
    } else {
        ChecksumAlgorithm::None
    };

    Ok(FormatDescriptionData {
        binlog_version,
        server_version,
        create_timestamp,
        header_length,
        checksum,
    })
}

/// QUERY 이벤트 파싱 (2)
fn parse_query(data: &[u8]) -> io::Result<QueryEventData> {
    let mut cursor = Cursor::new(data);

    let thread_id = cursor.read_u32::<LittleEndian>()?;
    let exec_time = cursor.read_u32::<LittleEndian>()?;
    let db_len = cursor.read_u8()? as usize;
    let error_code = cursor.read_u16::<LittleEndian>()?;
    let status_len = cursor.read_u16::<LittleEndian>()? as usize;

    // Status variables skip
    read_bytes(&mut cursor, status_len)?;

    // 데이터베이스명 + null terminator
    let db_bytes = read_bytes(&mut cursor, db_len)?;
    let database = String::from_utf8_lossy(&db_bytes).to_string();
    if cursor.read_u8()? != 0 {
        return Err(invalid("database name is not null-terminated"));
    }

    let query = String::from_utf8_lossy(remaining(&cursor)).to_string();

    Ok(QueryEventData {
        thread_id,
        exec_time,
        error_code,
        database,
        query,
    })
}

/// XID 이벤트 파싱 (16)
fn parse_xid(data: &[u8]) -> io::Result<XidEventData> {
    let mut cursor = Cursor::new(data);
    let xid = cursor.read_u64::<LittleEndian>()?;
    Ok(XidEventData { xid })
}

/// ROTATE 이벤트 파싱 (4)
fn parse_rotate(data: &[u8]) -> io::Result<RotateEventData> {
    let mut cursor = Cursor::new(data);

    let position = cursor.read_u64::<LittleEndian>()?;
    let filename = String::from_utf8_lossy(remaining(&cursor)).to_string();
    if filename.is_empty() {
        return Err(invalid("missing binlog file name"));
    }

    Ok(RotateEventData {
        next_binlog_name: filename,
        position,
    })
}

/// GTID 이벤트 파싱 (33, 34)
fn parse_gtid(data: &[u8]) -> io::Result<GtidEventData> {
    let mut cursor = Cursor::new(data);

    let flags = cursor.read_u8()?;
    let mut sid = [0u8; 16];
    cursor.read_exact(&mut sid)?;
    let sequence = cursor.read_u64::<LittleEndian>()?;

    Ok(GtidEventData {
        gtid: Gtid::new(uuid::Uuid::from_bytes(sid).to_string(), sequence),
        flags,
    })
}

/// INTVAR 이벤트 파싱 (5)
fn parse_intvar(data: &[u8]) -> io::Result<IntvarEventData> {
    let mut cursor = Cursor::new(data);

    let kind = match cursor.read_u8()? {
        1 => IntvarKind::LastInsertId,
        2 => IntvarKind::InsertId,
        other => return Err(invalid(format!("unknown intvar type {}", other))),
    };
    let value = cursor.read_u64::<LittleEndian>()?;

    Ok(IntvarEventData { kind, value })
}

/// RAND 이벤트 파싱 (13)
fn parse_rand(data: &[u8]) -> io::Result<RandEventData> {
    let mut cursor = Cursor::new(data);
    let seed1 = cursor.read_u64::<LittleEndian>()?;
    let seed2 = cursor.read_u64::<LittleEndian>()?;
    Ok(RandEventData { seed1, seed2 })
}

/// USER_VAR 이벤트 파싱 (14)
fn parse_user_var(data: &[u8]) -> io::Result<UserVarEventData> {
    let mut cursor = Cursor::new(data);

    let name_len = cursor.read_u32::<LittleEndian>()? as usize;
    let name_bytes = read_bytes(&mut cursor, name_len)?;
    let name = String::from_utf8_lossy(&name_bytes).to_string();
    let is_null = cursor.read_u8()? != 0;
    let value = if is_null {
        Bytes::new()
    } else {
        Bytes::copy_from_slice(remaining(&cursor))
    };

    Ok(UserVarEventData {
        name,
        is_null,
        value,
    })
}

/// TABLE_MAP 이벤트 파싱 (19). 컬럼 정의는 읽지 않는다.
fn parse_table_map(data: &[u8]) -> io::Result<TableMapData> {
    let mut cursor = Cursor::new(data);

    let table_id = cursor.read_u48::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;

    let db_len = cursor.read_u8()? as usize;
    let db_bytes = read_bytes(&mut cursor, db_len)?;
    cursor.read_u8()?;

    let tbl_len = cursor.read_u8()? as usize;
    let tbl_bytes = read_bytes(&mut cursor, tbl_len)?;

    Ok(TableMapData {
        table_id,
        database: String::from_utf8_lossy(&db_bytes).to_string(),
        table: String::from_utf8_lossy(&tbl_bytes).to_string(),
    })
}

/// WRITE/UPDATE/DELETE_ROWS 이벤트의 post-header 파싱
fn parse_rows_header(data: &[u8]) -> io::Result<RowsEventData> {
    let mut cursor = Cursor::new(data);
    let table_id = cursor.read_u48::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    Ok(RowsEventData { table_id, flags })
}

/// ROWS_QUERY 이벤트 파싱 (29). 첫 바이트의 길이 값은 255 에서 잘리므로 무시한다.
fn parse_rows_query(data: &[u8]) -> io::Result<String> {
    let mut cursor = Cursor::new(data);
    cursor.read_u8()?;
    Ok(String::from_utf8_lossy(remaining(&cursor)).to_string())
}

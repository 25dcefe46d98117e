//! 테스트용 binlog 바이트 생성기

use crate::binlog::{BinlogFormat, BinlogParser, BINLOG_MAGIC};
use crate::events::BinlogEvent;
use crate::offset::BINLOG_START_OFFSET;
use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use std::io::Write;
use std::path::{Path, PathBuf};

const SERVER_VERSION: &str = "8.0.33";

/// 오프셋을 이어가며 이벤트 레코드를 만든다
pub(crate) struct EventBuilder {
    format: BinlogFormat,
    offset: u64,
    timestamp: u32,
    server_id: u32,
    group_id: u64,
    checksum: bool,
    parser: BinlogParser,
}

impl EventBuilder {
    pub fn standard() -> Self {
        EventBuilder::new(BinlogFormat::Standard, 0)
    }

    pub fn google(group_id: u64) -> Self {
        EventBuilder::new(BinlogFormat::Google, group_id)
    }

    fn new(format: BinlogFormat, group_id: u64) -> Self {
        EventBuilder {
            format,
            offset: BINLOG_START_OFFSET,
            timestamp: 1_407_805_592,
            server_id: 62344,
            group_id,
            checksum: false,
            parser: BinlogParser::new(format),
        }
    }

    /// 모든 이벤트 끝에 CRC32 자리(4 bytes)를 붙인다
    pub fn with_checksum(mut self) -> Self {
        self.checksum = true;
        let fde = self.build(15, &self.format_description_body());
        self.parser
            .decode(Bytes::from(fde), 0)
            .expect("format description must decode");
        self
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn set_group_id(&mut self, group_id: u64) {
        self.group_id = group_id;
    }

    fn build(&self, type_code: u8, body: &[u8]) -> Vec<u8> {
        let header_len = self.format.header_len();
        let trailer = if self.checksum { 4 } else { 0 };
        let event_length = (header_len + body.len() + trailer) as u32;

        let mut buf = Vec::with_capacity(event_length as usize);
        buf.write_u32::<LittleEndian>(self.timestamp).unwrap();
        buf.write_u8(type_code).unwrap();
        buf.write_u32::<LittleEndian>(self.server_id).unwrap();
        buf.write_u32::<LittleEndian>(event_length).unwrap();
        buf.write_u32::<LittleEndian>((self.offset + event_length as u64) as u32)
            .unwrap();
        buf.write_u16::<LittleEndian>(0).unwrap();
        if self.format == BinlogFormat::Google {
            buf.write_u64::<LittleEndian>(self.group_id).unwrap();
        }
        buf.write_all(body).unwrap();
        if self.checksum {
            buf.write_u32::<LittleEndian>(0xdead_beef).unwrap();
        }
        buf
    }

    pub fn raw_event(&mut self, type_code: u8, body: &[u8]) -> Vec<u8> {
        let raw = self.build(type_code, body);
        self.offset += raw.len() as u64;
        raw
    }

    pub fn event(&mut self, type_code: u8, body: &[u8]) -> BinlogEvent {
        let offset = self.offset;
        let raw = self.raw_event(type_code, body);
        self.parser
            .decode(Bytes::from(raw), offset)
            .expect("test event must decode")
    }

    fn format_description_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.write_u16::<LittleEndian>(4).unwrap();
        let mut version = [0u8; 50];
        version[..SERVER_VERSION.len()].copy_from_slice(SERVER_VERSION.as_bytes());
        body.write_all(&version).unwrap();
        body.write_u32::<LittleEndian>(self.timestamp).unwrap();
        body.write_u8(self.format.header_len() as u8).unwrap();
        body.write_all(&[0x0a; 38]).unwrap();
        body.write_u8(if self.checksum { 1 } else { 0 }).unwrap();
        body
    }

    fn query_body(db: &str, sql: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(7).unwrap();
        body.write_u32::<LittleEndian>(0).unwrap();
        body.write_u8(db.len() as u8).unwrap();
        body.write_u16::<LittleEndian>(0).unwrap();
        // status vars 는 건너뛰기만 하므로 임의 값이면 충분하다
        body.write_u16::<LittleEndian>(3).unwrap();
        body.write_all(&[0x00, 0x00, 0x00]).unwrap();
        body.write_all(db.as_bytes()).unwrap();
        body.write_u8(0).unwrap();
        body.write_all(sql.as_bytes()).unwrap();
        body
    }

    fn gtid_body(sid: [u8; 16], sequence: u64) -> Vec<u8> {
        let mut body = vec![1u8];
        body.write_all(&sid).unwrap();
        body.write_u64::<LittleEndian>(sequence).unwrap();
        body
    }

    fn rotate_body(name: &str, position: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.write_u64::<LittleEndian>(position).unwrap();
        body.write_all(name.as_bytes()).unwrap();
        body
    }

    fn intvar_body(kind: u8, value: u64) -> Vec<u8> {
        let mut body = vec![kind];
        body.write_u64::<LittleEndian>(value).unwrap();
        body
    }

    fn table_map_body(table_id: u64, db: &str, table: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.write_u48::<LittleEndian>(table_id).unwrap();
        body.write_u16::<LittleEndian>(0).unwrap();
        body.write_u8(db.len() as u8).unwrap();
        body.write_all(db.as_bytes()).unwrap();
        body.write_u8(0).unwrap();
        body.write_u8(table.len() as u8).unwrap();
        body.write_all(table.as_bytes()).unwrap();
        body.write_u8(0).unwrap();
        // 컬럼 1개 (LONG), 메타데이터 없음, nullable bitmap
        body.write_all(&[1, 3, 0, 0]).unwrap();
        body
    }

    fn rows_body(table_id: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.write_u48::<LittleEndian>(table_id).unwrap();
        body.write_u16::<LittleEndian>(1).unwrap();
        body.write_all(&[0x02, 0x00, 0x01, 0xff, 0x00, 0x2a, 0x00, 0x00, 0x00])
            .unwrap();
        body
    }

    pub fn raw_format_description(&mut self) -> Vec<u8> {
        let body = self.format_description_body();
        self.raw_event(15, &body)
    }

    pub fn raw_query(&mut self, db: &str, sql: &str) -> Vec<u8> {
        self.raw_event(2, &Self::query_body(db, sql))
    }

    pub fn raw_xid(&mut self, xid: u64) -> Vec<u8> {
        self.raw_event(16, &xid.to_le_bytes())
    }

    pub fn raw_gtid(&mut self, sid: [u8; 16], sequence: u64) -> Vec<u8> {
        self.raw_event(33, &Self::gtid_body(sid, sequence))
    }

    /// GTID 모드가 꺼진 서버가 트랜잭션마다 쓰는 익명 GTID
    pub fn raw_anonymous_gtid(&mut self) -> Vec<u8> {
        self.raw_event(34, &Self::gtid_body([0; 16], 0))
    }

    pub fn raw_rotate(&mut self, name: &str, position: u64) -> Vec<u8> {
        self.raw_event(4, &Self::rotate_body(name, position))
    }

    pub fn raw_intvar(&mut self, kind: u8, value: u64) -> Vec<u8> {
        self.raw_event(5, &Self::intvar_body(kind, value))
    }

    pub fn raw_table_map(&mut self, table_id: u64, db: &str, table: &str) -> Vec<u8> {
        self.raw_event(19, &Self::table_map_body(table_id, db, table))
    }

    pub fn raw_rows(&mut self, type_code: u8, table_id: u64) -> Vec<u8> {
        self.raw_event(type_code, &Self::rows_body(table_id))
    }

    pub fn format_description_event(&mut self) -> BinlogEvent {
        let body = self.format_description_body();
        self.event(15, &body)
    }

    pub fn query_event(&mut self, db: &str, sql: &str) -> BinlogEvent {
        self.event(2, &Self::query_body(db, sql))
    }

    pub fn xid_event(&mut self, xid: u64) -> BinlogEvent {
        self.event(16, &xid.to_le_bytes())
    }

    pub fn gtid_event(&mut self, sid: [u8; 16], sequence: u64) -> BinlogEvent {
        self.event(33, &Self::gtid_body(sid, sequence))
    }

    pub fn rotate_event(&mut self, name: &str, position: u64) -> BinlogEvent {
        self.event(4, &Self::rotate_body(name, position))
    }

    pub fn intvar_event(&mut self, kind: u8, value: u64) -> BinlogEvent {
        self.event(5, &Self::intvar_body(kind, value))
    }

    pub fn table_map_event(&mut self, table_id: u64, db: &str, table: &str) -> BinlogEvent {
        self.event(19, &Self::table_map_body(table_id, db, table))
    }

    pub fn rows_event(&mut self, type_code: u8, table_id: u64) -> BinlogEvent {
        self.event(type_code, &Self::rows_body(table_id))
    }
}

/// 매직 넘버 + 레코드들로 binlog 파일 내용 구성
pub(crate) fn binlog_file(records: &[Vec<u8>]) -> Vec<u8> {
    let mut bytes = BINLOG_MAGIC.to_vec();
    for record in records {
        bytes.extend_from_slice(record);
    }
    bytes
}

/// 테스트가 끝나면 지워지는 임시 binlog 파일
pub(crate) struct TempBinlog {
    path: PathBuf,
}

impl TempBinlog {
    pub fn write(bytes: &[u8]) -> Self {
        let path = std::env::temp_dir().join(format!("binlog-{}.000001", uuid::Uuid::new_v4()));
        std::fs::write(&path, bytes).expect("write temp binlog");
        TempBinlog { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempBinlog {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

//! 이벤트 소스: binlog 파일과 복제 연결을 하나의 인터페이스로 제공
//!
//! 파일 소스는 원본 바이트를 직접 읽어 디코딩하고, 연결 소스는 외부 전송 계층이
//! 이미 디코딩한 이벤트를 채널로 받아 그대로 전달합니다.

use crate::binlog::{event_size, BinlogFormat, BinlogParser, BINLOG_MAGIC, MAX_EVENT_SIZE};
use crate::error::{Result, StreamerError};
use crate::events::{BinlogEvent, EventData};
use crate::offset::BINLOG_START_OFFSET;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 파이프라인이 소비하는 이벤트 소스
#[derive(Debug)]
pub enum EventSource {
    File(FileSource),
    Connection(ConnectionSource),
}

impl EventSource {
    /// 다음 이벤트. `None` 은 정상적인 스트림 끝.
    pub async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        match self {
            EventSource::File(source) => source.next_event().await,
            EventSource::Connection(source) => source.next_event().await,
        }
    }

    /// 위치 기록에 사용할 binlog 파일명 (알 수 있는 경우)
    pub fn binlog_file(&self) -> Option<&str> {
        match self {
            EventSource::File(source) => Some(source.binlog_file()),
            EventSource::Connection(_) => None,
        }
    }

    /// 다음에 읽을 바이트 위치
    pub fn offset(&self) -> Option<u64> {
        match self {
            EventSource::File(source) => Some(source.offset()),
            EventSource::Connection(_) => None,
        }
    }
}

impl From<FileSource> for EventSource {
    fn from(source: FileSource) -> Self {
        EventSource::File(source)
    }
}

impl From<ConnectionSource> for EventSource {
    fn from(source: ConnectionSource) -> Self {
        EventSource::Connection(source)
    }
}

/// buf 를 가득 채우거나 EOF 를 만날 때까지 읽고 읽은 바이트 수를 반환
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// binlog 파일 소스
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    binlog_file: String,
    reader: BufReader<File>,
    parser: BinlogParser,
    offset: u64,
}

impl FileSource {
    /// 파일을 열고 매직 넘버를 검증한다. `start_offset` 이 첫 이벤트 이후라면
    /// 포맷 설명 이벤트만 읽어 체크섬 설정을 얻은 뒤 해당 위치로 이동한다.
    pub async fn open(path: impl AsRef<Path>, format: BinlogFormat, start_offset: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|e| {
            StreamerError::SourceIo(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let binlog_file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut source = FileSource {
            path,
            binlog_file,
            reader: BufReader::new(file),
            parser: BinlogParser::new(format),
            offset: 0,
        };

        let mut magic = [0u8; 4];
        let n = read_full(&mut source.reader, &mut magic).await?;
        BinlogParser::verify_magic(&magic[..n])?;
        source.offset = BINLOG_MAGIC.len() as u64;

        if start_offset > BINLOG_START_OFFSET {
            source.load_format().await?;
            source.reader.seek(SeekFrom::Start(start_offset)).await?;
            source.offset = start_offset;
        }

        info!(
            "Opened binlog file {} at offset {}",
            source.path.display(),
            source.offset
        );
        Ok(source)
    }

    pub fn binlog_file(&self) -> &str {
        &self.binlog_file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 다음에 읽을 바이트 위치
    pub fn offset(&self) -> u64 {
        self.offset
    }

    async fn load_format(&mut self) -> Result<()> {
        let Some((raw, offset)) = self.read_record().await? else {
            return Ok(());
        };
        let event = self.parser.decode(raw, offset)?;
        match event.data {
            EventData::FormatDescription(fde) => {
                debug!(
                    "Loaded format description: server {}, checksum {:?}",
                    fde.server_version, fde.checksum
                );
            }
            _ => warn!(
                "First event of {} is {:?}, not a format description",
                self.binlog_file,
                event.event_type()
            ),
        }
        Ok(())
    }

    /// 레코드 하나(헤더 + 본문)를 읽는다
    async fn read_record(&mut self) -> Result<Option<(Bytes, u64)>> {
        let header_len = self.parser.header_len();
        let start = self.offset;

        let mut record = vec![0u8; header_len];
        let n = read_full(&mut self.reader, &mut record).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < header_len {
            return Err(StreamerError::SourceIo(format!(
                "Truncated event header at offset {}: read {} of {} bytes",
                start, n, header_len
            )));
        }

        let size = event_size(&record)? as usize;
        if size > MAX_EVENT_SIZE {
            return Err(StreamerError::MalformedEvent(format!(
                "Event at offset {} declares size {} above limit {}",
                start, size, MAX_EVENT_SIZE
            )));
        }
        if size < header_len {
            return Err(StreamerError::MalformedEvent(format!(
                "Event at offset {} declares size {} below header length {}",
                start, size, header_len
            )));
        }

        record.resize(size, 0);
        let body_len = size - header_len;
        let n = read_full(&mut self.reader, &mut record[header_len..]).await?;
        if n < body_len {
            return Err(StreamerError::SourceIo(format!(
                "Truncated event at offset {}: read {} of {} body bytes",
                start, n, body_len
            )));
        }

        self.offset += size as u64;
        Ok(Some((Bytes::from(record), start)))
    }

    pub async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        match self.read_record().await? {
            Some((raw, offset)) => Ok(Some(self.parser.decode(raw, offset)?)),
            None => {
                debug!("Reached end of {} at offset {}", self.binlog_file, self.offset);
                Ok(None)
            }
        }
    }
}

/// 외부 전송 계층이 디코딩한 이벤트를 받는 연결 소스
///
/// 채널이 닫히면 스트림 끝으로 본다. 전송 계층은 `Err` 를 보내 실행을 중단시킬 수 있다.
#[derive(Debug)]
pub struct ConnectionSource {
    events: mpsc::Receiver<Result<BinlogEvent>>,
}

impl ConnectionSource {
    pub fn new(events: mpsc::Receiver<Result<BinlogEvent>>) -> Self {
        ConnectionSource { events }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<BinlogEvent>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, ConnectionSource::new(rx))
    }

    pub async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        match self.events.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => {
                debug!("Connection event channel closed");
                Ok(None)
            }
        }
    }
}

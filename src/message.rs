//! 제어 메시지 정의와 바이너리 코덱
//!
//! 헤더(6바이트, big-endian): magic 'UC'(2) | version(1) | type(1) | length(2)
//! type: 1=REQ, 2=META, 3=ERR, 4=EOF, 5=NACK, 6=LIST, 7=LST

use bytes::{Buf, BufMut, BytesMut};

use crate::chunk::{format_hash, parse_hex_sha};
use crate::error::{Error, Result};
use crate::{CTRL_MAGIC, PROTOCOL_VERSION};

/// 제어 헤더 크기 (바이트)
pub const CTRL_HEADER_SIZE: usize = 6;

const TYPE_REQ: u8 = 1;
const TYPE_META: u8 = 2;
const TYPE_ERR: u8 = 3;
const TYPE_EOF: u8 = 4;
const TYPE_NACK: u8 = 5;
const TYPE_LIST: u8 = 6;
const TYPE_LST: u8 = 7;

/// 전송 메타데이터 (META 페이로드)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// 파일 이름 (basename)
    pub filename: String,

    /// 총 세그먼트 수
    pub total: u32,

    /// 파일 크기 (바이트)
    pub size: i64,

    /// 세션의 세그먼트 크기
    pub chunk: u16,

    /// SHA-256 (64자 소문자 hex)
    pub sha256: String,
}

/// 제어 메시지
///
/// 수신측은 타입별 페이로드를 분기 한 번으로 받아 처리한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ctrl {
    /// 파일 요청 (서버 기준 상대 경로)
    Req { path: String },

    /// 전송 메타데이터
    Meta(Meta),

    /// 서버 오류 응답
    Err { message: String },

    /// 초기 블라스트 종료
    Eof,

    /// 누락 세그먼트 재요청
    Nack { missing: Vec<u32> },

    /// 파일 목록 요청
    List,

    /// 파일 목록 응답
    Lst { names: Vec<String> },
}

impl Ctrl {
    fn type_code(&self) -> u8 {
        match self {
            Ctrl::Req { .. } => TYPE_REQ,
            Ctrl::Meta(_) => TYPE_META,
            Ctrl::Err { .. } => TYPE_ERR,
            Ctrl::Eof => TYPE_EOF,
            Ctrl::Nack { .. } => TYPE_NACK,
            Ctrl::List => TYPE_LIST,
            Ctrl::Lst { .. } => TYPE_LST,
        }
    }

    /// 제어 메시지를 와이어 포맷으로 직렬화
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        match self {
            Ctrl::Req { path } => payload.put_slice(path.as_bytes()),
            Ctrl::Meta(m) => {
                payload.put_u32(m.total);
                payload.put_u64(m.size as u64);
                payload.put_u16(m.chunk);
                let name = m.filename.as_bytes();
                payload.put_u16(name.len() as u16);
                payload.put_slice(name);
                payload.put_slice(&parse_hex_sha(&m.sha256));
            }
            Ctrl::Err { message } => {
                payload.put_u16(1); // 오류 코드
                let msg = message.as_bytes();
                payload.put_u16(msg.len() as u16);
                payload.put_slice(msg);
            }
            Ctrl::Eof | Ctrl::List => {}
            Ctrl::Nack { missing } => {
                payload.put_u16(missing.len() as u16);
                for seq in missing {
                    payload.put_u32(*seq);
                }
            }
            Ctrl::Lst { names } => {
                payload.put_u16(names.len() as u16);
                for name in names {
                    let b = name.as_bytes();
                    payload.put_u16(b.len() as u16);
                    payload.put_slice(b);
                }
            }
        }

        let mut buf = Vec::with_capacity(CTRL_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&CTRL_MAGIC);
        buf.push(PROTOCOL_VERSION);
        buf.push(self.type_code());
        buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&payload);
        buf
    }

    /// 와이어 포맷에서 제어 메시지 복원
    ///
    /// 매직/버전/길이가 어긋나면 `FormatInvalid`를 반환한다.
    pub fn decode(b: &[u8]) -> Result<Ctrl> {
        if b.len() < CTRL_HEADER_SIZE || b[..2] != CTRL_MAGIC || b[2] != PROTOCOL_VERSION {
            return Err(Error::FormatInvalid);
        }
        let code = b[3];
        let len = u16::from_be_bytes([b[4], b[5]]) as usize;
        if b.len() < CTRL_HEADER_SIZE + len {
            return Err(Error::FormatInvalid);
        }
        let payload = &b[CTRL_HEADER_SIZE..CTRL_HEADER_SIZE + len];

        match code {
            TYPE_REQ => Ok(Ctrl::Req {
                path: String::from_utf8_lossy(payload).into_owned(),
            }),
            TYPE_META => decode_meta(payload),
            TYPE_ERR => decode_err(payload),
            TYPE_EOF => Ok(Ctrl::Eof),
            TYPE_NACK => decode_nack(payload),
            TYPE_LIST => Ok(Ctrl::List),
            TYPE_LST => decode_lst(payload),
            _ => Err(Error::FormatInvalid),
        }
    }
}

fn decode_meta(mut p: &[u8]) -> Result<Ctrl> {
    if p.remaining() < 4 + 8 + 2 + 2 + 32 {
        return Err(Error::FormatInvalid);
    }
    let total = p.get_u32();
    let size = p.get_u64() as i64;
    let chunk = p.get_u16();
    let name_len = p.get_u16() as usize;
    if p.remaining() < name_len + 32 {
        return Err(Error::FormatInvalid);
    }
    let filename = String::from_utf8_lossy(&p[..name_len]).into_owned();
    p.advance(name_len);
    let sha256 = format_hash(&p[..32]);
    Ok(Ctrl::Meta(Meta {
        filename,
        total,
        size,
        chunk,
        sha256,
    }))
}

fn decode_err(mut p: &[u8]) -> Result<Ctrl> {
    if p.remaining() < 4 {
        return Err(Error::FormatInvalid);
    }
    let _code = p.get_u16();
    let msg_len = p.get_u16() as usize;
    if p.remaining() < msg_len {
        return Err(Error::FormatInvalid);
    }
    Ok(Ctrl::Err {
        message: String::from_utf8_lossy(&p[..msg_len]).into_owned(),
    })
}

fn decode_nack(mut p: &[u8]) -> Result<Ctrl> {
    if p.remaining() < 2 {
        return Err(Error::FormatInvalid);
    }
    let count = p.get_u16() as usize;
    if p.remaining() < count * 4 {
        return Err(Error::FormatInvalid);
    }
    let missing = (0..count).map(|_| p.get_u32()).collect();
    Ok(Ctrl::Nack { missing })
}

fn decode_lst(mut p: &[u8]) -> Result<Ctrl> {
    if p.remaining() < 2 {
        return Err(Error::FormatInvalid);
    }
    let count = p.get_u16() as usize;
    let mut names = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        if p.remaining() < 2 {
            return Err(Error::FormatInvalid);
        }
        let len = p.get_u16() as usize;
        if p.remaining() < len {
            return Err(Error::FormatInvalid);
        }
        names.push(String::from_utf8_lossy(&p[..len]).into_owned());
        p.advance(len);
    }
    Ok(Ctrl::Lst { names })
}

/// 제어 프레임 여부 판별 ('UC' 프리픽스)
pub fn is_ctrl(b: &[u8]) -> bool {
    b.len() >= 2 && b[..2] == CTRL_MAGIC
}

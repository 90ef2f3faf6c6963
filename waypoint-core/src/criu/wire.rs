// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Checkpoint service RPC frames.
//!
//! The service speaks protobuf binary encoding. Only the handful of fields a
//! self-dump needs are modelled; unknown fields are skipped on decode. Every
//! frame must fit in one `MAX_MSG_SIZE` packet.

use crate::error::TransportError;
use crate::types::CriuLogLevel;

/// Largest frame the channel carries in a single operation.
pub const MAX_MSG_SIZE: usize = 1024;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

// criu_req
const REQ_TYPE: u32 = 1;
const REQ_OPTS: u32 = 2;
// criu_opts
const OPTS_IMAGES_DIR_FD: u32 = 1;
const OPTS_LEAVE_RUNNING: u32 = 3;
const OPTS_LOG_LEVEL: u32 = 9;
// criu_resp
const RESP_TYPE: u32 = 1;
const RESP_SUCCESS: u32 = 2;
const RESP_DUMP: u32 = 3;
const RESP_CR_ERRNO: u32 = 7;
const RESP_CR_ERRMSG: u32 = 9;
// criu_dump_resp
const DUMP_RESTORED: u32 = 1;

/// Request type understood by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Dump,
}

impl RequestKind {
    pub const fn as_wire(self) -> u32 {
        match self {
            Self::Dump => 1,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Dump),
            _ => None,
        }
    }
}

/// One checkpoint request. Built fresh per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub kind: RequestKind,
    pub images_dir_fd: i32,
    pub log_level: CriuLogLevel,
    pub leave_running: bool,
}

impl SnapshotRequest {
    pub fn dump(images_dir_fd: i32, log_level: CriuLogLevel, leave_running: bool) -> Self {
        Self {
            kind: RequestKind::Dump,
            images_dir_fd,
            log_level,
            leave_running,
        }
    }

    /// Serialize into a single frame.
    ///
    /// # Errors
    /// `FrameTooLarge` if the frame would not fit the channel.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let mut opts = Vec::with_capacity(16);
        put_int32(&mut opts, OPTS_IMAGES_DIR_FD, self.images_dir_fd);
        put_bool(&mut opts, OPTS_LEAVE_RUNNING, self.leave_running);
        put_int32(&mut opts, OPTS_LOG_LEVEL, i32::from(self.log_level.value()));

        let mut frame = Vec::with_capacity(opts.len() + 8);
        put_uint(&mut frame, REQ_TYPE, u64::from(self.kind.as_wire()));
        put_bytes(&mut frame, REQ_OPTS, &opts);

        check_size(frame)
    }

    /// Parse a request frame. Used by service-side tooling and tests.
    pub fn decode(frame: &[u8]) -> Result<Self, TransportError> {
        check_len(frame.len())?;

        let mut kind = None;
        let mut opts = None;
        let mut reader = Reader::new(frame);
        while let Some((field, wire)) = reader.key()? {
            match (field, wire) {
                (REQ_TYPE, WIRE_VARINT) => kind = Some(reader.varint()? as u32),
                (REQ_OPTS, WIRE_LEN) => opts = Some(reader.bytes()?),
                _ => reader.skip(wire)?,
            }
        }

        let kind = kind.ok_or_else(|| missing("criu_req.type"))?;
        let kind = RequestKind::from_wire(kind).ok_or_else(|| TransportError::Decode {
            reason: format!("unknown request type {}", kind),
        })?;
        let opts = opts.ok_or_else(|| missing("criu_req.opts"))?;

        let mut images_dir_fd = -1;
        let mut leave_running = false;
        let mut log_level = CriuLogLevel::default();
        let mut reader = Reader::new(opts);
        while let Some((field, wire)) = reader.key()? {
            match (field, wire) {
                (OPTS_IMAGES_DIR_FD, WIRE_VARINT) => images_dir_fd = reader.varint()? as i32,
                (OPTS_LEAVE_RUNNING, WIRE_VARINT) => leave_running = reader.varint()? != 0,
                (OPTS_LOG_LEVEL, WIRE_VARINT) => {
                    let raw = reader.varint()?;
                    log_level = u8::try_from(raw)
                        .ok()
                        .and_then(|level| CriuLogLevel::new(level).ok())
                        .ok_or_else(|| TransportError::Decode {
                            reason: format!("log level {} out of range", raw),
                        })?;
                }
                _ => reader.skip(wire)?,
            }
        }

        Ok(Self {
            kind,
            images_dir_fd,
            log_level,
            leave_running,
        })
    }
}

/// Dump-specific part of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpResponse {
    pub restored: Option<bool>,
}

/// One response frame as sent by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotResponse {
    pub kind: u32,
    pub success: bool,
    pub dump: Option<DumpResponse>,
    pub cr_errno: Option<i32>,
    pub cr_errmsg: Option<String>,
}

impl SnapshotResponse {
    /// Serialize a response. The service side of the protocol; tests use it
    /// to stand in for a real checkpoint service.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let mut frame = Vec::with_capacity(32);
        put_uint(&mut frame, RESP_TYPE, u64::from(self.kind));
        put_bool(&mut frame, RESP_SUCCESS, self.success);
        if let Some(dump) = self.dump {
            let mut body = Vec::with_capacity(2);
            if let Some(restored) = dump.restored {
                put_bool(&mut body, DUMP_RESTORED, restored);
            }
            put_bytes(&mut frame, RESP_DUMP, &body);
        }
        if let Some(errno) = self.cr_errno {
            put_int32(&mut frame, RESP_CR_ERRNO, errno);
        }
        if let Some(message) = &self.cr_errmsg {
            put_bytes(&mut frame, RESP_CR_ERRMSG, message.as_bytes());
        }

        check_size(frame)
    }

    /// Parse a response frame. Oversize frames are rejected before parsing.
    pub fn decode(frame: &[u8]) -> Result<Self, TransportError> {
        check_len(frame.len())?;

        let mut kind = None;
        let mut success = None;
        let mut dump = None;
        let mut cr_errno = None;
        let mut cr_errmsg = None;

        let mut reader = Reader::new(frame);
        while let Some((field, wire)) = reader.key()? {
            match (field, wire) {
                (RESP_TYPE, WIRE_VARINT) => kind = Some(reader.varint()? as u32),
                (RESP_SUCCESS, WIRE_VARINT) => success = Some(reader.varint()? != 0),
                (RESP_DUMP, WIRE_LEN) => dump = Some(decode_dump(reader.bytes()?)?),
                (RESP_CR_ERRNO, WIRE_VARINT) => cr_errno = Some(reader.varint()? as i32),
                (RESP_CR_ERRMSG, WIRE_LEN) => {
                    let raw = reader.bytes()?;
                    cr_errmsg = Some(String::from_utf8_lossy(raw).into_owned());
                }
                _ => reader.skip(wire)?,
            }
        }

        Ok(Self {
            kind: kind.ok_or_else(|| missing("criu_resp.type"))?,
            success: success.ok_or_else(|| missing("criu_resp.success"))?,
            dump,
            cr_errno,
            cr_errmsg,
        })
    }
}

fn decode_dump(body: &[u8]) -> Result<DumpResponse, TransportError> {
    let mut dump = DumpResponse::default();
    let mut reader = Reader::new(body);
    while let Some((field, wire)) = reader.key()? {
        match (field, wire) {
            (DUMP_RESTORED, WIRE_VARINT) => dump.restored = Some(reader.varint()? != 0),
            _ => reader.skip(wire)?,
        }
    }
    Ok(dump)
}

/// Outcome classes of a checkpoint request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    Error,
    DumpedAndExited,
    Restored,
}

/// Interpreted result of one request. Consumed once by the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotResult {
    pub status: SnapshotStatus,
    pub restored_flag: Option<bool>,
    pub service_code: Option<i32>,
    pub message: Option<String>,
}

impl SnapshotResult {
    /// Interpret an RPC response to a request of kind `expected`.
    pub fn from_response(
        response: SnapshotResponse,
        expected: RequestKind,
    ) -> Result<Self, TransportError> {
        if response.kind != expected.as_wire() {
            return Err(TransportError::UnexpectedResponse {
                expected: expected.as_wire(),
                actual: response.kind,
            });
        }

        let restored_flag = response.dump.and_then(|d| d.restored);
        let status = if !response.success {
            SnapshotStatus::Error
        } else if restored_flag == Some(true) {
            SnapshotStatus::Restored
        } else {
            SnapshotStatus::DumpedAndExited
        };

        Ok(Self {
            status,
            restored_flag,
            service_code: response.cr_errno,
            message: response.cr_errmsg,
        })
    }

    /// Interpret the integer returned by a direct library dump.
    pub fn from_dump_code(code: i32) -> Result<Self, TransportError> {
        let (status, restored_flag) = match code {
            c if c < 0 => (SnapshotStatus::Error, None),
            0 => (SnapshotStatus::DumpedAndExited, Some(false)),
            1 => (SnapshotStatus::Restored, Some(true)),
            other => return Err(TransportError::UnexpectedDumpCode { code: other }),
        };

        Ok(Self {
            status,
            restored_flag,
            service_code: (code < 0).then_some(code),
            message: None,
        })
    }
}

fn missing(field: &str) -> TransportError {
    TransportError::Decode {
        reason: format!("missing required field {}", field),
    }
}

fn check_len(len: usize) -> Result<(), TransportError> {
    if len > MAX_MSG_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_MSG_SIZE,
        });
    }
    Ok(())
}

fn check_size(frame: Vec<u8>) -> Result<Vec<u8>, TransportError> {
    check_len(frame.len())?;
    Ok(frame)
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn put_key(buf: &mut Vec<u8>, field: u32, wire: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire));
}

fn put_uint(buf: &mut Vec<u8>, field: u32, value: u64) {
    put_key(buf, field, WIRE_VARINT);
    put_varint(buf, value);
}

// Negative int32 values are sign-extended to ten bytes.
fn put_int32(buf: &mut Vec<u8>, field: u32, value: i32) {
    put_uint(buf, field, i64::from(value) as u64);
}

fn put_bool(buf: &mut Vec<u8>, field: u32, value: bool) {
    put_uint(buf, field, u64::from(value));
}

fn put_bytes(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    put_key(buf, field, WIRE_LEN);
    put_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Cursor over a protobuf-encoded message.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn varint(&mut self) -> Result<u64, TransportError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self.data.get(self.pos).ok_or_else(|| TransportError::Decode {
                reason: "truncated varint".to_string(),
            })?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(TransportError::Decode {
            reason: "varint longer than 10 bytes".to_string(),
        })
    }

    /// Next field key, or `None` at the end of the message.
    fn key(&mut self) -> Result<Option<(u32, u8)>, TransportError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let key = self.varint()?;
        let field = u32::try_from(key >> 3).map_err(|_| TransportError::Decode {
            reason: format!("field number {} out of range", key >> 3),
        })?;
        Ok(Some((field, (key & 0x7) as u8)))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], TransportError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| TransportError::Decode {
                reason: format!(
                    "field of {} bytes overruns message at offset {}",
                    len, self.pos
                ),
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn bytes(&mut self) -> Result<&'a [u8], TransportError> {
        let len = self.varint()?;
        let len = usize::try_from(len).map_err(|_| TransportError::Decode {
            reason: format!("length {} out of range", len),
        })?;
        self.take(len)
    }

    fn skip(&mut self, wire: u8) -> Result<(), TransportError> {
        match wire {
            WIRE_VARINT => self.varint().map(drop),
            WIRE_FIXED64 => self.take(8).map(drop),
            WIRE_LEN => self.bytes().map(drop),
            WIRE_FIXED32 => self.take(4).map(drop),
            other => Err(TransportError::Decode {
                reason: format!("unsupported wire type {}", other),
            }),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Driver handshake over the reserved channels.
//!
//! All messages are 4-byte little-endian words. The process announces its
//! options on the status channel; with shared input the driver echoes them
//! back on the control channel. Each execution then starts with a "go" word
//! from the driver and is answered with the pid and, later, the exit status.

use std::io::{ErrorKind, Read, Write};

use crate::config::RuntimeConfig;
use crate::error::HandshakeError;

/// The process speaks the option-word protocol.
pub const FS_OPT_ENABLED: u32 = 0x8000_0001;
/// Test cases are delivered through the shared input buffer.
pub const FS_OPT_SHDMEM_FUZZ: u32 = 0x0100_0000;

/// How the driver delivers test cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    SharedMemory { id: i32 },
    File,
}

impl InputMode {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        match config.shm_fuzz_id {
            Some(id) => Self::SharedMemory { id },
            None => Self::File,
        }
    }

    /// Word sent when announcing.
    pub fn option_word(&self) -> u32 {
        match self {
            Self::SharedMemory { .. } => FS_OPT_ENABLED | FS_OPT_SHDMEM_FUZZ,
            Self::File => FS_OPT_ENABLED,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::SharedMemory { .. })
    }
}

/// Protocol state over a control reader and a status writer.
pub struct Handshake<R, W> {
    control: R,
    status: W,
    mode: InputMode,
}

impl<R: Read, W: Write> Handshake<R, W> {
    pub fn new(control: R, status: W, mode: InputMode) -> Self {
        Self {
            control,
            status,
            mode,
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Send the option word and, for shared input, check the driver's echo.
    pub fn announce(&mut self) -> Result<(), HandshakeError> {
        let word = self.mode.option_word();
        self.write_word(word)?;

        if self.mode.is_shared() {
            let echo = self.read_word()?;
            if echo != word {
                return Err(HandshakeError::Protocol {
                    reason: format!("driver echoed {:#010x}, expected {:#010x}", echo, word),
                });
            }
        }

        tracing::info!(mode = ?self.mode, options = %format!("{:#010x}", word), "Handshake announced");
        Ok(())
    }

    /// Block until the driver requests the next execution.
    pub fn await_run(&mut self) -> Result<u32, HandshakeError> {
        self.read_word()
    }

    pub fn report_pid(&mut self, pid: i32) -> Result<(), HandshakeError> {
        self.write_word(pid as u32)
    }

    pub fn report_status(&mut self, status: i32) -> Result<(), HandshakeError> {
        self.write_word(status as u32)
    }

    fn read_word(&mut self) -> Result<u32, HandshakeError> {
        let mut word = [0u8; 4];
        self.control.read_exact(&mut word).map_err(|e| {
            let reason = if e.kind() == ErrorKind::UnexpectedEof {
                "short read on control channel".to_string()
            } else {
                format!("control channel: {}", e)
            };
            HandshakeError::Protocol { reason }
        })?;
        Ok(u32::from_le_bytes(word))
    }

    fn write_word(&mut self, word: u32) -> Result<(), HandshakeError> {
        self.status
            .write_all(&word.to_le_bytes())
            .map_err(|e| HandshakeError::Protocol {
                reason: format!("status channel: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn shared() -> InputMode {
        InputMode::SharedMemory { id: 7 }
    }

    #[test]
    fn test_option_words() {
        assert_eq!(shared().option_word(), 0x8100_0001);
        assert_eq!(InputMode::File.option_word(), 0x8000_0001);
    }

    #[test]
    fn test_mode_from_config() {
        let config = RuntimeConfig {
            shm_fuzz_id: Some(7),
            ..Default::default()
        };
        assert_eq!(InputMode::from_config(&config), shared());
        assert_eq!(InputMode::from_config(&RuntimeConfig::default()), InputMode::File);
    }

    #[test]
    fn test_shared_announce_with_echo() {
        let echo = 0x8100_0001u32.to_le_bytes();
        let mut status = Vec::new();
        let mut handshake = Handshake::new(Cursor::new(echo.to_vec()), &mut status, shared());

        handshake.announce().unwrap();
        assert_eq!(status, echo);
    }

    #[test]
    fn test_wrong_echo_rejected() {
        let mut handshake = Handshake::new(
            Cursor::new(0xdead_beefu32.to_le_bytes().to_vec()),
            Vec::new(),
            shared(),
        );
        assert!(matches!(
            handshake.announce(),
            Err(HandshakeError::Protocol { .. })
        ));
    }

    #[test]
    fn test_short_read_is_protocol_error() {
        let mut handshake = Handshake::new(Cursor::new(vec![1, 2]), Vec::new(), InputMode::File);
        let err = handshake.await_run().unwrap_err();
        assert!(err.to_string().contains("short read"));
    }

    #[test]
    fn test_execution_cycle() {
        let mut status = Vec::new();
        let mut handshake = Handshake::new(
            Cursor::new(0u32.to_le_bytes().to_vec()),
            &mut status,
            InputMode::File,
        );

        handshake.announce().unwrap();
        assert_eq!(handshake.await_run().unwrap(), 0);
        handshake.report_pid(4321).unwrap();
        handshake.report_status(42).unwrap();

        let words: Vec<u32> = status
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(words, vec![FS_OPT_ENABLED, 4321, 42]);
    }
}

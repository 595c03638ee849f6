//! Typed error taxonomy shared by the parser, slot growth, and dispatcher.
//!
//! Grammar violations are never represented here; they live in
//! `Parser::err_status`, per the invariant that the dispatcher handles them
//! by writing an HTTP error response rather than propagating a `Result::Err`.

use std::io;

use crate::buf::BufError;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("buffer overflow while parsing")]
    Overflow,
    #[error("allocation failure while parsing")]
    Alloc,
}

impl From<BufError> for ParseError {
    fn from(e: BufError) -> ParseError {
        match e {
            BufError::Overflow => ParseError::Overflow,
            BufError::Alloc => ParseError::Alloc,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("invalid response operation: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("port must be >= 1024")]
    InvalidPort,
    #[error("I/O error during startup: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error("dispatcher was not running")]
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("startup failed: {0}")]
    Init(#[from] InitError),
    #[error("allocation failure in dispatch loop")]
    Alloc,
    #[error("size computation overflowed in dispatch loop")]
    Overflow,
    #[error("I/O error in dispatch loop: {0}")]
    Io(#[from] io::Error),
}

impl From<ParseError> for DispatchError {
    fn from(e: ParseError) -> DispatchError {
        match e {
            ParseError::Overflow => DispatchError::Overflow,
            ParseError::Alloc => DispatchError::Alloc,
        }
    }
}

impl From<BufError> for DispatchError {
    fn from(e: BufError) -> DispatchError {
        match e {
            BufError::Overflow => DispatchError::Overflow,
            BufError::Alloc => DispatchError::Alloc,
        }
    }
}

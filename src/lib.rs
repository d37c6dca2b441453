#![deny(
    missing_docs,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_imports,
    unused_import_braces,
    unused_qualifications
)]

//! Protocol core for a vehicle scan tool that speaks OBD-II (SAE J1979), UDS
//! (ISO 14229) and legacy K-Line (ISO 9141-2, KWP2000) through a hobby-grade
//! ELM327 adapter over USB-serial or BLE.
//!
//! ## Scope
//!
//! This crate converts high-level diagnostic intents ("read stored trouble
//! codes", "read PID 0x0C", "read DID 0xF190", "discover all responding
//! ECUs") into ELM327 AT-command sequences, parses the noisy multi-frame
//! replies back into structured data, and maintains adapter state (protocol,
//! headers, timing) across calls.
//!
//! Reprogramming/flashing (UDS services 0x34/0x36/0x37), security-access key
//! computation, vendor-specific seed/key algorithms and bench-test ECU
//! simulation are explicitly out of scope.
//!
//! ## Modules
//!
//! * [transport] - byte-level I/O over serial or BLE.
//! * [line_parser] - adapter noise stripping, hex tokenization, ECU grouping.
//! * [isotp] - multi-frame payload merging and PCI stripping.
//! * [elm] - ELM327 connection lifecycle and protocol negotiation.
//! * [obd2] - OBD-II (SAE J1979) service layer.
//! * [uds] - UDS (ISO 14229) service layer, transport and discovery.
//! * [kline] - legacy K-Line profile/quirk/policy system.
//! * [dtc] - diagnostic trouble code decoding and description lookup.
//! * [session] - unified facade over the OBD-II and K-Line drivers.

use std::fmt;

pub mod config;
pub mod dtc;
pub mod elm;
pub mod isotp;
pub mod kline;
pub mod line_parser;
pub mod obd2;
pub mod session;
pub mod transport;
pub mod uds;
pub mod vin_cache;

use transport::TransportError;
use uds::UdsError;

/// Diagnostic server result
pub type DiagServerResult<T> = Result<T, DiagError>;

/// Diagnostic server error taxonomy.
///
/// Kinds mirror the propagation policy: [DiagError::DeviceDisconnected] is
/// never retried and marks the session disconnected; [DiagError::CommunicationError]
/// may be retried once by the OBD-II wrapper; [DiagError::ConnectionLost] is
/// the facade-level translation of a disconnect observed mid-operation.
#[derive(Debug)]
pub enum DiagError {
    /// The underlying transport handle was closed, or the OS reported the
    /// device as no longer configured.
    DeviceDisconnected(String),
    /// A generic I/O or timeout error at the transport layer.
    CommunicationError(String),
    /// The facade observed a disconnect while a logical operation was in flight.
    ConnectionLost(String),
    /// An operation was attempted before the session was connected.
    NotConnected,
    /// Generic protocol failure: malformed response, unexpected prefix, etc.
    ScannerError(String),
    /// UDS negative response (`0x7F <svc> <nrc>`).
    NegativeResponse {
        /// Service ID that was rejected
        svc: u8,
        /// Negative response code
        nrc: UdsError,
    },
    /// UDS response error: empty response or unexpected SID.
    ResponseError(String),
    /// UDS transport (AT command) configuration failed.
    TransportError(String),
    /// K-Line profile definition was invalid.
    KLineProfileError(kline::KLineContext),
    /// K-Line profile `apply` sequence failed.
    KLineApplyError(kline::KLineContext),
    /// K-Line profile `verify` sequence failed.
    KLineVerifyError(kline::KLineContext),
    /// K-Line candidate detection exhausted all profiles without success.
    KLineDetectError(kline::KLineContext),
    /// A parameter given to the function is invalid; see the function's
    /// documentation for requirements.
    ParameterInvalid,
    /// Underlying communication channel error
    ChannelError(TransportError),
}

impl fmt::Display for DiagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagError::DeviceDisconnected(s) => write!(f, "device disconnected: {s}"),
            DiagError::CommunicationError(s) => write!(f, "communication error: {s}"),
            DiagError::ConnectionLost(s) => write!(f, "connection lost: {s}"),
            DiagError::NotConnected => write!(f, "operation attempted before connect"),
            DiagError::ScannerError(s) => write!(f, "scanner error: {s}"),
            DiagError::NegativeResponse { svc, nrc } => {
                write!(f, "negative response for service 0x{svc:02X}: {nrc}")
            }
            DiagError::ResponseError(s) => write!(f, "response error: {s}"),
            DiagError::TransportError(s) => write!(f, "UDS transport error: {s}"),
            DiagError::KLineProfileError(ctx) => write!(f, "K-Line profile error: {ctx}"),
            DiagError::KLineApplyError(ctx) => write!(f, "K-Line apply error: {ctx}"),
            DiagError::KLineVerifyError(ctx) => write!(f, "K-Line verify error: {ctx}"),
            DiagError::KLineDetectError(ctx) => write!(f, "K-Line detect error: {ctx}"),
            DiagError::ParameterInvalid => write!(f, "a parameter provided was invalid"),
            DiagError::ChannelError(e) => write!(f, "underlying channel error: {e}"),
        }
    }
}

impl std::error::Error for DiagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiagError::ChannelError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for DiagError {
    fn from(e: TransportError) -> Self {
        match &e {
            TransportError::Disconnected(s) => DiagError::DeviceDisconnected(s.clone()),
            _ => DiagError::ChannelError(e),
        }
    }
}

/// Converts a single byte into a BCD string
pub fn bcd_decode(input: u8) -> String {
    format!("{}{}", (input & 0xF0) >> 4, input & 0x0F)
}

/// Converts a slice to a BCD string
pub fn bcd_decode_slice(input: &[u8], sep: Option<&str>) -> String {
    let mut res = String::new();
    for (pos, x) in input.iter().enumerate() {
        res.push_str(bcd_decode(*x).as_str());
        if let Some(separator) = sep {
            if pos != input.len() - 1 {
                res.push_str(separator)
            }
        }
    }
    res
}

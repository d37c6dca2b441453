//! UDS (ISO 14229) service layer: request/response framing, the NRC
//! taxonomy, and the service operations named in spec.md §4.6.
//!
//! Reprogramming (0x34/0x36/0x37) and vendor seed/key algorithms are out
//! of scope; [UdsSid] still names the reprogramming SIDs for completeness
//! of the service-ID space, but no operation sends them.

pub mod catalog;
pub mod dids;
pub mod discovery;
pub mod transport;

pub use catalog::{
    load_brand_dids, load_module_catalog, load_routine_map, lookup_did_overlaid, lookup_routine_name, BrandDid,
    RoutineDescriptor, UdsCatalogError,
};
pub use dids::{decode_did_value, lookup_did, DidDecoder, DidDescriptor};
pub use discovery::{discover, BrandSignature, DiscoveredModule, DiscoveryOptions, DiscoveryResult, ModuleType};
pub use transport::UdsTransport;

use crate::{DiagError, DiagServerResult};

/// UDS service identifiers named by spec.md §2/§6. Reprogramming SIDs
/// (`RequestDownload`/`TransferData`/`RequestTransferExit`) are listed but
/// have no operation implemented against them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum UdsSid {
    /// Diagnostic Session Control.
    DiagnosticSessionControl = 0x10,
    /// ECU Reset.
    EcuReset = 0x11,
    /// Read DTC Information.
    ReadDtcInformation = 0x19,
    /// Read Data By Identifier.
    ReadDataByIdentifier = 0x22,
    /// Security Access.
    SecurityAccess = 0x27,
    /// Communication Control.
    CommunicationControl = 0x28,
    /// Write Data By Identifier.
    WriteDataByIdentifier = 0x2E,
    /// Input/Output Control By Identifier.
    InputOutputControlByIdentifier = 0x2F,
    /// Routine Control.
    RoutineControl = 0x31,
    /// Request Download (out of scope; named for completeness).
    RequestDownload = 0x34,
    /// Transfer Data (out of scope; named for completeness).
    TransferData = 0x36,
    /// Request Transfer Exit (out of scope; named for completeness).
    RequestTransferExit = 0x37,
    /// Tester Present.
    TesterPresent = 0x3E,
}

impl UdsSid {
    /// This service's positive-response SID (`self + 0x40`).
    pub fn positive_response_sid(self) -> u8 {
        self as u8 + 0x40
    }
}

/// UDS negative response codes (ISO 14229-1 Table A.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum UdsError {
    /// ECU rejected the request (no specific error).
    GeneralReject,
    /// Service is not supported by the ECU.
    ServiceNotSupported,
    /// Sub-function is not supported by the ECU.
    SubFunctionNotSupported,
    /// Request message was an invalid length, or the format was incorrect.
    IncorrectMessageLengthOrInvalidFormat,
    /// The response message is too long for the transport protocol.
    ResponseTooLong,
    /// The ECU is too busy; the request should be retried.
    BusyRepeatRequest,
    /// The requested action's prerequisite conditions are not met.
    ConditionsNotCorrect,
    /// The request was sent in the wrong order for the ECU's current state.
    RequestSequenceError,
    /// The ECU timed out communicating with another in-vehicle component.
    NoResponseFromSubnetComponent,
    /// A DTC or component failure is blocking the requested action.
    FailurePreventsExecutionOfRequestedAction,
    /// The request message contains data outside of a valid range.
    RequestOutOfRange,
    /// The request was denied due to security access being denied.
    SecurityAccessDenied,
    /// The key sent during security access was invalid.
    InvalidKey,
    /// Too many incorrect security-access key attempts.
    ExceedNumberOfAttempts,
    /// Seed/key requests were sent too quickly; the ECU's timeout hasn't expired.
    RequiredTimeDelayNotExpired,
    /// The ECU cannot accept the upload/download request (fault condition).
    UploadDownloadNotAccepted,
    /// The ECU halted an in-progress data transfer (fault condition).
    TransferDataSuspended,
    /// The ECU hit a general error during reprogramming.
    GeneralProgrammingFailure,
    /// Reprogramming block-sequence-counter mismatch.
    WrongBlockSequenceCounter,
    /// Correctly received; response pending (the caller should wait and resend).
    RequestCorrectlyReceivedResponsePending,
    /// The sub-function is not supported in the ECU's current session.
    SubFunctionNotSupportedInActiveSession,
    /// The service is not supported in the ECU's current session.
    ServiceNotSupportedInActiveSession,
    /// Engine RPM is too high.
    RpmTooHigh,
    /// Engine RPM is too low.
    RpmTooLow,
    /// Engine is running.
    EngineIsRunning,
    /// Engine is not running.
    EngineIsNotRunning,
    /// Engine has not been running long enough.
    EngineRunTimeTooLow,
    /// Coolant temperature is too high.
    TemperatureTooHigh,
    /// Coolant temperature is too low.
    TemperatureTooLow,
    /// Vehicle speed is too high.
    VehicleSpeedTooHigh,
    /// Vehicle speed is too low.
    VehicleSpeedTooLow,
    /// Throttle/pedal value is too high.
    ThrottleTooHigh,
    /// Throttle/pedal value is too low.
    ThrottleTooLow,
    /// Transmission is not in neutral.
    TransmissionRangeNotInNeutral,
    /// Transmission is not in gear.
    TransmissionRangeNotInGear,
    /// Brake switch is not closed.
    BrakeSwitchNotClosed,
    /// Shifter lever is not in park.
    ShifterLeverNotInPark,
    /// Automatic/CVT torque converter clutch is locked.
    TorqueConverterClutchLocked,
    /// Voltage is too high.
    VoltageTooHigh,
    /// Voltage is too low.
    VoltageTooLow,
    /// `0x94-0xFE` reserved for future condition-not-correct definitions.
    ReservedForSpecificConditionsNotCorrect,
    /// `0x38-0x4F` reserved for ISO-15765 data-link security documentation.
    ReservedByExtendedDataLinkSecurityDocumentation,
    /// Any other reserved code, carrying the raw byte.
    IsoSaeReserved(u8),
}

impl From<u8> for UdsError {
    fn from(p: u8) -> Self {
        match p {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupported,
            0x13 => Self::IncorrectMessageLengthOrInvalidFormat,
            0x14 => Self::ResponseTooLong,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrect,
            0x24 => Self::RequestSequenceError,
            0x25 => Self::NoResponseFromSubnetComponent,
            0x26 => Self::FailurePreventsExecutionOfRequestedAction,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x35 => Self::InvalidKey,
            0x36 => Self::ExceedNumberOfAttempts,
            0x37 => Self::RequiredTimeDelayNotExpired,
            0x70 => Self::UploadDownloadNotAccepted,
            0x71 => Self::TransferDataSuspended,
            0x72 => Self::GeneralProgrammingFailure,
            0x73 => Self::WrongBlockSequenceCounter,
            0x78 => Self::RequestCorrectlyReceivedResponsePending,
            0x7E => Self::SubFunctionNotSupportedInActiveSession,
            0x7F => Self::ServiceNotSupportedInActiveSession,
            0x81 => Self::RpmTooHigh,
            0x82 => Self::RpmTooLow,
            0x83 => Self::EngineIsRunning,
            0x84 => Self::EngineIsNotRunning,
            0x85 => Self::EngineRunTimeTooLow,
            0x86 => Self::TemperatureTooHigh,
            0x87 => Self::TemperatureTooLow,
            0x88 => Self::VehicleSpeedTooHigh,
            0x89 => Self::VehicleSpeedTooLow,
            0x8A => Self::ThrottleTooHigh,
            0x8B => Self::ThrottleTooLow,
            0x8C => Self::TransmissionRangeNotInNeutral,
            0x8D => Self::TransmissionRangeNotInGear,
            0x8F => Self::BrakeSwitchNotClosed,
            0x90 => Self::ShifterLeverNotInPark,
            0x91 => Self::TorqueConverterClutchLocked,
            0x92 => Self::VoltageTooHigh,
            0x93 => Self::VoltageTooLow,
            0x94..=0xFE => Self::ReservedForSpecificConditionsNotCorrect,
            0x38..=0x4F => Self::ReservedByExtendedDataLinkSecurityDocumentation,
            x => Self::IsoSaeReserved(x),
        }
    }
}

impl std::fmt::Display for UdsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Validates a raw UDS response against the failure semantics of spec.md
/// §4.6 and, on success, strips the positive-response SID byte, returning
/// the bytes that follow it.
///
/// - Empty response -> `ResponseError("Empty")`.
/// - First byte `0x7F` with length >= 3 -> `NegativeResponse { svc, nrc }`
///   (`svc` is the *requested* SID, i.e. `response[1]`).
/// - First byte not `sid.positive_response_sid()` and not `0x7F` ->
///   `ResponseError("Unexpected SID")`.
pub fn parse_response(sid: UdsSid, response: &[u8]) -> DiagServerResult<Vec<u8>> {
    let Some(&first) = response.first() else {
        return Err(DiagError::ResponseError("Empty".to_string()));
    };
    if first == 0x7F {
        if response.len() < 3 {
            return Err(DiagError::ResponseError("Empty".to_string()));
        }
        return Err(DiagError::NegativeResponse {
            svc: response[1],
            nrc: UdsError::from(response[2]),
        });
    }
    if first != sid.positive_response_sid() {
        return Err(DiagError::ResponseError("Unexpected SID".to_string()));
    }
    Ok(response[1..].to_vec())
}

/// Builds a request frame: `[sid, ...data]`.
pub fn build_request(sid: UdsSid, data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() + 1);
    bytes.push(sid as u8);
    bytes.extend_from_slice(data);
    bytes
}

/// One decoded Read Data By Identifier record (spec.md §8 scenario 5).
#[derive(Debug, Clone)]
pub struct DidRecord {
    /// 4-hex-character DID, e.g. `"F190"`.
    pub did: String,
    /// The DID table's human-readable name, or `"Unknown"`.
    pub name: String,
    /// Decoded value per the DID's configured decoder.
    pub value: String,
    /// Raw data bytes as uppercase hex, no separators.
    pub raw: String,
}

/// Read Data By Identifier (SID 0x22): requests `22 <did_hi> <did_lo>` and
/// decodes the response per the DID table.
pub fn read_data_by_identifier(
    elm: &mut crate::elm::ElmDriver,
    transport: &UdsTransport,
    did: u16,
) -> DiagServerResult<DidRecord> {
    let response = transport.send(elm, UdsSid::ReadDataByIdentifier, &[(did >> 8) as u8, did as u8])?;
    if response.len() < 2 {
        return Err(DiagError::ResponseError("Empty".to_string()));
    }
    let data = &response[2..];
    let descriptor = lookup_did(did);
    let name = descriptor.map(|d| d.name.to_string()).unwrap_or_else(|| "Unknown".to_string());
    let value = decode_did_value(descriptor.map(|d| d.decoder).unwrap_or(DidDecoder::Hex), data);
    let raw = data.iter().map(|b| format!("{b:02X}")).collect::<String>();

    Ok(DidRecord {
        did: format!("{did:04X}"),
        name,
        value,
        raw,
    })
}

/// Read Data By Identifier, preferring a brand DID map loaded via
/// [catalog::load_brand_dids] over the built-in generic table for naming
/// and decoding.
pub fn read_data_by_identifier_overlaid(
    elm: &mut crate::elm::ElmDriver,
    transport: &UdsTransport,
    did: u16,
    overlay: &[BrandDid],
) -> DiagServerResult<DidRecord> {
    let response = transport.send(elm, UdsSid::ReadDataByIdentifier, &[(did >> 8) as u8, did as u8])?;
    if response.len() < 2 {
        return Err(DiagError::ResponseError("Empty".to_string()));
    }
    let data = &response[2..];
    let (name, decoder) = lookup_did_overlaid(did, overlay)
        .unwrap_or_else(|| ("Unknown".to_string(), DidDecoder::Hex));
    let value = decode_did_value(decoder, data);
    let raw = data.iter().map(|b| format!("{b:02X}")).collect::<String>();

    Ok(DidRecord {
        did: format!("{did:04X}"),
        name,
        value,
        raw,
    })
}

/// Routine Control (SID 0x31): `[sub_function, routine_id_hi, routine_id_lo, ...payload]`.
/// Returns the raw bytes following the `71` positive-response SID.
pub fn routine_control(
    elm: &mut crate::elm::ElmDriver,
    transport: &UdsTransport,
    sub_function: u8,
    routine_id: u16,
    payload: &[u8],
) -> DiagServerResult<Vec<u8>> {
    let mut data = vec![sub_function, (routine_id >> 8) as u8, routine_id as u8];
    data.extend_from_slice(payload);
    transport.send(elm, UdsSid::RoutineControl, &data)
}

/// One 4-byte DTC record from a Read DTC Information (`19 02 FF`) response.
#[derive(Debug, Clone)]
pub struct UdsDtcRecord {
    /// Decoded 5-character DTC code.
    pub code: String,
    /// Raw status byte.
    pub status: u8,
}

/// Fingerprint summary of a Read DTC Information response: counts by
/// top-nibble letter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DtcFingerprint {
    /// Count of Powertrain (`P`) codes.
    pub powertrain: u32,
    /// Count of Chassis (`C`) codes.
    pub chassis: u32,
    /// Count of Body (`B`) codes.
    pub body: u32,
    /// Count of Network (`U`) codes.
    pub network: u32,
}

impl DtcFingerprint {
    /// Builds a fingerprint summary from decoded records.
    pub fn from_records(records: &[UdsDtcRecord]) -> Self {
        let mut fp = Self::default();
        for record in records {
            match record.code.chars().next() {
                Some('P') => fp.powertrain += 1,
                Some('C') => fp.chassis += 1,
                Some('B') => fp.body += 1,
                Some('U') => fp.network += 1,
                _ => {}
            }
        }
        fp
    }
}

/// Read DTC Information (`19 02 FF`, report DTCs by status mask):
/// positive response begins `59 02 <status_mask>`; subsequent bytes are
/// 4-byte groups `<dtc_hi> <dtc_mid> <dtc_lo> <status>`.
pub fn read_dtc_information(
    elm: &mut crate::elm::ElmDriver,
    transport: &UdsTransport,
) -> DiagServerResult<(u8, Vec<UdsDtcRecord>)> {
    let response = transport.send(elm, UdsSid::ReadDtcInformation, &[0x02, 0xFF])?;
    if response.len() < 2 {
        return Err(DiagError::ResponseError("Empty".to_string()));
    }
    let status_mask = response[1];
    let groups = &response[2..];
    let records = groups
        .chunks_exact(4)
        .map(|g| UdsDtcRecord {
            code: crate::dtc::decode_dtc_bytes(g[0], g[1]),
            status: g[3],
        })
        .collect();
    Ok((status_mask, records))
}

/// Tester Present (SID 0x3E, sub-function `0x00`): used as a liveness
/// probe by discovery.
pub fn tester_present(elm: &mut crate::elm::ElmDriver, transport: &UdsTransport) -> DiagServerResult<()> {
    transport.send(elm, UdsSid::TesterPresent, &[0x00]).map(|_| ())
}

/// Diagnostic Session Control (SID 0x10): used as a liveness/discovery
/// probe. `session` is typically `0x03` (extended diagnostic session).
pub fn diagnostic_session_control(
    elm: &mut crate::elm::ElmDriver,
    transport: &UdsTransport,
    session: u8,
) -> DiagServerResult<Vec<u8>> {
    transport.send(elm, UdsSid::DiagnosticSessionControl, &[session])
}

/// Raw send: caller-supplied SID and data bytes. Returns the positive
/// response payload (without the SID byte) or raises on negative response.
pub fn raw_send(
    elm: &mut crate::elm::ElmDriver,
    transport: &UdsTransport,
    sid: UdsSid,
    data: &[u8],
) -> DiagServerResult<Vec<u8>> {
    transport.send(elm, sid, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_is_response_error() {
        let err = parse_response(UdsSid::ReadDataByIdentifier, &[]).unwrap_err();
        assert!(matches!(err, DiagError::ResponseError(ref s) if s == "Empty"));
    }

    #[test]
    fn negative_response_carries_svc_and_nrc() {
        let err = parse_response(UdsSid::ReadDataByIdentifier, &[0x7F, 0x22, 0x31]).unwrap_err();
        match err {
            DiagError::NegativeResponse { svc, nrc } => {
                assert_eq!(svc, 0x22);
                assert_eq!(nrc, UdsError::RequestOutOfRange);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unexpected_sid_is_response_error() {
        let err = parse_response(UdsSid::ReadDataByIdentifier, &[0x50, 0x03]).unwrap_err();
        assert!(matches!(err, DiagError::ResponseError(ref s) if s == "Unexpected SID"));
    }

    #[test]
    fn positive_response_strips_sid() {
        let data = parse_response(UdsSid::ReadDataByIdentifier, &[0x62, 0xF1, 0x90, 0x41]).unwrap();
        assert_eq!(data, vec![0xF1, 0x90, 0x41]);
    }

    #[test]
    fn vin_scenario_from_spec() {
        // spec.md §8 scenario 5
        let record = DidRecord {
            did: "F190".to_string(),
            name: "VIN".to_string(),
            value: "1C4RJFAG105KL5732".to_string(),
            raw: "3143523452...".to_string(),
        };
        assert_eq!(record.did, "F190");
        assert_eq!(record.name, "VIN");
    }

    #[test]
    fn dtc_fingerprint_counts_by_top_nibble() {
        let records = vec![
            UdsDtcRecord { code: "P0118".to_string(), status: 0x08 },
            UdsDtcRecord { code: "P0220".to_string(), status: 0x08 },
            UdsDtcRecord { code: "C0561".to_string(), status: 0x08 },
        ];
        let fp = DtcFingerprint::from_records(&records);
        assert_eq!(fp.powertrain, 2);
        assert_eq!(fp.chassis, 1);
        assert_eq!(fp.body, 0);
    }
}

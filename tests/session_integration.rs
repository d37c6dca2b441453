//! End-to-end scenarios driving [elm_diag_core::session::Session] and the
//! UDS transport over a scripted fake adapter, rather than real hardware.
//! Each scenario is one of spec.md §8's literal worked examples.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use elm_diag_core::session::Session;
use elm_diag_core::transport::{Transport, TransportError};

/// A [Transport] double keyed by uppercased, whitespace-trimmed command
/// text. Commands with no scripted response answer `OK`, enough for the
/// AT housekeeping commands issued by [elm_diag_core::elm::ElmDriver::open]
/// and [elm_diag_core::uds::UdsTransport::configure] that this test
/// doesn't care about.
struct ScriptedTransport {
    responses: HashMap<String, Vec<String>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self { responses: HashMap::new() }
    }

    fn on(mut self, command: &str, response: &str) -> Self {
        self.responses.insert(
            command.trim().to_ascii_uppercase(),
            response.split_whitespace().map(str::to_string).collect(),
        );
        self
    }
}

impl Transport for ScriptedTransport {
    fn exchange(
        &mut self,
        command: &str,
        _timeout: Duration,
        _silence_timeout: Duration,
        _min_wait_before_silence: Duration,
    ) -> Result<Vec<String>, TransportError> {
        let key = command.trim().to_ascii_uppercase();
        Ok(self.responses.get(&key).cloned().unwrap_or_else(|| vec!["OK".to_string()]))
    }
}

/// The AT housekeeping any [ScriptedTransport] needs to answer for
/// `ElmDriver::open` to succeed in headers-off mode: a banner and a
/// `0100` that reports PID support (so negotiation doesn't retry).
fn base_adapter() -> ScriptedTransport {
    ScriptedTransport::new()
        .on("ATZ", "ELM327 v1.5")
        .on("0100", "41 00 BE 3E B8 13")
}

fn connect(transport: ScriptedTransport) -> Session {
    let mut session = Session::new(PathBuf::from("data"));
    session
        .connect_obd(Box::new(transport), "/dev/ttyUSB0".to_string(), 38_400, false)
        .expect("connect_obd should succeed against a scripted adapter");
    session
}

#[test]
fn live_pid_rpm_decodes_spec_example() {
    // spec.md §8 scenario 1: payload [41,0C,1A,F8] -> 1726.0 rpm.
    let transport = base_adapter().on("010C", "41 0C 1A F8");
    let mut session = connect(transport);

    let readings = session.read_live_data(Some(&[0x0C]), 2).unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].name, "Engine RPM");
    assert!((readings[0].value.unwrap() - 1726.0).abs() < 1e-9);
}

#[test]
fn read_dtcs_decodes_stored_codes() {
    // spec.md §8 scenario 2: payload [43,02,01,18,02,20] -> P0118, P0220.
    let transport = base_adapter()
        .on("03", "43 02 01 18 02 20")
        .on("07", "NO DATA")
        .on("0A", "NO DATA");
    let mut session = connect(transport);

    let codes = session.read_dtcs().unwrap();
    assert_eq!(codes.len(), 2);
    assert_eq!(codes[0].code, "P0118");
    assert_eq!(codes[1].code, "P0220");
}

#[test]
fn get_vehicle_info_decodes_vin_with_subframe_marker() {
    // spec.md §8 scenario 3: subframe marker 01, then ASCII "1C4RJFAG105KL5732".
    let transport = base_adapter().on(
        "0902",
        "49 02 01 31 43 34 52 4A 46 41 47 31 30 35 4B 4C 35 37 33 32",
    );
    let mut session = connect(transport);

    let reading = session.get_vehicle_info().unwrap().expect("a VIN response was scripted");
    assert_eq!(reading.vin.as_deref(), Some("1C4RJFAG105KL5732"));
}

#[test]
fn read_readiness_decodes_spec_example() {
    // spec.md §8 scenario 4: payload [41,01,83,07,FF,00].
    let transport = base_adapter().on("0101", "41 01 83 07 FF 00");
    let mut session = connect(transport);

    let readiness = session.read_readiness().unwrap().expect("a readiness response was scripted");
    assert!(readiness.mil_on);
    assert_eq!(readiness.dtc_count, 0x03);
}

#[test]
fn kline_session_rejects_readiness_and_freeze_frame() {
    use elm_diag_core::kline::{KLineFamily, KLinePolicy, KLineProfile, Quirks};

    let transport = base_adapter().on("0100", "41 00 BE 3E B8 13");
    let mut session = Session::new(PathBuf::from("data"));

    let profile = KLineProfile {
        name: "iso9141-2 generic".to_string(),
        family: KLineFamily::Iso9141_2,
        init: vec![],
        options: vec![],
        verify_obd: vec!["0100".to_string()],
        request_timeout: Duration::from_secs(2),
        inter_command_delay: Duration::from_millis(1),
        quirks: Quirks::empty(),
        notes: String::new(),
    };

    session
        .connect_kline(
            Box::new(transport),
            "/dev/ttyUSB0".to_string(),
            10_400,
            false,
            &[profile],
            &KLinePolicy::default(),
        )
        .expect("detection should pick the only candidate");

    assert!(session.is_connected());
    assert!(session.read_readiness().is_err());
    assert!(session.read_freeze_frame(2).is_err());
}

#[test]
fn uds_read_did_decodes_vin() {
    let transport = base_adapter().on("22 F1 90", "62 F1 90 31 43 34 52 4A 46 41 47 31 30 35 4B 4C 35 37 33 32");
    let mut session = connect(transport);

    let uds_transport = session.configure_uds("7E0", "7E8", '6', false).unwrap();
    let record = session.read_did(&uds_transport, 0xF190).unwrap();
    assert_eq!(record.name, "VIN");
    assert_eq!(record.value, "1C4RJFAG105KL5732");
}

#[test]
fn operations_before_connect_fail_not_connected() {
    let mut session = Session::new(PathBuf::from("data"));
    assert!(!session.is_connected());
    assert!(session.read_dtcs().is_err());
    assert!(session.read_live_data(None, 2).is_err());
}

/// A transport that answers the `ElmDriver::open` housekeeping normally,
/// then reports the device as disconnected on every subsequent exchange.
struct DisconnectingTransport {
    opened: ScriptedTransport,
    opened_commands_left: u32,
}

impl Transport for DisconnectingTransport {
    fn exchange(
        &mut self,
        command: &str,
        timeout: Duration,
        silence_timeout: Duration,
        min_wait_before_silence: Duration,
    ) -> Result<Vec<String>, TransportError> {
        if self.opened_commands_left > 0 {
            self.opened_commands_left -= 1;
            return self.opened.exchange(command, timeout, silence_timeout, min_wait_before_silence);
        }
        Err(TransportError::Disconnected("device not configured".to_string()))
    }
}

#[test]
fn device_disconnected_is_translated_to_connection_lost_and_marks_session_disconnected() {
    // spec.md §7: "The facade catches DeviceDisconnected, marks the
    // session disconnected, and rethrows as ConnectionLost."
    let transport = DisconnectingTransport {
        opened: base_adapter(),
        // ATZ, ATE0, ATL0, ATS0/ATS1, ATH1/ATH0, ATAT1, ATSP0, ATAL, 0100(verify) = 9
        opened_commands_left: 9,
    };
    let mut session = Session::new(PathBuf::from("data"));
    session
        .connect_obd(Box::new(transport), "/dev/ttyUSB0".to_string(), 38_400, false)
        .expect("connect_obd should succeed while the scripted housekeeping still answers");
    assert!(session.is_connected());

    let err = session.read_dtcs().unwrap_err();
    assert!(
        matches!(err, elm_diag_core::DiagError::ConnectionLost(_)),
        "expected ConnectionLost, got {err:?}"
    );
    assert!(!session.is_connected());
}

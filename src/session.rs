//! Unified facade over the OBD-II and K-Line drivers.
//!
//! A session holds at most one active driver variant, tagged by protocol
//! family; callers go through one surface regardless of which protocol is
//! underneath.

use std::path::PathBuf;

use crate::dtc::{Dtc, DtcDatabase, DtcStatus};
use crate::elm::ElmDriver;
use crate::kline::{self, KLinePolicy, KLineProfile};
use crate::obd2::{self, FreezeFrame, Reading, Readiness, VinReading};
use crate::transport::Transport;
use crate::uds::{self, discovery::DiscoveryOptions, BrandSignature, DiscoveryResult, UdsTransport};
use crate::vin_cache::VinCache;
use crate::{DiagError, DiagServerResult};

/// Coarse connection state, surfaced to callers via [Session::is_connected]
/// and used internally to reject operations before a driver exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No connection attempt has been made yet.
    Idle,
    /// A connection attempt is in progress.
    Connecting,
    /// An active driver is present and ready for requests.
    Connected,
    /// The driver was dropped, either by [Session::disconnect] or because
    /// a transport error surfaced [DiagError::DeviceDisconnected].
    Disconnected,
}

/// The OBD-II (SAE J1979) driver variant: an [ElmDriver] with no
/// additional per-session state.
#[derive(Debug)]
pub struct ObdSession {
    elm: ElmDriver,
}

/// The K-Line driver variant: an [ElmDriver] plus the profile that was
/// selected during detection and the policy derived from it, both reused
/// on every subsequent query.
#[derive(Debug)]
pub struct KLineSession {
    elm: ElmDriver,
    profile: KLineProfile,
    policy: KLinePolicy,
}

/// The active protocol driver. At most one variant exists at a time;
/// selecting a new one (via [Session::connect_obd] or
/// [Session::connect_kline]) replaces whatever was active.
#[derive(Debug)]
enum ActiveDriver {
    Obd(ObdSession),
    KLine(KLineSession),
}

/// Unified facade over the OBD-II and K-Line drivers (spec.md §4.11).
/// Owns the adapter exclusively through whichever driver is active, the
/// DTC database, and an optional VIN cache.
pub struct Session {
    active: Option<ActiveDriver>,
    lifecycle: Lifecycle,
    dtc_db: DtcDatabase,
    data_dir: PathBuf,
    manufacturer: Option<String>,
    vin_cache: Option<Box<dyn VinCache>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.active)
            .field("lifecycle", &self.lifecycle)
            .field("data_dir", &self.data_dir)
            .field("manufacturer", &self.manufacturer)
            .field("vin_cache", &self.vin_cache.is_some())
            .finish()
    }
}

impl Session {
    /// Builds an idle session. `data_dir` is where `dtc_generic.csv` and
    /// any manufacturer overlay CSVs live; load it eagerly with
    /// [Session::set_manufacturer] (passing `None` still loads the generic
    /// table).
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            active: None,
            lifecycle: Lifecycle::Idle,
            dtc_db: DtcDatabase::new(),
            data_dir,
            manufacturer: None,
            vin_cache: None,
        }
    }

    /// Attaches a VIN cache, consulted and written through by
    /// [Session::discover].
    pub fn with_vin_cache(mut self, cache: Box<dyn VinCache>) -> Self {
        self.vin_cache = Some(cache);
        self
    }

    /// Loads the generic DTC table and, if `manufacturer` is set, its
    /// overlay. Fans out to the active driver's manufacturer-scoped state,
    /// if any exists for the active protocol (currently none does; the
    /// fan-out point exists for drivers that gain manufacturer-specific
    /// behaviour).
    pub fn set_manufacturer(&mut self, manufacturer: Option<String>) -> std::io::Result<()> {
        let mut db = DtcDatabase::new();
        db.load_generic(&self.data_dir)?;
        if let Some(m) = &manufacturer {
            db.load_manufacturer(m, &self.data_dir)?;
        }
        self.dtc_db = db;
        self.manufacturer = manufacturer;
        Ok(())
    }

    /// The currently configured manufacturer hint, if any.
    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    /// Connects as an OBD-II (SAE J1979) session: opens and negotiates the
    /// ELM327 adapter, replacing any previously active driver.
    pub fn connect_obd(
        &mut self,
        transport: Box<dyn Transport>,
        port_id: String,
        baud_rate: u32,
        headers_on: bool,
    ) -> Result<(), DiagError> {
        self.lifecycle = Lifecycle::Connecting;
        let elm = ElmDriver::open(transport, port_id, baud_rate, headers_on)?;
        self.active = Some(ActiveDriver::Obd(ObdSession { elm }));
        self.lifecycle = Lifecycle::Connected;
        Ok(())
    }

    /// Connects as a K-Line session: opens the adapter, then runs
    /// candidate detection over `profiles` in order. A successful
    /// detection replaces any previously active driver (OBD or K-Line).
    pub fn connect_kline(
        &mut self,
        transport: Box<dyn Transport>,
        port_id: String,
        baud_rate: u32,
        headers_on: bool,
        profiles: &[KLineProfile],
        base_policy: &KLinePolicy,
    ) -> Result<(), DiagError> {
        self.lifecycle = Lifecycle::Connecting;
        let mut elm = ElmDriver::open(transport, port_id, baud_rate, headers_on)?;
        let (profile, reason) = kline::detect_candidate(&mut elm, profiles, base_policy)?;
        log::info!("K-Line profile '{}' selected: {reason}", profile.name);
        let policy = kline::policy_for_profile(&profile, base_policy);
        self.active = Some(ActiveDriver::KLine(KLineSession { elm, profile, policy }));
        self.lifecycle = Lifecycle::Connected;
        Ok(())
    }

    /// Drops the active driver, releasing the transport. Idempotent.
    pub fn disconnect(&mut self) {
        self.active = None;
        self.lifecycle = Lifecycle::Disconnected;
    }

    /// True if a driver is active and ready for requests.
    pub fn is_connected(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Connected) && self.active.is_some()
    }

    /// Borrows the active driver's [ElmDriver], regardless of variant.
    fn elm_mut(&mut self) -> Result<&mut ElmDriver, DiagError> {
        match &mut self.active {
            Some(ActiveDriver::Obd(s)) => Ok(&mut s.elm),
            Some(ActiveDriver::KLine(s)) => Ok(&mut s.elm),
            None => Err(DiagError::NotConnected),
        }
    }

    /// Facade-level error translation (spec.md §7): a [DiagError::DeviceDisconnected]
    /// observed while a logical operation was in flight marks the session
    /// disconnected and is rethrown as [DiagError::ConnectionLost]. Every
    /// public operation that reaches the transport routes its result
    /// through this before returning it to the caller.
    fn translate_disconnect<T>(&mut self, result: Result<T, DiagError>) -> Result<T, DiagError> {
        if let Err(DiagError::DeviceDisconnected(reason)) = &result {
            let reason = reason.clone();
            self.lifecycle = Lifecycle::Disconnected;
            return Err(DiagError::ConnectionLost(reason));
        }
        result
    }

    /// Reads the vehicle's VIN via Mode 09 (spec.md §4.5). Available on
    /// both driver variants: K-Line vehicles that speak OBD-II over
    /// K-Line still answer Mode 09.
    pub fn get_vehicle_info(&mut self) -> Result<Option<VinReading>, DiagError> {
        let result = self.elm_mut().and_then(obd2::read_vin);
        self.translate_disconnect(result)
    }

    /// Reads stored (Mode 03), pending (Mode 07), and permanent (Mode 0A)
    /// DTCs, in that order.
    pub fn read_dtcs(&mut self) -> Result<Vec<Dtc>, DiagError> {
        let result = self.elm_mut().and_then(|elm| {
            let mut codes = obd2::read_stored_dtcs(elm)?;
            codes.extend(obd2::read_pending_dtcs(elm)?);
            codes.extend(obd2::read_permanent_dtcs(elm)?);
            Ok(codes)
        });
        self.translate_disconnect(result)
    }

    /// Describes a DTC code via the active manufacturer-overlaid
    /// database, or `None` if it isn't registered.
    pub fn describe_dtc(&self, code: &str) -> Option<&str> {
        self.dtc_db.lookup(code)
    }

    /// Clears stored/pending DTCs via Mode 04.
    pub fn clear_dtcs(&mut self) -> Result<bool, DiagError> {
        let result = self.elm_mut().and_then(obd2::clear_dtcs);
        self.translate_disconnect(result)
    }

    /// Reads the Mode 01 PID 01 readiness monitor set. Only meaningful
    /// for an OBD-II driver; a K-Line driver raises
    /// [DiagError::ScannerError] since readiness is an OBD-II-specific
    /// Mode 01 PID (spec.md §4.11 "K-Line additionally exposes a limited
    /// subset").
    pub fn read_readiness(&mut self) -> Result<Option<Readiness>, DiagError> {
        let result = match &self.active {
            Some(ActiveDriver::KLine(_)) => Err(DiagError::ScannerError(
                "readiness is not supported over a K-Line session".to_string(),
            )),
            _ => self.elm_mut().and_then(obd2::read_readiness),
        };
        self.translate_disconnect(result)
    }

    /// Reads Mode 02 freeze frame 0 for the canonical PID set. Only
    /// meaningful for an OBD-II driver; see [Session::read_readiness].
    pub fn read_freeze_frame(&mut self, precision: u32) -> Result<FreezeFrame, DiagError> {
        let result = match &self.active {
            Some(ActiveDriver::KLine(_)) => Err(DiagError::ScannerError(
                "freeze frame is not supported over a K-Line session".to_string(),
            )),
            _ => self.elm_mut().and_then(|elm| obd2::read_freeze_frame(elm, 0, precision)),
        };
        self.translate_disconnect(result)
    }

    /// Reads live Mode 01 data for `pids`, or the full supported set if
    /// `pids` is `None`.
    pub fn read_live_data(&mut self, pids: Option<&[u8]>, precision: u32) -> Result<Vec<Reading>, DiagError> {
        let result = self.elm_mut().and_then(|elm| obd2::read_live_data(elm, pids, precision));
        self.translate_disconnect(result)
    }

    /// Configures a [UdsTransport] for `tx_id`/`rx_id` on `protocol` over
    /// the active driver's adapter. The returned transport is a
    /// caller-held value passed back into the UDS entry points below;
    /// the session doesn't retain it, matching `UdsTransport`'s
    /// stateless-relative-to-the-session design.
    pub fn configure_uds(&mut self, tx_id: &str, rx_id: &str, protocol: char, headers_on: bool) -> DiagServerResult<UdsTransport> {
        let result = self.elm_mut().and_then(|elm| UdsTransport::configure(elm, tx_id, rx_id, protocol, headers_on));
        self.translate_disconnect(result)
    }

    /// Read Data By Identifier (UDS SID 0x22).
    pub fn read_did(&mut self, transport: &UdsTransport, did: u16) -> DiagServerResult<uds::DidRecord> {
        let result = self.elm_mut().and_then(|elm| uds::read_data_by_identifier(elm, transport, did));
        self.translate_disconnect(result)
    }

    /// Read Data By Identifier, naming and decoding `did` from `overlay`
    /// (a brand DID map loaded via [uds::load_brand_dids]) ahead of the
    /// built-in generic table.
    pub fn read_did_overlaid(
        &mut self,
        transport: &UdsTransport,
        did: u16,
        overlay: &[uds::BrandDid],
    ) -> DiagServerResult<uds::DidRecord> {
        let result = self
            .elm_mut()
            .and_then(|elm| uds::read_data_by_identifier_overlaid(elm, transport, did, overlay));
        self.translate_disconnect(result)
    }

    /// Read DTC Information (UDS SID 0x19, `19 02 FF`).
    pub fn read_uds_dtcs(&mut self, transport: &UdsTransport) -> DiagServerResult<(u8, Vec<uds::UdsDtcRecord>)> {
        let result = self.elm_mut().and_then(|elm| uds::read_dtc_information(elm, transport));
        self.translate_disconnect(result)
    }

    /// Tester Present (UDS SID 0x3E).
    pub fn uds_tester_present(&mut self, transport: &UdsTransport) -> DiagServerResult<()> {
        let result = self.elm_mut().and_then(|elm| uds::tester_present(elm, transport));
        self.translate_disconnect(result)
    }

    /// Diagnostic Session Control (UDS SID 0x10).
    pub fn uds_session_control(&mut self, transport: &UdsTransport, session: u8) -> DiagServerResult<Vec<u8>> {
        let result = self.elm_mut().and_then(|elm| uds::diagnostic_session_control(elm, transport, session));
        self.translate_disconnect(result)
    }

    /// Runs UDS module discovery (spec.md §4.8) over the active driver's
    /// adapter, consulting and updating the attached VIN cache on a
    /// successful VIN match.
    pub fn discover(&mut self, opts: &DiscoveryOptions, catalog: &[BrandSignature]) -> Result<DiscoveryResult, DiagError> {
        let cache = self.vin_cache.as_deref();
        let result = match &mut self.active {
            Some(ActiveDriver::Obd(s)) => uds::discover(&mut s.elm, opts, catalog, cache),
            Some(ActiveDriver::KLine(s)) => uds::discover(&mut s.elm, opts, catalog, cache),
            None => Err(DiagError::NotConnected),
        };
        self.translate_disconnect(result)
    }

    /// Filters `codes` down to one status, a small convenience used by
    /// callers that requested the combined [Session::read_dtcs] result
    /// but want to report by mode.
    pub fn dtcs_with_status(codes: &[Dtc], status: DtcStatus) -> Vec<&Dtc> {
        codes.iter().filter(|d| d.status == status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_not_connected() {
        let session = Session::new(PathBuf::from("data"));
        assert!(!session.is_connected());
        assert_eq!(session.manufacturer(), None);
    }

    #[test]
    fn disconnect_resets_lifecycle_and_driver() {
        let mut session = Session::new(PathBuf::from("data"));
        session.lifecycle = Lifecycle::Connected;
        session.disconnect();
        assert!(!session.is_connected());
        assert_eq!(session.lifecycle, Lifecycle::Disconnected);
    }

    #[test]
    fn operations_before_connect_are_not_connected_errors() {
        let mut session = Session::new(PathBuf::from("data"));
        let err = session.get_vehicle_info().unwrap_err();
        assert!(matches!(err, DiagError::NotConnected));
    }

    #[test]
    fn dtcs_with_status_filters() {
        let codes = vec![
            Dtc { code: "P0118".to_string(), status: DtcStatus::Stored },
            Dtc { code: "P0220".to_string(), status: DtcStatus::Pending },
        ];
        let stored = Session::dtcs_with_status(&codes, DtcStatus::Stored);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].code, "P0118");
    }
}

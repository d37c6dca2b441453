//! Brand-specific overlays loaded from the JSON files spec.md §6 names as
//! "data files consumed": brand DID maps, routine maps, and module
//! catalogs under `data/uds/`. Each is a flat JSON array of descriptor
//! objects; a missing or malformed file is the caller's problem to
//! surface, not this crate's to paper over (contrast [crate::vin_cache],
//! which tolerates a missing file by design).

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::dids::DidDecoder;
use super::discovery::BrandSignature;

/// Error loading a `data/uds/*.json` overlay file.
#[derive(Debug, thiserror::Error)]
pub enum UdsCatalogError {
    /// The file couldn't be read.
    #[error("failed to read {0}: {1}")]
    Io(String, std::io::Error),
    /// The file's contents weren't valid JSON for the expected schema.
    #[error("failed to parse {0}: {1}")]
    Parse(String, serde_json::Error),
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, UdsCatalogError> {
    let text = fs::read_to_string(path).map_err(|e| UdsCatalogError::Io(path.display().to_string(), e))?;
    serde_json::from_str(&text).map_err(|e| UdsCatalogError::Parse(path.display().to_string(), e))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawDecoder {
    Ascii,
    UnsignedBigEndian,
    Hex,
}

impl From<RawDecoder> for DidDecoder {
    fn from(raw: RawDecoder) -> Self {
        match raw {
            RawDecoder::Ascii => DidDecoder::Ascii,
            RawDecoder::UnsignedBigEndian => DidDecoder::UnsignedBigEndian,
            RawDecoder::Hex => DidDecoder::Hex,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDidEntry {
    did: u16,
    name: String,
    #[serde(default)]
    decoder: Option<RawDecoder>,
}

/// One brand DID map entry loaded from JSON. Unlike the built-in
/// `&'static` [super::dids::DidDescriptor] table, this owns its name since
/// it's read at runtime.
#[derive(Debug, Clone)]
pub struct BrandDid {
    /// The DID, e.g. `0xF190`.
    pub did: u16,
    /// Human-readable name from the brand map.
    pub name: String,
    /// Decoder used to render the response value; defaults to `Hex` when
    /// the entry omits `decoder`, matching [super::dids::lookup_did]'s
    /// fallback for an unknown DID.
    pub decoder: DidDecoder,
}

/// Loads a brand DID map: `[{did, name, decoder?}]` (spec.md §6).
pub fn load_brand_dids(path: &Path) -> Result<Vec<BrandDid>, UdsCatalogError> {
    let raw: Vec<RawDidEntry> = read_json(path)?;
    Ok(raw
        .into_iter()
        .map(|r| BrandDid {
            did: r.did,
            name: r.name,
            decoder: r.decoder.map(DidDecoder::from).unwrap_or(DidDecoder::Hex),
        })
        .collect())
}

/// Looks up `did`'s name and decoder, preferring `overlay` (brand-specific)
/// over the built-in generic table.
pub fn lookup_did_overlaid(did: u16, overlay: &[BrandDid]) -> Option<(String, DidDecoder)> {
    if let Some(brand) = overlay.iter().find(|b| b.did == did) {
        return Some((brand.name.clone(), brand.decoder));
    }
    super::dids::lookup_did(did).map(|d| (d.name.to_string(), d.decoder))
}

#[derive(Debug, Deserialize)]
struct RawRoutineEntry {
    routine_id: u16,
    name: String,
}

/// One routine map entry loaded from JSON: `{routine_id, name}`.
#[derive(Debug, Clone)]
pub struct RoutineDescriptor {
    /// The routine identifier sent in a Routine Control request.
    pub routine_id: u16,
    /// Human-readable name from the brand map.
    pub name: String,
}

/// Loads a routine map: `[{routine_id, name}]` (spec.md §6).
pub fn load_routine_map(path: &Path) -> Result<Vec<RoutineDescriptor>, UdsCatalogError> {
    let raw: Vec<RawRoutineEntry> = read_json(path)?;
    Ok(raw
        .into_iter()
        .map(|r| RoutineDescriptor {
            routine_id: r.routine_id,
            name: r.name,
        })
        .collect())
}

/// Looks up a routine's human-readable name in a loaded map.
pub fn lookup_routine_name<'a>(routine_id: u16, map: &'a [RoutineDescriptor]) -> Option<&'a str> {
    map.iter().find(|r| r.routine_id == routine_id).map(|r| r.name.as_str())
}

#[derive(Debug, Deserialize)]
struct RawModuleEntry {
    name: String,
    tx_id: String,
    rx_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    module_type: Option<String>,
}

/// Loads a module catalog: `[{name, tx_id, rx_id, module_type?}]`
/// (spec.md §6) into the [BrandSignature] overlay `discover()` consumes.
/// `module_type`, when present, is parsed but not carried through:
/// discovery derives [super::ModuleType] itself from each module's DTC
/// fingerprint rather than trusting a static catalog hint.
pub fn load_module_catalog(path: &Path) -> Result<Vec<BrandSignature>, UdsCatalogError> {
    let raw: Vec<RawModuleEntry> = read_json(path)?;
    Ok(raw
        .into_iter()
        .map(|r| BrandSignature {
            name: r.name,
            tx_id: r.tx_id.to_ascii_uppercase(),
            rx_id: r.rx_id.to_ascii_uppercase(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tmp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "elm_diag_core_uds_catalog_test_{name}_{:?}.json",
            std::thread::current().id()
        ));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_brand_did_map_with_explicit_and_defaulted_decoders() {
        let path = tmp_file(
            "dids",
            r#"[
                {"did": 62352, "name": "Custom Counter", "decoder": "unsigned_big_endian"},
                {"did": 61600, "name": "Opaque Blob"}
            ]"#,
        );
        let overlay = load_brand_dids(&path).unwrap();
        assert_eq!(overlay.len(), 2);
        assert_eq!(overlay[0].decoder, DidDecoder::UnsignedBigEndian);
        assert_eq!(overlay[1].decoder, DidDecoder::Hex);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn overlay_lookup_prefers_brand_entry_over_generic_table() {
        let path = tmp_file(
            "did_overlay",
            r#"[{"did": 61840, "name": "Brand VIN", "decoder": "ascii"}]"#,
        );
        let overlay = load_brand_dids(&path).unwrap();
        let (name, decoder) = lookup_did_overlaid(0xF190, &overlay).unwrap();
        assert_eq!(name, "Brand VIN");
        assert_eq!(decoder, DidDecoder::Ascii);
        let (name, _) = lookup_did_overlaid(0xF18C, &overlay).unwrap();
        assert_eq!(name, "ECU Serial Number");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn loads_routine_map_and_looks_up_by_id() {
        let path = tmp_file(
            "routines",
            r#"[{"routine_id": 512, "name": "Erase Flash"}]"#,
        );
        let map = load_routine_map(&path).unwrap();
        assert_eq!(lookup_routine_name(0x0200, &map), Some("Erase Flash"));
        assert_eq!(lookup_routine_name(0x0201, &map), None);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn loads_module_catalog_ignoring_module_type_hint() {
        let path = tmp_file(
            "modules",
            r#"[{"name": "Engine", "tx_id": "7e0", "rx_id": "7e8", "module_type": "powertrain"}]"#,
        );
        let catalog = load_module_catalog(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].tx_id, "7E0");
        assert_eq!(catalog[0].rx_id, "7E8");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_error_not_an_empty_catalog() {
        let missing = std::env::temp_dir().join("elm_diag_core_uds_catalog_does_not_exist.json");
        assert!(load_brand_dids(&missing).is_err());
    }
}

//! Mode 04 (clear DTCs). See spec.md §4.5.

use crate::elm::ElmDriver;
use crate::DiagError;

/// Issues `04`; succeeds if the response contains `44` anywhere in its hex
/// stream.
pub fn clear_dtcs(elm: &mut ElmDriver) -> Result<bool, DiagError> {
    let lines = elm.exchange("04")?;
    let hex: String = lines
        .iter()
        .flat_map(|l| l.chars())
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_uppercase();
    Ok(hex.contains("44"))
}

#[cfg(test)]
mod tests {
    #[test]
    fn response_hex_detection() {
        let lines = vec!["44".to_string()];
        let hex: String = lines.iter().flat_map(|l| l.chars()).collect();
        assert!(hex.contains("44"));
    }
}

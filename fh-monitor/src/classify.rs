//! Static vendor/product id classification.

/// Known boards and bridge chips, keyed by lower-case hex (vendor, product).
const DEVICE_TYPES: &[((&str, &str), &str)] = &[
    (("303a", "1001"), "ESP32-S2"),
    (("303a", "0002"), "ESP32-S2"),
    (("303a", "1000"), "ESP32-S3"),
    (("303a", "80d4"), "ESP32-C3"),
    (("0483", "df11"), "STM32-DFU"),
    (("0483", "5740"), "STM32"),
    (("2341", "0043"), "Arduino-Uno"),
    (("2341", "0001"), "Arduino-Uno"),
    (("1a86", "7523"), "CH340-Serial"),
    (("0403", "6001"), "FTDI-Serial"),
];

/// Classify a device by id pair. Unknown pairs are `"Unknown"`, never an
/// error.
pub fn classify(vendor_id: &str, product_id: &str) -> &'static str {
    let vendor = vendor_id.to_ascii_lowercase();
    let product = product_id.to_ascii_lowercase();
    DEVICE_TYPES
        .iter()
        .find(|((v, p), _)| *v == vendor && *p == product)
        .map(|(_, label)| *label)
        .unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_pairs() {
        assert_eq!(classify("303a", "1001"), "ESP32-S2");
        assert_eq!(classify("303A", "1001"), "ESP32-S2");
        assert_eq!(classify("0483", "df11"), "STM32-DFU");
        assert_eq!(classify("1a86", "7523"), "CH340-Serial");
    }

    #[test]
    fn unknown_pairs() {
        assert_eq!(classify("ffff", "0000"), "Unknown");
        assert_eq!(classify("", ""), "Unknown");
    }
}

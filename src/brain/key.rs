//! Learning key normalization

/// Strip an instrument prefix (`EURUSD_TREND`) or suffix (`TREND_EURUSD`)
/// so every instrument variant of a strategy shares one learning record
pub fn learning_key<S: AsRef<str>>(raw: &str, symbols: &[S]) -> String {
    for symbol in symbols {
        let symbol = symbol.as_ref();
        if let Some(rest) = raw.strip_prefix(symbol).and_then(|r| r.strip_prefix('_')) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
        if let Some(rest) = raw.strip_suffix(symbol).and_then(|r| r.strip_suffix('_')) {
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    raw.to_string()
}

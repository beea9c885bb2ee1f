use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{CryptoError, CryptoResult};

/// base64url without padding.
pub fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode base64url, tolerating trailing `=` padding.
pub fn b64url_decode(s: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s.trim_end_matches('='))
        .map_err(|e| CryptoError::Encoding(format!("base64url decode: {e}")))
}

/// Decode hex with or without a `0x` prefix.
pub fn hex_decode(s: &str) -> CryptoResult<Vec<u8>> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(trimmed).map_err(|e| CryptoError::Encoding(format!("hex decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b64url_has_no_padding() {
        assert_eq!(b64url_encode(&[0xfb, 0xff]), "-_8");
        assert_eq!(b64url_decode("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(b64url_decode("-_8=").unwrap(), vec![0xfb, 0xff]);
        assert!(b64url_decode("+/8").is_err());
    }

    #[test]
    fn hex_accepts_prefix() {
        assert_eq!(hex_decode("0xdead").unwrap(), vec![0xde, 0xad]);
        assert_eq!(hex_decode("DEAD").unwrap(), vec![0xde, 0xad]);
        assert!(hex_decode("0xz1").is_err());
    }
}

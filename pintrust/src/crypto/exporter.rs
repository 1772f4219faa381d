// Keying material exporter (RFC 5705 shape over HKDF-SHA256).

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{PinTrustError, Result};

/// Largest output a single HKDF-SHA256 expansion can produce.
pub const MAX_EXPORT_LEN: usize = 255 * 32;

/// Export `length` bytes of keying material bound to the connection.
///
/// The HKDF info is `label || 0x00 || [u16 len || context] || client_random || server_random`.
/// `None` and `Some(&[])` produce different output.
pub fn export_keying_material(
    master_secret: &[u8; 32],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    label: &str,
    context: Option<&[u8]>,
    length: usize,
) -> Result<Vec<u8>> {
    if length > MAX_EXPORT_LEN {
        return Err(PinTrustError::ExportTooLong {
            requested: length,
            max: MAX_EXPORT_LEN,
        });
    }
    let context_len = match context {
        Some(ctx) => u16::try_from(ctx.len())
            .map_err(|_| PinTrustError::KeyDerivation("exporter context too long".into()))?
            .to_be_bytes(),
        None => [0u8; 2],
    };

    let mut info: Vec<&[u8]> = vec![label.as_bytes(), b"\0".as_slice()];
    if let Some(ctx) = context {
        info.push(&context_len);
        info.push(ctx);
    }
    info.push(client_random);
    info.push(server_random);

    let hk = Hkdf::<Sha256>::from_prk(master_secret)
        .map_err(|e| PinTrustError::KeyDerivation(format!("exporter prk: {e}")))?;
    let mut out = vec![0u8; length];
    hk.expand_multi_info(&info, &mut out)
        .map_err(|e| PinTrustError::KeyDerivation(format!("HKDF expand error: {e}")))?;
    Ok(out)
}

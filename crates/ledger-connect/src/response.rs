use ledger_chain::SigningScheme;
use ledger_codec::{LedgerResponseCode, split_status};

use crate::{LedgerError, LedgerResult};

/// A device response whose status word signalled success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerResponse<T> {
    pub code: LedgerResponseCode,
    pub value: T,
}

/// Decodes the payload preceding a successful status trailer.
pub trait ResponseDecoder {
    type Output;

    fn decode_payload(&self, payload: &[u8]) -> LedgerResult<Self::Output>;
}

/// Splits the status trailer off `buffer` and decodes the rest with `decoder`.
///
/// A non-success status fails with [`LedgerError::Response`] without looking
/// at the payload beyond capturing a printable reason string.
pub fn decode<D: ResponseDecoder>(
    decoder: &D,
    buffer: &[u8],
) -> LedgerResult<LedgerResponse<D::Output>> {
    let (code, payload) = split_status(buffer).ok_or(LedgerError::ShortResponse {
        len: buffer.len(),
    })?;
    if !code.is_success() {
        return Err(LedgerError::Response {
            code,
            reason: device_reason(payload),
        });
    }
    let value = decoder.decode_payload(payload)?;
    Ok(LedgerResponse { code, value })
}

fn device_reason(payload: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?.trim_matches(char::from(0)).trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return None;
    }
    Some(text.to_string())
}

/// Accepts any payload; used for intermediate signing frames.
pub struct StatusDecoder;

impl ResponseDecoder for StatusDecoder {
    type Output = ();

    fn decode_payload(&self, _payload: &[u8]) -> LedgerResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAccount {
    pub public_key: Vec<u8>,
    pub address: String,
}

/// `public_key ++ address` where the key length depends on the scheme.
pub struct AccountDecoder {
    public_key_len: usize,
}

impl AccountDecoder {
    pub fn new(scheme: SigningScheme) -> Self {
        Self {
            public_key_len: scheme.public_key_len(),
        }
    }
}

impl ResponseDecoder for AccountDecoder {
    type Output = LedgerAccount;

    fn decode_payload(&self, payload: &[u8]) -> LedgerResult<LedgerAccount> {
        if payload.len() <= self.public_key_len {
            return Err(LedgerError::InvalidPayload(format!(
                "account payload of {} bytes cannot hold a {}-byte public key and an address",
                payload.len(),
                self.public_key_len
            )));
        }
        let (public_key, address) = payload.split_at(self.public_key_len);
        let address = std::str::from_utf8(address)
            .map_err(|_| LedgerError::InvalidPayload("address is not valid UTF-8".to_string()))?
            .trim_end_matches(char::from(0));
        if address.is_empty() {
            return Err(LedgerError::InvalidPayload("empty address".to_string()));
        }
        Ok(LedgerAccount {
            public_key: public_key.to_vec(),
            address: address.to_string(),
        })
    }
}

/// Raw signature bytes.
pub struct SignatureDecoder;

impl ResponseDecoder for SignatureDecoder {
    type Output = Vec<u8>;

    fn decode_payload(&self, payload: &[u8]) -> LedgerResult<Vec<u8>> {
        if payload.is_empty() {
            return Err(LedgerError::InvalidPayload("empty signature".to_string()));
        }
        Ok(payload.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppVersion {
    pub test_mode: bool,
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub locked: bool,
    pub target_id: Option<[u8; 4]>,
}

impl std::fmt::Display for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.test_mode {
            f.write_str(" (test mode)")?;
        }
        Ok(())
    }
}

/// Version record; older apps answer with one byte per component.
pub struct VersionDecoder;

impl ResponseDecoder for VersionDecoder {
    type Output = AppVersion;

    fn decode_payload(&self, payload: &[u8]) -> LedgerResult<AppVersion> {
        let word = |at: usize| u16::from_be_bytes([payload[at], payload[at + 1]]);
        let version = match payload.len() {
            4 => AppVersion {
                test_mode: payload[0] != 0,
                major: payload[1].into(),
                minor: payload[2].into(),
                patch: payload[3].into(),
                locked: false,
                target_id: None,
            },
            len if len >= 7 => AppVersion {
                test_mode: payload[0] != 0,
                major: word(1),
                minor: word(3),
                patch: word(5),
                locked: payload.get(7).is_some_and(|locked| *locked != 0),
                target_id: payload
                    .get(8..12)
                    .map(|id| [id[0], id[1], id[2], id[3]]),
            },
            len => {
                return Err(LedgerError::InvalidPayload(format!(
                    "version payload of {len} bytes"
                )));
            }
        };
        Ok(version)
    }
}

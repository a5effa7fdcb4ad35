//! H.264 codec-specific data inspection

/// profile_idc of the Baseline profile.
pub const PROFILE_IDC_BASELINE: u8 = 66;
pub const PROFILE_IDC_MAIN: u8 = 77;
pub const PROFILE_IDC_HIGH: u8 = 100;

const START_CODE_3: [u8; 3] = [0x00, 0x00, 0x01];
const START_CODE_4: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

// SPS NAL header bytes with nal_ref_idc 3, 1 and 2.
const SPS_NAL_HEADERS: [u8; 3] = [0x67, 0x27, 0x47];

/// Errors produced while reading an SPS.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AvcError {
    #[error("AVC start code not found")]
    MissingStartCode,

    #[error("Unexpected NAL header {header:#04x}, expected SPS")]
    NotSps { header: u8 },

    #[error("SPS truncated after {len} bytes")]
    Truncated { len: usize },
}

/// Reads profile_idc from an Annex-B framed SPS (`csd-0`).
///
/// # Errors
///
/// - `AvcError::MissingStartCode` - Blob does not start with a 3 or 4 byte start code
/// - `AvcError::NotSps` - First NAL unit is not a sequence parameter set
/// - `AvcError::Truncated` - Blob ends before profile_idc
pub fn profile_idc(csd0: &[u8]) -> Result<u8, AvcError> {
    let payload = if csd0.starts_with(&START_CODE_3) {
        &csd0[START_CODE_3.len()..]
    } else if csd0.starts_with(&START_CODE_4) {
        &csd0[START_CODE_4.len()..]
    } else {
        return Err(AvcError::MissingStartCode);
    };

    let (&header, rest) = payload
        .split_first()
        .ok_or(AvcError::Truncated { len: csd0.len() })?;
    if !SPS_NAL_HEADERS.contains(&header) {
        return Err(AvcError::NotSps { header });
    }

    rest.first()
        .copied()
        .ok_or(AvcError::Truncated { len: csd0.len() })
}

/// Builds a minimal SPS blob with a 4 byte start code.
pub fn sps_with_profile(profile: u8, level: u8) -> Vec<u8> {
    let mut sps = START_CODE_4.to_vec();
    sps.extend_from_slice(&[SPS_NAL_HEADERS[0], profile, 0xC0, level, 0xDA, 0x01, 0x40]);
    sps
}

//! Option negotiation: RFC 2348 `blksize`, RFC 2349 `timeout` and `tsize`.

use std::time::Duration;

pub const DEFAULT_BLOCK_SIZE: u16 = 512;
pub const MIN_BLOCK_SIZE: u16 = 8;
pub const MAX_BLOCK_SIZE: u16 = 65464;

pub const OPT_BLKSIZE: &str = "blksize";
pub const OPT_TIMEOUT: &str = "timeout";
pub const OPT_TSIZE: &str = "tsize";

/// Options a peer asked for. Values outside their legal range are dropped,
/// which RFC 2347 treats the same as the option never being sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedOptions {
    pub block_size: Option<u16>,
    pub timeout: Option<u8>,
    pub transfer_size: Option<u64>,
}

impl RequestedOptions {
    pub fn parse(pairs: &[(String, String)]) -> Self {
        let mut requested = Self::default();
        for (name, value) in pairs {
            let value = value.trim();
            if name.eq_ignore_ascii_case(OPT_BLKSIZE) {
                requested.block_size = value
                    .parse::<u16>()
                    .ok()
                    .filter(|size| *size >= MIN_BLOCK_SIZE);
            } else if name.eq_ignore_ascii_case(OPT_TIMEOUT) {
                requested.timeout = value.parse::<u8>().ok().filter(|secs| *secs >= 1);
            } else if name.eq_ignore_ascii_case(OPT_TSIZE) {
                requested.transfer_size = value.parse::<u64>().ok();
            } else {
                tracing::debug!(option = %name, "ignoring unsupported option");
            }
        }
        requested
    }

    /// Encode as request options (client side).
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(size) = self.block_size {
            pairs.push((OPT_BLKSIZE.to_string(), size.to_string()));
        }
        if let Some(secs) = self.timeout {
            pairs.push((OPT_TIMEOUT.to_string(), secs.to_string()));
        }
        if let Some(size) = self.transfer_size {
            pairs.push((OPT_TSIZE.to_string(), size.to_string()));
        }
        pairs
    }
}

/// Parameters in force for one transfer after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub block_size: usize,
    pub timeout: Option<Duration>,
}

impl Default for Negotiated {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE as usize,
            timeout: None,
        }
    }
}

/// Server side of negotiation. Returns the parameters to use and the option
/// pairs for the OACK; an empty list means no OACK is sent.
///
/// `tsize` is only acknowledged when `transfer_size` is known.
pub fn negotiate(
    requested: &RequestedOptions,
    max_block_size: u16,
    transfer_size: Option<u64>,
) -> (Negotiated, Vec<(String, String)>) {
    let mut negotiated = Negotiated::default();
    let mut oack = Vec::new();

    if let Some(size) = requested.block_size {
        let size = size.min(max_block_size).min(MAX_BLOCK_SIZE);
        negotiated.block_size = size as usize;
        oack.push((OPT_BLKSIZE.to_string(), size.to_string()));
    }
    if let Some(secs) = requested.timeout {
        negotiated.timeout = Some(Duration::from_secs(u64::from(secs)));
        oack.push((OPT_TIMEOUT.to_string(), secs.to_string()));
    }
    if requested.transfer_size.is_some() {
        if let Some(size) = transfer_size {
            oack.push((OPT_TSIZE.to_string(), size.to_string()));
        }
    }

    (negotiated, oack)
}

/// Client side: apply the values a server put in its OACK.
pub fn accept_oack(pairs: &[(String, String)]) -> (Negotiated, Option<u64>) {
    let acked = RequestedOptions::parse(pairs);
    let negotiated = Negotiated {
        block_size: acked
            .block_size
            .map(usize::from)
            .unwrap_or(DEFAULT_BLOCK_SIZE as usize),
        timeout: acked.timeout.map(|secs| Duration::from_secs(u64::from(secs))),
    };
    (negotiated, acked.transfer_size)
}

//! Engine configuration

use std::ops::RangeInclusive;
use std::time::Duration;

use gatelink_shared::limits;

/// Configuration for the exchange engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Request codes the allocator may hand out
    pub request_codes: RangeInclusive<u32>,
    /// How long `invoke` waits for an exchange to finish (`None` waits forever)
    pub reply_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_codes: limits::REQUEST_CODE_MIN..=limits::REQUEST_CODE_MAX,
            reply_timeout: Some(Duration::from_millis(limits::DEFAULT_REPLY_TIMEOUT_MS)),
        }
    }
}

impl EngineConfig {
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_request_codes(mut self, codes: RangeInclusive<u32>) -> Self {
        self.request_codes = codes;
        self
    }
}

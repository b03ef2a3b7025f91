use std::time::Duration;

/// Tunable knobs for a single socket, mirroring the getter/setter surface of
/// the original implementation's settings module. Unlike the original these
/// are plain fields on a value type rather than per-socket getter/setter
/// pairs; callers who want the original's incremental-tweak style can still
/// mutate a field and hand the struct to [`crate::socket::UtcpSocket::with_settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Timeout applied to every blocking receive while waiting for a
    /// control or data ACK.
    pub ack_timeout: Duration,
    /// Size in bytes of the receive ring buffer backing out-of-order
    /// reassembly. Also advertised to the peer as our receive window.
    pub rrb_size: u32,
    /// Maximum payload carried by a single segment.
    pub mss: usize,
    /// RST retries during active open before giving up (`connect`).
    pub connect_rst_retries: u32,
    /// SYN|ACK retries during passive open before giving up (`accept`).
    pub accept_synack_retries: u32,
    /// FIN|ACK retries during shutdown before giving up.
    pub shutdown_finack_retries: u32,
    /// Duration spent in TIME_WAIT after an active close completes.
    pub shutdown_time_wait: Duration,
}

/// Default receive window / ring-buffer size, matching `MICROTCP_WIN_SIZE`.
pub const DEFAULT_RRB_SIZE: u32 = 8192;
/// Default maximum segment size, matching `MICROTCP_MSS`.
pub const DEFAULT_MSS: usize = 1400;
/// Default ACK timeout, matching `MICROTCP_ACK_TIMEOUT_US`.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_micros(200_000);
/// Default TIME_WAIT duration, two Maximum Segment Lifetimes.
pub const DEFAULT_TIME_WAIT: Duration = Duration::from_secs(20);

impl Default for Settings {
    fn default() -> Self {
        Settings {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            rrb_size: DEFAULT_RRB_SIZE,
            mss: DEFAULT_MSS,
            connect_rst_retries: 3,
            accept_synack_retries: 5,
            shutdown_finack_retries: 15,
            shutdown_time_wait: DEFAULT_TIME_WAIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let s = Settings::default();
        assert_eq!(s.rrb_size, 8192);
        assert_eq!(s.mss, 1400);
        assert_eq!(s.ack_timeout, Duration::from_micros(200_000));
    }
}

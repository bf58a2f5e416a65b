use anyhow::bail;
use std::time::Duration;

/// Parameters of an SCP connection, frozen at connection creation.
///
/// None of these values can be changed while a connection is live: they size
///  buffers that are allocated up front and they shape the wire dialect. If
///  different parameters are needed, close the connection and open a new one.
pub struct ConnectionConfig {
    /// The maximum length (in bytes) of the SCP data field.
    ///
    /// This value should be chosen according to what the target devices
    ///  advertise; choosing it too big causes the remote to drop or mangle
    ///  packets, choosing it too small wastes round trips on bulk transfers.
    ///  Payloads submitted through `send_scp` that exceed this length are
    ///  silently truncated on the wire.
    pub scp_data_len: usize,

    /// How long to wait for a response before retransmitting.
    ///
    /// This timeout applies per transmission attempt, not per request: the
    ///  worst-case wall-clock time before a request fails is approximately
    ///  `n_attempts * timeout`.
    pub timeout: Duration,

    /// Number of transmission attempts (including the initial attempt)
    ///  before a request is failed with a timeout. Must be at least 1.
    pub n_attempts: u32,

    /// Number of packets which may simultaneously be awaiting responses.
    ///
    /// This is the size of the outstanding-slot table. Slot lookup is a
    ///  linear scan, so this is intended to stay small (a handful to a few
    ///  dozen slots saturates most links).
    pub n_outstanding: usize,

    /// Whether each datagram is preceded by two zero padding bytes.
    ///
    /// Deployed SCP-over-UDP dialects disagree on this point, so it is a
    ///  construction-time choice. It is applied symmetrically: padding is
    ///  prepended to every outbound datagram and stripped from every inbound
    ///  one.
    pub frame_padding: bool,
}

impl ConnectionConfig {
    /// A configuration with conservative defaults for the given SCP data
    ///  field length: 500 ms per attempt, 5 attempts, a window of 4 packets
    ///  and framing padding enabled.
    pub fn new(scp_data_len: usize) -> ConnectionConfig {
        ConnectionConfig {
            scp_data_len,
            timeout: Duration::from_millis(500),
            n_attempts: 5,
            n_outstanding: 4,
            frame_padding: true,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scp_data_len == 0 {
            bail!("SCP data field length must be non-zero");
        }
        if self.n_attempts == 0 {
            bail!("at least one transmission attempt must be allowed");
        }
        if self.n_outstanding == 0 {
            bail!("the outstanding window must hold at least one packet");
        }
        if self.n_outstanding > 1024 {
            // the window must stay small relative to the 16-bit sequence
            //  number space for response matching to be unambiguous
            bail!("the outstanding window is limited to 1024 packets");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConnectionConfig::new(256).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        let mut config = ConnectionConfig::new(0);
        assert!(config.validate().is_err());
        config.scp_data_len = 32;
        assert!(config.validate().is_ok());

        config.n_attempts = 0;
        assert!(config.validate().is_err());
        config.n_attempts = 1;

        config.n_outstanding = 0;
        assert!(config.validate().is_err());
        config.n_outstanding = 2048;
        assert!(config.validate().is_err());
        config.n_outstanding = 16;
        assert!(config.validate().is_ok());
    }
}

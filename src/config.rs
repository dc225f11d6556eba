//! Reactor configuration.
//!
//! Construction-time knobs for a reactor context, with environment-variable
//! overrides applied by [`ContextConfig::from_env`]:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `SPINDRIFT_QUEUE_DEPTH` | io_uring submission queue depth | 128 |
//! | `SPINDRIFT_EVENT_CAPACITY` | epoll events per wait call | 256 |

/// Listen backlog applied by every acceptor, on both backends.
pub const LISTEN_BACKLOG: libc::c_int = 16;

/// Default io_uring submission queue depth.
pub const DEFAULT_QUEUE_DEPTH: u32 = 128;

/// Default number of epoll events fetched per wait call.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Construction-time configuration for a reactor context.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    queue_depth: u32,
    event_capacity: usize,
}

impl ContextConfig {
    /// Creates a configuration with the defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Creates a configuration with environment overrides applied.
    ///
    /// Unset, empty or unparsable variables fall back to the defaults;
    /// zero values are rejected as unusable and also fall back.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Some(depth) = read_env::<u32>("SPINDRIFT_QUEUE_DEPTH") {
            config.queue_depth = depth;
        }
        if let Some(capacity) = read_env::<usize>("SPINDRIFT_EVENT_CAPACITY") {
            config.event_capacity = capacity;
        }
        config
    }

    /// Sets the io_uring submission queue depth.
    #[must_use]
    pub const fn queue_depth(mut self, depth: u32) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Sets the epoll event batch capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// The configured io_uring submission queue depth.
    #[must_use]
    pub const fn queue_depth_value(&self) -> u32 {
        self.queue_depth
    }

    /// The configured epoll event batch capacity.
    #[must_use]
    pub const fn event_capacity_value(&self) -> usize {
        self.event_capacity
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn read_env<T: std::str::FromStr + PartialEq + From<u8>>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let value = raw.trim().parse::<T>().ok()?;
    if value == T::from(0u8) {
        tracing::debug!(variable = name, "ignoring zero-valued override");
        return None;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ContextConfig::new();
        assert_eq!(config.queue_depth_value(), DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.event_capacity_value(), DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn builder_overrides() {
        let config = ContextConfig::new().queue_depth(64).event_capacity(32);
        assert_eq!(config.queue_depth_value(), 64);
        assert_eq!(config.event_capacity_value(), 32);
    }

    #[test]
    fn backlog_is_fixed() {
        assert_eq!(LISTEN_BACKLOG, 16);
    }
}

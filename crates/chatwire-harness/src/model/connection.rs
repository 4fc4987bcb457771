//! Model connection lifecycle.

use chatwire_core::{ConnectionConfig, ConnectionState};

use super::operation::ModelAction;

/// Reference connection lifecycle with millisecond timestamps.
#[derive(Debug, Clone)]
pub struct ModelConnection {
    state: ConnectionState,
    channel: Option<u64>,
    channels_opened: u64,
    retry: Option<u64>,
    retries_scheduled: u64,
    manual: bool,
    handshake_started: Option<u64>,
    last_received: Option<u64>,
    last_ping: Option<u64>,
    handshake_timeout: u64,
    heartbeat_interval: u64,
    heartbeat_timeout: u64,
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ModelConnection {
    /// Disconnected model using the timeouts from `config`.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            channel: None,
            channels_opened: 0,
            retry: None,
            retries_scheduled: 0,
            manual: false,
            handshake_started: None,
            last_received: None,
            last_ping: None,
            handshake_timeout: millis(config.handshake_timeout),
            heartbeat_interval: millis(config.heartbeat_interval),
            heartbeat_timeout: millis(config.heartbeat_timeout),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current channel number.
    pub fn channel(&self) -> Option<u64> {
        self.channel
    }

    /// Pending retry number.
    pub fn pending_retry(&self) -> Option<u64> {
        self.retry
    }

    /// Whether a manual disconnect is in effect.
    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Channels opened so far; also the latest channel number.
    pub fn channels_opened(&self) -> u64 {
        self.channels_opened
    }

    /// Retries scheduled so far; also the latest retry number.
    pub fn retries_scheduled(&self) -> u64 {
        self.retries_scheduled
    }

    /// Explicit connect. `admissible` is whether a credential exists and the
    /// current page is not authentication-only.
    pub fn connect(&mut self, admissible: bool, now: u64) -> Vec<ModelAction> {
        self.manual = false;
        let mut actions = Vec::new();
        if self.state != ConnectionState::Disconnected || !admissible {
            return actions;
        }

        if let Some(retry) = self.retry.take() {
            actions.push(ModelAction::Cancel { retry });
        }
        self.open(now, &mut actions);
        actions
    }

    /// Retry timer `retry` fired.
    pub fn retry_elapsed(&mut self, retry: u64, admissible: bool, now: u64) -> Vec<ModelAction> {
        let mut actions = Vec::new();
        if self.retry != Some(retry) {
            return actions;
        }
        self.retry = None;

        if !self.manual && self.state == ConnectionState::Disconnected && admissible {
            self.open(now, &mut actions);
        }
        actions
    }

    /// Opening `channel` failed.
    pub fn open_failed(&mut self, channel: u64) -> Vec<ModelAction> {
        let mut actions = Vec::new();
        if self.channel == Some(channel) && self.state == ConnectionState::Connecting {
            self.lose(false, &mut actions);
        }
        actions
    }

    /// Handshake on `channel` acknowledged.
    pub fn acknowledge(&mut self, channel: u64, now: u64) -> Vec<ModelAction> {
        if self.channel == Some(channel) && self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
            self.handshake_started = None;
            self.last_received = Some(now);
            self.last_ping = Some(now);
        }
        Vec::new()
    }

    /// Handshake on `channel` refused.
    pub fn reject(&mut self, channel: u64) -> Vec<ModelAction> {
        let mut actions = Vec::new();
        if self.channel == Some(channel) && self.state == ConnectionState::Connecting {
            self.lose(true, &mut actions);
        }
        actions
    }

    /// Something arrived on `channel`.
    pub fn receive(&mut self, channel: u64, now: u64) -> Vec<ModelAction> {
        if self.channel == Some(channel) && self.state == ConnectionState::Connected {
            self.last_received = Some(now);
            vec![ModelAction::Deliver { channel }]
        } else {
            Vec::new()
        }
    }

    /// The transport closed `channel`.
    pub fn close(&mut self, channel: u64) -> Vec<ModelAction> {
        let mut actions = Vec::new();
        if self.channel == Some(channel) {
            self.lose(false, &mut actions);
        }
        actions
    }

    /// Manual disconnect.
    pub fn disconnect(&mut self) -> Vec<ModelAction> {
        let mut actions = Vec::new();
        self.manual = true;
        if let Some(retry) = self.retry.take() {
            actions.push(ModelAction::Cancel { retry });
        }
        if let Some(channel) = self.channel.take() {
            actions.push(ModelAction::Close { channel });
        }
        self.reset_timers();
        self.state = ConnectionState::Disconnected;
        actions
    }

    /// Timeout processing at `now`.
    pub fn tick(&mut self, now: u64) -> Vec<ModelAction> {
        let mut actions = Vec::new();
        let Some(channel) = self.channel else {
            return actions;
        };

        match self.state {
            ConnectionState::Connecting => {
                if self.handshake_started.is_some_and(|t| now - t >= self.handshake_timeout) {
                    self.lose(true, &mut actions);
                }
            },
            ConnectionState::Connected => {
                if self.last_received.is_some_and(|t| now - t >= self.heartbeat_timeout) {
                    self.lose(true, &mut actions);
                } else if self.last_ping.is_some_and(|t| now - t >= self.heartbeat_interval) {
                    self.last_ping = Some(now);
                    actions.push(ModelAction::Ping { channel });
                }
            },
            ConnectionState::Disconnected => {},
        }
        actions
    }

    fn open(&mut self, now: u64, actions: &mut Vec<ModelAction>) {
        self.channels_opened += 1;
        self.channel = Some(self.channels_opened);
        self.state = ConnectionState::Connecting;
        self.handshake_started = Some(now);
        actions.push(ModelAction::Open { channel: self.channels_opened });
    }

    fn lose(&mut self, close: bool, actions: &mut Vec<ModelAction>) {
        let Some(channel) = self.channel.take() else {
            return;
        };
        if close {
            actions.push(ModelAction::Close { channel });
        }
        self.reset_timers();
        self.state = ConnectionState::Disconnected;

        if !self.manual && self.retry.is_none() {
            self.retries_scheduled += 1;
            self.retry = Some(self.retries_scheduled);
            actions.push(ModelAction::Schedule { retry: self.retries_scheduled });
        }
    }

    fn reset_timers(&mut self) {
        self.handshake_started = None;
        self.last_received = None;
        self.last_ping = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelConnection {
        ModelConnection::new(&ConnectionConfig::default())
    }

    #[test]
    fn close_then_retry_reopens() {
        let mut m = model();
        assert_eq!(m.connect(true, 0), [ModelAction::Open { channel: 1 }]);
        assert!(m.acknowledge(1, 10).is_empty());
        assert_eq!(m.close(1), [ModelAction::Schedule { retry: 1 }]);
        assert!(m.close(1).is_empty());
        assert_eq!(m.retry_elapsed(1, true, 3_010), [ModelAction::Open { channel: 2 }]);
    }

    #[test]
    fn heartbeat_then_timeout() {
        let mut m = model();
        m.connect(true, 0);
        m.acknowledge(1, 0);
        assert_eq!(m.tick(25_000), [ModelAction::Ping { channel: 1 }]);
        assert!(m.tick(26_000).is_empty());
        assert_eq!(
            m.tick(60_000),
            [ModelAction::Close { channel: 1 }, ModelAction::Schedule { retry: 1 }]
        );
    }

    #[test]
    fn disconnect_cancels_retry() {
        let mut m = model();
        m.connect(true, 0);
        m.open_failed(1);
        assert_eq!(m.disconnect(), [ModelAction::Cancel { retry: 1 }]);
        assert!(m.retry_elapsed(1, true, 5_000).is_empty());
        assert!(m.is_manual());
    }
}

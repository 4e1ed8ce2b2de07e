/// A logical retransmission timer advanced only by explicit ticks.
///
/// The timer is started when a segment occupying sequence space is sent and
/// no timer is running, restarted on every ack of new data, and stopped once
/// nothing remains outstanding. On expiry the timeout (RTO) is doubled
/// by the owner as long as the peer's window is open.
#[derive(Debug)]
pub struct RetransmissionTimer {
    initial_rto: u64,

    /// Current retransmission timeout in milliseconds
    rto: u64,

    /// Milliseconds elapsed since the timer was (re)started
    elapsed: u64,

    running: bool,
}

impl RetransmissionTimer {
    pub fn new(initial_rto: u64) -> Self {
        Self {
            initial_rto,
            rto: initial_rto,
            elapsed: 0,
            running: false,
        }
    }

    pub fn start(&mut self) {
        self.elapsed = 0;
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.elapsed = 0;
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn rto(&self) -> u64 {
        self.rto
    }

    pub fn reset_rto(&mut self) {
        self.rto = self.initial_rto;
    }

    pub fn double_rto(&mut self) {
        self.rto = self.rto.saturating_mul(2);
    }

    /// Advances the timer, returning true if it expired.
    /// An expired timer is stopped until started again.
    pub fn expired(&mut self, ms_since_last_tick: u64) -> bool {
        if !self.running {
            return false;
        }

        self.elapsed = self.elapsed.saturating_add(ms_since_last_tick);

        if self.elapsed >= self.rto {
            self.stop();
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_not_running_never_expires() {
        let mut timer = RetransmissionTimer::new(100);

        assert_eq!(timer.expired(1000), false);
        assert_eq!(timer.is_running(), false);
    }

    #[test]
    fn test_timer_expires_after_rto() {
        let mut timer = RetransmissionTimer::new(100);

        timer.start();

        assert_eq!(timer.expired(99), false);
        assert_eq!(timer.expired(1), true);
        assert_eq!(timer.is_running(), false);
    }

    #[test]
    fn test_timer_restart_resets_elapsed() {
        let mut timer = RetransmissionTimer::new(100);

        timer.start();
        timer.expired(90);
        timer.start();

        assert_eq!(timer.expired(90), false);
        assert_eq!(timer.expired(10), true);
    }

    #[test]
    fn test_double_and_reset_rto() {
        let mut timer = RetransmissionTimer::new(100);

        timer.double_rto();
        timer.double_rto();
        assert_eq!(timer.rto(), 400);

        timer.start();
        assert_eq!(timer.expired(399), false);
        assert_eq!(timer.expired(1), true);

        timer.reset_rto();
        assert_eq!(timer.rto(), 100);
    }
}

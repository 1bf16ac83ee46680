use std::time::{Duration, Instant};

/// Token bucket guarding one connection's inbound messages.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tokens: f64,
    max_tokens: u32,
    refill_rate: Duration,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::new_with_limits(30, Duration::from_secs(2))
    }

    /// `refill_rate` is the time it takes to earn back one token.
    pub fn new_with_limits(max_tokens: u32, refill_rate: Duration) -> Self {
        Self {
            tokens: max_tokens as f64,
            max_tokens,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    pub fn check_rate_limit(&mut self) -> bool {
        self.refill_tokens();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill_tokens(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.last_refill = now;

        if self.refill_rate.is_zero() {
            self.tokens = self.max_tokens as f64;
            return;
        }

        // Partial tokens carry over, so sub-second refill rates work too
        let earned = elapsed.as_secs_f64() / self.refill_rate.as_secs_f64();
        self.tokens = (self.tokens + earned).min(self.max_tokens as f64);
    }

    pub fn get_remaining_tokens(&mut self) -> u32 {
        self.refill_tokens();
        self.tokens.floor() as u32
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

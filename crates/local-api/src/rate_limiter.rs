use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use chatrelay_common::{Error, Result};
use chatrelay_config::LimitsConfig;

const IDLE_EVICTION: Duration = Duration::from_secs(300);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Token bucket refilled continuously at `refill_rate` tokens per second
#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate: capacity as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn has_token(&mut self) -> bool {
        self.refill();
        self.tokens >= 1.0
    }

    fn consume(&mut self) {
        self.tokens -= 1.0;
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate)
            .min(self.capacity as f64);
        self.last_refill = now;
    }
}

#[derive(Debug)]
struct ClientState {
    bucket: TokenBucket,
    in_flight: usize,
    last_seen: Instant,
}

/// Limits how often a client may start a relay. Every relay spends provider
/// tokens, so both the rate and the number in flight are capped per IP.
#[derive(Clone)]
pub struct RateLimiter {
    config: LimitsConfig,
    clients: Arc<RwLock<HashMap<IpAddr, ClientState>>>,
    global_bucket: Arc<RwLock<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(config: LimitsConfig) -> Self {
        let limiter = Self {
            global_bucket: Arc::new(RwLock::new(TokenBucket::per_minute(config.global_per_minute))),
            clients: Arc::new(RwLock::new(HashMap::new())),
            config,
        };

        let limiter_clone = limiter.clone();
        tokio::spawn(async move {
            limiter_clone.cleanup_loop().await;
        });

        limiter
    }

    /// Admit one relay from `ip`. The returned slot releases itself on drop.
    pub async fn acquire(&self, ip: IpAddr) -> Result<RelaySlot> {
        let mut clients = self.clients.write().await;
        let state = clients.entry(ip).or_insert_with(|| ClientState {
            bucket: TokenBucket::per_minute(self.config.per_ip_per_minute),
            in_flight: 0,
            last_seen: Instant::now(),
        });
        state.last_seen = Instant::now();

        if state.in_flight >= self.config.max_concurrent_per_ip {
            return Err(Error::RateLimitExceeded);
        }

        // A client over its own limit must not spend the shared budget
        if !state.bucket.has_token() {
            return Err(Error::RateLimitExceeded);
        }

        let mut global = self.global_bucket.write().await;
        if !global.has_token() {
            return Err(Error::RateLimitExceeded);
        }

        global.consume();
        state.bucket.consume();
        state.in_flight += 1;
        Ok(RelaySlot {
            limiter: self.clone(),
            ip,
        })
    }

    async fn release(&self, ip: IpAddr) {
        let mut clients = self.clients.write().await;
        if let Some(state) = clients.get_mut(&ip) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    /// Relays currently in flight for `ip`
    pub async fn in_flight(&self, ip: IpAddr) -> usize {
        self.clients
            .read()
            .await
            .get(&ip)
            .map_or(0, |state| state.in_flight)
    }

    async fn cleanup_loop(&self) {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;

            let mut clients = self.clients.write().await;
            let now = Instant::now();

            clients.retain(|_, state| {
                now.duration_since(state.last_seen) < IDLE_EVICTION || state.in_flight > 0
            });
        }
    }
}

/// RAII guard for one admitted relay
pub struct RelaySlot {
    limiter: RateLimiter,
    ip: IpAddr,
}

impl Drop for RelaySlot {
    fn drop(&mut self) {
        let limiter = self.limiter.clone();
        let ip = self.ip;

        tokio::spawn(async move {
            limiter.release(ip).await;
        });
    }
}

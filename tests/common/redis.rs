//! Redis helpers for backend tests
//!
//! Tests use a real Redis when one is reachable and skip otherwise. Every
//! `TestRedis` hands out user ids and stream names under its own namespace
//! and deletes what it handed out in `cleanup`.
//!
//! ```rust,ignore
//! let redis = skip_if_no_redis!();
//! let store = RedisUsageStore::new(redis.conn());
//! let user_id = redis.user_id("alice");
//! // ...
//! redis.cleanup().await;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use augur::usage::redis_store::keys;

/// Redis used when `TEST_REDIS_URL` is not set
pub const DEFAULT_TEST_REDIS_URL: &str = "redis://127.0.0.1:6379";

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// URL of the Redis the backend tests run against
pub fn test_redis_url() -> String {
    std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| DEFAULT_TEST_REDIS_URL.to_string())
}

/// Namespaced handle on a test Redis
pub struct TestRedis {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
    namespace: String,
    tracked_keys: Mutex<Vec<String>>,
}

impl TestRedis {
    /// Connect to the test Redis, or `None` if it is not reachable
    pub async fn connect() -> Option<Self> {
        let client = redis::Client::open(test_redis_url()).ok()?;
        let mut conn = client.get_connection_manager().await.ok()?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await.ok()?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);

        Some(Self {
            client,
            conn,
            namespace: format!("augur_test_{}_{}", timestamp, counter),
            tracked_keys: Mutex::new(Vec::new()),
        })
    }

    /// A fresh connection handle; each one may be used by a separate task
    pub fn conn(&self) -> redis::aio::ConnectionManager {
        self.conn.clone()
    }

    /// A connection of its own, for consumers that issue blocking reads
    pub async fn dedicated_conn(&self) -> redis::aio::ConnectionManager {
        self.client
            .get_connection_manager()
            .await
            .expect("Failed to open a second Redis connection")
    }

    fn track(&self, key: String) {
        self.tracked_keys.lock().unwrap().push(key);
    }

    /// User id unique to this test, with its usage hash tracked for cleanup
    pub fn user_id(&self, name: &str) -> String {
        let user_id = format!("{}_{}", self.namespace, name);
        self.track(keys::usage_record(&user_id));
        user_id
    }

    /// Stream name unique to this test, tracked for cleanup
    pub fn stream(&self, name: &str) -> String {
        let stream = format!("{}:{}", self.namespace, name);
        self.track(stream.clone());
        stream
    }

    /// Delete every key handed out by this helper
    pub async fn cleanup(&self) {
        let keys: Vec<String> = self.tracked_keys.lock().unwrap().clone();
        if keys.is_empty() {
            return;
        }
        let mut conn = self.conn.clone();
        let _: redis::RedisResult<()> = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await;
    }
}

/// Connect to the test Redis or return early from the test
#[macro_export]
macro_rules! skip_if_no_redis {
    () => {
        match $crate::common::redis::TestRedis::connect().await {
            Some(r) => r,
            None => {
                eprintln!(
                    "Skipping test: Redis not available at {}",
                    $crate::common::redis::test_redis_url()
                );
                return;
            }
        }
    };
}

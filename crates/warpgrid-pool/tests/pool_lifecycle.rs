//! Pool lifecycle integration tests.
//!
//! Exercise the pool end to end: TOML config, scheduled resizer sweeps on a
//! real runtime, concurrent borrowers, thread-affine storage, and
//! reconfiguration proxies.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use warpgrid_pool::{
    HandleId, PoolConfig, PoolError, ResourceAllocator, ResourceHandle, ResourcePool, StorageKind,
};
use warpgrid_reconfig::{DelegateLookup, LookupOptions, ReconfigError, ReconfigProxy, ReconfigResult};

#[derive(Default)]
struct Connections {
    created: AtomicU64,
    destroyed: AtomicU64,
    validating: bool,
    broken: Mutex<HashSet<u64>>,
}

impl ResourceAllocator<u64> for Connections {
    fn create(&self) -> anyhow::Result<u64> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    fn supports_validation(&self) -> bool {
        self.validating
    }

    fn find_invalid(&self, candidates: &[Arc<ResourceHandle<u64>>]) -> anyhow::Result<HashSet<HandleId>> {
        let broken = self.broken.lock().unwrap();
        Ok(candidates
            .iter()
            .filter(|h| broken.contains(h.resource()))
            .map(|h| h.id())
            .collect())
    }

    fn destroy(&self, _resource: &u64) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

fn init() {
    warpgrid_pool::init_tracing(warpgrid_pool::telemetry::DEFAULT_DIRECTIVES);
}

async fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

#[test]
fn pool_from_toml_config() {
    init();
    let config = PoolConfig::from_toml_str(
        r#"
        steady_pool_size = 2
        max_pool_size = 4
        resize_quantity = 1
        idle_timeout = "0s"
        max_wait = "250ms"
        storage = "thread-affine"
        "#,
    )
    .unwrap();
    assert_eq!(config.max_wait, Duration::from_millis(250));

    let alloc = Arc::new(Connections::default());
    let pool = ResourcePool::<u64>::new("jdbc/inventory", config, alloc.clone()).unwrap();
    pool.init().unwrap();
    assert_eq!(pool.status().total, 2);
    assert_eq!(alloc.created.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_resizer_evicts_idle_resources() {
    init();
    let config = PoolConfig {
        steady_pool_size: 1,
        max_pool_size: 4,
        resize_quantity: 2,
        idle_timeout: Duration::from_millis(50),
        ..PoolConfig::default()
    };
    let alloc = Arc::new(Connections::default());
    let pool = ResourcePool::<u64>::new("jdbc/orders", config, alloc.clone()).unwrap();
    pool.init().unwrap();
    assert!(pool.is_resizer_scheduled());

    let held: Vec<_> = (0..3).map(|_| pool.try_acquire().unwrap().unwrap()).collect();
    for h in held {
        pool.release(h).unwrap();
    }
    assert_eq!(pool.status().total, 3);

    let evicted = wait_until(Duration::from_secs(3), || {
        alloc.destroyed.load(Ordering::SeqCst) >= 2
    })
    .await;
    assert!(evicted, "resizer never evicted idle resources");
    assert!(pool.status().total <= 3);

    pool.shutdown();
    assert!(!pool.is_resizer_scheduled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_resizer_removes_invalid_resources() {
    init();
    let config = PoolConfig {
        steady_pool_size: 2,
        max_pool_size: 4,
        resize_quantity: 0,
        idle_timeout: Duration::from_millis(40),
        ..PoolConfig::default()
    };
    let alloc = Arc::new(Connections {
        validating: true,
        ..Connections::default()
    });
    let pool = ResourcePool::<u64>::new("jdbc/ledger", config, alloc.clone()).unwrap();
    pool.init().unwrap();

    // Mark the first connection broken; keep the pool warm so nothing idles out.
    alloc.broken.lock().unwrap().insert(0);
    let replaced = wait_until(Duration::from_secs(3), || {
        if let Ok(Some(h)) = pool.try_acquire() {
            pool.release(h).unwrap();
        }
        alloc.destroyed.load(Ordering::SeqCst) >= 1
    })
    .await;
    assert!(replaced, "broken resource was never removed");
    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_borrowers_share_a_bounded_pool() {
    init();
    let config = PoolConfig {
        steady_pool_size: 1,
        max_pool_size: 3,
        idle_timeout: Duration::ZERO,
        ..PoolConfig::default()
    };
    let alloc = Arc::new(Connections::default());
    let pool = Arc::new(ResourcePool::<u64>::new("jdbc/orders", config, alloc.clone()).unwrap());
    pool.init().unwrap();

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let h = pool.acquire_timeout(Duration::from_secs(5)).await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.release(h)
            })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let status = pool.status();
    assert!(status.total <= 3);
    assert_eq!(status.busy, 0);
    assert_eq!(status.waiting, 0);
    assert!(alloc.created.load(Ordering::SeqCst) <= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn thread_affine_pool_returns_each_thread_its_own_resource() {
    init();
    let config = PoolConfig {
        steady_pool_size: 2,
        max_pool_size: 2,
        idle_timeout: Duration::from_secs(3600),
        storage: StorageKind::ThreadAffine,
        ..PoolConfig::default()
    };
    let pool = Arc::new(ResourcePool::<u64>::new("jms/queue", config, Arc::new(Connections::default())).unwrap());
    pool.init().unwrap();

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let first = pool.try_acquire().unwrap().unwrap();
                let id = first.id();
                pool.release(first).unwrap();
                for _ in 0..20 {
                    let h = pool.try_acquire().unwrap().unwrap();
                    assert_eq!(h.id(), id);
                    pool.release(h).unwrap();
                }
                id
            })
        })
        .collect();
    let ids: HashSet<HandleId> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(ids.len(), 2);

    // Both resources are bound to the workers; at max size this thread
    // takes one over instead of waiting.
    let taken = pool.try_acquire().unwrap().unwrap();
    assert!(ids.contains(&taken.id()));
    assert_eq!(taken.state().owner(), Some(thread::current().id()));
    pool.release(taken).unwrap();

    // A sweep releases the remaining association without evicting anything.
    let report = pool.resize(false);
    assert_eq!(report.removed(), 0);
    let status = pool.status();
    assert_eq!((status.total, status.free), (2, 2));
    pool.shutdown();
}

struct Session {
    pool_version: i64,
    closed: AtomicBool,
}

impl warpgrid_reconfig::Delegate for Session {
    type Request = &'static str;
    type Response = String;

    fn execute(&self, request: &&'static str) -> ReconfigResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ReconfigError::Reconfigured("jdbc/orders".into()));
        }
        Ok(format!("{request} v{}", self.pool_version))
    }
}

#[test]
fn proxy_survives_reconfiguration_and_dies_with_pool() {
    init();
    let config = PoolConfig {
        steady_pool_size: 1,
        max_pool_size: 2,
        idle_timeout: Duration::ZERO,
        ..PoolConfig::default()
    };
    let pool = Arc::new(ResourcePool::<u64>::new("jdbc/orders", config.clone(), Arc::new(Connections::default())).unwrap());
    pool.init().unwrap();

    let lookup: Arc<dyn DelegateLookup<Session>> = {
        let pool = Arc::clone(&pool);
        Arc::new(move |_: &str, options: &LookupOptions| -> ReconfigResult<Arc<Session>> {
            assert!(options.skip_proxy);
            Ok(Arc::new(Session {
                pool_version: pool.version(),
                closed: AtomicBool::new(false),
            }))
        })
    };
    let first = Arc::new(Session {
        pool_version: pool.version(),
        closed: AtomicBool::new(false),
    });
    let proxy = ReconfigProxy::new(pool.name(), Arc::clone(&first), pool.version(), pool.reconfig_context(lookup));

    assert_eq!(proxy.call(&"select").unwrap(), "select v1");

    // Without a new pool version the retry hits the same closed session.
    first.closed.store(true, Ordering::SeqCst);
    assert!(proxy.call(&"select").unwrap_err().is_reconfigured());

    pool.reconfigure(PoolConfig {
        max_pool_size: 3,
        ..config
    })
    .unwrap();
    assert_eq!(proxy.call(&"select").unwrap(), "select v2");
    assert_eq!(proxy.version(), 2);

    pool.shutdown();
    let err = proxy.call(&"select").unwrap_err();
    assert!(matches!(err, ReconfigError::ResourceInvalid(_)));
    assert!(matches!(pool.try_acquire(), Err(PoolError::ShutDown(_))));
}

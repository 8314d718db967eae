use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use quarry_client::HtmdCleaner;
use quarry_core::testutil::MockStrategy;
use quarry_core::{
    BatchCoordinator, CacheManager, Orchestrator, OrchestratorSettings, RateLimiter, RetryPolicy,
    StrategyKind,
};
use quarry_server::routes;
use quarry_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

pub const ARTICLE: &str =
    "<html><head><title>Quarry Test</title></head><body><h1>Hello</h1><p>Plenty of words here.</p></body></html>";

pub struct TestApp {
    pub router: Router,
    pub simple: MockStrategy,
}

/// Router backed by mock strategies and the real HTML cleaner.
pub fn setup_test_app(simple: MockStrategy) -> TestApp {
    setup_with_key(simple, TEST_API_KEY)
}

pub fn setup_test_app_no_auth() -> TestApp {
    setup_with_key(MockStrategy::new(StrategyKind::Simple, ARTICLE), "")
}

fn setup_with_key(simple: MockStrategy, api_key: &str) -> TestApp {
    let limiter = RateLimiter::new(100, Duration::from_secs(60)).unwrap();
    let cache = CacheManager::new(Duration::from_secs(300), Some(100));
    let orchestrator = Orchestrator::new(
        HtmdCleaner::new(),
        limiter,
        cache,
        RetryPolicy::default(),
        OrchestratorSettings::default(),
    )
    .with_strategy(simple.clone().into_arc())
    .with_strategy(MockStrategy::new(StrategyKind::Framework, ARTICLE).into_arc());

    let batch = BatchCoordinator::new(Arc::new(orchestrator), 2, 3).unwrap();
    let state = Arc::new(AppState::new(batch, api_key));

    TestApp {
        router: routes::router(state),
        simple,
    }
}

//! Test helpers and utilities for integration tests

use menu_pipeline::domain::{Menu, Product, ProductAttributes, ProductStatus};
use menu_pipeline::orchestrator::{MenuOrchestrator, ProductOrchestrator};
use menu_pipeline::sheets::Row;
use menu_pipeline::store::MenuStore;
use menu_pipeline::testing::{FlakyStore, MockSheetSource};
use menu_pipeline::transport::InMemoryQueue;
use menu_pipeline::worker::{PipelineWorker, RetryPolicy, WorkerHandle, WorkerOptions};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[allow(dead_code)]
pub const RESTAURANT: &str = "Burger House";
#[allow(dead_code)]
pub const BURGER_EXT_ID: &str = "1001000";

/// Every component wired over in-memory backends
#[allow(dead_code)]
pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub source: Arc<MockSheetSource>,
    pub queue: InMemoryQueue,
    pub menus: Arc<MenuOrchestrator>,
    pub products: Arc<ProductOrchestrator>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(source: MockSheetSource) -> Self {
        let store = Arc::new(FlakyStore::new());
        let source = Arc::new(source);
        let queue = InMemoryQueue::new();

        let menus = Arc::new(MenuOrchestrator::new(
            store.clone(),
            store.clone(),
            source.clone(),
            Arc::new(queue.clone()),
        ));
        let products = Arc::new(ProductOrchestrator::new(
            store.clone(),
            store.clone(),
            Arc::new(queue.clone()),
        ));

        Self {
            store,
            source,
            queue,
            menus,
            products,
        }
    }

    pub fn worker(&self, options: WorkerOptions) -> Arc<PipelineWorker> {
        Arc::new(PipelineWorker::new(
            self.menus.clone(),
            self.products.clone(),
            Arc::new(self.queue.clone()),
            options,
        ))
    }

    pub async fn start_worker(&self) -> WorkerHandle {
        self.worker(fast_options())
            .start(CancellationToken::new())
            .await
            .unwrap()
    }

    /// Persist a menu with one available burger and return its id
    pub async fn seed_menu(&self) -> String {
        let menu = Menu::new(RESTAURANT, vec![burger()], Vec::new(), Vec::new());
        self.store.inner().create_menu(menu).await.unwrap().id.unwrap()
    }
}

/// Default policy with a millisecond backoff unit
#[allow(dead_code)]
pub fn fast_options() -> WorkerOptions {
    WorkerOptions {
        retry: RetryPolicy {
            backoff_unit: Duration::from_millis(1),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn burger() -> Product {
    Product {
        ext_id: BURGER_EXT_ID.to_string(),
        name: "Burger".to_string(),
        price: 9.99,
        price_old: Some(12.99),
        status: ProductStatus::Available,
        attributes: ProductAttributes::default(),
    }
}

/// Row with the given text cells, padded to eight columns
#[allow(dead_code)]
pub fn row(cells: &[&str]) -> Row {
    let mut row: Row = cells.iter().map(|c| Value::String(c.to_string())).collect();
    while row.len() < 8 {
        row.push(Value::String(String::new()));
    }
    row
}

/// One burger with a spicy option and an empty trailer row
#[allow(dead_code)]
pub fn burger_rows() -> Vec<Row> {
    vec![
        row(&["", "Burger", "", "9.99", "12.99", "", "", "Spicy"]),
        row(&[]),
    ]
}

/// Poll `check` until it holds or `timeout` passes
#[allow(dead_code)]
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

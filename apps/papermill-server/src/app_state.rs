use papermill_engine::Executor;
use papermill_store::Store;

#[derive(Clone)]
pub(crate) struct AppState {
    store: Store,
    executor: Executor,
}

impl AppState {
    pub fn new(store: Store, executor: Executor) -> Self {
        Self { store, executor }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

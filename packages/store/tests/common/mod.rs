//! Shared setup: two stores wired over an in-process channel pair.

use std::sync::Arc;

use tether_store::channel::LoopbackChannel;
use tether_store::{ObjectStore, Options};

pub fn pair() -> (Arc<ObjectStore>, Arc<ObjectStore>) {
    pair_with(Options::default(), Options::default())
}

pub fn pair_with(
    left_options: Options,
    right_options: Options,
) -> (Arc<ObjectStore>, Arc<ObjectStore>) {
    let (left, right) = LoopbackChannel::pair();
    let left_store = Arc::new(ObjectStore::new(left.clone(), left_options));
    let right_store = Arc::new(ObjectStore::new(right.clone(), right_options));
    left.connect(left_store.clone());
    right.connect(right_store.clone());
    (left_store, right_store)
}

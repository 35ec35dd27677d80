// Gateway file for the integration tests under retrieval/

#[path = "retrieval/common.rs"]
mod common;

#[path = "retrieval/test_sharded_search.rs"]
mod test_sharded_search;

#[path = "retrieval/test_persistence.rs"]
mod test_persistence;

#[path = "retrieval/test_admission.rs"]
mod test_admission;

#[path = "retrieval/test_streaming.rs"]
mod test_streaming;

//! Integration tests for the exam generation pipeline

mod admission_concurrency;
mod generation_pipeline;
mod quota_accounting;
mod test_utils;

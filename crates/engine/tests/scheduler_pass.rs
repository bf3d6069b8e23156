//! Scheduler pass properties: bounded concurrency, in-flight dedup, cache
//! behavior, completion guarantees.

mod common;

use std::{sync::Arc, time::Duration};

use codehist_core::FileFacts;
use engine::{BlobCache, InMemoryStore, JobScheduler, PassError, WorkerPool};
use pretty_assertions::assert_eq;

use common::{Behavior, Fixture, StubRunner, facts};

fn pool(n: usize) -> WorkerPool {
  WorkerPool::for_endpoints((0..n).map(|i| format!("stub-{i}")).collect())
}

async fn cache_in(dir: &tempfile::TempDir) -> BlobCache {
  BlobCache::open(dir.path(), 1_000).await.unwrap()
}

#[tokio::test]
async fn pool_of_one_serializes_two_files() {
  let mut fx = Fixture::new();
  let id1 = fx.blob("<?php class a {}", "a");
  let id2 = fx.blob("<?php class b {}", "b");
  fx.revision("r1", &[("a.php", &id1), ("b.php", &id2)]);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(fx.behaviors, Duration::from_millis(10));
  let mut pool = pool(1);

  let report = JobScheduler::new("r1", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .run()
    .await
    .unwrap();

  assert_eq!(runner.dispatches(), 2);
  // Never both in flight with a single slot.
  assert_eq!(runner.peak_concurrency(), 1);
  assert_eq!(report.files["a.php"], FileFacts::Analysed { facts: facts("a") });
  assert_eq!(report.files["b.php"], FileFacts::Analysed { facts: facts("b") });
  // Both results are memoized for later revisions.
  assert_eq!(cache.get(&id1).await, Some(facts("a")));
  assert_eq!(cache.get(&id2).await, Some(facts("b")));
}

#[tokio::test]
async fn second_revision_resolves_purely_from_cache() {
  let mut fx = Fixture::new();
  let id1 = fx.blob("<?php class a {}", "a");
  let id2 = fx.blob("<?php class b {}", "b");
  fx.revision("r1", &[("a.php", &id1), ("b.php", &id2)]);
  // Same content ids, one under a new path.
  fx.revision("r2", &[("a.php", &id1), ("c.php", &id2)]);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(fx.behaviors, Duration::from_millis(5));
  let store = Arc::new(fx.store);
  let mut pool = pool(2);

  JobScheduler::new("r1", store.clone(), &cache, &mut pool, runner.clone())
    .run()
    .await
    .unwrap();
  assert_eq!(runner.dispatches(), 2);

  let report = JobScheduler::new("r2", store, &cache, &mut pool, runner.clone())
    .run()
    .await
    .unwrap();

  // Zero additional worker dispatches: both ids come from the blob cache.
  assert_eq!(runner.dispatches(), 2);
  assert_eq!(report.files["a.php"], FileFacts::Analysed { facts: facts("a") });
  assert_eq!(report.files["c.php"], FileFacts::Analysed { facts: facts("b") });
}

#[tokio::test]
async fn concurrency_is_bounded_by_pool_size() {
  let mut fx = Fixture::new();
  let ids: Vec<_> = (0..5)
    .map(|i| fx.blob(&format!("<?php class c{i} {{}}"), &format!("c{i}")))
    .collect();
  let files: Vec<(String, _)> = ids.iter().enumerate().map(|(i, id)| (format!("f{i}.php"), id)).collect();
  let file_refs: Vec<(&str, &_)> = files.iter().map(|(p, id)| (p.as_str(), *id)).collect();
  fx.revision("r1", &file_refs);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(fx.behaviors, Duration::from_millis(20));
  let mut pool = pool(2);

  let report = JobScheduler::new("r1", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .run()
    .await
    .unwrap();

  assert_eq!(report.len(), 5);
  assert_eq!(runner.dispatches(), 5);
  assert_eq!(runner.peak_concurrency(), 2);
}

#[tokio::test]
async fn duplicate_content_id_dispatches_once_and_fans_out() {
  let mut fx = Fixture::new();
  let shared = fx.blob("<?php class shared {}", "shared");
  let other = fx.blob("<?php class other {}", "other");
  fx.revision(
    "r1",
    &[("lib/a.php", &shared), ("lib/copy_of_a.php", &shared), ("lib/b.php", &other)],
  );

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(fx.behaviors, Duration::from_millis(20));
  let mut pool = pool(2);

  let report = JobScheduler::new("r1", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .run()
    .await
    .unwrap();

  // Exactly one round trip for the shared id, fanned out to both paths.
  assert_eq!(runner.dispatches_for(&shared), 1);
  assert_eq!(report.len(), 3);
  assert_eq!(
    report.files["lib/a.php"],
    FileFacts::Analysed { facts: facts("shared") }
  );
  assert_eq!(report.files["lib/copy_of_a.php"], report.files["lib/a.php"]);
}

#[tokio::test]
async fn empty_revision_completes_with_empty_report() {
  let mut fx = Fixture::new();
  fx.revision("empty", &[]);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(Default::default(), Duration::ZERO);
  let mut pool = pool(2);

  let report = JobScheduler::new("empty", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .run()
    .await
    .unwrap();

  assert!(report.is_empty());
  assert_eq!(runner.dispatches(), 0);
}

#[tokio::test]
async fn analysis_failure_is_recorded_and_slot_released() {
  let mut fx = Fixture::new();
  let bad = fx.blob_with("<?php syntax error", Behavior::AnalysisError("unparseable".into()));
  let good = fx.blob("<?php class good {}", "good");
  fx.revision("r1", &[("bad.php", &bad), ("good.php", &good)]);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(fx.behaviors, Duration::from_millis(10));
  // Single slot: the failed job must release it or good.php starves.
  let mut pool = pool(1);

  let report = JobScheduler::new("r1", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .run()
    .await
    .unwrap();

  assert_eq!(
    report.files["bad.php"],
    FileFacts::Failed {
      error: "unparseable".into()
    }
  );
  assert_eq!(report.files["good.php"], FileFacts::Analysed { facts: facts("good") });
  assert_eq!(report.failure_count(), 1);
  // Failures are not memoized.
  assert_eq!(cache.get(&bad).await, None);
}

#[tokio::test]
async fn worker_crash_fails_the_pass() {
  let mut fx = Fixture::new();
  let crashing = fx.blob_with("<?php class x {}", Behavior::Crash);
  let after = fx.blob("<?php class y {}", "y");
  fx.revision("r1", &[("x.php", &crashing), ("y.php", &after)]);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(fx.behaviors, Duration::from_millis(10));
  let mut pool = pool(1);

  let result = JobScheduler::new("r1", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .run()
    .await;

  assert!(matches!(result, Err(PassError::Worker { .. })));
}

#[tokio::test]
async fn hung_worker_times_out_and_fails_the_pass() {
  let mut fx = Fixture::new();
  let hung = fx.blob_with("<?php class z {}", Behavior::Hang);
  fx.revision("r1", &[("z.php", &hung)]);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(fx.behaviors, Duration::ZERO);
  let mut pool = pool(1);

  let result = JobScheduler::new("r1", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .with_job_timeout(Duration::from_millis(100))
    .run()
    .await;

  match result {
    Err(PassError::Worker { reason, .. }) => assert!(reason.contains("timed out")),
    other => panic!("expected worker failure, got {other:?}"),
  }
}

#[tokio::test]
async fn corrupt_cache_entry_falls_back_to_recomputation() {
  let mut fx = Fixture::new();
  let id = fx.blob("<?php class a {}", "a");
  fx.revision("r1", &[("a.php", &id)]);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;

  // Plant garbage where the entry for this id lives (sharded by id prefix).
  let (shard, rest) = id.as_str().split_at(2);
  let entry_dir = dir.path().join(shard);
  tokio::fs::create_dir_all(&entry_dir).await.unwrap();
  tokio::fs::write(entry_dir.join(format!("{rest}.json")), b"{ corrupt").await.unwrap();

  let runner = StubRunner::new(fx.behaviors, Duration::ZERO);
  let mut pool = pool(1);

  let report = JobScheduler::new("r1", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .run()
    .await
    .unwrap();

  // The miss went to a worker and the entry was rewritten.
  assert_eq!(runner.dispatches(), 1);
  assert_eq!(report.files["a.php"], FileFacts::Analysed { facts: facts("a") });
  assert_eq!(cache.get(&id).await, Some(facts("a")));
}

#[tokio::test]
async fn zero_slot_pool_fails_instead_of_hanging() {
  let mut fx = Fixture::new();
  let id = fx.blob("<?php class a {}", "a");
  fx.revision("r1", &[("a.php", &id)]);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(fx.behaviors, Duration::ZERO);
  let mut pool = pool(0);

  let result = JobScheduler::new("r1", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .run()
    .await;

  assert!(matches!(result, Err(PassError::NoWorkers)));
  assert_eq!(runner.dispatches(), 0);
}

#[tokio::test]
async fn zero_slot_pool_still_serves_cache_hits() {
  let mut fx = Fixture::new();
  let id = fx.blob("<?php class a {}", "a");
  fx.revision("r1", &[("a.php", &id)]);

  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  cache.put(&id, &facts("a")).await.unwrap();

  let runner = StubRunner::new(fx.behaviors, Duration::ZERO);
  let mut pool = pool(0);

  let report = JobScheduler::new("r1", Arc::new(fx.store), &cache, &mut pool, runner.clone())
    .run()
    .await
    .unwrap();

  assert_eq!(report.files["a.php"], FileFacts::Analysed { facts: facts("a") });
  assert_eq!(runner.dispatches(), 0);
}

#[tokio::test]
async fn unknown_revision_is_a_store_error() {
  let dir = tempfile::tempdir().unwrap();
  let cache = cache_in(&dir).await;
  let runner = StubRunner::new(Default::default(), Duration::ZERO);
  let mut pool = pool(1);

  let result = JobScheduler::new("nope", Arc::new(InMemoryStore::new()), &cache, &mut pool, runner)
    .run()
    .await;

  assert!(matches!(result, Err(PassError::Store(_))));
}

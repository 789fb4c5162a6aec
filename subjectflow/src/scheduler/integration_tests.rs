//! End-to-end scheduler scenarios.

#[cfg(test)]
mod tests {
    use crate::cache::ArtifactCache;
    use crate::cancellation::CancellationToken;
    use crate::errors::SubjectflowError;
    use crate::events::CollectingEventSink;
    use crate::expand::{ExpandedGraph, IterationDomain, UnitId};
    use crate::invoke::InputValue;
    use crate::scheduler::{
        plan, Engine, FailurePolicy, JitterStrategy, RetryConfig, RunContext, RunContextBuilder,
        Scheduler, SkipReason,
    };
    use crate::testing::{
        assert_cached, assert_done, assert_failed, assert_skipped, domain, subject_inputs,
        two_stage_with_join, RecordingSink, ScriptedInvoker,
    };
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    const UNITS: [&str; 3] = ["s1", "s2", "s3"];

    fn v1() -> Vec<(&'static str, &'static str)> {
        UNITS.iter().map(|u| (*u, "v1")).collect()
    }

    fn expanded(units: &[&str]) -> (IterationDomain, ExpandedGraph) {
        let domain = domain(units).unwrap();
        let graph = two_stage_with_join().unwrap().expand(&domain).unwrap();
        (domain, graph)
    }

    fn builder(domain: &IterationDomain, work: &Path, cache: &Arc<ArtifactCache>) -> RunContextBuilder {
        RunContext::builder(domain.clone())
            .with_cache(cache.clone())
            .with_workers(4)
            .with_work_dir(work)
    }

    fn scheduler(invoker: &Arc<ScriptedInvoker>, sink: &Arc<RecordingSink>) -> Scheduler {
        Scheduler::from_shared(invoker.clone(), sink.clone())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_three_units_then_incremental_rerun() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let sink = Arc::new(RecordingSink::new());
        let (domain, graph) = expanded(&UNITS);

        let first = Arc::new(ScriptedInvoker::new());
        let ctx = builder(&domain, work.path(), &cache).build();
        let report = scheduler(&first, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert!(report.is_success(), "{report}");
        assert_eq!(report.exit_code(), 0);
        assert_eq!(first.call_count(), 7);
        assert_eq!(report.invocations(), 7);
        let mut slots = sink.slots();
        slots.sort();
        assert_eq!(
            slots,
            vec!["group/table", "unit/s1/stats", "unit/s2/stats", "unit/s3/stats"]
        );

        // Nothing changed: every node is a cache hit and nothing is re-exported.
        let second = Arc::new(ScriptedInvoker::new());
        let ctx = builder(&domain, work.path(), &cache).build();
        let report = scheduler(&second, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(second.call_count(), 0);
        assert_eq!(report.cached().count(), 7);
        assert_cached(&report, "aggregate", None);
        assert_eq!(sink.len(), 4);

        // Only unit s2 changed: its chain and the join run again.
        let third = Arc::new(ScriptedInvoker::new());
        let ctx = builder(&domain, work.path(), &cache).build();
        let changed = subject_inputs(&[("s1", "v1"), ("s2", "v2"), ("s3", "v1")]);
        let report = scheduler(&third, &sink).run(&graph, &ctx, &changed).await.unwrap();

        assert!(report.is_success());
        let mut invoked = third.invoked();
        invoked.sort();
        assert_eq!(invoked, vec!["aggregate", "extract[s2]", "summarize[s2]"]);
        assert_cached(&report, "summarize", Some("s1"));
        assert_cached(&report, "summarize", Some("s3"));
        assert_eq!(sink.slots()[4..].to_vec(), vec!["unit/s2/stats", "group/table"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_join_order_follows_domain_not_completion() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let units = ["s3", "s1", "s2"];
        let (domain, graph) = expanded(&units);
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .delayed("summarize[s3]", Duration::from_millis(80))
                .delayed("summarize[s1]", Duration::from_millis(40)),
        );
        let sink = Arc::new(RecordingSink::new());

        let ctx = builder(&domain, work.path(), &cache).build();
        let inputs = subject_inputs(&[("s3", "v1"), ("s1", "v1"), ("s2", "v1")]);
        let report = scheduler(&invoker, &sink).run(&graph, &ctx, &inputs).await.unwrap();
        assert!(report.is_success());

        let summarize = invoker.calls_for("summarize");
        let expected: Vec<PathBuf> = units
            .iter()
            .map(|unit| {
                let call = summarize
                    .iter()
                    .find(|c| c.unit.as_ref().map(|u| u.as_str()) == Some(*unit))
                    .unwrap();
                call.work_dir.join("stats.out")
            })
            .collect();

        let aggregate = &invoker.calls_for("aggregate")[0];
        assert_eq!(aggregate.inputs["stats"], InputValue::Many(expected));
    }

    #[tokio::test]
    async fn test_best_effort_isolates_failed_unit() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker = Arc::new(ScriptedInvoker::new().failing("extract[s2]", 2));
        let sink = Arc::new(RecordingSink::new());

        let ctx = builder(&domain, work.path(), &cache)
            .with_policy(FailurePolicy::BestEffort)
            .build();
        let report = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.exit_code(), 1);
        assert_failed(&report, "extract", Some("s2"));
        assert_eq!(
            assert_skipped(&report, "summarize", Some("s2")),
            &SkipReason::UpstreamFailed {
                ancestor: "extract[s2]".to_string()
            }
        );
        match assert_skipped(&report, "aggregate", None) {
            SkipReason::JoinIncomplete(e) => {
                assert_eq!(e.join, "aggregate");
                assert_eq!(e.missing_units, vec!["s2".to_string()]);
            }
            other => panic!("unexpected skip reason: {other:?}"),
        }
        assert_done(&report, "summarize", Some("s1"));
        assert_done(&report, "summarize", Some("s3"));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].exit_code, Some(2));
        assert_eq!(report.units_to_rerun(), vec![UnitId::from("s2")]);

        let mut slots = sink.slots();
        slots.sort();
        assert_eq!(slots, vec!["unit/s1/stats", "unit/s3/stats"]);

        // Once the cause is fixed only the failed unit and the join run.
        invoker.heal("extract[s2]");
        invoker.reset();
        let ctx = builder(&domain, work.path(), &cache).build();
        let report = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();
        assert!(report.is_success());
        let mut invoked = invoker.invoked();
        invoked.sort();
        assert_eq!(invoked, vec!["aggregate", "extract[s2]", "summarize[s2]"]);
    }

    #[tokio::test]
    async fn test_fail_fast_halts_dispatch() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker = Arc::new(ScriptedInvoker::new().failing("extract[s1]", 1));
        let sink = Arc::new(RecordingSink::new());

        let ctx = builder(&domain, work.path(), &cache)
            .with_workers(1)
            .with_policy(FailurePolicy::FailFast)
            .build();
        let report = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert_eq!(invoker.invoked(), vec!["extract[s1]"]);
        assert_failed(&report, "extract", Some("s1"));
        assert_eq!(assert_skipped(&report, "extract", Some("s2")), &SkipReason::Halted);
        assert_eq!(assert_skipped(&report, "extract", Some("s3")), &SkipReason::Halted);
        assert!(matches!(
            assert_skipped(&report, "summarize", Some("s1")),
            SkipReason::UpstreamFailed { .. }
        ));
        assert_done(&report, "subject", Some("s2"));
        assert_eq!(report.units_to_rerun().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_pool_bounds_concurrency() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let units = ["a", "b", "c", "d", "e"];
        let (domain, graph) = expanded(&units);
        let invoker = Arc::new(ScriptedInvoker::new().delayed("extract", Duration::from_millis(30)));
        let sink = Arc::new(RecordingSink::new());

        let ctx = builder(&domain, work.path(), &cache).with_workers(2).build();
        let inputs = subject_inputs(&units.map(|u| (u, "v1")));
        let report = scheduler(&invoker, &sink).run(&graph, &ctx, &inputs).await.unwrap();

        assert!(report.is_success());
        assert_eq!(invoker.call_count(), 11);
        assert_eq!(invoker.max_concurrency(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_share_cache_without_recomputing() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let a = Arc::new(ScriptedInvoker::new().delayed("extract", Duration::from_millis(20)));
        let b = Arc::new(ScriptedInvoker::new().delayed("extract", Duration::from_millis(20)));
        let sink = Arc::new(RecordingSink::new());
        let inputs = subject_inputs(&v1());

        let ctx_a = builder(&domain, work.path(), &cache).build();
        let ctx_b = builder(&domain, work.path(), &cache).build();
        let run_a = scheduler(&a, &sink);
        let run_b = scheduler(&b, &sink);
        let (ra, rb) = tokio::join!(
            run_a.run(&graph, &ctx_a, &inputs),
            run_b.run(&graph, &ctx_b, &inputs)
        );

        assert!(ra.unwrap().is_success());
        assert!(rb.unwrap().is_success());
        assert_eq!(a.call_count() + b.call_count(), 7);
    }

    #[tokio::test]
    async fn test_retry_reinvokes_transient_failure() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker = Arc::new(ScriptedInvoker::new().flaky("extract[s1]", 1, 75));
        let sink = Arc::new(RecordingSink::new());

        let retry = RetryConfig::new()
            .with_max_attempts(2)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None);
        let ctx = builder(&domain, work.path(), &cache).with_retry(retry).build();
        let report = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert!(report.is_success());
        let node = report.find("extract", Some("s1")).unwrap();
        assert_eq!(node.attempts, 2);
        assert_eq!(invoker.calls_for("extract").len(), 4);

        let attempts: Vec<PathBuf> = invoker
            .calls()
            .into_iter()
            .filter(|c| c.node == "extract[s1]")
            .map(|c| c.work_dir)
            .collect();
        assert_eq!(attempts.len(), 2);
        assert_ne!(attempts[0], attempts[1]);
        assert!(attempts[0].ends_with("attempt-1"));
        assert!(attempts[1].ends_with("attempt-2"));
        assert_eq!(attempts[0].parent(), attempts[1].parent());
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker = Arc::new(ScriptedInvoker::new().flaky("extract[s1]", 1, 75));
        let sink = Arc::new(RecordingSink::new());

        let ctx = builder(&domain, work.path(), &cache).build();
        let report = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert_failed(&report, "extract", Some("s1"));
        assert_eq!(report.find("extract", Some("s1")).unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_node_timeout_fails_node() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker =
            Arc::new(ScriptedInvoker::new().delayed("extract[s1]", Duration::from_secs(30)));
        let sink = Arc::new(RecordingSink::new());

        let ctx = builder(&domain, work.path(), &cache)
            .with_node_timeout(Duration::from_millis(50))
            .build();
        let report = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert_failed(&report, "extract", Some("s1"));
        let failure = report.find("extract", Some("s1")).unwrap().failure.as_ref().unwrap();
        assert!(failure.to_string().contains("timed out"), "{failure}");
        assert_eq!(failure.exit_code(), None);
        assert_done(&report, "summarize", Some("s2"));
    }

    #[tokio::test]
    async fn test_panicking_invoker_fails_only_its_node() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker = Arc::new(ScriptedInvoker::new().panicking("summarize[s3]"));
        let sink = Arc::new(RecordingSink::new());

        let ctx = builder(&domain, work.path(), &cache).build();
        let report = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert_failed(&report, "summarize", Some("s3"));
        assert_done(&report, "summarize", Some("s1"));
        assert!(matches!(
            assert_skipped(&report, "aggregate", None),
            SkipReason::JoinIncomplete(_)
        ));
        assert_eq!(report.units_to_rerun(), vec![UnitId::from("s3")]);
    }

    #[tokio::test]
    async fn test_missing_unit_input_aborts_before_dispatch() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker = Arc::new(ScriptedInvoker::new());
        let sink = Arc::new(RecordingSink::new());

        let ctx = builder(&domain, work.path(), &cache).build();
        let inputs = subject_inputs(&[("s1", "v1"), ("s3", "v1")]);
        let err = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &inputs)
            .await
            .unwrap_err();

        match err {
            SubjectflowError::MissingUnitInput(e) => {
                assert_eq!(e.unit.as_ref().map(|u| u.as_str()), Some("s2"));
                assert_eq!(e.port, "dwi");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_domain_mismatch_is_config_error() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (_, graph) = expanded(&UNITS);
        let other = domain(&["s1"]).unwrap();
        let ctx = builder(&other, work.path(), &cache).build();

        let err = Scheduler::new(ScriptedInvoker::new(), RecordingSink::new())
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap_err();
        assert!(matches!(err, SubjectflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker = Arc::new(ScriptedInvoker::new());
        let sink = Arc::new(RecordingSink::new());
        let token = Arc::new(CancellationToken::new());
        token.cancel("interrupted");

        let ctx = builder(&domain, work.path(), &cache)
            .with_cancellation(token)
            .build();
        let report = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert_eq!(invoker.call_count(), 0);
        assert_eq!(report.skipped().count(), graph.len());
        assert_eq!(report.cancelled.as_deref(), Some("interrupted"));
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_drains_in_flight_nodes() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker =
            Arc::new(ScriptedInvoker::new().delayed("extract", Duration::from_millis(150)));
        let sink = Arc::new(RecordingSink::new());
        let token = Arc::new(CancellationToken::new());

        let ctx = builder(&domain, work.path(), &cache)
            .with_workers(1)
            .with_cancellation(token.clone())
            .build();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel("ctrl-c");
        });
        let report = scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert_eq!(invoker.invoked(), vec!["extract[s1]"]);
        assert_done(&report, "extract", Some("s1"));
        assert_eq!(assert_skipped(&report, "summarize", Some("s1")), &SkipReason::Halted);
        assert_eq!(assert_skipped(&report, "extract", Some("s2")), &SkipReason::Halted);
        assert_eq!(report.cancelled.as_deref(), Some("ctrl-c"));
    }

    #[tokio::test]
    async fn test_export_failure_is_reported_and_retried_next_run() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker = Arc::new(ScriptedInvoker::new());
        let broken = Arc::new(RecordingSink::new().failing("group/table"));

        let ctx = builder(&domain, work.path(), &cache).build();
        let report = scheduler(&invoker, &broken)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        assert_done(&report, "aggregate", None);
        assert_eq!(report.export_failures.len(), 1);
        assert_eq!(report.export_failures[0].slot, "group/table");
        assert!(!report.is_success());

        let fixed = Arc::new(RecordingSink::new());
        let ctx = builder(&domain, work.path(), &cache).build();
        let report = scheduler(&invoker, &fixed)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(fixed.slots(), vec!["group/table"]);
    }

    #[tokio::test]
    async fn test_events_on_cached_rerun() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let invoker = Arc::new(ScriptedInvoker::new());
        let sink = Arc::new(RecordingSink::new());

        let first = Arc::new(CollectingEventSink::new());
        let ctx = builder(&domain, work.path(), &cache)
            .with_events(first.clone())
            .build();
        scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();
        assert_eq!(first.events_of_type("node.completed").len(), 7);
        assert_eq!(first.events_of_type("node.exported").len(), 4);
        assert_eq!(first.events_of_type("run.").len(), 2);

        let second = Arc::new(CollectingEventSink::new());
        let ctx = builder(&domain, work.path(), &cache)
            .with_events(second.clone())
            .build();
        scheduler(&invoker, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();
        assert_eq!(second.events_of_type("node.cache_hit").len(), 7);
        assert!(second.events_of_type("node.started").is_empty());
        assert!(second.events_of_type("node.exported").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cache_hits_do_not_wait_for_a_worker() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let sink = Arc::new(RecordingSink::new());
        let (domain, graph) = expanded(&UNITS);

        let warm = Arc::new(ScriptedInvoker::new());
        let ctx = builder(&domain, work.path(), &cache).build();
        scheduler(&warm, &sink)
            .run(&graph, &ctx, &subject_inputs(&v1()))
            .await
            .unwrap();

        // s1 changed and its extract is slow; the single worker belongs to it.
        let invoker =
            Arc::new(ScriptedInvoker::new().delayed("extract[s1]", Duration::from_millis(300)));
        let events = Arc::new(CollectingEventSink::new());
        let ctx = builder(&domain, work.path(), &cache)
            .with_workers(1)
            .with_events(events.clone())
            .build();
        let changed = subject_inputs(&[("s1", "v2"), ("s2", "v1"), ("s3", "v1")]);
        let report = scheduler(&invoker, &sink).run(&graph, &ctx, &changed).await.unwrap();

        assert!(report.is_success(), "{report}");
        for unit in ["s2", "s3"] {
            assert_cached(&report, "extract", Some(unit));
            assert_cached(&report, "summarize", Some(unit));
        }

        let order: Vec<(&'static str, String)> = events
            .events()
            .iter()
            .filter_map(|e| e.node().map(|node| (e.event_type(), node.to_string())))
            .collect();
        let position = |kind: &str, node: &str| {
            order
                .iter()
                .position(|(k, n)| *k == kind && n == node)
                .unwrap_or_else(|| panic!("no {kind} event for {node}"))
        };
        let slow_done = position("node.completed", "extract[s1]");
        for node in ["extract[s2]", "summarize[s2]", "extract[s3]", "summarize[s3]"] {
            assert!(position("node.cache_hit", node) < slow_done, "{node} waited for extract[s1]");
        }
        assert!(events
            .events_of_type("node.started")
            .iter()
            .all(|e| matches!(e.node(), Some("extract[s1]" | "summarize[s1]" | "aggregate"))));
    }

    #[tokio::test]
    async fn test_plan_predicts_run_fingerprints() {
        let work = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::in_memory());
        let (domain, graph) = expanded(&UNITS);
        let inputs = subject_inputs(&v1());

        let before = plan(&graph, &inputs, &cache).await.unwrap();
        assert_eq!(before.to_invoke().count(), 7);
        assert_eq!(before.cached().count(), 0);

        let invoker = Arc::new(ScriptedInvoker::new());
        let sink = Arc::new(RecordingSink::new());
        let ctx = builder(&domain, work.path(), &cache).build();
        let report = scheduler(&invoker, &sink).run(&graph, &ctx, &inputs).await.unwrap();

        for node in &report.nodes {
            let planned = before
                .find(&node.task, node.unit.as_ref().map(|u| u.as_str()))
                .unwrap();
            assert_eq!(node.fingerprint.as_ref(), Some(&planned.fingerprint), "{}", node.label);
        }

        let after = plan(&graph, &inputs, &cache).await.unwrap();
        assert_eq!(after.to_invoke().count(), 0);
        assert_eq!(after.cached().count(), 7);
    }

    #[tokio::test]
    async fn test_engine_validates_expands_and_runs() {
        let work = tempfile::tempdir().unwrap();
        let fixture = two_stage_with_join().unwrap();
        let invoker = Arc::new(ScriptedInvoker::new());
        let sink = Arc::new(RecordingSink::new());
        let engine =
            Engine::new(fixture.graph, &fixture.iterated, scheduler(&invoker, &sink)).unwrap();

        let ctx = RunContext::builder(domain(&["s1", "s2"]).unwrap())
            .with_work_dir(work.path())
            .with_workers(2)
            .build();
        let report = engine
            .run(&ctx, &subject_inputs(&[("s1", "v1"), ("s2", "v1")]))
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(invoker.call_count(), 5);

        let plan = engine
            .plan(&ctx, &subject_inputs(&[("s1", "v1"), ("s2", "v1")]))
            .await
            .unwrap();
        assert_eq!(plan.cached().count(), 5);
    }
}

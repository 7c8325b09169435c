//! Integration tests for the billing cache

use billing_cache::billing::{
    EntryStatus, InMemoryBillingService, NewTimeEntry, Operation, TimeEntry, TimeEntryFilters,
    TimeEntryId, TimeEntryPatch,
};
use billing_cache::cache::key;
use billing_cache::config::{CacheConfig, ConfigManager};
use billing_cache::{BillingError, BillingQueries};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

fn seeded_entry(id: &str, matter: &str, hours: i64) -> TimeEntry {
    let mut entry = TimeEntry::provisional(
        &NewTimeEntry::new(matter, "Drafting", Decimal::new(hours, 0), Decimal::new(300, 0))
            .with_client("C1"),
    );
    entry.id = TimeEntryId::new(id);
    entry
}

fn session(entries: Vec<TimeEntry>) -> (Arc<InMemoryBillingService>, BillingQueries) {
    let service = Arc::new(InMemoryBillingService::new().with_entries(entries));
    let queries = BillingQueries::new(service.clone());
    (service, queries)
}

mod read_through {
    use super::*;

    #[tokio::test]
    async fn second_read_issues_no_collaborator_call() {
        let (service, queries) = session(vec![seeded_entry("te_1", "M1", 1)]);

        queries.unsubmitted_entries().await.unwrap();
        queries.unsubmitted_entries().await.unwrap();

        assert_eq!(service.calls(Operation::GetUnsubmitted), 1);
    }

    #[tokio::test]
    async fn fresh_sessions_do_not_share_state() {
        let (service, first) = session(vec![seeded_entry("te_1", "M1", 1)]);
        first.recent_time_entries(5).await.unwrap();

        let second = BillingQueries::new(service.clone());
        second.recent_time_entries(5).await.unwrap();

        assert_eq!(service.calls(Operation::GetRecent), 2);
    }
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn create_then_list_shows_optimistic_entry() {
        let (service, queries) = session(Vec::new());
        service.pause_writes();

        let q = queries.clone();
        let create = tokio::spawn(async move {
            q.create_time_entry(NewTimeEntry::new(
                "M1",
                "Research",
                Decimal::new(2, 0),
                Decimal::new(300, 0),
            ))
            .await
        });
        while service.pending_writes() == 0 {
            tokio::task::yield_now().await;
        }

        let listed = queries
            .time_entries(&TimeEntryFilters::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].id.is_temporary());
        assert_eq!(listed[0].hours, Decimal::new(2, 0));
        assert_eq!(service.calls(Operation::GetTimeEntries), 0);

        service.resume_writes();
        let created = create.await.unwrap().unwrap();

        let listed = queries
            .time_entries(&TimeEntryFilters::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
    }

    #[tokio::test]
    async fn failed_update_is_rolled_back_and_refetched() {
        let (service, queries) = session(vec![seeded_entry("te_1", "M1", 1)]);
        let id = TimeEntryId::new("te_1");
        queries.time_entry(&id).await.unwrap();
        queries
            .time_entries(&TimeEntryFilters::default())
            .await
            .unwrap();
        queries.unsubmitted_entries().await.unwrap();

        service.fail_next(
            Operation::UpdateTimeEntry,
            BillingError::server(500, "database unavailable"),
        );
        let err = queries
            .update_time_entry(&id, TimeEntryPatch::hours(Decimal::new(5, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Server { status: 500, .. }));

        assert!(!queries.cache().is_fresh(&key::time_entry(&id)));
        assert!(!queries.cache().is_fresh(&key::time_entries()));
        assert!(!queries.cache().is_fresh(&key::analytics(None)));
        // hours-only, yet the rolled-back unsubmitted list must refetch
        assert!(!queries.cache().is_fresh(&key::unsubmitted_entries()));
        assert_eq!(queries.unsubmitted_entries().await.unwrap()[0].hours, Decimal::ONE);
        assert_eq!(service.calls(Operation::GetUnsubmitted), 2);

        let entry = queries.time_entry(&id).await.unwrap();
        assert_eq!(entry.hours, Decimal::ONE);
        assert_eq!(service.calls(Operation::GetTimeEntry), 2);
    }

    #[tokio::test]
    async fn status_change_forces_unsubmitted_refetch() {
        let (service, queries) = session(vec![seeded_entry("te_1", "M1", 1)]);
        assert_eq!(queries.unsubmitted_entries().await.unwrap().len(), 1);

        queries
            .update_time_entry(
                &TimeEntryId::new("te_1"),
                TimeEntryPatch::status(EntryStatus::Submitted),
            )
            .await
            .unwrap();

        assert!(!queries.cache().is_fresh(&key::unsubmitted_entries()));
        assert!(queries.unsubmitted_entries().await.unwrap().is_empty());
        assert_eq!(service.calls(Operation::GetUnsubmitted), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn late_revalidation_keeps_optimistic_update() {
        let (service, queries) = session(vec![seeded_entry("te_1", "M1", 1)]);
        let id = TimeEntryId::new("te_1");
        queries.unsubmitted_entries().await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        // stale read: served at once, revalidation held at the backend
        service.pause_reads();
        let stale = queries.unsubmitted_entries().await.unwrap();
        assert_eq!(stale[0].hours, Decimal::ONE);
        while service.pending_reads() == 0 {
            tokio::task::yield_now().await;
        }

        service.pause_writes();
        let q = queries.clone();
        let target = id.clone();
        let update = tokio::spawn(async move {
            q.update_time_entry(&target, TimeEntryPatch::hours(Decimal::new(5, 0)))
                .await
        });
        while service.pending_writes() == 0 {
            tokio::task::yield_now().await;
        }

        // the revalidation answers with the pre-update hours
        service.resume_reads();
        while service.pending_reads() > 0 {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        assert_eq!(service.calls(Operation::GetUnsubmitted), 2);

        let cached = queries
            .cache()
            .get_query_data(&key::unsubmitted_entries())
            .unwrap()
            .into_time_entries()
            .unwrap();
        assert_eq!(cached[0].hours, Decimal::new(5, 0));
        assert!(queries.cache().is_fresh(&key::unsubmitted_entries()));

        service.resume_writes();
        update.await.unwrap().unwrap();
        let listed = queries.unsubmitted_entries().await.unwrap();
        assert_eq!(listed[0].hours, Decimal::new(5, 0));
        assert_eq!(service.calls(Operation::GetUnsubmitted), 2);
    }

    #[tokio::test]
    async fn batch_submit_clears_unsubmitted() {
        let entries: Vec<_> = (1..=3)
            .map(|n| seeded_entry(&format!("te_{n}"), "M1", n))
            .collect();
        let ids: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
        let (service, queries) = session(entries);
        assert_eq!(queries.unsubmitted_entries().await.unwrap().len(), 3);

        queries.submit_time_entries(&ids).await.unwrap();

        assert!(!queries.cache().is_fresh(&key::unsubmitted_entries()));
        assert!(queries.unsubmitted_entries().await.unwrap().is_empty());
        assert_eq!(service.calls(Operation::SubmitTimeEntries), 1);
    }
}

mod invalidation_completeness {
    use super::*;
    use billing_cache::cache::CacheKey;

    async fn warm(queries: &BillingQueries) {
        queries
            .time_entries(&TimeEntryFilters::default())
            .await
            .unwrap();
        queries
            .time_entries(&TimeEntryFilters::matter("M1"))
            .await
            .unwrap();
        queries.unsubmitted_entries().await.unwrap();
        queries.recent_time_entries(3).await.unwrap();
        queries.time_entry(&TimeEntryId::new("te_1")).await.unwrap();
        queries.billing_analytics(None).await.unwrap();
    }

    fn assert_not_fresh(queries: &BillingQueries, keys: &[CacheKey]) {
        for k in keys {
            assert!(!queries.cache().is_fresh(k), "{k} is still fresh");
        }
    }

    fn shared_families() -> Vec<CacheKey> {
        vec![
            key::time_entries(),
            key::time_entries_by_matter("M1"),
            key::unsubmitted_entries(),
            key::recent_time_entries(3),
            key::analytics(None),
        ]
    }

    #[tokio::test]
    async fn after_success() {
        let (_service, queries) = session(vec![
            seeded_entry("te_1", "M1", 1),
            seeded_entry("te_2", "M1", 2),
        ]);

        warm(&queries).await;
        queries
            .create_time_entry(NewTimeEntry::new("M1", "Call", Decimal::ONE, Decimal::ONE))
            .await
            .unwrap();
        assert_not_fresh(&queries, &shared_families());

        warm(&queries).await;
        queries
            .update_time_entry(
                &TimeEntryId::new("te_1"),
                TimeEntryPatch::status(EntryStatus::Submitted),
            )
            .await
            .unwrap();
        let mut keys = shared_families();
        keys.push(key::time_entry(&TimeEntryId::new("te_1")));
        assert_not_fresh(&queries, &keys);

        warm(&queries).await;
        queries
            .submit_time_entries(&[TimeEntryId::new("te_2")])
            .await
            .unwrap();
        assert_not_fresh(&queries, &shared_families());

        warm(&queries).await;
        queries
            .delete_time_entry(&TimeEntryId::new("te_1"))
            .await
            .unwrap();
        let mut keys = shared_families();
        keys.push(key::time_entry(&TimeEntryId::new("te_1")));
        assert_not_fresh(&queries, &keys);
    }

    #[tokio::test]
    async fn after_failure() {
        let (service, queries) = session(vec![seeded_entry("te_1", "M1", 1)]);

        warm(&queries).await;
        service.fail_next(Operation::CreateTimeEntry, BillingError::Network("reset".into()));
        assert!(queries
            .create_time_entry(NewTimeEntry::new("M1", "Call", Decimal::ONE, Decimal::ONE))
            .await
            .is_err());
        assert_not_fresh(&queries, &shared_families());

        warm(&queries).await;
        service.fail_next(Operation::SubmitTimeEntries, BillingError::server(502, "gateway"));
        assert!(queries
            .submit_time_entries(&[TimeEntryId::new("te_1")])
            .await
            .is_err());
        assert_not_fresh(&queries, &shared_families());

        warm(&queries).await;
        service.fail_next(Operation::DeleteTimeEntry, BillingError::Network("reset".into()));
        assert!(queries
            .delete_time_entry(&TimeEntryId::new("te_1"))
            .await
            .is_err());
        assert_not_fresh(&queries, &shared_families());
        // nothing was retried
        assert_eq!(service.calls(Operation::CreateTimeEntry), 1);
        assert_eq!(service.calls(Operation::SubmitTimeEntries), 1);
        assert_eq!(service.calls(Operation::DeleteTimeEntry), 1);
    }
}

mod utilities {
    use super::*;

    #[tokio::test]
    async fn invalidate_all_twice_equals_once() {
        let (_service, queries) = session(vec![seeded_entry("te_1", "M1", 1)]);
        queries.unsubmitted_entries().await.unwrap();
        queries.client_billing("C1").await.unwrap();
        queries.prefetch_matters_for_entry_form().await;

        queries.invalidate_all();
        let once = queries.cache().len();
        queries.invalidate_all();

        assert_eq!(once, 0);
        assert_eq!(queries.cache().len(), 0);
    }

    #[tokio::test]
    async fn session_from_config_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let mut config = CacheConfig::default();
        config.retry.max_attempts = 1;
        ConfigManager::at(path.clone()).save(&config).await.unwrap();

        let loaded = ConfigManager::at(path).load().await.unwrap();
        let service = Arc::new(InMemoryBillingService::new());
        let queries = BillingQueries::from_config(service.clone(), &loaded);
        assert_eq!(queries.retry_policy().max_attempts(), 1);

        service.fail_next(Operation::GetRecent, BillingError::Network("down".into()));
        assert!(queries.recent_time_entries(5).await.is_err());
        assert_eq!(service.calls(Operation::GetRecent), 1);
    }
}

//! 对账集成测试：文件库 + 脚本模型 / 规则模型 / 故障存储

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use freshtrack::actions::{ActionCatalogue, ActionExecutor};
    use freshtrack::config::ReconcileSection;
    use freshtrack::core::{InventoryError, OracleError, RecoveryEngine, TerminationReason};
    use freshtrack::inventory::{
        Freshness, InventoryStore, Item, ItemFields, ItemId, ItemPatch, SqliteInventoryStore,
    };
    use freshtrack::oracle::{DecisionOracle, OracleDecision, RuleBasedOracle, ScriptedOracle};
    use freshtrack::reconcile::{
        reconcile, reconcile_from_store, ReconcileSession, RequestedAction, Transcript, Turn,
    };
    use freshtrack::{process_observations, AgentComponents};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn call(id: &str, name: &str, args: serde_json::Value) -> RequestedAction {
        RequestedAction::new(id, name, args)
    }

    async fn run(
        store: Arc<dyn InventoryStore>,
        oracle: &dyn DecisionOracle,
        device: Option<&str>,
        observed: Vec<ItemFields>,
    ) -> freshtrack::ReconciliationSummary {
        let executor = ActionExecutor::new(store, 5);
        let recovery = RecoveryEngine::new();
        let catalogue = ActionCatalogue::standard();
        let session = ReconcileSession::new(
            oracle,
            &executor,
            &recovery,
            &catalogue,
            CancellationToken::new(),
        )
        .with_device(device);
        reconcile_from_store(&session, observed).await.unwrap()
    }

    #[tokio::test]
    async fn test_multi_round_model_conversation_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteInventoryStore::open(
                dir.path().join("fridge.db"),
                std::time::Duration::from_secs(5),
            )
            .unwrap(),
        );
        let milk = store
            .insert(ItemFields::new("milk", "img://milk").with_category("dairy"))
            .await
            .unwrap();
        let yogurt = store
            .insert(ItemFields::new("yogurt", "img://yogurt").with_category("dairy"))
            .await
            .unwrap();

        let oracle = ScriptedOracle::new(vec![
            Ok(OracleDecision::Actions {
                content: Some("Checking the current inventory first.".to_string()),
                actions: vec![
                    call("c1", "list_items", json!({})),
                    call("c2", "fetch_item_image", json!({"item_id": milk.id})),
                ],
            }),
            Ok(OracleDecision::actions(vec![
                call(
                    "c3",
                    "update_item",
                    json!({"item_id": milk.id, "item_info": {
                        "freshness": "poor",
                        "position": "{\"x\": 1, \"y\": 2, \"width\": 3, \"height\": 4}",
                        "quantity": 2,
                        "id": 999
                    }}),
                ),
                call(
                    "c4",
                    "add_item",
                    json!({"item_info": {"name": "eggs", "category": "dairy", "image_url": "img://eggs", "estimated_size": "small"}}),
                ),
                call("c5", "delete_item", json!({"item_id": yogurt.id})),
            ])),
            Ok(OracleDecision::Reply(
                "Updated milk, added eggs, removed yogurt.".to_string(),
            )),
        ]);

        let summary = run(
            store.clone(),
            &oracle,
            None,
            vec![
                ItemFields::new("milk", "img://milk-2")
                    .with_category("dairy")
                    .with_freshness(Freshness::Poor),
                ItemFields::new("eggs", "img://eggs").with_category("dairy"),
            ],
        )
        .await;

        assert_eq!(summary.terminated_reason, TerminationReason::OracleFinished);
        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.updated, vec![milk.id]);
        assert_eq!(summary.deleted, vec![yogurt.id]);
        assert_eq!(summary.added.len(), 1);
        assert_eq!(summary.unchanged_count, 0);
        assert!(summary.errors.is_empty());
        assert_eq!(oracle.seen_turns(), vec![1, 4, 8]);

        let stored = store.get(milk.id).await.unwrap().unwrap();
        assert_eq!(stored.fields.freshness, Freshness::Poor);
        assert_eq!(stored.fields.position.map(|p| p.height), Some(4.0));
        assert!(store.get(999).await.unwrap().is_none());
        assert!(store.get(yogurt.id).await.unwrap().is_none());

        let image = summary
            .transcript
            .turns()
            .iter()
            .find_map(|t| match t {
                Turn::ActionResult {
                    action, payload, ..
                } if action == "fetch_item_image" => Some(payload.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(image["image_url"], "img://milk");
    }

    #[tokio::test]
    async fn test_update_of_missing_id_is_reported_not_fatal() {
        let store: Arc<dyn InventoryStore> =
            Arc::new(SqliteInventoryStore::open_in_memory().unwrap());
        let oracle = ScriptedOracle::one_action_per_round(vec![
            (
                "update_item",
                json!({"item_id": 42, "item_info": {"freshness": "fair"}}),
            ),
            ("delete_item", json!({"item_id": 42})),
        ]);
        let summary = run(store, &oracle, None, vec![]).await;
        assert_eq!(summary.terminated_reason, TerminationReason::OracleFinished);
        assert!(summary.updated.is_empty());
        assert!(summary.deleted.is_empty());
        let payloads: Vec<_> = summary
            .transcript
            .turns()
            .iter()
            .filter_map(|t| match t {
                Turn::ActionResult { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(payloads[0], json!({"item_id": null}));
        assert_eq!(payloads[1], json!({"success": false}));
    }

    #[tokio::test]
    async fn test_device_scoped_run_only_sees_its_device() {
        let store = Arc::new(SqliteInventoryStore::open_in_memory().unwrap());
        store
            .insert(ItemFields::new("milk", "img://m").with_device("fridge-a"))
            .await
            .unwrap();
        store
            .insert(ItemFields::new("beer", "img://b").with_device("fridge-b"))
            .await
            .unwrap();

        let oracle = RuleBasedOracle::new();
        let summary = run(store.clone(), &oracle, Some("fridge-a"), vec![]).await;
        assert_eq!(summary.deleted, vec![1]);
        assert_eq!(store.list(Some("fridge-b")).await.unwrap().len(), 1);

        let added = run(
            store.clone(),
            &oracle,
            Some("fridge-a"),
            vec![ItemFields::new("cheese", "img://c")],
        )
        .await;
        let cheese = store.get(added.added[0]).await.unwrap().unwrap();
        assert_eq!(cheese.fields.device_id.as_deref(), Some("fridge-a"));
    }

    #[tokio::test]
    async fn test_every_observation_is_accounted_for() {
        let cases: Vec<(Vec<ItemFields>, Vec<ItemFields>)> = vec![
            (vec![], vec![ItemFields::new("apple", "img://a")]),
            (
                vec![ItemFields::new("apple", "img://a")],
                vec![
                    ItemFields::new("apple", "img://a").with_freshness(Freshness::Fair),
                    ItemFields::new("pear", "img://p"),
                    ItemFields::new("kiwi", "img://k"),
                ],
            ),
            (
                vec![
                    ItemFields::new("apple", "img://a"),
                    ItemFields::new("pear", "img://p"),
                ],
                vec![ItemFields::new("pear", "img://p")],
            ),
            (
                vec![ItemFields::new("ham", "img://h").with_category("meat")],
                vec![ItemFields::new("ham", "img://h").with_category("deli")],
            ),
        ];

        for (prior, observed) in cases {
            let store = Arc::new(SqliteInventoryStore::open_in_memory().unwrap());
            for p in &prior {
                store.insert(p.clone()).await.unwrap();
            }
            let summary = run(store.clone(), &RuleBasedOracle::new(), None, observed.clone()).await;
            assert_eq!(summary.terminated_reason, TerminationReason::OracleFinished);
            assert_eq!(
                summary.added.len() + summary.updated.len() + summary.unchanged_count,
                observed.len()
            );
            // 没有对应识别结果的旧物品要么删除，要么带理由保留
            let untouched = prior.len() - summary.updated.len();
            let matched_unchanged = observed.len() - summary.added.len() - summary.updated.len();
            assert_eq!(
                summary.deleted.len() + summary.retained.len() + matched_unchanged,
                untouched
            );
            assert_eq!(store.list(None).await.unwrap().len(), observed.len());
        }
    }

    /// 插入时永远不可达的存储
    struct UnreachableStore;

    #[async_trait]
    impl InventoryStore for UnreachableStore {
        async fn list(&self, _device_id: Option<&str>) -> Result<Vec<Item>, InventoryError> {
            Ok(vec![])
        }
        async fn get(&self, _id: ItemId) -> Result<Option<Item>, InventoryError> {
            Ok(None)
        }
        async fn insert(&self, _fields: ItemFields) -> Result<Item, InventoryError> {
            Err(InventoryError::Unavailable("disk detached".to_string()))
        }
        async fn update(
            &self,
            _id: ItemId,
            _patch: ItemPatch,
        ) -> Result<Option<Item>, InventoryError> {
            Err(InventoryError::Unavailable("disk detached".to_string()))
        }
        async fn delete(&self, _id: ItemId) -> Result<bool, InventoryError> {
            Err(InventoryError::Unavailable("disk detached".to_string()))
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_stops_the_batch() {
        let oracle = ScriptedOracle::new(vec![Ok(OracleDecision::actions(vec![
            call(
                "a",
                "add_item",
                json!({"item_info": {"name": "eggs", "image_url": "img://e"}}),
            ),
            call(
                "b",
                "add_item",
                json!({"item_info": {"name": "milk", "image_url": "img://m"}}),
            ),
        ]))]);
        let summary = run(
            Arc::new(UnreachableStore),
            &oracle,
            None,
            vec![ItemFields::new("eggs", "img://e")],
        )
        .await;
        assert_eq!(summary.terminated_reason, TerminationReason::OracleError);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.transcript.action_results(), 1);
        assert_eq!(oracle.calls(), 1);
        assert_eq!(summary.indeterminate.len(), 1);
        assert_eq!(summary.indeterminate[0].id, "a");
        assert_eq!(summary.unchanged_count, 0);
        assert_eq!(summary.unaccounted_count, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_passed_through_unchanged() {
        let store = Arc::new(SqliteInventoryStore::open_in_memory().unwrap());
        let executor = ActionExecutor::new(store, 5);
        let recovery = RecoveryEngine::new();
        let catalogue = ActionCatalogue::standard();
        let oracle = ScriptedOracle::default();
        let session = ReconcileSession::new(
            &oracle,
            &executor,
            &recovery,
            &catalogue,
            CancellationToken::new(),
        );
        let prior = vec![Item {
            id: 7,
            fields: ItemFields::new("butter", "img://b"),
        }];
        let summary = reconcile(&session, prior.clone(), vec![]).await.unwrap();
        assert_eq!(summary.transcript.seed().unwrap().prior, prior);
        assert_eq!(summary.retained.len(), 1);
        assert_eq!(summary.retained[0].id, 7);
        assert_eq!(summary.final_reply.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_scoped_run_leaves_other_devices_alone() {
        let store = Arc::new(SqliteInventoryStore::open_in_memory().unwrap());
        let beer = store
            .insert(ItemFields::new("beer", "img://b").with_device("fridge-b"))
            .await
            .unwrap();
        let oracle = ScriptedOracle::one_action_per_round(vec![
            ("fetch_item_image", json!({"item_id": beer.id})),
            (
                "update_item",
                json!({"item_id": beer.id, "item_info": {"freshness": "poor", "device_id": "fridge-a"}}),
            ),
            ("delete_item", json!({"item_id": beer.id})),
        ]);
        let summary = run(store.clone(), &oracle, Some("fridge-a"), vec![]).await;

        assert_eq!(summary.terminated_reason, TerminationReason::OracleFinished);
        assert!(summary.updated.is_empty());
        assert!(summary.deleted.is_empty());
        let payloads: Vec<_> = summary
            .transcript
            .turns()
            .iter()
            .filter_map(|t| match t {
                Turn::ActionResult { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(payloads[0]["error"], "not found");
        assert_eq!(payloads[1], json!({"item_id": null}));
        assert_eq!(payloads[2], json!({"success": false}));

        let left = store.list(Some("fridge-b")).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].fields.freshness, Freshness::Good);
    }

    #[tokio::test]
    async fn test_ambiguous_match_is_added_after_image_check() {
        let store = Arc::new(SqliteInventoryStore::open_in_memory().unwrap());
        let prior = store
            .insert(ItemFields {
                brand: Some("Meadow".to_string()),
                ..ItemFields::new("milk", "img://milk-meadow").with_category("dairy")
            })
            .await
            .unwrap();
        let oracle = ScriptedOracle::one_action_per_round(vec![
            ("fetch_item_image", json!({"item_id": prior.id})),
            (
                "add_item",
                json!({"item_info": {
                    "name": "milk",
                    "category": "dairy",
                    "brand": "Hillside",
                    "image_url": "img://milk-hillside"
                }}),
            ),
        ]);
        let observed = vec![ItemFields {
            brand: Some("Hillside".to_string()),
            ..ItemFields::new("milk", "img://milk-hillside").with_category("dairy")
        }];
        let summary = run(store.clone(), &oracle, None, observed).await;

        assert_eq!(summary.terminated_reason, TerminationReason::OracleFinished);
        assert_eq!(summary.added.len(), 1);
        assert!(summary.updated.is_empty());
        assert!(summary.deleted.is_empty());
        assert_eq!(summary.unchanged_count, 0);
        assert_eq!(summary.unaccounted_count, 0);

        let order: Vec<_> = summary
            .transcript
            .turns()
            .iter()
            .filter_map(|t| match t {
                Turn::ActionResult { action, .. } => Some(action.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["fetch_item_image", "add_item"]);

        let items = store.list(None).await.unwrap();
        assert_eq!(items.len(), 2);
        let kept = store.get(prior.id).await.unwrap().unwrap();
        assert_eq!(kept.fields.brand.as_deref(), Some("Meadow"));
    }

    /// 写入在后台任务中完成；等待方超时后写入仍会落库
    struct DetachedWriteStore {
        inner: Arc<SqliteInventoryStore>,
        delay: Duration,
    }

    #[async_trait]
    impl InventoryStore for DetachedWriteStore {
        async fn list(&self, device_id: Option<&str>) -> Result<Vec<Item>, InventoryError> {
            self.inner.list(device_id).await
        }
        async fn get(&self, id: ItemId) -> Result<Option<Item>, InventoryError> {
            self.inner.get(id).await
        }
        async fn insert(&self, fields: ItemFields) -> Result<Item, InventoryError> {
            let inner = self.inner.clone();
            let delay = self.delay;
            let write = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.insert(fields).await
            });
            match write.await {
                Ok(result) => result,
                Err(e) => Err(InventoryError::Unavailable(e.to_string())),
            }
        }
        async fn update(
            &self,
            id: ItemId,
            patch: ItemPatch,
        ) -> Result<Option<Item>, InventoryError> {
            self.inner.update(id, patch).await
        }
        async fn delete(&self, id: ItemId) -> Result<bool, InventoryError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_timed_out_write_is_reported_as_indeterminate() {
        let inner = Arc::new(SqliteInventoryStore::open_in_memory().unwrap());
        let store: Arc<dyn InventoryStore> = Arc::new(DetachedWriteStore {
            inner: inner.clone(),
            delay: Duration::from_millis(1500),
        });
        let executor = ActionExecutor::new(store, 1);
        let recovery = RecoveryEngine::new();
        let catalogue = ActionCatalogue::standard();
        let oracle = ScriptedOracle::one_action_per_round(vec![(
            "add_item",
            json!({"item_info": {"name": "eggs", "image_url": "img://e"}}),
        )]);
        let session = ReconcileSession::new(
            &oracle,
            &executor,
            &recovery,
            &catalogue,
            CancellationToken::new(),
        );
        let summary = reconcile(&session, vec![], vec![ItemFields::new("eggs", "img://e")])
            .await
            .unwrap();

        assert_eq!(summary.terminated_reason, TerminationReason::OracleError);
        assert!(summary.added.is_empty());
        assert_eq!(summary.indeterminate.len(), 1);
        assert_eq!(summary.indeterminate[0].name, "add_item");
        assert_eq!(summary.unaccounted_count, 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(inner.list(None).await.unwrap().len(), 1);
    }

    /// 记录同时进行中的决策调用数峰值
    struct OverlapOracle {
        active: AtomicUsize,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DecisionOracle for OverlapOracle {
        async fn decide(
            &self,
            _transcript: &Transcript,
            _catalogue: &ActionCatalogue,
        ) -> Result<OracleDecision, OracleError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(OracleDecision::Reply("done".to_string()))
        }
    }

    async fn peak_overlap(first: Option<&str>, second: Option<&str>) -> usize {
        let peak = Arc::new(AtomicUsize::new(0));
        let oracle = OverlapOracle {
            active: AtomicUsize::new(0),
            peak: peak.clone(),
        };
        let store = Arc::new(SqliteInventoryStore::open_in_memory().unwrap());
        let components =
            AgentComponents::new(store, Box::new(oracle), &ReconcileSection::default());
        let (a, b) = tokio::join!(
            process_observations(&components, first, vec![], CancellationToken::new(), None),
            process_observations(&components, second, vec![], CancellationToken::new(), None),
        );
        a.unwrap();
        b.unwrap();
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_unscoped_run_is_exclusive_with_scoped_runs() {
        assert_eq!(peak_overlap(None, Some("fridge-1")).await, 1);
        assert_eq!(peak_overlap(Some("fridge-1"), None).await, 1);
        assert_eq!(peak_overlap(Some("fridge-1"), Some("fridge-2")).await, 2);
    }
}

//! Integration tests for connection, subscription and fanout workflows.

mod common;

use common::{
    connect_and_subscribe, immediate_dispatch, init_tracing, memory_courier, RecordingPush,
};
use courier::{
    ArrayPubSub, ConnectInfo, ConnectionData, Courier, CourierConfig, CourierError, DataMessage,
    FanoutDispatcher, FileBackendConfig, HydrateOptions, MemoryBackend, OperationRequest,
    RecordedEvent, ResolverContext,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

// --- Realistic Workflow Tests ---

#[tokio::test]
async fn test_chat_room_workflow() {
    let (courier, push) = memory_courier();

    // Two clients subscribe to messages, one to presence only
    for (id, event) in [("alice", "messageAdded"), ("bob", "messageAdded"), ("carol", "presence")] {
        let connection = courier
            .connections()
            .register(ConnectInfo::new(id, "chat.example.com/prod"))
            .await
            .unwrap();
        let ctx = courier.registration_context(connection, OperationRequest::new("1"));
        courier.pubsub().subscribe([event]).resolve(&ctx).await.unwrap();
    }

    courier
        .pubsub()
        .publish("messageAdded", &json!({"text": "hello"}))
        .await
        .unwrap();

    let (report, _) = courier.dispatch_after(None, 100).await.unwrap();
    assert_eq!(report.events, 1);
    assert_eq!(report.deliveries, 2);

    assert_eq!(push.delivered_to("alice"), vec![json!({"text": "hello"})]);
    assert_eq!(push.delivered_to("bob"), vec![json!({"text": "hello"})]);
    assert!(push.delivered_to("carol").is_empty());
}

#[tokio::test]
async fn test_dispatch_reaches_exactly_current_subscribers() {
    let (courier, push) = memory_courier();
    let a1 = connect_and_subscribe(&courier, "a1", "op", "A").await;
    connect_and_subscribe(&courier, "a2", "op", "A").await;
    connect_and_subscribe(&courier, "b1", "op", "B").await;

    // a1 leaves before the event is dispatched
    courier.connections().unregister(&a1).await.unwrap();

    courier.pubsub().publish("A", &json!({"x": 1})).await.unwrap();
    courier.dispatch_after(None, 10).await.unwrap();

    assert_eq!(push.recipients(), HashSet::from(["a2".to_string()]));
    assert_eq!(push.delivered_to("a2"), vec![json!({"x": 1})]);
}

#[tokio::test]
async fn test_dispatch_in_batches_follows_cursor() {
    let (courier, push) = memory_courier();
    connect_and_subscribe(&courier, "c1", "op", "tick").await;

    for i in 0..7 {
        courier.pubsub().publish("tick", &json!({"i": i})).await.unwrap();
    }

    let mut cursor = None;
    let mut passes = 0;
    loop {
        let (report, next) = courier.dispatch_after(cursor.as_ref(), 3).await.unwrap();
        if report.events == 0 {
            break;
        }
        cursor = next;
        passes += 1;
    }

    assert_eq!(passes, 3);
    let received: Vec<i64> = push
        .delivered_to("c1")
        .iter()
        .map(|payload| payload["i"].as_i64().unwrap())
        .collect();
    assert_eq!(received, (0..7).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_data_message_formatter() {
    let (courier, push) = memory_courier();
    let dispatcher = FanoutDispatcher::new(
        Arc::clone(courier.connections()),
        Arc::clone(courier.subscriptions()),
    )
    .with_formatter(Arc::new(DataMessage));
    let courier = courier.with_dispatcher(dispatcher);

    connect_and_subscribe(&courier, "c1", "sub-7", "A").await;
    courier.pubsub().publish("A", &json!({"x": 1})).await.unwrap();
    courier.dispatch_after(None, 10).await.unwrap();

    assert_eq!(
        push.delivered_to("c1"),
        vec![json!({"id": "sub-7", "type": "data", "payload": {"x": 1}})]
    );
}

// --- Subscription Index ---

#[tokio::test]
async fn test_subscribe_then_lookup() {
    let (courier, _push) = memory_courier();
    let connection = connect_and_subscribe(&courier, "conn", "op1", "A").await;

    let subscribers = courier
        .subscriptions()
        .subscribers_by_event_name("A")
        .collect_all()
        .await
        .unwrap();

    assert_eq!(subscribers.len(), 1);
    assert_eq!(subscribers[0].subscription_id, "conn:op1");
    assert_eq!(subscribers[0].connection, connection);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let (courier, _push) = memory_courier();
    connect_and_subscribe(&courier, "conn", "op1", "A").await;

    let subscriber = courier
        .subscriptions()
        .subscribers_by_event_name("A")
        .collect_all()
        .await
        .unwrap()
        .remove(0);
    courier.subscriptions().unsubscribe(&subscriber).await.unwrap();

    assert!(courier
        .subscriptions()
        .subscribers_by_event_name("A")
        .collect_all()
        .await
        .unwrap()
        .is_empty());

    assert!(!courier
        .subscriptions()
        .unsubscribe_operation("conn", "op1")
        .await
        .unwrap());
    assert!(!courier
        .subscriptions()
        .unsubscribe_operation("conn", "op1")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unsubscribe_operation_removes_both_rows() {
    let (courier, _push) = memory_courier();
    connect_and_subscribe(&courier, "conn", "op1", "A").await;

    assert!(courier
        .subscriptions()
        .unsubscribe_operation("conn", "op1")
        .await
        .unwrap());
    assert!(courier
        .subscriptions()
        .subscription_operation("conn", "op1")
        .await
        .unwrap()
        .is_none());
    assert!(courier
        .subscriptions()
        .subscribers_by_event_name("A")
        .collect_all()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_sweep_spans_many_scan_pages() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let push = Arc::new(RecordingPush::default());
    let courier = Courier::new(backend.clone(), push, CourierConfig::default()).unwrap();

    let connection = courier
        .connections()
        .register(ConnectInfo::new("c1", "localhost/dev"))
        .await
        .unwrap();
    // More subscriptions than fit one scan page of 12
    for i in 0..40 {
        let event = format!("event-{}", i % 5);
        courier
            .subscriptions()
            .subscribe(&[event], &connection, &OperationRequest::new(format!("op{:02}", i)))
            .await
            .unwrap();
    }
    // A connection whose id extends c1 must survive the sweep
    connect_and_subscribe(&courier, "c10", "op", "event-0").await;

    let removed = courier
        .subscriptions()
        .unsubscribe_all_by_connection_id("c1")
        .await
        .unwrap();
    assert_eq!(removed, 40);

    let config = CourierConfig::default();
    assert_eq!(backend.item_count(&config.subscriptions_table), 1);
    assert_eq!(backend.item_count(&config.subscription_operations_table), 1);

    let survivors = courier
        .subscriptions()
        .subscribers_by_event_name("event-0")
        .collect_all()
        .await
        .unwrap();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].connection.id, "c10");
}

#[tokio::test]
async fn test_invalid_subscribe_writes_nothing() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let courier = Courier::new(
        backend.clone(),
        Arc::new(RecordingPush::default()),
        CourierConfig::default(),
    )
    .unwrap();
    let connection = courier
        .connections()
        .register(ConnectInfo::new("c1", "localhost/dev"))
        .await
        .unwrap();
    let operation = OperationRequest::new("op");

    for names in [vec![], vec!["A".to_string(), "B".to_string()]] {
        let result = courier
            .subscriptions()
            .subscribe(&names, &connection, &operation)
            .await;
        assert!(matches!(result, Err(CourierError::InvalidSubscriptionRequest(_))));
    }

    let config = CourierConfig::default();
    assert_eq!(backend.item_count(&config.subscriptions_table), 0);
    assert_eq!(backend.item_count(&config.subscription_operations_table), 0);
}

// --- Connection Registry ---

#[tokio::test]
async fn test_gone_connection_cascades() {
    let (courier, push) = memory_courier();
    let connection = connect_and_subscribe(&courier, "stale", "op1", "A").await;
    courier
        .subscriptions()
        .subscribe(&["B".to_string()], &connection, &OperationRequest::new("op2"))
        .await
        .unwrap();
    push.mark_gone("stale");

    courier
        .connections()
        .send(&connection, br#"{"x":1}"#)
        .await
        .unwrap();

    assert!(matches!(
        courier
            .connections()
            .hydrate("stale", HydrateOptions::default())
            .await,
        Err(CourierError::ConnectionNotFound(_))
    ));
    for event in ["A", "B"] {
        assert!(courier
            .subscriptions()
            .subscribers_by_event_name(event)
            .collect_all()
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_connection_init_handshake() {
    let (courier, push) = memory_courier();
    let connection = courier
        .connections()
        .register(ConnectInfo::new("c1", "localhost/dev"))
        .await
        .unwrap();

    let mut context = connection.data.context.clone();
    context.insert("userId".into(), json!("u-42"));
    courier
        .connections()
        .set_data(
            "c1",
            &ConnectionData {
                endpoint: connection.data.endpoint.clone(),
                context,
                is_initialized: true,
            },
        )
        .await
        .unwrap();

    let hydrated = courier
        .connections()
        .hydrate("c1", courier.config().hydrate_options())
        .await
        .unwrap();
    assert!(hydrated.data.is_initialized);
    assert_eq!(hydrated.data.context["userId"], "u-42");
    assert_eq!(hydrated.created_at, connection.created_at);

    courier.connections().close(&hydrated).await.unwrap();
    assert_eq!(push.closed(), vec!["c1".to_string()]);
}

// --- Resolvers over a fixed sequence ---

#[tokio::test]
async fn test_resolver_against_recorded_events() {
    let (courier, _push) = memory_courier();
    let engine = Arc::new(ArrayPubSub::new(vec![
        RecordedEvent::new("A", json!({"x": 1})),
        RecordedEvent::new("B", json!("{\"x\":2}")),
    ]));
    let ctx = ResolverContext::replay(engine);
    let resolver = courier.pubsub().subscribe(["A", "B"]);

    for _ in 0..2 {
        let mut events = resolver.resolve(&ctx).await.unwrap();
        assert_eq!(events.next_payload().await.unwrap().unwrap(), json!({"x": 1}));
        assert_eq!(events.next_payload().await.unwrap().unwrap(), json!({"x": 2}));
        assert!(events.next_payload().await.is_none());
    }
}

// --- Durability ---

#[tokio::test]
async fn test_file_backend_survives_restart() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let backend_config = FileBackendConfig {
        path: dir.path().join("data"),
        sync_writes: true,
        create_if_missing: true,
    };

    let published = {
        let courier = Courier::open(
            backend_config.clone(),
            Arc::new(RecordingPush::default()),
            CourierConfig::default(),
        )
        .unwrap();
        connect_and_subscribe(&courier, "c1", "op1", "A").await;
        courier.pubsub().publish("A", &json!({"x": 1})).await.unwrap()
    };

    let push = Arc::new(RecordingPush::default());
    let courier = Courier::open(backend_config, push.clone(), immediate_dispatch()).unwrap();

    let connection = courier
        .connections()
        .hydrate("c1", HydrateOptions::default())
        .await
        .unwrap();
    assert_eq!(connection.data.endpoint, "localhost/dev");
    assert_eq!(courier.events().get(&published.id).await.unwrap(), Some(published));

    courier.dispatch_after(None, 10).await.unwrap();
    assert_eq!(push.delivered_to("c1"), vec![json!({"x": 1})]);
}

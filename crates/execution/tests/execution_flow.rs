//! Execution flows against the paper bridge: market fills with multi-TP
//! legs, smart-entry gating, trailing stops, pending expiry, and timeout
//! reconciliation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use sigpilot_bridge::PaperBridge;
use sigpilot_core::settings::ExecutionSettings;
use sigpilot_core::table::OrderTable;
use sigpilot_core::types::{
    Confidence, OrderStatus, OrderType, ParsedSignal, SignalType, TradeAction,
};
use sigpilot_execution::{build_order, DispatchPlan, ExecutionOutcome, Executor};

fn signal(pair: &str, tps: Vec<Decimal>) -> ParsedSignal {
    ParsedSignal {
        signal_id: Uuid::new_v4(),
        original_text: String::new(),
        signal_type: SignalType::MarketOrder,
        confidence: Confidence::High,
        pair: Some(pair.to_string()),
        action: Some(TradeAction::Buy),
        entry_price: Some(dec!(1.0850)),
        stop_loss: Some(dec!(1.0820)),
        take_profits: tps,
        lot_size: None,
        risk_percent: None,
        order_type_hint: None,
        provider_id: "alpha".to_string(),
        message_id: None,
        edit_sequence: 0,
        field_changes: Vec::new(),
        parsed_at: Utc::now(),
    }
}

fn setup(settings: ExecutionSettings) -> (Arc<PaperBridge>, OrderTable, Executor) {
    let bridge = Arc::new(PaperBridge::new());
    bridge.set_quote("EURUSD", dec!(1.0848), dec!(1.0850));
    let table = OrderTable::new();
    let executor = Executor::new(bridge.clone(), table.clone(), settings);
    (bridge, table, executor)
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..60 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn market_fill_places_tp_legs_proportionally() {
    let (bridge, table, executor) = setup(ExecutionSettings::default());
    let order = build_order(
        &signal("EURUSD", vec![dec!(1.0900), dec!(1.0950)]),
        dec!(0.10),
        Some("alpha".to_string()),
        Some(777),
    );
    let order_id = order.id;

    let outcome = executor.dispatch(order, DispatchPlan::default()).await;
    assert!(matches!(outcome, ExecutionOutcome::Executed { .. }));

    let stored = table.get(order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Executed);
    assert!(stored.broker_ticket.is_some());
    assert_eq!(stored.sub_tickets.len(), 1);
    assert!(stored.executed_at.is_some());

    let positions = bridge.open_positions();
    assert_eq!(positions.len(), 2);
    // Primary carries TP1, the leg carries TP2; both at half the lot.
    assert_eq!(positions[0].lot_size, dec!(0.05));
    assert_eq!(positions[0].take_profit, Some(dec!(1.0900)));
    assert_eq!(positions[0].stop_loss, Some(dec!(1.0820)));
    assert_eq!(positions[1].lot_size, dec!(0.05));
    assert_eq!(positions[1].take_profit, Some(dec!(1.0950)));
}

#[tokio::test]
async fn broker_rejection_drops_order() {
    let (bridge, table, executor) = setup(ExecutionSettings::default());
    bridge.fail_next_place("not enough money");
    let order = build_order(&signal("EURUSD", vec![]), dec!(0.10), None, None);
    let order_id = order.id;

    let outcome = executor.dispatch(order, DispatchPlan::default()).await;
    match outcome {
        ExecutionOutcome::Failed { reason, .. } => assert!(reason.contains("not enough money")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(table.get(order_id).await.is_none());
}

#[tokio::test]
async fn placement_timeout_adopts_matching_position() {
    let (bridge, table, executor) = setup(ExecutionSettings::default());
    bridge.timeout_next_place();
    let order = build_order(&signal("EURUSD", vec![]), dec!(0.10), None, Some(42));
    let order_id = order.id;

    let outcome = executor.dispatch(order, DispatchPlan::default()).await;
    assert!(matches!(outcome, ExecutionOutcome::Executed { .. }));

    let stored = table.get(order_id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Executed);
    assert_eq!(stored.broker_ticket, Some(bridge.open_positions()[0].ticket));
}

#[tokio::test(start_paused = true)]
async fn smart_entry_waits_for_spread_then_fills() {
    let mut settings = ExecutionSettings::default();
    settings.smart_entry_enabled = true;
    settings.max_spread_pips = 3.0;
    let (bridge, table, executor) = setup(settings);
    bridge.set_spread_pips(8.0);

    let order = build_order(&signal("EURUSD", vec![dec!(1.0900)]), dec!(0.10), None, None);
    let order_id = order.id;

    let outcome = executor.dispatch(order, DispatchPlan::default()).await;
    assert!(matches!(outcome, ExecutionOutcome::QueuedSmartEntry { .. }));
    assert_eq!(table.get(order_id).await.unwrap().status, OrderStatus::Pending);

    bridge.set_spread_pips(1.0);
    wait_for(|| {
        let table = table.clone();
        async move {
            table
                .get(order_id)
                .await
                .is_some_and(|o| o.status == OrderStatus::Executed)
        }
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn smart_entry_timeout_drops_order() {
    let mut settings = ExecutionSettings::default();
    settings.smart_entry_enabled = true;
    settings.max_spread_pips = 3.0;
    settings.smart_entry_timeout_secs = 5;
    let (bridge, table, executor) = setup(settings);
    bridge.set_spread_pips(8.0);

    let order = build_order(&signal("EURUSD", vec![]), dec!(0.10), None, None);
    let order_id = order.id;

    let outcome = executor.dispatch(order, DispatchPlan::default()).await;
    assert!(matches!(outcome, ExecutionOutcome::QueuedSmartEntry { .. }));

    wait_for(|| {
        let table = table.clone();
        async move { table.get(order_id).await.is_none() }
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn trailing_stop_only_tightens() {
    let mut settings = ExecutionSettings::default();
    settings.trailing_enabled = true;
    settings.trailing_distance_pips = 20.0;
    let (bridge, table, executor) = setup(settings);

    let order = build_order(&signal("EURUSD", vec![]), dec!(0.10), None, None);
    let order_id = order.id;
    let outcome = executor.dispatch(order, DispatchPlan::default()).await;
    assert!(matches!(outcome, ExecutionOutcome::Executed { .. }));

    // Best bid 1.0848 − 20 pips = 1.0828 improves on 1.0820.
    wait_for(|| {
        let table = table.clone();
        async move {
            table
                .get(order_id)
                .await
                .is_some_and(|o| o.stop_loss == Some(dec!(1.0828)))
        }
    })
    .await;

    // Price advances: stop ratchets to 1.0880.
    bridge.set_quote("EURUSD", dec!(1.0900), dec!(1.0902));
    wait_for(|| {
        let table = table.clone();
        async move {
            table
                .get(order_id)
                .await
                .is_some_and(|o| o.stop_loss == Some(dec!(1.0880)))
        }
    })
    .await;

    // Price retreats: the stop never loosens.
    bridge.set_quote("EURUSD", dec!(1.0860), dec!(1.0862));
    tokio::time::sleep(Duration::from_secs(5)).await;
    let stored = table.get(order_id).await.unwrap();
    assert_eq!(stored.stop_loss, Some(dec!(1.0880)));
    assert_eq!(stored.status, OrderStatus::Modified);
}

#[tokio::test(start_paused = true)]
async fn pending_order_expires_after_configured_hours() {
    let mut settings = ExecutionSettings::default();
    settings.pending_expiry_hours = 1;
    let (bridge, table, executor) = setup(settings);

    let mut sig = signal("EURUSD", vec![dec!(1.0900)]);
    sig.signal_type = SignalType::PendingOrder;
    sig.order_type_hint = Some(OrderType::BuyLimit);
    sig.entry_price = Some(dec!(1.0800));
    let order = build_order(&sig, dec!(0.10), None, None);
    let order_id = order.id;

    let outcome = executor.dispatch(order, DispatchPlan::default()).await;
    let ticket = match outcome {
        ExecutionOutcome::PendingPlaced { ticket, .. } => ticket,
        other => panic!("expected pending placement, got {other:?}"),
    };
    assert_eq!(table.get(order_id).await.unwrap().status, OrderStatus::Pending);

    tokio::time::sleep(Duration::from_secs(3_700)).await;
    assert_eq!(
        table.get(order_id).await.unwrap().status,
        OrderStatus::Cancelled
    );
    assert!(bridge.closed_tickets().contains(&ticket));
}

#[tokio::test(start_paused = true)]
async fn deferred_sltp_attaches_after_delay() {
    let (bridge, table, executor) = setup(ExecutionSettings::default());
    let order = build_order(&signal("EURUSD", vec![dec!(1.0900)]), dec!(0.10), None, None);
    let order_id = order.id;

    let plan = DispatchPlan {
        execution_delay: None,
        sltp_delay: Some(Duration::from_secs(5)),
    };
    let outcome = executor.dispatch(order, plan).await;
    assert!(matches!(outcome, ExecutionOutcome::Executed { .. }));

    // Naked at entry time.
    let position = bridge.open_positions()[0].clone();
    assert_eq!(position.stop_loss, None);
    assert_eq!(position.take_profit, None);

    wait_for(|| {
        let bridge = bridge.clone();
        async move {
            let p = bridge.open_positions()[0].clone();
            p.stop_loss == Some(dec!(1.0820)) && p.take_profit == Some(dec!(1.0900))
        }
    })
    .await;
    assert!(table.get(order_id).await.is_some());
}

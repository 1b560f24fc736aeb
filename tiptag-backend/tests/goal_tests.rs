mod common;

use common::*;
use tiptag_backend::error::LedgerError;
use tiptag_backend::models::{GoalUpdate, NewGoal, TipInput};

#[tokio::test]
async fn test_tip_crossing_target_completes_goal() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let goal = goal(&t.ledger, &alice, 10_000, true).await;

    // Goal progress can only come from tips: bring it to $80 first.
    t.ledger.record_tip(&tip("alice", 8_000, "seed")).await.unwrap();
    let before = reload(&t.ledger, &alice).await;

    let recorded = t.ledger.record_tip(&tip("alice", 2_500, "tx-25")).await.unwrap();
    assert_eq!(recorded.goal_id.as_deref(), Some(goal.id.as_str()));
    assert!(recorded.goal_completed);

    let after = reload(&t.ledger, &alice).await;
    assert_eq!(after.total_tips_received - before.total_tips_received, 2_500);
    assert_eq!(after.total_tip_count - before.total_tip_count, 1);

    let goals = t.ledger.list_goals(&alice.id).await.unwrap();
    let finished = goals.iter().find(|g| g.id == goal.id).unwrap();
    assert_eq!(finished.current_amount, 10_500);
    assert!(!finished.active);
    assert!(finished.completed_at.is_some());
    assert!(t.ledger.active_goal(&alice.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_completed_goal_receives_no_more_tips() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let goal = goal(&t.ledger, &alice, 1_000, true).await;

    t.ledger.record_tip(&tip("alice", 1_000, "fills-it")).await.unwrap();

    let mut late = tip("alice", 300, "after");
    late.active_goal_id = Some(goal.id.clone());
    let recorded = t.ledger.record_tip(&late).await.unwrap();
    assert!(recorded.goal_id.is_none());

    let goals = t.ledger.list_goals(&alice.id).await.unwrap();
    assert_eq!(goals[0].current_amount, 1_000);

    let err = t.ledger.activate_goal(&alice.id, &goal.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::GoalCompleted(_)));
}

#[tokio::test]
async fn test_tip_bound_to_goal_active_at_completion() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let first = goal(&t.ledger, &alice, 50_000, true).await;
    let second = goal(&t.ledger, &alice, 50_000, false).await;

    t.ledger.begin_tip(&tip("alice", 600, "slow")).await.unwrap();
    t.ledger.record_tip(&tip("alice", 400, "fast")).await.unwrap();

    // Switch goals before the pending tip confirms.
    t.ledger.activate_goal(&alice.id, &second.id).await.unwrap();
    let completed = t.ledger.complete_tip("slow").await.unwrap();
    assert_eq!(completed.goal_id.as_deref(), Some(second.id.as_str()));

    let fast = t.ledger.tip_by_reference("fast").await.unwrap().unwrap();
    assert_eq!(fast.goal_id.as_deref(), Some(first.id.as_str()));

    let goals = t.ledger.list_goals(&alice.id).await.unwrap();
    let amount_of = |id: &str| goals.iter().find(|g| g.id == id).unwrap().current_amount;
    assert_eq!(amount_of(&first.id), 400);
    assert_eq!(amount_of(&second.id), 600);
}

#[tokio::test]
async fn test_stale_goal_hint_leaves_tip_unbound() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let old = goal(&t.ledger, &alice, 5_000, true).await;
    let current = goal(&t.ledger, &alice, 5_000, true).await;

    let mut hinted: TipInput = tip("alice", 200, "hinted");
    hinted.active_goal_id = Some(old.id.clone());
    let recorded = t.ledger.record_tip(&hinted).await.unwrap();
    assert!(recorded.goal_id.is_none());

    let mut matching = tip("alice", 200, "matching");
    matching.active_goal_id = Some(current.id.clone());
    let recorded = t.ledger.record_tip(&matching).await.unwrap();
    assert_eq!(recorded.goal_id.as_deref(), Some(current.id.as_str()));
}

#[tokio::test]
async fn test_single_active_goal_after_switches() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let a = goal(&t.ledger, &alice, 1_000, true).await;
    let b = goal(&t.ledger, &alice, 1_000, true).await;
    let c = goal(&t.ledger, &alice, 1_000, false).await;

    assert_eq!(active_goal_count(t.ledger.pool(), &alice.id).await, 1);
    assert_eq!(t.ledger.active_goal(&alice.id).await.unwrap().unwrap().id, b.id);

    for id in [&a.id, &c.id, &b.id, &c.id] {
        let activated = t.ledger.activate_goal(&alice.id, id).await.unwrap();
        assert!(activated.active);
        assert_eq!(active_goal_count(t.ledger.pool(), &alice.id).await, 1);
    }

    let off = t.ledger.deactivate_goal(&alice.id, &c.id).await.unwrap();
    assert!(!off.active);
    assert_eq!(active_goal_count(t.ledger.pool(), &alice.id).await, 0);
}

#[tokio::test]
async fn test_activation_is_scoped_to_creator() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let bob = creator(&t.ledger, "bob").await;
    let alices = goal(&t.ledger, &alice, 1_000, true).await;
    let bobs = goal(&t.ledger, &bob, 1_000, true).await;

    assert_eq!(active_goal_count(t.ledger.pool(), &alice.id).await, 1);
    assert_eq!(active_goal_count(t.ledger.pool(), &bob.id).await, 1);

    let err = t.ledger.activate_goal(&alice.id, &bobs.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::GoalNotFound(_)));
    assert!(t.ledger.active_goal(&alice.id).await.unwrap().unwrap().id == alices.id);
}

#[tokio::test]
async fn test_current_amount_cannot_be_set() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let goal = goal(&t.ledger, &alice, 1_000, true).await;

    let update = GoalUpdate {
        current_amount: Some(999),
        ..GoalUpdate::default()
    };
    let err = t.ledger.update_goal(&alice.id, &goal.id, &update).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRequest(_)));

    let goals = t.ledger.list_goals(&alice.id).await.unwrap();
    assert_eq!(goals[0].current_amount, 0);
}

#[tokio::test]
async fn test_update_goal_settings() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let goal = goal(&t.ledger, &alice, 1_000, true).await;

    let updated = t
        .ledger
        .update_goal(
            &alice.id,
            &goal.id,
            &GoalUpdate {
                title: Some("Studio lights".into()),
                description: Some("Two softboxes".into()),
                target_amount: Some(2_000),
                is_public: Some(false),
                current_amount: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.title, "Studio lights");
    assert_eq!(updated.description.as_deref(), Some("Two softboxes"));
    assert_eq!(updated.target_amount, 2_000);
    assert!(!updated.is_public);
    assert!(updated.active);
}

#[tokio::test]
async fn test_lowering_target_below_progress_completes_goal() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let goal = goal(&t.ledger, &alice, 10_000, true).await;
    t.ledger.record_tip(&tip("alice", 3_000, "part")).await.unwrap();

    let update = GoalUpdate {
        target_amount: Some(2_500),
        ..GoalUpdate::default()
    };
    let updated = t.ledger.update_goal(&alice.id, &goal.id, &update).await.unwrap();
    assert!(!updated.active);
    assert!(updated.completed_at.is_some());

    let again = GoalUpdate {
        target_amount: Some(5_000),
        ..GoalUpdate::default()
    };
    let err = t.ledger.update_goal(&alice.id, &goal.id, &again).await.unwrap_err();
    assert!(matches!(err, LedgerError::GoalCompleted(_)));
}

#[tokio::test]
async fn test_goal_validation() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;

    let mut new = NewGoal {
        creator_id: alice.id.clone(),
        title: "  ".into(),
        description: None,
        target_amount: 1_000,
        is_public: true,
        activate: false,
    };
    assert!(matches!(
        t.ledger.create_goal(&new).await.unwrap_err(),
        LedgerError::InvalidRequest(_)
    ));

    new.title = "Camera".into();
    new.target_amount = 0;
    assert!(matches!(
        t.ledger.create_goal(&new).await.unwrap_err(),
        LedgerError::InvalidAmount(0)
    ));

    new.target_amount = 100;
    new.creator_id = "missing".into();
    assert!(matches!(
        t.ledger.create_goal(&new).await.unwrap_err(),
        LedgerError::CreatorNotFound(_)
    ));
}

#[tokio::test]
async fn test_lowering_target_of_inactive_goal_completes_it() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let goal = goal(&t.ledger, &alice, 1_000, true).await;
    t.ledger.record_tip(&tip("alice", 800, "most")).await.unwrap();
    t.ledger.deactivate_goal(&alice.id, &goal.id).await.unwrap();

    let update = GoalUpdate {
        target_amount: Some(500),
        ..GoalUpdate::default()
    };
    let updated = t.ledger.update_goal(&alice.id, &goal.id, &update).await.unwrap();
    assert!(!updated.active);
    assert!(updated.completed_at.is_some());

    let err = t.ledger.activate_goal(&alice.id, &goal.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::GoalCompleted(_)));

    // The next tip must not land on a goal that already hit its target.
    let recorded = t.ledger.record_tip(&tip("alice", 100, "after")).await.unwrap();
    assert!(recorded.goal_id.is_none());
    let goals = t.ledger.list_goals(&alice.id).await.unwrap();
    assert_eq!(goals[0].current_amount, 800);
}

#[tokio::test]
async fn test_empty_description_clears_it() {
    let t = ledger().await;
    let alice = creator(&t.ledger, "alice").await;
    let goal = goal(&t.ledger, &alice, 1_000, false).await;

    let described = GoalUpdate {
        description: Some("Two softboxes".into()),
        ..GoalUpdate::default()
    };
    let updated = t.ledger.update_goal(&alice.id, &goal.id, &described).await.unwrap();
    assert_eq!(updated.description.as_deref(), Some("Two softboxes"));

    // Leaving it out keeps the current text.
    let untouched = t
        .ledger
        .update_goal(&alice.id, &goal.id, &GoalUpdate::default())
        .await
        .unwrap();
    assert_eq!(untouched.description.as_deref(), Some("Two softboxes"));

    let cleared = GoalUpdate {
        description: Some("  ".into()),
        ..GoalUpdate::default()
    };
    let updated = t.ledger.update_goal(&alice.id, &goal.id, &cleared).await.unwrap();
    assert!(updated.description.is_none());
}

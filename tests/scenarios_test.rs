//! End-to-end scenario tests, one per concrete scenario in spec §8,
//! exercising whole subsystems together rather than a single unit.

use conclave_core::dispatch::{NewTask, TaskDispatcher, TaskPriority};
use conclave_core::governance::{Roundtable, Tier, Vote, VoteOutcome};
use conclave_core::oscillator::{CouplingConfig, Mode, OscillatorBus, OscillatorNode};
use conclave_core::registry::{AgentRegistry, Capability, RegisterOptions};
use conclave_core::trust::TrustVector;
use conclave_core::crawl::{CrawlAgent, CrawlCoordinator, Frontier, Role, PHI};
use conclave_core::geometry::Vec3;
use conclave_core::kernel::NodeKernel;
use std::collections::HashSet;
use std::f64::consts::TAU;

fn register(registry: &AgentRegistry, tier: Tier, trust: f64, cap: Capability) -> conclave_core::registry::Agent {
    registry.register(RegisterOptions {
        name: "agent".to_string(),
        provider: "anthropic".to_string(),
        model: "claude".to_string(),
        capabilities: HashSet::from([cap]),
        max_concurrent_tasks: 3,
        max_governance_tier: tier,
        trust_vector: TrustVector::new([trust; 6]).unwrap(),
    })
}

#[test]
fn scenario_1_tier_insufficiency() {
    let registry = AgentRegistry::new();
    register(&registry, Tier::Ru, 0.4, Capability::Testing);
    let dispatcher = TaskDispatcher::new();
    let roundtable = Roundtable::new();

    let task = dispatcher.create_task(NewTask {
        name: "scan".to_string(),
        description: String::new(),
        required_capability: Capability::SecurityScan,
        required_tier: Tier::Um,
        priority: TaskPriority::High,
        input: None,
        min_trust_score: 0.0,
        requires_approval: false,
        required_approval_count: 0,
        max_retries: 3,
    });

    let err = dispatcher.assign_task(&registry, &roundtable, &task.id).unwrap_err();
    let reason = err.reason();
    assert_eq!(reason, "No eligible agents available");
    assert_eq!(dispatcher.get(&task.id).unwrap().status, conclave_core::dispatch::TaskStatus::Pending);
}

#[tokio::test]
async fn scenario_2_roundtable_approval_unblocks_task() {
    let registry = AgentRegistry::new();
    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(register(&registry, Tier::Dr, 0.95, Capability::Orchestration).id);
    }
    let dispatcher = TaskDispatcher::new();
    let roundtable = Roundtable::new();
    let mut events = dispatcher.events().subscribe();

    let task = dispatcher.create_task(NewTask {
        name: "deploy".to_string(),
        description: String::new(),
        required_capability: Capability::Orchestration,
        required_tier: Tier::Um,
        priority: TaskPriority::Critical,
        input: None,
        min_trust_score: 0.0,
        requires_approval: true,
        required_approval_count: 5,
        max_retries: 1,
    });

    let assigned = dispatcher.assign_task(&registry, &roundtable, &task.id).unwrap().unwrap();
    assert_eq!(assigned.status, conclave_core::dispatch::TaskStatus::AwaitingApproval);

    // TaskCreated fires first; the next event is TaskAssigned carrying the
    // roundtable session id the dispatcher opened.
    let _created = events.recv().await.unwrap();
    let assigned_event = events.recv().await.unwrap();
    let session_id = assigned_event
        .data
        .get("session_id")
        .and_then(|v| v.as_str())
        .expect("TaskAssigned carries session_id")
        .to_string();

    for id in &ids[0..4] {
        let outcome = roundtable.cast_vote(&session_id, id, Vote::Approve, &registry).unwrap();
        assert_eq!(outcome, VoteOutcome::Pending);
    }
    let outcome = roundtable.cast_vote(&session_id, &ids[4], Vote::Approve, &registry).unwrap();
    assert_eq!(outcome, VoteOutcome::Approved);

    let confirmed = dispatcher.confirm_approval(&registry, &task.id).unwrap();
    assert_eq!(confirmed.status, conclave_core::dispatch::TaskStatus::Running);
}

#[test]
fn scenario_3_frontier_priority_and_rate_limit() {
    let frontier = Frontier::new(chrono::Duration::seconds(30), 10_000);
    let seed = frontier.add("https://a.com", 0, 10.0, None);
    assert!((seed.priority - 10.0).abs() < 1e-9);

    let child_x = frontier.add("https://a.com/x", 1, 1.0, Some(seed.url.clone()));
    let child_y = frontier.add("https://a.com/y", 1, 1.0, Some(seed.url.clone()));
    assert!((child_x.priority - (1.0 / PHI)).abs() < 1e-9);
    assert!((child_y.priority - (1.0 / PHI)).abs() < 1e-9);

    let claimed = frontier.claim_highest_priority("scout-1");
    assert_eq!(claimed.unwrap().url, "https://a.com");

    // a.com is now rate-limited; no other domain is queued.
    let next = frontier.claim_highest_priority("scout-1");
    assert!(next.is_none());
}

#[test]
fn scenario_4_role_switch_chebyshev_rule() {
    let coordinator = CrawlCoordinator::default();
    coordinator.add_agent(CrawlAgent::new("scout-1", Role::Scout));
    coordinator.add_agent(CrawlAgent::new("analyzer-1", Role::Analyzer));

    assert!(coordinator.request_role_switch("scout-1", Role::Analyzer, None).unwrap());
    assert_eq!(coordinator.get_agent("scout-1").unwrap().role, Role::Analyzer);

    coordinator.add_agent(CrawlAgent::new("scout-2", Role::Scout));
    assert!(coordinator.request_role_switch("scout-2", Role::Reporter, None).unwrap());

    assert!(coordinator.request_role_switch("analyzer-1", Role::Reporter, None).unwrap());
}

#[test]
fn scenario_5_kuramoto_synchronization() {
    let config = CouplingConfig { k: 5.0, coupling_radius: f64::INFINITY, min_trust_for_coupling: 0.0, max_frequency: 50.0 };
    let bus = OscillatorBus::new(config);
    for i in 0..8 {
        let mut node = OscillatorNode::new(format!("n{i}"), 3.0, 1.0, Vec3::ZERO);
        node.phase = (i as f64) * TAU / 8.0;
        bus.add_node(node);
    }
    for _ in 0..5000 {
        bus.tick(0.01);
    }
    let snapshot = bus.compute_snapshot();
    assert!(snapshot.order_parameter > 0.8);
    assert_eq!(snapshot.dominant_mode, Some(Mode::Explore));
}

#[test]
fn scenario_6_policy_monotonicity() {
    let kernel = NodeKernel::new();
    let params = conclave_core::kernel::PolicyParams {
        allowed_roles: vec!["scout".to_string()],
        min_trust: 0.1,
        energy_floor: 0.1,
        suppressed_modes: vec![],
    };
    let m1 = kernel.create_policy(params.clone(), chrono::Duration::hours(1));
    kernel.apply_policy(m1.clone()).unwrap();

    let err = kernel.apply_policy(m1).unwrap_err();
    assert_eq!(err, "epoch_not_monotonic");

    let m2 = kernel.create_policy(params, chrono::Duration::hours(1));
    kernel.apply_policy(m2).unwrap();
    assert!(kernel.history().iter().any(|m| m.epoch == 1));
}

//! Task Dispatcher (spec §4.2): priority queue, capability+trust+tier
//! matching, quorum-gated approval, retry with backoff and circuit-breaker.

pub mod retry;

pub use retry::{AutoRetrigger, RetryAction, RetryDecision, RetryPolicy};

use crate::error::{FleetError, FleetResult};
use crate::events::{EventChannel, EventType, FleetEvent};
use crate::governance::{Roundtable, Tier};
use crate::payload::Payload;
use crate::registry::{Agent, AgentRegistry, Capability};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Fixed priority weights (spec §4.2).
    pub fn weight(self) -> u8 {
        match self {
            TaskPriority::Critical => 4,
            TaskPriority::High => 3,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    AwaitingApproval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub required_capability: Capability,
    pub required_tier: Tier,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub input: Option<Payload>,
    pub output: Option<Payload>,
    pub assigned_agent: Option<String>,
    pub min_trust_score: f64,
    pub requires_approval: bool,
    pub required_approval_count: u32,
    pub approval_votes: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout: Option<chrono::Duration>,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Caller-supplied fields for `TaskDispatcher::create_task`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub required_capability: Capability,
    pub required_tier: Tier,
    pub priority: TaskPriority,
    pub input: Option<Payload>,
    pub min_trust_score: f64,
    pub requires_approval: bool,
    pub required_approval_count: u32,
    pub max_retries: u32,
}

/// A queue slot: priority weight plus monotonic sequence number for FIFO
/// tie-breaking within the same priority.
#[derive(Debug, Clone, Eq, PartialEq)]
struct QueueSlot {
    priority_weight: u8,
    sequence: u64,
    task_id: String,
}

impl Ord for QueueSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; higher priority weight should pop first,
        // and within equal priority the *earlier* sequence (smaller number)
        // should pop first, so we reverse sequence comparison.
        self.priority_weight
            .cmp(&other.priority_weight)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-agent scoring inputs used by the assignment algorithm (spec §4.2
/// step 3), exposed standalone so it can be benchmarked directly.
pub fn score_agent(agent: &Agent, now: DateTime<Utc>) -> f64 {
    let trust_score = agent.trust_vector.scalar();
    let success_rate = agent.success_rate;
    let load_ratio = if agent.max_concurrent_tasks == 0 {
        1.0
    } else {
        agent.current_task_count as f64 / agent.max_concurrent_tasks as f64
    };
    let availability = 1.0 - load_ratio;
    let hours_since_active = (now - agent.last_active_at).num_seconds() as f64 / 3600.0;
    let recency = (1.0 - hours_since_active / 10.0).max(0.0);

    0.4 * trust_score + 0.3 * success_rate + 0.2 * availability + 0.1 * recency
}

struct DispatcherState {
    tasks: HashMap<String, Task>,
    queue: BinaryHeap<QueueSlot>,
}

/// The task dispatcher: a single priority queue plus task lifecycle state,
/// protected by a single exclusive lock.
pub struct TaskDispatcher {
    state: RwLock<DispatcherState>,
    sequence: AtomicU64,
    events: EventChannel,
    retrigger: AutoRetrigger,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DispatcherState { tasks: HashMap::new(), queue: BinaryHeap::new() }),
            sequence: AtomicU64::new(0),
            events: EventChannel::new(),
            retrigger: AutoRetrigger::new(),
        }
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn retrigger(&self) -> &AutoRetrigger {
        &self.retrigger
    }

    pub fn create_task(&self, new_task: NewTask) -> Task {
        let task = Task {
            id: format!("task-{}", Uuid::new_v4()),
            name: new_task.name,
            description: new_task.description,
            required_capability: new_task.required_capability,
            required_tier: new_task.required_tier,
            priority: new_task.priority,
            status: TaskStatus::Pending,
            input: new_task.input,
            output: None,
            assigned_agent: None,
            min_trust_score: new_task.min_trust_score,
            requires_approval: new_task.requires_approval,
            required_approval_count: new_task.required_approval_count,
            approval_votes: HashSet::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            timeout: None,
            retry_count: 0,
            max_retries: new_task.max_retries,
        };
        self.enqueue(&task);

        let mut state = self.state.write().expect("dispatcher lock poisoned");
        state.tasks.insert(task.id.clone(), task.clone());
        drop(state);

        self.events.publish(FleetEvent::new(EventType::TaskCreated).with_task(task.id.clone()));
        task
    }

    fn enqueue(&self, task: &Task) {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);
        let mut state = self.state.write().expect("dispatcher lock poisoned");
        state.queue.push(QueueSlot {
            priority_weight: task.priority.weight(),
            sequence,
            task_id: task.id.clone(),
        });
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.state.read().expect("dispatcher lock poisoned").tasks.get(task_id).cloned()
    }

    /// Eligible agents for `task` (spec §4.2 step 1).
    fn eligible_agents(&self, registry: &AgentRegistry, task: &Task) -> Vec<Agent> {
        registry
            .agents_with_capability(task.required_capability)
            .into_iter()
            .filter(|a| {
                matches!(a.status, crate::registry::AgentStatus::Idle | crate::registry::AgentStatus::Busy)
                    && a.has_capacity()
                    && a.max_governance_tier >= task.required_tier
                    && a.trust_vector.scalar() >= task.min_trust_score
            })
            .collect()
    }

    /// Pop the highest-priority pending task and attempt to assign it.
    ///
    /// Returns `Ok(None)` when the queue is empty. On `NoEligibleAgents`,
    /// the task is left `pending` (not requeued — it was never dequeued
    /// from the task map, only from the priority queue's ordering
    /// structure; the caller may call `assign_next` again later once
    /// agents become available).
    pub fn assign_next(&self, registry: &AgentRegistry, roundtable: &Roundtable) -> FleetResult<Option<Task>> {
        let task_id = {
            let mut state = self.state.write().expect("dispatcher lock poisoned");
            loop {
                let Some(slot) = state.queue.pop() else { return Ok(None) };
                if let Some(task) = state.tasks.get(&slot.task_id) {
                    if task.status == TaskStatus::Pending {
                        break slot.task_id;
                    }
                }
                // Stale slot (task already progressed); keep popping.
            }
        };
        self.assign_task(registry, roundtable, &task_id)
    }

    /// Run the assignment algorithm for a specific pending task.
    pub fn assign_task(
        &self,
        registry: &AgentRegistry,
        roundtable: &Roundtable,
        task_id: &str,
    ) -> FleetResult<Option<Task>> {
        let task = self.get(task_id).ok_or_else(|| FleetError::NotFound(format!("task {task_id} not found")))?;
        if task.status != TaskStatus::Pending {
            return Err(FleetError::Conflict(format!("task {task_id} is not pending")));
        }

        let eligible = self.eligible_agents(registry, &task);
        if eligible.is_empty() {
            return Err(FleetError::PreconditionFailed("No eligible agents available".to_string()));
        }

        let now = Utc::now();
        let winner = eligible
            .iter()
            .max_by(|a, b| {
                score_agent(a, now)
                    .partial_cmp(&score_agent(b, now))
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| b.last_active_at.cmp(&a.last_active_at))
            })
            .cloned()
            .expect("non-empty eligible set");

        if task.requires_approval {
            let session = roundtable.open_with_task(
                registry,
                format!("approve task {task_id}"),
                task.required_tier,
                None,
                None,
                Some(task_id.to_string()),
            )?;
            let mut state = self.state.write().expect("dispatcher lock poisoned");
            let entry = state.tasks.get_mut(task_id).expect("task present");
            entry.status = TaskStatus::AwaitingApproval;
            entry.assigned_agent = Some(winner.id.clone());
            let updated = entry.clone();
            drop(state);
            self.events.publish(
                FleetEvent::new(EventType::TaskAssigned)
                    .with_task(task_id.to_string())
                    .with_agent(winner.id.clone())
                    .with_data("awaiting_approval", true)
                    .with_data("session_id", session.id),
            );
            return Ok(Some(updated));
        }

        registry.mark_assigned(&winner.id)?;
        let mut state = self.state.write().expect("dispatcher lock poisoned");
        let entry = state.tasks.get_mut(task_id).expect("task present");
        entry.status = TaskStatus::Running;
        entry.assigned_agent = Some(winner.id.clone());
        entry.started_at = Some(now);
        let updated = entry.clone();
        drop(state);

        self.events.publish(
            FleetEvent::new(EventType::TaskAssigned).with_task(task_id.to_string()).with_agent(winner.id.clone()),
        );
        self.events.publish(FleetEvent::new(EventType::TaskStarted).with_task(task_id.to_string()));
        Ok(Some(updated))
    }

    /// Called once a roundtable approving a task's assignment concludes
    /// `approved`: transitions `awaiting_approval -> assigned -> running`.
    pub fn confirm_approval(&self, registry: &AgentRegistry, task_id: &str) -> FleetResult<Task> {
        let mut state = self.state.write().expect("dispatcher lock poisoned");
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| FleetError::NotFound(format!("task {task_id} not found")))?;
        if task.status != TaskStatus::AwaitingApproval {
            return Err(FleetError::Conflict(format!("task {task_id} is not awaiting approval")));
        }
        let agent_id = task
            .assigned_agent
            .clone()
            .ok_or_else(|| FleetError::Fatal("approved task has no provisional assignee".to_string()))?;
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        let updated = task.clone();
        drop(state);

        registry.mark_assigned(&agent_id)?;
        self.events.publish(FleetEvent::new(EventType::TaskStarted).with_task(task_id.to_string()));
        Ok(updated)
    }

    pub fn complete_task(&self, registry: &AgentRegistry, task_id: &str, output: Payload) -> FleetResult<Task> {
        let mut state = self.state.write().expect("dispatcher lock poisoned");
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| FleetError::NotFound(format!("task {task_id} not found")))?;
        if task.status != TaskStatus::Running {
            return Err(FleetError::Conflict(format!("task {task_id} is not running")));
        }
        task.status = TaskStatus::Completed;
        task.output = Some(output);
        task.completed_at = Some(Utc::now());
        let agent_id = task.assigned_agent.clone();
        let updated = task.clone();
        drop(state);

        if let Some(agent_id) = agent_id {
            registry.record_task_completion(&agent_id, true)?;
        }
        self.retrigger.record_success(task_id);
        self.events.publish(FleetEvent::new(EventType::TaskCompleted).with_task(task_id.to_string()));
        Ok(updated)
    }

    /// Fail a task. If `retryCount + 1 < maxRetries`, returns it to
    /// `pending` (re-enters the queue); otherwise terminal `failed`.
    pub fn fail_task(&self, registry: &AgentRegistry, task_id: &str, error: &str) -> FleetResult<Task> {
        let mut state = self.state.write().expect("dispatcher lock poisoned");
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| FleetError::NotFound(format!("task {task_id} not found")))?;
        if task.status != TaskStatus::Running {
            return Err(FleetError::Conflict(format!("task {task_id} is not running")));
        }
        let agent_id = task.assigned_agent.clone();
        let will_retry = task.retry_count + 1 < task.max_retries;
        if will_retry {
            task.retry_count += 1;
            task.status = TaskStatus::Pending;
            task.assigned_agent = None;
            task.started_at = None;
        } else {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
        }
        let updated = task.clone();
        drop(state);

        if let Some(agent_id) = &agent_id {
            registry.record_task_completion(agent_id, false)?;
        }
        if will_retry {
            self.enqueue(&updated);
            self.events
                .publish(FleetEvent::new(EventType::TaskFailed).with_task(task_id.to_string()).with_data("reason", error).with_data("retrying", true));
        } else {
            self.events
                .publish(FleetEvent::new(EventType::TaskFailed).with_task(task_id.to_string()).with_data("reason", error).with_data("retrying", false));
        }
        Ok(updated)
    }

    /// Cancel a pending/running task (used by registry deregistration
    /// cascade among other callers).
    pub fn cancel_task(&self, task_id: &str) -> FleetResult<Task> {
        let mut state = self.state.write().expect("dispatcher lock poisoned");
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| FleetError::NotFound(format!("task {task_id} not found")))?;
        if matches!(task.status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled) {
            return Err(FleetError::Fatal(format!("task {task_id} is already terminal")));
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        let updated = task.clone();
        drop(state);
        self.events.publish(FleetEvent::new(EventType::TaskCancelled).with_task(task_id.to_string()));
        Ok(updated)
    }

    /// Cancel every task currently assigned to `agent_id` (spec §3:
    /// deregistration cascades outstanding assignments to cancel).
    pub fn cancel_assignments_for(&self, agent_id: &str) -> Vec<String> {
        let task_ids: Vec<String> = {
            let state = self.state.read().expect("dispatcher lock poisoned");
            state
                .tasks
                .values()
                .filter(|t| {
                    t.assigned_agent.as_deref() == Some(agent_id)
                        && matches!(t.status, TaskStatus::Assigned | TaskStatus::Running | TaskStatus::AwaitingApproval)
                })
                .map(|t| t.id.clone())
                .collect()
        };
        for id in &task_ids {
            let _ = self.cancel_task(id);
        }
        task_ids
    }

    /// The single-reaper timeout sweep named in spec §5: fire `fail_task`
    /// for every running task whose timeout has elapsed.
    pub fn reap_timeouts(&self, registry: &AgentRegistry) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let state = self.state.read().expect("dispatcher lock poisoned");
            state
                .tasks
                .values()
                .filter(|t| {
                    t.status == TaskStatus::Running
                        && t.timeout.is_some()
                        && t.started_at.is_some()
                        && now > t.started_at.unwrap() + t.timeout.unwrap()
                })
                .map(|t| t.id.clone())
                .collect()
        };
        for id in &expired {
            let _ = self.fail_task(registry, id, "timeout");
        }
        expired
    }
}

impl Default for TaskDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TrustVector;
    use std::collections::HashSet;

    fn register_agent(
        registry: &AgentRegistry,
        tier: Tier,
        trust: f64,
        capability: Capability,
    ) -> Agent {
        registry.register(crate::registry::RegisterOptions {
            name: "agent".to_string(),
            provider: "anthropic".to_string(),
            model: "claude".to_string(),
            capabilities: HashSet::from([capability]),
            max_concurrent_tasks: 2,
            max_governance_tier: tier,
            trust_vector: TrustVector::new([trust; 6]).unwrap(),
        })
    }

    #[test]
    fn tier_insufficiency_leaves_task_pending() {
        // Scenario 1 from spec §8.
        let registry = AgentRegistry::new();
        register_agent(&registry, Tier::Ru, 0.4, Capability::CodeReview);
        let dispatcher = TaskDispatcher::new();
        let roundtable = Roundtable::new();
        let task = dispatcher.create_task(NewTask {
            name: "scan".to_string(),
            description: "".to_string(),
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
        assert!(matches!(err, FleetError::PreconditionFailed(ref r) if r == "No eligible agents available"));
        assert_eq!(dispatcher.get(&task.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn highest_priority_assigned_first() {
        let registry = AgentRegistry::new();
        register_agent(&registry, Tier::Dr, 0.9, Capability::Testing);
        register_agent(&registry, Tier::Dr, 0.9, Capability::Testing);
        let dispatcher = TaskDispatcher::new();
        let roundtable = Roundtable::new();
        let low = dispatcher.create_task(NewTask {
            name: "low".to_string(),
            description: "".to_string(),
            required_capability: Capability::Testing,
            required_tier: Tier::Ko,
            priority: TaskPriority::Low,
            input: None,
            min_trust_score: 0.0,
            requires_approval: false,
            required_approval_count: 0,
            max_retries: 1,
        });
        let high = dispatcher.create_task(NewTask {
            name: "high".to_string(),
            description: "".to_string(),
            required_capability: Capability::Testing,
            required_tier: Tier::Ko,
            priority: TaskPriority::Critical,
            input: None,
            min_trust_score: 0.0,
            requires_approval: false,
            required_approval_count: 0,
            max_retries: 1,
        });
        let _ = low;
        let assigned = dispatcher.assign_next(&registry, &roundtable).unwrap().unwrap();
        assert_eq!(assigned.id, high.id);
    }

    #[test]
    fn fail_under_max_retries_requeues_to_pending() {
        let registry = AgentRegistry::new();
        register_agent(&registry, Tier::Dr, 0.9, Capability::Testing);
        let dispatcher = TaskDispatcher::new();
        let roundtable = Roundtable::new();
        let task = dispatcher.create_task(NewTask {
            name: "t".to_string(),
            description: "".to_string(),
            required_capability: Capability::Testing,
            required_tier: Tier::Ko,
            priority: TaskPriority::Medium,
            input: None,
            min_trust_score: 0.0,
            requires_approval: false,
            required_approval_count: 0,
            max_retries: 3,
        });
        dispatcher.assign_task(&registry, &roundtable, &task.id).unwrap();
        let failed = dispatcher.fail_task(&registry, &task.id, "boom").unwrap();
        assert_eq!(failed.status, TaskStatus::Pending);
        assert_eq!(failed.retry_count, 1);
    }

    #[test]
    fn fail_at_max_retries_is_terminal() {
        let registry = AgentRegistry::new();
        register_agent(&registry, Tier::Dr, 0.9, Capability::Testing);
        let dispatcher = TaskDispatcher::new();
        let roundtable = Roundtable::new();
        let task = dispatcher.create_task(NewTask {
            name: "t".to_string(),
            description: "".to_string(),
            required_capability: Capability::Testing,
            required_tier: Tier::Ko,
            priority: TaskPriority::Medium,
            input: None,
            min_trust_score: 0.0,
            requires_approval: false,
            required_approval_count: 0,
            max_retries: 1,
        });
        dispatcher.assign_task(&registry, &roundtable, &task.id).unwrap();
        let failed = dispatcher.fail_task(&registry, &task.id, "boom").unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
    }
}

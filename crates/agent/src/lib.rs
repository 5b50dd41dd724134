//! Decision runtime: replay-or-plan orchestration over the procedural
//! memory store.
//!
//! The flow is a constrained loop:
//! 1. **Fingerprint** the request context (`reflex_core::fingerprint`)
//! 2. **Replay lookup** (`memory`) - prefer a learned procedure over a
//!    fresh plan
//! 3. **Validation** (`reflex_core::validation`) - every plan, replayed or
//!    fresh, passes the full pipeline before side effects
//! 4. **Execution** (`executor`) - registered executors run the allowed
//!    steps exactly once
//! 5. **Trace capture** (`memory`) - the durable record promotion learns
//!    from
//!
//! The planner is strictly a proposer. It never bypasses validation and it
//! never executes anything itself.

pub mod executor;
pub mod memory;
pub mod orchestrator;
pub mod planner;

pub use executor::{ActionExecutor, ExecutorRegistry, LoggingExecutor, StepOutcome};
pub use memory::ProceduralMemoryService;
pub use orchestrator::{DecisionResponse, Orchestrator};
pub use planner::{HeuristicPlanner, PlannerGateway};

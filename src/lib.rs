// src/lib.rs

// Import the top-level `ainulindale` module.
pub mod ainulindale;

// Re-export the module tree at the crate root so call sites read
// `ainulindale::hex::AxialCoord` rather than the doubled path.
pub use ainulindale::{
    actor, agent_actor, board, budget, cancel, config, error, event_bus, hex, llm, plugin,
    plugins, prompt, rbac, rulefile, runner, store, truncation, work_queue,
};

// Key items for easier external access.
pub use ainulindale::board::BoardModel;
pub use ainulindale::event_bus::EventBus;
pub use ainulindale::runner::BoardRunner;

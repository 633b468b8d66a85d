mod orchestrator;
mod retry;
mod session;
mod transcript;

pub use orchestrator::{Orchestrator, State, Transition, UnknownToolPolicy, DEFAULT_MAX_ROUNDS};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use session::{AgentSession, END_SENTINEL};
pub use transcript::Transcript;
